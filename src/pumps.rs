//! Timed pump model for locally commanded pumps.
//!
//! A pump starts only from Off and stops only from On. Starting and
//! shutting down take a fixed time that `update` checks against the clock
//! on each control cycle; nothing waits.
//!
//! Pump codes reported by the pump nodes overwrite the model. After a
//! report the node stops timing transitions itself until the next local
//! command or emergency stop.

use crate::config::PumpConfig;
use crate::process::RunStatus;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const PUMP_COUNT: usize = 3;
pub const PUMP_NAMES: [&str; PUMP_COUNT] = ["primary", "secondary", "tertiary"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PumpCommand {
    Off,
    On,
}

impl PumpCommand {
    pub fn code(self) -> u8 {
        match self {
            PumpCommand::Off => 0,
            PumpCommand::On => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(PumpCommand::Off),
            1 => Some(PumpCommand::On),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct PumpUnit {
    status: RunStatus,
    since_ms: u64,
}

#[derive(Debug, Clone)]
pub struct PumpBank {
    units: [PumpUnit; PUMP_COUNT],
    start_ms: u64,
    stop_ms: u64,
    local: bool,
}

impl PumpBank {
    pub fn new(config: &PumpConfig) -> Self {
        Self {
            units: [PumpUnit::default(); PUMP_COUNT],
            start_ms: config.start_ms,
            stop_ms: config.stop_ms,
            local: false,
        }
    }

    pub fn statuses(&self) -> [RunStatus; PUMP_COUNT] {
        self.units.map(|u| u.status)
    }

    pub fn status(&self, pump: usize) -> Option<RunStatus> {
        self.units.get(pump).map(|u| u.status)
    }

    /// True while the pump states come from this node rather than from a
    /// pump node report.
    pub fn is_local(&self) -> bool {
        self.local
    }

    /// Applies an on/off request. Returns false and leaves the pump alone
    /// when the request is not legal from its current state.
    pub fn command(&mut self, pump: usize, command: PumpCommand, now_ms: u64) -> bool {
        let Some(unit) = self.units.get_mut(pump) else {
            return false;
        };
        let next = match (command, unit.status) {
            (PumpCommand::On, RunStatus::Off) => RunStatus::Starting,
            (PumpCommand::Off, RunStatus::On) => RunStatus::ShuttingDown,
            (command, current) => {
                debug!(pump = PUMP_NAMES[pump], ?command, ?current, "pump command ignored");
                return false;
            }
        };
        unit.status = next;
        unit.since_ms = now_ms;
        self.local = true;
        info!(pump = PUMP_NAMES[pump], status = ?next, "pump command accepted");
        true
    }

    /// Completes transitions whose time is up. Returns whether any pump
    /// changed state.
    pub fn update(&mut self, now_ms: u64) -> bool {
        if !self.local {
            return false;
        }
        let mut changed = false;
        for (name, unit) in PUMP_NAMES.iter().zip(self.units.iter_mut()) {
            let (hold_ms, next) = match unit.status {
                RunStatus::Starting => (self.start_ms, RunStatus::On),
                RunStatus::ShuttingDown => (self.stop_ms, RunStatus::Off),
                RunStatus::Off | RunStatus::On => continue,
            };
            if now_ms.saturating_sub(unit.since_ms) >= hold_ms {
                unit.status = next;
                unit.since_ms = now_ms;
                changed = true;
                info!(pump = *name, status = ?next, "pump transition complete");
            }
        }
        changed
    }

    /// Every pump runs down, whatever it was doing.
    pub fn emergency_shutdown(&mut self, now_ms: u64) {
        warn!(now_ms, "all pumps shutting down");
        for unit in &mut self.units {
            unit.status = RunStatus::ShuttingDown;
            unit.since_ms = now_ms;
        }
        self.local = true;
    }

    /// Takes over the codes reported by the pump nodes.
    pub fn sync(&mut self, reported: [RunStatus; PUMP_COUNT], now_ms: u64) {
        for (unit, status) in self.units.iter_mut().zip(reported) {
            if unit.status != status {
                unit.status = status;
                unit.since_ms = now_ms;
            }
        }
        self.local = false;
    }
}
