//! Input contract for the indicator nodes, plus the alarm buzzer timing.
//!
//! Display and LED drivers live on other nodes. They only ever receive an
//! [`IndicatorView`], which is built from the telemetry snapshot and is
//! never written back.

use crate::actuators::ChannelId;
use crate::config::InterlockConfig;
use crate::process::RunStatus;
use crate::sequencer::PlantState;
use crate::telemetry::TelemetrySnapshot;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const PUMP_STARTING_INTERVAL_MS: u32 = 500;
pub const PUMP_ON_INTERVAL_MS: u32 = 200;
pub const PUMP_SHUTTING_DOWN_INTERVAL_MS: u32 = 600;

pub const EMERGENCY_BURST_MS: u64 = 5000;

const HIGH_POWER_SHIM: f32 = 70.0;
const HIGH_POWER_REGULATING: f32 = 55.0;
const HIGH_POWER_LEVEL: u8 = 2;

/// LED chase interval for a pump or turbine, `None` when it is off.
pub fn animation_interval(status: RunStatus) -> Option<u32> {
    match status {
        RunStatus::Off => None,
        RunStatus::Starting => Some(PUMP_STARTING_INTERVAL_MS),
        RunStatus::On => Some(PUMP_ON_INTERVAL_MS),
        RunStatus::ShuttingDown => Some(PUMP_SHUTTING_DOWN_INTERVAL_MS),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AlarmKind {
    #[default]
    Silent,
    HighPower,
    PressureWarning,
    PressureCritical,
    Emergency,
}

impl AlarmKind {
    /// Alternating on/off durations in ms, starting with "on".
    pub fn pattern(self) -> &'static [u64] {
        match self {
            AlarmKind::Silent => &[],
            AlarmKind::HighPower => &[500, 500],
            AlarmKind::PressureWarning => &[500, 500],
            AlarmKind::PressureCritical => &[200, 200, 200, 600],
            AlarmKind::Emergency => &[100, 100],
        }
    }
}

/// Continuous alarm implied by a snapshot. The emergency burst is handled
/// by [`AlarmBuzzer`] itself because it is a one-shot.
pub fn requested_alarm(snapshot: &TelemetrySnapshot, limits: &InterlockConfig) -> AlarmKind {
    let pressure = snapshot.pressure_bar.unwrap_or(0.0);
    if pressure >= limits.pressure_critical_bar {
        AlarmKind::PressureCritical
    } else if pressure >= limits.pressure_warning_bar {
        AlarmKind::PressureWarning
    } else if snapshot.power_level >= HIGH_POWER_LEVEL
        && snapshot.actual(ChannelId::ShimRod) >= HIGH_POWER_SHIM
        && snapshot.actual(ChannelId::RegulatingRod) >= HIGH_POWER_REGULATING
    {
        AlarmKind::HighPower
    } else {
        AlarmKind::Silent
    }
}

/// Buzzer as timer state. `update` is called from the loop and never waits.
#[derive(Debug, Clone, Default)]
pub struct AlarmBuzzer {
    active: AlarmKind,
    phase: usize,
    phase_started_ms: u64,
    emergency_until_ms: Option<u64>,
    emergency_seen: bool,
    output: bool,
}

impl AlarmBuzzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> AlarmKind {
        self.active
    }

    pub fn output(&self) -> bool {
        self.output
    }

    /// Advances the pattern. A rising edge of `emergency_latched` arms the
    /// burst, which runs for [`EMERGENCY_BURST_MS`] and then falls back to
    /// `requested` even if the latch is still set.
    pub fn update(&mut self, now_ms: u64, requested: AlarmKind, emergency_latched: bool) -> bool {
        if emergency_latched && !self.emergency_seen {
            info!(now_ms, "emergency burst armed");
            self.emergency_until_ms = Some(now_ms + EMERGENCY_BURST_MS);
        }
        self.emergency_seen = emergency_latched;

        let burst = match self.emergency_until_ms {
            Some(until) if now_ms < until => true,
            Some(_) => {
                self.emergency_until_ms = None;
                false
            }
            None => false,
        };
        let wanted = if burst { AlarmKind::Emergency } else { requested };

        if wanted != self.active {
            debug!(from = ?self.active, to = ?wanted, "alarm pattern change");
            self.active = wanted;
            self.phase = 0;
            self.phase_started_ms = now_ms;
        } else {
            let pattern = wanted.pattern();
            if let Some(&duration) = pattern.get(self.phase) {
                if now_ms.saturating_sub(self.phase_started_ms) >= duration {
                    self.phase = (self.phase + 1) % pattern.len();
                    self.phase_started_ms = now_ms;
                }
            }
        }

        self.output = !self.active.pattern().is_empty() && self.phase % 2 == 0;
        self.output
    }
}

/// Read-only input to an indicator node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorView {
    pub power_pwm: u8,
    pub power_level: u8,
    pub plant_state: PlantState,
    pub pump_animation_ms: [Option<u32>; 3],
    pub turbine_animation_ms: Option<u32>,
    pub emergency: bool,
    pub alarm: AlarmKind,
    pub buzzer_on: bool,
}

impl IndicatorView {
    pub fn from_snapshot(snapshot: &TelemetrySnapshot, buzzer: &AlarmBuzzer) -> Self {
        Self {
            power_pwm: snapshot.indicator_pwm,
            power_level: snapshot.power_level,
            plant_state: snapshot.plant_state,
            pump_animation_ms: snapshot.pumps.map(animation_interval),
            turbine_animation_ms: animation_interval(snapshot.turbine_status),
            emergency: snapshot.emergency_latched,
            alarm: buzzer.active(),
            buzzer_on: buzzer.output(),
        }
    }
}

/// Anything that can show an [`IndicatorView`].
pub trait IndicatorDriver {
    fn render(&mut self, view: &IndicatorView);
}

/// Driver that logs view changes, for nodes without a panel attached.
#[derive(Debug, Default)]
pub struct LogIndicator {
    last: Option<IndicatorView>,
    renders: u32,
}

impl LogIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn renders(&self) -> u32 {
        self.renders
    }
}

impl IndicatorDriver for LogIndicator {
    fn render(&mut self, view: &IndicatorView) {
        if self.last.as_ref() == Some(view) {
            return;
        }
        self.renders = self.renders.wrapping_add(1);
        info!(
            pwm = view.power_pwm,
            level = view.power_level,
            state = %view.plant_state,
            alarm = ?view.alarm,
            emergency = view.emergency,
            "indicator update"
        );
        self.last = Some(*view);
    }
}
