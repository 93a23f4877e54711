use crate::interlock::{InterlockGroup, InterlockStatus};
use heapless::Vec;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

const MAX_SAFETY_EVENTS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SafetyLevel {
    Normal,
    Caution,
    Warning,
    Critical,
    Emergency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafetyEvent {
    RodInterlockTrip,
    TurbineInterlockTrip,
    PressureWarning,
    PressureCritical,
    EmergencyStop,
    EmergencyReset,
}

impl SafetyEvent {
    fn level(self) -> SafetyLevel {
        match self {
            SafetyEvent::EmergencyReset => SafetyLevel::Normal,
            SafetyEvent::RodInterlockTrip | SafetyEvent::TurbineInterlockTrip => {
                SafetyLevel::Caution
            }
            SafetyEvent::PressureWarning => SafetyLevel::Warning,
            SafetyEvent::PressureCritical => SafetyLevel::Critical,
            SafetyEvent::EmergencyStop => SafetyLevel::Emergency,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SafetyEventRecord {
    pub event: SafetyEvent,
    pub timestamp: u64,
    pub level: SafetyLevel,
    pub resolved: bool,
    /// Blocking condition name for interlock trips.
    pub detail: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SafetyState {
    pub emergency_latched: bool,
    pub safety_level: SafetyLevel,
    pub active_events: u8,
    pub emergency_count: u32,
    pub last_emergency_ms: Option<u64>,
    pub last_reset_ms: Option<u64>,
    pub interlocks: InterlockStatus,
}

/// What the control cycle must do this cycle. Forced-safe writes take
/// priority over any command-sourced target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SafetyActions {
    pub force_safe_rods: bool,
    pub force_safe_turbine: bool,
    pub force_shutdown: bool,
    pub emergency_snap: bool,
}

impl SafetyActions {
    pub fn has_actions(&self) -> bool {
        self.force_safe_rods || self.force_safe_turbine || self.force_shutdown || self.emergency_snap
    }

    pub fn forces_safe(&self, group: InterlockGroup) -> bool {
        match group {
            InterlockGroup::ControlRods => self.force_safe_rods,
            InterlockGroup::TurbineTrain => self.force_safe_turbine,
        }
    }
}

/// Holds the sticky emergency latch and turns interlock results into
/// per-cycle actions.
#[derive(Debug)]
pub struct SafetyManager {
    state: SafetyState,
    event_history: Vec<SafetyEventRecord, MAX_SAFETY_EVENTS>,
    pressure_warning_bar: f32,
    pressure_critical_bar: f32,
}

impl SafetyManager {
    pub fn new(pressure_warning_bar: f32, pressure_critical_bar: f32) -> Self {
        Self {
            state: SafetyState {
                emergency_latched: false,
                safety_level: SafetyLevel::Normal,
                active_events: 0,
                emergency_count: 0,
                last_emergency_ms: None,
                last_reset_ms: None,
                interlocks: InterlockStatus::closed(),
            },
            event_history: Vec::new(),
            pressure_warning_bar,
            pressure_critical_bar,
        }
    }

    pub fn emergency_latched(&self) -> bool {
        self.state.emergency_latched
    }

    pub fn get_state(&self) -> &SafetyState {
        &self.state
    }

    pub fn get_event_history(&self) -> &[SafetyEventRecord] {
        &self.event_history
    }

    pub fn get_active_events(&self) -> impl Iterator<Item = &SafetyEventRecord> {
        self.event_history.iter().filter(|e| !e.resolved)
    }

    /// Latches the emergency stop. The snap to safe positions happens once,
    /// on the first trigger; repeated triggers only count.
    pub fn trigger_emergency_stop(&mut self, now_ms: u64) -> SafetyActions {
        self.state.emergency_count = self.state.emergency_count.wrapping_add(1);
        self.state.last_emergency_ms = Some(now_ms);
        let first = !self.state.emergency_latched;
        self.state.emergency_latched = true;

        if first {
            error!(now_ms, "EMERGENCY STOP latched");
            self.record_event(SafetyEvent::EmergencyStop, now_ms, None);
        }
        self.recompute_level();

        SafetyActions {
            force_safe_rods: true,
            force_safe_turbine: true,
            force_shutdown: true,
            emergency_snap: first,
        }
    }

    /// Clears the latch. Returns false if it was not set.
    pub fn reset_emergency(&mut self, now_ms: u64) -> bool {
        if !self.state.emergency_latched {
            return false;
        }
        self.state.emergency_latched = false;
        self.state.last_reset_ms = Some(now_ms);
        self.resolve(SafetyEvent::EmergencyStop);
        self.record_event(SafetyEvent::EmergencyReset, now_ms, None);
        // A reset is informational, it never stays active.
        self.resolve(SafetyEvent::EmergencyReset);
        self.recompute_level();
        info!(now_ms, "emergency stop reset");
        true
    }

    /// Called once per control cycle with this cycle's interlock results.
    pub fn update_safety_state(
        &mut self,
        now_ms: u64,
        interlocks: InterlockStatus,
        pressure_bar: Option<f32>,
    ) -> SafetyActions {
        let previous = self.state.interlocks;
        self.state.interlocks = interlocks;

        self.track_interlock(
            SafetyEvent::RodInterlockTrip,
            previous.rods_permitted,
            interlocks.rods_permitted,
            interlocks.rods_blocked_by,
            now_ms,
        );
        self.track_interlock(
            SafetyEvent::TurbineInterlockTrip,
            previous.turbine_permitted,
            interlocks.turbine_permitted,
            interlocks.turbine_blocked_by,
            now_ms,
        );
        self.check_pressure(pressure_bar, now_ms);
        self.recompute_level();

        let latched = self.state.emergency_latched;
        SafetyActions {
            force_safe_rods: latched || !interlocks.rods_permitted,
            force_safe_turbine: latched || !interlocks.turbine_permitted,
            force_shutdown: latched || !interlocks.turbine_permitted,
            emergency_snap: false,
        }
    }

    fn track_interlock(
        &mut self,
        event: SafetyEvent,
        was_permitted: bool,
        permitted: bool,
        blocked_by: Option<&'static str>,
        now_ms: u64,
    ) {
        let active = self.is_active(event);
        if !permitted && !active {
            // Only a loss of permission is a trip; the closed state at boot is not.
            if was_permitted {
                warn!(?event, condition = blocked_by.unwrap_or("unknown"), "interlock tripped");
            }
            self.record_event(event, now_ms, blocked_by);
        } else if permitted && active {
            info!(?event, "interlock satisfied");
            self.resolve(event);
        }
    }

    fn check_pressure(&mut self, pressure_bar: Option<f32>, now_ms: u64) {
        let pressure = pressure_bar.unwrap_or(0.0);
        let critical = pressure >= self.pressure_critical_bar;
        let warning = !critical && pressure >= self.pressure_warning_bar;

        for (event, raised) in [
            (SafetyEvent::PressureCritical, critical),
            (SafetyEvent::PressureWarning, warning),
        ] {
            match (raised, self.is_active(event)) {
                (true, false) => {
                    warn!(?event, pressure, "pressure alarm");
                    self.record_event(event, now_ms, None);
                }
                (false, true) => self.resolve(event),
                _ => {}
            }
        }
    }

    fn is_active(&self, event: SafetyEvent) -> bool {
        self.event_history.iter().any(|e| e.event == event && !e.resolved)
    }

    fn resolve(&mut self, event: SafetyEvent) {
        for record in self.event_history.iter_mut().filter(|e| e.event == event) {
            record.resolved = true;
        }
    }

    fn record_event(&mut self, event: SafetyEvent, now_ms: u64, detail: Option<&'static str>) {
        if self.event_history.is_full() {
            // Drop the oldest resolved record first, else the oldest overall.
            let idx = self.event_history.iter().position(|e| e.resolved).unwrap_or(0);
            self.event_history.remove(idx);
        }
        let _ = self.event_history.push(SafetyEventRecord {
            event,
            timestamp: now_ms,
            level: event.level(),
            resolved: false,
            detail,
        });
    }

    fn recompute_level(&mut self) {
        let active = self.event_history.iter().filter(|e| !e.resolved);
        self.state.active_events = active.clone().count().min(u8::MAX as usize) as u8;
        self.state.safety_level = active.map(|e| e.level).max().unwrap_or(SafetyLevel::Normal);
    }

    pub fn has_active(&self, event: SafetyEvent) -> bool {
        self.is_active(event)
    }
}
