use crate::actuators::{ActuatorBank, ActuatorSnapshot, ChannelId};
use crate::config::PlantConfig;
use crate::dispatcher::CommandTarget;
use crate::error::ConfigError;
use crate::humidifier::{HumidifierController, HumidifierState};
use crate::interlock::{
    derive_thermal_power, power_level, InterlockEngine, InterlockGroup, InterlockStatus,
};
use crate::process::{ProcessState, RunStatus};
use crate::protocol::StateReport;
use crate::pumps::{PumpBank, PumpCommand};
use crate::safety::{SafetyActions, SafetyManager};
use crate::sequencer::{PlantState, SequencerInput, SequencerOutput, TurbineSequencer};
use tracing::{debug, info};

/// Result of one control cycle.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub snapshot: ActuatorSnapshot,
    pub thermal_kw: f32,
    pub power_level: u8,
    pub plant_state: PlantState,
    pub interlocks: InterlockStatus,
    pub actions: SafetyActions,
    pub transition: Option<(PlantState, PlantState)>,
    pub humidifiers: HumidifierState,
}

/// Control core of one node: actuators, the process variables reported by
/// the other nodes, the timed pumps, interlocks, the emergency latch, the
/// turbine sequencer and the humidifiers. Owns all of its state; nothing
/// here is global.
#[derive(Debug)]
pub struct Plant {
    actuators: ActuatorBank,
    process: ProcessState,
    pumps: PumpBank,
    humidifiers: HumidifierController,
    interlocks: InterlockEngine,
    safety: SafetyManager,
    sequencer: TurbineSequencer,
    status: InterlockStatus,
    thermal_kw: f32,
    power_level: u8,
    cycle_count: u64,
}

impl Plant {
    pub fn new(config: &PlantConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            actuators: ActuatorBank::new(&config.ramps),
            process: ProcessState::new(),
            pumps: PumpBank::new(&config.pumps),
            humidifiers: HumidifierController::new(config.humidifiers.clone()),
            interlocks: InterlockEngine::new(config.interlock.clone()),
            safety: SafetyManager::new(
                config.interlock.pressure_warning_bar,
                config.interlock.pressure_critical_bar,
            ),
            sequencer: TurbineSequencer::new(&config.sequencer)?,
            status: InterlockStatus::closed(),
            thermal_kw: 0.0,
            power_level: 0,
            cycle_count: 0,
        })
    }

    /// One fixed-rate tick: pump timers, interlocks, forced-safe writes,
    /// ramping, derived quantities, humidifiers, then sequencing.
    pub fn control_cycle(&mut self, now_ms: u64) -> CycleOutcome {
        self.cycle_count = self.cycle_count.wrapping_add(1);

        self.pumps.update(now_ms);
        if self.pumps.is_local() {
            self.process.record_pumps(self.pumps.statuses(), now_ms);
        }

        let latched = self.safety.emergency_latched();
        let status = self.interlocks.evaluate(&self.process, now_ms, latched);
        let pressure = self
            .process
            .pressure()
            .and_then(|s| s.fresh(now_ms, self.interlocks.limits().stale_after_ms));
        let actions = self.safety.update_safety_state(now_ms, status, pressure);
        self.status = status;

        let mut transition = None;
        if actions.force_shutdown {
            let out = self.sequencer.force_shutdown(now_ms);
            transition = out.transition;
            self.apply_sequencer(&out);
        }
        // Overrides whatever the commands of this cycle asked for.
        self.enforce(&actions);

        self.actuators.advance();
        let snapshot = self.actuators.snapshot();
        self.thermal_kw = derive_thermal_power(&snapshot);
        self.power_level = power_level(&snapshot);
        let humidifiers = self.humidifiers.update(&snapshot, self.thermal_kw);

        let out = self.sequencer.update(SequencerInput {
            thermal_kw: self.thermal_kw,
            power_level: self.power_level,
            permitted: status.turbine_permitted,
            now_ms,
        });
        transition = out.transition.or(transition);
        self.apply_sequencer(&out);
        self.enforce(&actions);

        CycleOutcome {
            snapshot,
            thermal_kw: self.thermal_kw,
            power_level: self.power_level,
            plant_state: self.sequencer.state(),
            interlocks: status,
            actions,
            transition,
            humidifiers,
        }
    }

    fn enforce(&mut self, actions: &SafetyActions) {
        for group in [InterlockGroup::ControlRods, InterlockGroup::TurbineTrain] {
            if actions.forces_safe(group) {
                self.actuators.force_safe(group.channels());
            }
        }
    }

    fn apply_sequencer(&mut self, out: &SequencerOutput) {
        for &(channel, percent) in &out.targets {
            self.actuators.set_target(channel, percent);
        }
    }

    pub fn actuator_actual(&self, channel: ChannelId) -> f32 {
        self.actuators.channel(channel).actual()
    }

    pub fn actuator_target(&self, channel: ChannelId) -> f32 {
        self.actuators.channel(channel).target()
    }

    pub fn actuators(&self) -> &ActuatorBank {
        &self.actuators
    }

    /// Test and bring-up hook for placing channels without ramping.
    pub fn actuators_mut(&mut self) -> &mut ActuatorBank {
        &mut self.actuators
    }

    pub fn snapshot(&self) -> ActuatorSnapshot {
        self.actuators.snapshot()
    }

    pub fn thermal_kw(&self) -> f32 {
        self.thermal_kw
    }

    pub fn power_level(&self) -> u8 {
        self.power_level
    }

    pub fn plant_state(&self) -> PlantState {
        self.sequencer.state()
    }

    pub fn sequencer(&self) -> &TurbineSequencer {
        &self.sequencer
    }

    pub fn interlocks(&self) -> InterlockStatus {
        self.status
    }

    pub fn interlock_engine(&self) -> &InterlockEngine {
        &self.interlocks
    }

    pub fn process(&self) -> &ProcessState {
        &self.process
    }

    pub fn pumps(&self) -> &PumpBank {
        &self.pumps
    }

    pub fn humidifiers(&self) -> HumidifierState {
        self.humidifiers.state()
    }

    pub fn safety(&self) -> &SafetyManager {
        &self.safety
    }

    pub fn turbine_status(&self) -> RunStatus {
        self.actuators.channel(ChannelId::Turbine).status()
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }
}

impl CommandTarget for Plant {
    fn set_actuator_target(&mut self, channel: ChannelId, percent: f32) {
        self.actuators.set_target(channel, percent);
    }

    fn record_pressure(&mut self, bar: f32, now_ms: u64) {
        self.process.record_pressure(bar, now_ms);
    }

    fn record_pump_status(&mut self, pumps: [RunStatus; 3], now_ms: u64) {
        self.pumps.sync(pumps, now_ms);
        self.process.record_pumps(pumps, now_ms);
    }

    fn command_pump(&mut self, pump: usize, command: PumpCommand, now_ms: u64) -> bool {
        let accepted = self.pumps.command(pump, command, now_ms);
        if accepted {
            self.process.record_pumps(self.pumps.statuses(), now_ms);
        }
        accepted
    }

    fn record_thermal_input(&mut self, kw: f32, now_ms: u64) {
        self.process.record_thermal_input(kw, now_ms);
    }

    fn emergency_stop(&mut self, now_ms: u64) {
        let actions = self.safety.trigger_emergency_stop(now_ms);
        if actions.emergency_snap {
            self.actuators.emergency_snap();
            let snapshot = self.actuators.snapshot();
            self.thermal_kw = derive_thermal_power(&snapshot);
            self.power_level = power_level(&snapshot);
            self.humidifiers.update(&snapshot, self.thermal_kw);
        }
        self.pumps.emergency_shutdown(now_ms);
        self.process.record_pumps(self.pumps.statuses(), now_ms);
        let out = self.sequencer.force_shutdown(now_ms);
        self.apply_sequencer(&out);
        self.enforce(&actions);
    }

    /// Clears the latch and every process sample, so motion needs fresh
    /// reports from the other nodes before the interlocks reopen. Locally
    /// timed pumps are recorded again on the next cycle.
    fn reset_emergency(&mut self, now_ms: u64) {
        if self.safety.reset_emergency(now_ms) {
            self.process.clear();
            info!(now_ms, "process samples cleared after reset");
        } else {
            debug!("reset with no emergency latched");
        }
    }

    fn emergency_latched(&self) -> bool {
        self.safety.emergency_latched()
    }

    fn state_report(&self) -> StateReport {
        StateReport {
            positions: self.actuators.snapshot().rounded(),
            thermal_kw: self.thermal_kw,
            power_level: self.power_level,
            plant_state: self.sequencer.state(),
            rods_permitted: self.status.rods_permitted,
            turbine_permitted: self.status.turbine_permitted,
            emergency_latched: self.safety.emergency_latched(),
        }
    }
}
