//! Turbine train start/stop sequencing.
//!
//! `Idle -> Starting -> Running -> ShuttingDown -> Idle`. Steps advance on a
//! dwell time measured against the caller's monotonic clock, so the
//! behaviour does not depend on how often `update` runs.

use crate::actuators::ChannelId;
use crate::config::SequencerConfig;
use crate::error::ConfigError;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

type StepOutputs = &'static [(ChannelId, f32)];

const STARTUP_STEPS: [StepOutputs; 4] = [
    &[(ChannelId::SteamGenerator, 50.0)],
    &[(ChannelId::Turbine, 40.0)],
    &[(ChannelId::CondenserPump, 60.0)],
    &[(ChannelId::CoolingTowerFan, 60.0)],
];

const SHUTDOWN_STEPS: [StepOutputs; 4] = [
    &[(ChannelId::SteamGenerator, 0.0)],
    &[(ChannelId::Turbine, 0.0)],
    &[(ChannelId::CondenserPump, 0.0)],
    &[(ChannelId::CoolingTowerFan, 0.0)],
];

const NORMAL_OUTPUTS: StepOutputs = &[
    (ChannelId::SteamGenerator, 50.0),
    (ChannelId::Turbine, 40.0),
    (ChannelId::CondenserPump, 60.0),
    (ChannelId::CoolingTowerFan, 60.0),
];

const FULL_OUTPUTS: StepOutputs = &[
    (ChannelId::SteamGenerator, 100.0),
    (ChannelId::Turbine, 100.0),
    (ChannelId::CondenserPump, 100.0),
    (ChannelId::CoolingTowerFan, 100.0),
];

const FULL_POWER_LEVEL: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlantState {
    #[default]
    Idle,
    Starting,
    Running,
    ShuttingDown,
}

impl PlantState {
    pub fn code(self) -> u8 {
        match self {
            PlantState::Idle => 0,
            PlantState::Starting => 1,
            PlantState::Running => 2,
            PlantState::ShuttingDown => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(PlantState::Idle),
            1 => Some(PlantState::Starting),
            2 => Some(PlantState::Running),
            3 => Some(PlantState::ShuttingDown),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PlantState::Idle => "IDLE",
            PlantState::Starting => "STARTING",
            PlantState::Running => "RUNNING",
            PlantState::ShuttingDown => "SHUTTING_DOWN",
        }
    }

    fn steps(self) -> &'static [StepOutputs] {
        match self {
            PlantState::Starting => &STARTUP_STEPS,
            PlantState::ShuttingDown => &SHUTDOWN_STEPS,
            PlantState::Idle | PlantState::Running => &[],
        }
    }
}

impl core::fmt::Display for PlantState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

pub type TargetWrites = Vec<(ChannelId, f32), 8>;

#[derive(Debug, Clone, Copy)]
pub struct SequencerInput {
    pub thermal_kw: f32,
    pub power_level: u8,
    /// Turbine train interlock result for this cycle.
    pub permitted: bool,
    pub now_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SequencerOutput {
    pub targets: TargetWrites,
    pub transition: Option<(PlantState, PlantState)>,
}

impl SequencerOutput {
    fn write(&mut self, outputs: StepOutputs) {
        for &w in outputs {
            let _ = self.targets.push(w);
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurbineSequencer {
    state: PlantState,
    step: u8,
    state_entered_ms: u64,
    last_step_ms: u64,
    running_level: Option<u8>,
    start_threshold_kw: f32,
    stop_threshold_kw: f32,
    dwell_ms: u64,
    transition_count: u32,
}

impl TurbineSequencer {
    pub fn new(config: &SequencerConfig) -> Result<Self, ConfigError> {
        if !(config.stop_threshold_kw < config.start_threshold_kw) {
            return Err(ConfigError::Invalid(
                "stop threshold must be strictly below start threshold",
            ));
        }
        Ok(Self {
            state: PlantState::Idle,
            step: 0,
            state_entered_ms: 0,
            last_step_ms: 0,
            running_level: None,
            start_threshold_kw: config.start_threshold_kw,
            stop_threshold_kw: config.stop_threshold_kw,
            dwell_ms: config.dwell_ms,
            transition_count: 0,
        })
    }

    pub fn state(&self) -> PlantState {
        self.state
    }

    /// 1-based while Starting or ShuttingDown, 0 otherwise.
    pub fn step(&self) -> u8 {
        self.step
    }

    pub fn time_in_state(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.state_entered_ms)
    }

    pub fn transition_count(&self) -> u32 {
        self.transition_count
    }

    pub fn update(&mut self, input: SequencerInput) -> SequencerOutput {
        let mut out = SequencerOutput::default();
        let now = input.now_ms;

        match self.state {
            PlantState::Idle => {
                if input.permitted && input.thermal_kw > self.start_threshold_kw {
                    self.enter(PlantState::Starting, now, &mut out);
                }
            }
            PlantState::Starting => {
                if self.must_shut_down(&input) {
                    self.enter(PlantState::ShuttingDown, now, &mut out);
                } else if self.dwell_elapsed(now) && self.next_step(now, &mut out) {
                    self.enter(PlantState::Running, now, &mut out);
                    self.apply_running_outputs(input.power_level, &mut out);
                }
            }
            PlantState::Running => {
                if self.must_shut_down(&input) {
                    self.enter(PlantState::ShuttingDown, now, &mut out);
                } else if self.running_level != Some(input.power_level) {
                    self.apply_running_outputs(input.power_level, &mut out);
                }
            }
            PlantState::ShuttingDown => {
                if self.dwell_elapsed(now) && self.next_step(now, &mut out) {
                    self.enter(PlantState::Idle, now, &mut out);
                }
            }
        }
        out
    }

    /// Abandons any remaining startup steps and begins shutdown at its first
    /// step. No effect unless Starting or Running.
    pub fn force_shutdown(&mut self, now_ms: u64) -> SequencerOutput {
        let mut out = SequencerOutput::default();
        if matches!(self.state, PlantState::Starting | PlantState::Running) {
            warn!(from = %self.state, "forced turbine shutdown");
            self.enter(PlantState::ShuttingDown, now_ms, &mut out);
        }
        out
    }

    fn must_shut_down(&self, input: &SequencerInput) -> bool {
        !input.permitted || input.thermal_kw < self.stop_threshold_kw
    }

    fn dwell_elapsed(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_step_ms) >= self.dwell_ms
    }

    fn enter(&mut self, next: PlantState, now_ms: u64, out: &mut SequencerOutput) {
        let previous = self.state;
        self.state = next;
        self.state_entered_ms = now_ms;
        self.last_step_ms = now_ms;
        self.running_level = None;
        self.transition_count = self.transition_count.wrapping_add(1);
        out.transition = Some((previous, next));
        info!(from = %previous, to = %next, "turbine sequencer transition");

        if next.steps().is_empty() {
            self.step = 0;
        } else {
            self.step = 1;
            out.write(next.steps()[0]);
        }
    }

    /// Fires the next step's outputs. Returns true once the last step has fired.
    fn next_step(&mut self, now_ms: u64, out: &mut SequencerOutput) -> bool {
        let steps = self.state.steps();
        if let Some(outputs) = steps.get(self.step as usize) {
            self.step += 1;
            self.last_step_ms = now_ms;
            out.write(outputs);
            info!(state = %self.state, step = self.step, "sequence step");
        }
        self.step as usize >= steps.len()
    }

    fn apply_running_outputs(&mut self, level: u8, out: &mut SequencerOutput) {
        self.running_level = Some(level);
        if level >= FULL_POWER_LEVEL {
            out.write(FULL_OUTPUTS);
        } else {
            out.write(NORMAL_OUTPUTS);
        }
    }
}
