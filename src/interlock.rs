//! Interlock evaluation and the derived quantities computed from actuator
//! positions.
//!
//! Every condition is re-evaluated from scratch each cycle. A missing, stale
//! or out-of-range input makes its condition false, so an interlock can only
//! fail closed.

use crate::actuators::{ActuatorSnapshot, ChannelId};
use crate::config::InterlockConfig;
use crate::process::{ProcessState, RunStatus};
use heapless::Vec;
use serde::{Deserialize, Serialize};

const MAX_CONDITIONS: usize = 8;

pub const THERMAL_BASELINE_KW: f32 = -200.0;
pub const SAFETY_ROD_WEIGHT_KW: f32 = 3.0;
pub const SHIM_ROD_WEIGHT_KW: f32 = 5.0;
pub const REGULATING_ROD_WEIGHT_KW: f32 = 4.0;
pub const MAX_THERMAL_KW: f32 = 1000.0;

const LEVEL_ONE_SHIM: f32 = 21.0;
const LEVEL_ONE_REGULATING: f32 = 16.0;
const LEVEL_TWO_SHIM: f32 = 41.0;
const LEVEL_TWO_REGULATING: f32 = 31.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterlockGroup {
    ControlRods,
    TurbineTrain,
}

impl InterlockGroup {
    pub fn channels(self) -> &'static [ChannelId] {
        match self {
            InterlockGroup::ControlRods => &ChannelId::RODS,
            InterlockGroup::TurbineTrain => &ChannelId::TURBINE_TRAIN,
        }
    }
}

/// Everything a predicate may look at, borrowed for one evaluation.
pub struct ProcessView<'a> {
    pub process: &'a ProcessState,
    pub limits: &'a InterlockConfig,
    pub now_ms: u64,
    pub emergency_latched: bool,
}

impl ProcessView<'_> {
    fn fresh_pressure(&self) -> Option<f32> {
        self.process
            .pressure()
            .and_then(|s| s.fresh(self.now_ms, self.limits.stale_after_ms))
            .filter(|p| p.is_finite())
    }

    fn fresh_pump(&self, slot: usize) -> Option<RunStatus> {
        self.process
            .pumps()
            .and_then(|s| s.fresh(self.now_ms, self.limits.stale_after_ms))
            .map(|pumps| pumps[slot])
    }
}

pub type Predicate = fn(&ProcessView<'_>) -> bool;

#[derive(Clone, Copy)]
pub struct Condition {
    pub name: &'static str,
    pub check: Predicate,
}

impl core::fmt::Debug for Condition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Condition").field("name", &self.name).finish()
    }
}

fn pressure_in_window(view: &ProcessView<'_>) -> bool {
    view.fresh_pressure().map_or(false, |p| {
        p >= view.limits.min_pressure_bar && p <= view.limits.max_pressure_bar
    })
}

fn primary_pump_on(view: &ProcessView<'_>) -> bool {
    view.fresh_pump(0) == Some(RunStatus::On)
}

fn secondary_pump_on(view: &ProcessView<'_>) -> bool {
    view.fresh_pump(1) == Some(RunStatus::On)
}

fn tertiary_pump_on(view: &ProcessView<'_>) -> bool {
    view.fresh_pump(2) == Some(RunStatus::On)
}

fn emergency_clear(view: &ProcessView<'_>) -> bool {
    !view.emergency_latched
}

/// Named predicates that must all hold in the same cycle.
#[derive(Debug, Clone, Default)]
pub struct ConditionSet {
    conditions: Vec<Condition, MAX_CONDITIONS>,
}

impl ConditionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'static str, check: Predicate) -> Self {
        let pushed = self.conditions.push(Condition { name, check });
        debug_assert!(pushed.is_ok(), "too many interlock conditions");
        self
    }

    pub fn first_failure(&self, view: &ProcessView<'_>) -> Option<&'static str> {
        self.conditions
            .iter()
            .find(|c| !(c.check)(view))
            .map(|c| c.name)
    }

    pub fn all_satisfied(&self, view: &ProcessView<'_>) -> bool {
        self.first_failure(view).is_none()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.conditions.iter().map(|c| c.name)
    }
}

/// Outcome of one interlock evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InterlockStatus {
    pub rods_permitted: bool,
    pub turbine_permitted: bool,
    #[serde(skip)]
    pub rods_blocked_by: Option<&'static str>,
    #[serde(skip)]
    pub turbine_blocked_by: Option<&'static str>,
}

impl InterlockStatus {
    pub fn permitted(&self, group: InterlockGroup) -> bool {
        match group {
            InterlockGroup::ControlRods => self.rods_permitted,
            InterlockGroup::TurbineTrain => self.turbine_permitted,
        }
    }

    /// Everything blocked, used before the first evaluation.
    pub fn closed() -> Self {
        Self {
            rods_permitted: false,
            turbine_permitted: false,
            rods_blocked_by: None,
            turbine_blocked_by: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InterlockEngine {
    rods: ConditionSet,
    turbine: ConditionSet,
    limits: InterlockConfig,
}

impl InterlockEngine {
    pub fn new(limits: InterlockConfig) -> Self {
        let rods = ConditionSet::new()
            .with("pressure_in_window", pressure_in_window)
            .with("primary_pump_on", primary_pump_on)
            .with("secondary_pump_on", secondary_pump_on)
            .with("emergency_clear", emergency_clear);
        let turbine = ConditionSet::new()
            .with("tertiary_pump_on", tertiary_pump_on)
            .with("emergency_clear", emergency_clear);
        Self {
            rods,
            turbine,
            limits,
        }
    }

    pub fn conditions(&self, group: InterlockGroup) -> &ConditionSet {
        match group {
            InterlockGroup::ControlRods => &self.rods,
            InterlockGroup::TurbineTrain => &self.turbine,
        }
    }

    pub fn limits(&self) -> &InterlockConfig {
        &self.limits
    }

    fn view<'a>(
        &'a self,
        process: &'a ProcessState,
        now_ms: u64,
        emergency_latched: bool,
    ) -> ProcessView<'a> {
        ProcessView {
            process,
            limits: &self.limits,
            now_ms,
            emergency_latched,
        }
    }

    pub fn is_permitted(
        &self,
        group: InterlockGroup,
        process: &ProcessState,
        now_ms: u64,
        emergency_latched: bool,
    ) -> bool {
        let view = self.view(process, now_ms, emergency_latched);
        self.conditions(group).all_satisfied(&view)
    }

    pub fn evaluate(
        &self,
        process: &ProcessState,
        now_ms: u64,
        emergency_latched: bool,
    ) -> InterlockStatus {
        let view = self.view(process, now_ms, emergency_latched);
        let rods_blocked_by = self.rods.first_failure(&view);
        let turbine_blocked_by = self.turbine.first_failure(&view);
        InterlockStatus {
            rods_permitted: rods_blocked_by.is_none(),
            turbine_permitted: turbine_blocked_by.is_none(),
            rods_blocked_by,
            turbine_blocked_by,
        }
    }
}

/// Thermal power in kW from rod positions. The weights and baseline are
/// fixed numeric contracts, not a physical model.
pub fn derive_thermal_power(snapshot: &ActuatorSnapshot) -> f32 {
    let raw = THERMAL_BASELINE_KW
        + SAFETY_ROD_WEIGHT_KW * snapshot.get(ChannelId::SafetyRod)
        + SHIM_ROD_WEIGHT_KW * snapshot.get(ChannelId::ShimRod)
        + REGULATING_ROD_WEIGHT_KW * snapshot.get(ChannelId::RegulatingRod);
    raw.clamp(0.0, MAX_THERMAL_KW)
}

pub fn power_fraction(thermal_kw: f32) -> f32 {
    (thermal_kw / MAX_THERMAL_KW).clamp(0.0, 1.0)
}

/// Aggregate power level 0..=2 from the shim and regulating rods.
pub fn power_level(snapshot: &ActuatorSnapshot) -> u8 {
    let shim = snapshot.get(ChannelId::ShimRod);
    let regulating = snapshot.get(ChannelId::RegulatingRod);
    if shim < LEVEL_ONE_SHIM || regulating < LEVEL_ONE_REGULATING {
        0
    } else if shim >= LEVEL_TWO_SHIM && regulating >= LEVEL_TWO_REGULATING {
        2
    } else {
        1
    }
}

/// kW reported upstream becomes MW for the indicator node.
pub fn electrical_output_mw(thermal_kw: f32) -> f32 {
    thermal_kw / 1000.0
}

/// 8-bit brightness for the power indicator.
pub fn indicator_pwm(thermal_kw: f32) -> u8 {
    ((thermal_kw / 1000.0).clamp(0.0, 1.0) * 255.0).round() as u8
}
