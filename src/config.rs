use crate::error::ConfigError;
use crate::link::MAX_BYTES_PER_POLL;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Per-channel ramp limits in percent per control cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RampRate {
    pub up: f32,
    pub down: f32,
}

impl RampRate {
    pub const fn new(up: f32, down: f32) -> Self {
        Self { up, down }
    }

    fn is_valid(&self) -> bool {
        self.up.is_finite() && self.down.is_finite() && self.up > 0.0 && self.down > 0.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RampConfig {
    pub control_rods: RampRate,
    pub steam_generator: RampRate,
    // Decreasing slower than increasing models rotor inertia.
    pub turbine: RampRate,
    pub condenser_pump: RampRate,
    pub cooling_tower_fan: RampRate,
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            control_rods: RampRate::new(2.0, 5.0),
            steam_generator: RampRate::new(10.0, 5.0),
            turbine: RampRate::new(5.0, 2.0),
            condenser_pump: RampRate::new(10.0, 5.0),
            cooling_tower_fan: RampRate::new(10.0, 5.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterlockConfig {
    pub min_pressure_bar: f32,
    pub max_pressure_bar: f32,
    pub stale_after_ms: u64,
    pub pressure_warning_bar: f32,
    pub pressure_critical_bar: f32,
}

impl Default for InterlockConfig {
    fn default() -> Self {
        Self {
            min_pressure_bar: 40.0,
            max_pressure_bar: 200.0,
            stale_after_ms: 2000,
            pressure_warning_bar: 160.0,
            pressure_critical_bar: 180.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    pub start_threshold_kw: f32,
    pub stop_threshold_kw: f32,
    pub dwell_ms: u64,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            start_threshold_kw: 200.0,
            stop_threshold_kw: 100.0,
            dwell_ms: 5000,
        }
    }
}

/// Spin-up and run-down times of the timed pump model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpConfig {
    pub start_ms: u64,
    pub stop_ms: u64,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            start_ms: 2000,
            stop_ms: 1000,
        }
    }
}

/// Switching thresholds of the two humidifiers. Each switches off
/// `*_hysteresis` below the level that switched it on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HumidifierConfig {
    pub steam_generator_rod_percent: f32,
    pub steam_generator_hysteresis: f32,
    pub cooling_tower_kw: f32,
    pub cooling_tower_hysteresis: f32,
}

impl Default for HumidifierConfig {
    fn default() -> Self {
        Self {
            steam_generator_rod_percent: 40.0,
            steam_generator_hysteresis: 5.0,
            cooling_tower_kw: 800.0,
            cooling_tower_hysteresis: 100.0,
        }
    }
}

/// Node configuration. Every field has a default, so a config file only
/// needs to name the values it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlantConfig {
    pub control_period_ms: u64,
    pub telemetry_period_ms: u64,
    pub max_bytes_per_poll: usize,
    pub ramps: RampConfig,
    pub interlock: InterlockConfig,
    pub sequencer: SequencerConfig,
    pub pumps: PumpConfig,
    pub humidifiers: HumidifierConfig,
}

impl Default for PlantConfig {
    fn default() -> Self {
        Self {
            control_period_ms: 50,
            telemetry_period_ms: 500,
            max_bytes_per_poll: MAX_BYTES_PER_POLL,
            ramps: RampConfig::default(),
            interlock: InterlockConfig::default(),
            sequencer: SequencerConfig::default(),
            pumps: PumpConfig::default(),
            humidifiers: HumidifierConfig::default(),
        }
    }
}

impl PlantConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: PlantConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.control_period_ms == 0 || self.telemetry_period_ms == 0 {
            return Err(ConfigError::Invalid("periods must be non-zero"));
        }
        if self.max_bytes_per_poll == 0 || self.max_bytes_per_poll > MAX_BYTES_PER_POLL {
            return Err(ConfigError::Invalid("max_bytes_per_poll out of range"));
        }
        let ramps = &self.ramps;
        let all_valid = [
            ramps.control_rods,
            ramps.steam_generator,
            ramps.turbine,
            ramps.condenser_pump,
            ramps.cooling_tower_fan,
        ]
        .iter()
        .all(RampRate::is_valid);
        if !all_valid {
            return Err(ConfigError::Invalid("ramp rates must be positive"));
        }
        let seq = &self.sequencer;
        if !(seq.stop_threshold_kw < seq.start_threshold_kw) {
            return Err(ConfigError::Invalid(
                "stop threshold must be strictly below start threshold",
            ));
        }
        let il = &self.interlock;
        if !(il.min_pressure_bar < il.max_pressure_bar) {
            return Err(ConfigError::Invalid("pressure window is empty"));
        }
        if self.pumps.start_ms == 0 || self.pumps.stop_ms == 0 {
            return Err(ConfigError::Invalid("pump start and stop times must be non-zero"));
        }
        let hum = &self.humidifiers;
        let bands = [hum.steam_generator_hysteresis, hum.cooling_tower_hysteresis];
        if !bands.iter().all(|h| h.is_finite() && *h > 0.0) {
            return Err(ConfigError::Invalid("humidifier hysteresis must be positive"));
        }
        Ok(())
    }
}
