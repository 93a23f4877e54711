//! Humidifier outputs derived from rod positions and thermal power.
//!
//! Both outputs switch with hysteresis: the level that turns one on is
//! higher than the level that turns it off, and inside the band the last
//! state holds.

use crate::actuators::{ActuatorSnapshot, ChannelId};
use crate::config::HumidifierConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HumidifierState {
    pub steam_generator: bool,
    pub cooling_tower: bool,
}

#[derive(Debug, Clone)]
pub struct HumidifierController {
    config: HumidifierConfig,
    state: HumidifierState,
}

impl HumidifierController {
    pub fn new(config: HumidifierConfig) -> Self {
        Self {
            config,
            state: HumidifierState::default(),
        }
    }

    pub fn state(&self) -> HumidifierState {
        self.state
    }

    /// Re-evaluates both outputs. Called once per control cycle after the
    /// derived quantities are recomputed.
    pub fn update(&mut self, snapshot: &ActuatorSnapshot, thermal_kw: f32) -> HumidifierState {
        let shim = snapshot.get(ChannelId::ShimRod);
        let regulating = snapshot.get(ChannelId::RegulatingRod);

        let rod_level = if self.state.steam_generator {
            self.config.steam_generator_rod_percent - self.config.steam_generator_hysteresis
        } else {
            self.config.steam_generator_rod_percent
        };
        let steam_generator = shim >= rod_level && regulating >= rod_level;
        if steam_generator != self.state.steam_generator {
            info!(on = steam_generator, shim, regulating, "steam generator humidifier");
        }

        let kw_level = if self.state.cooling_tower {
            self.config.cooling_tower_kw - self.config.cooling_tower_hysteresis
        } else {
            self.config.cooling_tower_kw
        };
        let cooling_tower = thermal_kw >= kw_level;
        if cooling_tower != self.state.cooling_tower {
            info!(on = cooling_tower, thermal_kw, "cooling tower humidifier");
        }

        self.state = HumidifierState {
            steam_generator,
            cooling_tower,
        };
        self.state
    }
}
