use crate::config::{RampConfig, RampRate};
use crate::process::RunStatus;
use serde::{Deserialize, Serialize};

pub const CHANNEL_COUNT: usize = 7;
pub const MIN_PERCENT: f32 = 0.0;
pub const MAX_PERCENT: f32 = 100.0;
/// Fully withdrawn rods, stopped pumps and turbine.
pub const SAFE_PERCENT: f32 = MIN_PERCENT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelId {
    SafetyRod,
    ShimRod,
    RegulatingRod,
    SteamGenerator,
    Turbine,
    CondenserPump,
    CoolingTowerFan,
}

impl ChannelId {
    pub const ALL: [ChannelId; CHANNEL_COUNT] = [
        ChannelId::SafetyRod,
        ChannelId::ShimRod,
        ChannelId::RegulatingRod,
        ChannelId::SteamGenerator,
        ChannelId::Turbine,
        ChannelId::CondenserPump,
        ChannelId::CoolingTowerFan,
    ];

    pub const RODS: [ChannelId; 3] = [
        ChannelId::SafetyRod,
        ChannelId::ShimRod,
        ChannelId::RegulatingRod,
    ];

    pub const TURBINE_TRAIN: [ChannelId; 4] = [
        ChannelId::SteamGenerator,
        ChannelId::Turbine,
        ChannelId::CondenserPump,
        ChannelId::CoolingTowerFan,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn is_rod(self) -> bool {
        Self::RODS.contains(&self)
    }

    /// Short field name used on the text link.
    pub fn key(self) -> &'static str {
        match self {
            ChannelId::SafetyRod => "rod1",
            ChannelId::ShimRod => "rod2",
            ChannelId::RegulatingRod => "rod3",
            ChannelId::SteamGenerator => "steam",
            ChannelId::Turbine => "turbine",
            ChannelId::CondenserPump => "condenser",
            ChannelId::CoolingTowerFan => "cooling",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "rod1" | "safety" => Some(ChannelId::SafetyRod),
            "rod2" | "shim" => Some(ChannelId::ShimRod),
            "rod3" | "regulating" => Some(ChannelId::RegulatingRod),
            "steam" => Some(ChannelId::SteamGenerator),
            "turbine" => Some(ChannelId::Turbine),
            "condenser" => Some(ChannelId::CondenserPump),
            "cooling" => Some(ChannelId::CoolingTowerFan),
            _ => name.parse::<u8>().ok().and_then(Self::from_index),
        }
    }
}

fn clamp_percent(value: f32) -> f32 {
    // NaN collapses to the safe value rather than poisoning the ramp.
    if value.is_nan() {
        SAFE_PERCENT
    } else {
        value.clamp(MIN_PERCENT, MAX_PERCENT)
    }
}

/// One rate-limited actuator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActuatorChannel {
    target: f32,
    actual: f32,
    ramp: RampRate,
}

impl ActuatorChannel {
    pub fn new(ramp: RampRate) -> Self {
        debug_assert!(ramp.up > 0.0 && ramp.down > 0.0);
        Self {
            target: SAFE_PERCENT,
            actual: SAFE_PERCENT,
            ramp,
        }
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn actual(&self) -> f32 {
        self.actual
    }

    pub fn ramp(&self) -> RampRate {
        self.ramp
    }

    /// Out-of-range requests are clamped, never refused.
    pub fn set_target(&mut self, percent: f32) {
        self.target = clamp_percent(percent);
    }

    /// Sets the actual position directly, bypassing the ramp. Used for the
    /// emergency snap and for seeding test fixtures.
    pub fn snap_to(&mut self, percent: f32) {
        let value = clamp_percent(percent);
        self.target = value;
        self.actual = value;
    }

    /// Moves `actual` one step toward `target`. Returns whether it moved.
    pub fn advance(&mut self) -> bool {
        let before = self.actual;
        if self.actual < self.target {
            self.actual = (self.actual + self.ramp.up).min(self.target);
        } else if self.actual > self.target {
            self.actual = (self.actual - self.ramp.down).max(self.target);
        }
        debug_assert!((MIN_PERCENT..=MAX_PERCENT).contains(&self.actual));
        self.actual != before
    }

    pub fn at_target(&self) -> bool {
        self.actual == self.target
    }

    /// Cycles `advance` needs from the current position.
    pub fn cycles_to_target(&self) -> u32 {
        let delta = self.target - self.actual;
        let rate = if delta >= 0.0 { self.ramp.up } else { self.ramp.down };
        (delta.abs() / rate).ceil() as u32
    }

    pub fn status(&self) -> RunStatus {
        match (self.actual > MIN_PERCENT, self.at_target()) {
            (false, true) => RunStatus::Off,
            (_, true) => RunStatus::On,
            (_, false) if self.target > self.actual => RunStatus::Starting,
            _ => RunStatus::ShuttingDown,
        }
    }
}

/// Actual positions of every channel, copied once per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActuatorSnapshot {
    pub actual: [f32; CHANNEL_COUNT],
}

impl ActuatorSnapshot {
    pub fn get(&self, channel: ChannelId) -> f32 {
        self.actual[channel.index()]
    }

    pub fn rounded(&self) -> [u8; CHANNEL_COUNT] {
        self.actual.map(|v| v.round() as u8)
    }
}

#[derive(Debug, Clone)]
pub struct ActuatorBank {
    channels: [ActuatorChannel; CHANNEL_COUNT],
}

impl ActuatorBank {
    pub fn new(ramps: &RampConfig) -> Self {
        let channels = ChannelId::ALL.map(|id| {
            let ramp = match id {
                ChannelId::SafetyRod | ChannelId::ShimRod | ChannelId::RegulatingRod => {
                    ramps.control_rods
                }
                ChannelId::SteamGenerator => ramps.steam_generator,
                ChannelId::Turbine => ramps.turbine,
                ChannelId::CondenserPump => ramps.condenser_pump,
                ChannelId::CoolingTowerFan => ramps.cooling_tower_fan,
            };
            ActuatorChannel::new(ramp)
        });
        Self { channels }
    }

    pub fn channel(&self, id: ChannelId) -> &ActuatorChannel {
        &self.channels[id.index()]
    }

    pub fn channel_mut(&mut self, id: ChannelId) -> &mut ActuatorChannel {
        &mut self.channels[id.index()]
    }

    pub fn set_target(&mut self, id: ChannelId, percent: f32) {
        self.channel_mut(id).set_target(percent);
    }

    pub fn force_safe(&mut self, ids: &[ChannelId]) {
        for &id in ids {
            self.channel_mut(id).set_target(SAFE_PERCENT);
        }
    }

    /// Every channel to the safe value in one step, ramp limits ignored.
    pub fn emergency_snap(&mut self) {
        for channel in &mut self.channels {
            channel.snap_to(SAFE_PERCENT);
        }
    }

    /// Called exactly once per control cycle.
    pub fn advance(&mut self) -> usize {
        self.channels
            .iter_mut()
            .map(ActuatorChannel::advance)
            .filter(|moved| *moved)
            .count()
    }

    pub fn snapshot(&self) -> ActuatorSnapshot {
        ActuatorSnapshot {
            actual: self.channels.map(|c| c.actual()),
        }
    }

    pub fn targets(&self) -> [f32; CHANNEL_COUNT] {
        self.channels.map(|c| c.target())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_target_collapses_to_safe() {
        let mut channel = ActuatorChannel::new(RampRate::new(2.0, 5.0));
        channel.set_target(60.0);
        channel.set_target(f32::NAN);
        assert_eq!(channel.target(), SAFE_PERCENT);
    }

    #[test]
    fn status_tracks_direction() {
        let mut channel = ActuatorChannel::new(RampRate::new(10.0, 5.0));
        assert_eq!(channel.status(), RunStatus::Off);
        channel.set_target(50.0);
        channel.advance();
        assert_eq!(channel.status(), RunStatus::Starting);
        for _ in 0..10 {
            channel.advance();
        }
        assert_eq!(channel.status(), RunStatus::On);
        channel.set_target(0.0);
        channel.advance();
        assert_eq!(channel.status(), RunStatus::ShuttingDown);
    }

    #[test]
    fn channel_parse_accepts_names_and_indices() {
        assert_eq!(ChannelId::parse("shim"), Some(ChannelId::ShimRod));
        assert_eq!(ChannelId::parse("4"), Some(ChannelId::Turbine));
        assert_eq!(ChannelId::parse("7"), None);
    }
}
