use crate::actuators::{ChannelId, CHANNEL_COUNT};
use crate::diagnostics::LinkStats;
use crate::humidifier::HumidifierState;
use crate::interlock::{electrical_output_mw, indicator_pwm, power_fraction};
use crate::plant::Plant;
use crate::process::RunStatus;
use crate::safety::SafetyLevel;
use crate::sequencer::PlantState;
use core::fmt::Write;
use heapless::{Deque, String};
use serde::{Deserialize, Serialize};

const TELEMETRY_HISTORY: usize = 8;
const MAX_SEQUENCE_NUMBER: u32 = 65535;
pub const MAX_TEXT_LINE: usize = 96;

pub type TextLine = String<MAX_TEXT_LINE>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelReading {
    pub channel: ChannelId,
    pub target: f32,
    pub actual: f32,
    pub status: RunStatus,
}

/// Derived, read-only view of one control cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub timestamp_ms: u64,
    pub sequence_number: u32,
    pub thermal_kw: f32,
    pub power_fraction: f32,
    pub power_level: u8,
    pub electrical_mw: f32,
    pub indicator_pwm: u8,
    pub plant_state: PlantState,
    pub sequence_step: u8,
    pub turbine_status: RunStatus,
    pub channels: [ChannelReading; CHANNEL_COUNT],
    pub pumps: [RunStatus; 3],
    pub pressure_bar: Option<f32>,
    pub humidifiers: HumidifierState,
    pub rods_permitted: bool,
    pub turbine_permitted: bool,
    pub emergency_latched: bool,
    pub safety_level: SafetyLevel,
    pub link: LinkStats,
}

impl TelemetrySnapshot {
    pub fn capture(plant: &Plant, link: LinkStats, now_ms: u64, sequence_number: u32) -> Self {
        let thermal_kw = plant.thermal_kw();
        let bank = plant.actuators();
        let channels = ChannelId::ALL.map(|channel| {
            let c = bank.channel(channel);
            ChannelReading {
                channel,
                target: c.target(),
                actual: c.actual(),
                status: c.status(),
            }
        });
        let interlocks = plant.interlocks();
        let safety = plant.safety().get_state();

        Self {
            timestamp_ms: now_ms,
            sequence_number,
            thermal_kw,
            power_fraction: power_fraction(thermal_kw),
            power_level: plant.power_level(),
            electrical_mw: electrical_output_mw(thermal_kw),
            indicator_pwm: indicator_pwm(thermal_kw),
            plant_state: plant.plant_state(),
            sequence_step: plant.sequencer().step(),
            turbine_status: plant.turbine_status(),
            channels,
            pumps: plant.pumps().statuses(),
            pressure_bar: plant.process().pressure().map(|s| s.value),
            humidifiers: plant.humidifiers(),
            rods_permitted: interlocks.rods_permitted,
            turbine_permitted: interlocks.turbine_permitted,
            emergency_latched: safety.emergency_latched,
            safety_level: safety.safety_level,
            link,
        }
    }

    pub fn actual(&self, channel: ChannelId) -> f32 {
        self.channels[channel.index()].actual
    }

    pub fn to_json(&self) -> Result<std::string::String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Downstream record for indicator nodes on the text link.
    pub fn to_text_line(&self) -> TextLine {
        let mut line = TextLine::new();
        let _ = writeln!(
            line,
            "<pwr:{};kw:{:.1};state:{};turbine:{};pump1:{};pump2:{};pump3:{}>",
            self.power_level,
            self.thermal_kw,
            self.plant_state.code(),
            self.turbine_status.code(),
            self.pumps[0].code(),
            self.pumps[1].code(),
            self.pumps[2].code()
        );
        line
    }
}

/// Recomputes the snapshot every cycle and marks it for publication at the
/// slower telemetry rate.
#[derive(Debug)]
pub struct TelemetryCollector {
    period_ms: u64,
    last_publish_ms: Option<u64>,
    sequence_number: u32,
    latest: Option<TelemetrySnapshot>,
    published: Deque<TelemetrySnapshot, TELEMETRY_HISTORY>,
}

impl TelemetryCollector {
    pub fn new(period_ms: u64) -> Self {
        Self {
            period_ms,
            last_publish_ms: None,
            sequence_number: 0,
            latest: None,
            published: Deque::new(),
        }
    }

    pub fn due(&self, now_ms: u64) -> bool {
        self.last_publish_ms
            .map_or(true, |last| now_ms.saturating_sub(last) >= self.period_ms)
    }

    /// Recomputes the snapshot. The flag is set when it is time to publish.
    pub fn refresh(&mut self, plant: &Plant, link: LinkStats, now_ms: u64) -> (TelemetrySnapshot, bool) {
        let publish = self.due(now_ms);
        if publish {
            self.sequence_number = (self.sequence_number + 1) % (MAX_SEQUENCE_NUMBER + 1);
            self.last_publish_ms = Some(now_ms);
        }
        let snapshot = TelemetrySnapshot::capture(plant, link, now_ms, self.sequence_number);

        if publish {
            if self.published.is_full() {
                self.published.pop_front();
            }
            let _ = self.published.push_back(snapshot.clone());
        }
        self.latest = Some(snapshot.clone());
        (snapshot, publish)
    }

    pub fn latest(&self) -> Option<&TelemetrySnapshot> {
        self.latest.as_ref()
    }

    pub fn published(&self) -> impl Iterator<Item = &TelemetrySnapshot> {
        self.published.iter()
    }

    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }
}
