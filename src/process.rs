use serde::{Deserialize, Serialize};

/// Run state of a pump-like subsystem, as carried on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunStatus {
    #[default]
    Off,
    Starting,
    On,
    ShuttingDown,
}

impl RunStatus {
    pub fn code(self) -> u8 {
        match self {
            RunStatus::Off => 0,
            RunStatus::Starting => 1,
            RunStatus::On => 2,
            RunStatus::ShuttingDown => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(RunStatus::Off),
            1 => Some(RunStatus::Starting),
            2 => Some(RunStatus::On),
            3 => Some(RunStatus::ShuttingDown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample<T> {
    pub value: T,
    pub sampled_at_ms: u64,
}

impl<T: Copy> Sample<T> {
    /// The value, if it was sampled no more than `max_age_ms` ago.
    pub fn fresh(&self, now_ms: u64, max_age_ms: u64) -> Option<T> {
        (now_ms.saturating_sub(self.sampled_at_ms) <= max_age_ms).then_some(self.value)
    }
}

/// Live process variables reported by the other nodes. Owned by the control
/// loop and lent to the interlock checks each cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessState {
    pressure_bar: Option<Sample<f32>>,
    pumps: Option<Sample<[RunStatus; 3]>>,
    thermal_input_kw: Option<Sample<f32>>,
}

impl ProcessState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_pressure(&mut self, bar: f32, now_ms: u64) {
        self.pressure_bar = Some(Sample {
            value: bar,
            sampled_at_ms: now_ms,
        });
    }

    pub fn record_pumps(&mut self, pumps: [RunStatus; 3], now_ms: u64) {
        self.pumps = Some(Sample {
            value: pumps,
            sampled_at_ms: now_ms,
        });
    }

    pub fn record_thermal_input(&mut self, kw: f32, now_ms: u64) {
        self.thermal_input_kw = Some(Sample {
            value: kw,
            sampled_at_ms: now_ms,
        });
    }

    pub fn pressure(&self) -> Option<Sample<f32>> {
        self.pressure_bar
    }

    pub fn pumps(&self) -> Option<Sample<[RunStatus; 3]>> {
        self.pumps
    }

    pub fn thermal_input(&self) -> Option<Sample<f32>> {
        self.thermal_input_kw
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_goes_stale() {
        let mut process = ProcessState::new();
        process.record_pressure(55.0, 1_000);
        let sample = process.pressure().unwrap();
        assert_eq!(sample.fresh(3_000, 2_000), Some(55.0));
        assert_eq!(sample.fresh(3_001, 2_000), None);
    }

    #[test]
    fn codes_outside_table_are_rejected() {
        assert_eq!(RunStatus::from_code(2), Some(RunStatus::On));
        assert_eq!(RunStatus::from_code(4), None);
    }
}
