use plantlink::config::InterlockConfig;
use plantlink::dispatcher::CommandTarget;
use plantlink::indicator::{requested_alarm, AlarmBuzzer, AlarmKind, IndicatorDriver, IndicatorView, LogIndicator};
use plantlink::telemetry::TelemetryCollector;
use plantlink::diagnostics::LinkStats;
use plantlink::{ChannelId, Plant, PlantConfig, PlantState, RunStatus, TelemetrySnapshot};

fn plant() -> Plant {
    Plant::new(&PlantConfig::default()).unwrap()
}

fn snapshot_of(plant: &Plant) -> TelemetrySnapshot {
    TelemetrySnapshot::capture(plant, LinkStats::default(), 0, 1)
}

#[test]
fn test_snapshot_derives_outputs_from_thermal_power() {
    let mut plant = plant();
    for rod in [ChannelId::SafetyRod, ChannelId::ShimRod, ChannelId::RegulatingRod] {
        plant.actuators_mut().channel_mut(rod).snap_to(50.0);
    }
    plant.record_pressure(120.0, 0);
    plant.record_pump_status([RunStatus::On; 3], 0);
    plant.control_cycle(0);

    let snapshot = snapshot_of(&plant);
    assert_eq!(snapshot.thermal_kw, 400.0);
    assert_eq!(snapshot.power_level, 2);
    assert_eq!(snapshot.indicator_pwm, 102);
    assert!((snapshot.electrical_mw - 0.4).abs() < 1e-6);
    assert_eq!(snapshot.pressure_bar, Some(120.0));
    assert!(snapshot.rods_permitted);
    assert_eq!(snapshot.actual(ChannelId::ShimRod), 50.0);
}

#[test]
fn test_text_line_for_indicator_nodes() {
    let mut plant = plant();
    plant.record_pump_status([RunStatus::On, RunStatus::Starting, RunStatus::Off], 0);
    plant.control_cycle(0);

    let line = snapshot_of(&plant).to_text_line();
    assert_eq!(line.as_str(), "<pwr:0;kw:0.0;state:0;turbine:0;pump1:2;pump2:1;pump3:0>\n");
}

#[test]
fn test_snapshot_json_round_trip() {
    let plant = plant();
    let snapshot = snapshot_of(&plant);
    let json = snapshot.to_json().unwrap();
    let back: TelemetrySnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(back, snapshot);
}

#[test]
fn test_collector_sequence_and_history() {
    let plant = plant();
    let mut collector = TelemetryCollector::new(500);

    let (first, publish) = collector.refresh(&plant, LinkStats::default(), 0);
    assert!(publish);
    assert_eq!(first.sequence_number, 1);

    let (_, publish) = collector.refresh(&plant, LinkStats::default(), 250);
    assert!(!publish);
    assert_eq!(collector.latest().map(|s| s.timestamp_ms), Some(250));

    for t in 1..=20u64 {
        collector.refresh(&plant, LinkStats::default(), t * 500);
    }
    assert_eq!(collector.sequence_number(), 21);
    assert_eq!(collector.published().count(), 8);
    assert_eq!(collector.published().last().map(|s| s.sequence_number), Some(21));
}

#[test]
fn test_alarm_selection_by_priority() {
    let limits = InterlockConfig::default();
    let mut plant = plant();
    plant.actuators_mut().channel_mut(ChannelId::ShimRod).snap_to(80.0);
    plant.actuators_mut().channel_mut(ChannelId::RegulatingRod).snap_to(60.0);
    plant.record_pressure(120.0, 0);
    plant.record_pump_status([RunStatus::On; 3], 0);
    plant.control_cycle(0);
    assert_eq!(requested_alarm(&snapshot_of(&plant), &limits), AlarmKind::HighPower);

    plant.record_pressure(170.0, 0);
    assert_eq!(requested_alarm(&snapshot_of(&plant), &limits), AlarmKind::PressureWarning);

    plant.record_pressure(190.0, 0);
    assert_eq!(requested_alarm(&snapshot_of(&plant), &limits), AlarmKind::PressureCritical);
}

#[test]
fn test_critical_pressure_pattern_timing() {
    let mut buzzer = AlarmBuzzer::new();
    let expected = [(0, true), (200, false), (400, true), (600, false), (1200, true)];
    for (t, on) in expected {
        assert_eq!(buzzer.update(t, AlarmKind::PressureCritical, false), on, "at {} ms", t);
    }
}

#[test]
fn test_indicator_view_and_driver() {
    let mut plant = plant();
    plant.record_pump_status([RunStatus::On, RunStatus::Starting, RunStatus::ShuttingDown], 0);
    plant.control_cycle(0);
    let snapshot = snapshot_of(&plant);

    let buzzer = AlarmBuzzer::new();
    let view = IndicatorView::from_snapshot(&snapshot, &buzzer);
    assert_eq!(view.pump_animation_ms, [Some(200), Some(500), Some(600)]);
    assert_eq!(view.turbine_animation_ms, None);
    assert_eq!(view.plant_state, PlantState::Idle);
    assert!(!view.buzzer_on);

    let mut driver = LogIndicator::new();
    driver.render(&view);
    driver.render(&view);
    assert_eq!(driver.renders(), 1);
}
