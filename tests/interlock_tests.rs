use plantlink::actuators::ActuatorSnapshot;
use plantlink::config::InterlockConfig;
use plantlink::dispatcher::CommandTarget;
use plantlink::interlock::{derive_thermal_power, power_level, InterlockEngine, InterlockGroup};
use plantlink::process::ProcessState;
use plantlink::{ChannelId, Plant, PlantConfig, RunStatus};

const ALL_ON: [RunStatus; 3] = [RunStatus::On; 3];

fn healthy(now_ms: u64) -> ProcessState {
    let mut process = ProcessState::new();
    process.record_pressure(120.0, now_ms);
    process.record_pumps(ALL_ON, now_ms);
    process
}

fn engine() -> InterlockEngine {
    InterlockEngine::new(InterlockConfig::default())
}

fn rods(safety: f32, shim: f32, regulating: f32) -> ActuatorSnapshot {
    let mut actual = [0.0; 7];
    actual[ChannelId::SafetyRod.index()] = safety;
    actual[ChannelId::ShimRod.index()] = shim;
    actual[ChannelId::RegulatingRod.index()] = regulating;
    ActuatorSnapshot { actual }
}

#[test]
fn healthy_process_permits_both_groups() {
    let status = engine().evaluate(&healthy(0), 100, false);
    assert!(status.rods_permitted);
    assert!(status.turbine_permitted);
    assert_eq!(status.rods_blocked_by, None);
}

#[test]
fn missing_data_fails_closed() {
    let status = engine().evaluate(&ProcessState::new(), 0, false);
    assert!(!status.rods_permitted);
    assert!(!status.turbine_permitted);
    assert_eq!(status.rods_blocked_by, Some("pressure_in_window"));
    assert_eq!(status.turbine_blocked_by, Some("tertiary_pump_on"));
}

#[test]
fn stale_samples_fail_closed() {
    let engine = engine();
    let process = healthy(0);
    assert!(engine.is_permitted(InterlockGroup::ControlRods, &process, 2000, false));
    assert!(!engine.is_permitted(InterlockGroup::ControlRods, &process, 2001, false));
    assert!(!engine.is_permitted(InterlockGroup::TurbineTrain, &process, 2001, false));
}

#[test]
fn pressure_window_is_inclusive() {
    let engine = engine();
    for (bar, permitted) in [(39.9, false), (40.0, true), (200.0, true), (200.1, false)] {
        let mut process = healthy(0);
        process.record_pressure(bar, 0);
        assert_eq!(
            engine.is_permitted(InterlockGroup::ControlRods, &process, 0, false),
            permitted,
            "pressure {}",
            bar
        );
    }
}

#[test]
fn starting_pump_does_not_count_as_on() {
    let mut process = healthy(0);
    process.record_pumps([RunStatus::On, RunStatus::Starting, RunStatus::On], 0);
    let status = engine().evaluate(&process, 0, false);
    assert_eq!(status.rods_blocked_by, Some("secondary_pump_on"));
    assert!(status.turbine_permitted);
}

#[test]
fn emergency_latch_blocks_everything() {
    let status = engine().evaluate(&healthy(0), 0, true);
    assert_eq!(status.rods_blocked_by, Some("emergency_clear"));
    assert_eq!(status.turbine_blocked_by, Some("emergency_clear"));
}

#[test]
fn thermal_power_is_a_clamped_weighted_sum() {
    assert_eq!(derive_thermal_power(&rods(0.0, 0.0, 0.0)), 0.0);
    assert_eq!(derive_thermal_power(&rods(50.0, 50.0, 50.0)), 400.0);
    assert_eq!(derive_thermal_power(&rods(100.0, 100.0, 100.0)), 1000.0);
    assert_eq!(derive_thermal_power(&rods(20.0, 10.0, 10.0)), 0.0);
}

#[test]
fn power_level_boundaries() {
    assert_eq!(power_level(&rods(0.0, 20.9, 50.0)), 0);
    assert_eq!(power_level(&rods(0.0, 21.0, 16.0)), 1);
    assert_eq!(power_level(&rods(0.0, 41.0, 30.9)), 1);
    assert_eq!(power_level(&rods(0.0, 41.0, 31.0)), 2);
    assert_eq!(power_level(&rods(0.0, 90.0, 15.0)), 0);
}

#[test]
fn forced_safe_wins_over_a_command_in_the_same_cycle() {
    let mut plant = Plant::new(&PlantConfig::default()).unwrap();
    // No process data at all: rods are interlocked.
    plant.set_actuator_target(ChannelId::ShimRod, 80.0);
    let outcome = plant.control_cycle(0);
    assert!(outcome.actions.force_safe_rods);
    assert_eq!(plant.actuator_target(ChannelId::ShimRod), 0.0);
    assert_eq!(plant.actuator_actual(ChannelId::ShimRod), 0.0);
}

#[test]
fn rods_move_once_the_interlock_is_satisfied() {
    let mut plant = Plant::new(&PlantConfig::default()).unwrap();
    plant.record_pressure(120.0, 0);
    plant.record_pump_status(ALL_ON, 0);
    plant.set_actuator_target(ChannelId::ShimRod, 80.0);
    plant.control_cycle(0);
    assert_eq!(plant.actuator_actual(ChannelId::ShimRod), 2.0);

    // Reports stop arriving; the next cycle past the stale age pulls rods back.
    plant.control_cycle(50);
    assert_eq!(plant.actuator_actual(ChannelId::ShimRod), 4.0);
    let outcome = plant.control_cycle(2100);
    assert!(!outcome.interlocks.rods_permitted);
    assert_eq!(plant.actuator_target(ChannelId::ShimRod), 0.0);
    assert_eq!(plant.actuator_actual(ChannelId::ShimRod), 0.0);
}
