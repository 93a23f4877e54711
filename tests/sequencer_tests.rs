use plantlink::config::SequencerConfig;
use plantlink::sequencer::{SequencerInput, TurbineSequencer};
use plantlink::{ChannelId, PlantState};

const DWELL: u64 = 5000;

fn sequencer() -> TurbineSequencer {
    TurbineSequencer::new(&SequencerConfig::default()).unwrap()
}

fn input(thermal_kw: f32, power_level: u8, now_ms: u64) -> SequencerInput {
    SequencerInput {
        thermal_kw,
        power_level,
        permitted: true,
        now_ms,
    }
}

/// Drives a fresh sequencer into Running; returns the time it got there.
fn run_up(seq: &mut TurbineSequencer) -> u64 {
    seq.update(input(400.0, 1, 0));
    for step in 1..=3 {
        seq.update(input(400.0, 1, step * DWELL));
    }
    assert_eq!(seq.state(), PlantState::Running);
    3 * DWELL
}

#[test]
fn thresholds_must_leave_a_hysteresis_band() {
    let config = SequencerConfig {
        start_threshold_kw: 150.0,
        stop_threshold_kw: 150.0,
        ..SequencerConfig::default()
    };
    assert!(TurbineSequencer::new(&config).is_err());
}

#[test]
fn startup_steps_follow_the_dwell() {
    let mut seq = sequencer();

    let out = seq.update(input(250.0, 1, 1000));
    assert_eq!(out.transition, Some((PlantState::Idle, PlantState::Starting)));
    assert_eq!(out.targets.as_slice(), &[(ChannelId::SteamGenerator, 50.0)]);
    assert_eq!(seq.step(), 1);

    // Nothing before the dwell has elapsed.
    let out = seq.update(input(250.0, 1, 1000 + DWELL - 1));
    assert!(out.targets.is_empty());

    let out = seq.update(input(250.0, 1, 1000 + DWELL));
    assert_eq!(out.targets.as_slice(), &[(ChannelId::Turbine, 40.0)]);
    assert_eq!(seq.step(), 2);

    let out = seq.update(input(250.0, 1, 1000 + 2 * DWELL));
    assert_eq!(out.targets.as_slice(), &[(ChannelId::CondenserPump, 60.0)]);

    let out = seq.update(input(250.0, 1, 1000 + 3 * DWELL));
    assert_eq!(out.transition, Some((PlantState::Starting, PlantState::Running)));
    assert_eq!(out.targets[0], (ChannelId::CoolingTowerFan, 60.0));
    assert_eq!(seq.state(), PlantState::Running);
}

#[test]
fn power_between_thresholds_never_changes_state() {
    let mut seq = sequencer();
    for i in 0..200u64 {
        let kw = if i % 2 == 0 { 100.0 } else { 200.0 };
        let out = seq.update(input(kw, 0, i * 50));
        assert!(out.transition.is_none());
    }
    assert_eq!(seq.state(), PlantState::Idle);

    let mut seq = sequencer();
    let start = run_up(&mut seq);
    let transitions = seq.transition_count();
    for i in 1..200u64 {
        let kw = if i % 2 == 0 { 100.0 } else { 200.0 };
        seq.update(input(kw, 1, start + i * 50));
    }
    assert_eq!(seq.state(), PlantState::Running);
    assert_eq!(seq.transition_count(), transitions);
}

#[test]
fn running_outputs_follow_power_level() {
    let mut seq = sequencer();
    let start = run_up(&mut seq);

    let out = seq.update(input(800.0, 2, start + 50));
    assert_eq!(out.targets.len(), 4);
    assert!(out.targets.iter().all(|&(_, pct)| pct == 100.0));

    // Same level again: no rewrite.
    assert!(seq.update(input(800.0, 2, start + 100)).targets.is_empty());

    let out = seq.update(input(400.0, 1, start + 150));
    assert!(out.targets.contains(&(ChannelId::SteamGenerator, 50.0)));
    assert!(out.targets.contains(&(ChannelId::Turbine, 40.0)));
}

#[test]
fn low_power_runs_the_shutdown_sequence_to_idle() {
    let mut seq = sequencer();
    let start = run_up(&mut seq);

    let t = start + 100;
    let out = seq.update(input(90.0, 0, t));
    assert_eq!(out.transition, Some((PlantState::Running, PlantState::ShuttingDown)));
    assert_eq!(out.targets.as_slice(), &[(ChannelId::SteamGenerator, 0.0)]);

    // Power coming back does not interrupt an ordered shutdown.
    let out = seq.update(input(600.0, 1, t + DWELL));
    assert_eq!(out.targets.as_slice(), &[(ChannelId::Turbine, 0.0)]);
    let out = seq.update(input(600.0, 1, t + 2 * DWELL));
    assert_eq!(out.targets.as_slice(), &[(ChannelId::CondenserPump, 0.0)]);
    let out = seq.update(input(600.0, 1, t + 3 * DWELL));
    assert_eq!(out.targets.as_slice(), &[(ChannelId::CoolingTowerFan, 0.0)]);
    assert_eq!(out.transition, Some((PlantState::ShuttingDown, PlantState::Idle)));
    assert_eq!(seq.step(), 0);
}

#[test]
fn losing_permission_while_starting_shuts_down_from_step_one() {
    let mut seq = sequencer();
    seq.update(input(400.0, 1, 0));
    seq.update(input(400.0, 1, DWELL));
    assert_eq!(seq.step(), 2);

    let out = seq.update(SequencerInput {
        permitted: false,
        ..input(400.0, 1, DWELL + 50)
    });
    assert_eq!(out.transition, Some((PlantState::Starting, PlantState::ShuttingDown)));
    assert_eq!(seq.step(), 1);
    assert_eq!(out.targets.as_slice(), &[(ChannelId::SteamGenerator, 0.0)]);
}

#[test]
fn forced_shutdown_only_applies_when_active() {
    let mut seq = sequencer();
    assert_eq!(seq.force_shutdown(0).transition, None);
    assert_eq!(seq.state(), PlantState::Idle);

    seq.update(input(400.0, 1, 0));
    let out = seq.force_shutdown(10);
    assert_eq!(out.transition, Some((PlantState::Starting, PlantState::ShuttingDown)));
    // Already shutting down: a second request does not restart the sequence.
    assert_eq!(seq.force_shutdown(20).transition, None);
    assert_eq!(seq.time_in_state(30), 20);
}

#[test]
fn idle_does_not_start_without_permission() {
    let mut seq = sequencer();
    let out = seq.update(SequencerInput {
        permitted: false,
        ..input(900.0, 2, 0)
    });
    assert!(out.transition.is_none());
    assert_eq!(seq.state(), PlantState::Idle);
}
