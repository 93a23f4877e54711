use plantlink::config::PumpConfig;
use plantlink::dispatcher::{CommandDispatcher, CommandTarget};
use plantlink::protocol::{ReplyKind, CMD_PUMP_CONTROL};
use plantlink::pumps::PumpBank;
use plantlink::{Command, Plant, PlantConfig, ProtocolError, PumpCommand, RunStatus};

const START_MS: u64 = 2000;
const STOP_MS: u64 = 1000;

fn bank() -> PumpBank {
    PumpBank::new(&PumpConfig::default())
}

fn plant() -> Plant {
    Plant::new(&PlantConfig::default()).unwrap()
}

fn switch(plant: &mut Plant, pump: u8, command: PumpCommand, now_ms: u64) -> (ReplyKind, Option<ProtocolError>) {
    let frame = Command::PumpControl { pump, command }.to_frame();
    let (reply, err) = CommandDispatcher::new().dispatch(&frame, plant, now_ms);
    (reply.kind, err)
}

#[test]
fn pump_starts_only_from_off_and_runs_after_start_time() {
    let mut pumps = bank();
    assert!(pumps.command(0, PumpCommand::On, 100));
    assert_eq!(pumps.status(0), Some(RunStatus::Starting));

    // Neither a second start nor a stop is legal while starting.
    assert!(!pumps.command(0, PumpCommand::On, 200));
    assert!(!pumps.command(0, PumpCommand::Off, 300));
    assert_eq!(pumps.status(0), Some(RunStatus::Starting));

    assert!(!pumps.update(100 + START_MS - 1));
    assert_eq!(pumps.status(0), Some(RunStatus::Starting));
    assert!(pumps.update(100 + START_MS));
    assert_eq!(pumps.status(0), Some(RunStatus::On));
    assert_eq!(pumps.status(1), Some(RunStatus::Off));
}

#[test]
fn pump_stops_only_from_on_and_is_off_after_stop_time() {
    let mut pumps = bank();
    assert!(!pumps.command(1, PumpCommand::Off, 0));

    pumps.command(1, PumpCommand::On, 0);
    pumps.update(START_MS);
    let t = START_MS + 500;
    assert!(pumps.command(1, PumpCommand::Off, t));
    assert_eq!(pumps.status(1), Some(RunStatus::ShuttingDown));
    assert!(!pumps.command(1, PumpCommand::On, t + 10));

    pumps.update(t + STOP_MS - 1);
    assert_eq!(pumps.status(1), Some(RunStatus::ShuttingDown));
    pumps.update(t + STOP_MS);
    assert_eq!(pumps.status(1), Some(RunStatus::Off));
}

#[test]
fn emergency_runs_every_pump_down() {
    let mut pumps = bank();
    pumps.command(0, PumpCommand::On, 0);
    pumps.command(2, PumpCommand::On, 0);
    pumps.update(START_MS);

    pumps.emergency_shutdown(3000);
    assert_eq!(pumps.statuses(), [RunStatus::ShuttingDown; 3]);
    pumps.update(3000 + STOP_MS);
    assert_eq!(pumps.statuses(), [RunStatus::Off; 3]);
}

#[test]
fn illegal_switch_is_nacked_without_change() {
    let mut plant = plant();
    assert_eq!(switch(&mut plant, 0, PumpCommand::On, 0), (ReplyKind::Ack, None));
    assert_eq!(
        switch(&mut plant, 0, PumpCommand::On, 50),
        (ReplyKind::Nack, Some(ProtocolError::IllegalTransition(CMD_PUMP_CONTROL)))
    );
    assert_eq!(plant.pumps().status(0), Some(RunStatus::Starting));

    let frame = plantlink::Frame::new(CMD_PUMP_CONTROL, &[3, 1]).unwrap();
    let (reply, err) = CommandDispatcher::new().dispatch(&frame, &mut plant, 60);
    assert_eq!(reply.kind, ReplyKind::Nack);
    assert_eq!(err, Some(ProtocolError::InvalidValue(CMD_PUMP_CONTROL)));
}

#[test]
fn locally_started_pumps_satisfy_the_rod_interlock() {
    let mut plant = plant();
    for pump in 0..3 {
        switch(&mut plant, pump, PumpCommand::On, 0);
    }
    plant.record_pressure(120.0, 0);
    let outcome = plant.control_cycle(0);
    assert!(!outcome.interlocks.rods_permitted);

    plant.record_pressure(120.0, START_MS);
    let outcome = plant.control_cycle(START_MS);
    assert_eq!(plant.pumps().statuses(), [RunStatus::On; 3]);
    assert!(outcome.interlocks.rods_permitted);

    // The node keeps its own pump sample fresh while it owns the pumps.
    plant.record_pressure(120.0, 3 * START_MS);
    assert!(plant.control_cycle(3 * START_MS).interlocks.rods_permitted);
}

#[test]
fn emergency_stop_shuts_pumps_down_and_blocks_starts() {
    let mut plant = plant();
    plant.record_pump_status([RunStatus::On; 3], 0);

    plant.emergency_stop(100);
    assert_eq!(plant.pumps().statuses(), [RunStatus::ShuttingDown; 3]);
    assert_eq!(
        plant.process().pumps().map(|s| s.value),
        Some([RunStatus::ShuttingDown; 3])
    );

    plant.control_cycle(100 + STOP_MS);
    assert_eq!(plant.pumps().statuses(), [RunStatus::Off; 3]);

    assert_eq!(
        switch(&mut plant, 1, PumpCommand::On, 1200),
        (ReplyKind::Nack, Some(ProtocolError::EmergencyLatched(CMD_PUMP_CONTROL)))
    );

    plant.reset_emergency(1300);
    assert_eq!(switch(&mut plant, 1, PumpCommand::On, 1400), (ReplyKind::Ack, None));
}

#[test]
fn pump_node_reports_override_the_local_model() {
    let mut plant = plant();
    switch(&mut plant, 0, PumpCommand::On, 0);
    plant.record_pump_status([RunStatus::Off; 3], 10);
    assert!(!plant.pumps().is_local());
    plant.control_cycle(START_MS);
    assert_eq!(plant.pumps().status(0), Some(RunStatus::Off));
}
