//! End-to-end: bytes in through the supervisor, replies and plant state out.

use plantlink::indicator::AlarmKind;
use plantlink::link::{ChannelSource, chunks};
use plantlink::protocol::{binary, StateReport, CMD_ACK, CMD_NACK};
use plantlink::{
    ChannelId, Command, FeedResult, Frame, FrameCodec, LinkCodec, PlantConfig, PlantState,
    PlantSupervisor, RunStatus,
};

const PERIOD: u64 = 50;

fn replies(outbound: &[u8]) -> Vec<Frame> {
    let mut codec = FrameCodec::new();
    outbound
        .iter()
        .filter_map(|&b| match codec.feed(b, 0) {
            FeedResult::Complete(frame) => Some(frame),
            _ => None,
        })
        .collect()
}

fn send(node: &mut PlantSupervisor, command: Command, now_ms: u64) -> Vec<Frame> {
    node.receive(&binary::encode(&command.to_frame()), now_ms);
    replies(&node.take_outbound())
}

/// Process reports a healthy plant would send every cycle.
fn report_healthy(node: &mut PlantSupervisor, now_ms: u64) {
    send(node, Command::SetPressure { bar: 120.0 }, now_ms);
    send(
        node,
        Command::PumpStatus {
            pumps: [RunStatus::On; 3],
        },
        now_ms,
    );
}

fn run_until(node: &mut PlantSupervisor, from_ms: u64, until_ms: u64) -> u64 {
    let mut now = from_ms;
    while now <= until_ms {
        report_healthy(node, now);
        node.run_cycle(now);
        now += PERIOD;
    }
    now
}

fn state_report(node: &mut PlantSupervisor, now_ms: u64) -> StateReport {
    let frames = send(node, Command::ReadState, now_ms);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].command, CMD_ACK);
    StateReport::decode(frames[0].payload()).unwrap()
}

#[test]
fn corrupted_frame_then_valid_frame_gives_one_nack_and_one_ack() {
    let mut node = PlantSupervisor::binary(PlantConfig::default()).unwrap();

    let mut bytes = binary::encode(&Frame::empty(0x50)).to_vec();
    let crc = bytes.len() - 2;
    bytes[crc] ^= 0x5A;
    bytes.extend_from_slice(&binary::encode(&Frame::empty(0x50)));

    assert_eq!(node.receive(&bytes, 0), 2);
    let frames = replies(&node.take_outbound());
    let codes: Vec<u8> = frames.iter().map(|f| f.command).collect();
    assert_eq!(codes, vec![CMD_NACK, CMD_ACK]);
    assert!(frames.iter().all(|f| f.payload().is_empty()));

    let stats = node.diagnostics().stats();
    assert_eq!(stats.checksum_errors, 1);
    assert_eq!(stats.frames_accepted, 1);
    assert_eq!(stats.nacks_sent, 1);
    assert_eq!(stats.acks_sent, 1);
}

#[test]
fn framing_errors_resynchronize_silently() {
    let mut node = PlantSupervisor::binary(PlantConfig::default()).unwrap();
    let mut bytes = binary::encode(&Frame::empty(0x50)).to_vec();
    let end = bytes.len() - 1;
    bytes[end] = 0x00;

    assert_eq!(node.receive(&bytes, 0), 0);
    assert!(node.take_outbound().is_empty());
    assert_eq!(node.diagnostics().stats().framing_errors, 1);

    let frames = send(&mut node, Command::Ping, 1);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].command, CMD_ACK);
}

#[test]
fn polling_through_the_channel_handoff_is_bounded() {
    let mut node = PlantSupervisor::binary(PlantConfig::default()).unwrap();
    let (tx, mut source) = ChannelSource::channel(8);

    let mut stream = Vec::new();
    for _ in 0..6 {
        stream.extend_from_slice(&binary::encode(&Command::Ping.to_frame()));
    }
    for chunk in chunks(&stream) {
        tx.try_send(chunk).unwrap();
    }

    // Six 5-byte pings, 32 bytes per poll: six replies over two polls.
    assert_eq!(node.poll_link(&mut source, 0).unwrap(), 6);
    assert_eq!(node.poll_link(&mut source, 1).unwrap(), 0);
    assert_eq!(replies(&node.take_outbound()).len(), 6);

    let mut stream = Vec::new();
    for _ in 0..8 {
        stream.extend_from_slice(&binary::encode(&Command::Ping.to_frame()));
    }
    for chunk in chunks(&stream) {
        tx.try_send(chunk).unwrap();
    }
    assert_eq!(node.poll_link(&mut source, 2).unwrap(), 6);
    assert_eq!(node.poll_link(&mut source, 3).unwrap(), 2);
}

#[test]
fn control_cycle_runs_at_the_configured_period() {
    let mut node = PlantSupervisor::binary(PlantConfig::default()).unwrap();
    assert!(node.run_cycle(0).is_some());
    assert!(node.run_cycle(PERIOD - 1).is_none());
    assert!(node.run_cycle(PERIOD).is_some());
    assert_eq!(node.plant().cycle_count(), 2);
}

#[test]
fn plant_starts_and_reaches_full_output() {
    let mut node = PlantSupervisor::binary(PlantConfig::default()).unwrap();
    report_healthy(&mut node, 0);
    for rod in [0u8, 1, 2] {
        let frames = send(
            &mut node,
            Command::SetTarget {
                channel: ChannelId::from_index(rod).unwrap(),
                percent: 50,
            },
            0,
        );
        assert_eq!(frames[0].command, CMD_ACK);
    }

    let now = run_until(&mut node, 0, 2000);
    assert_eq!(node.plant().plant_state(), PlantState::Starting);
    assert_eq!(node.plant().thermal_kw(), 400.0);
    assert_eq!(node.plant().power_level(), 2);

    let now = run_until(&mut node, now, 20_000);
    assert_eq!(node.plant().plant_state(), PlantState::Running);
    assert_eq!(node.plant().actuator_target(ChannelId::SteamGenerator), 100.0);
    assert_eq!(node.plant().actuator_target(ChannelId::Turbine), 100.0);

    let report = state_report(&mut node, now);
    assert_eq!(report.plant_state, PlantState::Running);
    assert_eq!(report.positions[ChannelId::ShimRod.index()], 50);
    assert!(report.rods_permitted && report.turbine_permitted);
    assert!(!report.emergency_latched);
}

#[test]
fn emergency_stop_snaps_everything_and_reset_needs_fresh_reports() {
    let mut node = PlantSupervisor::binary(PlantConfig::default()).unwrap();
    report_healthy(&mut node, 0);
    send(
        &mut node,
        Command::SetTarget {
            channel: ChannelId::ShimRod,
            percent: 60,
        },
        0,
    );
    let now = run_until(&mut node, 0, 1000);
    assert!(node.plant().actuator_actual(ChannelId::ShimRod) > 0.0);

    let frames = send(&mut node, Command::EmergencyStop, now);
    assert_eq!(frames[0].command, CMD_ACK);
    // Applied immediately, not on the next cycle.
    assert_eq!(node.plant().snapshot().actual, [0.0; 7]);
    assert_eq!(node.plant().thermal_kw(), 0.0);

    let report = node.run_cycle(now).map(|r| r.indicator);
    assert!(report.map_or(false, |view| view.emergency && view.alarm == AlarmKind::Emergency));

    let frames = send(
        &mut node,
        Command::SetTarget {
            channel: ChannelId::ShimRod,
            percent: 60,
        },
        now + 10,
    );
    assert_eq!(frames[0].command, CMD_NACK);
    assert_eq!(node.diagnostics().stats().rejected_commands, 1);

    let frames = send(&mut node, Command::Reset, now + 20);
    assert_eq!(frames[0].command, CMD_ACK);
    assert!(!state_report(&mut node, now + 20).emergency_latched);

    // Samples were cleared by the reset, so rods stay blocked until reported.
    send(
        &mut node,
        Command::SetTarget {
            channel: ChannelId::ShimRod,
            percent: 60,
        },
        now + 30,
    );
    node.run_cycle(now + PERIOD);
    assert_eq!(node.plant().actuator_actual(ChannelId::ShimRod), 0.0);
    assert!(!node.plant().interlocks().rods_permitted);
}

#[test]
fn text_link_end_to_end() {
    let mut node = PlantSupervisor::text(PlantConfig::default()).unwrap();
    assert_eq!(node.codec_name(), "text");

    node.receive(b"<cmd:ping>", 0);
    assert_eq!(node.take_outbound(), b"<ack:80>\n".to_vec());

    node.receive(b"<kw:1000;pump1:2;pump2:2;pump3:2>", 10);
    assert_eq!(
        node.take_outbound(),
        b"<ack:85;mw:1.000;pwm:255;pump1:2;pump2:2;pump3:2>\n".to_vec()
    );

    // One record, three frames, three replies.
    assert_eq!(node.receive(b"<press:120;rod1:10;cmd:estop>", 20), 3);
    let out = String::from_utf8(node.take_outbound()).unwrap();
    assert_eq!(out, "<ack:86>\n<ack:84>\n<ack:69>\n");
    assert!(node.plant().safety().emergency_latched());

    node.receive(b"<pwr:2>", 30);
    assert_eq!(node.take_outbound(), b"<nack:0>\n".to_vec());
}

#[test]
fn telemetry_is_published_at_its_own_rate() {
    let mut node = PlantSupervisor::binary(PlantConfig::default()).unwrap();
    let mut published = 0;
    let mut now = 0;
    while now < 2000 {
        if let Some(report) = node.run_cycle(now) {
            if let Some(snapshot) = report.telemetry {
                published += 1;
                assert!(snapshot.to_json().unwrap().contains("\"plant_state\""));
                assert!(snapshot.to_text_line().starts_with("<pwr:"));
            }
        }
        now += PERIOD;
    }
    assert_eq!(published, 4);
}
