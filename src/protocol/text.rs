//! `<key:value;key:value>` records, the human-readable link encoding.
//!
//! A record may name several fields at once, so one record can expand into
//! several frames. The first is returned from `feed`, the rest are drained
//! through [`LinkCodec::take_pending`].

use super::{
    Command, EncodedReply, FeedResult, Frame, LinkCodec, Reply, ReplyBody, ReplyKind,
    MAX_ENCODED_REPLY,
};
use crate::actuators::ChannelId;
use crate::error::ProtocolError;
use crate::process::RunStatus;
use crate::pumps::PumpCommand;
use arrayvec::ArrayString;
use core::fmt::Write;
use heapless::{Deque, String, Vec};

pub const MAX_RECORD_LEN: usize = 64;
/// Text links come from slower nodes than the binary link.
pub const TEXT_INTER_BYTE_TIMEOUT_MS: u64 = 250;
const MAX_FRAMES_PER_RECORD: usize = 12;

const RECORD_OPEN: u8 = b'<';
const RECORD_CLOSE: u8 = b'>';

type RecordFrames = Vec<Frame, MAX_FRAMES_PER_RECORD>;

#[derive(Debug, Default)]
struct RecordFields {
    ping: bool,
    read_state: bool,
    estop: bool,
    reset: bool,
    pumps: [Option<RunStatus>; 3],
    thermal_kw: Option<f32>,
    pressure_bar: Option<f32>,
    targets: Vec<(ChannelId, u8), 3>,
    pump_commands: Vec<(u8, PumpCommand), 3>,
}

fn parse_number(value: &str) -> Result<f32, ProtocolError> {
    value
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or(ProtocolError::Malformed)
}

fn rod_channel(key: &str) -> Option<ChannelId> {
    match key {
        "rod1" | "safety" => Some(ChannelId::SafetyRod),
        "rod2" | "shim" => Some(ChannelId::ShimRod),
        "rod3" | "regulating" => Some(ChannelId::RegulatingRod),
        _ => None,
    }
}

fn pump_slot(key: &str) -> Option<usize> {
    match key {
        "pump1" => Some(0),
        "pump2" => Some(1),
        "pump3" => Some(2),
        _ => None,
    }
}

fn pump_command(key: &str) -> Option<PumpCommand> {
    match key {
        "pumpon" => Some(PumpCommand::On),
        "pumpoff" => Some(PumpCommand::Off),
        _ => None,
    }
}

/// Parses a record body (without the angle brackets). A trailing `;` is
/// optional. Keys this node does not understand are skipped.
fn parse_fields(body: &str) -> Result<RecordFields, ProtocolError> {
    let mut fields = RecordFields::default();
    let mut recognized = false;

    for field in body.split(';').map(str::trim).filter(|f| !f.is_empty()) {
        let (key, value) = field.split_once(':').ok_or(ProtocolError::Malformed)?;
        let (key, value) = (key.trim(), value.trim());

        if let Some(channel) = rod_channel(key) {
            let percent = parse_number(value)?.clamp(0.0, 100.0).round() as u8;
            if let Some(slot) = fields.targets.iter_mut().find(|(c, _)| *c == channel) {
                slot.1 = percent;
            } else {
                let _ = fields.targets.push((channel, percent));
            }
        } else if let Some(slot) = pump_slot(key) {
            let code = value
                .parse::<u8>()
                .map_err(|_| ProtocolError::Malformed)?;
            fields.pumps[slot] = Some(
                RunStatus::from_code(code).ok_or(ProtocolError::InvalidValue(super::CMD_PUMP_STATUS))?,
            );
        } else if let Some(command) = pump_command(key) {
            // Pumps are numbered from 1 on the text link.
            let pump = match value.parse::<u8>() {
                Ok(n @ 1..=3) => n - 1,
                Ok(_) => return Err(ProtocolError::InvalidValue(super::CMD_PUMP_CONTROL)),
                Err(_) => return Err(ProtocolError::Malformed),
            };
            if let Some(slot) = fields.pump_commands.iter_mut().find(|(p, _)| *p == pump) {
                slot.1 = command;
            } else {
                let _ = fields.pump_commands.push((pump, command));
            }
        } else {
            match key {
                "kw" => fields.thermal_kw = Some(parse_number(value)?),
                "press" => fields.pressure_bar = Some(parse_number(value)?),
                "cmd" => match value {
                    "ping" => fields.ping = true,
                    "state" => fields.read_state = true,
                    "estop" => fields.estop = true,
                    "reset" => fields.reset = true,
                    _ => return Err(ProtocolError::Malformed),
                },
                _ => continue,
            }
        }
        recognized = true;
    }

    if recognized {
        Ok(fields)
    } else {
        Err(ProtocolError::Malformed)
    }
}

fn expand(fields: &RecordFields, pumps: [RunStatus; 3]) -> RecordFrames {
    let mut frames = RecordFrames::new();
    let mut push = |command: Command| {
        let _ = frames.push(command.to_frame());
    };

    if fields.ping {
        push(Command::Ping);
    }
    let any_pump = fields.pumps.iter().any(Option::is_some);
    match fields.thermal_kw {
        Some(thermal_kw) => push(Command::TelemetryUpdate { thermal_kw, pumps }),
        None if any_pump => push(Command::PumpStatus { pumps }),
        None => {}
    }
    if let Some(bar) = fields.pressure_bar {
        push(Command::SetPressure { bar });
    }
    for &(channel, percent) in &fields.targets {
        push(Command::SetTarget { channel, percent });
    }
    for &(pump, command) in &fields.pump_commands {
        push(Command::PumpControl { pump, command });
    }
    if fields.estop {
        push(Command::EmergencyStop);
    }
    if fields.reset {
        push(Command::Reset);
    }
    if fields.read_state {
        push(Command::ReadState);
    }
    frames
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    AwaitingStart,
    InRecord,
}

#[derive(Debug)]
pub struct TextCodec {
    state: RxState,
    buffer: ArrayString<MAX_RECORD_LEN>,
    pending: Deque<Frame, MAX_FRAMES_PER_RECORD>,
    // Pump codes missing from a record keep their last value.
    last_pumps: [RunStatus; 3],
    last_byte_ms: u64,
    timeout_ms: u64,
}

impl TextCodec {
    pub fn new() -> Self {
        Self::with_timeout(TEXT_INTER_BYTE_TIMEOUT_MS)
    }

    pub fn with_timeout(timeout_ms: u64) -> Self {
        Self {
            state: RxState::AwaitingStart,
            buffer: ArrayString::new(),
            pending: Deque::new(),
            last_pumps: [RunStatus::Off; 3],
            last_byte_ms: 0,
            timeout_ms,
        }
    }

    pub fn last_pumps(&self) -> [RunStatus; 3] {
        self.last_pumps
    }

    fn finish_record(&mut self) -> FeedResult {
        self.state = RxState::AwaitingStart;
        let fields = match parse_fields(&self.buffer) {
            Ok(fields) => fields,
            Err(err) => return FeedResult::Invalid(err),
        };

        let mut pumps = self.last_pumps;
        for (slot, value) in pumps.iter_mut().zip(fields.pumps) {
            if let Some(status) = value {
                *slot = status;
            }
        }
        self.last_pumps = pumps;

        self.pending.clear();
        let mut frames = expand(&fields, pumps).into_iter();
        let first = frames.next();
        for frame in frames {
            let _ = self.pending.push_back(frame);
        }
        match first {
            Some(frame) => FeedResult::Complete(frame),
            None => FeedResult::Invalid(ProtocolError::Malformed),
        }
    }
}

impl Default for TextCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkCodec for TextCodec {
    fn feed(&mut self, byte: u8, now_ms: u64) -> FeedResult {
        let timed_out = self.check_timeout(now_ms);
        self.last_byte_ms = now_ms;

        let result = match (self.state, byte) {
            (RxState::AwaitingStart, RECORD_OPEN) => {
                self.buffer.clear();
                self.state = RxState::InRecord;
                FeedResult::Incomplete
            }
            // Newlines and other noise between records.
            (RxState::AwaitingStart, _) => FeedResult::Incomplete,
            (RxState::InRecord, RECORD_CLOSE) => self.finish_record(),
            (RxState::InRecord, RECORD_OPEN) => {
                // The previous record was cut short; resync on the new one.
                self.buffer.clear();
                FeedResult::Invalid(ProtocolError::Malformed)
            }
            (RxState::InRecord, b) if b.is_ascii_graphic() || b == b' ' => {
                if self.buffer.try_push(b as char).is_err() {
                    self.reset();
                    FeedResult::Invalid(ProtocolError::Overflow)
                } else {
                    FeedResult::Incomplete
                }
            }
            (RxState::InRecord, _) => {
                self.reset();
                FeedResult::Invalid(ProtocolError::Malformed)
            }
        };

        match (timed_out, result) {
            (Some(err), FeedResult::Incomplete) => FeedResult::Invalid(err),
            (_, result) => result,
        }
    }

    fn check_timeout(&mut self, now_ms: u64) -> Option<ProtocolError> {
        if self.state == RxState::InRecord
            && now_ms.saturating_sub(self.last_byte_ms) > self.timeout_ms
        {
            self.reset();
            Some(ProtocolError::Timeout)
        } else {
            None
        }
    }

    fn take_pending(&mut self) -> Option<Frame> {
        self.pending.pop_front()
    }

    fn encode_reply(&self, reply: &Reply) -> EncodedReply {
        let mut line: String<MAX_ENCODED_REPLY> = String::new();
        let tag = match reply.kind {
            ReplyKind::Ack => "ack",
            ReplyKind::Nack => "nack",
        };
        // Code 0 stands in for a request that never decoded.
        let _ = write!(line, "<{}:{}", tag, reply.request.unwrap_or(0));
        match &reply.body {
            ReplyBody::Empty => {}
            ReplyBody::Update(ack) => {
                let _ = write!(
                    line,
                    ";mw:{:.3};pwm:{};pump1:{};pump2:{};pump3:{}",
                    ack.electrical_mw,
                    ack.indicator_pwm,
                    ack.pumps[0].code(),
                    ack.pumps[1].code(),
                    ack.pumps[2].code()
                );
            }
            ReplyBody::State(report) => {
                for (channel, position) in ChannelId::ALL.iter().zip(report.positions) {
                    let _ = write!(line, ";{}:{}", channel.key(), position);
                }
                let _ = write!(
                    line,
                    ";kw:{:.1};pwr:{};state:{};rods_ok:{};turbine_ok:{};estop:{}",
                    report.thermal_kw,
                    report.power_level,
                    report.plant_state.code(),
                    u8::from(report.rods_permitted),
                    u8::from(report.turbine_permitted),
                    u8::from(report.emergency_latched)
                );
            }
        }
        let _ = line.push_str(">\n");
        line.into_bytes()
    }

    fn reset(&mut self) {
        self.state = RxState::AwaitingStart;
        self.buffer.clear();
    }

    fn name(&self) -> &'static str {
        "text"
    }
}
