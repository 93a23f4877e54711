//! Link protocol: command codes, frames, typed commands and replies.
//!
//! Two encodings share the same frame model. [`binary::FrameCodec`] speaks
//! the checksummed `[START][CMD][LEN][PAYLOAD][CRC][END]` format and
//! [`text::TextCodec`] speaks the `<key:value;...>` debug format. Both turn
//! received bytes into [`Frame`]s through the [`LinkCodec`] trait, so the
//! dispatcher never sees which one is on the wire.

pub mod binary;
pub mod text;

use crate::actuators::{ChannelId, CHANNEL_COUNT};
use crate::error::ProtocolError;
use crate::process::RunStatus;
use crate::pumps::{PumpCommand, PUMP_COUNT};
use crate::sequencer::PlantState;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

pub use binary::FrameCodec;
pub use text::TextCodec;

pub const START_BYTE: u8 = 0x02;
pub const END_BYTE: u8 = 0x03;

pub const CMD_ACK: u8 = 0x06;
pub const CMD_NACK: u8 = 0x15;
pub const CMD_EMERGENCY_STOP: u8 = 0x45;
pub const CMD_PUMP_STATUS: u8 = 0x4D;
pub const CMD_PUMP_CONTROL: u8 = 0x4F;
pub const CMD_PING: u8 = 0x50;
pub const CMD_RESET: u8 = 0x52;
pub const CMD_READ_STATE: u8 = 0x53;
pub const CMD_SET_TARGET: u8 = 0x54;
pub const CMD_UPDATE: u8 = 0x55;
pub const CMD_SET_PRESSURE: u8 = 0x56;

pub const MAX_PAYLOAD_SIZE: usize = 32;
/// START, CMD, LEN, CRC and END.
pub const FRAME_OVERHEAD: usize = 5;
pub const MAX_FRAME_SIZE: usize = MAX_PAYLOAD_SIZE + FRAME_OVERHEAD;
pub const MAX_ENCODED_REPLY: usize = 192;

const UPDATE_REQUEST_LEN: u8 = 7;
const UPDATE_ACK_LEN: usize = 8;
const STATE_REPORT_LEN: usize = CHANNEL_COUNT + 7;

const_assert!(START_BYTE != END_BYTE);
const_assert!(MAX_PAYLOAD_SIZE <= u8::MAX as usize);
const_assert!(STATE_REPORT_LEN <= MAX_PAYLOAD_SIZE);
const_assert!(MAX_FRAME_SIZE <= MAX_ENCODED_REPLY);

const ALL_COMMAND_CODES: [u8; 11] = [
    CMD_ACK,
    CMD_NACK,
    CMD_EMERGENCY_STOP,
    CMD_PUMP_STATUS,
    CMD_PUMP_CONTROL,
    CMD_PING,
    CMD_RESET,
    CMD_READ_STATE,
    CMD_SET_TARGET,
    CMD_UPDATE,
    CMD_SET_PRESSURE,
];

const fn sentinels_distinct_from_commands() -> bool {
    let mut i = 0;
    while i < ALL_COMMAND_CODES.len() {
        if ALL_COMMAND_CODES[i] == START_BYTE || ALL_COMMAND_CODES[i] == END_BYTE {
            return false;
        }
        i += 1;
    }
    true
}

const_assert!(sentinels_distinct_from_commands());

pub type Payload = Vec<u8, MAX_PAYLOAD_SIZE>;
pub type EncodedReply = Vec<u8, MAX_ENCODED_REPLY>;

/// One command code plus its payload, independent of wire encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: u8,
    pub payload: Payload,
}

impl Frame {
    pub fn new(command: u8, payload: &[u8]) -> Result<Self, ProtocolError> {
        let payload = Payload::from_slice(payload)
            .map_err(|_| ProtocolError::LengthTooLarge(payload.len().min(255) as u8))?;
        Ok(Self { command, payload })
    }

    pub fn empty(command: u8) -> Self {
        Self {
            command,
            payload: Payload::new(),
        }
    }

    /// Internal constructor for payloads whose size is fixed by this module.
    fn from_known(command: u8, bytes: &[u8]) -> Self {
        debug_assert!(bytes.len() <= MAX_PAYLOAD_SIZE);
        let mut payload = Payload::new();
        for &b in bytes.iter().take(MAX_PAYLOAD_SIZE) {
            let _ = payload.push(b);
        }
        Self { command, payload }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Fixed request payload size per command, `None` for codes the node does not accept.
pub fn expected_payload_len(command: u8) -> Option<u8> {
    match command {
        CMD_PING | CMD_READ_STATE | CMD_EMERGENCY_STOP | CMD_RESET => Some(0),
        CMD_UPDATE => Some(UPDATE_REQUEST_LEN),
        CMD_SET_TARGET | CMD_PUMP_CONTROL => Some(2),
        CMD_SET_PRESSURE => Some(4),
        CMD_PUMP_STATUS => Some(3),
        _ => None,
    }
}

fn read_f32(bytes: &[u8]) -> f32 {
    f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_finite_f32(bytes: &[u8], command: u8) -> Result<f32, ProtocolError> {
    let value = read_f32(bytes);
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ProtocolError::InvalidValue(command))
    }
}

fn read_pumps(bytes: &[u8], command: u8) -> Result<[RunStatus; 3], ProtocolError> {
    let mut pumps = [RunStatus::Off; 3];
    for (slot, &code) in pumps.iter_mut().zip(bytes) {
        *slot = RunStatus::from_code(code).ok_or(ProtocolError::InvalidValue(command))?;
    }
    Ok(pumps)
}

fn pump_codes(pumps: &[RunStatus; 3]) -> [u8; 3] {
    [pumps[0].code(), pumps[1].code(), pumps[2].code()]
}

/// A schema-checked request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Ping,
    TelemetryUpdate {
        thermal_kw: f32,
        pumps: [RunStatus; 3],
    },
    SetTarget {
        channel: ChannelId,
        percent: u8,
    },
    SetPressure {
        bar: f32,
    },
    PumpStatus {
        pumps: [RunStatus; 3],
    },
    /// Local on/off request for one pump (index 0 to 2).
    PumpControl {
        pump: u8,
        command: PumpCommand,
    },
    ReadState,
    EmergencyStop,
    Reset,
}

impl Command {
    pub fn code(&self) -> u8 {
        match self {
            Command::Ping => CMD_PING,
            Command::TelemetryUpdate { .. } => CMD_UPDATE,
            Command::SetTarget { .. } => CMD_SET_TARGET,
            Command::SetPressure { .. } => CMD_SET_PRESSURE,
            Command::PumpStatus { .. } => CMD_PUMP_STATUS,
            Command::PumpControl { .. } => CMD_PUMP_CONTROL,
            Command::ReadState => CMD_READ_STATE,
            Command::EmergencyStop => CMD_EMERGENCY_STOP,
            Command::Reset => CMD_RESET,
        }
    }

    /// Validates the payload against the command's fixed schema. Nothing is
    /// applied here, so a failure leaves every piece of plant state untouched.
    pub fn decode(frame: &Frame) -> Result<Self, ProtocolError> {
        let command = frame.command;
        let expected = expected_payload_len(command).ok_or(ProtocolError::UnknownCommand(command))?;
        let payload = frame.payload();
        if payload.len() != expected as usize {
            return Err(ProtocolError::PayloadLength {
                command,
                expected,
                received: payload.len() as u8,
            });
        }

        let decoded = match command {
            CMD_PING => Command::Ping,
            CMD_READ_STATE => Command::ReadState,
            CMD_EMERGENCY_STOP => Command::EmergencyStop,
            CMD_RESET => Command::Reset,
            CMD_UPDATE => Command::TelemetryUpdate {
                thermal_kw: read_finite_f32(&payload[0..4], command)?,
                pumps: read_pumps(&payload[4..7], command)?,
            },
            CMD_SET_TARGET => Command::SetTarget {
                channel: ChannelId::from_index(payload[0])
                    .ok_or(ProtocolError::InvalidValue(command))?,
                percent: payload[1],
            },
            CMD_SET_PRESSURE => Command::SetPressure {
                bar: read_finite_f32(payload, command)?,
            },
            CMD_PUMP_STATUS => Command::PumpStatus {
                pumps: read_pumps(payload, command)?,
            },
            CMD_PUMP_CONTROL => {
                if usize::from(payload[0]) >= PUMP_COUNT {
                    return Err(ProtocolError::InvalidValue(command));
                }
                Command::PumpControl {
                    pump: payload[0],
                    command: PumpCommand::from_code(payload[1])
                        .ok_or(ProtocolError::InvalidValue(command))?,
                }
            }
            other => return Err(ProtocolError::UnknownCommand(other)),
        };
        Ok(decoded)
    }

    pub fn to_frame(&self) -> Frame {
        match *self {
            Command::TelemetryUpdate { thermal_kw, pumps } => {
                let mut bytes = [0u8; UPDATE_REQUEST_LEN as usize];
                bytes[0..4].copy_from_slice(&thermal_kw.to_le_bytes());
                bytes[4..7].copy_from_slice(&pump_codes(&pumps));
                Frame::from_known(CMD_UPDATE, &bytes)
            }
            Command::SetTarget { channel, percent } => {
                Frame::from_known(CMD_SET_TARGET, &[channel.index() as u8, percent])
            }
            Command::SetPressure { bar } => Frame::from_known(CMD_SET_PRESSURE, &bar.to_le_bytes()),
            Command::PumpStatus { pumps } => Frame::from_known(CMD_PUMP_STATUS, &pump_codes(&pumps)),
            Command::PumpControl { pump, command } => {
                Frame::from_known(CMD_PUMP_CONTROL, &[pump, command.code()])
            }
            other => Frame::empty(other.code()),
        }
    }

    /// Commands that would move an actuator away from the safe state.
    pub fn blocked_while_latched(&self) -> bool {
        matches!(
            self,
            Command::SetTarget { .. }
                | Command::PumpControl {
                    command: PumpCommand::On,
                    ..
                }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyKind {
    Ack,
    Nack,
}

/// Payload of the acknowledgement to a telemetry update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UpdateAck {
    pub electrical_mw: f32,
    pub indicator_pwm: u8,
    pub pumps: [RunStatus; 3],
}

impl UpdateAck {
    pub fn encode(&self) -> [u8; UPDATE_ACK_LEN] {
        let mut bytes = [0u8; UPDATE_ACK_LEN];
        bytes[0..4].copy_from_slice(&self.electrical_mw.to_le_bytes());
        bytes[4] = self.indicator_pwm;
        bytes[5..8].copy_from_slice(&pump_codes(&self.pumps));
        bytes
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() != UPDATE_ACK_LEN {
            return Err(ProtocolError::PayloadLength {
                command: CMD_ACK,
                expected: UPDATE_ACK_LEN as u8,
                received: payload.len() as u8,
            });
        }
        Ok(Self {
            electrical_mw: read_f32(&payload[0..4]),
            indicator_pwm: payload[4],
            pumps: read_pumps(&payload[5..8], CMD_ACK)?,
        })
    }
}

/// Payload of the acknowledgement to [`Command::ReadState`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateReport {
    pub positions: [u8; CHANNEL_COUNT],
    pub thermal_kw: f32,
    pub power_level: u8,
    pub plant_state: PlantState,
    pub rods_permitted: bool,
    pub turbine_permitted: bool,
    pub emergency_latched: bool,
}

impl StateReport {
    const FLAG_RODS: u8 = 0x01;
    const FLAG_TURBINE: u8 = 0x02;
    const FLAG_ESTOP: u8 = 0x04;

    pub fn encode(&self) -> [u8; STATE_REPORT_LEN] {
        let mut bytes = [0u8; STATE_REPORT_LEN];
        bytes[..CHANNEL_COUNT].copy_from_slice(&self.positions);
        bytes[CHANNEL_COUNT..CHANNEL_COUNT + 4].copy_from_slice(&self.thermal_kw.to_le_bytes());
        bytes[CHANNEL_COUNT + 4] = self.power_level;
        bytes[CHANNEL_COUNT + 5] = self.plant_state.code();
        let mut flags = 0;
        if self.rods_permitted {
            flags |= Self::FLAG_RODS;
        }
        if self.turbine_permitted {
            flags |= Self::FLAG_TURBINE;
        }
        if self.emergency_latched {
            flags |= Self::FLAG_ESTOP;
        }
        bytes[CHANNEL_COUNT + 6] = flags;
        bytes
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() != STATE_REPORT_LEN {
            return Err(ProtocolError::PayloadLength {
                command: CMD_ACK,
                expected: STATE_REPORT_LEN as u8,
                received: payload.len() as u8,
            });
        }
        let mut positions = [0u8; CHANNEL_COUNT];
        positions.copy_from_slice(&payload[..CHANNEL_COUNT]);
        let flags = payload[CHANNEL_COUNT + 6];
        Ok(Self {
            positions,
            thermal_kw: read_f32(&payload[CHANNEL_COUNT..CHANNEL_COUNT + 4]),
            power_level: payload[CHANNEL_COUNT + 4],
            plant_state: PlantState::from_code(payload[CHANNEL_COUNT + 5])
                .ok_or(ProtocolError::InvalidValue(CMD_ACK))?,
            rods_permitted: flags & Self::FLAG_RODS != 0,
            turbine_permitted: flags & Self::FLAG_TURBINE != 0,
            emergency_latched: flags & Self::FLAG_ESTOP != 0,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReplyBody {
    Empty,
    Update(UpdateAck),
    State(StateReport),
}

/// Exactly one of these is produced per dispatched frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reply {
    pub kind: ReplyKind,
    /// Command code being answered, `None` when the frame never decoded far
    /// enough to know it.
    pub request: Option<u8>,
    pub body: ReplyBody,
}

impl Reply {
    pub fn ack(request: u8, body: ReplyBody) -> Self {
        Self {
            kind: ReplyKind::Ack,
            request: Some(request),
            body,
        }
    }

    pub fn nack(request: Option<u8>) -> Self {
        Self {
            kind: ReplyKind::Nack,
            request,
            body: ReplyBody::Empty,
        }
    }

    pub fn is_ack(&self) -> bool {
        self.kind == ReplyKind::Ack
    }

    /// Binary form: NACKs never carry a payload.
    pub fn to_frame(&self) -> Frame {
        match (self.kind, &self.body) {
            (ReplyKind::Nack, _) => Frame::empty(CMD_NACK),
            (ReplyKind::Ack, ReplyBody::Empty) => Frame::empty(CMD_ACK),
            (ReplyKind::Ack, ReplyBody::Update(ack)) => Frame::from_known(CMD_ACK, &ack.encode()),
            (ReplyKind::Ack, ReplyBody::State(report)) => {
                Frame::from_known(CMD_ACK, &report.encode())
            }
        }
    }
}

/// Result of feeding one byte into a codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedResult {
    Incomplete,
    Complete(Frame),
    Invalid(ProtocolError),
}

/// Shared receive/transmit interface of the binary and text encodings.
pub trait LinkCodec {
    /// Consumes one received byte. Never blocks.
    fn feed(&mut self, byte: u8, now_ms: u64) -> FeedResult;

    /// Drops a stalled partial frame once the inter-byte timeout has passed,
    /// even if no further byte arrives.
    fn check_timeout(&mut self, now_ms: u64) -> Option<ProtocolError>;

    /// Further frames produced by the last completed record. Encodings that
    /// map one record to one frame never have any.
    fn take_pending(&mut self) -> Option<Frame> {
        None
    }

    fn encode_reply(&self, reply: &Reply) -> EncodedReply;

    fn reset(&mut self);

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_reject_oversized_payload() {
        let big = [0u8; MAX_PAYLOAD_SIZE + 1];
        assert_eq!(
            Frame::new(CMD_PING, &big),
            Err(ProtocolError::LengthTooLarge((MAX_PAYLOAD_SIZE + 1) as u8))
        );
    }

    #[test]
    fn state_report_flags_survive_encoding() {
        let report = StateReport {
            positions: [1, 2, 3, 4, 5, 6, 7],
            thermal_kw: 512.5,
            power_level: 2,
            plant_state: PlantState::Running,
            rods_permitted: true,
            turbine_permitted: false,
            emergency_latched: true,
        };
        assert_eq!(StateReport::decode(&report.encode()), Ok(report));
    }

    #[test]
    fn nack_frame_is_always_empty() {
        let frame = Reply::nack(Some(CMD_UPDATE)).to_frame();
        assert_eq!(frame.command, CMD_NACK);
        assert!(frame.payload.is_empty());
    }
}
