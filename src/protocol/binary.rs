use super::{
    EncodedReply, FeedResult, Frame, LinkCodec, Payload, Reply, END_BYTE, FRAME_OVERHEAD,
    MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE, START_BYTE,
};
use crate::error::ProtocolError;
use arrayvec::ArrayVec;
use heapless::Vec;

/// Longest silence tolerated between two bytes of the same frame.
pub const INTER_BYTE_TIMEOUT_MS: u64 = 50;

const CRC8_POLY: u8 = 0x31;
const LENGTH_OFFSET: usize = 2;
const HEADER_LEN: usize = 3;

pub type EncodedFrame = Vec<u8, MAX_FRAME_SIZE>;

fn crc8_update(mut crc: u8, byte: u8) -> u8 {
    crc ^= byte;
    for _ in 0..8 {
        crc = if crc & 0x80 != 0 {
            (crc << 1) ^ CRC8_POLY
        } else {
            crc << 1
        };
    }
    crc
}

/// CRC-8, polynomial 0x31, initial value 0x00, MSB first.
pub fn crc8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |crc, &b| crc8_update(crc, b))
}

/// Digest over `[COMMAND][LENGTH][PAYLOAD]`.
pub fn frame_checksum(command: u8, payload: &[u8]) -> u8 {
    let crc = crc8_update(0, command);
    let crc = crc8_update(crc, payload.len() as u8);
    payload.iter().fold(crc, |crc, &b| crc8_update(crc, b))
}

pub fn encode(frame: &Frame) -> EncodedFrame {
    let payload = frame.payload();
    let mut out = EncodedFrame::new();
    // Capacity is MAX_PAYLOAD_SIZE + FRAME_OVERHEAD, which a Frame cannot exceed.
    let _ = out.push(START_BYTE);
    let _ = out.push(frame.command);
    let _ = out.push(payload.len() as u8);
    let _ = out.extend_from_slice(payload);
    let _ = out.push(frame_checksum(frame.command, payload));
    let _ = out.push(END_BYTE);
    out
}

/// Convenience wrapper for callers holding a raw command and payload.
pub fn encode_command(command: u8, payload: &[u8]) -> Result<EncodedFrame, ProtocolError> {
    Ok(encode(&Frame::new(command, payload)?))
}

/// Strict decode of one complete frame held in `bytes`.
pub fn decode(bytes: &[u8]) -> Result<Frame, ProtocolError> {
    if bytes.len() < FRAME_OVERHEAD || bytes[0] != START_BYTE {
        return Err(ProtocolError::Malformed);
    }
    let command = bytes[1];
    let declared = bytes[LENGTH_OFFSET];
    if declared as usize > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::LengthTooLarge(declared));
    }
    let received = bytes.len() - FRAME_OVERHEAD;
    if received != declared as usize {
        return Err(ProtocolError::PayloadLength {
            command,
            expected: declared,
            received: received.min(255) as u8,
        });
    }
    let end = bytes[bytes.len() - 1];
    if end != END_BYTE {
        return Err(ProtocolError::BadEndSentinel { found: end });
    }
    let payload = &bytes[HEADER_LEN..HEADER_LEN + received];
    let computed = frame_checksum(command, payload);
    let checksum = bytes[HEADER_LEN + received];
    if computed != checksum {
        return Err(ProtocolError::ChecksumMismatch {
            computed,
            received: checksum,
        });
    }
    let payload = Payload::from_slice(payload).map_err(|_| ProtocolError::Overflow)?;
    Ok(Frame { command, payload })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    AwaitingStart,
    InFrame,
}

/// Byte-at-a-time receiver for the binary encoding.
///
/// The length byte decides where the frame ends, so END values inside a
/// payload are harmless. A wrong byte at the END position, a bad checksum,
/// an oversize length, or a stalled sender each drop the partial frame and
/// return to [`RxState::AwaitingStart`].
#[derive(Debug)]
pub struct FrameCodec {
    state: RxState,
    buffer: ArrayVec<u8, MAX_FRAME_SIZE>,
    last_byte_ms: u64,
    timeout_ms: u64,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_timeout(INTER_BYTE_TIMEOUT_MS)
    }

    pub fn with_timeout(timeout_ms: u64) -> Self {
        Self {
            state: RxState::AwaitingStart,
            buffer: ArrayVec::new(),
            last_byte_ms: 0,
            timeout_ms,
        }
    }

    pub fn state(&self) -> RxState {
        self.state
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn stalled(&self, now_ms: u64) -> bool {
        self.state == RxState::InFrame && now_ms.saturating_sub(self.last_byte_ms) > self.timeout_ms
    }

    fn accumulate(&mut self, byte: u8) -> FeedResult {
        if self.buffer.try_push(byte).is_err() {
            self.reset();
            return FeedResult::Invalid(ProtocolError::Overflow);
        }

        let len = self.buffer.len();
        if len < HEADER_LEN {
            return FeedResult::Incomplete;
        }
        let declared = self.buffer[LENGTH_OFFSET];
        if declared as usize > MAX_PAYLOAD_SIZE {
            self.reset();
            return FeedResult::Invalid(ProtocolError::LengthTooLarge(declared));
        }
        if len < declared as usize + FRAME_OVERHEAD {
            return FeedResult::Incomplete;
        }

        let result = decode(&self.buffer);
        self.reset();
        match result {
            Ok(frame) => FeedResult::Complete(frame),
            Err(err) => FeedResult::Invalid(err),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkCodec for FrameCodec {
    fn feed(&mut self, byte: u8, now_ms: u64) -> FeedResult {
        let timed_out = self.check_timeout(now_ms);

        let result = match self.state {
            RxState::AwaitingStart => {
                if byte == START_BYTE {
                    self.buffer.clear();
                    self.buffer.push(byte);
                    self.state = RxState::InFrame;
                }
                FeedResult::Incomplete
            }
            RxState::InFrame => self.accumulate(byte),
        };
        self.last_byte_ms = now_ms;

        // A timeout outranks Incomplete so the caller can count it; the byte
        // that revealed it has already been used to start the next frame.
        match (timed_out, result) {
            (Some(err), FeedResult::Incomplete) => FeedResult::Invalid(err),
            (_, result) => result,
        }
    }

    fn check_timeout(&mut self, now_ms: u64) -> Option<ProtocolError> {
        if self.stalled(now_ms) {
            self.reset();
            Some(ProtocolError::Timeout)
        } else {
            None
        }
    }

    fn encode_reply(&self, reply: &Reply) -> EncodedReply {
        let mut out = EncodedReply::new();
        let _ = out.extend_from_slice(&encode(&reply.to_frame()));
        out
    }

    fn reset(&mut self) {
        self.state = RxState::AwaitingStart;
        self.buffer.clear();
    }

    fn name(&self) -> &'static str {
        "binary"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_of_empty_input_is_initial_value() {
        assert_eq!(crc8(&[]), 0x00);
    }

    #[test]
    fn crc_matches_frame_checksum_layout() {
        let payload = [0x10, 0x20, 0x30];
        assert_eq!(frame_checksum(0x55, &payload), crc8(&[0x55, 3, 0x10, 0x20, 0x30]));
    }

    #[test]
    fn end_byte_inside_payload_does_not_terminate() {
        let frame = Frame::new(0x55, &[END_BYTE, END_BYTE, 0, 0, 2, 2, 2]).unwrap();
        let mut codec = FrameCodec::new();
        let mut completed = None;
        for b in encode(&frame) {
            if let FeedResult::Complete(f) = codec.feed(b, 0) {
                completed = Some(f);
            }
        }
        assert_eq!(completed, Some(frame));
    }

    #[test]
    fn timeout_with_start_byte_begins_new_frame() {
        let mut codec = FrameCodec::new();
        codec.feed(START_BYTE, 0);
        codec.feed(0x50, 1);
        let result = codec.feed(START_BYTE, 1 + INTER_BYTE_TIMEOUT_MS + 1);
        assert_eq!(result, FeedResult::Invalid(ProtocolError::Timeout));
        assert_eq!(codec.state(), RxState::InFrame);
        assert_eq!(codec.buffered(), 1);
    }
}
