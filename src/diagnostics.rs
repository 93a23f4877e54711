use crate::error::{ErrorClass, ProtocolError};
use crate::protocol::{Reply, ReplyKind};
use heapless::Vec;
use serde::{Deserialize, Serialize};

const MAX_ERROR_HISTORY: usize = 16;

/// Link counters. Framing and checksum errors surface only here and in the
/// log; the link itself just resynchronizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStats {
    pub bytes_received: u64,
    pub frames_accepted: u32,
    pub acks_sent: u32,
    pub nacks_sent: u32,
    pub framing_errors: u32,
    pub checksum_errors: u32,
    pub schema_errors: u32,
    pub rejected_commands: u32,
    pub timeouts: u32,
    pub overflows: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkErrorRecord {
    pub id: u32,
    pub error: ProtocolError,
    pub timestamp: u64,
}

#[derive(Debug, Default)]
pub struct LinkDiagnostics {
    stats: LinkStats,
    error_history: Vec<LinkErrorRecord, MAX_ERROR_HISTORY>,
    next_error_id: u32,
}

impl LinkDiagnostics {
    pub fn new() -> Self {
        Self {
            next_error_id: 1,
            ..Self::default()
        }
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    pub fn record_bytes(&mut self, count: usize) {
        self.stats.bytes_received = self.stats.bytes_received.wrapping_add(count as u64);
    }

    pub fn record_frame(&mut self) {
        self.stats.frames_accepted = self.stats.frames_accepted.wrapping_add(1);
    }

    pub fn record_reply(&mut self, reply: &Reply) {
        match reply.kind {
            ReplyKind::Ack => self.stats.acks_sent = self.stats.acks_sent.wrapping_add(1),
            ReplyKind::Nack => self.stats.nacks_sent = self.stats.nacks_sent.wrapping_add(1),
        }
    }

    pub fn record_error(&mut self, error: ProtocolError, timestamp: u64) -> u32 {
        let counter = match (error, error.class()) {
            (ProtocolError::Timeout, _) => &mut self.stats.timeouts,
            (ProtocolError::Overflow, _) => &mut self.stats.overflows,
            (_, ErrorClass::Framing) => &mut self.stats.framing_errors,
            (_, ErrorClass::Checksum) => &mut self.stats.checksum_errors,
            (_, ErrorClass::Schema) => &mut self.stats.schema_errors,
            (_, ErrorClass::Rejected) => &mut self.stats.rejected_commands,
        };
        *counter = counter.wrapping_add(1);

        let id = self.next_error_id;
        self.next_error_id = self.next_error_id.wrapping_add(1);
        if self.error_history.is_full() {
            self.error_history.remove(0);
        }
        let _ = self.error_history.push(LinkErrorRecord {
            id,
            error,
            timestamp,
        });
        id
    }

    pub fn get_error_history(&self) -> &[LinkErrorRecord] {
        &self.error_history
    }

    pub fn clear_history(&mut self) {
        self.error_history.clear();
    }
}
