//! Validated frames in, exactly one reply out.
//!
//! Decoding and schema checks complete before any handler touches plant
//! state, so a rejected command never partially applies.

use crate::actuators::ChannelId;
use crate::error::ProtocolError;
use crate::interlock::{electrical_output_mw, indicator_pwm};
use crate::process::RunStatus;
use crate::protocol::{Command, Frame, Reply, ReplyBody, StateReport, UpdateAck};
use crate::pumps::PumpCommand;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// What the dispatcher may do to the plant.
pub trait CommandTarget {
    fn set_actuator_target(&mut self, channel: ChannelId, percent: f32);
    fn record_pressure(&mut self, bar: f32, now_ms: u64);
    fn record_pump_status(&mut self, pumps: [RunStatus; 3], now_ms: u64);
    fn record_thermal_input(&mut self, kw: f32, now_ms: u64);
    /// Returns false, without changing anything, when the pump cannot take
    /// the command from its current state.
    fn command_pump(&mut self, pump: usize, command: PumpCommand, now_ms: u64) -> bool;
    fn emergency_stop(&mut self, now_ms: u64);
    fn reset_emergency(&mut self, now_ms: u64);
    fn emergency_latched(&self) -> bool;
    fn state_report(&self) -> StateReport;
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DispatchStats {
    pub dispatched: u32,
    pub acknowledged: u32,
    pub rejected: u32,
}

#[derive(Debug, Default)]
pub struct CommandDispatcher {
    stats: DispatchStats,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Handles one checksum-valid frame. The error, if any, is returned next
    /// to the reply so the caller can count it.
    pub fn dispatch<T: CommandTarget + ?Sized>(
        &mut self,
        frame: &Frame,
        target: &mut T,
        now_ms: u64,
    ) -> (Reply, Option<ProtocolError>) {
        self.stats.dispatched = self.stats.dispatched.wrapping_add(1);

        let command = match Command::decode(frame) {
            Ok(command) => command,
            Err(err) => {
                warn!(command = frame.command, %err, "frame rejected");
                return (self.nack(Some(frame.command)), Some(err));
            }
        };

        if target.emergency_latched() && command.blocked_while_latched() {
            let err = ProtocolError::EmergencyLatched(frame.command);
            warn!(%err, "command refused");
            return (self.nack(Some(frame.command)), Some(err));
        }

        debug!(?command, "dispatching");
        match Self::apply(command, target, now_ms) {
            Ok(body) => {
                self.stats.acknowledged = self.stats.acknowledged.wrapping_add(1);
                (Reply::ack(frame.command, body), None)
            }
            Err(err) => {
                warn!(%err, "command refused");
                (self.nack(Some(frame.command)), Some(err))
            }
        }
    }

    /// Reply for a frame the codec already threw out.
    pub fn reject(&mut self, error: ProtocolError) -> Reply {
        debug!(%error, "rejecting invalid frame");
        self.nack(None)
    }

    fn nack(&mut self, request: Option<u8>) -> Reply {
        self.stats.rejected = self.stats.rejected.wrapping_add(1);
        Reply::nack(request)
    }

    fn apply<T: CommandTarget + ?Sized>(
        command: Command,
        target: &mut T,
        now_ms: u64,
    ) -> Result<ReplyBody, ProtocolError> {
        let body = match command {
            Command::Ping => ReplyBody::Empty,
            Command::TelemetryUpdate { thermal_kw, pumps } => {
                target.record_thermal_input(thermal_kw, now_ms);
                target.record_pump_status(pumps, now_ms);
                ReplyBody::Update(UpdateAck {
                    electrical_mw: electrical_output_mw(thermal_kw),
                    indicator_pwm: indicator_pwm(thermal_kw),
                    pumps,
                })
            }
            Command::SetTarget { channel, percent } => {
                target.set_actuator_target(channel, f32::from(percent));
                ReplyBody::Empty
            }
            Command::SetPressure { bar } => {
                target.record_pressure(bar, now_ms);
                ReplyBody::Empty
            }
            Command::PumpStatus { pumps } => {
                target.record_pump_status(pumps, now_ms);
                ReplyBody::Empty
            }
            Command::PumpControl { pump, command: request } => {
                if !target.command_pump(usize::from(pump), request, now_ms) {
                    return Err(ProtocolError::IllegalTransition(command.code()));
                }
                ReplyBody::Empty
            }
            Command::ReadState => ReplyBody::State(target.state_report()),
            Command::EmergencyStop => {
                target.emergency_stop(now_ms);
                ReplyBody::Empty
            }
            Command::Reset => {
                target.reset_emergency(now_ms);
                ReplyBody::Empty
            }
        };
        Ok(body)
    }
}
