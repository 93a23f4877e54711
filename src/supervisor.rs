use crate::config::PlantConfig;
use crate::diagnostics::LinkDiagnostics;
use crate::dispatcher::{CommandDispatcher, CommandTarget, DispatchStats};
use crate::error::{ConfigError, LinkError, ProtocolError};
use crate::indicator::{requested_alarm, AlarmBuzzer, IndicatorView};
use crate::link::{take_snapshot, ByteSource};
use crate::plant::{CycleOutcome, Plant};
use crate::protocol::{FeedResult, Frame, FrameCodec, LinkCodec, Reply, TextCodec};
use crate::telemetry::{TelemetryCollector, TelemetrySnapshot};
use tracing::{debug, warn};

/// What one control cycle produced for the outside world.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    /// Set at the telemetry rate, not every cycle.
    pub telemetry: Option<TelemetrySnapshot>,
    pub indicator: IndicatorView,
}

/// Single-threaded loop body for one node: link polling, dispatch, the
/// fixed-rate control cycle, and telemetry/indicator refresh. Nothing in
/// here waits; work that is not due yet is skipped until the next call.
pub struct PlantSupervisor {
    codec: Box<dyn LinkCodec + Send>,
    dispatcher: CommandDispatcher,
    plant: Plant,
    diagnostics: LinkDiagnostics,
    telemetry: TelemetryCollector,
    buzzer: AlarmBuzzer,
    config: PlantConfig,
    last_cycle_ms: Option<u64>,
    outbound: Vec<u8>,
}

impl PlantSupervisor {
    pub fn new(config: PlantConfig, codec: Box<dyn LinkCodec + Send>) -> Result<Self, ConfigError> {
        let plant = Plant::new(&config)?;
        Ok(Self {
            codec,
            dispatcher: CommandDispatcher::new(),
            plant,
            diagnostics: LinkDiagnostics::new(),
            telemetry: TelemetryCollector::new(config.telemetry_period_ms),
            buzzer: AlarmBuzzer::new(),
            config,
            last_cycle_ms: None,
            outbound: Vec::new(),
        })
    }

    pub fn binary(config: PlantConfig) -> Result<Self, ConfigError> {
        Self::new(config, Box::new(FrameCodec::new()))
    }

    pub fn text(config: PlantConfig) -> Result<Self, ConfigError> {
        Self::new(config, Box::new(TextCodec::new()))
    }

    /// Takes a bounded snapshot from the link and processes it. Returns the
    /// number of replies queued.
    pub fn poll_link<S: ByteSource + ?Sized>(
        &mut self,
        source: &mut S,
        now_ms: u64,
    ) -> Result<usize, LinkError> {
        let snapshot = take_snapshot(source, self.config.max_bytes_per_poll)?;
        Ok(self.receive(&snapshot, now_ms))
    }

    /// Feeds already-received bytes through the codec and dispatcher.
    pub fn receive(&mut self, bytes: &[u8], now_ms: u64) -> usize {
        self.diagnostics.record_bytes(bytes.len());
        let mut replies = 0;
        for &byte in bytes {
            match self.codec.feed(byte, now_ms) {
                FeedResult::Incomplete => {}
                FeedResult::Complete(frame) => {
                    replies += self.handle_frame(&frame, now_ms);
                    while let Some(extra) = self.codec.take_pending() {
                        replies += self.handle_frame(&extra, now_ms);
                    }
                }
                FeedResult::Invalid(err) => replies += self.handle_invalid(err, now_ms),
            }
        }
        replies
    }

    fn handle_frame(&mut self, frame: &Frame, now_ms: u64) -> usize {
        self.diagnostics.record_frame();
        let (reply, err) = self.dispatcher.dispatch(frame, &mut self.plant, now_ms);
        if let Some(err) = err {
            self.diagnostics.record_error(err, now_ms);
        }
        self.send(&reply);
        1
    }

    fn handle_invalid(&mut self, err: ProtocolError, now_ms: u64) -> usize {
        self.diagnostics.record_error(err, now_ms);
        if err.warrants_nack() {
            warn!(codec = self.codec.name(), %err, "invalid frame");
            let reply = self.dispatcher.reject(err);
            self.send(&reply);
            1
        } else {
            debug!(codec = self.codec.name(), %err, "resynchronizing");
            0
        }
    }

    fn send(&mut self, reply: &Reply) {
        self.diagnostics.record_reply(reply);
        let encoded = self.codec.encode_reply(reply);
        self.outbound.extend_from_slice(&encoded);
    }

    /// Replies queued since the last call, already encoded for the link.
    pub fn take_outbound(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outbound)
    }

    /// Runs the control cycle if its period has elapsed since the last run.
    pub fn run_cycle(&mut self, now_ms: u64) -> Option<CycleReport> {
        if let Some(last) = self.last_cycle_ms {
            if now_ms.saturating_sub(last) < self.config.control_period_ms {
                return None;
            }
        }
        self.last_cycle_ms = Some(now_ms);

        if let Some(err) = self.codec.check_timeout(now_ms) {
            debug!(%err, "partial frame expired");
            self.diagnostics.record_error(err, now_ms);
        }

        let outcome = self.plant.control_cycle(now_ms);
        let (snapshot, publish) = self.telemetry.refresh(&self.plant, self.diagnostics.stats(), now_ms);

        let requested = requested_alarm(&snapshot, &self.config.interlock);
        self.buzzer.update(now_ms, requested, snapshot.emergency_latched);
        let indicator = IndicatorView::from_snapshot(&snapshot, &self.buzzer);

        Some(CycleReport {
            outcome,
            telemetry: publish.then_some(snapshot),
            indicator,
        })
    }

    /// Physical emergency button.
    pub fn trigger_emergency_stop(&mut self, now_ms: u64) {
        self.plant.emergency_stop(now_ms);
    }

    pub fn reset_emergency(&mut self, now_ms: u64) {
        self.plant.reset_emergency(now_ms);
    }

    pub fn plant(&self) -> &Plant {
        &self.plant
    }

    pub fn plant_mut(&mut self) -> &mut Plant {
        &mut self.plant
    }

    pub fn diagnostics(&self) -> &LinkDiagnostics {
        &self.diagnostics
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    pub fn telemetry(&self) -> Option<&TelemetrySnapshot> {
        self.telemetry.latest()
    }

    pub fn codec_name(&self) -> &'static str {
        self.codec.name()
    }

    pub fn config(&self) -> &PlantConfig {
        &self.config
    }
}
