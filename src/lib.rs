//! # plantlink
//!
//! Supervisory link protocol and plant state-machine core for a multi-node
//! simulated process plant. Nodes talk over point-to-point serial links;
//! this crate turns received bytes into actuator targets under interlocks
//! and rate limits, and reports derived telemetry to indicator nodes.
//!
//! ## Features
//!
//! - **Framed link protocol**: checksummed binary frames with ACK/NACK and
//!   resynchronization, plus a `<key:value;...>` text encoding
//! - **Actuator model**: target/actual per channel with asymmetric ramping
//! - **Interlocks**: fail-closed condition sets that force channels safe
//! - **Turbine sequencer**: dwell-timed startup/shutdown with hysteresis
//! - **Emergency stop**: sticky latch that snaps every channel to safe
//! - **Timed pumps and humidifiers**: non-blocking pump start/stop timing
//!   and hysteresis-switched humidifier outputs
//! - **Bounded memory**: fixed-capacity buffers on the control path
//!
//! ## Quick Start
//!
//! ```rust
//! use plantlink::{Command, PlantConfig, PlantSupervisor};
//! use plantlink::protocol::binary;
//!
//! let mut node = PlantSupervisor::binary(PlantConfig::default()).unwrap();
//! let ping = binary::encode(&Command::Ping.to_frame());
//! node.receive(&ping, 0);
//! node.run_cycle(0);
//! assert!(!node.take_outbound().is_empty());
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - frames, commands, binary and text codecs
//! - [`dispatcher`] - command validation and ACK/NACK replies
//! - [`actuators`] - rate-limited actuator channels
//! - [`interlock`] - interlock condition sets and derived quantities
//! - [`sequencer`] - turbine train state machine
//! - [`safety`] - emergency latch and safety events
//! - [`pumps`] - timed pump start/stop model
//! - [`humidifier`] - humidifier outputs with hysteresis
//! - [`plant`] - the control cycle tying the above together
//! - [`supervisor`] - loop body: link polling, cycle scheduling, telemetry
//! - [`link`] - non-blocking byte handoff into the control loop

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::new_without_default)]

pub mod actuators;
pub mod config;
pub mod diagnostics;
pub mod dispatcher;
pub mod error;
pub mod humidifier;
pub mod indicator;
pub mod interlock;
pub mod link;
pub mod plant;
pub mod process;
pub mod protocol;
pub mod pumps;
pub mod safety;
pub mod sequencer;
pub mod supervisor;
pub mod telemetry;

// Re-export main public types for convenience
pub use actuators::{ActuatorBank, ActuatorChannel, ChannelId};
pub use config::PlantConfig;
pub use error::{ConfigError, LinkError, NodeError, ProtocolError};
pub use plant::Plant;
pub use process::RunStatus;
pub use pumps::PumpCommand;
pub use protocol::{Command, FeedResult, Frame, FrameCodec, LinkCodec, Reply, TextCodec};
pub use sequencer::PlantState;
pub use supervisor::PlantSupervisor;
pub use telemetry::TelemetrySnapshot;
