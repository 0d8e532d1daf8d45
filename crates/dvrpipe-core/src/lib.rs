//! Per-channel session engine for streaming a DVR's media port into local
//! named pipes.
//!
//! Each configured channel gets one worker thread that drives a session
//! state machine (`connect → handshake → stream → teardown → reconnect`),
//! forwards the raw byte stream into a hand-off FIFO consumed by an
//! external decoder, and watches the decoder's output for corruption or
//! staleness. A supervisor owns the workers, restarts crashed ones, and
//! fans typed control signals out to them.
//!
//! # Crate Structure
//!
//! - [`session`] — one socket connection's lifecycle
//! - [`handoff`] — per-channel FIFO byte sink (unix)
//! - [`decoder`] — external decoder subprocess handle
//! - [`health`] — decoder output corruption/staleness checks
//! - [`control`] — typed control signals and per-worker slots
//! - [`worker`] — channel worker binding all of the above
//! - [`supervisor`] — worker spawning, restart and shutdown

pub mod control;
pub mod decoder;
pub mod error;
#[cfg(unix)]
pub mod handoff;
pub mod health;
pub mod session;
#[cfg(unix)]
pub mod supervisor;
#[cfg(unix)]
pub mod worker;

pub use control::{ControlSignal, ResetReason, SignalSlot};
pub use decoder::{DecoderCommand, DecoderProcess};
pub use error::{DecoderError, HandoffError, SessionError, SupervisorError};
#[cfg(unix)]
pub use handoff::{HandoffChannel, WriteOutcome};
pub use health::{HealthConfig, HealthMonitor, Verdict};
pub use session::{ReadEvent, Session, SessionConfig, SessionState};
#[cfg(unix)]
pub use supervisor::Supervisor;
#[cfg(unix)]
pub use worker::{ChannelConfig, ChannelWorker, DEFAULT_BACKOFF, MAX_CHANNELS};
