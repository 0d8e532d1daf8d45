//! Per-channel worker: binds one channel to one session, one hand-off FIFO
//! and one decoder invocation, and drives the connect → handshake → stream →
//! teardown → reconnect cycle forever.
//!
//! The worker is single-threaded: socket reads, hand-off writes and control
//! consumption are strictly sequential, so the one-live-session and
//! one-live-hand-off invariants hold by construction.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dvrpipe_proto::Credentials;
use tracing::{debug, error, info, warn};

use crate::control::{ControlSignal, ResetReason, SignalSlot};
use crate::decoder::{DecoderCommand, DecoderProcess};
use crate::handoff::{HandoffChannel, WriteOutcome};
use crate::health::{HealthConfig, HealthMonitor, Verdict};
use crate::session::{ReadEvent, Session, SessionConfig, DEFAULT_CHUNK_SIZE};

/// Maximum number of logical channels a deployment can configure.
pub const MAX_CHANNELS: usize = 8;

/// Fixed wait before reconnecting after a transient network failure.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(10);

/// Granularity of interruptible waits (backoff, shutdown polling).
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Everything one channel worker needs, cloneable so the supervisor can
/// respawn a worker from its spec.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Zero-based channel index.
    pub channel: usize,
    /// Hand-off FIFO path for this channel.
    pub pipe_path: PathBuf,
    /// Decoder output artifact path for this channel.
    pub artifact_path: PathBuf,
    pub session: SessionConfig,
    pub credentials: Credentials,
    pub decoder: DecoderCommand,
    pub health: HealthConfig,
    /// Wait between reconnect attempts after a transient network failure.
    pub backoff: Duration,
    /// Grace period for the decoder to exit on its own during teardown.
    pub decoder_grace: Duration,
    /// How long the first fifo open waits for a freshly spawned decoder to
    /// attach as reader.
    pub reader_wait: Duration,
    /// Optional periodic forced reset of the whole output chain.
    pub reset_every: Option<Duration>,
}

impl ChannelConfig {
    pub fn new(
        channel: usize,
        pipe_path: impl Into<PathBuf>,
        artifact_path: impl Into<PathBuf>,
        session: SessionConfig,
    ) -> Self {
        Self {
            channel,
            pipe_path: pipe_path.into(),
            artifact_path: artifact_path.into(),
            session,
            credentials: Credentials::default(),
            decoder: DecoderCommand::default(),
            health: HealthConfig::default(),
            backoff: DEFAULT_BACKOFF,
            decoder_grace: Duration::from_millis(500),
            reader_wait: Duration::from_millis(500),
            reset_every: None,
        }
    }
}

/// Why the streaming loop handed control back to the worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    /// Shutdown requested; unwind everything and exit.
    Terminate,
    /// A deliberate or health-driven reset.
    Reset(ResetReason),
    /// The server closed the connection (routine, reconnect at once).
    PeerClosed,
    /// The fifo reader disappeared mid-stream.
    ReaderGone,
    /// Hard socket error while reading.
    ReadError,
}

/// One channel's worker. Owns the channel exclusively; the supervisor only
/// holds the signal slot and the join handle.
pub struct ChannelWorker {
    config: ChannelConfig,
    slot: SignalSlot,
    shutdown: Arc<AtomicBool>,
    handoff: Option<HandoffChannel>,
    decoder: Option<DecoderProcess>,
    health: HealthMonitor,
}

impl ChannelWorker {
    pub fn new(config: ChannelConfig, slot: SignalSlot, shutdown: Arc<AtomicBool>) -> Self {
        let health = HealthMonitor::new(
            &config.artifact_path,
            &config.pipe_path,
            config.health.clone(),
        );
        Self {
            config,
            slot,
            shutdown,
            handoff: None,
            decoder: None,
            health,
        }
    }

    /// Run the session cycle until terminated. Transient failures of every
    /// kind are absorbed here; this returns only on an external Terminate.
    pub fn run(mut self) {
        let channel = self.config.channel;
        info!(channel, server = %self.config.session.server, "worker started");

        loop {
            if !self.consume_idle_signal() {
                break;
            }

            let mut session = match Session::connect(&self.config.session) {
                Ok(session) => session,
                Err(err) => {
                    warn!(
                        channel,
                        error = %err,
                        backoff = ?self.config.backoff,
                        "connect failed, backing off"
                    );
                    if !self.wait_backoff() {
                        break;
                    }
                    continue;
                }
            };

            if let Err(err) = session.authenticate(channel, &self.config.credentials) {
                // Looks fatal (wrong model? wrong credentials?) but the
                // server also drops logins under load, so keep retrying.
                error!(channel, error = %err, "login handshake failed");
                session.close();
                if !self.wait_backoff() {
                    break;
                }
                continue;
            }

            info!(channel, "authenticated, streaming");
            self.health.reset();
            let end = self.stream(&mut session);
            session.close();
            debug!(channel, end = ?end, "stream ended");

            match end {
                StreamEnd::Terminate => break,
                StreamEnd::Reset(reason) if !reason.tears_down_output() => {
                    // Soft reset: the decoder keeps consuming the fifo
                    // across the brief reconnect.
                }
                _ => self.teardown_output(false),
            }
            // Peer-close and resets all reconnect immediately; only network
            // failures earn a backoff.
        }

        self.teardown_output(true);
        info!(channel, "worker stopped");
    }

    /// One pass of the streaming loop body per iteration: control signals
    /// and health first (the safe points), then a bounded read.
    fn stream(&mut self, session: &mut Session) -> StreamEnd {
        let channel = self.config.channel;
        let mut buf = vec![0u8; DEFAULT_CHUNK_SIZE];
        let started = Instant::now();

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return StreamEnd::Terminate;
            }
            if let Some(signal) = self.slot.take() {
                debug!(channel, ?signal, "control signal consumed");
                return match signal {
                    ControlSignal::Terminate => StreamEnd::Terminate,
                    other => StreamEnd::Reset(other.into()),
                };
            }
            if let Some(every) = self.config.reset_every {
                if started.elapsed() >= every {
                    info!(channel, "periodic reset timer fired");
                    return StreamEnd::Reset(ResetReason::ContentReset);
                }
            }
            let output_active = self.handoff.as_ref().is_some_and(HandoffChannel::is_open);
            match self.health.poll(output_active) {
                Verdict::Healthy => {}
                Verdict::CorruptArtifact { size } => {
                    warn!(channel, size, "degenerate artifact, forcing reset");
                    return StreamEnd::Reset(ResetReason::ContentReset);
                }
                Verdict::StaleOutput { age } => {
                    warn!(channel, age_secs = age.as_secs(), "output stale, forcing reset");
                    return StreamEnd::Reset(ResetReason::ContentReset);
                }
            }

            match session.read_chunk(&mut buf) {
                Ok(ReadEvent::Data(n)) => {
                    if self.forward(&buf[..n]) == WriteOutcome::ReaderGone {
                        return StreamEnd::ReaderGone;
                    }
                }
                // The receive timeout is the control/health poll point, not
                // an error; the health monitor owns stall detection.
                Ok(ReadEvent::TimedOut) => continue,
                Ok(ReadEvent::Closed) => return StreamEnd::PeerClosed,
                Err(err) => {
                    warn!(channel, error = %err, "stream read failed");
                    return StreamEnd::ReadError;
                }
            }
        }
    }

    /// Forward one received chunk to the hand-off fifo, bringing up the
    /// fifo and decoder on first data. Failures here drop the chunk rather
    /// than disturb the connection; only a vanished reader is hard.
    fn forward(&mut self, chunk: &[u8]) -> WriteOutcome {
        if chunk.is_empty() {
            return WriteOutcome::Written;
        }
        let channel = self.config.channel;

        if self.handoff.is_none() {
            match HandoffChannel::create(&self.config.pipe_path) {
                Ok(handoff) => self.handoff = Some(handoff),
                Err(err) => {
                    warn!(channel, error = %err, "hand-off unavailable, dropping chunk");
                    return WriteOutcome::Dropped;
                }
            }
        }

        // The decoder is the fifo's reader; it must exist before the
        // writer side can open. One launch per hand-off instance.
        let mut freshly_spawned = false;
        if self.decoder.is_none() {
            let Some(handoff) = self.handoff.as_ref() else {
                return WriteOutcome::Dropped;
            };
            match DecoderProcess::spawn(
                &self.config.decoder,
                handoff.path(),
                channel,
                &self.config.artifact_path,
            ) {
                Ok(decoder) => {
                    self.decoder = Some(decoder);
                    freshly_spawned = true;
                }
                Err(err) => {
                    warn!(channel, error = %err, "decoder launch failed, dropping chunk");
                    return WriteOutcome::Dropped;
                }
            }
        }

        let Some(handoff) = self.handoff.as_mut() else {
            return WriteOutcome::Dropped;
        };
        if !handoff.is_open() {
            // Wait for the reader only right after launching the decoder;
            // otherwise stay non-blocking and lossy.
            let wait = if freshly_spawned {
                self.config.reader_wait
            } else {
                Duration::ZERO
            };
            match handoff.open_writer(wait) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(channel, "no fifo reader yet, dropping chunk");
                    return WriteOutcome::Dropped;
                }
                Err(err) => {
                    warn!(channel, error = %err, "fifo open failed, dropping chunk");
                    return WriteOutcome::Dropped;
                }
            }
        }

        handoff.write_chunk(chunk)
    }

    /// Tear down the output chain: pipe writer first, then the decoder, so
    /// no decoder is ever left attached to a closed pipe. With `unlink` the
    /// fifo is also removed from the filesystem (terminate path).
    fn teardown_output(&mut self, unlink: bool) {
        if let Some(handoff) = self.handoff.as_mut() {
            handoff.close_writer();
        }
        if let Some(decoder) = self.decoder.take() {
            decoder.shutdown(self.config.decoder_grace);
        }
        if let Some(handoff) = self.handoff.take() {
            if unlink {
                handoff.unlink();
            }
        }
    }

    /// Handle a signal arriving between sessions. Returns false when the
    /// worker should exit.
    fn consume_idle_signal(&mut self) -> bool {
        if self.shutdown.load(Ordering::SeqCst) {
            return false;
        }
        match self.slot.take() {
            Some(ControlSignal::Terminate) => false,
            Some(ControlSignal::HardReset) => {
                self.teardown_output(false);
                true
            }
            // A soft reset while already reconnecting is a no-op.
            Some(ControlSignal::SoftReset) | None => true,
        }
    }

    /// Sleep the fixed backoff in slices, staying responsive to signals.
    /// A deliberate reset cuts the backoff short (reconnect is immediate
    /// for control signals, only network failures wait). Returns false when
    /// the worker should exit.
    fn wait_backoff(&mut self) -> bool {
        let deadline = Instant::now() + self.config.backoff;
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return false;
            }
            match self.slot.take() {
                Some(ControlSignal::Terminate) => return false,
                Some(ControlSignal::SoftReset) => return true,
                Some(ControlSignal::HardReset) => {
                    self.teardown_output(false);
                    return true;
                }
                None => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(WAIT_SLICE.min(deadline - now));
        }
    }
}
