//! Decoder output health checks.
//!
//! The socket can stay perfectly alive while the decoded picture degrades to
//! a blank frame or stops updating entirely. This module inspects the
//! decoder's output artifact and the hand-off FIFO from the streaming loop
//! and decides when the session is unproductive and must be reset.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, warn};

/// Tunable thresholds for output inspection.
///
/// The corrupt window and staleness threshold are empirically tuned per
/// deployment, which is why they are configuration rather than constants.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Lower bound of the corrupt-artifact size window, in bytes.
    pub corrupt_min: u64,
    /// Upper bound of the corrupt-artifact size window, in bytes.
    pub corrupt_max: u64,
    /// Hand-off FIFO modification age beyond which output is stale.
    pub stale_after: Duration,
    /// Ages beyond this are treated as clock skew and ignored.
    pub stale_ceiling: Duration,
    /// Minimum interval between filesystem inspections.
    pub poll_interval: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            corrupt_min: 10,
            corrupt_max: 2500,
            stale_after: Duration::from_secs(30),
            stale_ceiling: Duration::from_secs(3600),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Outcome of one health inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Healthy,
    /// The artifact size landed in the degenerate-frame window.
    /// The artifact has already been deleted by the time this is reported.
    CorruptArtifact { size: u64 },
    /// The hand-off resource has not been written to for too long.
    StaleOutput { age: Duration },
}

/// Inspects one channel's decoder output for corruption and staleness.
#[derive(Debug)]
pub struct HealthMonitor {
    artifact: PathBuf,
    handoff: PathBuf,
    config: HealthConfig,
    last_poll: Option<Instant>,
}

impl HealthMonitor {
    pub fn new(
        artifact: impl Into<PathBuf>,
        handoff: impl Into<PathBuf>,
        config: HealthConfig,
    ) -> Self {
        Self {
            artifact: artifact.into(),
            handoff: handoff.into(),
            config,
            last_poll: None,
        }
    }

    /// Rate-limited inspection for use inside the streaming loop.
    ///
    /// Returns `Healthy` without touching the filesystem when called again
    /// within the poll interval. `output_active` reports whether the session
    /// currently has an open hand-off writer.
    pub fn poll(&mut self, output_active: bool) -> Verdict {
        let now = Instant::now();
        if let Some(last) = self.last_poll {
            if now.duration_since(last) < self.config.poll_interval {
                return Verdict::Healthy;
            }
        }
        self.last_poll = Some(now);
        self.inspect(SystemTime::now(), output_active)
    }

    /// Run both checks against an explicit wall-clock time.
    ///
    /// Either check alone is sufficient to force a reset. A corrupt artifact
    /// is deleted before the verdict is returned so external consumers never
    /// re-read the degenerate image.
    ///
    /// The staleness check only applies while the output chain is live
    /// (`output_active`). The FIFO keeps its old modification time across a
    /// reset, so judging it before this session has started writing would
    /// re-trigger the very reset that just happened, forever.
    pub fn inspect(&self, now: SystemTime, output_active: bool) -> Verdict {
        if let Some(size) = self.corrupt_artifact_size() {
            self.delete_artifact();
            return Verdict::CorruptArtifact { size };
        }

        if output_active {
            if let Some(age) = self.stale_age(now) {
                return Verdict::StaleOutput { age };
            }
        }

        Verdict::Healthy
    }

    /// Reset the poll rate limiter, forcing the next `poll` to inspect.
    pub fn reset(&mut self) {
        self.last_poll = None;
    }

    fn corrupt_artifact_size(&self) -> Option<u64> {
        let size = match std::fs::metadata(&self.artifact) {
            Ok(meta) => meta.len(),
            // Absent artifact means the decoder has not produced one yet.
            Err(_) => return None,
        };

        // Size 0 also means "not yet produced" and is not corrupt.
        if size >= self.config.corrupt_min && size <= self.config.corrupt_max {
            Some(size)
        } else {
            None
        }
    }

    fn stale_age(&self, now: SystemTime) -> Option<Duration> {
        let modified = std::fs::metadata(&self.handoff).ok()?.modified().ok()?;

        // A modification time in the future is clock skew, not staleness.
        let age = now.duration_since(modified).ok()?;

        if age > self.config.stale_after && age < self.config.stale_ceiling {
            Some(age)
        } else {
            None
        }
    }

    fn delete_artifact(&self) {
        match std::fs::remove_file(&self.artifact) {
            Ok(()) => debug!(path = ?self.artifact, "deleted corrupt artifact"),
            Err(err) => warn!(path = ?self.artifact, error = %err, "failed to delete corrupt artifact"),
        }
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact
    }
}
