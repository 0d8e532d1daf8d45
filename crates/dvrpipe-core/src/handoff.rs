//! Per-channel hand-off FIFO.
//!
//! The received stream is bridged to the external decoder through a named
//! pipe at a deterministic, channel-indexed path. The writer side is opened
//! lazily and non-blocking: until the decoder attaches as a reader the open
//! fails benignly and chunks are dropped. Writes never block the streaming
//! loop; a slow reader loses data rather than stalling the connection.

use std::fs::File;
use std::io::{ErrorKind, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::HandoffError;

/// FIFO permission mode, matching the historical deployment.
const FIFO_MODE: libc::mode_t = 0o664;

/// Poll interval while waiting for a reader to attach.
const OPEN_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Outcome of a single non-blocking chunk write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The chunk was handed to the pipe.
    Written,
    /// The pipe is full or has no writer yet; the chunk was discarded.
    Dropped,
    /// The reader disappeared; the writer has been closed.
    ReaderGone,
}

/// One channel's byte sink: a named pipe plus its lazily opened writer.
///
/// At most one instance exists per channel at any time.
#[derive(Debug)]
pub struct HandoffChannel {
    path: PathBuf,
    writer: Option<File>,
}

impl HandoffChannel {
    /// Ensure the FIFO exists at `path`. An existing FIFO is reused; an
    /// existing non-FIFO path is an error and is never removed.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, HandoffError> {
        let path = path.into();

        if path.exists() {
            let metadata =
                std::fs::symlink_metadata(&path).map_err(|source| HandoffError::Create {
                    path: path.clone(),
                    source,
                })?;
            if !metadata.file_type().is_fifo() {
                return Err(HandoffError::NotAFifo { path });
            }
            debug!(?path, "reusing existing fifo");
            return Ok(Self { path, writer: None });
        }

        let cpath = std::ffi::CString::new(path.as_os_str().as_bytes()).map_err(|_| {
            HandoffError::Create {
                path: path.clone(),
                source: std::io::Error::from(ErrorKind::InvalidInput),
            }
        })?;

        // EEXIST is fine: another instance of this channel raced us, which
        // still leaves a usable fifo behind.
        if unsafe { libc::mkfifo(cpath.as_ptr(), FIFO_MODE) } != 0 {
            let source = std::io::Error::last_os_error();
            if source.raw_os_error() != Some(libc::EEXIST) {
                return Err(HandoffError::Create { path, source });
            }
        }

        info!(?path, "created hand-off fifo");
        Ok(Self { path, writer: None })
    }

    /// Try to open the writer side, waiting up to `wait` for a reader.
    ///
    /// Returns `Ok(false)` when no reader attached within the window. The
    /// open is `O_NONBLOCK` so an attached reader is required; a freshly
    /// spawned decoder may need a moment to get there.
    pub fn open_writer(&mut self, wait: Duration) -> Result<bool, HandoffError> {
        if self.writer.is_some() {
            return Ok(true);
        }

        let deadline = Instant::now() + wait;
        loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(&self.path)
            {
                Ok(file) => {
                    debug!(path = ?self.path, "fifo writer opened");
                    self.writer = Some(file);
                    return Ok(true);
                }
                // ENXIO: no reader on the other end yet.
                Err(err) if err.raw_os_error() == Some(libc::ENXIO) => {
                    if Instant::now() >= deadline {
                        return Ok(false);
                    }
                    std::thread::sleep(OPEN_RETRY_INTERVAL);
                }
                Err(source) => {
                    return Err(HandoffError::Open {
                        path: self.path.clone(),
                        source,
                    })
                }
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Write one chunk without blocking.
    pub fn write_chunk(&mut self, chunk: &[u8]) -> WriteOutcome {
        let Some(writer) = self.writer.as_mut() else {
            return WriteOutcome::Dropped;
        };

        loop {
            match writer.write(chunk) {
                Ok(_) => return WriteOutcome::Written,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    // Reader not keeping up; favor the live connection over
                    // lossless delivery and discard the chunk.
                    return WriteOutcome::Dropped;
                }
                Err(err) => {
                    warn!(path = ?self.path, error = %err, "fifo reader gone");
                    self.writer = None;
                    return WriteOutcome::ReaderGone;
                }
            }
        }
    }

    /// Close the writer side, leaving the FIFO on disk for reuse.
    pub fn close_writer(&mut self) {
        if self.writer.take().is_some() {
            debug!(path = ?self.path, "fifo writer closed");
        }
    }

    /// Remove the FIFO from the filesystem (terminate path).
    pub fn unlink(mut self) {
        self.close_writer();
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                warn!(path = ?self.path, error = %err, "failed to unlink fifo");
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
