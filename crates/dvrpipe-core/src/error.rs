use std::net::SocketAddr;
use std::path::PathBuf;

use dvrpipe_proto::HandshakeError;

/// Errors raised while managing the hand-off FIFO.
#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    /// Failed to create the FIFO at the channel path.
    #[error("failed to create fifo at {path}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The path exists but is not a FIFO. Never removed; the operator has to
    /// resolve the collision.
    #[error("existing path is not a fifo: {path}")]
    NotAFifo { path: PathBuf },

    /// Failed to open the FIFO writer.
    #[error("failed to open fifo writer at {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors raised while launching or stopping the external decoder.
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    /// The command template rendered to an empty string.
    #[error("decoder command template is empty")]
    EmptyTemplate,

    /// Spawning the decoder subprocess failed.
    #[error("failed to spawn decoder: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Errors raised by one connection's lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Connecting to the media server failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Applying a socket option failed.
    #[error("socket setup failed: {0}")]
    Socket(#[source] std::io::Error),

    /// The login handshake failed.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// A hard read error occurred while streaming.
    #[error("stream read failed: {0}")]
    Read(#[source] std::io::Error),

    /// The operation is not valid in the session's current state.
    #[error("invalid session state: expected {expected}, got {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
}

/// Errors raised by worker supervision.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// Spawning a worker thread failed.
    #[error("failed to spawn worker for channel {channel}: {source}")]
    Spawn {
        channel: usize,
        source: std::io::Error,
    },
}
