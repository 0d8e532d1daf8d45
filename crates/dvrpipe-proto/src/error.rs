use std::fmt;

/// Stage of the handshake at which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Sending the credentials announcement.
    Announce,
    /// Sending the capability negotiation.
    Negotiate,
    /// Reading one of the two acknowledgement frames.
    AckRead,
    /// Sending the channel selection.
    ChannelSelect,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Announce => "announce",
            Stage::Negotiate => "negotiate",
            Stage::AckRead => "ack read",
            Stage::ChannelSelect => "channel select",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while encoding or performing the handshake.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// I/O error during a handshake stage.
    #[error("{stage} failed: {source}")]
    Io {
        stage: Stage,
        #[source]
        source: std::io::Error,
    },

    /// The server closed the connection mid-handshake.
    #[error("connection closed during {0}")]
    ConnectionClosed(Stage),

    /// The channel index has no selector defined by the protocol.
    #[error("channel {0} has no defined selector (only channels 0-2 are defined)")]
    UndefinedChannel(usize),

    /// A credential field exceeds its fixed slot in the announce payload.
    #[error("{field} too long: {len} bytes (max {max})")]
    CredentialTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

pub type Result<T> = std::result::Result<T, HandshakeError>;
