//! Wire codec and login handshake for the DVR media port protocol.
//!
//! The media port speaks a fixed three-message binary login sequence. Each
//! message is an 8-byte header (`"1111"` magic + little-endian payload
//! length) followed by a fixed-shape payload:
//!
//! - [`encode_announce`] — credentials announcement (136-byte payload)
//! - [`encode_negotiate`] — capability negotiation (40-byte payload)
//! - [`encode_channel_select`] — stream selection (52-byte payload, varies
//!   only in a 4-byte selector field)
//!
//! [`perform_handshake`] drives the full exchange over any `Read + Write`
//! stream. It is stateless and never retries; retry policy belongs to the
//! session layer.

pub mod codec;
pub mod error;
pub mod handshake;

pub use codec::{
    encode_announce, encode_channel_select, encode_negotiate, selector_for, Credentials,
    ANNOUNCE_PAYLOAD_LEN, DEFINED_CHANNELS, HEADER_SIZE, MAGIC, NEGOTIATE_PAYLOAD_LEN,
    SELECT_PAYLOAD_LEN,
};
pub use error::{HandshakeError, Result, Stage};
pub use handshake::{perform_handshake, ACK_BUFFER_SIZE};
