use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::error::{HandshakeError, Result};

/// Magic bytes opening every request: `"1111"`.
pub const MAGIC: [u8; 4] = [0x31, 0x31, 0x31, 0x31];

/// Request header: magic (4) + payload length (4B LE) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Announce payload length in bytes.
pub const ANNOUNCE_PAYLOAD_LEN: usize = 136;
/// Negotiate payload length in bytes.
pub const NEGOTIATE_PAYLOAD_LEN: usize = 40;
/// Channel-select payload length in bytes.
pub const SELECT_PAYLOAD_LEN: usize = 52;

/// Number of channel indices the protocol defines selectors for.
pub const DEFINED_CHANNELS: usize = 3;

/// Username slot inside the announce payload.
const USERNAME_OFFSET: usize = 24;
const USERNAME_FIELD_LEN: usize = 36;
/// Password slot inside the announce payload.
const PASSWORD_OFFSET: usize = 60;
const PASSWORD_FIELD_LEN: usize = 64;

/// Selector field offset inside the channel-select payload.
const SELECTOR_OFFSET: usize = 28;

/// Selector values keyed by channel index. The server expects a one-hot
/// mask, not the raw index; indices outside this table are undefined.
const SELECTORS: [u32; DEFINED_CHANNELS] = [0x01, 0x02, 0x04];

/// Announce payload template with zeroed credential slots.
///
/// Captured from the reference deployment. The trailing twelve bytes are an
/// opaque session cookie the server requires verbatim.
const ANNOUNCE_TEMPLATE: [u8; ANNOUNCE_PAYLOAD_LEN] = [
    0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x78, 0x00, 0x00, 0x00, //
    0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // username[0..8]
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // password[0..4]
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0xcd, 0xb8, 0x12, 0x7a, //
    0x3a, 0x76, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, //
];

/// Negotiate payload. Fixed capability list; never varies.
const NEGOTIATE_TEMPLATE: [u8; NEGOTIATE_PAYLOAD_LEN] = [
    0x03, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x18, 0x00, 0x00, 0x00, //
    0x01, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x02, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x03, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
];

/// Channel-select payload template with a zeroed selector field.
const SELECT_TEMPLATE: [u8; SELECT_PAYLOAD_LEN] = [
    0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x01, 0x00, 0x00, 0x00, 0x24, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // selector at 28
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, //
];

/// Static login credentials embedded in the announce message.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "kathryn".to_string(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field(
                "password",
                &format_args!("<redacted:{} bytes>", self.password.len()),
            )
            .finish()
    }
}

impl Credentials {
    /// Check that both fields fit their fixed slots in the announce payload.
    pub fn validate(&self) -> Result<()> {
        if self.username.len() > USERNAME_FIELD_LEN {
            return Err(HandshakeError::CredentialTooLong {
                field: "username",
                len: self.username.len(),
                max: USERNAME_FIELD_LEN,
            });
        }
        if self.password.len() > PASSWORD_FIELD_LEN {
            return Err(HandshakeError::CredentialTooLong {
                field: "password",
                len: self.password.len(),
                max: PASSWORD_FIELD_LEN,
            });
        }
        Ok(())
    }
}

/// Look up the wire selector for a channel index.
///
/// Only indices `0..DEFINED_CHANNELS` exist on the wire; anything else is a
/// typed error rather than a silent fallthrough.
pub fn selector_for(channel: usize) -> Result<u32> {
    SELECTORS
        .get(channel)
        .copied()
        .ok_or(HandshakeError::UndefinedChannel(channel))
}

fn put_header(dst: &mut BytesMut, payload_len: usize) {
    dst.reserve(HEADER_SIZE + payload_len);
    dst.put_slice(&MAGIC);
    dst.put_u32_le(payload_len as u32);
}

/// Encode the announce message with credentials patched into their slots.
pub fn encode_announce(credentials: &Credentials, dst: &mut BytesMut) -> Result<()> {
    credentials.validate()?;

    let mut payload = ANNOUNCE_TEMPLATE;
    let user = credentials.username.as_bytes();
    let pass = credentials.password.as_bytes();
    payload[USERNAME_OFFSET..USERNAME_OFFSET + user.len()].copy_from_slice(user);
    payload[PASSWORD_OFFSET..PASSWORD_OFFSET + pass.len()].copy_from_slice(pass);

    put_header(dst, ANNOUNCE_PAYLOAD_LEN);
    dst.put_slice(&payload);
    Ok(())
}

/// Encode the capability negotiation message.
pub fn encode_negotiate(dst: &mut BytesMut) {
    put_header(dst, NEGOTIATE_PAYLOAD_LEN);
    dst.put_slice(&NEGOTIATE_TEMPLATE);
}

/// Encode the channel-select message for a channel index.
pub fn encode_channel_select(channel: usize, dst: &mut BytesMut) -> Result<()> {
    let selector = selector_for(channel)?;

    let mut payload = SELECT_TEMPLATE;
    payload[SELECTOR_OFFSET..SELECTOR_OFFSET + 4].copy_from_slice(&selector.to_le_bytes());

    put_header(dst, SELECT_PAYLOAD_LEN);
    dst.put_slice(&payload);
    Ok(())
}
