use std::io::{ErrorKind, Read, Write};

use bytes::BytesMut;
use tracing::{debug, trace};

use crate::codec::{
    encode_announce, encode_channel_select, encode_negotiate, selector_for, Credentials,
};
use crate::error::{HandshakeError, Result, Stage};

/// Upper bound on a single acknowledgement frame read.
pub const ACK_BUFFER_SIZE: usize = 1500;

/// Number of acknowledgement frames the server sends before streaming.
const ACK_COUNT: usize = 2;

/// Drive the fixed three-message login exchange on an established stream.
///
/// Sends announce and negotiate, reads and discards exactly two
/// acknowledgement frames, then sends the channel selection. Returns an
/// error tagged with the failing [`Stage`] on the first send or receive that
/// does not complete. A channel index without a defined selector fails
/// before anything is written.
///
/// No retries happen here; the caller owns reconnect policy.
pub fn perform_handshake<S: Read + Write>(
    stream: &mut S,
    channel: usize,
    credentials: &Credentials,
) -> Result<()> {
    // Reject undefined channels up front rather than after two sends.
    selector_for(channel)?;

    let mut buf = BytesMut::new();
    encode_announce(credentials, &mut buf)?;
    send_stage(stream, Stage::Announce, &buf)?;

    buf.clear();
    encode_negotiate(&mut buf);
    send_stage(stream, Stage::Negotiate, &buf)?;

    let mut ack = [0u8; ACK_BUFFER_SIZE];
    for n in 0..ACK_COUNT {
        let read = read_ack(stream, &mut ack)?;
        trace!(ack = n + 1, bytes = read, "discarded acknowledgement frame");
    }

    buf.clear();
    encode_channel_select(channel, &mut buf)?;
    send_stage(stream, Stage::ChannelSelect, &buf)?;

    debug!(channel, "handshake complete");
    Ok(())
}

fn send_stage<S: Write>(stream: &mut S, stage: Stage, bytes: &[u8]) -> Result<()> {
    stream
        .write_all(bytes)
        .map_err(|source| HandshakeError::Io { stage, source })?;
    stream
        .flush()
        .map_err(|source| HandshakeError::Io { stage, source })
}

fn read_ack<S: Read>(stream: &mut S, buf: &mut [u8]) -> Result<usize> {
    loop {
        match stream.read(buf) {
            Ok(0) => return Err(HandshakeError::ConnectionClosed(Stage::AckRead)),
            Ok(n) => return Ok(n),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(HandshakeError::Io {
                    stage: Stage::AckRead,
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};

    use crate::codec::{
        ANNOUNCE_PAYLOAD_LEN, HEADER_SIZE, NEGOTIATE_PAYLOAD_LEN, SELECT_PAYLOAD_LEN,
    };

    use super::*;

    #[derive(Debug, PartialEq)]
    enum Op {
        Write(usize),
        Read,
    }

    /// Scripted stream recording operation order and written bytes.
    struct MockStream {
        reads: VecDeque<io::Result<Vec<u8>>>,
        writes: Vec<Vec<u8>>,
        ops: Vec<Op>,
        fail_write_at: Option<usize>,
    }

    impl MockStream {
        fn with_acks(count: usize) -> Self {
            let mut reads = VecDeque::new();
            for _ in 0..count {
                reads.push_back(Ok(vec![0xAA; 16]));
            }
            Self {
                reads,
                writes: Vec::new(),
                ops: Vec::new(),
                fail_write_at: None,
            }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.ops.push(Op::Read);
            match self.reads.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(err)) => Err(err),
                None => Ok(0),
            }
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_write_at == Some(self.writes.len()) {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            self.ops.push(Op::Write(buf.len()));
            self.writes.push(buf.to_vec());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn three_sends_two_reads_in_order() {
        for (channel, selector) in [(0usize, 0x01u32), (1, 0x02), (2, 0x04)] {
            let mut stream = MockStream::with_acks(2);
            perform_handshake(&mut stream, channel, &Credentials::default()).unwrap();

            assert_eq!(
                stream.ops,
                vec![
                    Op::Write(HEADER_SIZE + ANNOUNCE_PAYLOAD_LEN),
                    Op::Write(HEADER_SIZE + NEGOTIATE_PAYLOAD_LEN),
                    Op::Read,
                    Op::Read,
                    Op::Write(HEADER_SIZE + SELECT_PAYLOAD_LEN),
                ]
            );

            let select = &stream.writes[2];
            let field =
                u32::from_le_bytes(select[HEADER_SIZE + 28..HEADER_SIZE + 32].try_into().unwrap());
            assert_eq!(field, selector, "channel {channel}");
        }
    }

    #[test]
    fn undefined_channel_sends_nothing() {
        let mut stream = MockStream::with_acks(2);
        let err = perform_handshake(&mut stream, 3, &Credentials::default()).unwrap_err();
        assert!(matches!(err, HandshakeError::UndefinedChannel(3)));
        assert!(stream.writes.is_empty());
        assert!(stream.ops.is_empty());
    }

    #[test]
    fn zero_length_ack_is_connection_closed() {
        // One real ack, then EOF on the second.
        let mut stream = MockStream::with_acks(1);
        let err = perform_handshake(&mut stream, 0, &Credentials::default()).unwrap_err();
        assert!(matches!(
            err,
            HandshakeError::ConnectionClosed(Stage::AckRead)
        ));
        // Both template sends happened, never the channel select.
        assert_eq!(stream.writes.len(), 2);
    }

    #[test]
    fn ack_read_error_tagged_with_stage() {
        let mut stream = MockStream::with_acks(0);
        stream
            .reads
            .push_back(Err(io::Error::from(io::ErrorKind::ConnectionReset)));
        let err = perform_handshake(&mut stream, 1, &Credentials::default()).unwrap_err();
        assert!(matches!(
            err,
            HandshakeError::Io {
                stage: Stage::AckRead,
                ..
            }
        ));
    }

    #[test]
    fn write_failure_tagged_with_announce_stage() {
        let mut stream = MockStream::with_acks(2);
        stream.fail_write_at = Some(0);
        let err = perform_handshake(&mut stream, 0, &Credentials::default()).unwrap_err();
        assert!(matches!(
            err,
            HandshakeError::Io {
                stage: Stage::Announce,
                ..
            }
        ));
    }

    #[test]
    fn interrupted_ack_read_is_retried() {
        let mut stream = MockStream::with_acks(0);
        stream
            .reads
            .push_back(Err(io::Error::from(io::ErrorKind::Interrupted)));
        stream.reads.push_back(Ok(vec![0x01; 8]));
        stream.reads.push_back(Ok(vec![0x02; 8]));
        perform_handshake(&mut stream, 0, &Credentials::default()).unwrap();
    }
}
