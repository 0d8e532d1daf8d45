//! One socket connection's lifecycle.
//!
//! A session moves `Disconnected → Connecting → Authenticating → Streaming →
//! Closing → Disconnected` and never outlives one connect/stream cycle of
//! its worker. There is at most one live session per channel; the worker
//! enforces that by construction, owning exactly one `Session` at a time.

use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use dvrpipe_proto::{perform_handshake, Credentials};
use tracing::{debug, warn};

use crate::error::SessionError;

/// Default receive timeout applied to the socket after connect.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);
/// Default connect attempt bound.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Size of one streaming read.
pub const DEFAULT_CHUNK_SIZE: usize = 2048;

/// Connection parameters shared by every session of a channel.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Resolved media server address.
    pub server: SocketAddr,
    /// Bound on a single connect attempt.
    pub connect_timeout: Duration,
    /// Socket receive timeout; also the worker's control poll latency bound.
    pub read_timeout: Duration,
}

impl SessionConfig {
    pub fn new(server: SocketAddr) -> Self {
        Self {
            server,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Streaming,
    Closing,
}

impl SessionState {
    fn name(self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::Streaming => "streaming",
            SessionState::Closing => "closing",
        }
    }
}

/// Outcome of one streaming read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEvent {
    /// `n` bytes landed in the buffer.
    Data(usize),
    /// The receive timeout elapsed with no data. Not an error and not
    /// peer-close; it is the loop's safe point for control and health polls.
    TimedOut,
    /// The server closed the connection (zero-byte read).
    Closed,
}

/// An established connection to the media server for one channel.
#[derive(Debug)]
pub struct Session {
    stream: TcpStream,
    state: SessionState,
    last_activity: Instant,
}

impl Session {
    /// Open and prepare a socket: bounded connect, receive timeout, Nagle
    /// off, linger off. The returned session is ready to authenticate.
    pub fn connect(config: &SessionConfig) -> Result<Self, SessionError> {
        let stream = TcpStream::connect_timeout(&config.server, config.connect_timeout).map_err(
            |source| SessionError::Connect {
                addr: config.server,
                source,
            },
        )?;

        stream
            .set_read_timeout(Some(config.read_timeout))
            .map_err(SessionError::Socket)?;
        stream.set_nodelay(true).map_err(SessionError::Socket)?;
        // Linger is best-effort, like the rest of the socket tuning in the
        // field: a failure is reported but does not abort the connect.
        if let Err(err) = disable_linger(&stream) {
            warn!(error = %err, "failed to disable linger");
        }

        debug!(server = %config.server, "connected");
        Ok(Self {
            stream,
            state: SessionState::Authenticating,
            last_activity: Instant::now(),
        })
    }

    /// Run the login handshake. Success is the only path into `Streaming`.
    pub fn authenticate(
        &mut self,
        channel: usize,
        credentials: &Credentials,
    ) -> Result<(), SessionError> {
        self.expect_state(SessionState::Authenticating)?;
        perform_handshake(&mut self.stream, channel, credentials)?;
        self.state = SessionState::Streaming;
        self.last_activity = Instant::now();
        Ok(())
    }

    /// Read one chunk from the stream.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> Result<ReadEvent, SessionError> {
        self.expect_state(SessionState::Streaming)?;

        loop {
            match self.stream.read(buf) {
                Ok(0) => return Ok(ReadEvent::Closed),
                Ok(n) => {
                    self.last_activity = Instant::now();
                    return Ok(ReadEvent::Data(n));
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
                {
                    return Ok(ReadEvent::TimedOut)
                }
                Err(source) => return Err(SessionError::Read(source)),
            }
        }
    }

    /// Release the socket. Consumes the session; the next connect attempt
    /// starts a fresh one, so session lifetimes can never overlap.
    pub fn close(mut self) {
        self.state = SessionState::Closing;
        debug!("session closed");
        // Dropping the stream closes the socket; linger is off, so this
        // never blocks the teardown path.
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Time since the last successful read (or since the handshake).
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    fn expect_state(&self, expected: SessionState) -> Result<(), SessionError> {
        if self.state != expected {
            return Err(SessionError::InvalidState {
                expected: expected.name(),
                actual: self.state.name(),
            });
        }
        Ok(())
    }
}

#[cfg(unix)]
fn disable_linger(stream: &TcpStream) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let linger = libc::linger {
        l_onoff: 0,
        l_linger: 0,
    };
    let rc = unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_LINGER,
            std::ptr::addr_of!(linger).cast(),
            std::mem::size_of::<libc::linger>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn disable_linger(_stream: &TcpStream) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use dvrpipe_proto::{
        ANNOUNCE_PAYLOAD_LEN, HEADER_SIZE, NEGOTIATE_PAYLOAD_LEN, SELECT_PAYLOAD_LEN,
    };

    use super::*;

    const LOGIN_LEN: usize = 2 * HEADER_SIZE + ANNOUNCE_PAYLOAD_LEN + NEGOTIATE_PAYLOAD_LEN;
    const SELECT_LEN: usize = HEADER_SIZE + SELECT_PAYLOAD_LEN;

    fn local_listener() -> (TcpListener, SessionConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
        let addr = listener.local_addr().expect("listener should have an addr");
        let mut config = SessionConfig::new(addr);
        config.read_timeout = Duration::from_millis(200);
        (listener, config)
    }

    /// Consume the two login messages, send two acks, consume the select.
    fn serve_handshake(stream: &mut std::net::TcpStream) {
        let mut buf = vec![0u8; LOGIN_LEN];
        stream.read_exact(&mut buf).expect("should read login");
        stream.write_all(&[0u8; 16]).expect("should send ack 1");
        // Keep the acks in separate segments so the client sees two reads.
        thread::sleep(Duration::from_millis(50));
        stream.write_all(&[0u8; 16]).expect("should send ack 2");
        let mut select = vec![0u8; SELECT_LEN];
        stream.read_exact(&mut select).expect("should read select");
    }

    #[test]
    fn connect_failure_is_reported() {
        // Bind then drop to get a port that refuses connections.
        let (listener, config) = local_listener();
        drop(listener);

        let err = Session::connect(&config).unwrap_err();
        assert!(matches!(err, SessionError::Connect { .. }));
    }

    #[test]
    fn streaming_requires_successful_handshake() {
        let (listener, config) = local_listener();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("should accept");
            serve_handshake(&mut stream);
            stream.write_all(b"payload").expect("should stream");
        });

        let mut session = Session::connect(&config).unwrap();
        assert_eq!(session.state(), SessionState::Authenticating);

        // Reading before authenticating is a state error, per the
        // handshake-precedes-streaming ordering guarantee.
        let mut buf = [0u8; 64];
        assert!(matches!(
            session.read_chunk(&mut buf),
            Err(SessionError::InvalidState { .. })
        ));

        session.authenticate(0, &Credentials::default()).unwrap();
        assert_eq!(session.state(), SessionState::Streaming);

        assert_eq!(session.read_chunk(&mut buf).unwrap(), ReadEvent::Data(7));
        assert_eq!(&buf[..7], b"payload");

        server.join().expect("server thread should complete");
    }

    #[test]
    fn peer_close_yields_closed_event() {
        let (listener, config) = local_listener();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("should accept");
            serve_handshake(&mut stream);
            // Close right after the handshake.
        });

        let mut session = Session::connect(&config).unwrap();
        session.authenticate(1, &Credentials::default()).unwrap();
        server.join().expect("server thread should complete");

        let mut buf = [0u8; 64];
        assert_eq!(session.read_chunk(&mut buf).unwrap(), ReadEvent::Closed);
    }

    #[test]
    fn silent_server_yields_timeout_event() {
        let (listener, config) = local_listener();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("should accept");
            serve_handshake(&mut stream);
            thread::sleep(Duration::from_millis(600));
        });

        let mut session = Session::connect(&config).unwrap();
        session.authenticate(2, &Credentials::default()).unwrap();

        let mut buf = [0u8; 64];
        let started = Instant::now();
        assert_eq!(session.read_chunk(&mut buf).unwrap(), ReadEvent::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(150));

        server.join().expect("server thread should complete");
    }

    #[test]
    fn handshake_failure_never_reaches_streaming() {
        let (listener, config) = local_listener();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("should accept");
            let mut buf = vec![0u8; LOGIN_LEN];
            stream.read_exact(&mut buf).expect("should read login");
            // Close instead of acking.
        });

        let mut session = Session::connect(&config).unwrap();
        let err = session.authenticate(0, &Credentials::default()).unwrap_err();
        assert!(matches!(err, SessionError::Handshake(_)));
        assert_eq!(session.state(), SessionState::Authenticating);

        server.join().expect("server thread should complete");
    }
}
