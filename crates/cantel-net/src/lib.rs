//! Reconnecting TCP client used for both the live telemetry stream and the
//! spill-file uploader.
//!
//! Mirrors `original_source/user_src/tcp_client.cxx`'s
//! init/open_con/reconnect/close_con lifecycle, but readiness is checked
//! with `mio::Poll` instead of a raw `libc::poll` call, matching how the
//! teacher workspace's `flux-network::tcp` module drives non-blocking
//! sockets.
//!
//! `connected` lives behind the same [`Mutex`] as the socket and poll
//! registration so a send attempt and a reconnect can never race: the
//! invariant from the spec is "`connected` is only mutated under the
//! client's own mutex". A best-effort atomic mirror (`connected_hint`) is
//! exposed for the one place the spec explicitly allows a dirty read: the
//! Formatter's fast-path routing check.

mod error;

use std::io::{self, ErrorKind, Write as _};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

pub use error::TcpError;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, warn};

const TOKEN: Token = Token(0);

/// Outcome of a single send attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// The full payload was written to the socket.
    Sent,
    /// The client was not connected; nothing was attempted.
    NotConnected,
    /// Poll succeeded but did not report writability within the timeout.
    NotWritable,
    /// Polling itself failed; the connection has been marked disconnected.
    PollFailed,
    /// A send syscall failed; the connection has been marked disconnected.
    SendFailed,
}

struct Conn {
    stream: mio::net::TcpStream,
    poll: Poll,
    events: Events,
}

struct State {
    conn: Option<Conn>,
    connected: bool,
}

/// A single reconnecting TCP session: live stream (#1) and uploader (#2) each
/// own one independent instance.
pub struct TcpClient {
    addr: SocketAddr,
    nodelay: bool,
    state: Mutex<State>,
    /// Signalled whenever `connected` flips to `false`. The Supervisor waits
    /// on this to know it has work to do.
    pub disconnected: Condvar,
    /// Signalled whenever `connected` flips to `true`. Consumers (the
    /// Uploader) block on this while waiting for a session to come back up.
    pub connected: Condvar,
    connected_hint: AtomicBool,
}

impl TcpClient {
    pub fn new(addr: SocketAddr, nodelay: bool) -> Self {
        Self {
            addr,
            nodelay,
            state: Mutex::new(State { conn: None, connected: false }),
            disconnected: Condvar::new(),
            connected: Condvar::new(),
            connected_hint: AtomicBool::new(false),
        }
    }

    /// Dirty, lock-free read of the connected flag.
    ///
    /// Only the Formatter's fast routing check is allowed to use this; every
    /// other consumer must go through [`TcpClient::send`] or
    /// [`TcpClient::wait_connected`], which read `connected` under the lock.
    #[inline]
    pub fn dirty_is_connected(&self) -> bool {
        self.connected_hint.load(Ordering::Relaxed)
    }

    /// Opens the socket, applies `SO_KEEPALIVE` (always) and `TCP_NODELAY`
    /// (if configured), and registers it with a private poll for readiness
    /// checks. On success `connected` is set to `true` and the connected
    /// condvar is notified.
    pub fn connect(&self, timeout: Duration) -> Result<(), TcpError> {
        let std_stream = std::net::TcpStream::connect_timeout(&self.addr, timeout)
            .map_err(TcpError::Connect)?;
        std_stream.set_nonblocking(true).map_err(TcpError::Socket)?;
        set_keepalive(&std_stream);
        if self.nodelay {
            let _ = std_stream.set_nodelay(true);
        }

        let mut stream = mio::net::TcpStream::from_std(std_stream);
        let poll = Poll::new().map_err(TcpError::Socket)?;
        poll.registry()
            .register(&mut stream, TOKEN, Interest::WRITABLE)
            .map_err(TcpError::Register)?;

        let mut guard = self.state.lock().unwrap();
        guard.conn = Some(Conn { stream, poll, events: Events::with_capacity(4) });
        guard.connected = true;
        self.connected_hint.store(true, Ordering::Relaxed);
        self.connected.notify_all();
        Ok(())
    }

    /// `close_con(); init(); open_con()` from the original client.
    pub fn reconnect(&self, timeout: Duration) -> Result<(), TcpError> {
        self.close();
        self.connect(timeout)
    }

    /// Tears down the socket. Idempotent.
    pub fn close(&self) {
        let mut guard = self.state.lock().unwrap();
        if let Some(mut conn) = guard.conn.take() {
            let _ = conn.poll.registry().deregister(&mut conn.stream);
            let _ = conn.stream.shutdown(std::net::Shutdown::Both);
        }
        guard.connected = false;
        self.connected_hint.store(false, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    /// Blocks until `connected` is true or `terminate` fires, waking at most
    /// every `poll_interval` to re-check termination. Returns `false` if
    /// termination won the race.
    pub fn wait_connected(
        &self,
        poll_interval: Duration,
        mut should_stop: impl FnMut() -> bool,
    ) -> bool {
        let mut guard = self.state.lock().unwrap();
        while !guard.connected {
            if should_stop() {
                return false;
            }
            let (g, _timeout) = self.connected.wait_timeout(guard, poll_interval).unwrap();
            guard = g;
        }
        true
    }

    /// Polls for writability with `poll_timeout` and, if writable, sends
    /// `payload` in a loop until every byte is written.
    ///
    /// On any I/O failure (poll error or send error) `connected` is flipped
    /// to `false` under the same lock and [`TcpClient::disconnected`] is
    /// notified, matching the spec's "`connected` only set false by an owner
    /// who observed I/O failure, under that client's mutex" invariant.
    pub fn send(&self, payload: &[u8], poll_timeout: Duration) -> SendOutcome {
        let mut guard = self.state.lock().unwrap();
        if !guard.connected {
            return SendOutcome::NotConnected;
        }
        let Some(conn) = guard.conn.as_mut() else {
            guard.connected = false;
            self.connected_hint.store(false, Ordering::Relaxed);
            return SendOutcome::NotConnected;
        };

        match conn.poll.poll(&mut conn.events, Some(poll_timeout)) {
            Ok(()) => {}
            Err(err) => {
                warn!(?err, "tcp: poll failed, marking disconnected");
                guard.connected = false;
                self.connected_hint.store(false, Ordering::Relaxed);
                self.disconnected.notify_all();
                return SendOutcome::PollFailed;
            }
        }

        let writable = conn.events.iter().any(|e| e.token() == TOKEN && e.is_writable());
        if !writable {
            return SendOutcome::NotWritable;
        }

        let mut sent = 0usize;
        while sent < payload.len() {
            match conn.stream.write(&payload[sent..]) {
                Ok(0) => {
                    warn!("tcp: send returned 0, marking disconnected");
                    guard.connected = false;
                    self.connected_hint.store(false, Ordering::Relaxed);
                    self.disconnected.notify_all();
                    return SendOutcome::SendFailed;
                }
                Ok(n) => sent += n,
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => continue,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(?err, "tcp: send failed, marking disconnected");
                    guard.connected = false;
                    self.connected_hint.store(false, Ordering::Relaxed);
                    self.disconnected.notify_all();
                    return SendOutcome::SendFailed;
                }
            }
        }
        debug!(bytes = payload.len(), "tcp: sent");
        SendOutcome::Sent
    }
}

fn set_keepalive(stream: &std::net::TcpStream) {
    use std::os::fd::AsRawFd;
    let fd = stream.as_raw_fd();
    let enable: libc::c_int = 1;
    unsafe {
        let rc = libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_KEEPALIVE,
            std::ptr::addr_of!(enable).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
        if rc != 0 {
            warn!(err = ?io::Error::last_os_error(), "tcp: could not set SO_KEEPALIVE");
        }
    }
}
