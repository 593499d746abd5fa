//! UDP link to the remote autopilot process.
//!
//! The socket is exclusively owned by the step controller; dropping the
//! `Transport` is the only way the session releases it. Receive is the sole
//! blocking point in the plugin and is always bounded by a timeout.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use sitl_protocol::{decode_command, encode_state, FrameError, MAX_COMMAND_FRAME_LEN};
use sitl_schema::{ActuatorCommand, StateSnapshot};

/// Errors on the autopilot link.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No reply within the deadline. The caller reuses the last command.
    #[error("receive timed out")]
    Timeout,

    /// Socket-level failure or ICMP-reported peer loss. The caller drops
    /// the transport and enters reconnect backoff.
    #[error("link lost: {0}")]
    Disconnected(#[source] std::io::Error),

    /// Undecodable datagram. Treated like a timeout: the frame is dropped
    /// and the last command stays in effect.
    #[error("malformed frame: {0}")]
    Malformed(#[from] FrameError),
}

/// Bound UDP socket connected to the autopilot address.
pub struct Transport {
    socket: UdpSocket,
    remote: SocketAddr,
}

impl Transport {
    /// Bind locally and associate the socket with the autopilot address.
    ///
    /// UDP "connect" only fixes the peer address; actual reachability shows
    /// up on the first send/receive.
    pub fn open(bind: SocketAddr, remote: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(bind).map_err(TransportError::Disconnected)?;
        socket
            .connect(remote)
            .map_err(TransportError::Disconnected)?;
        Ok(Transport { socket, remote })
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }

    /// Send one state frame. Never blocks: a full send buffer drops the
    /// frame (the next tick produces a fresher one anyway).
    pub fn send(&self, snap: &StateSnapshot) -> Result<(), TransportError> {
        let frame = encode_state(snap);
        match self.socket.send(&frame) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(TransportError::Disconnected(e)),
        }
    }

    /// Block up to `timeout` for one command frame.
    pub fn receive(&self, timeout: Duration) -> Result<ActuatorCommand, TransportError> {
        // A zero timeout would mean "block forever" to the OS.
        let timeout = timeout.max(Duration::from_millis(1));
        self.socket
            .set_read_timeout(Some(timeout))
            .map_err(TransportError::Disconnected)?;

        let mut buf = [0u8; MAX_COMMAND_FRAME_LEN];
        match self.socket.recv(&mut buf) {
            Ok(n) => Ok(decode_command(&buf[..n])?),
            Err(e) if is_timeout(&e) => Err(TransportError::Timeout),
            Err(e) => Err(TransportError::Disconnected(e)),
        }
    }

    /// Drain all pending datagrams without blocking and return the newest
    /// decodable command, if any. Malformed frames in the backlog are
    /// skipped and counted.
    pub fn poll_receive(&self) -> Result<PollResult, TransportError> {
        self.socket
            .set_nonblocking(true)
            .map_err(TransportError::Disconnected)?;
        let result = self.drain();
        // Restore blocking mode regardless of the drain outcome.
        let restore = self.socket.set_nonblocking(false);
        let polled = result?;
        restore.map_err(TransportError::Disconnected)?;
        Ok(polled)
    }

    fn drain(&self) -> Result<PollResult, TransportError> {
        let mut newest = None;
        let mut dropped = 0usize;
        let mut buf = [0u8; MAX_COMMAND_FRAME_LEN];
        loop {
            match self.socket.recv(&mut buf) {
                Ok(n) => match decode_command(&buf[..n]) {
                    Ok(cmd) => newest = Some(cmd),
                    Err(_) => dropped += 1,
                },
                Err(e) if is_timeout(&e) => break,
                Err(e) => return Err(TransportError::Disconnected(e)),
            }
        }
        Ok(PollResult { newest, dropped })
    }
}

/// Outcome of a non-blocking drain.
pub struct PollResult {
    /// Most recent decodable command in the backlog.
    pub newest: Option<ActuatorCommand>,
    /// Number of malformed frames skipped.
    pub dropped: usize,
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}
