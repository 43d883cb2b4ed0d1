//! Client connections and their registry.
//!
//! A `Connection` is the server-side state for one control connection: the
//! non-blocking stream, the peer address (whose ephemeral port identifies
//! the session) and a read-interest flag. While a task for the connection is
//! outstanding the flag is down and the reactor will not read it again; the
//! Mailman (or a match session, for its own connection) raises it back.

use std::io::{ErrorKind, Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::Result;
use crate::protocol;

/// Read buffer size for one reactor wake.
pub const READ_BUFFER_SIZE: usize = 512;

static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

#[inline]
fn next_connection_id() -> u64 {
    CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// What one read pass over a connection produced.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Nothing available right now.
    Idle,
    /// Peer closed or reset the connection.
    Eof,
    /// One complete frame.
    Frame(String),
}

pub struct Connection {
    id: u64,
    peer: SocketAddr,
    stream: Mutex<TcpStream>,
    read_armed: AtomicBool,
    closed: AtomicBool,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            id: next_connection_id(),
            peer,
            stream: Mutex::new(stream),
            read_armed: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Remote ephemeral port; stable for the connection's lifetime and used
    /// as the session key.
    pub fn peer_port(&self) -> u16 {
        self.peer.port()
    }

    pub fn peer_ip(&self) -> IpAddr {
        self.peer.ip()
    }

    pub fn is_armed(&self) -> bool {
        self.read_armed.load(Ordering::Acquire)
    }

    pub fn arm(&self) {
        self.read_armed.store(true, Ordering::Release);
    }

    pub fn disarm(&self) {
        self.read_armed.store(false, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let stream = self.stream.lock();
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Read everything currently available and cut one frame out of it.
    /// An EOF observed anywhere in the pass wins over buffered data: the
    /// peer is gone and the frame would never be answered.
    pub fn poll_read(&self) -> ReadOutcome {
        let mut stream = self.stream.lock();
        let mut collected: Vec<u8> = Vec::new();
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => return ReadOutcome::Eof,
                Ok(n) => collected.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => return ReadOutcome::Eof,
            }
        }
        if collected.is_empty() {
            ReadOutcome::Idle
        } else {
            ReadOutcome::Frame(protocol::frame_text(&collected))
        }
    }

    /// Write the whole payload, retrying until drained.
    pub fn write_all_blocking(&self, payload: &[u8]) -> std::io::Result<()> {
        let mut stream = self.stream.lock();
        let mut written = 0;
        while written < payload.len() {
            match stream.write(&payload[written..]) {
                Ok(0) => return Err(ErrorKind::WriteZero.into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// All live control connections, keyed by connection id.
pub struct ConnectionRegistry {
    conns: DashMap<u64, Arc<Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            conns: DashMap::new(),
        }
    }

    pub fn add(&self, stream: TcpStream, peer: SocketAddr) -> Result<Arc<Connection>> {
        let conn = Arc::new(Connection::new(stream, peer)?);
        self.conns.insert(conn.id(), Arc::clone(&conn));
        Ok(conn)
    }

    pub fn get(&self, id: u64) -> Option<Arc<Connection>> {
        self.conns.get(&id).map(|r| Arc::clone(r.value()))
    }

    pub fn remove(&self, id: u64) -> Option<Arc<Connection>> {
        self.conns.remove(&id).map(|(_, conn)| conn)
    }

    pub fn count(&self) -> usize {
        self.conns.len()
    }

    /// Snapshot of the connections the reactor should read this pass.
    /// Collected first so task dispatch never holds map references.
    pub fn armed(&self) -> Vec<Arc<Connection>> {
        self.conns
            .iter()
            .filter(|r| r.value().is_armed() && !r.value().is_closed())
            .map(|r| Arc::clone(r.value()))
            .collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
