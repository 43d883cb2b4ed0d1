//! Outbound mail and its Mailman.
//!
//! Tasks never write the control connection themselves; they enqueue a
//! `Mail` and the single Mailman thread delivers it. That makes re-arming
//! read interest a one-thread affair and gives per-connection FIFO output
//! for free: the depot is FIFO and a connection never has more than one
//! outstanding task.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionRegistry};
use crate::protocol::LOGOUT_OK;

/// One pending outbound write. Created by a task, consumed exactly once.
/// The destination connection must be read-disabled when this is enqueued.
pub struct Mail {
    pub conn: Arc<Connection>,
    pub payload: Vec<u8>,
}

impl Mail {
    pub fn new(conn: Arc<Connection>, text: impl Into<String>) -> Self {
        Self {
            conn,
            payload: text.into().into_bytes(),
        }
    }
}

/// Producer handle to the mail depot.
#[derive(Clone)]
pub struct Depot {
    tx: Sender<Mail>,
}

impl Depot {
    pub fn new() -> (Self, Receiver<Mail>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }

    pub fn post(&self, conn: Arc<Connection>, text: impl Into<String>) {
        // Send only fails when the Mailman is gone, i.e. at teardown.
        let _ = self.tx.send(Mail::new(conn, text));
    }
}

/// Spawn the Mailman consumer thread.
pub fn spawn_mailman(rx: Receiver<Mail>, registry: Arc<ConnectionRegistry>) -> JoinHandle<()> {
    thread::spawn(move || {
        while let Ok(mail) = rx.recv() {
            deliver(&mail, &registry);
        }
        debug!("mail depot closed, mailman done");
    })
}

fn deliver(mail: &Mail, registry: &ConnectionRegistry) {
    if let Err(e) = mail.conn.write_all_blocking(&mail.payload) {
        warn!("mail delivery to connection {} failed: {}", mail.conn.id(), e);
    }
    if mail.payload == LOGOUT_OK.as_bytes() {
        mail.conn.close();
        registry.remove(mail.conn.id());
    } else {
        mail.conn.arm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::{TcpListener, TcpStream};
    use std::time::Duration;

    fn registered_conn(registry: &ConnectionRegistry) -> (TcpStream, Arc<Connection>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server_side, peer) = listener.accept().unwrap();
        let conn = registry.add(server_side, peer).unwrap();
        (client, conn)
    }

    #[test]
    fn test_mailman_delivers_and_rearms() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (mut client, conn) = registered_conn(&registry);
        let (depot, rx) = Depot::new();
        let _mailman = spawn_mailman(rx, Arc::clone(&registry));

        conn.disarm();
        depot.post(Arc::clone(&conn), "Login successful.\n");

        let mut buf = [0u8; 64];
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let n = client.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"Login successful.\n");

        // The Mailman re-armed the connection after writing.
        for _ in 0..100 {
            if conn.is_armed() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(conn.is_armed());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_mailman_closes_on_logout_sentinel() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (mut client, conn) = registered_conn(&registry);
        let (depot, rx) = Depot::new();
        let _mailman = spawn_mailman(rx, Arc::clone(&registry));

        conn.disarm();
        depot.post(Arc::clone(&conn), LOGOUT_OK);

        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut text = String::new();
        client.read_to_string(&mut text).unwrap();
        assert_eq!(text, LOGOUT_OK);

        for _ in 0..100 {
            if registry.count() == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(registry.count(), 0);
        assert!(conn.is_closed());
    }

    #[test]
    fn test_per_connection_fifo() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (mut client, conn) = registered_conn(&registry);
        let (depot, rx) = Depot::new();
        let _mailman = spawn_mailman(rx, Arc::clone(&registry));

        conn.disarm();
        depot.post(Arc::clone(&conn), "first\n");
        depot.post(Arc::clone(&conn), "second\n");
        depot.post(Arc::clone(&conn), "third\n");

        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut collected = Vec::new();
        let mut buf = [0u8; 64];
        while collected.len() < 19 {
            let n = client.read(&mut buf).unwrap();
            collected.extend_from_slice(&buf[..n]);
        }
        assert_eq!(collected, b"first\nsecond\nthird\n");
    }
}
