//! Registration endpoint.
//!
//! A synchronous RPC on the well-known registry port. One request line
//! `REGISTRATION <username> <password>`, one response line from a fixed set
//! of four strings; that response set is the whole wire contract.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{info, warn};

use crate::error::Result;
use crate::store::UserStore;

/// Well-known registry port.
pub const REGISTRY_PORT: u16 = 5678;

/// Service name the request line must carry.
pub const SERVICE_NAME: &str = "REGISTRATION";

pub const OK: &str = "Registration succeeded.";
pub const INVALID_USERNAME: &str = "Invalid username.";
pub const INVALID_PASSWORD: &str = "Invalid password.";
pub const NICKNAME_TAKEN: &str = "Nickname already taken.";

/// Bind the registry listener and spawn its accept loop. Bind failure is
/// fatal at startup, so it surfaces here rather than inside the thread.
pub fn spawn(port: u16, store: Arc<UserStore>) -> Result<JoinHandle<()>> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    info!("registration endpoint listening on port {}", port);
    Ok(thread::spawn(move || {
        for incoming in listener.incoming() {
            match incoming {
                Ok(stream) => {
                    let store = Arc::clone(&store);
                    let _handler = thread::spawn(move || {
                        if let Err(e) = handle(stream, &store) {
                            warn!("registration request failed: {}", e);
                        }
                    });
                }
                Err(e) => warn!("registration accept failed: {}", e),
            }
        }
    }))
}

fn handle(stream: TcpStream, store: &UserStore) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    let reply = respond(store, line.trim());

    let mut stream = stream;
    stream.write_all(reply.as_bytes())?;
    stream.write_all(b"\n")?;
    Ok(())
}

/// Answer one request line.
pub fn respond(store: &UserStore, line: &str) -> &'static str {
    let mut parts = line.split_whitespace();
    if parts.next() != Some(SERVICE_NAME) {
        return INVALID_USERNAME;
    }
    let Some(username) = parts.next() else {
        return INVALID_USERNAME;
    };
    let Some(password) = parts.next() else {
        return INVALID_PASSWORD;
    };
    register(store, username, password)
}

/// The single RPC method.
pub fn register(store: &UserStore, username: &str, password: &str) -> &'static str {
    if username.is_empty() {
        return INVALID_USERNAME;
    }
    if password.is_empty() {
        return INVALID_PASSWORD;
    }
    if store.register(username, password) {
        info!("registered new user {}", username);
        OK
    } else {
        NICKNAME_TAKEN
    }
}
