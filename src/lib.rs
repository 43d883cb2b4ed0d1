//! # QuizzleNet
//!
//! LAN word-duel server. Clients log in over one long-lived TCP connection,
//! manage friends and scores, and challenge each other to timed
//! Italian-to-English translation duels negotiated over UDP and played on a
//! private per-match TCP rendezvous.
//!
//! ## Features
//!
//! - **Reactor**: one thread demultiplexing the TCP listener, the UDP
//!   discovery socket and every client connection
//! - **Worker pool**: bounded pool running per-command tasks off the
//!   reactor's critical path
//! - **Mailman**: a single consumer draining the outbound mail depot, which
//!   serialises per-connection output and re-arms read interest
//! - **Match sessions**: UDP invitation with a hard timeout, dual TCP join,
//!   per-turn word delivery, crash detection, deadline-bounded scoring
//! - **Persistent store**: JSON-snapshot user database (friends and scores)
//!   written through on every mutation
//!
//! ## Example
//!
//! ```rust,ignore
//! use quizzlenet::ServerBuilder;
//!
//! let server = ServerBuilder::new()
//!     .tcp_port(7777)
//!     .udp_port(7778)
//!     .num_words(5)
//!     .build()?;
//! server.run()?;
//! ```

pub mod connection;
pub mod depot;
pub mod error;
pub mod match_session;
pub mod pool;
pub mod presence;
pub mod protocol;
pub mod reactor;
pub mod registration;
pub mod server;
pub mod store;
pub mod tasks;
pub mod words;

// Re-exports
pub use error::{QuizzleError, Result};
pub use protocol::Request;
pub use server::{Server, ServerBuilder, ServerConfig};
pub use store::{pwd_hash, User, UserStore};
pub use words::Translator;
