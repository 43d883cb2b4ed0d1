//! Online-user tracking.
//!
//! Two views over the same population: `online` keys logged-in users by the
//! remote ephemeral port of their control connection, `match_book` keys them
//! by nickname and records the UDP address match invitations go to. Login
//! and logout update both together, so a user is in both maps or in neither.

use std::net::SocketAddr;

use dashmap::DashMap;

pub struct Presence {
    online: DashMap<u16, String>,
    match_book: DashMap<String, SocketAddr>,
}

impl Presence {
    pub fn new() -> Self {
        Self {
            online: DashMap::new(),
            match_book: DashMap::new(),
        }
    }

    /// Record a successful login.
    pub fn login(&self, port: u16, nickname: &str, invite_addr: SocketAddr) {
        self.online.insert(port, nickname.to_string());
        self.match_book.insert(nickname.to_string(), invite_addr);
    }

    /// Remove whatever is bound to `port`, returning the nickname that was
    /// logged in there. Absent entries are a no-op.
    pub fn logout_port(&self, port: u16) -> Option<String> {
        let (_, nickname) = self.online.remove(&port)?;
        self.match_book.remove(&nickname);
        Some(nickname)
    }

    pub fn nickname_for(&self, port: u16) -> Option<String> {
        self.online.get(&port).map(|r| r.clone())
    }

    pub fn port_bound(&self, port: u16) -> bool {
        self.online.contains_key(&port)
    }

    /// A user is online iff it has a match-book entry.
    pub fn is_online(&self, nickname: &str) -> bool {
        self.match_book.contains_key(nickname)
    }

    pub fn invite_addr(&self, nickname: &str) -> Option<SocketAddr> {
        self.match_book.get(nickname).map(|r| *r)
    }

    pub fn online_count(&self) -> usize {
        self.online.len()
    }
}

impl Default for Presence {
    fn default() -> Self {
        Self::new()
    }
}
