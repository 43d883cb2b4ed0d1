//! User records and snapshot persistence.
//!
//! The store is an in-memory concurrent map persisted as a single JSON
//! document. Every mutating operation snapshots the whole map synchronously,
//! so a caller that got its reply is guaranteed the state it observed has
//! been handed to the filesystem.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::Result;

/// 32-bit polynomial string hash (`h = 31*h + c` over UTF-16 units). Not a
/// security primitive; kept verbatim so existing database files keep
/// validating passwords.
pub fn pwd_hash(password: &str) -> i32 {
    let mut h: i32 = 0;
    for unit in password.encode_utf16() {
        h = h.wrapping_mul(31).wrapping_add(unit as i32);
    }
    h
}

/// A registered user. Created by registration, mutated only by friendship
/// additions and match scoring, never destroyed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub nickname: String,
    #[serde(rename = "pwdHash")]
    pub pwd_hash: i32,
    pub score: i64,
    pub friends: Vec<String>,
}

impl User {
    pub fn new(nickname: impl Into<String>, pwd_hash: i32) -> Self {
        Self {
            nickname: nickname.into(),
            pwd_hash,
            score: 0,
            friends: Vec::new(),
        }
    }
}

/// Persistent user store.
pub struct UserStore {
    users: DashMap<String, User>,
    path: PathBuf,
    // Serialises snapshots; record reads and writes go through the map.
    snapshot_lock: Mutex<()>,
}

impl UserStore {
    /// Open the store, loading the database file if one exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let users = DashMap::new();
        if path.exists() {
            let bytes = fs::read(&path)?;
            let loaded: BTreeMap<String, User> = serde_json::from_slice(&bytes)?;
            info!("loaded {} users from {}", loaded.len(), path.display());
            for (nickname, user) in loaded {
                users.insert(nickname, user);
            }
        }
        Ok(Self {
            users,
            path,
            snapshot_lock: Mutex::new(()),
        })
    }

    /// Insert a new user. Returns false if the nickname is already taken.
    pub fn register(&self, nickname: &str, password: &str) -> bool {
        match self.users.entry(nickname.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(User::new(nickname, pwd_hash(password)));
                self.snapshot();
                true
            }
        }
    }

    /// Add each nickname to the other's friend list. Returns false if they
    /// already are friends or either side is unknown.
    pub fn add_friend(&self, nickname: &str, friend: &str) -> bool {
        if !self.users.contains_key(friend) {
            return false;
        }
        {
            let Some(mut user) = self.users.get_mut(nickname) else {
                return false;
            };
            if user.friends.iter().any(|f| f == friend) {
                return false;
            }
            user.friends.push(friend.to_string());
        }
        if let Some(mut other) = self.users.get_mut(friend) {
            other.friends.push(nickname.to_string());
        }
        self.snapshot();
        true
    }

    /// Apply a score delta from a finished match.
    pub fn update_score(&self, nickname: &str, delta: i64) {
        {
            let Some(mut user) = self.users.get_mut(nickname) else {
                return;
            };
            user.score += delta;
        }
        self.snapshot();
    }

    pub fn get(&self, nickname: &str) -> Option<User> {
        self.users.get(nickname).map(|r| r.clone())
    }

    pub fn contains(&self, nickname: &str) -> bool {
        self.users.contains_key(nickname)
    }

    pub fn are_friends(&self, nickname: &str, friend: &str) -> bool {
        self.users
            .get(nickname)
            .map(|u| u.friends.iter().any(|f| f == friend))
            .unwrap_or(false)
    }

    pub fn count(&self) -> usize {
        self.users.len()
    }

    /// Serialise the whole map and write it out. A failed snapshot is logged;
    /// the in-memory mutation stands and the next successful snapshot
    /// subsumes it.
    fn snapshot(&self) {
        let _guard = self.snapshot_lock.lock();
        let map: BTreeMap<String, User> = self
            .users
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        if let Err(e) = write_snapshot(&self.path, &map) {
            error!("database snapshot to {} failed: {}", self.path.display(), e);
        }
    }
}

// Temp-file-and-rename so readers never observe a torn file.
fn write_snapshot(path: &Path, map: &BTreeMap<String, User>) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(map)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
