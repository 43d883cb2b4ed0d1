//! Per-command tasks.
//!
//! Each task runs on a worker, reads the shared context, and answers through
//! the mail depot; the Mailman re-arms the connection (or closes it, for a
//! completed logout). The brutal logout path is the one exception: there is
//! nobody left to write to, so it closes the connection itself.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, info};

use crate::connection::Connection;
use crate::protocol::LOGOUT_OK;
use crate::server::ServerContext;
use crate::store::pwd_hash;

/// Guard reply for commands that need a logged-in session.
const NOT_LOGGED_IN: &str = "Error: you are not logged in.\n";

pub fn login(
    ctx: &ServerContext,
    conn: Arc<Connection>,
    nickname: &str,
    password: &str,
    udp_port: u16,
) {
    let Some(user) = ctx.store.get(nickname) else {
        ctx.depot.post(
            conn,
            format!("Login error: user {} not found. Please register.\n", nickname),
        );
        return;
    };
    if ctx.presence.is_online(nickname) {
        ctx.depot.post(
            conn,
            format!("Login error: {} is already logged in.\n", nickname),
        );
        return;
    }
    let port = conn.peer_port();
    if ctx.presence.port_bound(port) {
        ctx.depot.post(
            conn,
            "Login error: you are already logged with another account.\n",
        );
        return;
    }
    if user.pwd_hash != pwd_hash(password) {
        ctx.depot.post(conn, "Login error: wrong password.\n");
        return;
    }

    // The invitation address pairs the connection's remote IP with the UDP
    // port the client asked invitations to be sent to.
    let invite_addr = SocketAddr::new(conn.peer_ip(), udp_port);
    ctx.presence.login(port, nickname, invite_addr);
    info!("{} logged in", nickname);
    ctx.depot.post(conn, "Login successful.\n");
}

/// Graceful logout answers with the sentinel the Mailman closes on; brutal
/// logout (peer crashed) cleans up silently and force-closes.
pub fn logout(ctx: &ServerContext, conn: Arc<Connection>, brutal: bool) {
    let nickname = ctx.presence.logout_port(conn.peer_port());
    if brutal {
        if let Some(nickname) = nickname {
            info!("{} disconnected, brutal logout", nickname);
        } else {
            debug!("connection {} dropped before login", conn.id());
        }
        conn.close();
        ctx.connections.remove(conn.id());
        return;
    }
    if let Some(nickname) = nickname {
        info!("{} logged out", nickname);
    }
    ctx.depot.post(conn, LOGOUT_OK);
}

pub fn add_friend(ctx: &ServerContext, conn: Arc<Connection>, friend: &str) {
    let Some(nickname) = ctx.presence.nickname_for(conn.peer_port()) else {
        ctx.depot.post(conn, NOT_LOGGED_IN);
        return;
    };
    if !ctx.store.contains(friend) {
        ctx.depot.post(
            conn,
            format!("Add friend error: user {} not found.\n", friend),
        );
        return;
    }
    let msg = if nickname == friend {
        "Add friend error: you cannot add yourself as a friend.\n".to_string()
    } else if ctx.store.add_friend(&nickname, friend) {
        format!("{} is now your friend.\n", friend)
    } else {
        format!(
            "Add friend error: you and {} are already friends.\n",
            friend
        )
    };
    ctx.depot.post(conn, msg);
}

pub fn friend_list(ctx: &ServerContext, conn: Arc<Connection>) {
    let Some(nickname) = ctx.presence.nickname_for(conn.peer_port()) else {
        ctx.depot.post(conn, NOT_LOGGED_IN);
        return;
    };
    let friends = ctx
        .store
        .get(&nickname)
        .map(|u| u.friends)
        .unwrap_or_default();
    let msg = if friends.is_empty() {
        "You currently have no friends, add some!\n".to_string()
    } else {
        format!("Your friends are: {}\n", friends.join(" "))
    };
    ctx.depot.post(conn, msg);
}

pub fn score(ctx: &ServerContext, conn: Arc<Connection>) {
    let Some(nickname) = ctx.presence.nickname_for(conn.peer_port()) else {
        ctx.depot.post(conn, NOT_LOGGED_IN);
        return;
    };
    let score = ctx.store.get(&nickname).map(|u| u.score).unwrap_or(0);
    ctx.depot
        .post(conn, format!("{}, your score is: {}\n", nickname, score));
}

/// The caller plus every friend, sorted by score descending; ties keep the
/// friend-list order with the caller last.
pub fn scoreboard(ctx: &ServerContext, conn: Arc<Connection>) {
    let Some(nickname) = ctx.presence.nickname_for(conn.peer_port()) else {
        ctx.depot.post(conn, NOT_LOGGED_IN);
        return;
    };
    let Some(user) = ctx.store.get(&nickname) else {
        ctx.depot.post(conn, NOT_LOGGED_IN);
        return;
    };

    let mut board: Vec<_> = user
        .friends
        .iter()
        .filter_map(|f| ctx.store.get(f))
        .collect();
    board.push(user);
    board.sort_by(|a, b| b.score.cmp(&a.score));

    let mut line = String::new();
    for entry in &board {
        line.push_str(&format!("{} {} ", entry.nickname, entry.score));
    }
    line.push('\n');
    ctx.depot.post(conn, line);
}
