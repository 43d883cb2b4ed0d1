//! The reactor: a single thread demultiplexing the TCP listener, the UDP
//! discovery socket and every armed client connection.
//!
//! The ordering contract lives here: a connection is disarmed the moment a
//! frame (or EOF) is taken from it, so no second frame is dispatched while a
//! task for it is outstanding. Re-arming belongs to the Mailman, or to a
//! match session for its own connection.

use std::io::ErrorKind;
use std::net::{TcpListener, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::connection::{Connection, ReadOutcome};
use crate::error::Result;
use crate::match_session;
use crate::protocol::Request;
use crate::server::ServerContext;
use crate::tasks;

pub struct Reactor {
    listener: TcpListener,
    discovery: UdpSocket,
    tcp_port: u16,
    ctx: Arc<ServerContext>,
}

impl Reactor {
    /// Bind the listening sockets. Failure here is the one fatal startup
    /// error the server has.
    pub fn bind(ctx: Arc<ServerContext>) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", ctx.config.tcp_port))?;
        listener.set_nonblocking(true)?;
        let discovery = UdpSocket::bind(("0.0.0.0", ctx.config.udp_port))?;
        discovery.set_nonblocking(true)?;
        let tcp_port = ctx.config.tcp_port;
        Ok(Self {
            listener,
            discovery,
            tcp_port,
            ctx,
        })
    }

    /// Run forever. Sleeps a beat only when a whole pass found nothing.
    pub fn run(&self) -> Result<()> {
        info!(
            "listening for connections on port {}, discovery on port {}",
            self.tcp_port, self.ctx.config.udp_port
        );
        loop {
            let mut busy = false;
            busy |= self.accept_pending();
            busy |= self.answer_probes();
            busy |= self.poll_connections();
            if !busy {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    fn accept_pending(&self) -> bool {
        let mut any = false;
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    any = true;
                    match self.ctx.connections.add(stream, peer) {
                        Ok(conn) => {
                            info!("accepted connection {} from {}", conn.id(), peer)
                        }
                        Err(e) => warn!("could not set up connection from {}: {}", peer, e),
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    break;
                }
            }
        }
        any
    }

    /// Any datagram on the discovery socket gets the TCP port back, as
    /// decimal ASCII, to wherever it came from.
    fn answer_probes(&self) -> bool {
        let mut buf = [0u8; 32];
        let mut any = false;
        loop {
            match self.discovery.recv_from(&mut buf) {
                Ok((_, src)) => {
                    any = true;
                    let reply = self.tcp_port.to_string();
                    if let Err(e) = self.discovery.send_to(reply.as_bytes(), src) {
                        warn!("discovery reply to {} failed: {}", src, e);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("discovery receive failed: {}", e);
                    break;
                }
            }
        }
        any
    }

    fn poll_connections(&self) -> bool {
        let mut any = false;
        for conn in self.ctx.connections.armed() {
            match conn.poll_read() {
                ReadOutcome::Idle => {}
                ReadOutcome::Eof => {
                    any = true;
                    conn.disarm();
                    let ctx = Arc::clone(&self.ctx);
                    self.ctx
                        .pool
                        .execute(move || tasks::logout(&ctx, conn, true));
                }
                ReadOutcome::Frame(text) => {
                    any = true;
                    conn.disarm();
                    self.dispatch(conn, &text);
                }
            }
        }
        any
    }

    fn dispatch(&self, conn: Arc<Connection>, text: &str) {
        let request = match Request::decode(text) {
            Ok(request) => request,
            Err(e) => {
                debug!("connection {}: dropping bad frame: {}", conn.id(), e);
                conn.arm();
                return;
            }
        };
        let ctx = Arc::clone(&self.ctx);
        match request {
            Request::Login {
                nickname,
                password,
                udp_port,
            } => self.ctx.pool.execute(move || {
                tasks::login(&ctx, conn, &nickname, &password, udp_port)
            }),
            Request::Logout => self
                .ctx
                .pool
                .execute(move || tasks::logout(&ctx, conn, false)),
            Request::AddFriend { friend } => self
                .ctx
                .pool
                .execute(move || tasks::add_friend(&ctx, conn, &friend)),
            Request::FriendList => self
                .ctx
                .pool
                .execute(move || tasks::friend_list(&ctx, conn)),
            Request::Score => self.ctx.pool.execute(move || tasks::score(&ctx, conn)),
            Request::Scoreboard => self
                .ctx
                .pool
                .execute(move || tasks::scoreboard(&ctx, conn)),
            Request::Match { friend } => self
                .ctx
                .pool
                .execute(move || match_session::run(&ctx, conn, &friend)),
        }
    }
}
