//! Two-player duel sessions.
//!
//! A match task occupies its worker for the whole invitation-and-duel
//! window. It owns an ephemeral TCP acceptor and a timed UDP socket of its
//! own; the only thing it touches on the challenger's primary connection is
//! the single accepted-invitation line and the final re-arm.
//!
//! States: pre-check -> invite -> await-join -> play -> score. Refusals,
//! timeouts and pre-check failures answer through the depot and stop there.

use std::io::{ErrorKind, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connection::Connection;
use crate::error::Result;
use crate::protocol::{self, MatchFrame};
use crate::server::ServerContext;
use crate::words;

const CORRECT_POINTS: i64 = 2;
const WRONG_POINTS: i64 = -1;
const WIN_BONUS: i64 = 3;

const SERVICE_UNAVAILABLE: &str = "Sorry, the translation service is unavailable. Try later.\n";

/// Entry point for the `match` command, run on a worker thread.
pub fn run(ctx: &ServerContext, conn: Arc<Connection>, friend: &str) {
    let Some(challenger) = ctx.presence.nickname_for(conn.peer_port()) else {
        ctx.depot.post(conn, "Error: you are not logged in.\n");
        return;
    };
    if challenger == friend {
        ctx.depot
            .post(conn, "Match error: you cannot challenge yourself.\n");
        return;
    }
    if !ctx.store.are_friends(&challenger, friend) {
        ctx.depot.post(
            conn,
            format!("Match error: user {} and you are not friends.\n", friend),
        );
        return;
    }
    let Some(invite_addr) = ctx.presence.invite_addr(friend) else {
        ctx.depot
            .post(conn, format!("Match error: {} is offline\n", friend));
        return;
    };

    let session = match Session::open(ctx, &challenger, friend, invite_addr) {
        Ok(session) => session,
        Err(e) => {
            warn!("match setup for {} vs {} failed: {}", challenger, friend, e);
            ctx.depot.post(
                conn,
                format!("Match error: could not start a match with {}.\n", friend),
            );
            return;
        }
    };
    session.run(ctx, conn);
}

enum InviteOutcome {
    Accepted,
    Refused,
    TimedOut,
}

/// One player's end of the duel.
struct PlayerLink {
    nickname: String,
    stream: TcpStream,
    /// 0 before START, then 1..=N while answering, N+1 once done.
    index: usize,
    /// One slot per word; an empty string is a skipped word.
    answers: Vec<String>,
    /// Crashed, or answered on the unavailable path; stop reading this side.
    finished: bool,
}

impl PlayerLink {
    fn new(nickname: &str, stream: TcpStream, num_words: usize) -> Self {
        Self {
            nickname: nickname.to_string(),
            stream,
            index: 0,
            answers: vec![String::new(); num_words],
            finished: false,
        }
    }

    fn done(&self, num_words: usize) -> bool {
        self.index > num_words
    }
}

enum LinkRead {
    Idle,
    Eof,
    Frame(String),
}

struct Session {
    id: Uuid,
    challenger: String,
    challenged: String,
    listener: TcpListener,
    inv_socket: UdpSocket,
    invite_addr: SocketAddr,
    match_port: u16,
}

impl Session {
    fn open(
        ctx: &ServerContext,
        challenger: &str,
        challenged: &str,
        invite_addr: SocketAddr,
    ) -> Result<Self> {
        let inv_socket = UdpSocket::bind(("0.0.0.0", 0))?;
        inv_socket.set_read_timeout(Some(Duration::from_secs(ctx.config.invitation_secs)))?;
        let listener = TcpListener::bind(("0.0.0.0", 0))?;
        listener.set_nonblocking(true)?;
        let match_port = listener.local_addr()?.port();
        Ok(Self {
            id: Uuid::new_v4(),
            challenger: challenger.to_string(),
            challenged: challenged.to_string(),
            listener,
            inv_socket,
            invite_addr,
            match_port,
        })
    }

    fn run(self, ctx: &ServerContext, primary: Arc<Connection>) {
        info!(
            "match {}: {} invites {}",
            self.id, self.challenger, self.challenged
        );

        match self.invite() {
            Ok(InviteOutcome::TimedOut) => {
                // Tell the challenged client so it can purge its pending entry.
                let _ = self.inv_socket.send_to(
                    protocol::invitation_timeout(&self.challenger).as_bytes(),
                    self.invite_addr,
                );
                info!("match {}: invitation timed out", self.id);
                ctx.depot.post(
                    primary,
                    format!(
                        "Match error: invitation to {} timed out.\n",
                        self.challenged
                    ),
                );
                return;
            }
            Ok(InviteOutcome::Refused) => {
                info!("match {}: invitation refused", self.id);
                ctx.depot.post(
                    primary,
                    format!("{} refused your match invitation.\n", self.challenged),
                );
                return;
            }
            Ok(InviteOutcome::Accepted) => {}
            Err(e) => {
                warn!("match {}: invitation failed: {}", self.id, e);
                ctx.depot.post(
                    primary,
                    format!(
                        "Match error: could not start a match with {}.\n",
                        self.challenged
                    ),
                );
                return;
            }
        }

        // Direct write: the primary connection stays read-disabled for the
        // whole duel and has no mail in flight, so this cannot race the
        // Mailman. The task itself re-arms at the end.
        let accepted = format!(
            "{} accepted your match invitation./{}\n",
            self.challenged, self.match_port
        );
        if let Err(e) = primary.write_all_blocking(accepted.as_bytes()) {
            warn!("match {}: challenger unreachable: {}", self.id, e);
            primary.arm();
            return;
        }

        self.duel(ctx, &primary);
        primary.arm();
    }

    /// Send the invitation datagram and wait (bounded) for the reply.
    /// Anything other than `Y` refuses the match.
    fn invite(&self) -> Result<InviteOutcome> {
        let invitation = protocol::invitation(&self.challenger, self.match_port);
        self.inv_socket
            .send_to(invitation.as_bytes(), self.invite_addr)?;

        let mut buf = [0u8; 16];
        match self.inv_socket.recv_from(&mut buf) {
            Ok((n, _)) => {
                if &buf[..n] == b"Y" {
                    Ok(InviteOutcome::Accepted)
                } else {
                    Ok(InviteOutcome::Refused)
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                Ok(InviteOutcome::TimedOut)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Everything after acceptance: rendezvous, word fetch, play, scoring.
    fn duel(&self, ctx: &ServerContext, primary: &Arc<Connection>) {
        let num_words = ctx.config.num_words;
        let (mut chal, mut chld) = match self.await_join(primary.peer_ip(), num_words) {
            Ok(links) => links,
            Err(e) => {
                warn!("match {}: rendezvous failed: {}", self.id, e);
                return;
            }
        };
        info!("match {}: both players joined", self.id);

        let deadline = Instant::now()
            + Duration::from_secs(ctx.config.match_minutes * 60);

        let word_set = words::match_words(
            std::path::Path::new(&ctx.config.dictionary_path),
            ctx.translator.as_ref(),
            num_words,
        );
        let word_set = match word_set {
            Ok(words) => words,
            Err(e) => {
                warn!("match {}: translation fetch failed: {}", self.id, e);
                self.run_unavailable(&mut chal, &mut chld, deadline);
                return;
            }
        };

        let timed_out = self.play(&mut chal, &mut chld, &word_set, deadline);

        let mut chal_score = score_answers(&chal.answers, &word_set);
        let mut chld_score = score_answers(&chld.answers, &word_set);
        let (chal_result, chld_result) = if chal_score < chld_score {
            chld_score += WIN_BONUS;
            ("lost", "won")
        } else if chld_score < chal_score {
            chal_score += WIN_BONUS;
            ("won", "lost")
        } else {
            ("drew", "drew")
        };

        let prefix = if timed_out {
            "Time out: you have scored:"
        } else {
            "You have scored:"
        };
        let chal_msg = format!(
            "{}{} {} points. You {}.\n",
            protocol::END_PREFIX,
            prefix,
            chal_score,
            chal_result
        );
        let chld_msg = format!(
            "{}{} {} points. You {}.\n",
            protocol::END_PREFIX,
            prefix,
            chld_score,
            chld_result
        );
        if let Err(e) = drain_write(&mut chal.stream, chal_msg.as_bytes()) {
            debug!("match {}: result to {} undeliverable: {}", self.id, chal.nickname, e);
        }
        if let Err(e) = drain_write(&mut chld.stream, chld_msg.as_bytes()) {
            debug!("match {}: result to {} undeliverable: {}", self.id, chld.nickname, e);
        }

        ctx.store.update_score(&self.challenger, chal_score);
        ctx.store.update_score(&self.challenged, chld_score);
        info!(
            "match {}: {} {} - {} {}{}",
            self.id,
            self.challenger,
            chal_score,
            self.challenged,
            chld_score,
            if timed_out { " (timed out)" } else { "" }
        );
    }

    /// Accept exactly two inbound connections and attribute them by remote
    /// IP. When both players share an address the first one in takes the
    /// challenger slot. There is no time bound on joining.
    fn await_join(
        &self,
        challenger_ip: IpAddr,
        num_words: usize,
    ) -> Result<(PlayerLink, PlayerLink)> {
        let challenged_ip = self.invite_addr.ip();
        let mut chal: Option<TcpStream> = None;
        let mut chld: Option<TcpStream> = None;

        while chal.is_none() || chld.is_none() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(true)?;
                    let ip = peer.ip();
                    if ip == challenger_ip && chal.is_none() {
                        chal = Some(stream);
                    } else if ip == challenged_ip && chld.is_none() {
                        chld = Some(stream);
                    } else {
                        debug!("match {}: rejecting join from {}", self.id, peer);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(e.into()),
            }
        }

        let (Some(chal), Some(chld)) = (chal, chld) else {
            unreachable!("join loop exits only with both links");
        };
        Ok((
            PlayerLink::new(&self.challenger, chal, num_words),
            PlayerLink::new(&self.challenged, chld, num_words),
        ))
    }

    /// The play loop. Returns true iff the wall-clock deadline ended it.
    fn play(
        &self,
        chal: &mut PlayerLink,
        chld: &mut PlayerLink,
        word_set: &[(String, Vec<String>)],
        deadline: Instant,
    ) -> bool {
        let num_words = word_set.len();
        loop {
            if Instant::now() >= deadline {
                return true;
            }
            if chal.done(num_words) && chld.done(num_words) {
                return false;
            }

            let mut busy = false;
            for side in [0, 1] {
                let (reader, other) = if side == 0 {
                    (&mut *chal, &mut *chld)
                } else {
                    (&mut *chld, &mut *chal)
                };
                if reader.finished {
                    continue;
                }
                match read_link(&mut reader.stream) {
                    LinkRead::Idle => {}
                    LinkRead::Eof => {
                        debug!("match {}: {} crashed", self.id, reader.nickname);
                        crash(reader, num_words);
                        busy = true;
                    }
                    LinkRead::Frame(text) => {
                        self.handle_frame(&text, reader, other, word_set);
                        busy = true;
                    }
                }
            }
            if !busy {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    /// Apply one play frame. The frame's nickname names the player it is
    /// for; it normally matches the link it arrived on.
    fn handle_frame(
        &self,
        text: &str,
        reader: &mut PlayerLink,
        other: &mut PlayerLink,
        word_set: &[(String, Vec<String>)],
    ) {
        let Some(frame) = MatchFrame::parse(text) else {
            debug!("match {}: unparseable frame {:?}", self.id, text);
            return;
        };
        let target = if frame.nickname == reader.nickname {
            reader
        } else if frame.nickname == other.nickname {
            other
        } else {
            debug!("match {}: frame for unknown player {}", self.id, frame.nickname);
            return;
        };

        let num_words = word_set.len();
        if frame.is_start() {
            // START counts as receiving the first word.
            if target.index == 0 {
                send_word(target, word_set, 0);
                target.index = 1;
            } else {
                debug!("match {}: duplicate START from {}", self.id, target.nickname);
            }
            return;
        }

        if target.index == 0 || target.index > num_words {
            debug!(
                "match {}: answer out of turn from {}",
                self.id, target.nickname
            );
            return;
        }
        target.answers[target.index - 1] = frame.body;
        if target.index < num_words {
            send_word(target, word_set, target.index);
        }
        target.index += 1;
    }

    /// Degraded mode: no words could be fetched. Each player's first frame
    /// is answered once with the apology, then the player is done. Bounded
    /// by the match deadline so a silent player cannot pin the worker.
    fn run_unavailable(&self, chal: &mut PlayerLink, chld: &mut PlayerLink, deadline: Instant) {
        while !(chal.finished && chld.finished) && Instant::now() < deadline {
            let mut busy = false;
            for player in [&mut *chal, &mut *chld] {
                if player.finished {
                    continue;
                }
                match read_link(&mut player.stream) {
                    LinkRead::Idle => {}
                    LinkRead::Eof => {
                        player.finished = true;
                        busy = true;
                    }
                    LinkRead::Frame(_) => {
                        if let Err(e) =
                            drain_write(&mut player.stream, SERVICE_UNAVAILABLE.as_bytes())
                        {
                            debug!("match {}: apology undeliverable: {}", self.id, e);
                        }
                        player.finished = true;
                        busy = true;
                    }
                }
            }
            if !busy {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        info!("match {}: ended without play, translator unavailable", self.id);
    }
}

/// Blank every remaining answer and push the index past the end.
fn crash(player: &mut PlayerLink, num_words: usize) {
    for slot in player.answers.iter_mut().skip(player.index.saturating_sub(1)) {
        slot.clear();
    }
    player.index = num_words + 1;
    player.finished = true;
}

fn send_word(player: &mut PlayerLink, word_set: &[(String, Vec<String>)], index: usize) {
    let line = format!("{}\n", word_set[index].0);
    if let Err(e) = drain_write(&mut player.stream, line.as_bytes()) {
        debug!("word to {} undeliverable: {}", player.nickname, e);
    }
}

/// Exact match against any acceptable translation is worth two points, a
/// skipped word zero, anything else minus one.
fn score_answers(answers: &[String], word_set: &[(String, Vec<String>)]) -> i64 {
    let mut total = 0;
    for (answer, (_, accepted)) in answers.iter().zip(word_set) {
        if answer.is_empty() {
            continue;
        }
        if accepted.iter().any(|t| t == answer) {
            total += CORRECT_POINTS;
        } else {
            total += WRONG_POINTS;
        }
    }
    total
}

fn read_link(stream: &mut TcpStream) -> LinkRead {
    let mut collected: Vec<u8> = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return LinkRead::Eof,
            Ok(n) => collected.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => return LinkRead::Eof,
        }
    }
    if collected.is_empty() {
        LinkRead::Idle
    } else {
        LinkRead::Frame(protocol::frame_text(&collected))
    }
}

fn drain_write(stream: &mut TcpStream, payload: &[u8]) -> std::io::Result<()> {
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

#[cfg(test)]
mod tests {
    use super::*;

    fn word_set() -> Vec<(String, Vec<String>)> {
        vec![
            ("casa".into(), vec!["house".into(), "home".into()]),
            ("cane".into(), vec!["dog".into()]),
            ("gatto".into(), vec!["cat".into()]),
        ]
    }

    #[test]
    fn test_score_all_correct() {
        let answers = vec!["home".to_string(), "dog".to_string(), "cat".to_string()];
        assert_eq!(score_answers(&answers, &word_set()), 6);
    }

    #[test]
    fn test_score_mixed() {
        // One right, one wrong, one skipped.
        let answers = vec!["house".to_string(), "frog".to_string(), String::new()];
        assert_eq!(score_answers(&answers, &word_set()), 1);
    }

    #[test]
    fn test_score_all_skipped() {
        let answers = vec![String::new(), String::new(), String::new()];
        assert_eq!(score_answers(&answers, &word_set()), 0);
    }

    #[test]
    fn test_score_case_sensitive() {
        let answers = vec!["House".to_string(), String::new(), String::new()];
        assert_eq!(score_answers(&answers, &word_set()), -1);
    }

    #[test]
    fn test_crash_blanks_remaining_answers() {
        let (any, _listener) = loopback_stream();
        let mut player = PlayerLink::new("alice", any, 3);
        player.index = 2;
        player.answers[0] = "house".into();
        player.answers[1] = "dog".into();

        crash(&mut player, 3);
        // The in-flight answer (slot index-1) and everything after it blank.
        assert_eq!(player.answers, vec!["house", "", ""]);
        assert_eq!(player.index, 4);
        assert!(player.finished);
        assert!(player.done(3));
    }

    fn loopback_stream() -> (TcpStream, std::net::TcpListener) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).unwrap();
        (stream, listener)
    }
}
