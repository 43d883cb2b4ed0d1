//! Wire protocol for QuizzleNet.
//!
//! The control protocol is one space-separated ASCII request per reactor
//! wake, led by a numeric operation code. Responses are single lines
//! terminated by `\n`. The match channel speaks `<body>/<nickname>` frames.

use crate::error::{QuizzleError, Result};

/// Exact payload the Mailman recognises as a completed logout; after writing
/// it the connection is closed instead of re-armed.
pub const LOGOUT_OK: &str = "Logout successful.\n";

/// Body of the match frame a player sends to request the first word.
pub const START_BODY: &str = "START";

/// Prefix of the terminal frame on a match channel.
pub const END_PREFIX: &str = "END/";

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Login {
        nickname: String,
        password: String,
        udp_port: u16,
    },
    Logout,
    AddFriend {
        friend: String,
    },
    FriendList,
    Score,
    Scoreboard,
    Match {
        friend: String,
    },
}

impl Request {
    /// Decode one request line into its tagged variant.
    ///
    /// Operation codes 0..=6; anything else (or a short argument list) is a
    /// protocol error.
    pub fn decode(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let code = parts
            .next()
            .ok_or_else(|| QuizzleError::protocol("empty request"))?;
        let code: u8 = code
            .parse()
            .map_err(|_| QuizzleError::protocol(format!("bad operation code {:?}", code)))?;

        let request = match code {
            0 => {
                let nickname = next_arg(&mut parts, "login <nickname>")?;
                let password = next_arg(&mut parts, "login <password>")?;
                let udp_port = next_arg(&mut parts, "login <udp_port>")?
                    .parse::<u16>()
                    .map_err(|_| QuizzleError::protocol("login <udp_port> must be a port"))?;
                Request::Login {
                    nickname,
                    password,
                    udp_port,
                }
            }
            1 => Request::Logout,
            2 => Request::AddFriend {
                friend: next_arg(&mut parts, "add_friend <friend>")?,
            },
            3 => Request::FriendList,
            4 => Request::Score,
            5 => Request::Scoreboard,
            6 => Request::Match {
                friend: next_arg(&mut parts, "match <friend>")?,
            },
            other => {
                return Err(QuizzleError::protocol(format!(
                    "unknown operation code {}",
                    other
                )))
            }
        };
        Ok(request)
    }
}

fn next_arg(parts: &mut std::str::SplitWhitespace<'_>, what: &str) -> Result<String> {
    parts
        .next()
        .map(str::to_string)
        .ok_or_else(|| QuizzleError::protocol(format!("missing argument {}", what)))
}

/// Extract one frame from freshly-read bytes: everything up to the first
/// newline or NUL byte. Legacy clients send no terminator at all and rely on
/// one frame per reactor wake, so an unterminated buffer is a whole frame.
pub fn frame_text(bytes: &[u8]) -> String {
    let end = bytes
        .iter()
        .position(|&b| b == b'\n' || b == 0)
        .unwrap_or(bytes.len());
    let mut text = String::from_utf8_lossy(&bytes[..end]).into_owned();
    if text.ends_with('\r') {
        text.pop();
    }
    text
}

/// One frame on a match channel: `<body>/<nickname>`, where the nickname
/// names the player that produced the frame. An empty body is a skipped word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchFrame {
    pub body: String,
    pub nickname: String,
}

impl MatchFrame {
    pub fn parse(text: &str) -> Option<Self> {
        let (body, nickname) = text.rsplit_once('/')?;
        if nickname.is_empty() {
            return None;
        }
        Some(Self {
            body: body.to_string(),
            nickname: nickname.to_string(),
        })
    }

    pub fn is_start(&self) -> bool {
        self.body == START_BODY
    }
}

/// Invitation datagram sent to the challenged player's client.
pub fn invitation(challenger: &str, match_port: u16) -> String {
    format!("{}/{}", challenger, match_port)
}

/// Datagram sent after an invitation expires so the challenged client can
/// drop its pending entry.
pub fn invitation_timeout(challenger: &str) -> String {
    format!("TIMEOUT/{}", challenger)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_login() {
        let req = Request::decode("0 alice secret 40000").unwrap();
        assert_eq!(
            req,
            Request::Login {
                nickname: "alice".into(),
                password: "secret".into(),
                udp_port: 40000,
            }
        );
    }

    #[test]
    fn test_decode_no_arg_commands() {
        assert_eq!(Request::decode("1").unwrap(), Request::Logout);
        assert_eq!(Request::decode("3").unwrap(), Request::FriendList);
        assert_eq!(Request::decode("4").unwrap(), Request::Score);
        assert_eq!(Request::decode("5").unwrap(), Request::Scoreboard);
    }

    #[test]
    fn test_decode_friend_commands() {
        assert_eq!(
            Request::decode("2 bob").unwrap(),
            Request::AddFriend {
                friend: "bob".into()
            }
        );
        assert_eq!(
            Request::decode("6 bob").unwrap(),
            Request::Match {
                friend: "bob".into()
            }
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Request::decode("").is_err());
        assert!(Request::decode("login alice").is_err());
        assert!(Request::decode("7").is_err());
        assert!(Request::decode("0 alice").is_err());
        assert!(Request::decode("0 alice pwd notaport").is_err());
    }

    #[test]
    fn test_frame_text_terminators() {
        assert_eq!(frame_text(b"2 bob\n"), "2 bob");
        assert_eq!(frame_text(b"2 bob\r\n"), "2 bob");
        assert_eq!(frame_text(b"2 bob\0\0\0"), "2 bob");
        // Legacy: no terminator at all.
        assert_eq!(frame_text(b"2 bob"), "2 bob");
        // Only the first frame of a coalesced read counts.
        assert_eq!(frame_text(b"4\n5\n"), "4");
    }

    #[test]
    fn test_match_frame_parse() {
        let frame = MatchFrame::parse("house/alice").unwrap();
        assert_eq!(frame.body, "house");
        assert_eq!(frame.nickname, "alice");
        assert!(!frame.is_start());

        let start = MatchFrame::parse("START/bob").unwrap();
        assert!(start.is_start());

        // Skipped word: empty body, nickname still present.
        let skip = MatchFrame::parse("/alice").unwrap();
        assert_eq!(skip.body, "");

        assert!(MatchFrame::parse("no-separator").is_none());
        assert!(MatchFrame::parse("body/").is_none());
    }

    #[test]
    fn test_invitation_format() {
        assert_eq!(invitation("alice", 45000), "alice/45000");
        assert_eq!(invitation_timeout("alice"), "TIMEOUT/alice");
    }
}
