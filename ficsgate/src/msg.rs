//! Downstream message envelope.
//!
//! Every frame sent to the browser is one of seven tagged records; the
//! numeric `type` field selects the schema and is stable wire contract.
//! [`Event`] is the discriminated sum the parser produces and the session
//! serializes; each variant carries its own tag so the JSON matches the
//! envelope byte-for-byte.
//!
//! Inbound client frames reuse the `ctl` shape ([`CtlRequest`]):
//! `command=0` asks the gateway to forward `text` to ICS, `command=1`
//! carries the inline credential handshake.

use serde::{Deserialize, Serialize, Serializer};

// ── Envelope tags ─────────────────────────────────────────────────────────

/// Wire tag for the message envelope.  Serializes as a small integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Ctl = 0,
    ChannelTell = 1,
    PrivateTell = 2,
    GameMove = 3,
    GameStart = 4,
    GameEnd = 5,
    Unknown = 6,
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

/// Why a game ended.  Ordinals are wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Resign = 0,
    Disconnect = 1,
    Checkmate = 2,
    TimeForfeit = 3,
    Draw = 4,
    Adjourn = 5,
    Abort = 6,
    Unknown = 7,
}

impl Serialize for EndReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

/// Map a game-end `(who, action)` pair to `(winner, loser, reason)`.
///
/// `who` names the player the action happened to; for resignation,
/// disconnection, checkmate, and time forfeit the *other* player wins.
/// Draw-like, adjourn, and abort outcomes keep `(p1, p2)` order.
pub fn decode_end(p1: &str, p2: &str, who: &str, action: &str) -> (String, String, EndReason) {
    let ordered = |reason| (p1.to_owned(), p2.to_owned(), reason);
    let other_wins = |reason| {
        if who == p1 {
            (p2.to_owned(), p1.to_owned(), reason)
        } else if who == p2 {
            (p1.to_owned(), p2.to_owned(), reason)
        } else {
            ordered(EndReason::Unknown)
        }
    };

    match action {
        "resigns" => other_wins(EndReason::Resign),
        "forfeits by disconnection" => other_wins(EndReason::Disconnect),
        "checkmated" => other_wins(EndReason::Checkmate),
        "forfeits on time" => other_wins(EndReason::TimeForfeit),
        "aborted on move 1" | "aborted by mutual agreement" => ordered(EndReason::Abort),
        "adjourned by mutual agreement" => ordered(EndReason::Adjourn),
        "drawn by mutual agreement"
        | "drawn because both players ran out of time"
        | "drawn by repetition"
        | "drawn by the 50 move rule"
        | "drawn due to length"
        | "was drawn"
        | "player has mating material"
        | "drawn by adjudication"
        | "drawn by stalemate" => ordered(EndReason::Draw),
        _ => ordered(EndReason::Unknown),
    }
}

// ── Event records ─────────────────────────────────────────────────────────

/// Control message: login results downstream, client requests upstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ctl {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub command: i64,
    pub text: String,
}

/// A public tell on a channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelTell {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub channel: String,
    pub handle: String,
    pub text: String,
}

/// A directed tell, say, or kibitz.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrivateTell {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub handle: String,
    pub text: String,
}

/// One Style-12 board update, transcribed to FEN piece placement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameMove {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub fen: String,
    pub turn: String,
    pub game: i64,
    pub wname: String,
    pub bname: String,
    pub role: i64,
    pub time: i64,
    pub inc: i64,
    pub wtime: i64,
    pub btime: i64,
    #[serde(rename = "move")]
    pub move_: String,
}

/// A game the session is joining or observing has been created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameStart {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub id: i64,
    pub playerone: String,
    pub playertwo: String,
}

/// A game reached a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameEnd {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub id: i64,
    pub winner: String,
    pub loser: String,
    pub reason: EndReason,
    pub message: String,
}

/// Server output the classifier could not type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Unknown {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub text: String,
}

/// The discriminated event sum sent downstream.
///
/// Serializes untagged; each variant embeds its own `type` field, so the
/// JSON carries the envelope tag exactly once.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Event {
    Ctl(Ctl),
    ChannelTell(ChannelTell),
    PrivateTell(PrivateTell),
    GameMove(GameMove),
    GameStart(GameStart),
    GameEnd(GameEnd),
    Unknown(Unknown),
}

impl Event {
    /// Successful login: `text` is the canonical handle.
    pub fn login_ok(handle: &str) -> Self {
        Event::Ctl(Ctl {
            kind: MessageType::Ctl,
            command: 1,
            text: handle.to_owned(),
        })
    }

    /// Failed login: `text` is the server's refusal.
    pub fn login_failed(err: &str) -> Self {
        Event::Ctl(Ctl {
            kind: MessageType::Ctl,
            command: 2,
            text: err.to_owned(),
        })
    }

    pub fn unknown(text: &str) -> Self {
        Event::Unknown(Unknown {
            kind: MessageType::Unknown,
            text: text.to_owned(),
        })
    }
}

// ── Inbound client frames ─────────────────────────────────────────────────

/// A `ctl` frame received from the browser.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CtlRequest {
    #[serde(rename = "type")]
    pub kind: u8,
    pub command: i64,
    #[serde(default)]
    pub text: String,
}

/// Error produced when an inbound frame is not a well-formed ctl message.
#[derive(Debug)]
pub enum RequestError {
    Json(serde_json::Error),
    NotCtl(u8),
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestError::Json(e) => write!(f, "malformed frame: {e}"),
            RequestError::NotCtl(t) => write!(f, "unexpected message type {t}"),
        }
    }
}

impl std::error::Error for RequestError {}

/// Parse an inbound text frame into a [`CtlRequest`].
pub fn parse_ctl(text: &str) -> Result<CtlRequest, RequestError> {
    let req: CtlRequest = serde_json::from_str(text).map_err(RequestError::Json)?;
    if req.kind != MessageType::Ctl as u8 {
        return Err(RequestError::NotCtl(req.kind));
    }
    Ok(req)
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctl_serializes_with_integer_tag() {
        let json = serde_json::to_string(&Event::login_ok("GuestXYZW")).unwrap();
        assert_eq!(json, r#"{"type":0,"command":1,"text":"GuestXYZW"}"#);
    }

    #[test]
    fn game_end_serializes_reason_ordinal() {
        let ev = Event::GameEnd(GameEnd {
            kind: MessageType::GameEnd,
            id: 117,
            winner: "alice".into(),
            loser: "bob".into(),
            reason: EndReason::Checkmate,
            message: "bob checkmated".into(),
        });
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.starts_with(r#"{"type":5,"id":117,"#));
        assert!(json.contains(r#""reason":2"#));
    }

    #[test]
    fn game_move_renames_move_field() {
        let ev = GameMove {
            kind: MessageType::GameMove,
            fen: "8/8/8/8/8/8/8/8".into(),
            turn: "W".into(),
            game: 1,
            wname: "a".into(),
            bname: "b".into(),
            role: 1,
            time: 2,
            inc: 12,
            wtime: 119,
            btime: 122,
            move_: "Ke2".into(),
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains(r#""move":"Ke2""#));
        assert!(json.contains(r#""type":3"#));
    }

    #[test]
    fn event_list_serializes_as_array() {
        let evs = vec![Event::unknown("a"), Event::unknown("b")];
        let json = serde_json::to_string(&evs).unwrap();
        assert_eq!(json, r#"[{"type":6,"text":"a"},{"type":6,"text":"b"}]"#);
    }

    #[test]
    fn decode_end_resign_other_player_wins() {
        let (w, l, r) = decode_end("alice", "bob", "alice", "resigns");
        assert_eq!((w.as_str(), l.as_str()), ("bob", "alice"));
        assert_eq!(r, EndReason::Resign);

        let (w, l, r) = decode_end("alice", "bob", "bob", "resigns");
        assert_eq!((w.as_str(), l.as_str()), ("alice", "bob"));
        assert_eq!(r, EndReason::Resign);
    }

    #[test]
    fn decode_end_checkmate_and_time() {
        let (_, _, r) = decode_end("a", "b", "b", "checkmated");
        assert_eq!(r, EndReason::Checkmate);
        let (_, _, r) = decode_end("a", "b", "a", "forfeits on time");
        assert_eq!(r, EndReason::TimeForfeit);
        let (_, _, r) = decode_end("a", "b", "b", "forfeits by disconnection");
        assert_eq!(r, EndReason::Disconnect);
    }

    #[test]
    fn decode_end_draws_keep_player_order() {
        for action in [
            "drawn by mutual agreement",
            "drawn by repetition",
            "drawn by stalemate",
            "was drawn",
            "player has mating material",
        ] {
            let (w, l, r) = decode_end("a", "b", "Game", action);
            assert_eq!((w.as_str(), l.as_str()), ("a", "b"), "{action}");
            assert_eq!(r, EndReason::Draw, "{action}");
        }
    }

    #[test]
    fn decode_end_abort_adjourn_unknown() {
        let (_, _, r) = decode_end("a", "b", "Game", "aborted on move 1");
        assert_eq!(r, EndReason::Abort);
        let (_, _, r) = decode_end("a", "b", "Game", "adjourned by mutual agreement");
        assert_eq!(r, EndReason::Adjourn);
        let (_, _, r) = decode_end("a", "b", "Game", "ran away screaming");
        assert_eq!(r, EndReason::Unknown);
    }

    #[test]
    fn decode_end_unrecognized_who_is_unknown() {
        let (w, l, r) = decode_end("a", "b", "stranger", "resigns");
        assert_eq!((w.as_str(), l.as_str()), ("a", "b"));
        assert_eq!(r, EndReason::Unknown);
    }

    #[test]
    fn parse_ctl_accepts_forward_request() {
        let req = parse_ctl(r#"{"type":0,"command":0,"text":"tell 53 hi"}"#).unwrap();
        assert_eq!(req.command, 0);
        assert_eq!(req.text, "tell 53 hi");
    }

    #[test]
    fn parse_ctl_rejects_wrong_type() {
        assert!(matches!(
            parse_ctl(r#"{"type":3,"command":0,"text":"x"}"#),
            Err(RequestError::NotCtl(3))
        ));
    }

    #[test]
    fn parse_ctl_rejects_bad_json() {
        assert!(matches!(
            parse_ctl("not json"),
            Err(RequestError::Json(_))
        ));
    }

    #[test]
    fn parse_ctl_defaults_missing_text() {
        let req = parse_ctl(r#"{"type":0,"command":1}"#).unwrap();
        assert_eq!(req.text, "");
    }
}
