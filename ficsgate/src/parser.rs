//! ICS output parser.
//!
//! FICS output is free-form text framed by `fics%` prompts.  [`sanitize`]
//! normalizes one raw chunk (strips control bytes, line-wrap continuations,
//! `(told …)` acknowledgements, and the trailing prompt); [`parse`] then
//! classifies it into zero or more typed [`Event`]s.
//!
//! Classification is first-match-wins: Style-12 board lines, game start,
//! game end, channel tell, private tell, and finally `unknown`.  A chunk
//! holding several newline-separated Style-12 updates is split and each
//! segment classified on its own, so board updates interleaved with other
//! output still come through in order.
//!
//! The grammars are compiled once into [`LazyLock`] statics.  All numeric
//! captures parse base-10 with malformed input collapsing to `0`.

use std::sync::LazyLock;

use regex::Regex;

use crate::msg::{
    decode_end, ChannelTell, Event, GameEnd, GameMove, GameStart, MessageType, PrivateTell,
};

// ── Grammars ──────────────────────────────────────────────────────────────

/// Style-12 board line: eight rank strings, side to move, castling and
/// clock state, then the move just played.
static STYLE12_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        <12>\s+
        ([rnbqkpRNBQKP-]{8})\s+ ([rnbqkpRNBQKP-]{8})\s+ ([rnbqkpRNBQKP-]{8})\s+
        ([rnbqkpRNBQKP-]{8})\s+ ([rnbqkpRNBQKP-]{8})\s+ ([rnbqkpRNBQKP-]{8})\s+
        ([rnbqkpRNBQKP-]{8})\s+ ([rnbqkpRNBQKP-]{8})\s+
        ([BW-])\s+        # side to move
        (-?\d+)\s+        # double-push file
        ([01])\s+ ([01])\s+ ([01])\s+ ([01])\s+   # castling rights
        (\d+)\s+          # irreversible half-moves
        (\d+)\s+          # game number
        (\w+)\s+ (\w+)\s+ # white / black handles
        (-?\d+)\s+        # relation to the game
        (\d+)\s+ (\d+)\s+ # initial time / increment
        (\d+)\s+ (\d+)\s+ # material strength
        (-?\d+)\s+ (-?\d+)\s+  # clocks, may be negative
        (\d+)\s+          # move number
        (\S+)\s+          # verbose move
        \((\d+:\d+)\)\s+  # time taken
        (\S+)             # pretty move
        ",
    )
    .unwrap()
});

static GAME_START_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{Game (\d+) \(([a-zA-Z]+) vs\. ([a-zA-Z]+)\) Creating").unwrap()
});

static GAME_END_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{Game (\d+) \(([a-zA-Z]+) vs\. ([a-zA-Z]+)\) ([a-zA-Z]+) ([^}]+)\}(?:\s+(0-1|1-0|1/2-1/2))?")
        .unwrap()
});

static CHANNEL_TELL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^([a-zA-Z]+)(?:\([A-Z*]+\))*\((\d+)\):\s+(.*)$").unwrap()
});

static PRIVATE_TELL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^([a-zA-Z]+)(?:\([A-Z*]+\))*\s(?:tells you|says|kibitzes):\s+(.*)$").unwrap()
});

/// `(told …)` acknowledgement the server appends to echoed tells.
static TOLD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(told [^)]*\)").unwrap());

// ── Sanitizer ─────────────────────────────────────────────────────────────

/// Normalize one raw prompt-framed chunk into parser input.
///
/// Strips NUL, BEL, and `\r` bytes, the `\   ` continuation marker FICS
/// uses when wrapping long lines, `(told …)` acknowledgement suffixes,
/// and the trailing `fics%` prompt, then trims surrounding whitespace.
pub fn sanitize(raw: &[u8]) -> String {
    let mut s = String::from_utf8_lossy(raw).into_owned();
    s.retain(|c| !matches!(c, '\0' | '\u{7}' | '\r'));
    let s = s.replace("\\   ", "");
    let s = TOLD_RE.replace_all(&s, "");
    let s = s.trim_end();
    let s = s.strip_suffix("fics%").unwrap_or(s);
    s.trim().to_owned()
}

// ── FEN transcription ─────────────────────────────────────────────────────

/// Transcribe one 8-square Style-12 rank into its FEN form: runs of `-`
/// become a digit, piece letters pass through.
pub fn style12_to_fen(rank: &str) -> String {
    let mut fen = String::with_capacity(8);
    let mut empties = 0;
    for c in rank.chars() {
        if c == '-' {
            empties += 1;
        } else {
            if empties > 0 {
                fen.push_str(&empties.to_string());
                empties = 0;
            }
            fen.push(c);
        }
    }
    if empties > 0 {
        fen.push_str(&empties.to_string());
    }
    fen
}

/// Base-10 conversion with the upstream's lenient semantics: anything
/// malformed is `0`.
fn atoi(s: &str) -> i64 {
    s.parse().unwrap_or(0)
}

// ── Classifier ────────────────────────────────────────────────────────────

/// Parse one sanitized chunk into its events.
///
/// An empty chunk yields no events.  A chunk with several newline-separated
/// segments and at least one Style-12 line is split and each non-empty
/// segment parsed on its own, preserving order.
pub fn parse(chunk: &str) -> Vec<Event> {
    let chunk = chunk.trim();
    if chunk.is_empty() {
        return Vec::new();
    }
    if chunk.contains('\n') && STYLE12_RE.is_match(chunk) {
        return chunk.lines().flat_map(parse).collect();
    }
    vec![classify(chunk)]
}

fn classify(chunk: &str) -> Event {
    if let Some(c) = STYLE12_RE.captures(chunk) {
        let fen = (1..=8)
            .map(|i| style12_to_fen(&c[i]))
            .collect::<Vec<_>>()
            .join("/");
        return Event::GameMove(GameMove {
            kind: MessageType::GameMove,
            fen,
            turn: c[9].to_owned(),
            game: atoi(&c[16]),
            wname: c[17].to_owned(),
            bname: c[18].to_owned(),
            role: atoi(&c[19]),
            time: atoi(&c[20]),
            inc: atoi(&c[21]),
            wtime: atoi(&c[24]),
            btime: atoi(&c[25]),
            move_: c[29].to_owned(),
        });
    }

    if let Some(c) = GAME_START_RE.captures(chunk) {
        return Event::GameStart(GameStart {
            kind: MessageType::GameStart,
            id: atoi(&c[1]),
            playerone: c[2].to_owned(),
            playertwo: c[3].to_owned(),
        });
    }

    if let Some(c) = GAME_END_RE.captures(chunk) {
        let (winner, loser, reason) = decode_end(&c[2], &c[3], &c[4], c[5].trim_end());
        return Event::GameEnd(GameEnd {
            kind: MessageType::GameEnd,
            id: atoi(&c[1]),
            winner,
            loser,
            reason,
            message: c[0].to_owned(),
        });
    }

    if let Some(c) = CHANNEL_TELL_RE.captures(chunk) {
        return Event::ChannelTell(ChannelTell {
            kind: MessageType::ChannelTell,
            channel: c[2].to_owned(),
            handle: c[1].to_owned(),
            text: c[3].replace('\n', ""),
        });
    }

    if let Some(c) = PRIVATE_TELL_RE.captures(chunk) {
        return Event::PrivateTell(PrivateTell {
            kind: MessageType::PrivateTell,
            handle: c[1].to_owned(),
            text: c[2].replace('\n', ""),
        });
    }

    Event::unknown(chunk)
}

// ── Tests ─────────────────────────────────────────────────────────────────
