//! Timeseal frame codec.
//!
//! FICS requires clients to wrap every outbound command in the "timeseal"
//! obfuscation layer: a wall-clock timestamp is appended to the command,
//! the buffer is padded to a 12-byte block size, bytes are swapped within
//! each block, and the whole thing is run through a fixed keystream
//! transform.  The server periodically injects a `[G]\0` heartbeat token
//! into its output stream and expects a sealed `\x02\x39` reply for each
//! occurrence.
//!
//! [`encode_at`] is the pure transform; [`encode`] stamps the current
//! wall clock.  [`strip_heartbeats`] removes heartbeat tokens from an
//! inbound buffer and reports how many replies the caller owes the
//! server.  The transform itself cannot fail.

use std::time::{SystemTime, UNIX_EPOCH};

// ── Wire constants ────────────────────────────────────────────────────────

/// The fixed 50-byte keystream historically shipped with the reference
/// timeseal client.  Compatibility-critical: the server uses the same key.
const KEY: &[u8; 50] = b"Timestamp (FICS) v1.0 - programmed by Henrik Gram.";

/// Separator written between the command and the timestamp.
const TIMESTAMP_BEGIN: u8 = 0x18;
/// Separator written after the timestamp.
const TIMESTAMP_END: u8 = 0x19;
/// Pad byte used to reach the 12-byte block size.
const PAD: u8 = b'1';
/// Block size for the intra-block byte swaps.
const BLOCK: usize = 12;

/// Greeting sent immediately after TCP connect, before any login prompt.
pub const GREETING: &[u8] = b"TIMESEAL2|freeseal|Free Chess Club|";

/// In-band heartbeat token the server embeds in its output stream.
pub const HEARTBEAT: &[u8] = b"[G]\x00";

/// Payload sealed and sent back for every heartbeat occurrence.
pub const HEARTBEAT_REPLY: &[u8] = &[0x02, 0x39];

// ── Encoding ──────────────────────────────────────────────────────────────

/// Seal `cmd` with the current wall-clock time.
///
/// `cmd` is one ICS command without a trailing newline; the frame carries
/// its own terminator.
pub fn encode(cmd: &[u8]) -> Vec<u8> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    encode_at(cmd, millis)
}

/// Seal `cmd` with an explicit timestamp in milliseconds since the Unix
/// epoch.  The timestamp unit is wire-visible; the server rejects frames
/// stamped in seconds or nanoseconds.
pub fn encode_at(cmd: &[u8], millis: u64) -> Vec<u8> {
    let mut s = Vec::with_capacity(cmd.len() + 30);
    s.extend_from_slice(cmd);

    s.push(TIMESTAMP_BEGIN);
    s.extend_from_slice(millis.to_string().as_bytes());
    s.push(TIMESTAMP_END);

    while s.len() % BLOCK != 0 {
        s.push(PAD);
    }
    let n = s.len();

    // Swap three fixed byte pairs within every 12-byte block.
    for b in (0..n).step_by(BLOCK) {
        s.swap(b, b + 11);
        s.swap(b + 2, b + 9);
        s.swap(b + 4, b + 7);
    }

    // Keystream transform: signed-8-bit arithmetic, stored unsigned.
    for (i, byte) in s.iter_mut().enumerate() {
        *byte = ((*byte | 0x80) ^ KEY[i % KEY.len()]).wrapping_sub(32);
    }

    s.push(0x80);
    s.push(b'\n');
    s
}

// ── Decoding ──────────────────────────────────────────────────────────────

/// Reference inverse of [`encode_at`]; returns `(cmd, millis)`.
///
/// The gateway never decodes frames in production — FICS does — but the
/// inverse pins the wire format: the test suite and the fake upstream in
/// the integration tests round-trip every frame through it.  Only
/// meaningful for commands of 7-bit bytes; the keystream transform masks
/// the high bit.
pub fn decode(frame: &[u8]) -> Option<(Vec<u8>, u64)> {
    let body = frame.strip_suffix(&[0x80, b'\n'])?;
    let mut s: Vec<u8> = body
        .iter()
        .enumerate()
        .map(|(i, &b)| (b.wrapping_add(32) ^ KEY[i % KEY.len()]) & 0x7F)
        .collect();
    let n = s.len();
    if n % BLOCK != 0 {
        return None;
    }
    for b in (0..n).step_by(BLOCK) {
        s.swap(b, b + 11);
        s.swap(b + 2, b + 9);
        s.swap(b + 4, b + 7);
    }
    // Padding sits after the end separator; both separators are the last
    // of their kind in the buffer.
    let end = s.iter().rposition(|&b| b == TIMESTAMP_END)?;
    if s[end + 1..].iter().any(|&b| b != PAD) {
        return None;
    }
    let begin = s[..end].iter().rposition(|&b| b == TIMESTAMP_BEGIN)?;
    let millis = std::str::from_utf8(&s[begin + 1..end]).ok()?.parse().ok()?;
    s.truncate(begin);
    Some((s, millis))
}

// ── Heartbeats ────────────────────────────────────────────────────────────

/// Remove every `[G]\0` heartbeat token from `buf`.
///
/// Returns the residual bytes in their original order and the number of
/// tokens removed; the caller must answer each one by sealing
/// [`HEARTBEAT_REPLY`] and writing it upstream.  Tokens may appear
/// anywhere, including mid-message.
///
/// Removal repeats until no token remains: deleting a token can splice
/// its neighbours into a new one (`[G][G]\0\0`), and the residual stream
/// must never carry the sequence.
pub fn strip_heartbeats(buf: &[u8]) -> (Vec<u8>, usize) {
    let (mut out, mut count) = strip_pass(buf);
    loop {
        let (next, n) = strip_pass(&out);
        if n == 0 {
            return (out, count);
        }
        count += n;
        out = next;
    }
}

fn strip_pass(buf: &[u8]) -> (Vec<u8>, usize) {
    let mut out = Vec::with_capacity(buf.len());
    let mut count = 0;
    let mut i = 0;
    while i < buf.len() {
        if buf[i..].starts_with(HEARTBEAT) {
            count += 1;
            i += HEARTBEAT.len();
        } else {
            out.push(buf[i]);
            i += 1;
        }
    }
    (out, count)
}

// ── Tests ─────────────────────────────────────────────────────────────────
