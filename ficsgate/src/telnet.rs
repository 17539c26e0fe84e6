//! Telnet transport: a line-ish byte stream over TCP with deadlines.
//!
//! FICS speaks a plain-TCP telnet dialect with no option negotiation, so
//! the transport is deliberately thin: connect with retry, deadline-bounded
//! writes, and [`Telnet::read_until`] — the only read primitive upper
//! layers use.  It returns everything up to and including the first
//! matching delimiter and carries any bytes read past it over to the next
//! call.
//!
//! After login the connection splits into an owned reader and writer half
//! so the session's reader pump and write path can run concurrently.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Deadline applied to every write.
pub const WRITE_DEADLINE: Duration = Duration::from_secs(20);
/// Read deadline while driving the login dialogue.
pub const LOGIN_READ_DEADLINE: Duration = Duration::from_secs(10);
/// Read deadline between prompts in steady state.  FICS can sit quiet for
/// a long time; an hour bounds a dead upstream without cutting idle games.
pub const STEADY_READ_DEADLINE: Duration = Duration::from_secs(3600);

const READ_BUF: usize = 4096;

// ── Shared read/write plumbing ────────────────────────────────────────────

/// Position one past the end of the earliest delimiter match in `buf`.
fn earliest_match(buf: &[u8], delims: &[&[u8]]) -> Option<usize> {
    delims
        .iter()
        .filter(|d| !d.is_empty())
        .filter_map(|d| find(buf, d).map(|pos| pos + d.len()))
        .min()
}

/// First occurrence of `needle` in `haystack`.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn read_until_inner<R: AsyncRead + Unpin>(
    stream: &mut R,
    buf: &mut Vec<u8>,
    delims: &[&[u8]],
    deadline: Duration,
) -> io::Result<Vec<u8>> {
    let deadline = tokio::time::Instant::now() + deadline;
    loop {
        if let Some(end) = earliest_match(buf, delims) {
            let rest = buf.split_off(end);
            return Ok(std::mem::replace(buf, rest));
        }

        let mut raw = [0u8; READ_BUF];
        let n = tokio::time::timeout_at(deadline, stream.read(&mut raw))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read deadline expired"))??;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed the connection",
            ));
        }
        buf.extend_from_slice(&raw[..n]);
    }
}

async fn write_inner<W: AsyncWriteExt + Unpin>(stream: &mut W, bytes: &[u8]) -> io::Result<()> {
    timeout(WRITE_DEADLINE, stream.write_all(bytes))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write deadline expired"))?
}

// ── Telnet ────────────────────────────────────────────────────────────────

/// A telnet connection before the session splits it into halves.
///
/// The login state machine drives this directly; [`Telnet::into_split`]
/// hands the halves to the session's pumps afterwards.
pub struct Telnet {
    stream: TcpStream,
    /// Bytes read past the last returned delimiter.
    buf: Vec<u8>,
}

impl Telnet {
    /// Connect to `addr`, making up to `retries` sequential attempts of
    /// `per_try` each.  Succeeds on the first accepted TCP connection.
    pub async fn connect(addr: &str, retries: u32, per_try: Duration) -> io::Result<Self> {
        let mut last_err =
            io::Error::new(io::ErrorKind::InvalidInput, "zero connection attempts");
        for _ in 0..retries {
            match timeout(per_try, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    return Ok(Self {
                        stream,
                        buf: Vec::new(),
                    })
                }
                Ok(Err(e)) => last_err = e,
                Err(_) => {
                    last_err =
                        io::Error::new(io::ErrorKind::TimedOut, "connect attempt timed out")
                }
            }
        }
        Err(last_err)
    }

    /// Write `bytes` in full, bounded by [`WRITE_DEADLINE`].
    pub async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        write_inner(&mut self.stream, bytes).await
    }

    /// Read until one of `delims` appears, returning all bytes up to and
    /// including the first match.  Bytes past the match are retained for
    /// the next call.
    pub async fn read_until(
        &mut self,
        delims: &[&[u8]],
        deadline: Duration,
    ) -> io::Result<Vec<u8>> {
        read_until_inner(&mut self.stream, &mut self.buf, delims, deadline).await
    }

    /// Split into independently owned reader and writer halves.
    pub fn into_split(self) -> (TelnetReader, TelnetWriter) {
        let (read, write) = self.stream.into_split();
        (
            TelnetReader {
                stream: read,
                buf: self.buf,
            },
            TelnetWriter { stream: write },
        )
    }
}

/// Read half of a split [`Telnet`]; owns the carry-over buffer.
pub struct TelnetReader {
    stream: OwnedReadHalf,
    buf: Vec<u8>,
}

impl TelnetReader {
    /// See [`Telnet::read_until`].
    pub async fn read_until(
        &mut self,
        delims: &[&[u8]],
        deadline: Duration,
    ) -> io::Result<Vec<u8>> {
        read_until_inner(&mut self.stream, &mut self.buf, delims, deadline).await
    }
}

/// Write half of a split [`Telnet`].
#[derive(Debug)]
pub struct TelnetWriter {
    stream: OwnedWriteHalf,
}

impl TelnetWriter {
    /// See [`Telnet::write`].
    pub async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        write_inner(&mut self.stream, bytes).await
    }

    /// Flush and send FIN; the upstream ends the session on its side.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
