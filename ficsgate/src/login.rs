//! Interactive login against the ICS prompt grammar.
//!
//! Drives a freshly connected [`Telnet`] through the guest-or-registered
//! dialogue, captures the canonical handle from the session-start banner,
//! and applies the session options the gateway depends on (`set seek 0`,
//! `set echo 1`, `set style 12`, `set interface www.freechess.club`).
//!
//! All reads use the short login deadline; any I/O failure is terminal for
//! session creation.  An authentication refusal is reported with the
//! server's own text so it can be surfaced to the client.

use std::io;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::telnet::{Telnet, LOGIN_READ_DEADLINE};
use crate::timeseal;

/// Options applied after authentication, in order.  Each is acknowledged
/// by one output line before the next is sent.
const SESSION_OPTIONS: [&str; 4] = [
    "set seek 0",
    "set echo 1",
    "set style 12",
    "set interface www.freechess.club",
];

/// Captures the canonical handle from the session-start banner, e.g.
/// `Starting FICS session as GuestXYZW(U)`.
static SESSION_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Starting FICS session as ([a-zA-Z]+)").unwrap());

// ── Errors ────────────────────────────────────────────────────────────────

/// Why a login attempt failed.
#[derive(Debug)]
pub enum LoginError {
    /// The server refused the credentials; carries its refusal text.
    Auth(String),
    /// The dialogue broke down at the transport level.
    Io(io::Error),
}

impl std::fmt::Display for LoginError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoginError::Auth(msg) => write!(f, "authentication failed: {msg}"),
            LoginError::Io(e) => write!(f, "login dialogue failed: {e}"),
        }
    }
}

impl std::error::Error for LoginError {}

impl From<io::Error> for LoginError {
    fn from(e: io::Error) -> Self {
        LoginError::Io(e)
    }
}

// ── State machine ─────────────────────────────────────────────────────────

/// Authenticate `user` on `telnet` and configure the session.
///
/// Empty or `guest` usernames take the guest path; anything else is a
/// registered handle and `pass` is sent at the password prompt.  Returns
/// the canonical handle the server assigned.
pub async fn run(telnet: &mut Telnet, user: &str, pass: &str) -> Result<String, LoginError> {
    let deadline = LOGIN_READ_DEADLINE;
    telnet.read_until(&[b"login:"], deadline).await?;

    let handle = if is_guest(user) {
        telnet.write(&timeseal::encode(b"guest")).await?;
        telnet
            .read_until(&[b"Press return to enter the server as"], deadline)
            .await?;
        telnet.write(&timeseal::encode(b"")).await?;
        read_banner(telnet, deadline).await?
    } else {
        telnet.write(&timeseal::encode(user.as_bytes())).await?;
        telnet.read_until(&[b"password:"], deadline).await?;
        telnet.write(&timeseal::encode(pass.as_bytes())).await?;
        read_banner(telnet, deadline).await?
    };

    for opt in SESSION_OPTIONS {
        telnet.write(&timeseal::encode(opt.as_bytes())).await?;
        telnet.read_until(&[b"\n"], deadline).await?;
    }

    Ok(handle)
}

fn is_guest(user: &str) -> bool {
    user.is_empty() || user.eq_ignore_ascii_case("guest")
}

/// Read the `**** … ****` banner that follows the final credential and
/// extract the handle, or surface the refusal text.
async fn read_banner(telnet: &mut Telnet, deadline: Duration) -> Result<String, LoginError> {
    telnet.read_until(&[b"****"], deadline).await?;
    let banner = telnet.read_until(&[b"****"], deadline).await?;
    let text = String::from_utf8_lossy(&banner);
    let text = text.trim_end_matches('*').trim();

    match SESSION_START_RE.captures(text) {
        Some(c) => Ok(c[1].to_owned()),
        None => Err(LoginError::Auth(text.to_owned())),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeseal::decode;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn is_guest_detection() {
        assert!(is_guest(""));
        assert!(is_guest("guest"));
        assert!(is_guest("GUEST"));
        assert!(!is_guest("Newton"));
    }

    #[test]
    fn banner_regex_strips_display_tags() {
        let c = SESSION_START_RE
            .captures("Starting FICS session as GuestXYZW(U)")
            .unwrap();
        assert_eq!(&c[1], "GuestXYZW");

        let c = SESSION_START_RE
            .captures("Starting FICS session as Newton")
            .unwrap();
        assert_eq!(&c[1], "Newton");
    }

    /// Read one timeseal frame (terminated by `0x80 0x0A`) off `sock` and
    /// return the decoded command.
    async fn read_command(sock: &mut TcpStream) -> Vec<u8> {
        let mut frame = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            sock.read_exact(&mut byte).await.unwrap();
            frame.push(byte[0]);
            if frame.len() >= 2 && frame[frame.len() - 2] == 0x80 && frame[frame.len() - 1] == b'\n'
            {
                if let Some((cmd, _)) = decode(&frame) {
                    return cmd;
                }
                // 0x80 0x0A can occur mid-frame; keep reading.
            }
        }
    }

    async fn expect_command(sock: &mut TcpStream, want: &[u8]) {
        let got = read_command(sock).await;
        assert_eq!(
            got,
            want,
            "expected {:?}, got {:?}",
            String::from_utf8_lossy(want),
            String::from_utf8_lossy(&got)
        );
    }

    /// Fake FICS guest dialogue used by the loopback tests.
    async fn fake_guest_server(listener: TcpListener) {
        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(b"login: ").await.unwrap();
        expect_command(&mut sock, b"guest").await;
        sock.write_all(b"Press return to enter the server as \"GuestXYZW\":\n")
            .await
            .unwrap();
        expect_command(&mut sock, b"").await;
        sock.write_all(b"\n**** Starting FICS session as GuestXYZW(U) ****\n")
            .await
            .unwrap();
        for _ in 0..4 {
            let _ = read_command(&mut sock).await;
            sock.write_all(b"ack\n").await.unwrap();
        }
    }

    #[tokio::test]
    async fn guest_login_captures_handle() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(fake_guest_server(listener));

        let mut telnet = Telnet::connect(&addr.to_string(), 1, Duration::from_secs(1))
            .await
            .unwrap();
        let handle = run(&mut telnet, "guest", "").await.unwrap();
        assert_eq!(handle, "GuestXYZW");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn registered_login_sends_password_and_options() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"login: ").await.unwrap();
            expect_command(&mut sock, b"Newton").await;
            sock.write_all(b"password: ").await.unwrap();
            expect_command(&mut sock, b"apple").await;
            sock.write_all(b"\n**** Starting FICS session as Newton ****\n")
                .await
                .unwrap();
            let mut options = Vec::new();
            for _ in 0..4 {
                options.push(read_command(&mut sock).await);
                sock.write_all(b"ack\n").await.unwrap();
            }
            options
        });

        let mut telnet = Telnet::connect(&addr.to_string(), 1, Duration::from_secs(1))
            .await
            .unwrap();
        let handle = run(&mut telnet, "Newton", "apple").await.unwrap();
        assert_eq!(handle, "Newton");

        let options = server.await.unwrap();
        let expect: Vec<Vec<u8>> = SESSION_OPTIONS
            .iter()
            .map(|o| o.as_bytes().to_vec())
            .collect();
        assert_eq!(options, expect);
    }

    #[tokio::test]
    async fn refused_password_is_auth_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"login: ").await.unwrap();
            let _ = read_command(&mut sock).await;
            sock.write_all(b"password: ").await.unwrap();
            let _ = read_command(&mut sock).await;
            sock.write_all(b"\n**** Invalid password! ****\nlogin: ")
                .await
                .unwrap();
        });

        let mut telnet = Telnet::connect(&addr.to_string(), 1, Duration::from_secs(1))
            .await
            .unwrap();
        let err = run(&mut telnet, "Newton", "wrong").await.unwrap_err();
        match err {
            LoginError::Auth(msg) => assert_eq!(msg, "Invalid password!"),
            other => panic!("expected Auth error, got {other}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(sock);
        });

        let mut telnet = Telnet::connect(&addr.to_string(), 1, Duration::from_secs(1))
            .await
            .unwrap();
        // The real login deadline is 10 s; use a short one directly so the
        // test stays fast.
        let err = telnet
            .read_until(&[b"login:"], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
