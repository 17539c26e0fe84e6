//! WebSocket front door.
//!
//! Accepts TCP connections, performs the WebSocket upgrade on `/ws` with
//! the origin policy applied in the handshake callback, optionally runs
//! the inline credential handshake, and hands each accepted client to a
//! new [`Session`] on its own task.  The per-connection read loop doubles
//! as the session's write driver: `ctl` frames with `command=0` are
//! forwarded upstream, pongs feed the liveness clock, and any read
//! failure tears the session down.
//!
//! The outer HTTP router (static assets, contact relay) is not this
//! gateway's concern; the upgrade entry is the only HTTP surface served.

use std::net::SocketAddr;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::msg;
use crate::session::{Session, LIVENESS_TIMEOUT};

/// Maximum size of one inbound client frame.
const READ_LIMIT: usize = 2048;

/// User agents carrying this substring bypass the origin check.
const TRUSTED_UA: &str = "Free Chess Club";

// ── Errors ────────────────────────────────────────────────────────────────

/// Why a connection was dropped before a session existed.
#[derive(Debug)]
pub enum GateError {
    Handshake(tokio_tungstenite::tungstenite::Error),
    /// The inline credential handshake was malformed.
    Credentials(String),
}

impl std::fmt::Display for GateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateError::Handshake(e) => write!(f, "websocket handshake failed: {e}"),
            GateError::Credentials(msg) => write!(f, "credential handshake failed: {msg}"),
        }
    }
}

impl std::error::Error for GateError {}

// ── Accept loop ───────────────────────────────────────────────────────────

/// Accept connections forever, one spawned task per client.
pub async fn run(listener: TcpListener, cfg: Arc<Config>) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let cfg = Arc::clone(&cfg);
        tokio::spawn(async move {
            handle_connection(stream, peer, cfg).await;
        });
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, cfg: Arc<Config>) {
    let mut login_requested = false;
    let mut forwarded_for: Option<String> = None;

    let callback = |req: &Request, resp: Response| {
        if req.uri().path() != "/ws" {
            return Err(reject(StatusCode::NOT_FOUND, "no such endpoint"));
        }
        if !origin_allowed(req) {
            return Err(reject(StatusCode::FORBIDDEN, "origin not allowed"));
        }
        login_requested = has_login_param(req.uri().query());
        forwarded_for = header_str_owned(req, "x-forwarded-for");
        Ok(resp)
    };

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(READ_LIMIT);
    ws_config.max_frame_size = Some(READ_LIMIT);

    let mut ws =
        match tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(ws_config))
            .await
        {
            Ok(ws) => ws,
            Err(e) => {
                debug!(%peer, err = %e, "websocket upgrade rejected");
                return;
            }
        };

    let (user, pass) = if login_requested {
        match read_credentials(&mut ws).await {
            Ok(up) => up,
            Err(e) => {
                warn!(%peer, err = %e, "closing unauthenticated connection");
                let _ = ws
                    .close(Some(CloseFrame {
                        code: CloseCode::Policy,
                        reason: "invalid credentials".into(),
                    }))
                    .await;
                return;
            }
        }
    } else {
        ("guest".to_owned(), String::new())
    };

    let ip = forwarded_for.unwrap_or_else(|| peer.ip().to_string());

    let (session, mut ws_rx) = match Session::create(
        &user,
        &pass,
        &ip,
        ws,
        &cfg.fics_addr,
        LIVENESS_TIMEOUT,
    )
    .await
    {
        Ok(pair) => pair,
        Err(e) => {
            warn!(%peer, user = %user, err = %e, "failed to create session");
            return;
        }
    };
    info!(%peer, handle = %session.handle(), "session established");

    // This loop is the WebSocket's only reader: client commands, pongs
    // for the liveness clock, and the close that ends everything.
    while let Some(item) = ws_rx.next().await {
        match item {
            Ok(Message::Text(text)) => match msg::parse_ctl(text.as_str()) {
                Ok(req) if req.command == 0 => {
                    if let Err(e) = session.forward(&req.text).await {
                        warn!(handle = %session.handle(), err = %e, "failed to forward command");
                        break;
                    }
                }
                Ok(req) => {
                    debug!(handle = %session.handle(), command = req.command, "ignoring unexpected ctl command");
                }
                Err(e) => {
                    debug!(handle = %session.handle(), err = %e, "ignoring malformed client frame");
                }
            },
            Ok(Message::Pong(_)) => session.note_pong(),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(handle = %session.handle(), err = %e, "websocket read ended");
                break;
            }
        }
    }
    session.end().await;
}

fn reject(status: StatusCode, body: &str) -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some(body.to_owned()));
    *resp.status_mut() = status;
    resp
}

// ── Origin policy ─────────────────────────────────────────────────────────

/// Allow the upgrade when the client is the trusted app, no `Origin` is
/// present, or the origin's host equals the request `Host`.
fn origin_allowed(req: &Request) -> bool {
    if let Some(ua) = header_str(req, "user-agent") {
        if ua.contains(TRUSTED_UA) {
            return true;
        }
    }
    let Some(origin) = header_str(req, "origin") else {
        return true;
    };
    let Some(host) = header_str(req, "host") else {
        return false;
    };
    origin_host(origin).eq_ignore_ascii_case(host)
}

/// The `host[:port]` component of an origin value.
fn origin_host(origin: &str) -> &str {
    let rest = origin
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(origin);
    rest.split('/').next().unwrap_or(rest)
}

fn header_str<'r>(req: &'r Request, name: &str) -> Option<&'r str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

fn header_str_owned(req: &Request, name: &str) -> Option<String> {
    header_str(req, name)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// True when the query string carries a non-empty `login` parameter.
fn has_login_param(query: Option<&str>) -> bool {
    query
        .unwrap_or("")
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .any(|(key, value)| key == "login" && !value.is_empty())
}

// ── Credential handshake ──────────────────────────────────────────────────

/// One inline read expecting `ctl{command:1, text:"<user>,<b64-pass>"}`.
async fn read_credentials(
    ws: &mut WebSocketStream<TcpStream>,
) -> Result<(String, String), GateError> {
    let frame = match ws.next().await {
        Some(Ok(Message::Text(t))) => t,
        Some(Ok(_)) => return Err(GateError::Credentials("expected a text frame".to_owned())),
        Some(Err(e)) => return Err(GateError::Handshake(e)),
        None => return Err(GateError::Credentials("closed during handshake".to_owned())),
    };
    let req =
        msg::parse_ctl(frame.as_str()).map_err(|e| GateError::Credentials(e.to_string()))?;
    if req.command != 1 {
        return Err(GateError::Credentials(format!(
            "unexpected ctl command {}",
            req.command
        )));
    }
    parse_user_pass(&req.text)
}

/// Split `"<user>,<b64-pass>"` into plaintext credentials.
///
/// Contract with the client: the whole text is wrapped in one framing
/// byte at each end, so the first byte of the user field and the last
/// byte of the password field are stripped before use.
fn parse_user_pass(text: &str) -> Result<(String, String), GateError> {
    let parts: Vec<&str> = text.split(',').collect();
    let [user_raw, pass_raw] = parts.as_slice() else {
        return Err(GateError::Credentials(
            "malformed user/pass request".to_owned(),
        ));
    };

    let user = user_raw
        .get(1..)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| GateError::Credentials("empty user field".to_owned()))?;
    let encoded = pass_raw
        .get(..pass_raw.len().saturating_sub(1))
        .unwrap_or("");
    let pass = BASE64
        .decode(encoded)
        .map_err(|e| GateError::Credentials(format!("error decoding password: {e}")))?;
    let pass = String::from_utf8(pass)
        .map_err(|_| GateError::Credentials("password is not valid UTF-8".to_owned()))?;

    Ok((user.to_owned(), pass))
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn request(headers: &[(&str, &str)]) -> Request {
        let mut builder = Request::builder().uri("/ws");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn origin_allowed_for_trusted_user_agent() {
        let req = request(&[
            ("user-agent", "Free Chess Club desktop/2.0"),
            ("origin", "https://evil.example"),
            ("host", "gateway.example"),
        ]);
        assert!(origin_allowed(&req));
    }

    #[test]
    fn origin_allowed_without_origin_header() {
        let req = request(&[("host", "gateway.example")]);
        assert!(origin_allowed(&req));
    }

    #[test]
    fn origin_allowed_when_host_matches() {
        let req = request(&[
            ("origin", "https://gateway.example"),
            ("host", "gateway.example"),
        ]);
        assert!(origin_allowed(&req));

        let req = request(&[
            ("origin", "http://gateway.example:8080/play"),
            ("host", "gateway.example:8080"),
        ]);
        assert!(origin_allowed(&req));
    }

    #[test]
    fn origin_rejected_when_host_differs() {
        let req = request(&[
            ("origin", "https://evil.example"),
            ("host", "gateway.example"),
        ]);
        assert!(!origin_allowed(&req));
    }

    #[test]
    fn login_param_detection() {
        assert!(has_login_param(Some("login=1")));
        assert!(has_login_param(Some("a=b&login=yes")));
        assert!(!has_login_param(Some("login=")));
        assert!(!has_login_param(Some("a=b")));
        assert!(!has_login_param(None));
    }

    #[test]
    fn credentials_strip_framing_and_decode() {
        // Client sends `"Newton,YXBwbGU="` — quotes are the framing bytes.
        let (user, pass) = parse_user_pass("\"Newton,YXBwbGU=\"").unwrap();
        assert_eq!(user, "Newton");
        assert_eq!(pass, "apple");
    }

    #[test]
    fn credentials_reject_bad_base64() {
        let err = parse_user_pass("\"Newton,!!notb64!!\"").unwrap_err();
        assert!(matches!(err, GateError::Credentials(_)));
    }

    #[test]
    fn credentials_reject_wrong_shape() {
        assert!(parse_user_pass("justonefield").is_err());
        assert!(parse_user_pass("a,b,c").is_err());
        assert!(parse_user_pass(",").is_err());
    }
}
