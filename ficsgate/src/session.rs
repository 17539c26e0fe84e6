//! Per-session protocol bridge.
//!
//! A [`Session`] couples one upstream telnet connection with one
//! downstream WebSocket.  Three concerns run against it:
//!
//! - the **reader pump** ([`Session::reader_pump`]): prompt-framed chunks
//!   from FICS are heartbeat-stripped, sanitized, parsed, and forwarded
//!   as JSON frames;
//! - the **liveness pump** ([`Session::liveness_pump`]): periodic
//!   WebSocket pings, with teardown when the client stops answering;
//! - the **write path** ([`Session::forward`]): client commands sealed
//!   through the timeseal codec onto the telnet, invoked by the front
//!   door's read loop.
//!
//! All downstream writes go through one write mutex, so event frames,
//! pings, and the close frame never interleave.  [`Session::end`] is the
//! once-only teardown: close frame downstream, `exit` upstream, then both
//! sockets; every pump observes it and exits.  Destruction is terminal —
//! a dropped upstream ends the session, there is no reconnect.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use crate::login::{self, LoginError};
use crate::msg::Event;
use crate::parser;
use crate::telnet::{Telnet, TelnetReader, TelnetWriter, STEADY_READ_DEADLINE};
use crate::timeseal;

/// Prompt string that terminates one logical server response.
const PROMPT: &[u8] = b"fics%";

/// Liveness window: the session is torn down when no pong arrives for
/// this long.  Pings go out every half window.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(80);

const CONNECT_RETRIES: u32 = 5;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
pub type WsSource = SplitStream<WebSocketStream<TcpStream>>;

// ── Errors ────────────────────────────────────────────────────────────────

/// Why a session could not be created.
#[derive(Debug)]
pub enum SessionError {
    /// The upstream TCP connection could not be established.
    Connect(io::Error),
    /// The login dialogue failed; auth refusals were already reported to
    /// the client as a `ctl` error frame.
    Login(LoginError),
    /// The downstream socket failed while reporting the login result.
    Ws(tokio_tungstenite::tungstenite::Error),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Connect(e) => write!(f, "upstream connect failed: {e}"),
            SessionError::Login(e) => write!(f, "{e}"),
            SessionError::Ws(e) => write!(f, "downstream write failed: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}

// ── Session ───────────────────────────────────────────────────────────────

/// One authenticated bridge between a WebSocket client and FICS.
#[derive(Debug)]
pub struct Session {
    handle: String,
    ws_tx: Mutex<WsSink>,
    telnet_tx: Mutex<TelnetWriter>,
    started: Instant,
    /// Milliseconds after `started` at which the last pong arrived.
    last_pong: AtomicU64,
    /// Once-only teardown guard.
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    liveness: Duration,
}

impl Session {
    /// Establish the upstream connection, authenticate, configure the ICS
    /// session, and start the pumps.
    ///
    /// On success the client has already received `ctl{command:1}` with
    /// the canonical handle, and the returned [`WsSource`] is the only
    /// reader of the WebSocket — the caller's loop drives the write path
    /// and pong bookkeeping.  On failure the WebSocket has been closed
    /// (after a `ctl{command:2}` frame if the server refused the
    /// credentials) and the upstream, if any, dropped.
    pub async fn create(
        user: &str,
        pass: &str,
        ip: &str,
        mut ws: WebSocketStream<TcpStream>,
        fics_addr: &str,
        liveness: Duration,
    ) -> Result<(Arc<Self>, WsSource), SessionError> {
        let mut telnet = match Telnet::connect(fics_addr, CONNECT_RETRIES, CONNECT_TIMEOUT).await
        {
            Ok(t) => t,
            Err(e) => {
                let _ = ws.close(None).await;
                return Err(SessionError::Connect(e));
            }
        };

        let handle = match Self::authenticate(&mut telnet, user, pass, ip).await {
            Ok(handle) => handle,
            Err(err) => {
                if let LoginError::Auth(ref msg) = err {
                    let frame = serde_json::to_string(&Event::login_failed(msg))
                        .expect("ctl frames always serialize");
                    let _ = ws.send(Message::text(frame)).await;
                }
                let _ = ws.close(None).await;
                return Err(SessionError::Login(err));
            }
        };

        let (telnet_rx, telnet_tx) = telnet.into_split();
        let (ws_tx, ws_rx) = ws.split();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let session = Arc::new(Session {
            handle,
            ws_tx: Mutex::new(ws_tx),
            telnet_tx: Mutex::new(telnet_tx),
            started: Instant::now(),
            last_pong: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            shutdown_tx,
            shutdown_rx,
            liveness,
        });

        let ok = Event::login_ok(&session.handle);
        session
            .send_event(&ok)
            .await
            .map_err(SessionError::Ws)?;

        tokio::spawn(Arc::clone(&session).liveness_pump());
        tokio::spawn(Arc::clone(&session).reader_pump(telnet_rx));

        Ok((session, ws_rx))
    }

    async fn authenticate(
        telnet: &mut Telnet,
        user: &str,
        pass: &str,
        ip: &str,
    ) -> Result<String, LoginError> {
        telnet.write(&timeseal::encode(timeseal::GREETING)).await?;
        if !ip.is_empty() {
            let reg = format!("%i{ip}");
            telnet.write(&timeseal::encode(reg.as_bytes())).await?;
        }
        login::run(telnet, user, pass).await
    }

    /// The canonical ICS handle this session authenticated as.
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Whether teardown has begun.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // ── Downstream writes ─────────────────────────────────────────────────

    /// Serialize one event and send it as a text frame.
    pub async fn send_event(
        &self,
        event: &Event,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        match serde_json::to_string(event) {
            Ok(json) => self.send_ws(Message::text(json)).await,
            Err(e) => {
                warn!(err = %e, "failed to serialize event");
                Ok(())
            }
        }
    }

    /// Send one frame under the write mutex.  Refused once teardown has
    /// begun, so no frame ever follows the close frame.
    async fn send_ws(
        &self,
        msg: Message,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        if self.is_closed() {
            return Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed);
        }
        self.ws_tx.lock().await.send(msg).await
    }

    // ── Upstream writes ───────────────────────────────────────────────────

    /// Seal a client command and write it upstream (`ctl` command 0).
    pub async fn forward(&self, text: &str) -> io::Result<()> {
        self.write_upstream(&timeseal::encode(text.as_bytes())).await
    }

    async fn write_upstream(&self, frame: &[u8]) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "session is closed",
            ));
        }
        self.telnet_tx.lock().await.write(frame).await
    }

    // ── Liveness ──────────────────────────────────────────────────────────

    /// Record a pong from the client.  Called by the front-door read loop,
    /// the only reader of the WebSocket.
    pub fn note_pong(&self) {
        self.last_pong
            .store(self.started.elapsed().as_millis() as u64, Ordering::SeqCst);
    }

    fn millis_since_pong(&self) -> u64 {
        let now = self.started.elapsed().as_millis() as u64;
        now.saturating_sub(self.last_pong.load(Ordering::SeqCst))
    }

    async fn liveness_pump(self: Arc<Self>) {
        let mut shutdown = self.shutdown_rx.clone();
        let period = self.liveness / 2;
        loop {
            if self
                .send_ws(Message::Ping(b"keepalive".to_vec().into()))
                .await
                .is_err()
            {
                self.end().await;
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = shutdown.changed() => return,
            }
            if self.millis_since_pong() > self.liveness.as_millis() as u64 {
                debug!(handle = %self.handle, "liveness window expired");
                self.end().await;
                return;
            }
        }
    }

    // ── Reader pump ───────────────────────────────────────────────────────

    async fn reader_pump(self: Arc<Self>, mut telnet: TelnetReader) {
        let mut shutdown = self.shutdown_rx.clone();
        loop {
            let chunk = tokio::select! {
                res = telnet.read_until(&[PROMPT], STEADY_READ_DEADLINE) => match res {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        debug!(handle = %self.handle, err = %e, "upstream read ended");
                        self.end().await;
                        return;
                    }
                },
                _ = shutdown.changed() => return,
            };

            let (clean, beats) = timeseal::strip_heartbeats(&chunk);
            for _ in 0..beats {
                if self
                    .write_upstream(&timeseal::encode(timeseal::HEARTBEAT_REPLY))
                    .await
                    .is_err()
                {
                    self.end().await;
                    return;
                }
            }

            let events = parser::parse(&parser::sanitize(&clean));
            let json = match events.as_slice() {
                [] => continue,
                [single] => serde_json::to_string(single),
                many => serde_json::to_string(many),
            };
            let json = match json {
                Ok(json) => json,
                Err(e) => {
                    warn!(handle = %self.handle, err = %e, "failed to serialize events");
                    continue;
                }
            };
            if self.send_ws(Message::text(json)).await.is_err() {
                self.end().await;
                return;
            }
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────

    /// Idempotent teardown: close frame downstream, `exit` upstream, close
    /// the telnet, close the WebSocket.  Concurrent callers after the
    /// first return immediately.
    pub async fn end(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);

        {
            let mut ws = self.ws_tx.lock().await;
            let _ = ws.send(Message::Close(None)).await;
        }
        {
            let mut telnet = self.telnet_tx.lock().await;
            let _ = telnet.write(&timeseal::encode(b"exit")).await;
            let _ = telnet.shutdown().await;
        }
        {
            let mut ws = self.ws_tx.lock().await;
            let _ = ws.close().await;
        }
        debug!(handle = %self.handle, "session ended");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
