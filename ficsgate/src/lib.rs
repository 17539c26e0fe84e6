//! ficsgate — a WebSocket gateway to the Free Internet Chess Server.
//!
//! Browser clients cannot speak FICS's telnet dialect or its timeseal
//! framing layer.  This crate bridges the two worlds, one session per
//! client:
//!
//! ```text
//!   browser ── WebSocket ──► gate ──► session ──► timeseal ──► telnet ──► FICS
//!                                       ▲                                  │
//!                                       └── parser ◄── prompt framing ◄────┘
//! ```
//!
//! Outbound client commands are sealed by [`timeseal`] and written to the
//! upstream [`telnet`] connection.  Inbound server output is framed at
//! the `fics%` prompt, classified by [`parser`] into the typed events of
//! [`msg`], and forwarded as JSON frames.  [`login`] drives the
//! interactive authentication dialogue, [`session`] owns the per-client
//! pumps and teardown, and [`gate`] is the WebSocket front door.

pub mod config;
pub mod gate;
pub mod login;
pub mod msg;
pub mod parser;
pub mod session;
pub mod telnet;
pub mod timeseal;
