//! Environment configuration.
//!
//! Everything is resolved once at startup; invalid values fall back to
//! defaults with a logged warning rather than aborting.

use tracing::warn;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_FICS_ADDR: &str = "freechess.org:5000";

/// Resolved process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the WebSocket front door listens on (`$PORT`).
    pub port: u16,
    /// Upstream ICS address (`$FICS_ADDR`).
    pub fics_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            fics_addr: DEFAULT_FICS_ADDR.to_owned(),
        }
    }
}

impl Config {
    /// Resolve configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var("PORT").ok().as_deref(),
            std::env::var("FICS_ADDR").ok().as_deref(),
        )
    }

    /// Resolve configuration from raw variable values.
    pub fn from_vars(port: Option<&str>, fics_addr: Option<&str>) -> Self {
        let port = match port {
            None | Some("") => DEFAULT_PORT,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(value = raw, "invalid PORT, using default");
                DEFAULT_PORT
            }),
        };
        let fics_addr = match fics_addr {
            None | Some("") => DEFAULT_FICS_ADDR.to_owned(),
            Some(addr) => addr.to_owned(),
        };
        Self { port, fics_addr }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::from_vars(None, None);
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.fics_addr, DEFAULT_FICS_ADDR);
    }

    #[test]
    fn explicit_values_win() {
        let cfg = Config::from_vars(Some("9090"), Some("127.0.0.1:5000"));
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.fics_addr, "127.0.0.1:5000");
    }

    #[test]
    fn invalid_port_falls_back() {
        let cfg = Config::from_vars(Some("not-a-port"), None);
        assert_eq!(cfg.port, DEFAULT_PORT);
    }

    #[test]
    fn empty_values_fall_back() {
        let cfg = Config::from_vars(Some(""), Some(""));
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.fics_addr, DEFAULT_FICS_ADDR);
    }
}
