//! Server configuration, loaded from environment variables.
//!
//! Everything the pipeline needs is known at startup: bind address, the
//! database, and the two metric thresholds. Bad values are startup errors,
//! never per-request errors.

use std::env;

/// Configuration errors surfaced at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Thresholds for the connection-detection heuristic.
#[derive(Debug, Clone)]
pub struct ConnectionHeuristic {
    /// An `answered` call must exceed this many seconds to count as
    /// connected; shorter calls are voicemail pickups and misdials.
    pub min_duration_secs: i64,
}

impl Default for ConnectionHeuristic {
    fn default() -> Self {
        Self {
            min_duration_secs: 5,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // Database settings
    pub database_url: String,
    pub database_max_connections: u32,

    // Metric thresholds
    /// Speed-to-lead values above this are treated as stale pairings and
    /// discarded.
    pub speed_to_lead_max_secs: i64,
    pub connection: ConnectionHeuristic,
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// `DATABASE_URL` is required; everything else has a default:
    /// `HOST` (0.0.0.0), `PORT` (8080), `DATABASE_MAX_CONNECTIONS` (5),
    /// `SPEED_TO_LEAD_MAX_SECS` (86400), `CONNECT_MIN_DURATION_SECS` (5).
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        Ok(ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_var("PORT", env::var("PORT").ok(), 8080)?,
            database_url,
            database_max_connections: parse_var(
                "DATABASE_MAX_CONNECTIONS",
                env::var("DATABASE_MAX_CONNECTIONS").ok(),
                5,
            )?,
            speed_to_lead_max_secs: parse_var(
                "SPEED_TO_LEAD_MAX_SECS",
                env::var("SPEED_TO_LEAD_MAX_SECS").ok(),
                86_400,
            )?,
            connection: ConnectionHeuristic {
                min_duration_secs: parse_var(
                    "CONNECT_MIN_DURATION_SECS",
                    env::var("CONNECT_MIN_DURATION_SECS").ok(),
                    5,
                )?,
            },
        })
    }

    /// Returns the socket address string for the server to bind to.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parses an optional environment value, falling back to a default when the
/// variable is unset and failing loudly when it is set but unparseable.
fn parse_var<T: std::str::FromStr>(
    name: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_var_uses_default_when_unset() {
        assert_eq!(parse_var("PORT", None, 8080u16).unwrap(), 8080);
    }

    #[test]
    fn parse_var_parses_set_values() {
        assert_eq!(
            parse_var("PORT", Some("3000".to_string()), 8080u16).unwrap(),
            3000
        );
        assert_eq!(
            parse_var("PORT", Some(" 3000 ".to_string()), 8080u16).unwrap(),
            3000
        );
    }

    #[test]
    fn parse_var_rejects_garbage() {
        let err = parse_var("PORT", Some("eighty".to_string()), 8080u16).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "PORT", .. }));
    }

    #[test]
    fn address_joins_host_and_port() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 9000,
            database_url: "postgres://localhost/leadwire".to_string(),
            database_max_connections: 5,
            speed_to_lead_max_secs: 86_400,
            connection: ConnectionHeuristic::default(),
        };
        assert_eq!(config.address(), "127.0.0.1:9000");
    }
}
