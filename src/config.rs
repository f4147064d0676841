//! Runtime configuration for the gateway
//!
//! Connection parameters come from environment variables so the process runs
//! with no command-line flags; tunable constants are centralized here.

use std::env;
use std::time::Duration;

// ============================================================================
// Listener Configuration
// ============================================================================

/// Address the PostgreSQL listener binds to.
pub const LISTEN_ADDR: &str = "127.0.0.1:5432";

/// User name reported to the Trino coordinator on every statement.
pub const TRINO_USER: &str = "user";

// ============================================================================
// Backend HTTP Configuration
// ============================================================================

/// Timeout for the startup reachability probe against the coordinator.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for each HTTP round trip of the statement protocol
///
/// Covers a single POST or page fetch, not the whole query. Trino answers
/// long-running queries with intermediate pages, so per-request timeouts stay
/// short while the overall query can run much longer.
pub const STATEMENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum attempts for a retryable statement-protocol request
///
/// The coordinator answers 503 when its queue is saturated and expects the
/// client to re-issue the same request after a short delay.
pub const MAX_HTTP_RETRIES: u32 = 3;

/// Connection parameters for the Trino cluster.
#[derive(Debug, Clone)]
pub struct Config {
    pub trino_host: String,
    pub trino_port: String,
    pub trino_catalog: String,
    pub trino_schema: String,
}

impl Config {
    /// Build a config from the environment.
    ///
    /// Recognized variables and their defaults:
    /// - `TRINO_HOST` (localhost)
    /// - `TRINO_PORT` (8080)
    /// - `TRINO_CATALOG` (hive)
    /// - `TRINO_SCHEMA` (default)
    pub fn from_env() -> Self {
        Self {
            trino_host: env_or("TRINO_HOST", "localhost"),
            trino_port: env_or("TRINO_PORT", "8080"),
            trino_catalog: env_or("TRINO_CATALOG", "hive"),
            trino_schema: env_or("TRINO_SCHEMA", "default"),
        }
    }

    /// Base URL of the Trino coordinator.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.trino_host, self.trino_port)
    }
}

/// Returns the value of an environment variable or a default value if the
/// environment variable is not set.
fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
