// Server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. The CSRF issue header is part of configuration because the
// rotation mechanism is one code path with a configurable header name.

use std::net::SocketAddr;

use crate::auth::csrf::CsrfHeaderName;

/// Core server configuration.
///
/// Constructed via [`ServerConfig::from_env`] which reads environment
/// variables and falls back to sensible development defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// Header name under which rotated CSRF tokens are issued.
    pub csrf_issue_header: CsrfHeaderName,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `ensemble_server=debug`).
    pub log_filter: String,
    /// Seed demo member accounts and compositions at startup.
    pub seed_demo_data: bool,
}

impl ServerConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `ENSEMBLE_SERVER_HOST` | `0.0.0.0` |
    /// | `ENSEMBLE_SERVER_PORT` | `8080` |
    /// | `ENSEMBLE_SERVER_CSRF_HEADER` | `X-TOKEN-CSRF` |
    /// | `ENSEMBLE_SERVER_CORS_ORIGINS` | *(none — cors uses dev defaults)* |
    /// | `ENSEMBLE_SERVER_LOG_FILTER` | `info` |
    /// | `ENSEMBLE_SERVER_SEED_DEMO_DATA` | `false` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("ENSEMBLE_SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("ENSEMBLE_SERVER_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let csrf_issue_header = env("ENSEMBLE_SERVER_CSRF_HEADER")
            .ok()
            .and_then(|v| CsrfHeaderName::parse(&v))
            .unwrap_or(CsrfHeaderName::TokenCsrf);

        let cors_origins = env("ENSEMBLE_SERVER_CORS_ORIGINS").ok();

        let log_filter =
            env("ENSEMBLE_SERVER_LOG_FILTER").unwrap_or_else(|_| "info".into());

        let seed_demo_data = env("ENSEMBLE_SERVER_SEED_DEMO_DATA")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self { listen_addr, csrf_issue_header, cors_origins, log_filter, seed_demo_data }
    }
}
