// CORS middleware configuration.
//
// Allowed origins come from `ENSEMBLE_SERVER_CORS_ORIGINS` (comma-
// separated) via [`crate::config::ServerConfig`], with permissive
// localhost defaults for development. The CSRF rotation headers must be
// exposed or the browser client cannot capture rotated tokens.

use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Default origins allowed when `ENSEMBLE_SERVER_CORS_ORIGINS` is unset.
const DEFAULT_DEV_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:5173",
    "http://127.0.0.1:3000",
    "http://127.0.0.1:5173",
];

/// Build a [`CorsLayer`] from the configured origin list.
///
/// - `Some("*")` allows any origin (and drops credentials, which cookies
///   require; a wildcard deployment is for token-less tooling only).
/// - `Some(list)` allows exactly those origins.
/// - `None` allows the default development origins.
pub fn cors_layer(configured_origins: Option<&str>) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            HeaderName::from_static("x-request-id"),
            HeaderName::from_static("x-token-csrf"),
            HeaderName::from_static("x-token-xsrf"),
            HeaderName::from_static("x-xsrf-token"),
        ])
        .expose_headers([
            HeaderName::from_static("x-request-id"),
            HeaderName::from_static("x-token-csrf"),
            HeaderName::from_static("x-token-xsrf"),
        ])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600));

    match configured_origins {
        Some("*") => base.allow_origin(AllowOrigin::any()).allow_credentials(false),
        Some(origins) => base.allow_origin(parse_origins(origins)),
        None => base.allow_origin(parse_origins(&DEFAULT_DEV_ORIGINS.join(","))),
    }
}

fn parse_origins(comma_separated: &str) -> Vec<HeaderValue> {
    comma_separated
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| HeaderValue::from_str(s).ok())
        .collect()
}
