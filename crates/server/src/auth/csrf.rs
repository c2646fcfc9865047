// CSRF token rotation and validation.
//
// One rotation mechanism with a configurable issue header: rotated tokens
// are attached under `X-TOKEN-CSRF` or `X-TOKEN-XSRF` (synonyms; which one
// is a deployment choice, not a protocol branch). Requests may echo the
// token under either name, or fall back to the `X-XSRF-TOKEN` header backed
// by the `XSRF-TOKEN` double-submit cookie.
//
// Validation runs at admission, before any domain logic; rotation runs at
// response time and only for successful mutating exchanges. A request
// admitted with the prior token completes normally; the next admission on
// that session sees only the rotated token.

use axum::{
    extract::{Request, State},
    http::{
        header::{HeaderName, HeaderValue, SET_COOKIE},
        HeaderMap, Method,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;

use crate::auth::parse_cookies;
use crate::auth::session::{CurrentSession, SessionEstablished, SessionStore, SESSION_COOKIE};
use crate::error::{ErrorCode, ServerError};

pub const XSRF_COOKIE: &str = "XSRF-TOKEN";
pub const DOUBLE_SUBMIT_HEADER: &str = "X-XSRF-TOKEN";

/// The two synonymous rotation header names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfHeaderName {
    TokenCsrf,
    TokenXsrf,
}

impl CsrfHeaderName {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TokenCsrf => "X-TOKEN-CSRF",
            Self::TokenXsrf => "X-TOKEN-XSRF",
        }
    }

    pub fn header_name(self) -> HeaderName {
        match self {
            Self::TokenCsrf => HeaderName::from_static("x-token-csrf"),
            Self::TokenXsrf => HeaderName::from_static("x-token-xsrf"),
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case(Self::TokenCsrf.as_str()) {
            Some(Self::TokenCsrf)
        } else if raw.eq_ignore_ascii_case(Self::TokenXsrf.as_str()) {
            Some(Self::TokenXsrf)
        } else {
            None
        }
    }
}

/// Generate an opaque token: 32 random bytes, URL-safe base64.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// The anti-forgery token presented by a request, from any recognized
/// header. Rotation header names take precedence over the double-submit
/// fallback.
pub fn presented_token(headers: &HeaderMap) -> Option<String> {
    for name in [
        CsrfHeaderName::TokenCsrf.as_str(),
        CsrfHeaderName::TokenXsrf.as_str(),
        DOUBLE_SUBMIT_HEADER,
    ] {
        if let Some(value) = headers.get(name).and_then(|value| value.to_str().ok()) {
            return Some(value.to_owned());
        }
    }
    None
}

pub fn xsrf_set_cookie(token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("{XSRF_COOKIE}={token}; Path=/; SameSite=Lax"))
        .expect("csrf token should be a valid cookie value")
}

fn requires_token(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

fn response_sets_cookie(response: &Response, cookie_name: &str) -> bool {
    let prefix = format!("{cookie_name}=");
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.starts_with(&prefix))
}

/// The session/CSRF guard wrapped around the whole REST surface.
///
/// - Resolves the session cookie and stashes [`CurrentSession`] for
///   handlers and the `require_session` layer.
/// - Validates the anti-forgery token on mutating methods: against the
///   session's token slot when a session exists, against the double-submit
///   cookie otherwise.
/// - Rotates the session token after successful mutating exchanges and
///   attaches it under the session's issue header, mirroring the value into
///   the `XSRF-TOKEN` cookie.
/// - Ensures every caller ends up with an `XSRF-TOKEN` cookie so the next
///   anonymous mutating request (login) can pass the double-submit check.
pub async fn session_csrf_guard(
    State(sessions): State<SessionStore>,
    mut request: Request,
    next: Next,
) -> Response {
    let cookies = parse_cookies(request.headers());
    let session_cookie = cookies.get(SESSION_COOKIE).cloned();
    let session: Option<CurrentSession> = match session_cookie.as_deref() {
        Some(value) => sessions.resolve(value).await,
        None => None,
    };

    if requires_token(request.method()) {
        let presented = presented_token(request.headers());
        let valid = match (&session, presented.as_deref()) {
            (Some(current), Some(token)) => current.csrf_token == token,
            (None, Some(token)) => {
                cookies.get(XSRF_COOKIE).is_some_and(|cookie| cookie == token)
            }
            (_, None) => false,
        };
        if !valid {
            return ServerError::from_code(ErrorCode::StaleCsrfToken).into_response();
        }
    }

    if let Some(current) = session.clone() {
        request.extensions_mut().insert(current);
    }
    let mutating = requires_token(request.method());

    let mut response = next.run(request).await;

    if mutating && response.status().is_success() {
        let rotate_for = response
            .extensions()
            .get::<SessionEstablished>()
            .map(|established| established.0.clone())
            .or_else(|| session.as_ref().map(|current| current.cookie_value.clone()));

        if let Some(cookie_value) = rotate_for {
            if let Some((header, token)) = sessions.rotate_csrf(&cookie_value).await {
                if let Ok(value) = HeaderValue::from_str(&token) {
                    response.headers_mut().insert(header.header_name(), value);
                }
                response.headers_mut().append(SET_COOKIE, xsrf_set_cookie(&token));
            }
        }
    }

    if !cookies.contains_key(XSRF_COOKIE) && !response_sets_cookie(&response, XSRF_COOKIE) {
        response.headers_mut().append(SET_COOKIE, xsrf_set_cookie(&generate_token()));
    }

    response
}
