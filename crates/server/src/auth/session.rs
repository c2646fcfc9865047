// Cookie-bound session store.
//
// A session binds an authenticated member to an HTTP-only cookie and holds
// the single mutable CSRF token slot for that transport. Cookie values are
// hashed before being used as lookup keys so raw tokens never sit in the
// store. WebSocket connections resolve the same sessions at upgrade time.

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{FromRequestParts, Request},
    http::{request::Parts, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use ensemble_common::types::Member;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::auth::csrf::{generate_token, CsrfHeaderName};
use crate::error::{ErrorCode, ServerError};

pub const SESSION_COOKIE: &str = "ENSEMBLE_SESSION";

/// Request extension: the resolved session of the caller, inserted by the
/// session/CSRF guard when the session cookie is valid.
#[derive(Debug, Clone)]
pub struct CurrentSession {
    pub cookie_value: String,
    pub member: Member,
    pub csrf_token: String,
    pub csrf_header: CsrfHeaderName,
}

/// Response extension: a session created by the handler itself (login),
/// so the guard can rotate and attach the fresh CSRF token.
#[derive(Debug, Clone)]
pub struct SessionEstablished(pub String);

/// Extractor: the caller's session, if the guard resolved one. Infallible
/// so handlers on mixed anonymous/authenticated routes can branch
/// themselves.
#[derive(Debug, Clone)]
pub struct MaybeSession(pub Option<CurrentSession>);

impl<S> FromRequestParts<S> for MaybeSession
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<CurrentSession>().cloned()))
    }
}

#[derive(Debug, Clone)]
struct SessionRecord {
    member: Member,
    csrf_token: String,
    csrf_header: CsrfHeaderName,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<Vec<u8>, SessionRecord>>>,
}

fn hash_cookie_value(value: &str) -> Vec<u8> {
    Sha256::digest(value.as_bytes()).to_vec()
}

impl SessionStore {
    /// Create a session for `member`, issuing the initial CSRF token under
    /// `issue_header`. Returns the resolved view including the raw cookie
    /// value to hand to the client.
    pub async fn create(&self, member: Member, issue_header: CsrfHeaderName) -> CurrentSession {
        let cookie_value = generate_token();
        let csrf_token = generate_token();
        let record = SessionRecord {
            member: member.clone(),
            csrf_token: csrf_token.clone(),
            csrf_header: issue_header,
            created_at: Utc::now(),
        };
        self.sessions.write().await.insert(hash_cookie_value(&cookie_value), record);

        CurrentSession { cookie_value, member, csrf_token, csrf_header: issue_header }
    }

    pub async fn resolve(&self, cookie_value: &str) -> Option<CurrentSession> {
        let guard = self.sessions.read().await;
        let record = guard.get(&hash_cookie_value(cookie_value))?;
        Some(CurrentSession {
            cookie_value: cookie_value.to_owned(),
            member: record.member.clone(),
            csrf_token: record.csrf_token.clone(),
            csrf_header: record.csrf_header,
        })
    }

    pub async fn destroy(&self, cookie_value: &str) -> bool {
        self.sessions.write().await.remove(&hash_cookie_value(cookie_value)).is_some()
    }

    /// Replace the session's CSRF token. The previous value stops being
    /// accepted at the next admission; requests already admitted with it
    /// run to completion. Exactly one token is valid afterwards.
    pub async fn rotate_csrf(&self, cookie_value: &str) -> Option<(CsrfHeaderName, String)> {
        let mut guard = self.sessions.write().await;
        let record = guard.get_mut(&hash_cookie_value(cookie_value))?;
        let next_token = generate_token();
        record.csrf_token = next_token.clone();
        Some((record.csrf_header, next_token))
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn created_at(&self, cookie_value: &str) -> Option<DateTime<Utc>> {
        self.sessions
            .read()
            .await
            .get(&hash_cookie_value(cookie_value))
            .map(|record| record.created_at)
    }
}

/// Route-group middleware: reject requests whose caller has no resolved
/// session. Layered inside the session/CSRF guard, which inserts
/// [`CurrentSession`].
pub async fn require_session(request: Request, next: Next) -> Response {
    if request.extensions().get::<CurrentSession>().is_none() {
        return ServerError::from_code(ErrorCode::AuthenticationRequired).into_response();
    }
    next.run(request).await
}

pub fn session_set_cookie(cookie_value: &str) -> HeaderValue {
    HeaderValue::from_str(&format!(
        "{SESSION_COOKIE}={cookie_value}; Path=/; HttpOnly; SameSite=Lax"
    ))
    .expect("session cookie value should be a valid header")
}

pub fn session_clear_cookie() -> HeaderValue {
    HeaderValue::from_static(
        "ENSEMBLE_SESSION=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
    )
}
