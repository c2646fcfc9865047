use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap},
    response::{IntoResponse, Response},
    Extension, Json,
};
use ensemble_common::types::Member;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::ApiState;
use crate::auth::csrf::{generate_token, xsrf_set_cookie, DOUBLE_SUBMIT_HEADER, XSRF_COOKIE};
use crate::auth::parse_cookies;
use crate::auth::session::{
    session_clear_cookie, session_set_cookie, CurrentSession, MaybeSession, SessionEstablished,
};
use crate::error::{ErrorCode, ServerError};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsrfTokenResponse {
    pub header_name: String,
    pub token: String,
}

/// `POST /api/login`. Creates the session and hands the member identity
/// back; the guard attaches the freshly rotated CSRF token to the
/// response. A login on a transport that already carries a valid session
/// is a conflict: the existing session is never silently replaced.
pub async fn login(
    State(state): State<ApiState>,
    MaybeSession(session): MaybeSession,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, ServerError> {
    if session.is_some() {
        return Err(ServerError::from_code(ErrorCode::SessionConflict));
    }
    if payload.username.trim().is_empty() || payload.password.is_empty() {
        return Err(ServerError::new(
            ErrorCode::ValidationFailed,
            "username and password are required",
        ));
    }

    let member = state
        .members
        .authenticate(&payload.username, &payload.password)
        .await
        .ok_or_else(|| ServerError::from_code(ErrorCode::AuthInvalidCredentials))?;

    let established = state.sessions.create(member.clone(), state.config.csrf_issue_header).await;
    info!(member = %member.email, "login");

    let mut response = Json(member).into_response();
    response
        .headers_mut()
        .append(SET_COOKIE, session_set_cookie(&established.cookie_value));
    response.extensions_mut().insert(SessionEstablished(established.cookie_value));
    Ok(response)
}

/// `POST /api/logout`. Destroys the session and expires the cookie.
pub async fn logout(
    State(state): State<ApiState>,
    MaybeSession(session): MaybeSession,
) -> Result<Response, ServerError> {
    let Some(session) = session else {
        return Err(ServerError::from_code(ErrorCode::AuthenticationRequired));
    };

    state.sessions.destroy(&session.cookie_value).await;
    info!(member = %session.member.email, "logout");

    let mut response = Json(serde_json::json!({})).into_response();
    response.headers_mut().append(SET_COOKIE, session_clear_cookie());
    Ok(response)
}

/// `GET /api/v1/rest/csrf`. Bootstraps the realtime handshake: the caller
/// echoes exactly this header name and token in its connect frame.
pub async fn csrf_token(
    State(_state): State<ApiState>,
    MaybeSession(session): MaybeSession,
    headers: HeaderMap,
) -> Response {
    if let Some(session) = session {
        return Json(CsrfTokenResponse {
            header_name: session.csrf_header.as_str().to_string(),
            token: session.csrf_token,
        })
        .into_response();
    }

    // No session: the double-submit cookie is the token. Plant one if the
    // caller arrived bare so the login request can pass the guard.
    let cookies = parse_cookies(&headers);
    if let Some(cookie) = cookies.get(XSRF_COOKIE) {
        return Json(CsrfTokenResponse {
            header_name: DOUBLE_SUBMIT_HEADER.to_string(),
            token: cookie.clone(),
        })
        .into_response();
    }

    let token = generate_token();
    let mut response = Json(CsrfTokenResponse {
        header_name: DOUBLE_SUBMIT_HEADER.to_string(),
        token: token.clone(),
    })
    .into_response();
    response.headers_mut().append(SET_COOKIE, xsrf_set_cookie(&token));
    response
}

/// `GET /api/v1/rest/accounts/myself`.
pub async fn myself(Extension(session): Extension<CurrentSession>) -> Json<Member> {
    Json(session.member)
}
