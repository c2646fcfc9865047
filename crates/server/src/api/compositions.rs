use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use ensemble_common::protocol::orders::CompositionEvent;
use ensemble_common::types::{Composition, MemberCompositionSummaries};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use super::ApiState;
use crate::auth::session::CurrentSession;
use crate::error::{ErrorCode, ServerError};
use crate::store::CompositionAccess;
use crate::sync::broadcast::PrivateQueue;

#[derive(Debug, Deserialize)]
pub struct CreateCompositionRequest {
    pub title: String,
    #[serde(default)]
    pub collaborative: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCompositionRequest {
    pub title: Option<String>,
    pub collaborative: Option<bool>,
}

pub async fn list_compositions(
    State(state): State<ApiState>,
    Extension(session): Extension<CurrentSession>,
) -> Json<MemberCompositionSummaries> {
    Json(state.compositions.summaries_for(session.member.id).await)
}

pub async fn create_composition(
    State(state): State<ApiState>,
    Extension(session): Extension<CurrentSession>,
    Json(payload): Json<CreateCompositionRequest>,
) -> Result<(StatusCode, Json<Composition>), ServerError> {
    if payload.title.trim().is_empty() {
        return Err(ServerError::new(ErrorCode::ValidationFailed, "title is required"));
    }

    let composition = state
        .compositions
        .create(session.member.clone(), payload.title, payload.collaborative)
        .await;
    info!(composition_id = %composition.id, owner = %session.member.email, "composition created");
    Ok((StatusCode::CREATED, Json(composition)))
}

/// Reading a composition runs through the same gate as a topic subscribe:
/// a first authorized read of a collaborative composition joins the caller
/// as guest and announces it. Denied and missing are the same 404 so
/// private composition ids cannot be probed.
pub async fn get_composition(
    State(state): State<ApiState>,
    Extension(session): Extension<CurrentSession>,
    Path(composition_id): Path<Uuid>,
) -> Result<Json<Composition>, ServerError> {
    if state.gate.authorize(&session.member, composition_id).await.is_err() {
        return Err(ServerError::from_code(ErrorCode::NotFound));
    }
    let composition = state
        .compositions
        .get(composition_id)
        .await
        .ok_or_else(|| ServerError::from_code(ErrorCode::NotFound))?;
    Ok(Json(composition))
}

pub async fn update_composition(
    State(state): State<ApiState>,
    Extension(session): Extension<CurrentSession>,
    Path(composition_id): Path<Uuid>,
    Json(payload): Json<UpdateCompositionRequest>,
) -> Result<Json<Composition>, ServerError> {
    require_owner(&state, &session, composition_id).await?;
    let author_email = session.member.email.clone();

    if let Some(title) = payload.title {
        if title.trim().is_empty() {
            return Err(ServerError::new(ErrorCode::ValidationFailed, "title must not be empty"));
        }
        state.compositions.set_title(composition_id, title.clone()).await;
        state
            .broadcast
            .publish(
                composition_id,
                CompositionEvent::TitleChanged {
                    composition_id,
                    author_email: author_email.clone(),
                    title,
                },
            )
            .await;
    }

    if let Some(collaborative) = payload.collaborative {
        state.compositions.set_collaborative(composition_id, collaborative).await;
        let event = CompositionEvent::CollaborativeChanged {
            composition_id,
            author_email,
            collaborative,
            order_datetime: Utc::now(),
        };
        if collaborative {
            // Guests are not necessarily watching the topic yet; reach
            // them on their private queues.
            let guests = state.compositions.guests(composition_id).await.unwrap_or_default();
            for guest in guests {
                state
                    .broadcast
                    .publish_private(
                        guest.id,
                        PrivateQueue::Compositions,
                        composition_id,
                        event.clone(),
                    )
                    .await;
            }
        } else {
            state.broadcast.publish(composition_id, event).await;
        }
    }

    let composition = state
        .compositions
        .get(composition_id)
        .await
        .ok_or_else(|| ServerError::from_code(ErrorCode::NotFound))?;
    Ok(Json(composition))
}

pub async fn delete_composition(
    State(state): State<ApiState>,
    Extension(session): Extension<CurrentSession>,
    Path(composition_id): Path<Uuid>,
) -> Result<StatusCode, ServerError> {
    require_owner(&state, &session, composition_id).await?;

    // Tell every guest before the topic disappears.
    let guests = state.compositions.guests(composition_id).await.unwrap_or_default();
    let event = CompositionEvent::CompositionDeleted {
        composition_id,
        author_email: session.member.email.clone(),
    };
    for guest in guests {
        state
            .broadcast
            .publish_private(guest.id, PrivateQueue::Compositions, composition_id, event.clone())
            .await;
    }

    state.compositions.remove(composition_id).await;
    state.broadcast.drop_topic(composition_id).await;
    info!(composition_id = %composition_id, "composition deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn require_owner(
    state: &ApiState,
    session: &CurrentSession,
    composition_id: Uuid,
) -> Result<(), ServerError> {
    match state.compositions.access_for(composition_id, session.member.id).await {
        CompositionAccess::Owner => Ok(()),
        CompositionAccess::Missing => Err(ServerError::from_code(ErrorCode::NotFound)),
        _ => Err(ServerError::new(
            ErrorCode::AuthorizationDenied,
            "only the owner may change the composition",
        )),
    }
}
