use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use ensemble_common::protocol::orders::CompositionEvent;
use ensemble_common::types::CompositionElement;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ApiState;
use crate::auth::session::CurrentSession;
use crate::error::{ErrorCode, ServerError};
use crate::store::CompositionAccess;

#[derive(Debug, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub x: f64,
    pub y: f64,
}

/// Editing needs the owner, or a guest while the composition is
/// collaborative, the same rule the realtime order path enforces.
async fn require_editor(
    state: &ApiState,
    session: &CurrentSession,
    composition_id: Uuid,
) -> Result<(), ServerError> {
    let access = state.compositions.access_for(composition_id, session.member.id).await;
    if access == CompositionAccess::Missing {
        return Err(ServerError::from_code(ErrorCode::NotFound));
    }
    if state.compositions.can_edit_collaboratively(composition_id, session.member.id).await {
        Ok(())
    } else {
        Err(ServerError::new(
            ErrorCode::AuthorizationDenied,
            "not allowed to edit this composition",
        ))
    }
}

pub async fn add_element(
    State(state): State<ApiState>,
    Extension(session): Extension<CurrentSession>,
    Path(composition_id): Path<Uuid>,
    Json(mut element): Json<CompositionElement>,
) -> Result<(StatusCode, Json<CompositionElement>), ServerError> {
    require_editor(&state, &session, composition_id).await?;

    element.id = Uuid::new_v4();
    if !state.compositions.push_element(composition_id, element.clone()).await {
        return Err(ServerError::from_code(ErrorCode::NotFound));
    }
    state
        .broadcast
        .publish(
            composition_id,
            CompositionEvent::ElementAdded {
                composition_id,
                author_email: session.member.email.clone(),
                element: element.clone(),
            },
        )
        .await;
    Ok((StatusCode::CREATED, Json(element)))
}

pub async fn update_element(
    State(state): State<ApiState>,
    Extension(session): Extension<CurrentSession>,
    Path((composition_id, element_id)): Path<(Uuid, Uuid)>,
    Json(mut element): Json<CompositionElement>,
) -> Result<Json<CompositionElement>, ServerError> {
    require_editor(&state, &session, composition_id).await?;

    element.id = element_id;
    if !state.compositions.set_element(composition_id, element.clone()).await {
        return Err(ServerError::from_code(ErrorCode::NotFound));
    }
    state
        .broadcast
        .publish(
            composition_id,
            CompositionEvent::ElementChanged {
                composition_id,
                author_email: session.member.email.clone(),
                element: element.clone(),
            },
        )
        .await;
    Ok(Json(element))
}

pub async fn update_element_position(
    State(state): State<ApiState>,
    Extension(session): Extension<CurrentSession>,
    Path((composition_id, element_id)): Path<(Uuid, Uuid)>,
    Json(position): Json<PositionUpdate>,
) -> Result<Json<PositionUpdate>, ServerError> {
    require_editor(&state, &session, composition_id).await?;

    if !state
        .compositions
        .set_element_position(composition_id, element_id, position.x, position.y)
        .await
    {
        return Err(ServerError::from_code(ErrorCode::NotFound));
    }
    state
        .broadcast
        .publish(
            composition_id,
            CompositionEvent::ElementPositionChanged {
                composition_id,
                author_email: session.member.email.clone(),
                element_id,
                x: position.x,
                y: position.y,
            },
        )
        .await;
    Ok(Json(position))
}

pub async fn delete_element(
    State(state): State<ApiState>,
    Extension(session): Extension<CurrentSession>,
    Path((composition_id, element_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ServerError> {
    require_editor(&state, &session, composition_id).await?;

    if !state.compositions.pull_element(composition_id, element_id).await {
        return Err(ServerError::from_code(ErrorCode::NotFound));
    }
    state
        .broadcast
        .publish(
            composition_id,
            CompositionEvent::ElementDeleted {
                composition_id,
                author_email: session.member.email.clone(),
                element_id,
            },
        )
        .await;
    Ok(StatusCode::NO_CONTENT)
}
