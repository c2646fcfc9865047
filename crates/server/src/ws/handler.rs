use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Request, State,
    },
    http::HeaderMap,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Extension, Router,
};
use chrono::Utc;
use ensemble_common::protocol::orders::{CompositionEvent, CompositionOrder};
use ensemble_common::protocol::ws::{Destination, WsFrame, CLOSE_NORMAL, CLOSE_POLICY};
use ensemble_common::types::Member;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use super::authz::TopicGate;
use super::protocol as ws_protocol;
use crate::auth::parse_cookies;
use crate::auth::session::{CurrentSession, SessionStore, SESSION_COOKIE};
use crate::error::{
    request_id_from_headers_or_generate, with_request_id_scope, ErrorCode, ServerError,
};
use crate::store::CompositionStore;
use crate::sync::broadcast::{BroadcastRouter, PrivateQueue};

pub(crate) const HEARTBEAT_INTERVAL_MS: u32 = 15_000;
pub(crate) const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;
pub(crate) const MAX_FRAME_BYTES: u32 = 262_144;

#[derive(Clone)]
pub struct WsState {
    pub sessions: SessionStore,
    pub compositions: CompositionStore,
    pub gate: TopicGate,
    pub broadcast: Arc<BroadcastRouter>,
}

pub fn router(state: WsState) -> Router {
    Router::new()
        .route(
            "/api/v1/websocket",
            get(ws_upgrade)
                .route_layer(middleware::from_fn_with_state(state.clone(), require_realtime_session)),
        )
        .with_state(state)
}

/// Resolve the session from the same cookie as REST, before the upgrade:
/// an unauthenticated caller is refused at the handshake, before any
/// subscription can be attempted.
async fn require_realtime_session(
    State(state): State<WsState>,
    mut request: Request,
    next: Next,
) -> Response {
    let cookies = parse_cookies(request.headers());
    let session: Option<CurrentSession> = match cookies.get(SESSION_COOKIE) {
        Some(value) => state.sessions.resolve(value).await,
        None => None,
    };
    let Some(session) = session else {
        return ServerError::from_code(ErrorCode::AuthenticationRequired).into_response();
    };
    request.extensions_mut().insert(session);
    next.run(request).await
}

pub async fn ws_upgrade(
    State(state): State<WsState>,
    Extension(session): Extension<CurrentSession>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let request_id = request_id_from_headers_or_generate(&headers);
    ws.max_frame_size(MAX_FRAME_BYTES as usize)
        .on_upgrade(move |socket| async move {
            with_request_id_scope(request_id, handle_socket(state, session, socket)).await;
        })
        .into_response()
}

fn policy_close(reason: &str) -> Message {
    Message::Close(Some(CloseFrame { code: CLOSE_POLICY, reason: reason.to_owned().into() }))
}

fn normal_close() -> Message {
    Message::Close(Some(CloseFrame { code: CLOSE_NORMAL, reason: "bye".into() }))
}

async fn close_frame_too_large(socket: &mut WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::SIZE,
            reason: format!("frame exceeds maximum size of {MAX_FRAME_BYTES} bytes").into(),
        })))
        .await;
}

async fn handle_socket(state: WsState, session: CurrentSession, mut socket: WebSocket) {
    // The first frame must be a connect carrying the CSRF material the
    // client captured over REST. Anything else forces a policy close.
    match socket.recv().await {
        Some(Ok(Message::Text(raw))) => match ws_protocol::decode_frame(&raw) {
            Ok(WsFrame::Connect { header_name: _, token }) => {
                if token != session.csrf_token {
                    let _ = ws_protocol::send_frame(
                        &mut socket,
                        &WsFrame::Error {
                            code: ErrorCode::StaleCsrfToken.as_str().to_string(),
                            message: "connect token does not match the session".to_string(),
                            destination: None,
                        },
                    )
                    .await;
                    let _ = socket.send(policy_close("handshake rejected")).await;
                    return;
                }
            }
            _ => {
                let _ = ws_protocol::send_frame(
                    &mut socket,
                    &WsFrame::Error {
                        code: "CONNECT_REQUIRED".to_string(),
                        message: "first frame must be a connect frame".to_string(),
                        destination: None,
                    },
                )
                .await;
                let _ = socket.send(policy_close("handshake rejected")).await;
                return;
            }
        },
        _ => return,
    }

    let ack = WsFrame::ConnectAck {
        server_time: Utc::now().to_rfc3339(),
        heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
    };
    if ws_protocol::send_frame(&mut socket, &ack).await.is_err() {
        return;
    }

    let member = session.member.clone();
    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<WsFrame>();
    let connection_id = state.broadcast.register(member.clone(), outbound_sender).await;
    info!(connection_id = %connection_id, member = %member.email, "realtime connection established");

    // Heartbeat: server pings every HEARTBEAT_INTERVAL_MS, disconnects if
    // no pong arrives within HEARTBEAT_TIMEOUT_MS.
    let mut heartbeat_interval =
        tokio::time::interval(std::time::Duration::from_millis(HEARTBEAT_INTERVAL_MS as u64));
    heartbeat_interval.reset(); // skip immediate first tick
    let mut last_pong = Instant::now();
    let heartbeat_timeout = std::time::Duration::from_millis(HEARTBEAT_TIMEOUT_MS);

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if last_pong.elapsed() > heartbeat_timeout {
                    warn!(connection_id = %connection_id, "heartbeat timeout, disconnecting");
                    break;
                }
                if socket.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(outbound_frame) => {
                        if ws_protocol::send_frame(&mut socket, &outbound_frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw)) => {
                        if raw.len() > MAX_FRAME_BYTES as usize {
                            close_frame_too_large(&mut socket).await;
                            break;
                        }

                        let inbound = match ws_protocol::decode_frame(&raw) {
                            Ok(frame) => frame,
                            Err(_) => {
                                let invalid = WsFrame::Error {
                                    code: "INVALID_FRAME".to_string(),
                                    message: "frame payload could not be decoded".to_string(),
                                    destination: None,
                                };
                                if ws_protocol::send_frame(&mut socket, &invalid).await.is_err() {
                                    break;
                                }
                                continue;
                            }
                        };

                        match inbound {
                            WsFrame::Subscribe { destination } => {
                                match handle_subscribe(&state, connection_id, &member, &destination).await {
                                    Ok(()) => {}
                                    Err(error_frame) => {
                                        // Denied subscriptions end the
                                        // connection: error frame, then a
                                        // policy close the client contract
                                        // names PolicyForced.
                                        let _ = ws_protocol::send_frame(&mut socket, &error_frame).await;
                                        let _ = socket.send(policy_close("subscription denied")).await;
                                        break;
                                    }
                                }
                            }
                            WsFrame::Unsubscribe { destination } => {
                                handle_unsubscribe(&state, connection_id, &member, &destination).await;
                            }
                            WsFrame::Send { destination, order } => {
                                handle_send(&state, connection_id, &member, &destination, order).await;
                            }
                            WsFrame::Disconnect => {
                                let _ = socket.send(normal_close()).await;
                                break;
                            }
                            WsFrame::Connect { .. }
                            | WsFrame::ConnectAck { .. }
                            | WsFrame::Event { .. }
                            | WsFrame::Error { .. } => {
                                let unsupported = WsFrame::Error {
                                    code: "UNSUPPORTED_FRAME".to_string(),
                                    message: "frame type is not valid from a client".to_string(),
                                    destination: None,
                                };
                                if ws_protocol::send_frame(&mut socket, &unsupported).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        last_pong = Instant::now();
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        }
    }

    disconnect_cleanup(&state, connection_id).await;
}

/// Destroy a connection's subscriptions and tell remaining subscribers the
/// member left each topic. Guest membership is untouched: joining is
/// sticky, leaving the realtime channel is not leaving the composition.
pub(crate) async fn disconnect_cleanup(state: &WsState, connection_id: Uuid) {
    let Some((member, topics)) = state.broadcast.remove(connection_id).await else {
        return;
    };
    for composition_id in topics {
        state
            .broadcast
            .publish(
                composition_id,
                CompositionEvent::MemberLeft { email: member.email.clone(), id: member.id },
            )
            .await;
    }
}

/// Process a subscribe frame. `Err` carries the error frame to send before
/// the policy close.
pub(crate) async fn handle_subscribe(
    state: &WsState,
    connection_id: Uuid,
    member: &Member,
    raw_destination: &str,
) -> Result<(), WsFrame> {
    match Destination::parse(raw_destination) {
        Some(Destination::ErrorQueue) => {
            state.broadcast.subscribe_queue(connection_id, PrivateQueue::Errors).await;
            Ok(())
        }
        Some(Destination::CompositionQueue) => {
            state.broadcast.subscribe_queue(connection_id, PrivateQueue::Compositions).await;
            Ok(())
        }
        Some(Destination::CompositionTopic(composition_id)) => {
            match state.gate.authorize(member, composition_id).await {
                Ok(_access) => {
                    state.broadcast.subscribe_topic(connection_id, composition_id).await;
                    let roster = state.broadcast.roster(composition_id).await;
                    state
                        .broadcast
                        .publish_private(
                            member.id,
                            PrivateQueue::Compositions,
                            composition_id,
                            CompositionEvent::ConnectedMembers {
                                composition_id,
                                users: roster,
                            },
                        )
                        .await;
                    Ok(())
                }
                Err(_denied) => Err(WsFrame::Error {
                    code: "SUBSCRIPTION_DENIED".to_string(),
                    message: "subscription denied".to_string(),
                    destination: Some(raw_destination.to_owned()),
                }),
            }
        }
        Some(Destination::CompositionApp(_)) | None => Err(WsFrame::Error {
            code: ErrorCode::ValidationFailed.as_str().to_string(),
            message: "destination is not subscribable".to_string(),
            destination: Some(raw_destination.to_owned()),
        }),
    }
}

/// Process an unsubscribe frame. Leaving a topic is announced with
/// `MEMBER_LEFT`; anything else is silent.
pub(crate) async fn handle_unsubscribe(
    state: &WsState,
    connection_id: Uuid,
    member: &Member,
    raw_destination: &str,
) {
    match Destination::parse(raw_destination) {
        Some(Destination::ErrorQueue) => {
            state.broadcast.unsubscribe_queue(connection_id, PrivateQueue::Errors).await;
        }
        Some(Destination::CompositionQueue) => {
            state.broadcast.unsubscribe_queue(connection_id, PrivateQueue::Compositions).await;
        }
        Some(Destination::CompositionTopic(composition_id)) => {
            if state.broadcast.unsubscribe_topic(connection_id, composition_id).await {
                state
                    .broadcast
                    .publish(
                        composition_id,
                        CompositionEvent::MemberLeft {
                            email: member.email.clone(),
                            id: member.id,
                        },
                    )
                    .await;
            }
        }
        Some(Destination::CompositionApp(_)) | None => {}
    }
}

/// Process a send frame. Failures surface on the sender's private error
/// queue, never as a silent drop and never as a broadcast.
pub(crate) async fn handle_send(
    state: &WsState,
    _connection_id: Uuid,
    member: &Member,
    raw_destination: &str,
    order: CompositionOrder,
) {
    let Some(Destination::CompositionApp(composition_id)) = Destination::parse(raw_destination)
    else {
        state
            .broadcast
            .publish_error(
                member.id,
                ErrorCode::ValidationFailed.as_str(),
                "orders must target an /app/compositions destination",
                Some(raw_destination.to_owned()),
            )
            .await;
        return;
    };

    if !state.compositions.can_edit_collaboratively(composition_id, member.id).await {
        state
            .broadcast
            .publish_error(
                member.id,
                ErrorCode::AuthorizationDenied.as_str(),
                "not allowed to edit this composition",
                Some(raw_destination.to_owned()),
            )
            .await;
        return;
    }

    match apply_order(state, member, composition_id, order).await {
        Ok(event) => {
            state.broadcast.publish(composition_id, event).await;
        }
        Err(message) => {
            state
                .broadcast
                .publish_error(
                    member.id,
                    ErrorCode::NotFound.as_str(),
                    &message,
                    Some(raw_destination.to_owned()),
                )
                .await;
        }
    }
}

/// Apply an order to the store and build the event to broadcast. The
/// author and composition id always come from the server, not the client.
pub(crate) async fn apply_order(
    state: &WsState,
    member: &Member,
    composition_id: Uuid,
    order: CompositionOrder,
) -> Result<CompositionEvent, String> {
    let author_email = member.email.clone();
    match order {
        CompositionOrder::TitleChanged { title } => {
            if state.compositions.set_title(composition_id, title.clone()).await {
                Ok(CompositionEvent::TitleChanged { composition_id, author_email, title })
            } else {
                Err("unknown composition".to_string())
            }
        }
        CompositionOrder::CollaborativeChanged { collaborative } => {
            if state.compositions.set_collaborative(composition_id, collaborative).await {
                Ok(CompositionEvent::CollaborativeChanged {
                    composition_id,
                    author_email,
                    collaborative,
                    order_datetime: Utc::now(),
                })
            } else {
                Err("unknown composition".to_string())
            }
        }
        CompositionOrder::ElementAdded { mut element } => {
            element.id = Uuid::new_v4();
            if state.compositions.push_element(composition_id, element.clone()).await {
                Ok(CompositionEvent::ElementAdded { composition_id, author_email, element })
            } else {
                Err("unknown composition".to_string())
            }
        }
        CompositionOrder::ElementChanged { element } => {
            if state.compositions.set_element(composition_id, element.clone()).await {
                Ok(CompositionEvent::ElementChanged { composition_id, author_email, element })
            } else {
                Err("unknown composition or element".to_string())
            }
        }
        CompositionOrder::ElementPositionChanged { element_id, x, y } => {
            if state.compositions.set_element_position(composition_id, element_id, x, y).await {
                Ok(CompositionEvent::ElementPositionChanged {
                    composition_id,
                    author_email,
                    element_id,
                    x,
                    y,
                })
            } else {
                Err("unknown composition or element".to_string())
            }
        }
        CompositionOrder::ElementDeleted { element_id } => {
            if state.compositions.pull_element(composition_id, element_id).await {
                Ok(CompositionEvent::ElementDeleted { composition_id, author_email, element_id })
            } else {
                Err("unknown composition or element".to_string())
            }
        }
    }
}
