// Client orders and server events for composition topics.
//
// Both sides of the realtime channel speak `orderType`-tagged JSON objects
// with camelCase payload fields. Orders are what a client publishes to
// `/app/compositions.<id>`; events are what the server broadcasts on
// `/topic/compositions.<id>` (or delivers on a private queue) after the
// order has been applied. The server always stamps `compositionId` and
// `authorEmail` itself; client-supplied values are ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{CompositionElement, ConnectedMember};

/// A client-authored mutation order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "orderType")]
pub enum CompositionOrder {
    #[serde(rename = "compositionTitleChanged", rename_all = "camelCase")]
    TitleChanged { title: String },

    #[serde(rename = "compositionCollaborativeChanged", rename_all = "camelCase")]
    CollaborativeChanged { collaborative: bool },

    #[serde(rename = "elementAdded", rename_all = "camelCase")]
    ElementAdded { element: CompositionElement },

    #[serde(rename = "elementChanged", rename_all = "camelCase")]
    ElementChanged { element: CompositionElement },

    #[serde(rename = "elementPositionChanged", rename_all = "camelCase")]
    ElementPositionChanged { element_id: Uuid, x: f64, y: f64 },

    #[serde(rename = "elementDeleted", rename_all = "camelCase")]
    ElementDeleted { element_id: Uuid },
}

impl CompositionOrder {
    pub fn order_type(&self) -> &'static str {
        match self {
            Self::TitleChanged { .. } => "compositionTitleChanged",
            Self::CollaborativeChanged { .. } => "compositionCollaborativeChanged",
            Self::ElementAdded { .. } => "elementAdded",
            Self::ElementChanged { .. } => "elementChanged",
            Self::ElementPositionChanged { .. } => "elementPositionChanged",
            Self::ElementDeleted { .. } => "elementDeleted",
        }
    }
}

/// A server-stamped event delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "orderType")]
pub enum CompositionEvent {
    /// A member became a guest of the composition. Emitted exactly once,
    /// on first authorized join, never on re-subscribe.
    #[serde(rename = "MEMBER_JOINED")]
    MemberJoined { email: String, id: Uuid },

    /// A member's subscription to the topic ended.
    #[serde(rename = "MEMBER_LEFT")]
    MemberLeft { email: String, id: Uuid },

    /// Private-queue roster snapshot sent to a member right after joining.
    #[serde(rename = "CONNECTED_MEMBERS", rename_all = "camelCase")]
    ConnectedMembers { composition_id: Uuid, users: Vec<ConnectedMember> },

    #[serde(rename = "compositionTitleChanged", rename_all = "camelCase")]
    TitleChanged { composition_id: Uuid, author_email: String, title: String },

    #[serde(rename = "compositionCollaborativeChanged", rename_all = "camelCase")]
    CollaborativeChanged {
        composition_id: Uuid,
        author_email: String,
        collaborative: bool,
        order_datetime: DateTime<Utc>,
    },

    /// Private-queue notice to each guest before the composition goes away.
    #[serde(rename = "compositionDeleted", rename_all = "camelCase")]
    CompositionDeleted { composition_id: Uuid, author_email: String },

    #[serde(rename = "elementAdded", rename_all = "camelCase")]
    ElementAdded { composition_id: Uuid, author_email: String, element: CompositionElement },

    #[serde(rename = "elementChanged", rename_all = "camelCase")]
    ElementChanged { composition_id: Uuid, author_email: String, element: CompositionElement },

    #[serde(rename = "elementPositionChanged", rename_all = "camelCase")]
    ElementPositionChanged {
        composition_id: Uuid,
        author_email: String,
        element_id: Uuid,
        x: f64,
        y: f64,
    },

    #[serde(rename = "elementDeleted", rename_all = "camelCase")]
    ElementDeleted { composition_id: Uuid, author_email: String, element_id: Uuid },
}

impl CompositionEvent {
    pub fn order_type(&self) -> &'static str {
        match self {
            Self::MemberJoined { .. } => "MEMBER_JOINED",
            Self::MemberLeft { .. } => "MEMBER_LEFT",
            Self::ConnectedMembers { .. } => "CONNECTED_MEMBERS",
            Self::TitleChanged { .. } => "compositionTitleChanged",
            Self::CollaborativeChanged { .. } => "compositionCollaborativeChanged",
            Self::CompositionDeleted { .. } => "compositionDeleted",
            Self::ElementAdded { .. } => "elementAdded",
            Self::ElementChanged { .. } => "elementChanged",
            Self::ElementPositionChanged { .. } => "elementPositionChanged",
            Self::ElementDeleted { .. } => "elementDeleted",
        }
    }

    /// The acting identity, when the event has one (membership and roster
    /// events identify the subject instead).
    pub fn author_email(&self) -> Option<&str> {
        match self {
            Self::MemberJoined { .. } | Self::MemberLeft { .. } | Self::ConnectedMembers { .. } => {
                None
            }
            Self::TitleChanged { author_email, .. }
            | Self::CollaborativeChanged { author_email, .. }
            | Self::CompositionDeleted { author_email, .. }
            | Self::ElementAdded { author_email, .. }
            | Self::ElementChanged { author_email, .. }
            | Self::ElementPositionChanged { author_email, .. }
            | Self::ElementDeleted { author_email, .. } => Some(author_email),
        }
    }
}
