// Core domain types shared across all Ensemble crates.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered member account.
///
/// Registration and deletion happen outside this core; the server only
/// resolves members for authentication and authorship attribution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub id: Uuid,
    pub email: String,
    pub firstname: String,
    pub lastname: String,
}

/// A positioned element inside a composition.
///
/// `style` and the flattened extra properties are opaque to the server:
/// they are stored and broadcast verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompositionElement {
    pub id: Uuid,
    pub element_type: String,
    pub style: String,
    pub x: f64,
    pub y: f64,
    #[serde(flatten)]
    pub extra_properties: serde_json::Map<String, serde_json::Value>,
}

/// A full composition as returned to an authorized reader.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Composition {
    pub id: Uuid,
    pub title: String,
    pub collaborative: bool,
    pub owner: Member,
    pub elements: Vec<CompositionElement>,
    pub guests: Vec<Member>,
}

/// A listing row: everything a member needs to pick a composition to open.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompositionSummary {
    pub id: Uuid,
    pub title: String,
    pub collaborative: bool,
}

/// The two listings a member sees: compositions they own and compositions
/// they joined as a guest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemberCompositionSummaries {
    pub owned_compositions: Vec<CompositionSummary>,
    pub guest_compositions: Vec<CompositionSummary>,
}

/// A member currently subscribed to a composition topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectedMember {
    pub email: String,
    pub id: Uuid,
}
