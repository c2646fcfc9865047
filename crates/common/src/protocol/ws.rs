// WebSocket frames for the ensemble realtime channel.
//
// The channel speaks subscribe/publish semantics over JSON text frames.
// Destinations are path-like strings: `/topic/compositions.<id>` for the
// per-composition broadcast, `/user/queue/errors` and
// `/user/queue/compositions` for the caller's private queues, and
// `/app/compositions.<id>` for client-published orders.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::protocol::orders::{CompositionEvent, CompositionOrder};

/// All message types on the realtime channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsFrame {
    /// Client -> Server: initial handshake. Echoes the CSRF header name and
    /// token captured from `GET /api/v1/rest/csrf`.
    Connect { header_name: String, token: String },

    /// Server -> Client: handshake acknowledgement.
    ConnectAck { server_time: String, heartbeat_interval_ms: u32 },

    /// Client -> Server: subscribe to a destination.
    Subscribe { destination: String },

    /// Client -> Server: cancel a subscription.
    Unsubscribe { destination: String },

    /// Client -> Server: publish an order to an `/app/...` destination.
    Send { destination: String, order: CompositionOrder },

    /// Server -> Client: a sequenced event on a topic or private queue.
    Event { destination: String, seq: i64, event: CompositionEvent },

    /// Server -> Client: error. Policy errors are followed by a close with
    /// code [`CLOSE_POLICY`].
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        destination: Option<String>,
    },

    /// Client -> Server: cooperative disconnect. The server answers with a
    /// normal close instead of dropping the socket.
    Disconnect,
}

/// Normal closure, sent after a cooperative `disconnect` frame.
pub const CLOSE_NORMAL: u16 = 1000;
/// Policy violation, sent after an authentication/authorization error frame.
pub const CLOSE_POLICY: u16 = 1008;

/// How a connection ended, as seen from the client contract.
///
/// Intentional-forbidden-action flows end in `PolicyForced`; anything that
/// is neither a cooperative close nor a policy close is a transport fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Cooperative,
    PolicyForced,
    TransportFault,
}

impl CloseOutcome {
    pub fn classify(close_code: Option<u16>) -> Self {
        match close_code {
            Some(CLOSE_NORMAL) => Self::Cooperative,
            Some(CLOSE_POLICY) => Self::PolicyForced,
            _ => Self::TransportFault,
        }
    }
}

const COMPOSITION_TOPIC_PREFIX: &str = "/topic/compositions.";
const COMPOSITION_APP_PREFIX: &str = "/app/compositions.";
pub const ERROR_QUEUE: &str = "/user/queue/errors";
pub const COMPOSITION_QUEUE: &str = "/user/queue/compositions";

/// A parsed destination string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// `/topic/compositions.<id>`: the composition's broadcast topic.
    CompositionTopic(Uuid),
    /// `/app/compositions.<id>`: client-published orders.
    CompositionApp(Uuid),
    /// `/user/queue/errors`: the caller's private error queue.
    ErrorQueue,
    /// `/user/queue/compositions`: the caller's private composition queue.
    CompositionQueue,
}

/// A destination string the server does not serve.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown destination `{0}`")]
pub struct UnknownDestination(String);

impl Destination {
    pub fn parse(raw: &str) -> Option<Self> {
        raw.parse().ok()
    }
}

impl FromStr for Destination {
    type Err = UnknownDestination;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if let Some(id) = raw.strip_prefix(COMPOSITION_TOPIC_PREFIX) {
            return id
                .parse()
                .map(Self::CompositionTopic)
                .map_err(|_| UnknownDestination(raw.to_owned()));
        }
        if let Some(id) = raw.strip_prefix(COMPOSITION_APP_PREFIX) {
            return id
                .parse()
                .map(Self::CompositionApp)
                .map_err(|_| UnknownDestination(raw.to_owned()));
        }
        match raw {
            ERROR_QUEUE => Ok(Self::ErrorQueue),
            COMPOSITION_QUEUE => Ok(Self::CompositionQueue),
            _ => Err(UnknownDestination(raw.to_owned())),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CompositionTopic(id) => write!(f, "{COMPOSITION_TOPIC_PREFIX}{id}"),
            Self::CompositionApp(id) => write!(f, "{COMPOSITION_APP_PREFIX}{id}"),
            Self::ErrorQueue => f.write_str(ERROR_QUEUE),
            Self::CompositionQueue => f.write_str(COMPOSITION_QUEUE),
        }
    }
}
