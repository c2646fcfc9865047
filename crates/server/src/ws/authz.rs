// Topic subscription authorization.
//
// Joining a collaborative composition is a mutation dressed as a read, so
// it runs as an explicit command through the composition store's write
// lock, the same serialization point as every other composition mutation.
// Both the realtime subscribe path and the REST composition read call this
// gate; there is no second authorization code path.

use ensemble_common::protocol::orders::CompositionEvent;
use ensemble_common::types::Member;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::store::{CompositionAccess, CompositionStore};
use crate::sync::broadcast::BroadcastRouter;

/// A granted subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicAccess {
    /// The caller became a guest as a side effect of this authorization.
    pub guest_added: bool,
}

/// A rejected subscription. Deliberately carries nothing: a missing
/// composition and a forbidden one produce the same signal, so private
/// composition ids cannot be enumerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionDenied;

#[derive(Clone)]
pub struct TopicGate {
    compositions: CompositionStore,
    router: Arc<BroadcastRouter>,
}

impl TopicGate {
    pub fn new(compositions: CompositionStore, router: Arc<BroadcastRouter>) -> Self {
        Self { compositions, router }
    }

    /// Decide whether `member` may attach to the composition's topic.
    ///
    /// Owners and existing guests pass without mutation. A first-time
    /// caller passes only when the composition is collaborative: they are
    /// appended to the guest list and exactly one `MEMBER_JOINED` is
    /// published on the topic before any event they author can be
    /// sequenced. Everything else is a deny that leaves guest-list and
    /// topic state untouched.
    pub async fn authorize(
        &self,
        member: &Member,
        composition_id: Uuid,
    ) -> Result<TopicAccess, SubscriptionDenied> {
        match self.compositions.access_for(composition_id, member.id).await {
            CompositionAccess::Owner | CompositionAccess::Guest => {
                Ok(TopicAccess { guest_added: false })
            }
            CompositionAccess::Joinable => {
                let added = self
                    .compositions
                    .add_guest_if_absent(composition_id, member.clone())
                    .await
                    // Deleted between the access check and the append.
                    .ok_or(SubscriptionDenied)?;

                if added {
                    info!(
                        composition_id = %composition_id,
                        member = %member.email,
                        "first authorized join, appended to guest list"
                    );
                    self.router
                        .publish(
                            composition_id,
                            CompositionEvent::MemberJoined {
                                email: member.email.clone(),
                                id: member.id,
                            },
                        )
                        .await;
                }
                Ok(TopicAccess { guest_added: added })
            }
            CompositionAccess::Missing | CompositionAccess::Forbidden => Err(SubscriptionDenied),
        }
    }
}
