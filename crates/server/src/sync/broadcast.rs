// Broadcast router: fans composition events out to subscribed connections.
//
// Each connection owns an unbounded outbound queue, so one slow socket
// never delays delivery to the others; a dropped receiver just fails the
// send for that connection. Sequence assignment and fan-out happen inside
// a per-topic critical section, which gives every subscriber the same
// total order and puts causally related events in causal order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ensemble_common::protocol::orders::CompositionEvent;
use ensemble_common::protocol::ws::{Destination, WsFrame};
use ensemble_common::types::{ConnectedMember, Member};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

/// The per-identity private queues a connection can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrivateQueue {
    Errors,
    Compositions,
}

impl PrivateQueue {
    pub fn destination(self) -> Destination {
        match self {
            Self::Errors => Destination::ErrorQueue,
            Self::Compositions => Destination::CompositionQueue,
        }
    }
}

#[derive(Debug)]
struct ConnectionRecord {
    member: Member,
    topics: HashSet<Uuid>,
    queues: HashSet<PrivateQueue>,
    outbound: mpsc::UnboundedSender<WsFrame>,
}

#[derive(Default)]
pub struct BroadcastRouter {
    connections: RwLock<HashMap<Uuid, ConnectionRecord>>,
    publish_locks: RwLock<HashMap<Uuid, Arc<Mutex<()>>>>,
    sequencer: crate::sync::sequencer::EventSequencer,
}

impl BroadcastRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        member: Member,
        outbound: mpsc::UnboundedSender<WsFrame>,
    ) -> Uuid {
        let connection_id = Uuid::new_v4();
        self.connections.write().await.insert(
            connection_id,
            ConnectionRecord {
                member,
                topics: HashSet::new(),
                queues: HashSet::new(),
                outbound,
            },
        );
        connection_id
    }

    /// Remove a connection and return its identity plus the topics it was
    /// subscribed to, so the caller can fan out `MEMBER_LEFT`.
    pub async fn remove(&self, connection_id: Uuid) -> Option<(Member, Vec<Uuid>)> {
        let record = self.connections.write().await.remove(&connection_id)?;
        let mut topics: Vec<Uuid> = record.topics.into_iter().collect();
        topics.sort();
        Some((record.member, topics))
    }

    pub async fn subscribe_topic(&self, connection_id: Uuid, composition_id: Uuid) -> bool {
        let mut guard = self.connections.write().await;
        match guard.get_mut(&connection_id) {
            Some(record) => record.topics.insert(composition_id),
            None => false,
        }
    }

    /// Effective immediately: publishes entered after this call no longer
    /// reach the connection.
    pub async fn unsubscribe_topic(&self, connection_id: Uuid, composition_id: Uuid) -> bool {
        let mut guard = self.connections.write().await;
        match guard.get_mut(&connection_id) {
            Some(record) => record.topics.remove(&composition_id),
            None => false,
        }
    }

    pub async fn subscribe_queue(&self, connection_id: Uuid, queue: PrivateQueue) -> bool {
        let mut guard = self.connections.write().await;
        match guard.get_mut(&connection_id) {
            Some(record) => record.queues.insert(queue),
            None => false,
        }
    }

    pub async fn unsubscribe_queue(&self, connection_id: Uuid, queue: PrivateQueue) -> bool {
        let mut guard = self.connections.write().await;
        match guard.get_mut(&connection_id) {
            Some(record) => record.queues.remove(&queue),
            None => false,
        }
    }

    pub async fn is_subscribed(&self, connection_id: Uuid, composition_id: Uuid) -> bool {
        self.connections
            .read()
            .await
            .get(&connection_id)
            .map(|record| record.topics.contains(&composition_id))
            .unwrap_or(false)
    }

    /// Members currently subscribed to the composition topic, one entry per
    /// member, ordered by email for stable rosters.
    pub async fn roster(&self, composition_id: Uuid) -> Vec<ConnectedMember> {
        let guard = self.connections.read().await;
        let mut seen = HashSet::new();
        let mut members = Vec::new();
        for record in guard.values() {
            if record.topics.contains(&composition_id) && seen.insert(record.member.id) {
                members.push(ConnectedMember {
                    email: record.member.email.clone(),
                    id: record.member.id,
                });
            }
        }
        members.sort_by(|a, b| a.email.cmp(&b.email));
        members
    }

    /// Publish an event on a composition topic. Returns the number of
    /// connections the event was enqueued to.
    pub async fn publish(&self, composition_id: Uuid, event: CompositionEvent) -> usize {
        let lock = self.publish_lock(composition_id).await;
        let _ordering = lock.lock().await;

        let seq = self.sequencer.next_seq(composition_id).await;
        let frame = WsFrame::Event {
            destination: Destination::CompositionTopic(composition_id).to_string(),
            seq,
            event,
        };

        let recipients: Vec<mpsc::UnboundedSender<WsFrame>> = {
            let guard = self.connections.read().await;
            guard
                .values()
                .filter(|record| record.topics.contains(&composition_id))
                .map(|record| record.outbound.clone())
                .collect()
        };

        let mut sent_count = 0;
        for recipient in recipients {
            if recipient.send(frame.clone()).is_ok() {
                sent_count += 1;
            }
        }
        sent_count
    }

    /// Deliver an event to every connection of `member_id` subscribed to
    /// the given private queue. Sequenced on the related composition's
    /// channel so private and topic deliveries share one order.
    pub async fn publish_private(
        &self,
        member_id: Uuid,
        queue: PrivateQueue,
        composition_id: Uuid,
        event: CompositionEvent,
    ) -> usize {
        let lock = self.publish_lock(composition_id).await;
        let _ordering = lock.lock().await;

        let seq = self.sequencer.next_seq(composition_id).await;
        let frame = WsFrame::Event {
            destination: queue.destination().to_string(),
            seq,
            event,
        };

        let recipients: Vec<mpsc::UnboundedSender<WsFrame>> = {
            let guard = self.connections.read().await;
            guard
                .values()
                .filter(|record| record.member.id == member_id && record.queues.contains(&queue))
                .map(|record| record.outbound.clone())
                .collect()
        };

        let mut sent_count = 0;
        for recipient in recipients {
            if recipient.send(frame.clone()).is_ok() {
                sent_count += 1;
            }
        }
        sent_count
    }

    /// Deliver an error frame on the member's private error queue.
    pub async fn publish_error(
        &self,
        member_id: Uuid,
        code: &str,
        message: &str,
        destination: Option<String>,
    ) -> usize {
        let frame = WsFrame::Error {
            code: code.to_owned(),
            message: message.to_owned(),
            destination,
        };

        let recipients: Vec<mpsc::UnboundedSender<WsFrame>> = {
            let guard = self.connections.read().await;
            guard
                .values()
                .filter(|record| {
                    record.member.id == member_id
                        && record.queues.contains(&PrivateQueue::Errors)
                })
                .map(|record| record.outbound.clone())
                .collect()
        };

        let mut sent_count = 0;
        for recipient in recipients {
            if recipient.send(frame.clone()).is_ok() {
                sent_count += 1;
            }
        }
        if sent_count == 0 {
            debug!(member_id = %member_id, code, "no error-queue subscriber for private error");
        }
        sent_count
    }

    /// Tear down a deleted composition's topic: drop all subscriptions and
    /// the sequence counter.
    pub async fn drop_topic(&self, composition_id: Uuid) {
        {
            let mut guard = self.connections.write().await;
            for record in guard.values_mut() {
                record.topics.remove(&composition_id);
            }
        }
        self.publish_locks.write().await.remove(&composition_id);
        self.sequencer.remove_topic(composition_id).await;
    }

    async fn publish_lock(&self, composition_id: Uuid) -> Arc<Mutex<()>> {
        if let Some(existing) = self.publish_locks.read().await.get(&composition_id).cloned() {
            return existing;
        }

        let mut locks = self.publish_locks.write().await;
        locks.entry(composition_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}
