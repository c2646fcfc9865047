// Per-topic event sequencing.
//
// A single writer per composition assigns monotonically increasing
// sequence numbers, so subscriber-observed order never depends on
// transport delivery order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info_span, Instrument};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct EventSequencer {
    counters: RwLock<HashMap<Uuid, Arc<AtomicI64>>>,
}

impl EventSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn next_seq(&self, composition_id: Uuid) -> i64 {
        async move {
            let counter = self.counter_for_key(composition_id).await;
            counter.fetch_add(1, Ordering::SeqCst) + 1
        }
        .instrument(info_span!(
            "server.sequencer.next_seq",
            composition_id = %composition_id
        ))
        .await
    }

    /// Drop the counter for a deleted composition. A recreated id would
    /// restart at 1, which is fine: topics are derived from composition
    /// ids and die with them.
    pub async fn remove_topic(&self, composition_id: Uuid) {
        self.counters.write().await.remove(&composition_id);
    }

    async fn counter_for_key(&self, key: Uuid) -> Arc<AtomicI64> {
        if let Some(existing) = self.counters.read().await.get(&key).cloned() {
            return existing;
        }

        let mut counters = self.counters.write().await;
        counters.entry(key).or_insert_with(|| Arc::new(AtomicI64::new(0))).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::EventSequencer;
    use uuid::Uuid;

    #[tokio::test]
    async fn assigns_monotonic_sequences_per_topic() {
        let sequencer = EventSequencer::new();
        let topic_a = Uuid::new_v4();
        let topic_b = Uuid::new_v4();

        assert_eq!(sequencer.next_seq(topic_a).await, 1);
        assert_eq!(sequencer.next_seq(topic_a).await, 2);
        assert_eq!(sequencer.next_seq(topic_b).await, 1);
        assert_eq!(sequencer.next_seq(topic_a).await, 3);
    }

    #[tokio::test]
    async fn removal_resets_a_topic() {
        let sequencer = EventSequencer::new();
        let topic = Uuid::new_v4();

        assert_eq!(sequencer.next_seq(topic).await, 1);
        sequencer.remove_topic(topic).await;
        assert_eq!(sequencer.next_seq(topic).await, 1);
    }

    #[tokio::test]
    async fn concurrent_callers_never_share_a_sequence() {
        let sequencer = std::sync::Arc::new(EventSequencer::new());
        let topic = Uuid::new_v4();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let sequencer = sequencer.clone();
            handles.push(tokio::spawn(async move { sequencer.next_seq(topic).await }));
        }

        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.expect("sequencing task should not panic"));
        }
        seen.sort_unstable();
        let expected: Vec<i64> = (1..=16).collect();
        assert_eq!(seen, expected);
    }
}
