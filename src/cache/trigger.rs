//! Publishing API for the content layer.
//!
//! Write paths call these after a successful mutation. Events are consumed
//! immediately by default so the next read already sees purged listings.

use std::sync::Arc;

use tracing::debug;

use super::coordinator::InvalidationCoordinator;
use super::events::{MutationAction, MutationEvent};

/// Publishes mutation events and drives the coordinator.
///
/// ```ignore
/// // after moving a document between sections:
/// trigger.document_moved(doc.id, (3, 0), (4, 0)).await;
/// ```
pub struct CacheTrigger {
    coordinator: Arc<InvalidationCoordinator>,
}

impl CacheTrigger {
    pub fn new(coordinator: Arc<InvalidationCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Publish `event`; with `consume_now`, run the coordinator right away.
    pub async fn trigger(&self, event: MutationEvent, consume_now: bool) {
        self.coordinator.queue().publish(event);
        if consume_now {
            let processed = self.coordinator.consume().await;
            debug!(event = %event, processed, "Mutation event consumed inline");
        }
    }

    pub async fn document_inserted(&self, document_id: u64, scope: u64, category: u64) {
        self.trigger(
            MutationEvent::document_inserted(document_id, scope, category),
            true,
        )
        .await;
    }

    pub async fn document_updated(&self, document_id: u64, old: (u64, u64), new: (u64, u64)) {
        self.trigger(MutationEvent::document_updated(document_id, old, new), true)
            .await;
    }

    pub async fn document_moved(&self, document_id: u64, old: (u64, u64), new: (u64, u64)) {
        self.trigger(MutationEvent::document_moved(document_id, old, new), true)
            .await;
    }

    pub async fn document_deleted(&self, document_id: u64, scope: u64, category: u64) {
        self.trigger(
            MutationEvent::document_deleted(document_id, scope, category),
            true,
        )
        .await;
    }

    pub async fn comment_changed(&self, action: MutationAction, document_id: u64, scope: u64) {
        self.trigger(MutationEvent::comment(action, document_id, scope), true)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::cache::counts::{DocumentCountIndex, MemoryCountIndex};
    use crate::cache::events::EventQueue;
    use crate::cache::store::MemoryStore;

    fn trigger_with_counts() -> (CacheTrigger, Arc<MemoryCountIndex>, Arc<EventQueue>) {
        let config = Arc::new(CacheConfig::default());
        let counts = Arc::new(MemoryCountIndex::new());
        let queue = Arc::new(EventQueue::new());
        let coordinator = InvalidationCoordinator::new(
            config.clone(),
            1,
            Arc::new(MemoryStore::new(&config)),
            counts.clone(),
            queue.clone(),
        );
        (CacheTrigger::new(Arc::new(coordinator)), counts, queue)
    }

    #[tokio::test]
    async fn inline_consumption_empties_queue() {
        let (trigger, counts, queue) = trigger_with_counts();
        trigger.document_inserted(1, 3, 0).await;

        assert!(queue.is_empty());
        assert_eq!(counts.count(3, 0).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn deferred_events_wait_for_consume() {
        let (trigger, counts, queue) = trigger_with_counts();
        trigger
            .trigger(MutationEvent::document_inserted(1, 3, 0), false)
            .await;

        assert_eq!(queue.len(), 1);
        assert_eq!(counts.count(3, 0).await.unwrap(), 0);
    }
}
