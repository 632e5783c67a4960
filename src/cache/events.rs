//! Content mutation events.
//!
//! The content layer publishes one `MutationEvent` per successful write. The
//! queue hands them to the invalidation coordinator in FIFO batches.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::events";

/// Monotonic sequence number assigned at publish time.
pub type Epoch = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Document,
    Comment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationAction {
    Insert,
    Update,
    Delete,
    Move,
}

/// One content write, with the document's placement before and after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationEvent {
    pub content_kind: ContentKind,
    pub action: MutationAction,
    pub document_id: u64,
    pub old_scope: u64,
    pub new_scope: u64,
    pub old_category: u64,
    pub new_category: u64,
}

impl MutationEvent {
    pub fn document_inserted(document_id: u64, scope: u64, category: u64) -> Self {
        Self {
            content_kind: ContentKind::Document,
            action: MutationAction::Insert,
            document_id,
            old_scope: 0,
            new_scope: scope,
            old_category: 0,
            new_category: category,
        }
    }

    pub fn document_updated(
        document_id: u64,
        (old_scope, old_category): (u64, u64),
        (new_scope, new_category): (u64, u64),
    ) -> Self {
        Self {
            content_kind: ContentKind::Document,
            action: MutationAction::Update,
            document_id,
            old_scope,
            new_scope,
            old_category,
            new_category,
        }
    }

    pub fn document_moved(
        document_id: u64,
        (old_scope, old_category): (u64, u64),
        (new_scope, new_category): (u64, u64),
    ) -> Self {
        Self {
            action: MutationAction::Move,
            ..Self::document_updated(
                document_id,
                (old_scope, old_category),
                (new_scope, new_category),
            )
        }
    }

    pub fn document_deleted(document_id: u64, scope: u64, category: u64) -> Self {
        Self {
            content_kind: ContentKind::Document,
            action: MutationAction::Delete,
            document_id,
            old_scope: scope,
            new_scope: 0,
            old_category: category,
            new_category: 0,
        }
    }

    /// A comment write on `document_id`, which lives in `scope`.
    pub fn comment(action: MutationAction, document_id: u64, scope: u64) -> Self {
        Self {
            content_kind: ContentKind::Comment,
            action,
            document_id,
            old_scope: scope,
            new_scope: scope,
            old_category: 0,
            new_category: 0,
        }
    }

    /// Scope after the write; an update that did not report one stays put.
    pub fn effective_new_scope(&self) -> u64 {
        if self.new_scope != 0 {
            self.new_scope
        } else {
            self.old_scope
        }
    }

    /// Category after the write. Follows [`Self::effective_new_scope`]: a
    /// reported destination is taken whole, so `new_category == 0` there means
    /// the document is now uncategorized. Only an event without a destination
    /// scope keeps the old category.
    pub fn effective_new_category(&self) -> u64 {
        if self.new_scope != 0 {
            self.new_category
        } else {
            self.old_category
        }
    }
}

impl fmt::Display for MutationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}::{:?} document={} scope={}->{} category={}->{}",
            self.content_kind,
            self.action,
            self.document_id,
            self.old_scope,
            self.new_scope,
            self.old_category,
            self.new_category
        )
    }
}

/// A published event.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    /// Idempotency key.
    pub id: Uuid,
    pub epoch: Epoch,
    pub event: MutationEvent,
    pub published_at: OffsetDateTime,
}

impl QueuedEvent {
    pub fn new(event: MutationEvent, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            event,
            published_at: OffsetDateTime::now_utc(),
        }
    }
}

/// In-memory FIFO of published mutation events.
pub struct EventQueue {
    queue: Mutex<VecDeque<QueuedEvent>>,
    epoch_counter: AtomicU64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            epoch_counter: AtomicU64::new(0),
        }
    }

    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    pub fn publish(&self, event: MutationEvent) {
        let queued = QueuedEvent::new(event, self.next_epoch());
        info!(
            event_id = %queued.id,
            event_epoch = queued.epoch,
            event = %event,
            "Mutation event enqueued"
        );
        mutex_lock(&self.queue, SOURCE, "publish").push_back(queued);
    }

    /// Take up to `limit` events, oldest first.
    pub fn drain(&self, limit: usize) -> Vec<QueuedEvent> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        queue.drain(..count).collect()
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_category_is_taken_with_its_scope() {
        let uncategorized = MutationEvent::document_moved(7, (2, 5), (3, 0));
        assert_eq!(uncategorized.effective_new_scope(), 3);
        assert_eq!(uncategorized.effective_new_category(), 0);

        let unreported = MutationEvent::document_updated(7, (2, 5), (0, 0));
        assert_eq!(unreported.effective_new_scope(), 2);
        assert_eq!(unreported.effective_new_category(), 5);
    }

    #[test]
    fn epochs_increase() {
        let queue = EventQueue::new();
        let first = queue.next_epoch();
        let second = queue.next_epoch();
        assert!(first < second);
    }

    #[test]
    fn drain_is_fifo_and_bounded() {
        let queue = EventQueue::new();
        queue.publish(MutationEvent::document_inserted(1, 3, 0));
        queue.publish(MutationEvent::document_deleted(2, 3, 0));
        queue.publish(MutationEvent::comment(MutationAction::Insert, 1, 3));

        let batch = queue.drain(2);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].event.document_id, 1);
        assert_eq!(batch[1].event.action, MutationAction::Delete);
        assert!(batch[0].epoch < batch[1].epoch);
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.drain(10).len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn moved_event_keeps_both_placements() {
        let event = MutationEvent::document_moved(9, (3, 1), (4, 2));
        assert_eq!(event.action, MutationAction::Move);
        assert_eq!(event.content_kind, ContentKind::Document);
        assert_eq!((event.old_scope, event.new_scope), (3, 4));
        assert_eq!((event.old_category, event.new_category), (1, 2));
    }

    #[test]
    fn update_without_new_scope_stays_in_place() {
        let event = MutationEvent::document_updated(9, (3, 5), (0, 0));
        assert_eq!(event.effective_new_scope(), 3);
        assert_eq!(event.effective_new_category(), 5);
    }
}
