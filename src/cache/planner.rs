//! Invalidation planning.
//!
//! Turns mutation events into the set of scope purges and count adjustments
//! the coordinator executes. Planning is pure; nothing here touches a store.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use super::config::{CacheConfig, RefreshAction};
use super::events::{ContentKind, MutationAction, MutationEvent, QueuedEvent};
use super::keys::ScopeSelector;

/// Purges and count adjustments for one batch of events.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InvalidationPlan {
    /// Scope selectors to delete. A set, so overlapping events purge once.
    pub purges: BTreeSet<ScopeSelector>,
    /// Net delta per `(scope, category)` bucket.
    pub count_deltas: BTreeMap<(u64, u64), i64>,
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let purges: Vec<String> = self.purges.iter().map(ToString::to_string).collect();
        write!(
            f,
            "InvalidationPlan {{ purges: [{}], count_buckets: {} }}",
            purges.join(", "),
            self.count_deltas.len()
        )
    }
}

impl InvalidationPlan {
    /// Plan a single event.
    ///
    /// Purges are only planned while the page cache is enabled; document
    /// counts are tracked regardless.
    pub fn for_event(event: &MutationEvent, config: &CacheConfig, index_scope: u64) -> Self {
        let mut plan = Self::default();
        plan.add_event(event, config, index_scope);
        plan
    }

    /// Merge a batch, skipping events already seen by id.
    pub fn from_events(events: &[QueuedEvent], config: &CacheConfig, index_scope: u64) -> Self {
        let mut plan = Self::default();
        let mut seen = HashSet::new();
        for queued in events {
            if seen.insert(queued.id) {
                plan.add_event(&queued.event, config, index_scope);
            }
        }
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.purges.is_empty() && self.count_deltas.is_empty()
    }

    fn add_event(&mut self, event: &MutationEvent, config: &CacheConfig, index_scope: u64) {
        if event.content_kind == ContentKind::Document {
            self.add_count_deltas(event);
        }
        if !config.enabled {
            return;
        }

        let mask = match event.content_kind {
            ContentKind::Document => &config.document_actions,
            ContentKind::Comment => &config.comment_actions,
        };

        if mask.contains(&RefreshAction::RefreshDocument) && event.document_id != 0 {
            self.purges.insert(ScopeSelector::document(event.document_id));
        }

        let refresh_module = mask.contains(&RefreshAction::RefreshModule);
        if refresh_module {
            for scope in affected_scopes(event) {
                self.purges.insert(ScopeSelector::scope(scope));
            }
        }

        // An index scope already purged as a module listing is not purged twice.
        if mask.contains(&RefreshAction::RefreshIndex) {
            let covered = refresh_module && affected_scopes(event).contains(&index_scope);
            if !covered {
                self.purges.insert(ScopeSelector::scope(index_scope));
            }
        }
    }

    fn add_count_deltas(&mut self, event: &MutationEvent) {
        match event.action {
            MutationAction::Insert => {
                self.bump((event.new_scope, event.new_category), 1);
            }
            MutationAction::Delete => {
                self.bump((event.old_scope, event.old_category), -1);
            }
            MutationAction::Update | MutationAction::Move => {
                let old = (event.old_scope, event.old_category);
                let new = (event.effective_new_scope(), event.effective_new_category());
                if old == new {
                    return;
                }
                self.bump(new, 1);
                if event.old_scope != 0 {
                    self.bump(old, -1);
                }
            }
        }
    }

    fn bump(&mut self, bucket: (u64, u64), delta: i64) {
        let entry = self.count_deltas.entry(bucket).or_insert(0);
        *entry += delta;
        if *entry == 0 {
            self.count_deltas.remove(&bucket);
        }
    }
}

/// Listing scopes a write changes: the single scope for inserts, deletes and
/// comments; both old and new scopes for a document that changed scope.
fn affected_scopes(event: &MutationEvent) -> Vec<u64> {
    let scopes = match (event.content_kind, event.action) {
        (ContentKind::Comment, _) => vec![event.effective_new_scope()],
        (_, MutationAction::Insert) => vec![event.new_scope],
        (_, MutationAction::Delete) => vec![event.old_scope],
        (_, MutationAction::Update | MutationAction::Move) => {
            let new_scope = event.effective_new_scope();
            if new_scope == event.old_scope {
                vec![event.old_scope]
            } else {
                vec![event.old_scope, new_scope]
            }
        }
    };
    scopes.into_iter().filter(|scope| *scope != 0).collect()
}
