//! Invalidation coordinator.
//!
//! Drains mutation events, plans them, and applies the plan to the page store
//! and the document count index. Every store failure is logged and counted;
//! none of them reach the mutation that published the event.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::config::CacheConfig;
use super::counts::DocumentCountIndex;
use super::events::EventQueue;
use super::planner::InvalidationPlan;
use super::store::PageStore;

const METRIC_INVALIDATE_MS: &str = "supercache_invalidate_ms";

/// Outcome of executing one plan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Entries removed across all purges.
    pub purged_entries: usize,
    pub failed_purges: usize,
    pub failed_count_updates: usize,
}

pub struct InvalidationCoordinator {
    config: Arc<CacheConfig>,
    index_scope: u64,
    store: Arc<dyn PageStore>,
    counts: Arc<dyn DocumentCountIndex>,
    queue: Arc<EventQueue>,
}

impl InvalidationCoordinator {
    pub fn new(
        config: Arc<CacheConfig>,
        index_scope: u64,
        store: Arc<dyn PageStore>,
        counts: Arc<dyn DocumentCountIndex>,
        queue: Arc<EventQueue>,
    ) -> Self {
        Self {
            config,
            index_scope,
            store,
            counts,
            queue,
        }
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// Drain one batch of pending events and execute its plan.
    ///
    /// Returns true if any events were processed.
    #[instrument(skip(self))]
    pub async fn consume(&self) -> bool {
        let started = Instant::now();
        let events = self.queue.drain(self.config.consume_batch_limit.max(1));
        if events.is_empty() {
            return false;
        }

        let event_count = events.len();
        let event_ids: Vec<Uuid> = events.iter().map(|queued| queued.id).collect();
        let plan = InvalidationPlan::from_events(&events, &self.config, self.index_scope);
        info!(
            event_count,
            event_ids = ?event_ids,
            plan = %plan,
            "Invalidation starting"
        );

        let report = self.execute(&plan).await;
        info!(
            event_count,
            purged_entries = report.purged_entries,
            failed_purges = report.failed_purges,
            failed_count_updates = report.failed_count_updates,
            "Invalidation complete"
        );
        histogram!(METRIC_INVALIDATE_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        true
    }

    /// Apply `plan`. Each purge and count update is attempted independently.
    pub async fn execute(&self, plan: &InvalidationPlan) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        for (&(scope_id, category_id), &delta) in &plan.count_deltas {
            if let Err(err) = self.counts.adjust(scope_id, category_id, delta).await {
                report.failed_count_updates += 1;
                counter!("supercache_store_error_total", "op" => "count_adjust").increment(1);
                warn!(
                    cache = "counts",
                    scope_id,
                    category_id,
                    delta,
                    error = %err,
                    "Document count update failed"
                );
            }
        }

        for selector in &plan.purges {
            match self.store.delete_by_scope(*selector).await {
                Ok(removed) => {
                    report.purged_entries += removed;
                    counter!("supercache_purge_total").increment(1);
                }
                Err(err) => {
                    report.failed_purges += 1;
                    counter!("supercache_store_error_total", "op" => "delete").increment(1);
                    warn!(
                        cache = "page",
                        op = "delete_by_scope",
                        selector = %selector,
                        error = %err,
                        "Purge failed; entries expire by TTL"
                    );
                }
            }
        }
        report
    }
}
