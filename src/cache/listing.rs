//! Listing cache gate.
//!
//! Large listings are served from a separate listing cache that pages by
//! offset against the maintained document count instead of counting rows on
//! every request. This module decides whether a given listing query qualifies.

use tracing::{debug, warn};

use super::config::CacheConfig;
use super::counts::DocumentCountIndex;

/// A document-list query as the content layer would issue it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingQuery {
    pub scope_ids: Vec<u64>,
    pub category_id: u64,
    /// 1-based page number.
    pub page: u32,
    pub list_count: u32,
    pub search: Option<String>,
    pub owner_id: Option<u64>,
}

/// Eligible listing: the known item count and, in offset mode, where to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingWindow {
    pub total: u64,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    Disabled,
    NoScope,
    DeepPage,
    Filtered,
    MultipleScopes,
    ExcludedScope,
    BelowThreshold,
    CountUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingDecision {
    Bypass(BypassReason),
    Serve(ListingWindow),
}

pub struct ListingGate;

impl ListingGate {
    pub async fn evaluate(
        query: &ListingQuery,
        config: &CacheConfig,
        counts: &dyn DocumentCountIndex,
    ) -> ListingDecision {
        use ListingDecision::Bypass;

        if !config.paging_cache {
            return Bypass(BypassReason::Disabled);
        }
        let scope_id = match query.scope_ids.as_slice() {
            [] => return Bypass(BypassReason::NoScope),
            [scope_id] => *scope_id,
            _ => return Bypass(BypassReason::MultipleScopes),
        };
        if query.page > 1 && !config.paging_cache_use_offset {
            return Bypass(BypassReason::DeepPage);
        }
        if query.search.as_deref().is_some_and(|term| !term.is_empty()) || query.owner_id.is_some() {
            return Bypass(BypassReason::Filtered);
        }
        if config.paging_cache_exclude_scopes.contains(&scope_id) {
            return Bypass(BypassReason::ExcludedScope);
        }

        let total = match counts.count(scope_id, query.category_id).await {
            Ok(total) => total,
            Err(err) => {
                warn!(
                    cache = "listing",
                    scope_id,
                    category_id = query.category_id,
                    error = %err,
                    "Document count unavailable; listing served uncached"
                );
                return Bypass(BypassReason::CountUnavailable);
            }
        };
        if total < config.paging_cache_threshold {
            debug!(cache = "listing", scope_id, total, "Listing below threshold");
            return Bypass(BypassReason::BelowThreshold);
        }

        let offset = (config.paging_cache_use_offset && query.page > 1)
            .then(|| u64::from(query.page - 1) * u64::from(query.list_count));
        ListingDecision::Serve(ListingWindow { total, offset })
    }
}
