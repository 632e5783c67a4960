//! Full-page response cache.
//!
//! - **Admission**: decides per request whether a rendered page may be served
//!   from or written to the cache, and derives its `CacheKey`
//! - **Serving**: cache hits (with conditional `304`s and jittered expiry
//!   headers), misses, and capture of freshly rendered pages
//! - **Invalidation**: content mutations become scope purges and document
//!   count adjustments
//!
//! ## Configuration
//!
//! Cache behavior is controlled via the `[cache]` table of `supercache.toml`:
//!
//! ```toml
//! [cache]
//! enabled = true
//! duration_seconds = 300
//! stampede_percent = 10
//! page_types = ["document", "module"]
//! # ... see config.rs for all options
//! ```

mod admission;
mod config;
mod coordinator;
mod counts;
mod events;
mod expiry;
mod guard;
mod headers;
mod keys;
mod listing;
pub(crate) mod lock;
mod middleware;
mod pagination;
mod planner;
mod serving;
mod store;
mod trigger;

pub use admission::{
    Admission, Admitted, ClientProfile, ROUTING_PARAMS, RejectReason, RequestContext, RouteInfo,
    ScopeRef, SiteProfile, admit, classify, normalize_params,
};
pub use config::{CacheConfig, MAX_DURATION_SECONDS, RefreshAction};
pub use coordinator::{ExecutionReport, InvalidationCoordinator};
pub use counts::{DocumentCountIndex, MemoryCountIndex};
pub use events::{ContentKind, Epoch, EventQueue, MutationAction, MutationEvent, QueuedEvent};
pub use expiry::{jitter, jitter_with, remaining_seconds};
pub use guard::{EarlyResponse, GuardOutcome, inspect};
pub use headers::{DIAGNOSTIC_HEADER, HeaderPolicy, apply_expiry, apply_no_cache, status_from_code};
pub use keys::{
    CacheKey, DeviceClass, ExtraParams, PARAM_ACTION, PARAM_COOKIE, PARAM_REQUEST_URI, PageType,
    ScopeSelector, Transport, VariantTag,
};
pub use listing::{BypassReason, ListingDecision, ListingGate, ListingQuery, ListingWindow};
pub use middleware::{CacheState, RequestContextSource, page_cache_layer};
pub use pagination::{InferredPage, infer_page};
pub use planner::InvalidationPlan;
pub use serving::{
    CachedReply, CaptureOutcome, CreditedView, DocumentMeta, Lookup, Miss, PageCache,
    PendingCapture, RenderedPage, SkipReason, ViewCounter, not_modified_since,
};
pub use store::{CacheEntry, ExtraData, MemoryStore, PageStore, StoreError};
pub use trigger::CacheTrigger;
