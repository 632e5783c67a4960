//! Page cache configuration.
//!
//! Every knob the admission filter, serving path and invalidation planner read
//! lives here. Loaded from the `[cache]` table of `supercache.toml`.

use std::collections::BTreeSet;
use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use super::keys::{DeviceClass, PageType, Transport};

const DEFAULT_DURATION_SECONDS: u64 = 300;
const DEFAULT_STAMPEDE_PERCENT: u8 = 10;
/// Longest accepted entry lifetime: one year.
pub const MAX_DURATION_SECONDS: u64 = 365 * 24 * 60 * 60;
const DEFAULT_STORE_CAPACITY: usize = 1000;
const DEFAULT_CONSUME_BATCH_LIMIT: usize = 100;
const DEFAULT_PAGING_CACHE_THRESHOLD: u64 = 1000;

/// Purge scopes a content mutation may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshAction {
    /// Every cached render of the mutated document.
    RefreshDocument,
    /// The listing pages of the containing scope(s).
    RefreshModule,
    /// The listing pages of the site's index scope.
    RefreshIndex,
}

/// Page cache configuration from `supercache.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Master switch for the full-page cache.
    pub enabled: bool,
    /// Device classes whose requests may be cached.
    pub device_classes: BTreeSet<DeviceClass>,
    /// Transports whose requests may be cached.
    pub transports: BTreeSet<Transport>,
    /// Whether requests from automated crawlers may be cached.
    pub cache_crawlers: bool,
    /// Any of these cookies with a non-empty value bypasses the cache.
    pub exclude_cookies: Vec<String>,
    /// These cookies are folded into the cache key.
    pub separate_cookies: Vec<String>,
    /// Actions that are never cached.
    pub exclude_actions: BTreeSet<String>,
    /// Scopes that are never cached.
    pub exclude_scopes: BTreeSet<u64>,
    /// Page types eligible for caching.
    pub page_types: BTreeSet<PageType>,
    /// Also capture `404` responses and admit unmapped `url` pages. Other
    /// non-200 statuses are never captured.
    pub include_404: bool,
    /// Nominal entry lifetime in seconds.
    pub duration_seconds: u64,
    /// Upper bound of the random TTL reduction, in percent of the nominal TTL.
    pub stampede_percent: u8,
    /// Emit `Cache-Control`/`Expires` headers.
    pub use_cache_headers: bool,
    /// Emit them even when the request came through a forwarding proxy.
    pub cache_headers_for_proxies: bool,
    /// Purges requested by document mutations.
    pub document_actions: BTreeSet<RefreshAction>,
    /// Purges requested by comment mutations.
    pub comment_actions: BTreeSet<RefreshAction>,
    /// Replay the view-count increment when a document page is served from cache.
    pub increment_view_count: bool,
    /// Append an HTML comment describing the cache hit to served bodies.
    pub append_footer_comment: bool,
    /// Redirect requests for non-canonical hosts to the default URL.
    pub redirect_to_default_url: bool,
    /// Answer same-site `Accept: text/css` requests with a stub body.
    pub block_css_request: bool,
    /// Answer same-site image requests with a stub body.
    pub block_img_request: bool,
    /// Enable the listing (pagination) cache gate.
    pub paging_cache: bool,
    /// Minimum item count before a listing is served from the listing cache.
    pub paging_cache_threshold: u64,
    /// Serve pages beyond the first by offset.
    pub paging_cache_use_offset: bool,
    /// Scopes excluded from the listing cache.
    pub paging_cache_exclude_scopes: BTreeSet<u64>,
    /// Maximum entries held by the in-memory store.
    pub store_capacity: usize,
    /// Maximum mutation events per invalidation batch.
    pub consume_batch_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device_classes: BTreeSet::from([DeviceClass::Pc, DeviceClass::Mobile]),
            transports: BTreeSet::from([Transport::Plain, Transport::Secure]),
            cache_crawlers: false,
            exclude_cookies: Vec::new(),
            separate_cookies: Vec::new(),
            exclude_actions: BTreeSet::new(),
            exclude_scopes: BTreeSet::new(),
            page_types: BTreeSet::from([PageType::Document, PageType::Module]),
            include_404: false,
            duration_seconds: DEFAULT_DURATION_SECONDS,
            stampede_percent: DEFAULT_STAMPEDE_PERCENT,
            use_cache_headers: false,
            cache_headers_for_proxies: false,
            document_actions: BTreeSet::from([
                RefreshAction::RefreshDocument,
                RefreshAction::RefreshModule,
                RefreshAction::RefreshIndex,
            ]),
            comment_actions: BTreeSet::from([RefreshAction::RefreshDocument]),
            increment_view_count: true,
            append_footer_comment: false,
            redirect_to_default_url: false,
            block_css_request: false,
            block_img_request: false,
            paging_cache: false,
            paging_cache_threshold: DEFAULT_PAGING_CACHE_THRESHOLD,
            paging_cache_use_offset: false,
            paging_cache_exclude_scopes: BTreeSet::new(),
            store_capacity: DEFAULT_STORE_CAPACITY,
            consume_batch_limit: DEFAULT_CONSUME_BATCH_LIMIT,
        }
    }
}

impl CacheConfig {
    /// Returns the store capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn store_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.store_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    /// Stampede percent clamped to the valid 0..=100 range.
    pub fn stampede_percent_clamped(&self) -> u8 {
        self.stampede_percent.min(100)
    }

    /// Whether `name` is configured as an excluded cookie.
    pub fn is_excluded_cookie(&self, name: &str) -> bool {
        self.exclude_cookies.iter().any(|cookie| cookie == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert!(!config.cache_crawlers);
        assert!(!config.include_404);
        assert_eq!(config.duration_seconds, 300);
        assert_eq!(config.stampede_percent, 10);
        assert_eq!(config.store_capacity, 1000);
        assert_eq!(config.consume_batch_limit, 100);
        assert!(config.page_types.contains(&PageType::Document));
        assert!(config.page_types.contains(&PageType::Module));
        assert!(!config.page_types.contains(&PageType::Other));
        assert_eq!(config.document_actions.len(), 3);
    }

    #[test]
    fn store_capacity_clamps_to_min() {
        let config = CacheConfig {
            store_capacity: 0,
            ..Default::default()
        };
        assert_eq!(config.store_capacity_non_zero().get(), 1);
    }

    #[test]
    fn stampede_percent_is_clamped() {
        let config = CacheConfig {
            stampede_percent: 250,
            ..Default::default()
        };
        assert_eq!(config.stampede_percent_clamped(), 100);
    }

    #[test]
    fn deserializes_partial_table() {
        let raw = r#"{
            "duration_seconds": 60,
            "page_types": ["document", "url"],
            "document_actions": ["refresh_module"],
            "device_classes": ["mobile"]
        }"#;
        let config: CacheConfig = serde_json::from_str(raw).expect("valid cache config");

        assert_eq!(config.duration_seconds, 60);
        assert!(config.page_types.contains(&PageType::Url));
        assert_eq!(
            config.document_actions,
            BTreeSet::from([RefreshAction::RefreshModule])
        );
        assert_eq!(
            config.device_classes,
            BTreeSet::from([DeviceClass::Mobile])
        );
        assert_eq!(config.stampede_percent, 10);
    }
}
