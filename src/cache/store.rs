//! Page storage.
//!
//! `PageStore` is the seam to whatever backend holds rendered pages. The
//! in-process `MemoryStore` keeps them in an LRU with per-entry expiry.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;

use super::config::CacheConfig;
use super::keys::{CacheKey, ScopeSelector};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

/// Denormalized document fields stored alongside a cached render.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtraData {
    /// Author of the document. Replay data only; handed to the `ViewCounter` unchanged.
    pub owner_id: Option<u64>,
    /// View count at capture time. `Some` marks an entry eligible for view replay.
    pub view_count: Option<u64>,
}

/// One cached render.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub content: Bytes,
    pub http_status: u16,
    pub cached_at: OffsetDateTime,
    pub render_elapsed: Duration,
    pub ttl_seconds: u64,
    pub extra_data: ExtraData,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("page store unavailable: {0}")]
    Unavailable(String),
    #[error("page store operation timed out")]
    Timeout,
    #[error("page store rejected the entry: {0}")]
    Rejected(String),
}

/// Keyed page storage with scope-selector deletion.
#[async_trait]
pub trait PageStore: Send + Sync {
    /// Fetch a live entry. Expired entries read as `None`.
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError>;

    /// Store `entry` under `key` for `ttl_seconds`.
    async fn put(&self, key: &CacheKey, entry: CacheEntry, ttl_seconds: u64)
    -> Result<(), StoreError>;

    /// Delete every entry `selector` covers. Returns how many were removed.
    async fn delete_by_scope(&self, selector: ScopeSelector) -> Result<usize, StoreError>;
}

struct Slot {
    scope_id: u64,
    fine_id: u64,
    expires_at: OffsetDateTime,
    entry: CacheEntry,
}

/// In-memory LRU page store keyed by fingerprint.
pub struct MemoryStore {
    slots: RwLock<LruCache<String, Slot>>,
}

impl MemoryStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            slots: RwLock::new(LruCache::new(config.store_capacity_non_zero())),
        }
    }

    /// Number of slots held, expired or not.
    pub fn len(&self) -> usize {
        rw_read(&self.slots, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PageStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        let fingerprint = key.fingerprint();
        let mut slots = rw_write(&self.slots, SOURCE, "get");

        let expired = match slots.get(&fingerprint) {
            None => return Ok(None),
            Some(slot) if OffsetDateTime::now_utc() < slot.expires_at => {
                return Ok(Some(slot.entry.clone()));
            }
            Some(_) => true,
        };
        if expired {
            slots.pop(&fingerprint);
            metrics::counter!("supercache_store_expired_total").increment(1);
        }
        Ok(None)
    }

    async fn put(
        &self,
        key: &CacheKey,
        entry: CacheEntry,
        ttl_seconds: u64,
    ) -> Result<(), StoreError> {
        let ttl = i64::try_from(ttl_seconds)
            .map_err(|_| StoreError::Rejected(format!("ttl {ttl_seconds}s out of range")))?;
        let expires_at = OffsetDateTime::now_utc()
            .checked_add(time::Duration::seconds(ttl))
            .ok_or_else(|| StoreError::Rejected(format!("ttl {ttl_seconds}s out of range")))?;
        let slot = Slot {
            scope_id: key.scope_id,
            fine_id: key.fine_id,
            expires_at,
            entry,
        };

        let evicted = rw_write(&self.slots, SOURCE, "put").push(key.fingerprint(), slot);
        if let Some((evicted_key, _)) = evicted
            && evicted_key != key.fingerprint()
        {
            metrics::counter!("supercache_store_evict_total").increment(1);
        }
        Ok(())
    }

    async fn delete_by_scope(&self, selector: ScopeSelector) -> Result<usize, StoreError> {
        let mut slots = rw_write(&self.slots, SOURCE, "delete_by_scope");
        let doomed: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| selector.matches(slot.scope_id, slot.fine_id))
            .map(|(fingerprint, _)| fingerprint.clone())
            .collect();
        for fingerprint in &doomed {
            slots.pop(fingerprint);
        }
        Ok(doomed.len())
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;
    use crate::cache::keys::{DeviceClass, ExtraParams, PageType, Transport, VariantTag};

    fn key(page_type: PageType, scope: u64, document: u64) -> CacheKey {
        CacheKey::build(
            page_type,
            scope,
            document,
            VariantTag::new(DeviceClass::Pc, Transport::Plain, "en"),
            ExtraParams::new(),
        )
    }

    fn entry(body: &'static str) -> CacheEntry {
        CacheEntry {
            content: Bytes::from_static(body.as_bytes()),
            http_status: 200,
            cached_at: OffsetDateTime::now_utc(),
            render_elapsed: Duration::from_millis(12),
            ttl_seconds: 300,
            extra_data: ExtraData::default(),
        }
    }

    #[tokio::test]
    async fn put_then_get_returns_entry() {
        let store = MemoryStore::new(&CacheConfig::default());
        let key = key(PageType::Document, 1, 10);

        assert!(store.get(&key).await.expect("get").is_none());
        store.put(&key, entry("hello"), 300).await.expect("put");

        let cached = store.get(&key).await.expect("get").expect("entry");
        assert_eq!(cached.content, Bytes::from_static(b"hello"));
        assert_eq!(cached.http_status, 200);
    }

    #[tokio::test]
    async fn unrepresentable_ttl_is_rejected() {
        let store = MemoryStore::new(&CacheConfig::default());
        let key = key(PageType::Document, 1, 11);

        let err = store
            .put(&key, entry("forever"), 400_000_000_000)
            .await
            .expect_err("ttl past the calendar range");
        assert!(matches!(err, StoreError::Rejected(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn zero_ttl_entries_read_as_absent() {
        let store = MemoryStore::new(&CacheConfig::default());
        let key = key(PageType::Module, 1, 0);

        store.put(&key, entry("stale"), 0).await.expect("put");
        assert!(store.get(&key).await.expect("get").is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn delete_by_document_selector_spans_scopes() {
        let store = MemoryStore::new(&CacheConfig::default());
        let doc = key(PageType::Document, 1, 10);
        let listing = key(PageType::Module, 1, 0);
        store.put(&doc, entry("doc"), 300).await.expect("put");
        store.put(&listing, entry("list"), 300).await.expect("put");

        let removed = store
            .delete_by_scope(ScopeSelector::document(10))
            .await
            .expect("delete");

        assert_eq!(removed, 1);
        assert!(store.get(&doc).await.expect("get").is_none());
        assert!(store.get(&listing).await.expect("get").is_some());
    }

    #[tokio::test]
    async fn delete_by_scope_selector_keeps_documents() {
        let store = MemoryStore::new(&CacheConfig::default());
        let doc = key(PageType::Document, 1, 10);
        let listing = key(PageType::Module, 1, 0);
        let other_listing = key(PageType::Module, 2, 0);
        for k in [&doc, &listing, &other_listing] {
            store.put(k, entry("x"), 300).await.expect("put");
        }

        let removed = store
            .delete_by_scope(ScopeSelector::scope(1))
            .await
            .expect("delete");

        assert_eq!(removed, 1);
        assert!(store.get(&doc).await.expect("get").is_some());
        assert!(store.get(&other_listing).await.expect("get").is_some());
    }

    #[tokio::test]
    async fn lru_evicts_oldest_entry() {
        let config = CacheConfig {
            store_capacity: 2,
            ..Default::default()
        };
        let store = MemoryStore::new(&config);
        let first = key(PageType::Document, 1, 1);
        let second = key(PageType::Document, 1, 2);
        let third = key(PageType::Document, 1, 3);

        store.put(&first, entry("1"), 300).await.expect("put");
        store.put(&second, entry("2"), 300).await.expect("put");
        store.put(&third, entry("3"), 300).await.expect("put");

        assert!(store.get(&first).await.expect("get").is_none());
        assert!(store.get(&second).await.expect("get").is_some());
        assert!(store.get(&third).await.expect("get").is_some());
    }

    #[tokio::test]
    async fn recovers_from_poisoned_lock() {
        let store = MemoryStore::new(&CacheConfig::default());

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store.slots.write().expect("slots lock should be acquired");
            panic!("poison slots lock");
        }));

        let key = key(PageType::Document, 1, 1);
        store.put(&key, entry("ok"), 300).await.expect("put");
        assert!(store.get(&key).await.expect("get").is_some());
    }
}
