//! Per-(scope, category) document counts.
//!
//! The invalidation coordinator keeps these current on every document
//! mutation; the listing gate reads them instead of counting rows.

use async_trait::async_trait;
use dashmap::DashMap;

use super::store::StoreError;

#[async_trait]
pub trait DocumentCountIndex: Send + Sync {
    /// Add `delta` to the bucket of `(scope_id, category_id)`.
    async fn adjust(&self, scope_id: u64, category_id: u64, delta: i64) -> Result<(), StoreError>;

    /// Documents in `scope_id`, or in one category of it when `category_id != 0`.
    async fn count(&self, scope_id: u64, category_id: u64) -> Result<u64, StoreError>;
}

/// In-memory count index.
///
/// A categorized adjustment also moves the scope-wide `(scope, 0)` bucket, so
/// `count(scope, 0)` is the total for the scope.
#[derive(Default)]
pub struct MemoryCountIndex {
    buckets: DashMap<(u64, u64), u64>,
}

impl MemoryCountIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a bucket. Used when seeding from an existing content set.
    pub fn set(&self, scope_id: u64, category_id: u64, count: u64) {
        self.buckets.insert((scope_id, category_id), count);
    }

    fn bump(&self, bucket: (u64, u64), delta: i64) {
        let mut slot = self.buckets.entry(bucket).or_insert(0);
        let current = *slot;
        *slot = if delta >= 0 {
            current.saturating_add(delta.unsigned_abs())
        } else {
            current.saturating_sub(delta.unsigned_abs())
        };
    }
}

#[async_trait]
impl DocumentCountIndex for MemoryCountIndex {
    async fn adjust(&self, scope_id: u64, category_id: u64, delta: i64) -> Result<(), StoreError> {
        self.bump((scope_id, category_id), delta);
        if category_id != 0 {
            self.bump((scope_id, 0), delta);
        }
        Ok(())
    }

    async fn count(&self, scope_id: u64, category_id: u64) -> Result<u64, StoreError> {
        Ok(self
            .buckets
            .get(&(scope_id, category_id))
            .map(|count| *count)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn categorized_adjustments_roll_up_to_scope() {
        let index = MemoryCountIndex::new();
        index.adjust(1, 5, 1).await.unwrap();
        index.adjust(1, 6, 1).await.unwrap();
        index.adjust(1, 0, 1).await.unwrap();

        assert_eq!(index.count(1, 5).await.unwrap(), 1);
        assert_eq!(index.count(1, 6).await.unwrap(), 1);
        assert_eq!(index.count(1, 0).await.unwrap(), 3);
        assert_eq!(index.count(2, 0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn decrement_floors_at_zero() {
        let index = MemoryCountIndex::new();
        index.set(1, 0, 1);
        index.adjust(1, 0, -1).await.unwrap();
        index.adjust(1, 0, -1).await.unwrap();

        assert_eq!(index.count(1, 0).await.unwrap(), 0);
    }
}
