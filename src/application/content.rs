//! In-memory content service.
//!
//! Owns scopes, documents and comments. Every successful write publishes the
//! matching mutation through the [`CacheTrigger`] after the state lock is
//! released, so purges never run under the content lock.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::cache::{
    CacheConfig, CacheTrigger, DocumentCountIndex, ExtraData, ListingDecision, ListingGate,
    ListingQuery, MutationAction, StoreError, ViewCounter,
};
use crate::cache::lock::{rw_read, rw_write};
use crate::domain::entities::{
    CommentRecord, DocumentMove, DocumentRecord, DocumentUpdate, NewComment, NewDocument,
    ScopeRecord,
};
use crate::domain::error::DomainError;

const SOURCE: &str = "application::content";

/// Resolves routing names to scopes. Used synchronously while building the
/// request context.
pub trait ScopeDirectory: Send + Sync {
    fn scope_by_name(&self, name: &str) -> Option<u64>;
    fn scope_of_document(&self, document_id: u64) -> Option<u64>;
}

/// One page of a scope listing.
#[derive(Debug, Clone)]
pub struct Listing {
    pub scope: ScopeRecord,
    pub documents: Vec<DocumentRecord>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    /// Whether `total` came from the maintained document count.
    pub counted_from_index: bool,
}

impl Listing {
    pub fn page_count(&self) -> u64 {
        let per_page = u64::from(self.per_page.max(1));
        self.total.div_ceil(per_page).max(1)
    }
}

#[derive(Default)]
struct ContentState {
    scopes: Vec<ScopeRecord>,
    documents: BTreeMap<u64, DocumentRecord>,
    comments: BTreeMap<u64, CommentRecord>,
    next_document_id: u64,
    next_comment_id: u64,
}

impl ContentState {
    fn scope(&self, id: u64) -> Option<&ScopeRecord> {
        self.scopes.iter().find(|scope| scope.id == id)
    }

    fn require_scope(&self, id: u64) -> Result<(), DomainError> {
        self.scope(id)
            .map(|_| ())
            .ok_or_else(|| DomainError::not_found("scope", id))
    }
}

pub struct ContentService {
    state: RwLock<ContentState>,
    trigger: Arc<CacheTrigger>,
    counts: Arc<dyn DocumentCountIndex>,
    config: Arc<CacheConfig>,
}

impl ContentService {
    /// Seed one scope per section name; scope ids are assigned `1..=n` in order.
    pub fn new(
        sections: &[String],
        trigger: Arc<CacheTrigger>,
        counts: Arc<dyn DocumentCountIndex>,
        config: Arc<CacheConfig>,
    ) -> Self {
        let scopes = sections
            .iter()
            .zip(1u64..)
            .map(|(name, id)| ScopeRecord {
                id,
                name: name.clone(),
            })
            .collect();
        let state = ContentState {
            scopes,
            next_document_id: 1,
            next_comment_id: 1,
            ..Default::default()
        };
        Self {
            state: RwLock::new(state),
            trigger,
            counts,
            config,
        }
    }

    pub fn scopes(&self) -> Vec<ScopeRecord> {
        rw_read(&self.state, SOURCE, "scopes").scopes.clone()
    }

    pub fn scope(&self, id: u64) -> Result<ScopeRecord, DomainError> {
        rw_read(&self.state, SOURCE, "scope")
            .scope(id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("scope", id))
    }

    pub fn document(&self, id: u64) -> Result<DocumentRecord, DomainError> {
        rw_read(&self.state, SOURCE, "document")
            .documents
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("document", id))
    }

    pub fn comments_for(&self, document_id: u64) -> Vec<CommentRecord> {
        rw_read(&self.state, SOURCE, "comments_for")
            .comments
            .values()
            .filter(|comment| comment.document_id == document_id)
            .cloned()
            .collect()
    }

    /// Newest-first page of a scope's documents.
    pub async fn list_documents(
        &self,
        scope_id: u64,
        page: u32,
        per_page: u32,
    ) -> Result<Listing, DomainError> {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let query = ListingQuery {
            scope_ids: vec![scope_id],
            category_id: 0,
            page,
            list_count: per_page,
            search: None,
            owner_id: None,
        };
        let decision = ListingGate::evaluate(&query, &self.config, self.counts.as_ref()).await;

        let state = rw_read(&self.state, SOURCE, "list_documents");
        let scope = state
            .scope(scope_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("scope", scope_id))?;
        let in_scope = || {
            state
                .documents
                .values()
                .rev()
                .filter(move |doc| doc.scope_id == scope_id)
        };

        let (total, counted_from_index, offset) = match decision {
            ListingDecision::Serve(window) => (window.total, true, window.offset),
            ListingDecision::Bypass(reason) => {
                debug!(scope_id, ?reason, "Listing counted directly");
                (in_scope().count() as u64, false, None)
            }
        };
        let skip = match offset {
            Some(offset) => usize::try_from(offset).unwrap_or(usize::MAX),
            None => (page as usize - 1).saturating_mul(per_page as usize),
        };
        let documents = in_scope().skip(skip).take(per_page as usize).cloned().collect();

        Ok(Listing {
            scope,
            documents,
            page,
            per_page,
            total,
            counted_from_index,
        })
    }

    pub async fn insert_document(&self, input: NewDocument) -> Result<DocumentRecord, DomainError> {
        input.validate()?;
        let document = {
            let mut state = rw_write(&self.state, SOURCE, "insert_document");
            state.require_scope(input.scope_id)?;
            let now = OffsetDateTime::now_utc();
            let id = state.next_document_id;
            state.next_document_id += 1;
            let document = DocumentRecord {
                id,
                scope_id: input.scope_id,
                category_id: input.category_id,
                owner_id: input.owner_id,
                title: input.title.trim().to_string(),
                body: input.body,
                view_count: 0,
                created_at: now,
                updated_at: now,
            };
            state.documents.insert(id, document.clone());
            document
        };

        info!(
            document_id = document.id,
            scope_id = document.scope_id,
            "Document inserted"
        );
        self.trigger
            .document_inserted(document.id, document.scope_id, document.category_id)
            .await;
        Ok(document)
    }

    pub async fn update_document(
        &self,
        id: u64,
        update: DocumentUpdate,
    ) -> Result<DocumentRecord, DomainError> {
        update.validate()?;
        let (old_category, document) = {
            let mut state = rw_write(&self.state, SOURCE, "update_document");
            let document = state
                .documents
                .get_mut(&id)
                .ok_or_else(|| DomainError::not_found("document", id))?;
            let old_category = document.category_id;
            if let Some(title) = update.title {
                document.title = title.trim().to_string();
            }
            if let Some(body) = update.body {
                document.body = body;
            }
            if let Some(category_id) = update.category_id {
                document.category_id = category_id;
            }
            document.updated_at = OffsetDateTime::now_utc();
            (old_category, document.clone())
        };

        self.trigger
            .document_updated(
                id,
                (document.scope_id, old_category),
                (document.scope_id, document.category_id),
            )
            .await;
        Ok(document)
    }

    pub async fn move_document(
        &self,
        id: u64,
        target: DocumentMove,
    ) -> Result<DocumentRecord, DomainError> {
        let (old, document) = {
            let mut state = rw_write(&self.state, SOURCE, "move_document");
            state.require_scope(target.scope_id)?;
            let document = state
                .documents
                .get_mut(&id)
                .ok_or_else(|| DomainError::not_found("document", id))?;
            let old = (document.scope_id, document.category_id);
            document.scope_id = target.scope_id;
            document.category_id = target.category_id;
            document.updated_at = OffsetDateTime::now_utc();
            (old, document.clone())
        };

        info!(
            document_id = id,
            from = old.0,
            to = document.scope_id,
            "Document moved"
        );
        self.trigger
            .document_moved(id, old, (document.scope_id, document.category_id))
            .await;
        Ok(document)
    }

    pub async fn delete_document(&self, id: u64) -> Result<DocumentRecord, DomainError> {
        let document = {
            let mut state = rw_write(&self.state, SOURCE, "delete_document");
            let document = state
                .documents
                .remove(&id)
                .ok_or_else(|| DomainError::not_found("document", id))?;
            state.comments.retain(|_, comment| comment.document_id != id);
            document
        };

        info!(document_id = id, scope_id = document.scope_id, "Document deleted");
        self.trigger
            .document_deleted(id, document.scope_id, document.category_id)
            .await;
        Ok(document)
    }

    pub async fn add_comment(
        &self,
        document_id: u64,
        input: NewComment,
    ) -> Result<CommentRecord, DomainError> {
        input.validate()?;
        let (scope_id, comment) = {
            let mut state = rw_write(&self.state, SOURCE, "add_comment");
            let scope_id = state
                .documents
                .get(&document_id)
                .map(|doc| doc.scope_id)
                .ok_or_else(|| DomainError::not_found("document", document_id))?;
            let id = state.next_comment_id;
            state.next_comment_id += 1;
            let comment = CommentRecord {
                id,
                document_id,
                author: input.author.trim().to_string(),
                body: input.body,
                created_at: OffsetDateTime::now_utc(),
            };
            state.comments.insert(id, comment.clone());
            (scope_id, comment)
        };

        self.trigger
            .comment_changed(MutationAction::Insert, document_id, scope_id)
            .await;
        Ok(comment)
    }

    pub async fn update_comment(&self, id: u64, body: String) -> Result<CommentRecord, DomainError> {
        if body.trim().is_empty() {
            return Err(DomainError::validation("body must not be empty"));
        }
        let (scope_id, comment) = {
            let mut state = rw_write(&self.state, SOURCE, "update_comment");
            let comment = state
                .comments
                .get_mut(&id)
                .ok_or_else(|| DomainError::not_found("comment", id))?;
            comment.body = body;
            let comment = comment.clone();
            let scope_id = state
                .documents
                .get(&comment.document_id)
                .map_or(0, |doc| doc.scope_id);
            (scope_id, comment)
        };

        self.trigger
            .comment_changed(MutationAction::Update, comment.document_id, scope_id)
            .await;
        Ok(comment)
    }

    pub async fn delete_comment(&self, id: u64) -> Result<CommentRecord, DomainError> {
        let (scope_id, comment) = {
            let mut state = rw_write(&self.state, SOURCE, "delete_comment");
            let comment = state
                .comments
                .remove(&id)
                .ok_or_else(|| DomainError::not_found("comment", id))?;
            let scope_id = state
                .documents
                .get(&comment.document_id)
                .map_or(0, |doc| doc.scope_id);
            (scope_id, comment)
        };

        self.trigger
            .comment_changed(MutationAction::Delete, comment.document_id, scope_id)
            .await;
        Ok(comment)
    }

    /// Count one view of a rendered document.
    pub fn increment_views(&self, document_id: u64) -> Option<u64> {
        let mut state = rw_write(&self.state, SOURCE, "increment_views");
        let document = state.documents.get_mut(&document_id)?;
        document.view_count += 1;
        Some(document.view_count)
    }
}

impl ScopeDirectory for ContentService {
    fn scope_by_name(&self, name: &str) -> Option<u64> {
        rw_read(&self.state, SOURCE, "scope_by_name")
            .scopes
            .iter()
            .find(|scope| scope.name == name)
            .map(|scope| scope.id)
    }

    fn scope_of_document(&self, document_id: u64) -> Option<u64> {
        rw_read(&self.state, SOURCE, "scope_of_document")
            .documents
            .get(&document_id)
            .map(|doc| doc.scope_id)
    }
}

#[async_trait]
impl ViewCounter for ContentService {
    async fn record_view(&self, document_id: u64, _extra: &ExtraData) -> Result<(), StoreError> {
        self.increment_views(document_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::Rejected(format!("document {document_id} is gone")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{
        CacheKey, CacheEntry, EventQueue, InvalidationCoordinator, MemoryCountIndex, MemoryStore,
        PageStore, PageType, VariantTag, DeviceClass, Transport,
    };
    use bytes::Bytes;
    use std::time::Duration;

    struct Harness {
        content: ContentService,
        store: Arc<MemoryStore>,
        counts: Arc<MemoryCountIndex>,
    }

    fn harness(config: CacheConfig) -> Harness {
        let config = Arc::new(config);
        let store = Arc::new(MemoryStore::new(&config));
        let counts = Arc::new(MemoryCountIndex::new());
        let coordinator = InvalidationCoordinator::new(
            config.clone(),
            1,
            store.clone(),
            counts.clone(),
            Arc::new(EventQueue::new()),
        );
        let trigger = Arc::new(CacheTrigger::new(Arc::new(coordinator)));
        let sections = vec!["home".to_string(), "board".to_string(), "notice".to_string()];
        let content = ContentService::new(&sections, trigger, counts.clone(), config);
        Harness {
            content,
            store,
            counts,
        }
    }

    fn new_document(scope_id: u64, title: &str) -> NewDocument {
        NewDocument {
            scope_id,
            category_id: 0,
            owner_id: 7,
            title: title.into(),
            body: "body".into(),
        }
    }

    fn key(page_type: PageType, scope_id: u64, document_id: u64) -> CacheKey {
        let tag = VariantTag::new(DeviceClass::Pc, Transport::Plain, "en");
        CacheKey::build(page_type, scope_id, document_id, tag, Default::default())
    }

    fn entry() -> CacheEntry {
        CacheEntry {
            content: Bytes::from_static(b"<html></html>"),
            http_status: 200,
            cached_at: OffsetDateTime::now_utc(),
            render_elapsed: Duration::from_millis(3),
            ttl_seconds: 300,
            extra_data: ExtraData::default(),
        }
    }

    #[tokio::test]
    async fn sections_become_scopes_in_order() {
        let h = harness(CacheConfig::default());
        assert_eq!(h.content.scope_by_name("board"), Some(2));
        assert_eq!(h.content.scope_by_name("missing"), None);
        assert_eq!(h.content.scopes().len(), 3);
    }

    #[tokio::test]
    async fn insert_maintains_document_count() {
        let h = harness(CacheConfig::default());
        h.content.insert_document(new_document(2, "a")).await.unwrap();
        h.content.insert_document(new_document(2, "b")).await.unwrap();

        assert_eq!(h.counts.count(2, 0).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn insert_into_unknown_scope_fails() {
        let h = harness(CacheConfig::default());
        let err = h
            .content
            .insert_document(new_document(99, "a"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound { entity: "scope", id: 99 }));
    }

    #[tokio::test]
    async fn move_purges_both_listings() {
        let h = harness(CacheConfig::default());
        let doc = h.content.insert_document(new_document(2, "a")).await.unwrap();

        let board = key(PageType::Module, 2, 0);
        let notice = key(PageType::Module, 3, 0);
        let home = key(PageType::Module, 1, 0);
        for key in [&board, &notice, &home] {
            h.store.put(key, entry(), 300).await.unwrap();
        }

        h.content
            .move_document(
                doc.id,
                DocumentMove {
                    scope_id: 3,
                    category_id: 0,
                },
            )
            .await
            .unwrap();

        assert!(h.store.get(&board).await.unwrap().is_none());
        assert!(h.store.get(&notice).await.unwrap().is_none());
        // home is the index scope and is refreshed on every document event
        assert!(h.store.get(&home).await.unwrap().is_none());
        assert_eq!(h.counts.count(2, 0).await.unwrap(), 0);
        assert_eq!(h.counts.count(3, 0).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_purges_document_page_only() {
        let h = harness(CacheConfig {
            document_actions: [crate::cache::RefreshAction::RefreshDocument]
                .into_iter()
                .collect(),
            ..Default::default()
        });
        let first = h.content.insert_document(new_document(2, "a")).await.unwrap();
        let second = h.content.insert_document(new_document(2, "b")).await.unwrap();

        let first_key = key(PageType::Document, 2, first.id);
        let second_key = key(PageType::Document, 2, second.id);
        h.store.put(&first_key, entry(), 300).await.unwrap();
        h.store.put(&second_key, entry(), 300).await.unwrap();

        h.content.delete_document(first.id).await.unwrap();

        assert!(h.store.get(&first_key).await.unwrap().is_none());
        assert!(h.store.get(&second_key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn comments_follow_their_document() {
        let h = harness(CacheConfig::default());
        let doc = h.content.insert_document(new_document(2, "a")).await.unwrap();
        let comment = h
            .content
            .add_comment(
                doc.id,
                NewComment {
                    author: "kim".into(),
                    body: "first".into(),
                },
            )
            .await
            .unwrap();
        h.content
            .update_comment(comment.id, "edited".into())
            .await
            .unwrap();
        assert_eq!(h.content.comments_for(doc.id)[0].body, "edited");

        h.content.delete_document(doc.id).await.unwrap();
        assert!(h.content.comments_for(doc.id).is_empty());
        assert!(matches!(
            h.content.delete_comment(comment.id).await,
            Err(DomainError::NotFound { entity: "comment", .. })
        ));
    }

    #[tokio::test]
    async fn listing_uses_index_count_above_threshold() {
        let h = harness(CacheConfig {
            paging_cache: true,
            paging_cache_threshold: 2,
            ..Default::default()
        });
        for title in ["a", "b", "c"] {
            h.content.insert_document(new_document(2, title)).await.unwrap();
        }

        let listing = h.content.list_documents(2, 1, 2).await.unwrap();
        assert!(listing.counted_from_index);
        assert_eq!(listing.total, 3);
        assert_eq!(listing.page_count(), 2);
        assert_eq!(listing.documents[0].title, "c");

        let small = h.content.list_documents(3, 1, 2).await.unwrap();
        assert!(!small.counted_from_index);
        assert_eq!(small.total, 0);
    }

    #[tokio::test]
    async fn deep_listing_pages_start_at_the_gate_offset() {
        let h = harness(CacheConfig {
            paging_cache: true,
            paging_cache_threshold: 2,
            paging_cache_use_offset: true,
            ..Default::default()
        });
        for title in ["a", "b", "c"] {
            h.content.insert_document(new_document(2, title)).await.unwrap();
        }

        let second = h.content.list_documents(2, 2, 2).await.unwrap();
        assert!(second.counted_from_index);
        let titles: Vec<_> = second.documents.iter().map(|doc| doc.title.as_str()).collect();
        assert_eq!(titles, ["a"]);
    }

    #[tokio::test]
    async fn recorded_views_accumulate() {
        let h = harness(CacheConfig::default());
        let doc = h.content.insert_document(new_document(2, "a")).await.unwrap();

        h.content
            .record_view(doc.id, &ExtraData::default())
            .await
            .unwrap();
        h.content.increment_views(doc.id);
        assert_eq!(h.content.document(doc.id).unwrap().view_count, 2);
        assert!(h.content.record_view(999, &ExtraData::default()).await.is_err());
    }
}
