//! Cache serving and capture.
//!
//! `PageCache::lookup` turns a request into one of three outcomes:
//! not cacheable, a ready-to-send cached reply, or a miss carrying the
//! `PendingCapture` that `PageCache::capture` later consumes once the page
//! has been rendered.

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

use super::admission::{Admission, RejectReason, RequestContext, SiteProfile, admit};
use super::config::CacheConfig;
use super::expiry::remaining_seconds;
use super::headers::{HeaderPolicy, apply_expiry, status_from_code};
use super::keys::{CacheKey, ExtraParams, PageType};
use super::store::{CacheEntry, ExtraData, PageStore, StoreError};

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Replays the view-count side effect of a document page served from cache.
#[async_trait]
pub trait ViewCounter: Send + Sync {
    async fn record_view(&self, document_id: u64, extra: &ExtraData) -> Result<(), StoreError>;
}

/// Document fields a renderer attaches to its response so capture can store them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentMeta {
    pub document_id: u64,
    pub owner_id: u64,
    pub view_count: u64,
}

/// Response extension: the view of this document was credited to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditedView(pub u64);

/// Per-request state between a miss and the capture of the rendered page.
#[derive(Debug, Clone)]
pub struct PendingCapture {
    pub key: CacheKey,
    pub page_type: PageType,
    pub started: Instant,
}

impl PendingCapture {
    /// The normalized request parameters the key was built from.
    pub fn request_vars(&self) -> &ExtraParams {
        &self.key.extra_params
    }
}

/// A reply assembled from a cache entry.
#[derive(Debug, Clone)]
pub struct CachedReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub credited: Option<CreditedView>,
}

impl IntoResponse for CachedReply {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.body).into_response();
        let headers = response.headers_mut();
        headers.extend(self.headers);
        if self.status == StatusCode::NOT_MODIFIED {
            headers.remove(header::CONTENT_TYPE);
            headers.remove(header::CONTENT_LENGTH);
        } else {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(HTML_CONTENT_TYPE),
            );
        }
        if let Some(credited) = self.credited {
            response.extensions_mut().insert(credited);
        }
        response
    }
}

/// A miss: headers to emit on the fresh response, and the capture to arm.
#[derive(Debug, Clone)]
pub struct Miss {
    pub pending: PendingCapture,
    pub headers: HeaderMap,
}

#[derive(Debug, Clone)]
pub enum Lookup {
    NotCacheable(RejectReason),
    Hit(CachedReply),
    Miss(Miss),
}

/// What the renderer produced for a pending capture.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub status: u16,
    pub body: Bytes,
    pub document: Option<DocumentMeta>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Redirect,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Stored,
    Skipped(SkipReason),
    Failed,
}

/// The page cache engine.
#[derive(Clone)]
pub struct PageCache {
    config: Arc<CacheConfig>,
    site: Arc<SiteProfile>,
    store: Arc<dyn PageStore>,
    views: Option<Arc<dyn ViewCounter>>,
}

impl PageCache {
    pub fn new(config: Arc<CacheConfig>, site: Arc<SiteProfile>, store: Arc<dyn PageStore>) -> Self {
        Self {
            config,
            site,
            store,
            views: None,
        }
    }

    pub fn with_view_counter(mut self, views: Arc<dyn ViewCounter>) -> Self {
        self.views = Some(views);
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn site(&self) -> &SiteProfile {
        &self.site
    }

    pub fn store(&self) -> &Arc<dyn PageStore> {
        &self.store
    }

    /// Admit, look up, and either build the cached reply or arm a capture.
    pub async fn lookup(
        &self,
        ctx: &RequestContext,
        host_checked: bool,
        now: OffsetDateTime,
    ) -> Lookup {
        let admitted = match admit(ctx, &self.config, &self.site, host_checked) {
            Admission::Rejected(reason) => {
                metrics::counter!("supercache_not_cacheable_total", "reason" => reason.as_str())
                    .increment(1);
                debug!(cache = "page", outcome = "not_cacheable", reason = %reason);
                return Lookup::NotCacheable(reason);
            }
            Admission::Admitted(admitted) => admitted,
        };
        let page_type = admitted.page_type;
        let key = admitted.key;
        let policy = HeaderPolicy::resolve(&self.config, ctx.forwarded);

        let entry = match self.store.get(&key).await {
            Ok(entry) => entry,
            Err(err) => {
                metrics::counter!("supercache_store_error_total", "op" => "get").increment(1);
                warn!(
                    cache = "page",
                    op = "get",
                    scope_id = key.scope_id,
                    fine_id = key.fine_id,
                    error = %err,
                    "Page store lookup failed; rendering fresh"
                );
                None
            }
        };

        let Some(entry) = entry else {
            metrics::counter!("supercache_miss_total", "page_type" => page_type.as_str())
                .increment(1);
            debug!(
                cache = "page",
                outcome = "miss",
                page_type = %page_type,
                scope_id = key.scope_id,
                fine_id = key.fine_id
            );
            let mut headers = HeaderMap::new();
            apply_expiry(
                &mut headers,
                page_type,
                self.config.duration_seconds,
                policy,
                SystemTime::from(now),
            );
            return Lookup::Miss(Miss {
                pending: PendingCapture {
                    key,
                    page_type,
                    started: Instant::now(),
                },
                headers,
            });
        };

        metrics::counter!("supercache_hit_total", "page_type" => page_type.as_str()).increment(1);
        debug!(
            cache = "page",
            outcome = "hit",
            page_type = %page_type,
            scope_id = key.scope_id,
            fine_id = key.fine_id
        );
        let reply = self
            .serve_entry(ctx, page_type, &key, entry, policy, now)
            .await;
        Lookup::Hit(reply)
    }

    async fn serve_entry(
        &self,
        ctx: &RequestContext,
        page_type: PageType,
        key: &CacheKey,
        entry: CacheEntry,
        policy: HeaderPolicy,
        now: OffsetDateTime,
    ) -> CachedReply {
        let remaining = remaining_seconds(entry.cached_at, entry.ttl_seconds, now);
        let mut headers = HeaderMap::new();
        apply_expiry(
            &mut headers,
            page_type,
            remaining,
            policy,
            SystemTime::from(now),
        );

        let credited = self.credit_view(ctx, page_type, key, &entry).await;

        if not_modified_since(ctx.if_modified_since.as_deref(), entry.cached_at) {
            return CachedReply {
                status: StatusCode::NOT_MODIFIED,
                headers,
                body: Bytes::new(),
                credited,
            };
        }

        let body = if self.config.append_footer_comment {
            with_footer(&entry, remaining)
        } else {
            entry.content.clone()
        };
        CachedReply {
            status: status_from_code(entry.http_status),
            headers,
            body,
            credited,
        }
    }

    async fn credit_view(
        &self,
        ctx: &RequestContext,
        page_type: PageType,
        key: &CacheKey,
        entry: &CacheEntry,
    ) -> Option<CreditedView> {
        if page_type != PageType::Document
            || !self.config.increment_view_count
            || entry.extra_data.view_count.is_none()
            || ctx.credited_documents.contains(&key.fine_id)
        {
            return None;
        }
        let views = self.views.as_ref()?;
        match views.record_view(key.fine_id, &entry.extra_data).await {
            Ok(()) => Some(CreditedView(key.fine_id)),
            Err(err) => {
                metrics::counter!("supercache_store_error_total", "op" => "record_view")
                    .increment(1);
                warn!(
                    cache = "page",
                    op = "record_view",
                    document_id = key.fine_id,
                    error = %err,
                    "Failed to replay view count for cached document"
                );
                None
            }
        }
    }

    /// Whether a rendered response with `status` may be captured.
    pub fn capture_eligibility(&self, status: u16) -> Result<(), SkipReason> {
        if (300..400).contains(&status) {
            return Err(SkipReason::Redirect);
        }
        match status {
            200 => Ok(()),
            404 if self.config.include_404 => Ok(()),
            _ => Err(SkipReason::Status),
        }
    }

    /// Write a rendered page under the key computed at admission time.
    pub async fn capture(
        &self,
        pending: PendingCapture,
        rendered: RenderedPage,
        now: OffsetDateTime,
    ) -> CaptureOutcome {
        if let Err(reason) = self.capture_eligibility(rendered.status) {
            debug!(
                cache = "page",
                outcome = "capture_skipped",
                status = rendered.status,
                reason = ?reason
            );
            return CaptureOutcome::Skipped(reason);
        }

        let extra_data = match (pending.page_type, rendered.document) {
            (PageType::Document, Some(meta)) if meta.document_id == pending.key.fine_id => {
                ExtraData {
                    owner_id: Some(meta.owner_id),
                    view_count: Some(meta.view_count),
                }
            }
            _ => ExtraData::default(),
        };
        let render_elapsed = pending.started.elapsed();
        let ttl_seconds = self.config.duration_seconds;
        let entry = CacheEntry {
            content: rendered.body,
            http_status: rendered.status,
            cached_at: now,
            render_elapsed,
            ttl_seconds,
            extra_data,
        };

        match self.store.put(&pending.key, entry, ttl_seconds).await {
            Ok(()) => {
                metrics::counter!("supercache_capture_total", "page_type" => pending.page_type.as_str())
                    .increment(1);
                metrics::histogram!("supercache_render_ms")
                    .record(render_elapsed.as_secs_f64() * 1000.0);
                debug!(
                    cache = "page",
                    outcome = "captured",
                    page_type = %pending.page_type,
                    scope_id = pending.key.scope_id,
                    fine_id = pending.key.fine_id,
                    status = rendered.status
                );
                CaptureOutcome::Stored
            }
            Err(err) => {
                metrics::counter!("supercache_store_error_total", "op" => "put").increment(1);
                warn!(
                    cache = "page",
                    op = "put",
                    scope_id = pending.key.scope_id,
                    fine_id = pending.key.fine_id,
                    error = %err,
                    "Failed to store rendered page"
                );
                CaptureOutcome::Failed
            }
        }
    }
}

/// True when `if_modified_since` parses and is at or after `cached_at`,
/// compared at second resolution. Malformed values count as absent.
pub fn not_modified_since(if_modified_since: Option<&str>, cached_at: OffsetDateTime) -> bool {
    let Some(watermark) = if_modified_since.and_then(|raw| httpdate::parse_http_date(raw).ok())
    else {
        return false;
    };
    OffsetDateTime::from(watermark).unix_timestamp() >= cached_at.unix_timestamp()
}

fn with_footer(entry: &CacheEntry, remaining: u64) -> Bytes {
    let generated = entry.cached_at.format(&Rfc3339).unwrap_or_default();
    let footer = format!(
        "\n<!--\n  Served from page cache: {} bytes, generated {generated}, rendered in {:.1} ms, expires in {remaining} s\n-->\n",
        entry.content.len(),
        entry.render_elapsed.as_secs_f64() * 1000.0,
    );
    let mut body = BytesMut::with_capacity(entry.content.len() + footer.len());
    body.extend_from_slice(&entry.content);
    body.extend_from_slice(footer.as_bytes());
    body.freeze()
}
