//! Page cache middleware.
//!
//! Runs the guard, then the admission/lookup state machine, around the
//! wrapped router. Hits short-circuit the router; misses render through it
//! and the rendered page is captured on the way out.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{
        Request, StatusCode,
        header::{CACHE_CONTROL, PRAGMA},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body_util::BodyExt;
use time::OffsetDateTime;
use tracing::{instrument, warn};

use super::admission::RequestContext;
use super::guard;
use super::headers::apply_no_cache;
use super::pagination::{InferredPage, infer_page};
use super::serving::{DocumentMeta, Lookup, Miss, PageCache, RenderedPage};

/// Builds the engine's view of a request. Implemented by the host, which owns
/// routing, authentication and client classification.
pub trait RequestContextSource: Send + Sync {
    fn context(&self, request: &Request<Body>) -> RequestContext;
}

/// Shared state for [`page_cache_layer`].
#[derive(Clone)]
pub struct CacheState {
    pub cache: Arc<PageCache>,
    pub contexts: Arc<dyn RequestContextSource>,
}

#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn page_cache_layer(
    State(state): State<CacheState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let ctx = state.contexts.context(&request);
    let config = state.cache.config();

    let checked = guard::inspect(&ctx, config, state.cache.site());
    if let Some(early) = checked.early {
        return early.into_response();
    }

    if config.paging_cache
        && let Some(page) = infer_page(&ctx)
    {
        request.extensions_mut().insert(InferredPage(page));
    }

    let now = OffsetDateTime::now_utc();
    match state.cache.lookup(&ctx, checked.host_checked, now).await {
        Lookup::NotCacheable(_) => next.run(request).await,
        Lookup::Hit(reply) => reply.into_response(),
        Lookup::Miss(miss) => {
            let response = next.run(request).await;
            finish_miss(&state.cache, miss, response).await
        }
    }
}

async fn finish_miss(cache: &PageCache, miss: Miss, response: Response) -> Response {
    let (mut parts, body) = response.into_parts();
    parts.headers.extend(miss.headers);
    if parts.headers.contains_key(CACHE_CONTROL) {
        parts.headers.remove(PRAGMA);
    }

    let status = parts.status;
    if status.is_redirection() {
        apply_no_cache(&mut parts.headers);
    }
    if cache.capture_eligibility(status.as_u16()).is_err() {
        return Response::from_parts(parts, body);
    }

    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            warn!(
                cache = "page",
                op = "buffer_body",
                error = %err,
                "Failed to buffer rendered page; dropping capture"
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let document = parts.extensions.get::<DocumentMeta>().copied();
    let rendered = RenderedPage {
        status: status.as_u16(),
        body: bytes.clone(),
        document,
    };
    cache
        .capture(miss.pending, rendered, OffsetDateTime::now_utc())
        .await;

    Response::from_parts(parts, Body::from(bytes))
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::routing::get;
    use tower::ServiceExt;
    use url::Url;

    use super::*;
    use crate::cache::admission::{RouteInfo, ScopeRef, SiteProfile};
    use crate::cache::config::CacheConfig;
    use crate::cache::headers::DIAGNOSTIC_HEADER;
    use crate::cache::store::MemoryStore;

    struct PathContexts;

    impl RequestContextSource for PathContexts {
        fn context(&self, request: &Request<Body>) -> RequestContext {
            let uri = request.uri().to_string();
            let mut ctx = RequestContext::get("example.com", uri);
            ctx.method = request.method().clone();
            ctx.route = RouteInfo {
                scope: ScopeRef::Id(3),
                ..Default::default()
            };
            ctx
        }
    }

    fn router(config: CacheConfig) -> Router {
        let site = SiteProfile::new(Url::parse("http://example.com/").unwrap(), 1);
        let store = Arc::new(MemoryStore::new(&config));
        let cache = PageCache::new(Arc::new(config), Arc::new(site), store);
        let state = CacheState {
            cache: Arc::new(cache),
            contexts: Arc::new(PathContexts),
        };
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        Router::new()
            .route(
                "/",
                get(move || {
                    let counter = counter.clone();
                    async move {
                        let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        format!("render #{n}")
                    }
                }),
            )
            .route(
                "/legacy",
                get(|| async { ([(PRAGMA, "no-cache")], "legacy page") }),
            )
            .route(
                "/moved",
                get(|| async { axum::response::Redirect::temporary("/") }),
            )
            .layer(axum::middleware::from_fn_with_state(state, page_cache_layer))
    }

    async fn body_of(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn second_request_is_served_from_cache() {
        let app = router(CacheConfig::default());

        let first = app.clone().oneshot(get_request("/")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert!(first.headers().contains_key(DIAGNOSTIC_HEADER));
        assert_eq!(body_of(first).await, "render #0");

        let second = app.oneshot(get_request("/")).await.unwrap();
        assert_eq!(body_of(second).await, "render #0");
    }

    #[tokio::test]
    async fn redirects_get_no_cache_headers_and_are_not_stored() {
        let app = router(CacheConfig::default());

        let response = app.clone().oneshot(get_request("/moved")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert!(
            response
                .headers()
                .get(axum::http::header::CACHE_CONTROL)
                .unwrap()
                .to_str()
                .unwrap()
                .contains("no-store")
        );

        let again = app.oneshot(get_request("/moved")).await.unwrap();
        assert_eq!(again.status(), StatusCode::TEMPORARY_REDIRECT);
    }

    #[tokio::test]
    async fn rendered_pragma_is_dropped_when_cache_headers_are_sent() {
        let app = router(CacheConfig {
            use_cache_headers: true,
            ..Default::default()
        });

        let response = app.oneshot(get_request("/legacy")).await.unwrap();
        assert!(
            response
                .headers()
                .get(CACHE_CONTROL)
                .unwrap()
                .to_str()
                .unwrap()
                .starts_with("max-age=")
        );
        assert!(response.headers().get(PRAGMA).is_none());
    }

    #[tokio::test]
    async fn disabled_cache_renders_every_time() {
        let app = router(CacheConfig {
            enabled: false,
            ..Default::default()
        });

        let first = app.clone().oneshot(get_request("/")).await.unwrap();
        assert!(!first.headers().contains_key(DIAGNOSTIC_HEADER));
        assert_eq!(body_of(first).await, "render #0");

        let second = app.oneshot(get_request("/")).await.unwrap();
        assert_eq!(body_of(second).await, "render #1");
    }
}
