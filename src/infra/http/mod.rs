mod admin;
mod context;
mod middleware;
mod public;

pub use admin::build_admin_router;
pub use context::{HostContextSource, LOCALE_COOKIE, VIEWED_COOKIE, viewed_documents};
pub use middleware::RequestId;
pub use public::build_public_router;

use std::sync::Arc;

use axum::{Router, middleware as axum_middleware};

use crate::{
    application::content::{ContentService, ScopeDirectory},
    cache::{CacheConfig, CacheState, page_cache_layer},
};

use middleware::{log_responses, remember_viewed, set_request_context};

const DEFAULT_PER_PAGE: u32 = 20;

#[derive(Clone)]
pub struct HttpState {
    pub content: Arc<ContentService>,
    pub cache_config: Arc<CacheConfig>,
    pub index_scope_id: u64,
    pub per_page: u32,
}

impl HttpState {
    pub fn new(content: Arc<ContentService>, cache_config: Arc<CacheConfig>, index_scope_id: u64) -> Self {
        Self {
            content,
            cache_config,
            index_scope_id,
            per_page: DEFAULT_PER_PAGE,
        }
    }

    fn content_scope(&self, name: &str) -> Option<u64> {
        self.content.scope_by_name(name)
    }
}

/// Public pages behind the page cache, plus the uncached mutation API.
pub fn build_router(state: HttpState, cache: CacheState) -> Router {
    let public = build_public_router().layer(axum_middleware::from_fn_with_state(
        cache,
        page_cache_layer,
    ));

    build_admin_router()
        .merge(public)
        .with_state(state)
        .layer(axum_middleware::from_fn(remember_viewed))
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
