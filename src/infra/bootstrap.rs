//! Wires settings into the services and router of the reference host.

use std::sync::Arc;

use axum::Router;
use tracing::info;

use crate::{
    application::content::ContentService,
    cache::{
        CacheState, CacheTrigger, EventQueue, InvalidationCoordinator, MemoryCountIndex,
        MemoryStore, PageCache, SiteProfile,
    },
    config::Settings,
};

use super::http::{self, HostContextSource, HttpState};

/// Everything the server needs, with handles kept for inspection.
pub struct Application {
    pub router: Router,
    pub content: Arc<ContentService>,
    pub store: Arc<MemoryStore>,
    pub counts: Arc<MemoryCountIndex>,
    pub coordinator: Arc<InvalidationCoordinator>,
}

pub fn build_application(settings: &Settings) -> Application {
    let config = Arc::new(settings.cache.clone());
    let index_scope_id = settings.index_scope_id();

    let store = Arc::new(MemoryStore::new(&config));
    let counts = Arc::new(MemoryCountIndex::new());
    let coordinator = Arc::new(InvalidationCoordinator::new(
        config.clone(),
        index_scope_id,
        store.clone(),
        counts.clone(),
        Arc::new(EventQueue::new()),
    ));
    let trigger = Arc::new(CacheTrigger::new(coordinator.clone()));
    let content = Arc::new(ContentService::new(
        &settings.site.sections,
        trigger,
        counts.clone(),
        config.clone(),
    ));

    let mut site = SiteProfile::new(settings.site.default_url.clone(), index_scope_id);
    site.aliases = settings.site.aliases.clone();
    let page_cache = PageCache::new(config.clone(), Arc::new(site), store.clone())
        .with_view_counter(content.clone());

    let default_host = match (
        settings.site.default_url.host_str(),
        settings.site.default_url.port(),
    ) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => "localhost".to_string(),
    };
    let contexts = HostContextSource::new(
        content.clone(),
        settings.site.auth_cookie.clone(),
        settings.site.locale.clone(),
        default_host,
    );
    let cache_state = CacheState {
        cache: Arc::new(page_cache),
        contexts: Arc::new(contexts),
    };

    let http_state = HttpState::new(content.clone(), config.clone(), index_scope_id);
    let router = http::build_router(http_state, cache_state);

    info!(
        enabled = config.enabled,
        duration_seconds = config.duration_seconds,
        stampede_percent = config.stampede_percent,
        index_scope_id,
        sections = settings.site.sections.len(),
        "Page cache configured"
    );

    Application {
        router,
        content,
        store,
        counts,
        coordinator,
    }
}
