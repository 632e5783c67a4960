use axum::{
    Extension, Router,
    extract::{OriginalUri, Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;

use crate::{
    application::{
        error::AppError,
        render::{render_document, render_listing, render_not_found},
    },
    cache::{CreditedView, DocumentMeta, InferredPage},
    domain::error::DomainError,
};

use super::{HttpState, context::viewed_documents};

/// Public pages. The caller wraps this router in the page cache layer.
pub fn build_public_router() -> Router<HttpState> {
    Router::new()
        .route("/", get(index))
        .route("/{section}", get(section_index))
        .route("/{section}/{document_id}", get(document_detail))
        .fallback(fallback)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PageQuery {
    page: Option<u32>,
    section: Option<String>,
    document_id: Option<u64>,
}

async fn index(
    State(state): State<HttpState>,
    Query(query): Query<PageQuery>,
    inferred: Option<Extension<InferredPage>>,
    jar: CookieJar,
    OriginalUri(uri): OriginalUri,
) -> Response {
    if let Some(document_id) = query.document_id {
        return document_page(&state, document_id, &jar, inferred, uri.path()).await;
    }
    let scope_id = match query.section.as_deref() {
        Some(name) => match state.content_scope(name) {
            Some(id) => id,
            None => return not_found(&state, uri.path()),
        },
        None => state.index_scope_id,
    };
    listing_page(&state, scope_id, query.page).await
}

async fn section_index(
    State(state): State<HttpState>,
    Path(section): Path<String>,
    Query(query): Query<PageQuery>,
    OriginalUri(uri): OriginalUri,
) -> Response {
    match state.content_scope(&section) {
        Some(scope_id) => listing_page(&state, scope_id, query.page).await,
        None => not_found(&state, uri.path()),
    }
}

async fn document_detail(
    State(state): State<HttpState>,
    Path((_section, document_id)): Path<(String, String)>,
    inferred: Option<Extension<InferredPage>>,
    jar: CookieJar,
    OriginalUri(uri): OriginalUri,
) -> Response {
    match document_id.parse::<u64>() {
        Ok(document_id) => document_page(&state, document_id, &jar, inferred, uri.path()).await,
        Err(_) => not_found(&state, uri.path()),
    }
}

async fn fallback(State(state): State<HttpState>, OriginalUri(uri): OriginalUri) -> Response {
    not_found(&state, uri.path())
}

async fn listing_page(state: &HttpState, scope_id: u64, page: Option<u32>) -> Response {
    let listing = match state
        .content
        .list_documents(scope_id, page.unwrap_or(1), state.per_page)
        .await
    {
        Ok(listing) => listing,
        Err(err) => return AppError::from(err).into_response(),
    };
    Html(render_listing(&listing, &state.content.scopes())).into_response()
}

async fn document_page(
    state: &HttpState,
    document_id: u64,
    jar: &CookieJar,
    inferred: Option<Extension<InferredPage>>,
    path: &str,
) -> Response {
    let mut document = match state.content.document(document_id) {
        Ok(document) => document,
        Err(DomainError::NotFound { .. }) => return not_found(state, path),
        Err(err) => return AppError::from(err).into_response(),
    };
    let scope = match state.content.scope(document.scope_id) {
        Ok(scope) => scope,
        Err(err) => return AppError::from(err).into_response(),
    };

    let credited = !viewed_documents(jar).contains(&document_id);
    if credited && let Some(count) = state.content.increment_views(document_id) {
        document.view_count = count;
    }

    let comments = state.content.comments_for(document_id);
    let from_page = inferred.map(|Extension(InferredPage(page))| page);
    let html = render_document(
        &scope,
        &document,
        &comments,
        &state.content.scopes(),
        from_page,
    );

    let mut response = Html(html).into_response();
    response.extensions_mut().insert(DocumentMeta {
        document_id,
        owner_id: document.owner_id,
        view_count: document.view_count,
    });
    if credited {
        response.extensions_mut().insert(CreditedView(document_id));
    }
    response
}

fn not_found(state: &HttpState, path: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Html(render_not_found(path, &state.content.scopes())),
    )
        .into_response()
}
