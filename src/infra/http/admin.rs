//! Content mutation API. Never cached; every successful write publishes its
//! mutation event and the resulting purges run before the response returns.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::Deserialize;

use crate::{
    application::error::AppError,
    domain::entities::{DocumentMove, DocumentUpdate, NewComment, NewDocument},
};

use super::HttpState;

pub fn build_admin_router() -> Router<HttpState> {
    Router::new()
        .route("/api/scopes", get(list_scopes))
        .route("/api/documents", post(create_document))
        .route(
            "/api/documents/{id}",
            get(show_document)
                .patch(update_document)
                .delete(delete_document),
        )
        .route("/api/documents/{id}/move", post(move_document))
        .route("/api/documents/{id}/comments", post(create_comment))
        .route(
            "/api/comments/{id}",
            patch(update_comment).delete(delete_comment),
        )
        .route("/api/cache/config", get(cache_config))
}

#[derive(Debug, Deserialize)]
struct CommentBody {
    body: String,
}

async fn list_scopes(State(state): State<HttpState>) -> Response {
    Json(state.content.scopes()).into_response()
}

async fn show_document(
    State(state): State<HttpState>,
    Path(id): Path<u64>,
) -> Result<Response, AppError> {
    let document = state.content.document(id)?;
    Ok(Json(document).into_response())
}

async fn create_document(
    State(state): State<HttpState>,
    Json(input): Json<NewDocument>,
) -> Result<Response, AppError> {
    let document = state.content.insert_document(input).await?;
    Ok((StatusCode::CREATED, Json(document)).into_response())
}

async fn update_document(
    State(state): State<HttpState>,
    Path(id): Path<u64>,
    Json(update): Json<DocumentUpdate>,
) -> Result<Response, AppError> {
    let document = state.content.update_document(id, update).await?;
    Ok(Json(document).into_response())
}

async fn move_document(
    State(state): State<HttpState>,
    Path(id): Path<u64>,
    Json(target): Json<DocumentMove>,
) -> Result<Response, AppError> {
    let document = state.content.move_document(id, target).await?;
    Ok(Json(document).into_response())
}

async fn delete_document(
    State(state): State<HttpState>,
    Path(id): Path<u64>,
) -> Result<Response, AppError> {
    state.content.delete_document(id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn create_comment(
    State(state): State<HttpState>,
    Path(document_id): Path<u64>,
    Json(input): Json<NewComment>,
) -> Result<Response, AppError> {
    let comment = state.content.add_comment(document_id, input).await?;
    Ok((StatusCode::CREATED, Json(comment)).into_response())
}

async fn update_comment(
    State(state): State<HttpState>,
    Path(id): Path<u64>,
    Json(input): Json<CommentBody>,
) -> Result<Response, AppError> {
    let comment = state.content.update_comment(id, input.body).await?;
    Ok(Json(comment).into_response())
}

async fn delete_comment(
    State(state): State<HttpState>,
    Path(id): Path<u64>,
) -> Result<Response, AppError> {
    state.content.delete_comment(id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn cache_config(State(state): State<HttpState>) -> Response {
    Json(state.cache_config.as_ref().clone()).into_response()
}
