use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderValue, Request, header::SET_COOKIE},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::{error, warn};
use uuid::Uuid;

use crate::{application::error::ErrorReport, cache::CreditedView};

use super::context::{VIEWED_COOKIE, viewed_documents};

/// Upper bound on document ids kept in the viewed cookie.
const VIEWED_COOKIE_LIMIT: usize = 50;

#[derive(Clone)]
pub struct RequestId(pub String);

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let request_id = RequestId(Uuid::new_v4().to_string());
    request.extensions_mut().insert(request_id.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(request_id);
    response
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();

    if status.is_client_error() || status.is_server_error() {
        let elapsed_ms = start.elapsed().as_millis();
        let report = response.extensions_mut().remove::<ErrorReport>();
        let (source, messages) = match report {
            Some(report) => (report.source, report.messages),
            None => ("unknown", Vec::new()),
        };
        let detail = messages
            .first()
            .cloned()
            .unwrap_or_else(|| "no diagnostic available".to_string());

        if status.is_server_error() {
            error!(
                target = "supercache::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                "request failed",
            );
        } else {
            warn!(
                target = "supercache::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                request_id = request_id,
                "client request error",
            );
        }
    }

    response
}

/// Record credited document views in the reader's viewed cookie so the same
/// reader is not counted twice, whether the page was rendered or served from
/// cache.
pub async fn remember_viewed(request: Request<Body>, next: Next) -> Response {
    let jar = CookieJar::from_headers(request.headers());
    let mut response = next.run(request).await;

    let Some(CreditedView(document_id)) = response.extensions_mut().remove::<CreditedView>()
    else {
        return response;
    };

    let mut viewed: Vec<u64> = viewed_documents(&jar).into_iter().collect();
    if !viewed.contains(&document_id) {
        viewed.push(document_id);
    }
    let keep_from = viewed.len().saturating_sub(VIEWED_COOKIE_LIMIT);
    let value = viewed[keep_from..]
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(".");

    let cookie = Cookie::build((VIEWED_COOKIE, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();
    match HeaderValue::from_str(&cookie.to_string()) {
        Ok(value) => {
            response.headers_mut().append(SET_COOKIE, value);
        }
        Err(err) => warn!(error = %err, "Viewed cookie is not a valid header value"),
    }
    response
}
