//! Early-termination checks that run before admission.
//!
//! These answer a request outright (a canonical-host redirect or a stub body
//! for mis-targeted asset fetches) without consulting the page store.

use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use url::Url;

use super::admission::{RequestContext, SiteProfile, strip_port};
use super::config::CacheConfig;
use super::headers::apply_no_cache;

const CSS_STUB: &str = "/* block_css_request */";
const IMG_STUB: &str = "/* block_img_request */";

/// A response produced without running the page pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EarlyResponse {
    /// `301` to the canonical URL.
    Redirect { location: String },
    /// Stub answer for a same-site asset request that landed on a page route.
    Blocked { body: &'static str },
}

impl IntoResponse for EarlyResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Redirect { location } => {
                let mut response = (
                    StatusCode::MOVED_PERMANENTLY,
                    [(header::LOCATION, location)],
                )
                    .into_response();
                apply_no_cache(response.headers_mut());
                response
            }
            Self::Blocked { body } => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                body,
            )
                .into_response(),
        }
    }
}

/// Result of the guard pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuardOutcome {
    pub early: Option<EarlyResponse>,
    /// The request's host was verified against the canonical host.
    pub host_checked: bool,
}

pub fn inspect(ctx: &RequestContext, config: &CacheConfig, site: &SiteProfile) -> GuardOutcome {
    if ctx.method != Method::GET {
        return GuardOutcome::default();
    }

    let mut outcome = GuardOutcome::default();
    if config.redirect_to_default_url {
        if site.is_canonical_host(&ctx.host_name()) {
            outcome.host_checked = true;
        } else {
            outcome.early = Some(EarlyResponse::Redirect {
                location: canonical_location(&site.default_url, &ctx.request_uri),
            });
            return outcome;
        }
    }

    outcome.early = blocked_asset(ctx, config);
    outcome
}

fn canonical_location(default_url: &Url, request_uri: &str) -> String {
    let host = default_url.host_str().unwrap_or_default();
    let port = default_url
        .port()
        .map(|port| format!(":{port}"))
        .unwrap_or_default();
    format!("{}://{host}{port}{request_uri}", default_url.scheme())
}

fn blocked_asset(ctx: &RequestContext, config: &CacheConfig) -> Option<EarlyResponse> {
    if !config.block_css_request && !config.block_img_request {
        return None;
    }
    let referer_host = ctx
        .referer
        .as_deref()
        .and_then(|referer| Url::parse(referer).ok())
        .and_then(|referer| referer.host_str().map(str::to_ascii_lowercase))?;
    if referer_host != strip_port(&ctx.host).to_ascii_lowercase() {
        return None;
    }

    let accept = ctx.accept.as_deref().unwrap_or_default();
    if config.block_css_request && accept.starts_with("text/css") {
        return Some(EarlyResponse::Blocked { body: CSS_STUB });
    }
    if config.block_img_request
        && !accept.is_empty()
        && (accept.starts_with("image/") || !accept.contains("ml"))
    {
        return Some(EarlyResponse::Blocked { body: IMG_STUB });
    }
    None
}
