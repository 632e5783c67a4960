//! Response header emission for cacheable pages and redirects.

use std::time::{Duration, SystemTime};

use axum::http::header::{CACHE_CONTROL, EXPIRES, PRAGMA};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

use super::config::{CacheConfig, MAX_DURATION_SECONDS};
use super::expiry::jitter;
use super::keys::PageType;

/// Diagnostic header present on every response the cache evaluated.
pub const DIAGNOSTIC_HEADER: HeaderName = HeaderName::from_static("x-supercache");

const NO_CACHE: &str = "no-store, no-cache, must-revalidate, post-check=0, pre-check=0";
const EXPIRES_IN_PAST: &str = "Sat, 01 Jan 2000 00:00:00 GMT";

/// Which expiry headers a response gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderPolicy {
    /// Emit `Cache-Control`/`Expires`.
    pub cache_control: bool,
    pub stampede_percent: u8,
}

impl HeaderPolicy {
    /// Resolve the policy for one request. Forwarded requests only get
    /// `Cache-Control` when proxies are allowed to cache.
    pub fn resolve(config: &CacheConfig, forwarded: bool) -> Self {
        Self {
            cache_control: config.use_cache_headers
                && (!forwarded || config.cache_headers_for_proxies),
            stampede_percent: config.stampede_percent_clamped(),
        }
    }
}

/// Write the diagnostic header and, if the policy allows, jittered
/// `Cache-Control`/`Expires` for an entry that expires in `expires` seconds.
pub fn apply_expiry(
    headers: &mut HeaderMap,
    page_type: PageType,
    expires: u64,
    policy: HeaderPolicy,
    now: SystemTime,
) {
    insert(
        headers,
        DIAGNOSTIC_HEADER,
        format!("type={}; expires={expires}", page_type.keyed()),
    );

    if !policy.cache_control {
        return;
    }
    let max_age = jitter(expires, policy.stampede_percent).min(MAX_DURATION_SECONDS);
    insert(headers, CACHE_CONTROL, format!("max-age={max_age}"));
    if let Some(at) = now.checked_add(Duration::from_secs(max_age)) {
        insert(headers, EXPIRES, httpdate::fmt_http_date(at));
    }
    headers.remove(PRAGMA);
}

/// Force a response to be uncacheable. Used for redirects.
pub fn apply_no_cache(headers: &mut HeaderMap) {
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
    headers.insert(EXPIRES, HeaderValue::from_static(EXPIRES_IN_PAST));
    headers.remove(PRAGMA);
}

/// Status line for a stored status code. Zero and out-of-range codes serve as 200.
pub fn status_from_code(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::OK)
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: String) {
    if let Ok(value) = HeaderValue::try_from(value) {
        headers.insert(name, value);
    }
}
