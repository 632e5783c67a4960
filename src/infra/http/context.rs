//! Builds the cache engine's [`RequestContext`] from an incoming request.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use axum::{
    body::Body,
    http::{
        HeaderMap, Request,
        header::{ACCEPT, HOST, IF_MODIFIED_SINCE, REFERER},
    },
};
use axum_extra::extract::cookie::CookieJar;

use crate::application::content::ScopeDirectory;
use crate::cache::{DeviceClass, RequestContext, RequestContextSource, RouteInfo, ScopeRef};
use crate::infra::client::UserAgentClassifier;

/// Cookie listing documents whose view was already counted for this reader.
pub const VIEWED_COOKIE: &str = "sc_viewed";
/// Cookie selecting the reader's language.
pub const LOCALE_COOKIE: &str = "lang_type";

const FORWARDED_FOR: &str = "x-forwarded-for";
const FORWARDED_PROTO: &str = "x-forwarded-proto";

pub struct HostContextSource {
    directory: Arc<dyn ScopeDirectory>,
    classifier: UserAgentClassifier,
    auth_cookie: String,
    default_locale: String,
    default_host: String,
}

impl HostContextSource {
    pub fn new(
        directory: Arc<dyn ScopeDirectory>,
        auth_cookie: impl Into<String>,
        default_locale: impl Into<String>,
        default_host: impl Into<String>,
    ) -> Self {
        Self {
            directory,
            classifier: UserAgentClassifier,
            auth_cookie: auth_cookie.into(),
            default_locale: default_locale.into(),
            default_host: default_host.into(),
        }
    }

    /// Resolve path segments and routing query parameters into a route.
    pub fn resolve_route(&self, path: &str, query: &[(String, String)]) -> RouteInfo {
        let param = |name: &str| {
            query
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
                .filter(|value| !value.is_empty())
        };
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let (mut section, mut document_id, path_known) = match segments.as_slice() {
            [] => (None, None, true),
            [section] => (Some(section.to_string()), None, true),
            [section, id] => match id.parse::<u64>() {
                Ok(id) => (Some(section.to_string()), Some(id), true),
                Err(_) => (None, None, false),
            },
            _ => (None, None, false),
        };
        if section.is_none() {
            section = param("section").map(str::to_string);
        }
        if document_id.is_none() {
            document_id = param("document_id").and_then(|value| value.parse().ok());
        }

        let scope = if !path_known {
            ScopeRef::Unscoped
        } else if let Some(scope_id) = param("scope_id").and_then(|value| value.parse().ok()) {
            ScopeRef::Id(scope_id)
        } else if let Some(owner) = document_id.and_then(|id| self.directory.scope_of_document(id))
        {
            ScopeRef::Id(owner)
        } else if let Some(name) = section.as_deref() {
            self.directory
                .scope_by_name(name)
                .map_or(ScopeRef::Unknown, ScopeRef::Id)
        } else if param("module").is_some() {
            ScopeRef::Unscoped
        } else {
            ScopeRef::SiteIndex
        };

        RouteInfo {
            action: param("action").map(str::to_string),
            section,
            document_id,
            scope,
            page: param("page").and_then(|value| value.parse().ok()),
        }
    }
}

impl RequestContextSource for HostContextSource {
    fn context(&self, request: &Request<Body>) -> RequestContext {
        let headers = request.headers();
        let uri = request.uri();
        let request_uri = uri
            .path_and_query()
            .map_or_else(|| uri.path().to_string(), |pq| pq.as_str().to_string());
        let host = header_str(headers, HOST)
            .or_else(|| uri.authority().map(|a| a.as_str()))
            .unwrap_or(self.default_host.as_str())
            .to_string();

        let mut ctx = RequestContext::get(host, request_uri);
        ctx.method = request.method().clone();

        let jar = CookieJar::from_headers(headers);
        ctx.cookies = jar
            .iter()
            .map(|cookie| (cookie.name().to_string(), cookie.value().to_string()))
            .collect::<BTreeMap<_, _>>();
        ctx.authenticated = ctx
            .cookies
            .get(&self.auth_cookie)
            .is_some_and(|value| !value.is_empty());
        ctx.locale = ctx
            .cookies
            .get(LOCALE_COOKIE)
            .filter(|value| is_locale_tag(value))
            .cloned()
            .unwrap_or_else(|| self.default_locale.clone());
        ctx.credited_documents = viewed_documents(&jar);

        ctx.secure = uri.scheme_str() == Some("https")
            || header_str(headers, FORWARDED_PROTO)
                .is_some_and(|proto| proto.eq_ignore_ascii_case("https"));
        ctx.forwarded =
            header_str(headers, FORWARDED_FOR).is_some_and(|value| !value.trim().is_empty());

        ctx.client = self.classifier.classify(headers);
        match ctx.query.iter().find(|(name, _)| name == "mobile") {
            Some((_, value)) if value == "1" || value == "true" => {
                ctx.client.device = DeviceClass::Mobile;
            }
            Some((_, value)) if value == "0" || value == "false" => {
                ctx.client.device = DeviceClass::Pc;
            }
            _ => {}
        }

        ctx.route = self.resolve_route(uri.path(), &ctx.query);
        ctx.referer = header_str(headers, REFERER).map(str::to_string);
        ctx.accept = header_str(headers, ACCEPT).map(str::to_string);
        ctx.if_modified_since = header_str(headers, IF_MODIFIED_SINCE).map(str::to_string);
        ctx
    }
}

/// Document ids recorded in the viewed cookie.
pub fn viewed_documents(jar: &CookieJar) -> BTreeSet<u64> {
    jar.get(VIEWED_COOKIE)
        .map(|cookie| {
            cookie
                .value()
                .split(['.', ','])
                .filter_map(|id| id.trim().parse().ok())
                .collect()
        })
        .unwrap_or_default()
}

fn header_str(headers: &HeaderMap, name: impl axum::http::header::AsHeaderName) -> Option<&str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn is_locale_tag(value: &str) -> bool {
    (2..=8).contains(&value.len())
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-')
}
