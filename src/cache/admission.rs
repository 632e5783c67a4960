//! Admission filter.
//!
//! Decides whether a request may be served from or written to the page cache,
//! classifies its page type, and derives its `CacheKey`. The host hands in a
//! fully populated `RequestContext`; nothing here reads ambient state.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use axum::http::Method;
use serde_json::Value;
use url::Url;

use super::config::CacheConfig;
use super::keys::{
    CacheKey, DeviceClass, ExtraParams, PARAM_ACTION, PARAM_COOKIE, PARAM_REQUEST_URI, PageType,
    Transport, VariantTag,
};

/// Query parameters that only carry routing information and never reach the key.
pub const ROUTING_PARAMS: &[&str] = &[
    "section",
    "module",
    "scope_id",
    "document_id",
    "mobile",
    "action",
];

/// Device class and crawler flag of the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientProfile {
    pub device: DeviceClass,
    pub crawler: bool,
}

/// How the request's target container was resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScopeRef {
    /// No section, module or scope id given: the site's index scope.
    #[default]
    SiteIndex,
    /// Resolved to a concrete scope.
    Id(u64),
    /// A section name was given but does not exist.
    Unknown,
    /// A module was named without a section; not tied to any container.
    Unscoped,
}

/// Routing information resolved by the host before admission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteInfo {
    pub action: Option<String>,
    pub section: Option<String>,
    pub document_id: Option<u64>,
    pub scope: ScopeRef,
    pub page: Option<u32>,
}

/// Everything the cache engine needs to know about one request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub method: Method,
    /// Raw `Host` header, port included.
    pub host: String,
    /// Path and query as requested.
    pub request_uri: String,
    pub secure: bool,
    /// Whether a forwarding proxy reported the request (`X-Forwarded-For`).
    pub forwarded: bool,
    pub authenticated: bool,
    pub cookies: BTreeMap<String, String>,
    pub client: ClientProfile,
    pub locale: String,
    pub route: RouteInfo,
    /// Query parameters in request order.
    pub query: Vec<(String, String)>,
    pub referer: Option<String>,
    pub accept: Option<String>,
    pub if_modified_since: Option<String>,
    /// Documents whose view was already credited in this session.
    pub credited_documents: BTreeSet<u64>,
}

impl RequestContext {
    /// An anonymous plain-HTTP `GET` for `request_uri` on `host`.
    pub fn get(host: impl Into<String>, request_uri: impl Into<String>) -> Self {
        let request_uri = request_uri.into();
        let query = request_uri
            .split_once('?')
            .map(|(_, query)| {
                url::form_urlencoded::parse(query.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();
        Self {
            method: Method::GET,
            host: host.into(),
            request_uri,
            locale: "en".to_string(),
            query,
            ..Default::default()
        }
    }

    /// Host with any `:port` suffix removed, lowercased.
    pub fn host_name(&self) -> String {
        strip_port(&self.host).to_ascii_lowercase()
    }
}

/// Site identity used by the host check and index resolution.
#[derive(Debug, Clone)]
pub struct SiteProfile {
    /// Canonical URL of the site.
    pub default_url: Url,
    /// Extra host names that share the canonical namespace.
    pub aliases: Vec<String>,
    /// Scope serving as the site's landing page.
    pub index_scope_id: u64,
}

impl SiteProfile {
    pub fn new(default_url: Url, index_scope_id: u64) -> Self {
        Self {
            default_url,
            aliases: Vec::new(),
            index_scope_id,
        }
    }

    /// Whether `host` (port already stripped) is this site.
    pub fn is_canonical_host(&self, host: &str) -> bool {
        let canonical = self.default_url.host_str().unwrap_or_default();
        host.eq_ignore_ascii_case(canonical)
            || self
                .aliases
                .iter()
                .any(|alias| host.eq_ignore_ascii_case(alias))
    }
}

/// Why a request was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Disabled,
    Method,
    Authenticated,
    ExcludedCookie,
    Crawler,
    DeviceClass,
    Transport,
    ForeignHost,
    ExcludedAction,
    UnresolvedScope,
    ExcludedScope,
    PageType,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Method => "method",
            Self::Authenticated => "authenticated",
            Self::ExcludedCookie => "excluded_cookie",
            Self::Crawler => "crawler",
            Self::DeviceClass => "device_class",
            Self::Transport => "transport",
            Self::ForeignHost => "foreign_host",
            Self::ExcludedAction => "excluded_action",
            Self::UnresolvedScope => "unresolved_scope",
            Self::ExcludedScope => "excluded_scope",
            Self::PageType => "page_type",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An admitted request: its keyed page type and cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admitted {
    pub page_type: PageType,
    pub key: CacheKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Rejected(RejectReason),
    Admitted(Admitted),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted(_))
    }
}

/// Run the admission checks in order; the first failing check wins.
///
/// `host_checked` is true when the canonical-host redirect guard already
/// established that the request is for this site.
pub fn admit(
    ctx: &RequestContext,
    config: &CacheConfig,
    site: &SiteProfile,
    host_checked: bool,
) -> Admission {
    use Admission::Rejected;

    if !config.enabled {
        return Rejected(RejectReason::Disabled);
    }
    if ctx.method != Method::GET {
        return Rejected(RejectReason::Method);
    }
    if ctx.authenticated {
        return Rejected(RejectReason::Authenticated);
    }
    let excluded_cookie = ctx
        .cookies
        .iter()
        .any(|(name, value)| !value.is_empty() && config.is_excluded_cookie(name));
    if excluded_cookie {
        return Rejected(RejectReason::ExcludedCookie);
    }
    if ctx.client.crawler && !config.cache_crawlers {
        return Rejected(RejectReason::Crawler);
    }
    if !config.device_classes.contains(&ctx.client.device) {
        return Rejected(RejectReason::DeviceClass);
    }
    let transport = Transport::from_secure(ctx.secure);
    if !config.transports.contains(&transport) {
        return Rejected(RejectReason::Transport);
    }
    if !host_checked && !site.is_canonical_host(&ctx.host_name()) {
        return Rejected(RejectReason::ForeignHost);
    }
    if let Some(action) = ctx.route.action.as_deref()
        && config.exclude_actions.contains(action)
    {
        return Rejected(RejectReason::ExcludedAction);
    }

    let scope_id = match ctx.route.scope {
        ScopeRef::SiteIndex => site.index_scope_id,
        ScopeRef::Id(id) => id,
        ScopeRef::Unscoped => 0,
        ScopeRef::Unknown => return Rejected(RejectReason::UnresolvedScope),
    };
    if config.exclude_scopes.contains(&scope_id) {
        return Rejected(RejectReason::ExcludedScope);
    }

    let page_type = classify(&ctx.route, scope_id);
    let not_found_exception = page_type == PageType::Url && config.include_404;
    if !config.page_types.contains(&page_type) && !not_found_exception {
        return Rejected(RejectReason::PageType);
    }

    let variant_tag = VariantTag::new(ctx.client.device, transport, &ctx.locale);
    let params = normalize_params(ctx, config, page_type);
    let document_id = ctx.route.document_id.unwrap_or(0);
    let key = CacheKey::build(page_type, scope_id, document_id, variant_tag, params);

    Admission::Admitted(Admitted {
        page_type: page_type.keyed(),
        key,
    })
}

/// Page type of an already-resolved route.
pub fn classify(route: &RouteInfo, scope_id: u64) -> PageType {
    if route.action.as_deref().is_some_and(|action| !action.is_empty()) {
        PageType::Other
    } else if route.document_id.is_some_and(|id| id != 0) {
        PageType::Document
    } else if scope_id != 0 {
        PageType::Module
    } else {
        PageType::Url
    }
}

/// Build the parameter map folded into the key.
///
/// Routing parameters are dropped, repeated names become arrays, separate
/// cookies go under `_COOKIE`, the action of `other` pages under `_ACTION`,
/// and `url` pages are additionally keyed on their request URI.
pub fn normalize_params(
    ctx: &RequestContext,
    config: &CacheConfig,
    page_type: PageType,
) -> ExtraParams {
    let mut params = ExtraParams::new();
    for (name, value) in &ctx.query {
        if ROUTING_PARAMS.contains(&name.as_str()) {
            continue;
        }
        let value = Value::String(value.clone());
        match params.get_mut(name) {
            None => {
                params.insert(name.clone(), value);
            }
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
        }
    }

    let cookies: serde_json::Map<String, Value> = config
        .separate_cookies
        .iter()
        .filter_map(|name| {
            ctx.cookies
                .get(name)
                .filter(|value| !value.is_empty())
                .map(|value| (name.clone(), Value::String(value.clone())))
        })
        .collect();
    if !cookies.is_empty() {
        params.insert(PARAM_COOKIE.to_string(), Value::Object(cookies));
    }

    match page_type {
        PageType::Other => {
            if let Some(action) = ctx.route.action.as_ref() {
                params.insert(PARAM_ACTION.to_string(), Value::String(action.clone()));
            }
        }
        PageType::Url => {
            params.insert(
                PARAM_REQUEST_URI.to_string(),
                Value::String(ctx.request_uri.clone()),
            );
        }
        PageType::Document | PageType::Module => {}
    }
    params
}

pub(crate) fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> SiteProfile {
        SiteProfile::new(Url::parse("https://example.com/").unwrap(), 1)
    }

    fn document_request() -> RequestContext {
        let mut ctx = RequestContext::get("example.com", "/board/42?cpage=2");
        ctx.route = RouteInfo {
            section: Some("board".into()),
            document_id: Some(42),
            scope: ScopeRef::Id(3),
            ..Default::default()
        };
        ctx
    }

    fn rejected(ctx: &RequestContext, config: &CacheConfig) -> Option<RejectReason> {
        match admit(ctx, config, &site(), false) {
            Admission::Rejected(reason) => Some(reason),
            Admission::Admitted(_) => None,
        }
    }

    fn admitted(ctx: &RequestContext, config: &CacheConfig) -> Admitted {
        match admit(ctx, config, &site(), false) {
            Admission::Admitted(admitted) => admitted,
            Admission::Rejected(reason) => panic!("unexpected rejection: {reason}"),
        }
    }

    #[test]
    fn admits_anonymous_document_get() {
        let admitted = admitted(&document_request(), &CacheConfig::default());
        assert_eq!(admitted.page_type, PageType::Document);
        assert_eq!(admitted.key.scope_id, 3);
        assert_eq!(admitted.key.fine_id, 42);
        assert_eq!(admitted.key.variant_tag.as_str(), "pc_en");
        assert_eq!(
            admitted.key.extra_params.get("cpage"),
            Some(&Value::from("2"))
        );
    }

    #[test]
    fn rejects_in_order() {
        let config = CacheConfig {
            exclude_cookies: vec!["admin_preview".into()],
            ..Default::default()
        };

        let mut ctx = document_request();
        ctx.method = Method::POST;
        ctx.authenticated = true;
        assert_eq!(rejected(&ctx, &config), Some(RejectReason::Method));

        ctx.method = Method::GET;
        ctx.cookies.insert("admin_preview".into(), "1".into());
        assert_eq!(rejected(&ctx, &config), Some(RejectReason::Authenticated));

        ctx.authenticated = false;
        ctx.client.crawler = true;
        assert_eq!(rejected(&ctx, &config), Some(RejectReason::ExcludedCookie));

        ctx.cookies.clear();
        assert_eq!(rejected(&ctx, &config), Some(RejectReason::Crawler));
    }

    #[test]
    fn head_requests_are_not_cacheable() {
        let mut ctx = document_request();
        ctx.method = Method::HEAD;
        assert_eq!(
            rejected(&ctx, &CacheConfig::default()),
            Some(RejectReason::Method)
        );
    }

    #[test]
    fn empty_excluded_cookie_does_not_bypass() {
        let config = CacheConfig {
            exclude_cookies: vec!["admin_preview".into()],
            ..Default::default()
        };
        let mut ctx = document_request();
        ctx.cookies.insert("admin_preview".into(), String::new());
        assert_eq!(rejected(&ctx, &config), None);
    }

    #[test]
    fn excluded_cookie_wins_over_separate_cookie() {
        let config = CacheConfig {
            exclude_cookies: vec!["ab".into()],
            separate_cookies: vec!["ab".into()],
            ..Default::default()
        };
        let mut ctx = document_request();
        ctx.cookies.insert("ab".into(), "b".into());
        assert_eq!(rejected(&ctx, &config), Some(RejectReason::ExcludedCookie));
    }

    #[test]
    fn device_and_transport_gates() {
        let config = CacheConfig {
            device_classes: BTreeSet::from([DeviceClass::Pc]),
            transports: BTreeSet::from([Transport::Plain]),
            ..Default::default()
        };
        let mut ctx = document_request();
        ctx.client.device = DeviceClass::Mobile;
        assert_eq!(rejected(&ctx, &config), Some(RejectReason::DeviceClass));

        ctx.client.device = DeviceClass::Pc;
        ctx.secure = true;
        assert_eq!(rejected(&ctx, &config), Some(RejectReason::Transport));
    }

    #[test]
    fn crawlers_cached_when_enabled() {
        let config = CacheConfig {
            cache_crawlers: true,
            ..Default::default()
        };
        let mut ctx = document_request();
        ctx.client.crawler = true;
        assert_eq!(rejected(&ctx, &config), None);
    }

    #[test]
    fn foreign_host_rejected_unless_already_checked() {
        let mut ctx = document_request();
        ctx.host = "mirror.example.net:8080".into();
        let config = CacheConfig::default();

        assert_eq!(rejected(&ctx, &config), Some(RejectReason::ForeignHost));
        assert!(admit(&ctx, &config, &site(), true).is_admitted());
    }

    #[test]
    fn canonical_host_ignores_port_and_case() {
        let mut ctx = document_request();
        ctx.host = "EXAMPLE.com:443".into();
        assert_eq!(rejected(&ctx, &CacheConfig::default()), None);

        let mut site = site();
        site.aliases.push("www.example.com".into());
        ctx.host = "www.example.com".into();
        assert!(admit(&ctx, &CacheConfig::default(), &site, false).is_admitted());
    }

    #[test]
    fn excluded_action_and_scope() {
        let config = CacheConfig {
            exclude_actions: BTreeSet::from(["search".to_string()]),
            exclude_scopes: BTreeSet::from([3]),
            page_types: BTreeSet::from([PageType::Other, PageType::Document]),
            ..Default::default()
        };
        let mut ctx = document_request();
        assert_eq!(rejected(&ctx, &config), Some(RejectReason::ExcludedScope));

        ctx.route.action = Some("search".into());
        assert_eq!(rejected(&ctx, &config), Some(RejectReason::ExcludedAction));
    }

    #[test]
    fn unknown_section_is_not_cacheable() {
        let mut ctx = document_request();
        ctx.route.scope = ScopeRef::Unknown;
        assert_eq!(
            rejected(&ctx, &CacheConfig::default()),
            Some(RejectReason::UnresolvedScope)
        );
    }

    #[test]
    fn classification_follows_route_shape() {
        let mut route = RouteInfo::default();
        assert_eq!(classify(&route, 0), PageType::Url);
        assert_eq!(classify(&route, 5), PageType::Module);

        route.document_id = Some(9);
        assert_eq!(classify(&route, 5), PageType::Document);

        route.action = Some("rss".into());
        assert_eq!(classify(&route, 5), PageType::Other);
    }

    #[test]
    fn site_index_resolves_to_module_listing() {
        let ctx = RequestContext::get("example.com", "/");
        let admitted = admitted(&ctx, &CacheConfig::default());
        assert_eq!(admitted.page_type, PageType::Module);
        assert_eq!((admitted.key.scope_id, admitted.key.fine_id), (1, 0));
    }

    #[test]
    fn url_pages_need_opt_in_or_include_404() {
        let mut ctx = RequestContext::get("example.com", "/no/such/page?x=1");
        ctx.route.scope = ScopeRef::Unscoped;
        assert_eq!(
            rejected(&ctx, &CacheConfig::default()),
            Some(RejectReason::PageType)
        );

        let config = CacheConfig {
            include_404: true,
            ..Default::default()
        };
        let admitted = admitted(&ctx, &config);
        assert_eq!(admitted.page_type, PageType::Other);
        assert_eq!((admitted.key.scope_id, admitted.key.fine_id), (0, 0));
        assert_eq!(
            admitted.key.extra_params.get(PARAM_REQUEST_URI),
            Some(&Value::from("/no/such/page?x=1"))
        );
    }

    #[test]
    fn routing_params_are_stripped_and_order_is_irrelevant() {
        let config = CacheConfig::default();
        let mut first = document_request();
        first.query = vec![
            ("document_id".into(), "42".into()),
            ("b".into(), "2".into()),
            ("a".into(), "1".into()),
            ("section".into(), "board".into()),
        ];
        let mut second = document_request();
        second.query = vec![("a".into(), "1".into()), ("b".into(), "2".into())];

        let first = admitted(&first, &config);
        let second = admitted(&second, &config);
        assert!(!first.key.extra_params.contains_key("document_id"));
        assert!(!first.key.extra_params.contains_key("section"));
        assert_eq!(first.key.fingerprint(), second.key.fingerprint());
    }

    #[test]
    fn one_extra_param_changes_the_key() {
        let config = CacheConfig::default();
        let base = document_request();
        let mut other = document_request();
        other.query.push(("utm".into(), "x".into()));

        assert_ne!(
            admitted(&base, &config).key.fingerprint(),
            admitted(&other, &config).key.fingerprint()
        );
    }

    #[test]
    fn repeated_params_become_arrays() {
        let mut ctx = document_request();
        ctx.query = vec![
            ("tag".into(), "a".into()),
            ("tag".into(), "b".into()),
            ("tag".into(), "c".into()),
        ];
        let params = normalize_params(&ctx, &CacheConfig::default(), PageType::Document);
        assert_eq!(
            params.get("tag"),
            Some(&Value::from(vec!["a", "b", "c"]))
        );
    }

    #[test]
    fn separate_cookies_split_the_key() {
        let config = CacheConfig {
            separate_cookies: vec!["theme".into()],
            ..Default::default()
        };
        let mut dark = document_request();
        dark.cookies.insert("theme".into(), "dark".into());
        dark.cookies.insert("unrelated".into(), "x".into());
        let mut light = document_request();
        light.cookies.insert("theme".into(), "light".into());

        let dark = admitted(&dark, &config);
        let light = admitted(&light, &config);
        assert_ne!(dark.key.fingerprint(), light.key.fingerprint());
        let cookie_params = dark.key.extra_params.get(PARAM_COOKIE).unwrap();
        assert_eq!(cookie_params.get("theme"), Some(&Value::from("dark")));
        assert!(cookie_params.get("unrelated").is_none());
    }

    #[test]
    fn empty_separate_cookie_shares_the_cookieless_key() {
        let config = CacheConfig {
            separate_cookies: vec!["theme".into()],
            ..Default::default()
        };
        let plain = document_request();
        let mut blank = document_request();
        blank.cookies.insert("theme".into(), String::new());

        let plain = admitted(&plain, &config);
        let blank = admitted(&blank, &config);
        assert_eq!(plain.key.fingerprint(), blank.key.fingerprint());
        assert!(blank.key.extra_params.get(PARAM_COOKIE).is_none());
    }

    #[test]
    fn action_pages_key_on_action() {
        let config = CacheConfig {
            page_types: BTreeSet::from([PageType::Other]),
            ..Default::default()
        };
        let mut rss = RequestContext::get("example.com", "/?action=rss");
        rss.route.action = Some("rss".into());
        let mut atom = RequestContext::get("example.com", "/?action=atom");
        atom.route.action = Some("atom".into());

        let rss = admitted(&rss, &config);
        let atom = admitted(&atom, &config);
        assert_eq!(rss.page_type, PageType::Other);
        assert_eq!((rss.key.scope_id, rss.key.fine_id), (0, 0));
        assert_ne!(rss.key.fingerprint(), atom.key.fingerprint());
    }

    #[test]
    fn variant_tag_tracks_device_transport_and_locale() {
        let mut ctx = document_request();
        ctx.client.device = DeviceClass::Mobile;
        ctx.secure = true;
        ctx.locale = "ko".into();
        assert_eq!(
            admitted(&ctx, &CacheConfig::default()).key.variant_tag.as_str(),
            "mo_secure_ko"
        );
    }

    #[test]
    fn disabled_cache_admits_nothing() {
        let config = CacheConfig {
            enabled: false,
            ..Default::default()
        };
        assert_eq!(
            rejected(&document_request(), &config),
            Some(RejectReason::Disabled)
        );
    }

    #[test]
    fn strip_port_handles_bare_and_ipv6_hosts() {
        assert_eq!(strip_port("example.com:8080"), "example.com");
        assert_eq!(strip_port("example.com"), "example.com");
        assert_eq!(strip_port("[::1]"), "[::1]");
        assert_eq!(strip_port("[::1]:3000"), "[::1]");
    }
}
