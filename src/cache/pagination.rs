//! Page-number inference from the referrer.
//!
//! A reader who opens a document from a listing usually came from page N of
//! that listing. Knowing N up front lets the document page render its embedded
//! listing without a lookup to find the document's position.

use url::Url;

use super::admission::RequestContext;

/// Request extension carrying the inferred listing page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InferredPage(pub u32);

/// Infer the listing page a document request came from.
///
/// Only applies to document requests under a named section that carry no
/// explicit page and no action, and only when the referrer is on the same
/// host. A referrer path ending in `/<section>` or `/<section>/<digits>`
/// yields page 1; a referrer query naming the section yields its `page`
/// parameter, or 1.
pub fn infer_page(ctx: &RequestContext) -> Option<u32> {
    let section = ctx.route.section.as_deref()?;
    if ctx.route.document_id.is_none()
        || ctx.route.action.is_some()
        || ctx.route.page.is_some()
        || ctx.query.iter().any(|(name, _)| name == "page")
    {
        return None;
    }

    let referer = Url::parse(ctx.referer.as_deref()?).ok()?;
    if !same_authority(&referer, &ctx.host) {
        return None;
    }

    if path_section(&referer) == Some(section) {
        return Some(1);
    }

    let names_section = referer
        .query_pairs()
        .any(|(name, value)| name == "section" && value == section);
    if names_section {
        let page = referer
            .query_pairs()
            .find(|(name, _)| name == "page")
            .and_then(|(_, value)| value.parse::<u32>().ok())
            .filter(|page| *page > 0)
            .unwrap_or(1);
        return Some(page);
    }
    None
}

fn same_authority(referer: &Url, host: &str) -> bool {
    let Some(referer_host) = referer.host_str() else {
        return false;
    };
    let authority = match referer.port() {
        Some(port) => format!("{referer_host}:{port}"),
        None => referer_host.to_string(),
    };
    authority.eq_ignore_ascii_case(host)
}

/// The section a listing URL points at: the last path segment, or the one
/// before a trailing numeric segment when the URL has no query.
fn path_section(referer: &Url) -> Option<&str> {
    let segments: Vec<&str> = referer.path_segments()?.collect();
    let candidate = match segments.as_slice() {
        [.., name, digits] if referer.query().is_none() && is_numeric(digits) => *name,
        [.., last] => *last,
        [] => return None,
    };
    is_section_name(candidate).then_some(candidate)
}

fn is_numeric(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

fn is_section_name(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}
