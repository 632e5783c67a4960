//! Minimal HTML rendering for listings and documents.

use std::fmt::Write as _;

use time::format_description::well_known::Rfc3339;

use crate::domain::entities::{CommentRecord, DocumentRecord, ScopeRecord};

use super::content::Listing;

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn layout(title: &str, sections: &[ScopeRecord], main: &str) -> String {
    let mut nav = String::new();
    for section in sections {
        let name = escape_html(&section.name);
        let _ = write!(nav, r#"<a href="/{name}">{name}</a> "#);
    }
    format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>{}</title></head>\
         <body><nav>{}</nav><main>{}</main></body></html>\n",
        escape_html(title),
        nav.trim_end(),
        main
    )
}

pub fn render_listing(listing: &Listing, sections: &[ScopeRecord]) -> String {
    let scope = escape_html(&listing.scope.name);
    let mut main = format!("<h1>{scope}</h1><ul>");
    for doc in &listing.documents {
        let _ = write!(
            main,
            r#"<li><a href="/{scope}/{}">{}</a> <small>{} views</small></li>"#,
            doc.id,
            escape_html(&doc.title),
            doc.view_count
        );
    }
    main.push_str("</ul>");

    let pages = listing.page_count();
    if pages > 1 {
        main.push_str("<p class=\"pager\">");
        for page in 1..=pages {
            if page == u64::from(listing.page) {
                let _ = write!(main, "<b>{page}</b> ");
            } else {
                let _ = write!(main, r#"<a href="/{scope}?page={page}">{page}</a> "#);
            }
        }
        main.push_str("</p>");
    }
    layout(&listing.scope.name, sections, &main)
}

/// Render a document page. `from_page` is the listing page the reader came
/// from, when known, and turns the back link into a link to that page.
pub fn render_document(
    scope: &ScopeRecord,
    document: &DocumentRecord,
    comments: &[CommentRecord],
    sections: &[ScopeRecord],
    from_page: Option<u32>,
) -> String {
    let scope_name = escape_html(&scope.name);
    let back = match from_page {
        Some(page) if page > 1 => format!("/{scope_name}?page={page}"),
        _ => format!("/{scope_name}"),
    };
    let updated = document
        .updated_at
        .format(&Rfc3339)
        .unwrap_or_else(|_| document.updated_at.unix_timestamp().to_string());

    let mut main = format!(
        r#"<article><h1>{}</h1><p class="meta">updated {} &middot; {} views</p><div>{}</div></article>"#,
        escape_html(&document.title),
        updated,
        document.view_count,
        escape_html(&document.body)
    );
    if !comments.is_empty() {
        main.push_str("<section class=\"comments\"><ul>");
        for comment in comments {
            let _ = write!(
                main,
                "<li><b>{}</b> {}</li>",
                escape_html(&comment.author),
                escape_html(&comment.body)
            );
        }
        main.push_str("</ul></section>");
    }
    let _ = write!(main, r#"<p><a href="{back}">back to {scope_name}</a></p>"#);
    layout(&document.title, sections, &main)
}

pub fn render_not_found(path: &str, sections: &[ScopeRecord]) -> String {
    let main = format!(
        "<h1>Not found</h1><p>Nothing lives at <code>{}</code>.</p>",
        escape_html(path)
    );
    layout("Not found", sections, &main)
}
