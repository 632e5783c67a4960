//! Content records held by the content service.
//!
//! Scopes are the containers (sections) listings are rendered for; documents
//! live in exactly one scope and optionally one category within it.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::error::DomainError;

const MAX_TITLE_CHARS: usize = 200;
const MAX_AUTHOR_CHARS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeRecord {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentRecord {
    pub id: u64,
    pub scope_id: u64,
    pub category_id: u64,
    pub owner_id: u64,
    pub title: String,
    pub body: String,
    pub view_count: u64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentRecord {
    pub id: u64,
    pub document_id: u64,
    pub author: String,
    pub body: String,
    pub created_at: OffsetDateTime,
}

/// Input for a new document.
#[derive(Debug, Clone, Deserialize)]
pub struct NewDocument {
    pub scope_id: u64,
    #[serde(default)]
    pub category_id: u64,
    #[serde(default)]
    pub owner_id: u64,
    pub title: String,
    pub body: String,
}

impl NewDocument {
    pub fn validate(&self) -> Result<(), DomainError> {
        validate_title(&self.title)?;
        validate_body(&self.body)
    }
}

/// Partial update of a document's content and category. Scope changes go
/// through a move.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentUpdate {
    pub title: Option<String>,
    pub body: Option<String>,
    pub category_id: Option<u64>,
}

impl DocumentUpdate {
    pub fn validate(&self) -> Result<(), DomainError> {
        if let Some(title) = self.title.as_deref() {
            validate_title(title)?;
        }
        if let Some(body) = self.body.as_deref() {
            validate_body(body)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentMove {
    pub scope_id: u64,
    #[serde(default)]
    pub category_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewComment {
    pub author: String,
    pub body: String,
}

impl NewComment {
    pub fn validate(&self) -> Result<(), DomainError> {
        let author = self.author.trim();
        if author.is_empty() {
            return Err(DomainError::validation("comment author must not be empty"));
        }
        if author.chars().count() > MAX_AUTHOR_CHARS {
            return Err(DomainError::validation(format!(
                "comment author must be at most {MAX_AUTHOR_CHARS} characters"
            )));
        }
        validate_body(&self.body)
    }
}

fn validate_title(title: &str) -> Result<(), DomainError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(DomainError::validation("title must not be empty"));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(DomainError::validation(format!(
            "title must be at most {MAX_TITLE_CHARS} characters"
        )));
    }
    Ok(())
}

fn validate_body(body: &str) -> Result<(), DomainError> {
    if body.trim().is_empty() {
        return Err(DomainError::validation("body must not be empty"));
    }
    Ok(())
}
