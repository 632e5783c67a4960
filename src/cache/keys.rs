//! Cache key definitions.
//!
//! A `CacheKey` identifies one cached render: the scope and document it
//! belongs to, the response variant, and the normalized request parameters.
//! `ScopeSelector` addresses the set of keys an invalidation purges.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

/// Normalized request parameters folded into a cache key.
pub type ExtraParams = BTreeMap<String, Value>;

/// Reserved parameter carrying the separate-cookie values.
pub const PARAM_COOKIE: &str = "_COOKIE";
/// Reserved parameter carrying the literal request URI for `url` pages.
pub const PARAM_REQUEST_URI: &str = "_REQUEST_URI";
/// Reserved parameter carrying the action of a non-document, non-listing page.
pub const PARAM_ACTION: &str = "_ACTION";

/// Page classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    /// A single document.
    Document,
    /// A scope's listing page.
    Module,
    /// Any other page addressed by action and parameters.
    Other,
    /// A page addressed only by its request URI.
    Url,
}

impl PageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Module => "module",
            Self::Other => "other",
            Self::Url => "url",
        }
    }

    /// The page type used for keying and header emission. `Url` pages are
    /// stored as `Other`.
    pub fn keyed(self) -> Self {
        match self {
            Self::Url => Self::Other,
            other => other,
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device class of the requesting client.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    #[default]
    Pc,
    Mobile,
}

impl DeviceClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pc => "pc",
            Self::Mobile => "mobile",
        }
    }

    fn tag_prefix(self) -> &'static str {
        match self {
            Self::Pc => "pc",
            Self::Mobile => "mo",
        }
    }
}

/// Transport the request arrived on.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    #[default]
    Plain,
    Secure,
}

impl Transport {
    pub fn from_secure(secure: bool) -> Self {
        if secure { Self::Secure } else { Self::Plain }
    }
}

/// Response variant: device class, transport and locale.
///
/// Rendered as `pc_en`, `mo_secure_ko`, ...
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariantTag(String);

impl VariantTag {
    pub fn new(device: DeviceClass, transport: Transport, locale: &str) -> Self {
        let secure = match transport {
            Transport::Secure => "_secure",
            Transport::Plain => "",
        };
        Self(format!("{}{}_{}", device.tag_prefix(), secure, locale))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VariantTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one cached render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub scope_id: u64,
    pub fine_id: u64,
    pub variant_tag: VariantTag,
    pub extra_params: ExtraParams,
}

impl CacheKey {
    /// Build the key for a page of `page_type`.
    ///
    /// Documents key on `(scope, document)`, listings on `(scope, 0)`, and
    /// everything else on `(0, 0)` so that only the parameters tell them apart.
    pub fn build(
        page_type: PageType,
        scope_id: u64,
        document_id: u64,
        variant_tag: VariantTag,
        extra_params: ExtraParams,
    ) -> Self {
        let (scope_id, fine_id) = match page_type {
            PageType::Document => (scope_id, document_id),
            PageType::Module => (scope_id, 0),
            PageType::Other | PageType::Url => (0, 0),
        };
        Self {
            scope_id,
            fine_id,
            variant_tag,
            extra_params,
        }
    }

    /// Stable hex SHA-256 over the key's canonical JSON form.
    ///
    /// `ExtraParams` is ordered, so two keys built from the same parameters in
    /// any order produce the same fingerprint.
    pub fn fingerprint(&self) -> String {
        let canonical = json!([
            self.scope_id,
            self.fine_id,
            self.variant_tag.as_str(),
            &self.extra_params,
        ]);
        hex::encode(Sha256::digest(canonical.to_string().as_bytes()))
    }

    /// Whether `selector` covers this key.
    pub fn is_selected_by(&self, selector: ScopeSelector) -> bool {
        selector.matches(self.scope_id, self.fine_id)
    }
}

/// Addresses a group of cache entries for purging.
///
/// `fine_id != 0` selects every render of one document regardless of scope.
/// `fine_id == 0` selects the scope-level (listing) entries of `scope_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ScopeSelector {
    pub scope_id: u64,
    pub fine_id: u64,
}

impl ScopeSelector {
    pub fn document(document_id: u64) -> Self {
        Self {
            scope_id: 0,
            fine_id: document_id,
        }
    }

    pub fn scope(scope_id: u64) -> Self {
        Self {
            scope_id,
            fine_id: 0,
        }
    }

    pub fn matches(&self, scope_id: u64, fine_id: u64) -> bool {
        if self.fine_id != 0 {
            fine_id == self.fine_id
        } else {
            fine_id == 0 && scope_id == self.scope_id
        }
    }
}

impl fmt::Display for ScopeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fine_id != 0 {
            write!(f, "document:{}", self.fine_id)
        } else {
            write!(f, "scope:{}", self.scope_id)
        }
    }
}
