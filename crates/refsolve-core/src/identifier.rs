//! Identifier canonicalization.
//!
//! Free-text citations reference the same work through DOIs, preprint ids
//! (with or without a version suffix), resolver URLs, and mirror hosts.
//! [`normalize`] folds all of those into one comparable `(kind, canonical)`
//! form so the resolver can test identity with plain equality.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    Doi,
    PreprintId,
    Url,
    None,
}

/// A canonicalized identifier. Two identifiers with equal `(kind, canonical)`
/// denote the same bibliographic target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    pub kind: IdentifierKind,
    pub canonical: String,
}

impl Identifier {
    pub fn doi(doi: impl AsRef<str>) -> Self {
        Self {
            kind: IdentifierKind::Doi,
            canonical: format!("doi:{}", doi.as_ref().to_lowercase()),
        }
    }

    pub fn preprint(id: impl AsRef<str>) -> Self {
        Self {
            kind: IdentifierKind::PreprintId,
            canonical: format!("preprint:{}", strip_version(&id.as_ref().to_lowercase())),
        }
    }

    /// Priority for the exact-match tier: DOIs are the most stable
    /// identifier, URLs the most volatile.
    pub fn priority(&self) -> u8 {
        match self.kind {
            IdentifierKind::Doi => 0,
            IdentifierKind::PreprintId => 1,
            IdentifierKind::Url => 2,
            IdentifierKind::None => 3,
        }
    }

    /// The bare value without the `doi:`/`preprint:` scheme tag.
    pub fn bare(&self) -> &str {
        self.canonical
            .split_once(':')
            .map(|(scheme, rest)| {
                if scheme == "doi" || scheme == "preprint" {
                    rest
                } else {
                    self.canonical.as_str()
                }
            })
            .unwrap_or(&self.canonical)
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical)
    }
}

static DOI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"10\.\d{1,9}(?:\.\d+)*/[^\s"'<>]+"#).unwrap());

static PREPRINT_NEW_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4}\.\d{4,5})(?:v\d+)?$").unwrap());

static PREPRINT_OLD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-z-]+(?:\.[a-z]{2})?/\d{7})(?:v\d+)?$").unwrap());

static VERSION_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"v\d+$").unwrap());

static HOSTISH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9.-]*\.[a-z]{2,}(?:/|$)").unwrap());

static INLINE_PREPRINT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:arxiv:\s*|arxiv\.org/(?:abs|pdf)/)([a-z.-]*/?\d{4}[.\d]*(?:v\d+)?)").unwrap()
});

/// Canonicalize a raw identifier-like string. Never fails: unrecognized input
/// yields `IdentifierKind::None` with the trimmed-and-lowercased original.
///
/// Rules, applied in order: URL normalization (https, no `www.`, no trailing
/// slash), DOI extraction, preprint-id shape with version stripping, then
/// URL. The canonical URL form drops the scheme so resolver-host mirrors
/// compare equal.
pub fn normalize(raw: &str) -> Identifier {
    let trimmed = raw.trim().to_lowercase();
    if trimmed.is_empty() {
        return Identifier {
            kind: IdentifierKind::None,
            canonical: trimmed,
        };
    }

    let normalized = normalize_url(&trimmed);

    if let Some(doi) = extract_doi(&normalized) {
        return Identifier {
            kind: IdentifierKind::Doi,
            canonical: format!("doi:{doi}"),
        };
    }

    if let Some(id) = preprint_id_of(&normalized) {
        return Identifier {
            kind: IdentifierKind::PreprintId,
            canonical: format!("preprint:{id}"),
        };
    }

    if trimmed.starts_with("http://") || trimmed.starts_with("https://")
        || HOSTISH_RE.is_match(&normalized)
    {
        return Identifier {
            kind: IdentifierKind::Url,
            canonical: normalized,
        };
    }

    Identifier {
        kind: IdentifierKind::None,
        canonical: trimmed,
    }
}

/// Lowercase, fold `http` into `https`, drop the scheme and a `www.` host
/// prefix, and strip trailing slashes. Shared by [`normalize`] and the
/// normalized-URL matching tier.
pub fn normalize_url(raw: &str) -> String {
    let mut s = raw.trim().to_lowercase();
    for scheme in ["https://", "http://"] {
        if let Some(rest) = s.strip_prefix(scheme) {
            s = rest.to_string();
            break;
        }
    }
    if let Some(rest) = s.strip_prefix("www.") {
        s = rest.to_string();
    }
    while s.ends_with('/') {
        s.pop();
    }
    s
}

/// Find a DOI inside free text (`10.<registrant>/<suffix>`), with common
/// resolver-host and `doi:` scheme prefixes tolerated. Trailing sentence
/// punctuation is not part of the DOI.
pub fn extract_doi(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let m = DOI_RE.find(&lower)?;
    let doi = m
        .as_str()
        .trim_end_matches(['.', ',', ';', ':', ')', ']', '}', '"', '\'']);
    Some(doi.to_string())
}

/// Find a preprint id inside free text, e.g. `arXiv:2104.00000v2` or an
/// `arxiv.org/abs/` URL. The version suffix is preserved here; callers
/// normalize through [`normalize`] to strip it.
pub fn extract_preprint_id(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let caps = INLINE_PREPRINT_RE.captures(&lower)?;
    let candidate = caps.get(1)?.as_str().trim_end_matches('.');
    if PREPRINT_NEW_RE.is_match(&strip_version(candidate))
        || PREPRINT_OLD_RE.is_match(candidate)
        || PREPRINT_NEW_RE.is_match(candidate)
    {
        Some(candidate.to_string())
    } else {
        None
    }
}

/// Match a whole (already URL-normalized, lowercased) string as a preprint
/// id, stripping `arxiv:`/`preprint:` tags and `arxiv.org/abs/` paths.
fn preprint_id_of(s: &str) -> Option<String> {
    let mut candidate = s;
    for prefix in ["arxiv:", "preprint:"] {
        if let Some(rest) = candidate.strip_prefix(prefix) {
            candidate = rest.trim_start();
            break;
        }
    }
    for path in ["arxiv.org/abs/", "arxiv.org/pdf/"] {
        if let Some(rest) = candidate.strip_prefix(path) {
            candidate = rest;
            break;
        }
    }

    if let Some(caps) = PREPRINT_NEW_RE.captures(candidate) {
        return Some(caps.get(1).map(|m| m.as_str().to_string())?);
    }
    if let Some(caps) = PREPRINT_OLD_RE.captures(candidate) {
        return Some(caps.get(1).map(|m| m.as_str().to_string())?);
    }
    None
}

fn strip_version(id: &str) -> String {
    VERSION_SUFFIX_RE.replace(id, "").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doi_from_resolver_hosts_is_equivalent() {
        assert_eq!(
            normalize("https://doi.org/10.1/ABC"),
            normalize("http://dx.doi.org/10.1/abc")
        );
    }

    #[test]
    fn bare_doi() {
        let id = normalize("10.1000/xyz123");
        assert_eq!(id.kind, IdentifierKind::Doi);
        assert_eq!(id.canonical, "doi:10.1000/xyz123");
    }

    #[test]
    fn doi_scheme_prefix() {
        assert_eq!(normalize("doi:10.1000/xyz123"), normalize("10.1000/xyz123"));
    }

    #[test]
    fn doi_case_insensitive() {
        assert_eq!(
            normalize("10.1234/ABC.Def"),
            normalize("10.1234/abc.def")
        );
    }

    #[test]
    fn doi_trailing_punctuation_stripped() {
        let id = normalize("see 10.1000/xyz123.");
        assert_eq!(id.canonical, "doi:10.1000/xyz123");
    }

    #[test]
    fn preprint_version_insensitive() {
        assert_eq!(
            normalize("arXiv:2104.00000v1"),
            normalize("arXiv:2104.00000v2")
        );
        let id = normalize("arXiv:2104.00000v2");
        assert_eq!(id.kind, IdentifierKind::PreprintId);
        assert_eq!(id.canonical, "preprint:2104.00000");
    }

    #[test]
    fn preprint_from_abs_url() {
        let id = normalize("https://arxiv.org/abs/2104.00000v3");
        assert_eq!(id.kind, IdentifierKind::PreprintId);
        assert_eq!(id.canonical, "preprint:2104.00000");
    }

    #[test]
    fn preprint_old_style() {
        let id = normalize("arXiv:hep-th/9901001v2");
        assert_eq!(id.kind, IdentifierKind::PreprintId);
        assert_eq!(id.canonical, "preprint:hep-th/9901001");
    }

    #[test]
    fn bare_new_style_preprint() {
        let id = normalize("2104.00000");
        assert_eq!(id.kind, IdentifierKind::PreprintId);
        assert_eq!(id.canonical, "preprint:2104.00000");
    }

    #[test]
    fn url_host_variants_fold() {
        let a = normalize("http://www.example.com/papers/craft/");
        let b = normalize("https://example.com/papers/craft");
        assert_eq!(a, b);
        assert_eq!(a.kind, IdentifierKind::Url);
        assert_eq!(a.canonical, "example.com/papers/craft");
    }

    #[test]
    fn schemeless_host_is_url() {
        let id = normalize("example.com/papers/craft");
        assert_eq!(id.kind, IdentifierKind::Url);
    }

    #[test]
    fn free_text_is_none() {
        let id = normalize("  The Craft of Use  ");
        assert_eq!(id.kind, IdentifierKind::None);
        assert_eq!(id.canonical, "the craft of use");
    }

    #[test]
    fn empty_input_is_none() {
        let id = normalize("   ");
        assert_eq!(id.kind, IdentifierKind::None);
        assert_eq!(id.canonical, "");
    }

    #[test]
    fn doi_inside_url_beats_url_kind() {
        let id = normalize("https://dl.acm.org/doi/10.1145/3290605.3300233");
        assert_eq!(id.kind, IdentifierKind::Doi);
        assert_eq!(id.canonical, "doi:10.1145/3290605.3300233");
    }

    #[test]
    fn extract_doi_from_sentence() {
        assert_eq!(
            extract_doi("As shown in https://doi.org/10.1000/xyz123, the effect"),
            Some("10.1000/xyz123".to_string())
        );
        assert_eq!(extract_doi("no identifier here"), None);
    }

    #[test]
    fn extract_preprint_from_sentence() {
        assert_eq!(
            extract_preprint_id("see arXiv:2104.00000v2 for details"),
            Some("2104.00000v2".to_string())
        );
        assert_eq!(extract_preprint_id("plain prose"), None);
    }

    #[test]
    fn priority_orders_doi_first() {
        assert!(normalize("10.1/x").priority() < normalize("arXiv:2104.00000").priority());
        assert!(
            normalize("arXiv:2104.00000").priority() < normalize("https://example.com").priority()
        );
    }

    #[test]
    fn bare_strips_scheme_tag() {
        assert_eq!(normalize("doi:10.1/X").bare(), "10.1/x");
        assert_eq!(normalize("arXiv:2104.00000v7").bare(), "2104.00000");
    }
}
