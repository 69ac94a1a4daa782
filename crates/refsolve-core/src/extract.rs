//! Citation occurrence extraction.
//!
//! Scans raw source text (the output of the upstream document parser) for
//! identifier-bearing spans (URLs, DOIs, preprint ids) and for bracketed
//! citation spans with no identifier. Each hit becomes an immutable
//! [`CitationOccurrence`] carrying its byte position for traceability and
//! for restoring document order at emission.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::CitationOccurrence;

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s"'<>)\]]+"#).unwrap());

static DOI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\b10\.\d{1,9}(?:\.\d+)*/[^\s"'<>]+"#).unwrap());

static PREPRINT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\barxiv:\s*[a-z.-]*/?\d{4}[.\d]*(?:v\d+)?").unwrap());

/// `[ ... 1999 ... ]` spans: bracketed citations with a year but no inline
/// identifier, candidates for the fuzzy tier.
static BRACKET_CITATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\[\]]*\b(?:1[5-9]\d{2}|20\d{2})\b[^\[\]]*)\]").unwrap());

#[derive(Debug)]
struct Candidate {
    start: usize,
    end: usize,
    raw: String,
    inline_identifier: Option<String>,
}

/// Extract citation occurrences from source text, in document order.
///
/// Identifier tokens carry the enclosing line as their raw span; a token
/// nested inside a longer one (a DOI inside a URL) yields one occurrence,
/// not two.
pub fn extract_occurrences(text: &str) -> Vec<CitationOccurrence> {
    let mut candidates: Vec<Candidate> = Vec::new();

    for re in [&*URL_RE, &*DOI_RE, &*PREPRINT_RE] {
        for m in re.find_iter(text) {
            let token = m
                .as_str()
                .trim_end_matches(['.', ',', ';', ')', ']'])
                .to_string();
            candidates.push(Candidate {
                start: m.start(),
                end: m.start() + token.len(),
                raw: enclosing_line(text, m.start()).to_string(),
                inline_identifier: Some(token),
            });
        }
    }

    for caps in BRACKET_CITATION_RE.captures_iter(text) {
        let inner = caps.get(1).unwrap();
        // Bracketed spans holding an identifier are already covered above.
        if URL_RE.is_match(inner.as_str())
            || DOI_RE.is_match(inner.as_str())
            || PREPRINT_RE.is_match(inner.as_str())
        {
            continue;
        }
        candidates.push(Candidate {
            start: inner.start(),
            end: inner.end(),
            raw: inner.as_str().trim().to_string(),
            inline_identifier: None,
        });
    }

    candidates.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

    // Keep the longest span at each position, drop anything nested inside
    // an already-kept span.
    let mut occurrences: Vec<CitationOccurrence> = Vec::new();
    let mut covered_until = 0usize;
    for candidate in candidates {
        if candidate.start < covered_until {
            continue;
        }
        covered_until = candidate.end;
        occurrences.push(CitationOccurrence {
            raw: candidate.raw,
            inline_identifier: candidate.inline_identifier,
            position: candidate.start,
        });
    }

    tracing::debug!(count = occurrences.len(), "extracted citation occurrences");
    occurrences
}

/// The trimmed line of text containing byte offset `pos`.
fn enclosing_line(text: &str, pos: usize) -> &str {
    let start = text[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let end = text[pos..]
        .find('\n')
        .map(|i| pos + i)
        .unwrap_or(text.len());
    text[start..end].trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bare_doi_with_line_context() {
        let text = "As argued in 10.1000/xyz123, the effect persists.\nSecond line.";
        let occs = extract_occurrences(text);
        assert_eq!(occs.len(), 1);
        assert_eq!(occs[0].inline_identifier.as_deref(), Some("10.1000/xyz123"));
        assert_eq!(occs[0].raw, "As argued in 10.1000/xyz123, the effect persists.");
        assert_eq!(occs[0].position, 13);
    }

    #[test]
    fn doi_inside_url_yields_one_occurrence() {
        let text = "See https://doi.org/10.1000/xyz123 for details.";
        let occs = extract_occurrences(text);
        assert_eq!(occs.len(), 1);
        assert_eq!(
            occs[0].inline_identifier.as_deref(),
            Some("https://doi.org/10.1000/xyz123")
        );
    }

    #[test]
    fn extracts_preprint_token() {
        let text = "Earlier work (arXiv:2104.00000v2) showed this.";
        let occs = extract_occurrences(text);
        assert_eq!(occs.len(), 1);
        assert_eq!(
            occs[0].inline_identifier.as_deref(),
            Some("arXiv:2104.00000v2")
        );
    }

    #[test]
    fn extracts_bracketed_citation_without_identifier() {
        let text = "The claim appears in [Fletcher 2016, Craft of Use] and elsewhere.";
        let occs = extract_occurrences(text);
        assert_eq!(occs.len(), 1);
        assert!(occs[0].inline_identifier.is_none());
        assert_eq!(occs[0].raw, "Fletcher 2016, Craft of Use");
    }

    #[test]
    fn bracketed_span_with_doi_not_duplicated() {
        let text = "Shown in [Smith 2020, 10.1000/xyz123] recently.";
        let occs = extract_occurrences(text);
        assert_eq!(occs.len(), 1);
        assert_eq!(occs[0].inline_identifier.as_deref(), Some("10.1000/xyz123"));
    }

    #[test]
    fn multiple_occurrences_in_document_order() {
        let text = "First 10.1/aaa here.\nThen https://example.com/b there.\nLast arXiv:2104.00000.";
        let occs = extract_occurrences(text);
        assert_eq!(occs.len(), 3);
        assert!(occs[0].position < occs[1].position);
        assert!(occs[1].position < occs[2].position);
        assert_eq!(occs[0].inline_identifier.as_deref(), Some("10.1/aaa"));
        assert_eq!(
            occs[1].inline_identifier.as_deref(),
            Some("https://example.com/b")
        );
        assert_eq!(occs[2].inline_identifier.as_deref(), Some("arXiv:2104.00000"));
    }

    #[test]
    fn trailing_punctuation_stripped_from_tokens() {
        let text = "See arXiv:2104.00000, and also https://example.com/p.";
        let occs = extract_occurrences(text);
        assert_eq!(occs.len(), 2);
        assert_eq!(occs[0].inline_identifier.as_deref(), Some("arXiv:2104.00000"));
        assert_eq!(
            occs[1].inline_identifier.as_deref(),
            Some("https://example.com/p")
        );
    }

    #[test]
    fn plain_prose_yields_nothing() {
        assert!(extract_occurrences("No citations in this sentence.").is_empty());
    }

    #[test]
    fn year_range_bracket_without_citation_text_is_kept() {
        // A bracket with only a year is still a candidate span; the resolver
        // decides whether it is searchable.
        let occs = extract_occurrences("As early as [2016] this was known.");
        assert_eq!(occs.len(), 1);
        assert_eq!(occs[0].raw, "2016");
    }
}
