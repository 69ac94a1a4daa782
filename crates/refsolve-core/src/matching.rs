//! Title and author comparison for the fuzzy matching tier.
//!
//! Titles are folded to lowercase alphanumerics before comparison so that
//! accents, entities, and punctuation variants across sources produce the
//! same form. Author comparison works on surnames only: occurrence metadata
//! rarely carries reliable given names.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::Contributor;

/// Normalize a title for comparison and cache keying.
///
/// Steps (order matters):
/// 1. Unescape common HTML entities
/// 2. Expand ligatures NFKD leaves alone (æ, œ, ß)
/// 3. Unicode NFKD, keep ASCII only
/// 4. Keep only `[a-zA-Z0-9]`, lowercase
pub fn normalize_title(title: &str) -> String {
    let title = title
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'");

    let title = title
        .replace(['æ', 'Æ'], "ae")
        .replace(['œ', 'Œ'], "oe")
        .replace('ß', "ss")
        .replace(['ø', 'Ø'], "o")
        .replace(['đ', 'Đ', 'ð', 'Ð'], "d")
        .replace(['ł', 'Ł'], "l");

    let ascii: String = title.nfkd().filter(|c| c.is_ascii()).collect();

    static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9]").unwrap());
    NON_ALNUM.replace_all(&ascii, "").to_lowercase()
}

/// Similarity of two titles in `[0, 1]`.
///
/// Full-string ratio, with a containment bonus: a title of eight or more
/// normalized characters appearing whole inside the other (a work cited
/// without its subtitle) scores at least 0.85, rising with coverage of the
/// longer title.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let norm_a = normalize_title(a);
    let norm_b = normalize_title(b);

    if norm_a.is_empty() || norm_b.is_empty() {
        return 0.0;
    }
    if norm_a == norm_b {
        return 1.0;
    }

    let full = rapidfuzz::fuzz::ratio(norm_a.chars(), norm_b.chars());

    let (shorter, longer) = if norm_a.len() <= norm_b.len() {
        (&norm_a, &norm_b)
    } else {
        (&norm_b, &norm_a)
    };
    if shorter.len() >= 8 && longer.contains(shorter.as_str()) {
        let coverage = shorter.len() as f64 / longer.len() as f64;
        return full.max(0.85 + 0.15 * coverage);
    }

    full
}

/// Normalize a surname for comparison: lowercase ASCII alphanumerics.
fn normalize_surname(surname: &str) -> String {
    normalize_title(surname)
}

/// Whether two surnames denote the same family name. One ending with the
/// other absorbs particles lost in extraction ("Van Bavel" vs "Bavel").
pub fn surnames_match(a: &str, b: &str) -> bool {
    let na = normalize_surname(a);
    let nb = normalize_surname(b);
    if na.is_empty() || nb.is_empty() {
        return false;
    }
    na == nb || na.ends_with(&nb) || nb.ends_with(&na)
}

/// Fraction of the smaller contributor list whose surnames appear in the
/// other list. `None` when either side has no contributors, so the caller
/// can fall back to title-only scoring.
pub fn surname_overlap(a: &[Contributor], b: &[Contributor]) -> Option<f64> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let matched = small
        .iter()
        .filter(|ca| large.iter().any(|cb| surnames_match(ca.surname(), cb.surname())))
        .count();
    Some(matched as f64 / small.len() as f64)
}

/// Combined fuzzy score: weighted title similarity and author overlap, or
/// title similarity alone when no author evidence exists on either side.
pub fn combined_score(title_sim: f64, overlap: Option<f64>, title_weight: f64) -> f64 {
    match overlap {
        Some(o) => title_weight * title_sim + (1.0 - title_weight) * o,
        None => title_sim,
    }
}
