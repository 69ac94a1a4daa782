//! Contributor parsing and organizational-name enforcement.
//!
//! External sources deliver names as "Given Family", "Family, Given", or a
//! single literal string. A contributor with no distinguishable given name
//! must surface as an [`Contributor::Organization`], never as a family-only
//! person: the typeset grammar renders those two forms differently and a
//! family-only "European Commission" corrupts the output. That enforcement
//! lives here, not in callers.

use once_cell::sync::Lazy;
use std::collections::HashSet;

use crate::Contributor;

/// Common surname particles (case-insensitive).
static SURNAME_PREFIXES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "van", "von", "de", "del", "della", "di", "da", "al", "el", "la", "le", "ben", "ibn",
        "mac", "mc", "o",
    ]
    .into_iter()
    .collect()
});

/// Words that mark a name as an organization rather than a person.
static ORGANIZATION_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "agency",
        "association",
        "bureau",
        "center",
        "centre",
        "college",
        "commission",
        "committee",
        "consortium",
        "corporation",
        "council",
        "department",
        "foundation",
        "group",
        "inc",
        "initiative",
        "institute",
        "institution",
        "laboratory",
        "ltd",
        "ministry",
        "network",
        "office",
        "organisation",
        "organization",
        "press",
        "programme",
        "project",
        "society",
        "team",
        "union",
        "university",
    ]
    .into_iter()
    .collect()
});

/// Heuristic: does this name denote an organization?
///
/// Triggers on organization keywords anywhere in the name, all-caps
/// acronyms, and the ampersand corporate form ("Taylor & Francis").
pub fn is_organization_name(name: &str) -> bool {
    let name = name.trim();
    if name.is_empty() {
        return false;
    }

    if name.contains('&') {
        return true;
    }

    // All-caps token of 2+ letters with no lowercase anywhere: an acronym
    // like "UNESCO" or "W3C", not a surname.
    if !name.contains(' ')
        && name.len() >= 2
        && name.chars().all(|c| !c.is_lowercase())
        && name.chars().any(|c| c.is_alphabetic())
    {
        return true;
    }

    name.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .any(|w| ORGANIZATION_KEYWORDS.contains(w.as_str()))
}

/// Parse a raw name string into a [`Contributor`].
///
/// "Family, Given" and "Given Family" forms become persons (with particle
/// handling for surnames like "Van Bavel"); organization-shaped names and
/// single tokens with no given-name evidence become organizations.
pub fn parse_contributor(raw: &str) -> Contributor {
    let raw = raw.trim();

    if is_organization_name(raw) {
        return Contributor::organization(raw);
    }

    if let Some((family, given)) = raw.split_once(',') {
        let family = family.trim();
        let given = given.trim();
        if given.is_empty() {
            return organizationalize(Contributor::person("", family));
        }
        return Contributor::person(given, family);
    }

    let parts: Vec<&str> = raw.split_whitespace().collect();
    match parts.len() {
        0 => Contributor::organization(""),
        1 => Contributor::organization(parts[0]),
        _ => {
            let family = surname_from_parts(&parts);
            let family_words = family.split_whitespace().count();
            let given = parts[..parts.len() - family_words].join(" ");
            if given.is_empty() {
                organizationalize(Contributor::person("", family))
            } else {
                Contributor::person(given, family)
            }
        }
    }
}

/// Enforce the organizational-author invariant on an existing contributor.
///
/// A person with an empty or whitespace-only given name, or whose family
/// name looks organizational, is converted to [`Contributor::Organization`].
/// Well-formed persons and organizations pass through unchanged.
pub fn organizationalize(contributor: Contributor) -> Contributor {
    match contributor {
        Contributor::Person { given, family } => {
            if given.trim().is_empty() || is_organization_name(&family) {
                let name = if given.trim().is_empty() {
                    family
                } else {
                    format!("{} {}", given.trim(), family)
                };
                Contributor::organization(name.trim())
            } else {
                Contributor::Person { given, family }
            }
        }
        org @ Contributor::Organization { .. } => org,
    }
}

/// Extract the surname from name parts, keeping particles ("Van Bavel",
/// "De La Cruz") attached.
fn surname_from_parts(parts: &[&str]) -> String {
    if parts.is_empty() {
        return String::new();
    }
    if parts.len() >= 3
        && SURNAME_PREFIXES.contains(
            parts[parts.len() - 3]
                .to_lowercase()
                .trim_end_matches('.'),
        )
    {
        return parts[parts.len() - 3..].join(" ");
    }
    if parts.len() >= 2
        && SURNAME_PREFIXES.contains(
            parts[parts.len() - 2]
                .to_lowercase()
                .trim_end_matches('.'),
        )
    {
        return parts[parts.len() - 2..].join(" ");
    }
    parts.last().unwrap().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_given_family() {
        assert_eq!(
            parse_contributor("Kate Fletcher"),
            Contributor::person("Kate", "Fletcher")
        );
    }

    #[test]
    fn parse_family_comma_given() {
        assert_eq!(
            parse_contributor("Fletcher, Kate"),
            Contributor::person("Kate", "Fletcher")
        );
    }

    #[test]
    fn parse_initials() {
        assert_eq!(
            parse_contributor("K. A. Fletcher"),
            Contributor::person("K. A.", "Fletcher")
        );
    }

    #[test]
    fn parse_particle_surname() {
        assert_eq!(
            parse_contributor("Jay Van Bavel"),
            Contributor::person("Jay", "Van Bavel")
        );
    }

    #[test]
    fn parse_three_part_particle() {
        assert_eq!(
            parse_contributor("Maria De La Cruz"),
            Contributor::person("Maria", "De La Cruz")
        );
    }

    #[test]
    fn single_token_is_organization() {
        assert_eq!(
            parse_contributor("Mozilla"),
            Contributor::organization("Mozilla")
        );
    }

    #[test]
    fn keyword_name_is_organization() {
        assert_eq!(
            parse_contributor("European Commission"),
            Contributor::organization("European Commission")
        );
        assert_eq!(
            parse_contributor("World Health Organization"),
            Contributor::organization("World Health Organization")
        );
    }

    #[test]
    fn acronym_is_organization() {
        assert_eq!(parse_contributor("UNESCO"), Contributor::organization("UNESCO"));
        assert_eq!(parse_contributor("W3C"), Contributor::organization("W3C"));
    }

    #[test]
    fn ampersand_is_organization() {
        assert_eq!(
            parse_contributor("Taylor & Francis"),
            Contributor::organization("Taylor & Francis")
        );
    }

    #[test]
    fn organizationalize_empty_given() {
        let c = Contributor::person("", "European Commission");
        assert_eq!(
            organizationalize(c),
            Contributor::organization("European Commission")
        );
    }

    #[test]
    fn organizationalize_keyword_family() {
        let c = Contributor::person("The", "Linux Foundation");
        assert_eq!(
            organizationalize(c),
            Contributor::organization("The Linux Foundation")
        );
    }

    #[test]
    fn organizationalize_keeps_real_person() {
        let c = Contributor::person("Kate", "Fletcher");
        assert_eq!(organizationalize(c.clone()), c);
    }

    #[test]
    fn organizationalize_keeps_organization() {
        let c = Contributor::organization("UNESCO");
        assert_eq!(organizationalize(c.clone()), c);
    }

    #[test]
    fn trailing_comma_only_family() {
        assert_eq!(
            parse_contributor("Mozilla,"),
            Contributor::organization("Mozilla")
        );
    }
}
