//! Deterministic text sanitization for the two emission grammars.
//!
//! [`Grammar::StructuredRecord`] is the XML-style record format consumed by
//! the downstream record converter; Unicode text is directly representable
//! there and only markup-reserved characters need entity escaping.
//! [`Grammar::TypesetMarkup`] is classic TeX-family markup; accented Latin
//! and typographic symbols have no direct representation and are rewritten
//! as macros, and a larger reserved set is escaped. The two grammars never
//! share an escape table.
//!
//! Stages run in a fixed order; later stages assume earlier ones ran:
//! 1. unescape markup already present (the idempotence seed)
//! 2. normalize punctuation lookalikes to canonical ASCII forms
//! 3. apply the grammar's character-substitution table
//! 4. escape the grammar's reserved characters
//! 5. collapse whitespace runs by repeated replacement to a fixed point
//!
//! Stages 3 and 4 execute as a single character walk, substitution consulted
//! first, so stage 4 never mangles markup stage 3 just emitted. Running
//! [`sanitize`] on its own output is a no-op.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::{BibliographicRecord, Contributor};
use crate::contributors::organizationalize;

/// Target escaping rule-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grammar {
    StructuredRecord,
    TypesetMarkup,
}

/// Substitutions for characters with no direct representation in TeX-family
/// markup: accented Latin letters as accent macros, typographic symbols as
/// text macros.
static TYPESET_SUBSTITUTIONS: Lazy<HashMap<char, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();
    // Acute
    m.insert('á', "\\'{a}");
    m.insert('Á', "\\'{A}");
    m.insert('é', "\\'{e}");
    m.insert('É', "\\'{E}");
    m.insert('í', "\\'{i}");
    m.insert('Í', "\\'{I}");
    m.insert('ó', "\\'{o}");
    m.insert('Ó', "\\'{O}");
    m.insert('ú', "\\'{u}");
    m.insert('Ú', "\\'{U}");
    m.insert('ý', "\\'{y}");
    m.insert('ć', "\\'{c}");
    m.insert('ń', "\\'{n}");
    m.insert('ś', "\\'{s}");
    m.insert('ź', "\\'{z}");
    // Grave
    m.insert('à', "\\`{a}");
    m.insert('À', "\\`{A}");
    m.insert('è', "\\`{e}");
    m.insert('È', "\\`{E}");
    m.insert('ì', "\\`{i}");
    m.insert('ò', "\\`{o}");
    m.insert('ù', "\\`{u}");
    // Circumflex
    m.insert('â', "\\^{a}");
    m.insert('ê', "\\^{e}");
    m.insert('î', "\\^{i}");
    m.insert('ô', "\\^{o}");
    m.insert('û', "\\^{u}");
    // Diaeresis
    m.insert('ä', "\\\"{a}");
    m.insert('Ä', "\\\"{A}");
    m.insert('ë', "\\\"{e}");
    m.insert('ï', "\\\"{i}");
    m.insert('ö', "\\\"{o}");
    m.insert('Ö', "\\\"{O}");
    m.insert('ü', "\\\"{u}");
    m.insert('Ü', "\\\"{U}");
    m.insert('ÿ', "\\\"{y}");
    // Tilde
    m.insert('ã', "\\~{a}");
    m.insert('ñ', "\\~{n}");
    m.insert('Ñ', "\\~{N}");
    m.insert('õ', "\\~{o}");
    // Ring, cedilla, caron, double acute
    m.insert('å', "\\r{a}");
    m.insert('Å', "\\r{A}");
    m.insert('ç', "\\c{c}");
    m.insert('Ç', "\\c{C}");
    m.insert('č', "\\v{c}");
    m.insert('ě', "\\v{e}");
    m.insert('ň', "\\v{n}");
    m.insert('ř', "\\v{r}");
    m.insert('š', "\\v{s}");
    m.insert('Š', "\\v{S}");
    m.insert('ž', "\\v{z}");
    m.insert('Ž', "\\v{Z}");
    m.insert('ő', "\\H{o}");
    m.insert('ű', "\\H{u}");
    // Ligatures and special letters
    m.insert('ß', "\\ss{}");
    m.insert('æ', "\\ae{}");
    m.insert('Æ', "\\AE{}");
    m.insert('œ', "\\oe{}");
    m.insert('Œ', "\\OE{}");
    m.insert('ø', "\\o{}");
    m.insert('Ø', "\\O{}");
    m.insert('ł', "\\l{}");
    m.insert('Ł', "\\L{}");
    // Typographic symbols
    m.insert('†', "\\dag{}");
    m.insert('‡', "\\ddag{}");
    m.insert('§', "\\S{}");
    m.insert('¶', "\\P{}");
    m.insert('©', "\\textcopyright{}");
    m.insert('®', "\\textregistered{}");
    m.insert('™', "\\texttrademark{}");
    m.insert('€', "\\texteuro{}");
    m.insert('£', "\\pounds{}");
    m.insert('°', "\\textdegree{}");
    m.insert('±', "\\textpm{}");
    m.insert('×', "\\texttimes{}");
    m.insert('µ', "\\textmu{}");
    m.insert('μ', "\\textmu{}");
    m.insert('…', "\\dots{}");
    m
});

/// Reserved characters of the typeset grammar.
fn typeset_escape(c: char) -> Option<&'static str> {
    match c {
        '&' => Some("\\&"),
        '%' => Some("\\%"),
        '$' => Some("\\$"),
        '#' => Some("\\#"),
        '_' => Some("\\_"),
        '{' => Some("\\{"),
        '}' => Some("\\}"),
        '~' => Some("\\textasciitilde{}"),
        '^' => Some("\\textasciicircum{}"),
        '\\' => Some("\\textbackslash{}"),
        _ => None,
    }
}

/// Reserved characters of the structured-record grammar.
fn structured_escape(c: char) -> Option<&'static str> {
    match c {
        '&' => Some("&amp;"),
        '<' => Some("&lt;"),
        '>' => Some("&gt;"),
        '"' => Some("&quot;"),
        '\'' => Some("&apos;"),
        _ => None,
    }
}

/// Typeset unescape pairs: every substitution and escape form mapped back to
/// its source character, longest form first so compound macros are never
/// split by a shorter match.
static TYPESET_UNESCAPE: Lazy<Vec<(String, char)>> = Lazy::new(|| {
    let mut pairs: Vec<(String, char)> = TYPESET_SUBSTITUTIONS
        .iter()
        .map(|(c, s)| (s.to_string(), *c))
        .collect();
    for c in ['&', '%', '$', '#', '_', '{', '}', '~', '^', '\\'] {
        if let Some(escaped) = typeset_escape(c) {
            pairs.push((escaped.to_string(), c));
        }
    }
    pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(&b.0)));
    pairs
});

/// Stage 1: undo any markup of the target grammar already present in the
/// input, so a second sanitize pass is a no-op.
fn unescape(text: &str, grammar: Grammar) -> String {
    match grammar {
        Grammar::StructuredRecord => text
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&apos;", "'")
            .replace("&amp;", "&"),
        Grammar::TypesetMarkup => {
            let mut s = text.to_string();
            for (escaped, c) in TYPESET_UNESCAPE.iter() {
                if s.contains(escaped.as_str()) {
                    s = s.replace(escaped.as_str(), &c.to_string());
                }
            }
            s
        }
    }
}

/// Stage 2: fold punctuation lookalikes to canonical ASCII forms.
fn normalize_punctuation(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{2032}' => out.push('\''),
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{2033}' => out.push('"'),
            '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2212}' => out.push('-'),
            '\u{2014}' | '\u{2015}' => out.push_str("--"),
            '\u{00AD}' | '\u{200B}' | '\u{FEFF}' => {}
            '\u{00A0}' | '\u{2002}' | '\u{2003}' | '\u{2009}' | '\u{200A}' | '\u{202F}' => {
                out.push(' ')
            }
            _ => out.push(c),
        }
    }
    out
}

/// Stages 3+4 in one walk: substitution first, then reserved-character
/// escaping, then the character itself. Control characters have no
/// representation in either grammar and are dropped.
fn substitute_and_escape(text: &str, grammar: Grammar) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 4);
    for c in text.chars() {
        if c.is_control() && c != '\t' && c != '\n' && c != '\r' {
            continue;
        }
        match grammar {
            Grammar::TypesetMarkup => {
                if let Some(sub) = TYPESET_SUBSTITUTIONS.get(&c) {
                    out.push_str(sub);
                } else if let Some(esc) = typeset_escape(c) {
                    out.push_str(esc);
                } else {
                    out.push(c);
                }
            }
            Grammar::StructuredRecord => {
                if let Some(esc) = structured_escape(c) {
                    out.push_str(esc);
                } else {
                    out.push(c);
                }
            }
        }
    }
    out
}

/// Stage 5: collapse whitespace runs. Plain repeated replacement until the
/// string stops shrinking; no pattern primitives with combining-character
/// edge cases. Terminates because each round strictly shrinks the string.
fn collapse_whitespace(text: &str) -> String {
    let mut s: String = text
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .collect();
    loop {
        let replaced = s.replace("  ", " ");
        if replaced.len() == s.len() {
            break;
        }
        s = replaced;
    }
    s.trim().to_string()
}

/// Sanitize arbitrary Unicode text into the target grammar.
///
/// Idempotent: `sanitize(sanitize(x, g), g) == sanitize(x, g)`.
pub fn sanitize(text: &str, grammar: Grammar) -> String {
    let text = unescape(text, grammar);
    let text = normalize_punctuation(&text);
    let text = substitute_and_escape(&text, grammar);
    collapse_whitespace(&text)
}

/// Render a contributor in the grammar's author form.
///
/// The organizational-author invariant is enforced here, not left to
/// callers: any contributor without a usable given name reaches the
/// organization form of the grammar, never the family-only person form.
pub fn format_contributor(contributor: &Contributor, grammar: Grammar) -> String {
    match organizationalize(contributor.clone()) {
        Contributor::Person { given, family } => match grammar {
            Grammar::TypesetMarkup => format!(
                "{}, {}",
                sanitize(&family, grammar),
                sanitize(&given, grammar)
            ),
            Grammar::StructuredRecord => format!(
                "<contributor><given>{}</given><family>{}</family></contributor>",
                sanitize(&given, grammar),
                sanitize(&family, grammar)
            ),
        },
        Contributor::Organization { name } => match grammar {
            Grammar::TypesetMarkup => format!("{{{}}}", sanitize(&name, grammar)),
            Grammar::StructuredRecord => format!(
                "<contributor><organization>{}</organization></contributor>",
                sanitize(&name, grammar)
            ),
        },
    }
}

/// Sanitize every text field of a record for the target grammar and enforce
/// the organizational-contributor invariant. The record's key, identifiers,
/// and tier pass through untouched.
pub fn sanitize_record(record: &BibliographicRecord, grammar: Grammar) -> BibliographicRecord {
    BibliographicRecord {
        key: record.key.clone(),
        title: sanitize(&record.title, grammar),
        contributors: record
            .contributors
            .iter()
            .map(|c| {
                match organizationalize(c.clone()) {
                    Contributor::Person { given, family } => Contributor::Person {
                        given: sanitize(&given, grammar),
                        family: sanitize(&family, grammar),
                    },
                    Contributor::Organization { name } => Contributor::Organization {
                        name: sanitize(&name, grammar),
                    },
                }
            })
            .collect(),
        container: record.container.as_deref().map(|c| sanitize(c, grammar)),
        date: record.date.as_deref().map(|d| sanitize(d, grammar)),
        identifiers: record.identifiers.clone(),
        tier: record.tier,
    }
}
