//! Occurrence-to-record resolution.
//!
//! Matching tiers run in strict order, first success wins:
//! 1. exact identifier match (DOI over preprint id over URL),
//! 2. normalized-URL match,
//! 3. fuzzy title/author match, accepted only above the configured
//!    threshold; near-ties are ambiguous, never guessed.
//!
//! The first two tiers are pure functions driven by one small loop. When an
//! occurrence carries only a bare identifier, the lookup client may augment
//! it with remote metadata (through the cache) before the fuzzy tier.

use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::client::LookupClient;
use crate::identifier::{Identifier, IdentifierKind, extract_doi, extract_preprint_id, normalize};
use crate::library::{LibraryEntry, LibrarySnapshot};
use crate::matching::{combined_score, normalize_title, surname_overlap, title_similarity};
use crate::sources::{LookupRequest, Payload};
use crate::{
    BibliographicRecord, CitationOccurrence, Config, Contributor, FailureReason, MatchTier,
    ResolutionOutcome,
};

/// Minimum normalized length for occurrence text to count as a searchable
/// fragment for the fuzzy tier.
const MIN_SEARCHABLE_LEN: usize = 6;

/// Identifier-like tokens inside occurrence text. Stripped before deciding
/// whether the remainder is searchable: a bare DOI is an identifier, not a
/// title.
static IDENTIFIER_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)(https?://\S+|10\.\d{1,9}(?:\.\d+)*/[^\s"'<>]+|(?:arxiv|doi|preprint):\s*\S+|[a-z0-9.-]+\.[a-z]{2,}/\S+)"#,
    )
    .unwrap()
});

static URL_IN_TEXT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s"'<>)\]]+"#).unwrap());

/// "Surname 2016, Title…" shapes in bracketed citations: the author part
/// feeds surname overlap, the rest is the searchable title.
static AUTHOR_YEAR_PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?P<authors>[[:upper:]][^,\d]{0,60}?)[,\s]+\(?(?P<year>1[5-9]\d{2}|20\d{2})\)?[,:.\s]+(?P<rest>.+)$",
    )
    .unwrap()
});

/// Everything known about one occurrence at matching time.
struct QueryFacts {
    /// Candidate identifiers, highest priority first, deduplicated.
    identifiers: Vec<Identifier>,
    /// Searchable text for the fuzzy tier.
    title: Option<String>,
    contributors: Vec<Contributor>,
}

impl QueryFacts {
    fn from_occurrence(occurrence: &CitationOccurrence) -> Self {
        let mut identifiers = Vec::new();

        if let Some(ref inline) = occurrence.inline_identifier {
            let id = normalize(inline);
            if id.kind != IdentifierKind::None {
                identifiers.push(id);
            }
        }
        if let Some(doi) = extract_doi(&occurrence.raw) {
            identifiers.push(Identifier::doi(doi));
        }
        if let Some(preprint) = extract_preprint_id(&occurrence.raw) {
            identifiers.push(Identifier::preprint(preprint));
        }
        if let Some(url) = URL_IN_TEXT_RE.find(&occurrence.raw) {
            let id = normalize(url.as_str());
            if id.kind != IdentifierKind::None {
                identifiers.push(id);
            }
        }

        let mut seen = HashSet::new();
        identifiers.retain(|id| seen.insert(id.clone()));
        identifiers.sort_by_key(|id| id.priority());

        // Searchable text is what remains after identifier tokens are
        // removed; "10.1000/xyz123" alone is not a title.
        let residue = IDENTIFIER_TOKEN_RE
            .replace_all(&occurrence.raw, " ")
            .trim()
            .to_string();

        // Split "Fletcher 2016, Craft of Use" shapes into author evidence
        // and title text.
        let mut contributors = Vec::new();
        let searchable = if let Some(caps) = AUTHOR_YEAR_PREFIX_RE.captures(&residue) {
            for name in caps["authors"].split([',', '&']) {
                for part in name.split(" and ") {
                    let part = part.trim().trim_end_matches("et al.").trim();
                    if !part.is_empty() {
                        contributors.push(Contributor::person("", part));
                    }
                }
            }
            caps["rest"].trim().to_string()
        } else {
            residue
        };

        let title = if normalize_title(&searchable).len() >= MIN_SEARCHABLE_LEN {
            Some(searchable)
        } else {
            None
        };

        Self {
            identifiers,
            title,
            contributors,
        }
    }

    /// Merge remote metadata into the facts. Fetched metadata is
    /// authoritative: its title and contributors replace text heuristics,
    /// its identifiers extend the candidate list.
    fn absorb(&mut self, payload: Payload) {
        if payload.title.is_some() {
            self.title = payload.title;
        }
        if !payload.contributors.is_empty() {
            self.contributors = payload.contributors;
        }
        for id in payload.identifiers {
            if !self.identifiers.contains(&id) {
                self.identifiers.push(id);
            }
        }
        self.identifiers.sort_by_key(|id| id.priority());
    }
}

/// Tier 1: compare occurrence identifiers against the entry identifier
/// lists, in DOI > preprint > URL order.
fn exact_identifier<'a>(
    facts: &QueryFacts,
    library: &'a LibrarySnapshot,
) -> Option<(&'a LibraryEntry, MatchTier)> {
    facts
        .identifiers
        .iter()
        .find_map(|id| library.find_by_identifier(id))
        .map(|entry| (entry, MatchTier::Exact))
}

/// Tier 2: compare the canonical forms of URLs on both sides, so a library
/// entry linked only by URL still meets an occurrence citing a DOI mirror.
fn normalized_url<'a>(
    facts: &QueryFacts,
    library: &'a LibrarySnapshot,
) -> Option<(&'a LibraryEntry, MatchTier)> {
    facts
        .identifiers
        .iter()
        .find_map(|id| library.find_by_url_form(&id.canonical))
        .map(|entry| (entry, MatchTier::Normalized))
}

/// The identifier-driven tiers, in match order.
const STRATEGIES: [for<'a> fn(&QueryFacts, &'a LibrarySnapshot) -> Option<(&'a LibraryEntry, MatchTier)>;
    2] = [exact_identifier, normalized_url];

enum FuzzyResult<'a> {
    Match(&'a LibraryEntry, f64),
    Ambiguous { best: &'a LibraryEntry, runner_up: &'a LibraryEntry, score: f64 },
    NoMatch,
}

pub struct Resolver {
    fuzzy_threshold: f64,
    fuzzy_margin: f64,
    title_weight: f64,
    augment_from_remote: bool,
    client: Option<Arc<LookupClient>>,
}

impl Resolver {
    /// A resolver without remote augmentation (library-only matching).
    pub fn new(config: &Config) -> Self {
        Self {
            fuzzy_threshold: config.fuzzy_threshold,
            fuzzy_margin: config.fuzzy_margin,
            title_weight: config.title_weight,
            augment_from_remote: false,
            client: None,
        }
    }

    /// A resolver that may consult the lookup client for bare identifiers.
    pub fn with_client(config: &Config, client: Arc<LookupClient>) -> Self {
        Self {
            fuzzy_threshold: config.fuzzy_threshold,
            fuzzy_margin: config.fuzzy_margin,
            title_weight: config.title_weight,
            augment_from_remote: config.augment_from_remote,
            client: Some(client),
        }
    }

    /// Resolve one occurrence against the snapshot.
    pub async fn resolve(
        &self,
        occurrence: &CitationOccurrence,
        library: &LibrarySnapshot,
    ) -> ResolutionOutcome {
        let mut facts = QueryFacts::from_occurrence(occurrence);

        if facts.identifiers.is_empty() && facts.title.is_none() {
            tracing::debug!(position = occurrence.position, "occurrence has no identifier or searchable text");
            return ResolutionOutcome::failed(
                FailureReason::MalformedInput,
                format!("no identifier or searchable text in \"{}\"", occurrence.raw),
            );
        }

        for strategy in STRATEGIES {
            if let Some((entry, tier)) = strategy(&facts, library) {
                tracing::debug!(position = occurrence.position, key = %entry.key, %tier, "identifier tier matched");
                return ResolutionOutcome::Resolved(build_record(entry, tier));
            }
        }

        // The identifier tiers missed: resolve a bare DOI or preprint id to
        // its metadata before the fuzzy tier. A definitive remote not-found
        // (or an unsupported identifier shape) just falls through; anything
        // else is remembered as an external failure in case fuzzy cannot
        // settle the occurrence either.
        let mut external_failure: Option<String> = None;
        if self.augment_from_remote
            && let Some(client) = &self.client
            && let Some(id) = facts
                .identifiers
                .iter()
                .find(|id| {
                    matches!(id.kind, IdentifierKind::Doi | IdentifierKind::PreprintId)
                })
                .cloned()
        {
            match client.fetch(&LookupRequest::ById(id.clone())).await {
                Ok(payload) => {
                    tracing::debug!(position = occurrence.position, %id, "augmented occurrence from remote metadata");
                    facts.absorb(payload);
                    // Remote metadata may have supplied identifiers the
                    // library does know.
                    for strategy in STRATEGIES {
                        if let Some((entry, tier)) = strategy(&facts, library) {
                            return ResolutionOutcome::Resolved(build_record(entry, tier));
                        }
                    }
                }
                Err(err)
                    if !matches!(
                        err.kind,
                        crate::sources::LookupErrorKind::NotFound
                            | crate::sources::LookupErrorKind::Unsupported
                    ) =>
                {
                    external_failure = Some(format!("lookup of {} failed: {}", id, err));
                }
                Err(err) => {
                    tracing::debug!(position = occurrence.position, %id, error = %err, "remote lookup found nothing");
                }
            }
        }

        if let Some(ref title) = facts.title {
            match self.fuzzy_match(title, &facts.contributors, library) {
                FuzzyResult::Match(entry, score) => {
                    tracing::debug!(position = occurrence.position, key = %entry.key, score, "fuzzy tier matched");
                    ResolutionOutcome::Resolved(build_record(entry, MatchTier::Fuzzy))
                }
                FuzzyResult::Ambiguous { best, runner_up, score } => {
                    tracing::debug!(
                        position = occurrence.position,
                        best = %best.key,
                        runner_up = %runner_up.key,
                        score,
                        "fuzzy tier ambiguous"
                    );
                    ResolutionOutcome::failed(
                        FailureReason::Ambiguous,
                        format!(
                            "candidates \"{}\" and \"{}\" both score near {:.2}",
                            best.key, runner_up.key, score
                        ),
                    )
                }
                FuzzyResult::NoMatch => match external_failure {
                    // The metadata that could have settled this never
                    // arrived; report the lookup failure, not a not-found.
                    Some(detail) => {
                        ResolutionOutcome::failed(FailureReason::ExternalError, detail)
                    }
                    None => ResolutionOutcome::failed(
                        FailureReason::NotFound,
                        format!("no library entry matches \"{}\"", title),
                    ),
                },
            }
        } else if let Some(detail) = external_failure {
            ResolutionOutcome::failed(FailureReason::ExternalError, detail)
        } else {
            ResolutionOutcome::failed(
                FailureReason::NotFound,
                "identifier not in library and no searchable text",
            )
        }
    }

    /// Tier 3: weighted title similarity and author-surname overlap over
    /// every entry. Returns ambiguous when the runner-up lands within the
    /// configured margin of an accepted best score.
    fn fuzzy_match<'a>(
        &self,
        title: &str,
        contributors: &[Contributor],
        library: &'a LibrarySnapshot,
    ) -> FuzzyResult<'a> {
        let mut best: Option<(usize, f64)> = None;
        let mut runner_up: Option<(usize, f64)> = None;

        for (idx, entry) in library.entries().iter().enumerate() {
            let sim = title_similarity(title, &entry.title);
            let overlap = surname_overlap(contributors, &entry.contributors);
            let score = combined_score(sim, overlap, self.title_weight);

            match best {
                Some((_, best_score)) if score > best_score => {
                    runner_up = best;
                    best = Some((idx, score));
                }
                Some(_) => {
                    if runner_up.is_none_or(|(_, r)| score > r) {
                        runner_up = Some((idx, score));
                    }
                }
                None => best = Some((idx, score)),
            }
        }

        let Some((best_idx, best_score)) = best else {
            return FuzzyResult::NoMatch;
        };
        if best_score < self.fuzzy_threshold {
            return FuzzyResult::NoMatch;
        }

        if let Some((runner_idx, runner_score)) = runner_up
            && runner_score >= best_score - self.fuzzy_margin
        {
            return FuzzyResult::Ambiguous {
                best: &library.entries()[best_idx],
                runner_up: &library.entries()[runner_idx],
                score: best_score,
            };
        }

        FuzzyResult::Match(&library.entries()[best_idx], best_score)
    }
}

/// Materialize a record from a library entry at the given tier. Contents
/// pass through unchanged; sanitization happens downstream at emission.
fn build_record(entry: &LibraryEntry, tier: MatchTier) -> BibliographicRecord {
    BibliographicRecord {
        key: entry.key.clone(),
        title: entry.title.clone(),
        contributors: entry.contributors.clone(),
        container: entry.container.clone(),
        date: entry.date.clone(),
        identifiers: entry
            .identifiers
            .iter()
            .map(|raw| normalize(raw))
            .filter(|id| id.kind != IdentifierKind::None)
            .collect(),
        tier,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{DEFAULT_TTL, LookupCache};
    use crate::client::NoopPacer;
    use crate::sources::mock::{MockResponse, MockSource};
    use std::time::Duration;

    fn entry(
        key: &str,
        title: &str,
        contributors: Vec<Contributor>,
        identifiers: &[&str],
        url: Option<&str>,
    ) -> LibraryEntry {
        LibraryEntry {
            key: key.into(),
            title: title.into(),
            contributors,
            container: Some("Journal of Testing".into()),
            date: Some("2016".into()),
            identifiers: identifiers.iter().map(|s| s.to_string()).collect(),
            url: url.map(String::from),
        }
    }

    fn occurrence(raw: &str, inline: Option<&str>) -> CitationOccurrence {
        CitationOccurrence {
            raw: raw.into(),
            inline_identifier: inline.map(String::from),
            position: 0,
        }
    }

    fn resolver() -> Resolver {
        Resolver::new(&Config::default())
    }

    #[tokio::test]
    async fn exact_doi_match_returns_record_unchanged() {
        let library = LibrarySnapshot::from_entries(vec![entry(
            "fletcher2016",
            "Craft of Use: Post-Growth Fashion",
            vec![Contributor::person("Kate", "Fletcher")],
            &["doi:10.1000/xyz123"],
            None,
        )]);
        let occ = occurrence("10.1000/xyz123", Some("10.1000/xyz123"));

        let outcome = resolver().resolve(&occ, &library).await;
        let record = outcome.record().expect("should resolve");
        assert_eq!(record.tier, MatchTier::Exact);
        assert_eq!(record.key, "fletcher2016");
        assert_eq!(record.title, "Craft of Use: Post-Growth Fashion");
        assert_eq!(record.contributors, vec![Contributor::person("Kate", "Fletcher")]);
    }

    #[tokio::test]
    async fn preprint_version_stripped_matches_exact() {
        let library = LibrarySnapshot::from_entries(vec![entry(
            "paper2021",
            "Some Preprint",
            vec![],
            &["arxiv:2104.00000"],
            None,
        )]);
        let occ = occurrence("arXiv:2104.00000v2", Some("arXiv:2104.00000v2"));

        let outcome = resolver().resolve(&occ, &library).await;
        assert_eq!(outcome.tier(), MatchTier::Exact);
    }

    #[tokio::test]
    async fn doi_beats_fuzzy_for_tier() {
        // Library entry matchable both by DOI and by title similarity: the
        // outcome must be Exact, never Fuzzy.
        let library = LibrarySnapshot::from_entries(vec![entry(
            "fletcher2016",
            "Craft of Use",
            vec![],
            &["10.1000/xyz123"],
            None,
        )]);
        let occ = occurrence("Craft of Use. https://doi.org/10.1000/xyz123", None);

        let outcome = resolver().resolve(&occ, &library).await;
        assert_eq!(outcome.tier(), MatchTier::Exact);
    }

    #[tokio::test]
    async fn url_mirror_matches_at_normalized_tier() {
        let library = LibrarySnapshot::from_entries(vec![entry(
            "c",
            "A Web Resource",
            vec![],
            &[],
            Some("http://www.example.com/papers/craft/"),
        )]);
        let occ = occurrence(
            "https://example.com/papers/craft",
            Some("https://example.com/papers/craft"),
        );

        let outcome = resolver().resolve(&occ, &library).await;
        assert_eq!(outcome.tier(), MatchTier::Normalized);
    }

    #[tokio::test]
    async fn fuzzy_subtitle_containment_matches() {
        let library = LibrarySnapshot::from_entries(vec![entry(
            "fletcher2016",
            "The Craft of Use: Post-Growth Fashion",
            vec![Contributor::person("Kate", "Fletcher")],
            &[],
            None,
        )]);
        let occ = occurrence("Craft of Use", None);

        let outcome = resolver().resolve(&occ, &library).await;
        assert_eq!(outcome.tier(), MatchTier::Fuzzy);
    }

    #[tokio::test]
    async fn two_close_candidates_are_ambiguous() {
        let library = LibrarySnapshot::from_entries(vec![
            entry("a", "The Craft of Use: Post-Growth Fashion", vec![], &[], None),
            entry("b", "The Craft of Use: Post-Growth Fashion II", vec![], &[], None),
        ]);
        let occ = occurrence("Craft of Use Post-Growth Fashion", None);

        let outcome = resolver().resolve(&occ, &library).await;
        match outcome {
            ResolutionOutcome::Failed { reason, detail } => {
                assert_eq!(reason, FailureReason::Ambiguous);
                assert!(detail.contains('a') && detail.contains('b'));
            }
            other => panic!("expected ambiguous, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn below_threshold_is_not_found() {
        let library = LibrarySnapshot::from_entries(vec![entry(
            "x",
            "Deep Residual Learning for Image Recognition",
            vec![],
            &[],
            None,
        )]);
        let occ = occurrence("Craft of Use", None);

        let outcome = resolver().resolve(&occ, &library).await;
        assert!(matches!(
            outcome,
            ResolutionOutcome::Failed { reason: FailureReason::NotFound, .. }
        ));
    }

    #[tokio::test]
    async fn unparseable_occurrence_is_malformed() {
        let library = LibrarySnapshot::from_entries(vec![]);
        let occ = occurrence("???", None);

        let outcome = resolver().resolve(&occ, &library).await;
        assert!(matches!(
            outcome,
            ResolutionOutcome::Failed { reason: FailureReason::MalformedInput, .. }
        ));
    }

    #[tokio::test]
    async fn empty_library_not_found() {
        let library = LibrarySnapshot::from_entries(vec![]);
        let occ = occurrence("The Craft of Use", None);

        let outcome = resolver().resolve(&occ, &library).await;
        assert!(matches!(
            outcome,
            ResolutionOutcome::Failed { reason: FailureReason::NotFound, .. }
        ));
    }

    // ── remote augmentation ────────────────────────────────────────────

    fn client_with(source: Arc<MockSource>) -> Arc<LookupClient> {
        Arc::new(LookupClient::new(
            vec![source],
            Arc::new(NoopPacer),
            Arc::new(LookupCache::new(DEFAULT_TTL)),
            0,
            Duration::from_secs(5),
        ))
    }

    #[tokio::test]
    async fn bare_doi_augmented_then_fuzzy_matched() {
        let library = LibrarySnapshot::from_entries(vec![entry(
            "fletcher2016",
            "The Craft of Use: Post-Growth Fashion",
            vec![Contributor::person("Kate", "Fletcher")],
            &[],
            None,
        )]);
        // Library has no DOI; remote lookup resolves the DOI to a title the
        // fuzzy tier can match.
        let source = Arc::new(MockSource::new(
            "MockDB",
            MockResponse::Found(Payload {
                title: Some("The Craft of Use: Post-Growth Fashion".into()),
                contributors: vec![Contributor::person("Kate", "Fletcher")],
                ..Default::default()
            }),
        ));
        let resolver =
            Resolver::with_client(&Config::default(), client_with(source.clone()));
        let occ = occurrence("10.1000/xyz123", Some("10.1000/xyz123"));

        let outcome = resolver.resolve(&occ, &library).await;
        assert_eq!(outcome.tier(), MatchTier::Fuzzy);
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test]
    async fn augmentation_failure_degrades_to_external_error() {
        let library = LibrarySnapshot::from_entries(vec![entry(
            "other",
            "Unrelated Entry",
            vec![],
            &[],
            None,
        )]);
        let source = Arc::new(MockSource::new("MockDB", MockResponse::Timeout));
        let resolver =
            Resolver::with_client(&Config::default(), client_with(source));
        let occ = occurrence("10.1000/xyz123", Some("10.1000/xyz123"));

        let outcome = resolver.resolve(&occ, &library).await;
        assert!(matches!(
            outcome,
            ResolutionOutcome::Failed { reason: FailureReason::ExternalError, .. }
        ));
    }

    #[tokio::test]
    async fn augmented_identifier_rechecks_exact_tier() {
        // Remote payload carries a preprint id the library does know.
        let library = LibrarySnapshot::from_entries(vec![entry(
            "known",
            "Known Preprint",
            vec![],
            &["arxiv:2104.00000"],
            None,
        )]);
        let source = Arc::new(MockSource::new(
            "MockDB",
            MockResponse::Found(Payload {
                title: Some("Known Preprint".into()),
                identifiers: vec![Identifier::preprint("2104.00000v3")],
                ..Default::default()
            }),
        ));
        let resolver =
            Resolver::with_client(&Config::default(), client_with(source));
        let occ = occurrence("10.9999/unknown", Some("10.9999/unknown"));

        let outcome = resolver.resolve(&occ, &library).await;
        assert_eq!(outcome.tier(), MatchTier::Exact);
    }

    #[tokio::test]
    async fn no_client_means_no_augmentation() {
        let library = LibrarySnapshot::from_entries(vec![]);
        let occ = occurrence("10.1000/xyz123", Some("10.1000/xyz123"));

        let outcome = resolver().resolve(&occ, &library).await;
        assert!(matches!(
            outcome,
            ResolutionOutcome::Failed { reason: FailureReason::NotFound, .. }
        ));
    }
}
