//! arXiv adapter: preprint-id lookup and free-text search over the Atom
//! export API, parsed with quick-xml into the canonical [`Payload`].

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use super::{
    LookupError, LookupErrorKind, LookupRequest, MetadataSource, Payload,
    check_rate_limit_response,
};
use crate::Contributor;
use crate::contributors::parse_contributor;
use crate::identifier::{Identifier, IdentifierKind};
use crate::matching::title_similarity;

const SEARCH_ACCEPT: f64 = 0.9;

pub struct Arxiv;

impl MetadataSource for Arxiv {
    fn name(&self) -> &str {
        "arXiv"
    }

    fn supports(&self, request: &LookupRequest) -> bool {
        match request {
            LookupRequest::ById(id) => id.kind == IdentifierKind::PreprintId,
            LookupRequest::ByQuery(_) => true,
        }
    }

    fn fetch<'a>(
        &'a self,
        request: &'a LookupRequest,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Payload, LookupError>> + Send + 'a>> {
        Box::pin(async move {
            let url = match request {
                LookupRequest::ById(id) => format!(
                    "https://export.arxiv.org/api/query?id_list={}&max_results=1",
                    urlencoding::encode(id.bare())
                ),
                LookupRequest::ByQuery(query) => format!(
                    "https://export.arxiv.org/api/query?search_query=all:{}&start=0&max_results=5",
                    urlencoding::encode(query)
                ),
            };

            let resp = client
                .get(&url)
                .timeout(timeout)
                .send()
                .await
                .map_err(LookupError::from_reqwest)?;

            check_rate_limit_response(&resp)?;
            let status = resp.status();
            if !status.is_success() {
                return Err(LookupError::from_status(status.as_u16(), None));
            }

            let body = resp.text().await.map_err(|e| {
                LookupError::permanent(LookupErrorKind::MalformedPayload, e.to_string())
            })?;

            let entries = parse_feed(&body)?;
            select_entry(request, entries)
        })
    }
}

#[derive(Debug, Default, Clone)]
struct FeedEntry {
    title: String,
    authors: Vec<String>,
    published: Option<String>,
    abs_url: Option<String>,
    journal_ref: Option<String>,
    doi: Option<String>,
}

/// Parse the Atom feed into entries.
fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>, LookupError> {
    use quick_xml::Reader;
    use quick_xml::events::Event;

    let mut reader = Reader::from_str(xml);
    let mut entries = Vec::new();
    let mut entry: Option<FeedEntry> = None;
    let mut path: Vec<String> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let local = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if local == "entry" {
                    entry = Some(FeedEntry::default());
                }
                path.push(local);
            }
            Ok(Event::End(_)) => {
                if path.pop().as_deref() == Some("entry")
                    && let Some(finished) = entry.take()
                {
                    entries.push(finished);
                }
            }
            Ok(Event::Text(ref t)) => {
                let Some(current) = entry.as_mut() else {
                    buf.clear();
                    continue;
                };
                // Atom text nodes may wrap across indented lines
                let unescaped = t.unescape().unwrap_or_default();
                let text = unescaped.split_whitespace().collect::<Vec<_>>().join(" ");
                if text.is_empty() {
                    buf.clear();
                    continue;
                }
                match path.as_slice() {
                    [.., e, field] if e == "entry" => match field.as_str() {
                        "title" => {
                            if !current.title.is_empty() {
                                current.title.push(' ');
                            }
                            current.title.push_str(&text);
                        }
                        "published" => current.published = Some(text),
                        "id" => current.abs_url = Some(text),
                        "journal_ref" => current.journal_ref = Some(text),
                        "doi" => current.doi = Some(text),
                        _ => {}
                    },
                    [.., a, field] if a == "author" && field == "name" => {
                        current.authors.push(text);
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(LookupError::permanent(
                    LookupErrorKind::MalformedPayload,
                    format!("Atom parse error: {e}"),
                ));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

/// Pick the entry answering the request, or a definitive not-found.
fn select_entry(
    request: &LookupRequest,
    entries: Vec<FeedEntry>,
) -> Result<Payload, LookupError> {
    let chosen = match request {
        // id_list queries return exactly the requested record; arXiv signals
        // unknown ids with an "Error" stub entry.
        LookupRequest::ById(id) => entries
            .into_iter()
            .find(|e| !e.title.eq_ignore_ascii_case("error"))
            .ok_or_else(|| LookupError::not_found(format!("unknown preprint id {}", id.bare()))),
        LookupRequest::ByQuery(query) => entries
            .into_iter()
            .find(|e| title_similarity(query, &e.title) >= SEARCH_ACCEPT)
            .ok_or_else(|| {
                LookupError::not_found(format!("no arXiv entry matches \"{query}\""))
            }),
    }?;

    Ok(entry_to_payload(chosen))
}

fn entry_to_payload(entry: FeedEntry) -> Payload {
    let contributors: Vec<Contributor> =
        entry.authors.iter().map(|a| parse_contributor(a)).collect();

    let mut identifiers = Vec::new();
    if let Some(ref abs_url) = entry.abs_url {
        let id = crate::identifier::normalize(abs_url);
        if id.kind == IdentifierKind::PreprintId {
            identifiers.push(id);
        }
    }
    if let Some(ref doi) = entry.doi {
        identifiers.push(Identifier::doi(doi));
    }

    // Date part of the published timestamp (e.g. "2021-04-01T17:59:59Z")
    let date = entry
        .published
        .as_deref()
        .map(|p| p.split('T').next().unwrap_or(p).to_string());

    Payload {
        title: Some(entry.title),
        contributors,
        container: entry.journal_ref.or_else(|| Some("arXiv".to_string())),
        date,
        identifiers,
    }
}
