//! CrossRef adapter: DOI resolution via doi.org content negotiation and
//! free-text title search via the works API. Both paths produce CSL-JSON,
//! converted here into the canonical [`Payload`].

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use super::{
    LookupError, LookupErrorKind, LookupRequest, MetadataSource, Payload,
    check_rate_limit_response,
};
use crate::contributors::parse_contributor;
use crate::identifier::{Identifier, IdentifierKind};
use crate::matching::title_similarity;
use crate::Contributor;

const USER_AGENT: &str = "refsolve/0.2 (https://github.com/refsolve/refsolve)";

/// Minimum title similarity for accepting a search hit as the queried work.
const SEARCH_ACCEPT: f64 = 0.9;

pub struct CrossRef {
    /// Polite-pool contact address appended to API requests when present.
    pub mailto: Option<String>,
}

impl MetadataSource for CrossRef {
    fn name(&self) -> &str {
        "CrossRef"
    }

    fn supports(&self, request: &LookupRequest) -> bool {
        match request {
            LookupRequest::ById(id) => id.kind == IdentifierKind::Doi,
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
            match request {
                LookupRequest::ById(id) => fetch_doi(id, client, timeout).await,
                LookupRequest::ByQuery(query) => {
                    self.search_title(query, client, timeout).await
                }
            }
        })
    }
}

/// Resolve a DOI to CSL-JSON metadata through doi.org.
async fn fetch_doi(
    id: &Identifier,
    client: &reqwest::Client,
    timeout: Duration,
) -> Result<Payload, LookupError> {
    let url = format!("https://doi.org/{}", id.bare());
    let resp = client
        .get(&url)
        .header("Accept", "application/vnd.citationstyles.csl+json")
        .header("User-Agent", USER_AGENT)
        .timeout(timeout)
        .send()
        .await
        .map_err(LookupError::from_reqwest)?;

    check_rate_limit_response(&resp)?;
    let status = resp.status();
    if !status.is_success() {
        return Err(LookupError::from_status(status.as_u16(), None));
    }

    let data: serde_json::Value = resp.json().await.map_err(|e| {
        LookupError::permanent(LookupErrorKind::MalformedPayload, e.to_string())
    })?;
    Ok(parse_csl_item(&data))
}

impl CrossRef {
    /// Title search against api.crossref.org. The first hit whose title is
    /// close enough to the query is accepted; anything else is a definitive
    /// not-found.
    async fn search_title(
        &self,
        query: &str,
        client: &reqwest::Client,
        timeout: Duration,
    ) -> Result<Payload, LookupError> {
        let mut url = format!(
            "https://api.crossref.org/works?query.title={}&rows=5",
            urlencoding::encode(query)
        );
        if let Some(ref email) = self.mailto {
            url.push_str(&format!("&mailto={}", urlencoding::encode(email)));
        }

        let resp = client
            .get(&url)
            .header("User-Agent", USER_AGENT)
            .timeout(timeout)
            .send()
            .await
            .map_err(LookupError::from_reqwest)?;

        check_rate_limit_response(&resp)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(LookupError::from_status(status.as_u16(), None));
        }

        let data: serde_json::Value = resp.json().await.map_err(|e| {
            LookupError::permanent(LookupErrorKind::MalformedPayload, e.to_string())
        })?;

        let items = data["message"]["items"].as_array().cloned().unwrap_or_default();
        for item in &items {
            let found_title = csl_title(item).unwrap_or_default();
            if title_similarity(query, &found_title) >= SEARCH_ACCEPT {
                return Ok(parse_csl_item(item));
            }
        }
        Err(LookupError::not_found(format!(
            "no CrossRef work matches \"{query}\""
        )))
    }
}

fn csl_title(item: &serde_json::Value) -> Option<String> {
    match &item["title"] {
        serde_json::Value::Array(arr) => arr.first().and_then(|v| v.as_str()).map(String::from),
        serde_json::Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn csl_container(item: &serde_json::Value) -> Option<String> {
    match &item["container-title"] {
        serde_json::Value::Array(arr) => arr.first().and_then(|v| v.as_str()).map(String::from),
        serde_json::Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn csl_date(item: &serde_json::Value) -> Option<String> {
    let parts = item["issued"]["date-parts"].as_array()?.first()?.as_array()?;
    let year = parts.first()?.as_i64()?;
    let mut date = format!("{year}");
    if let Some(month) = parts.get(1).and_then(|v| v.as_i64()) {
        date.push_str(&format!("-{month:02}"));
        if let Some(day) = parts.get(2).and_then(|v| v.as_i64()) {
            date.push_str(&format!("-{day:02}"));
        }
    }
    Some(date)
}

fn csl_contributors(item: &serde_json::Value) -> Vec<Contributor> {
    item["author"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|a| {
                    if let Some(family) = a["family"].as_str() {
                        let given = a["given"].as_str().unwrap_or("");
                        if given.is_empty() {
                            Some(parse_contributor(family))
                        } else {
                            Some(Contributor::person(given, family))
                        }
                    } else {
                        a["literal"].as_str().map(Contributor::organization)
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Convert one CSL-JSON item into the canonical payload shape.
pub fn parse_csl_item(item: &serde_json::Value) -> Payload {
    let mut identifiers = Vec::new();
    if let Some(doi) = item["DOI"].as_str() {
        identifiers.push(Identifier::doi(doi));
    }
    if let Some(url) = item["URL"].as_str() {
        let id = crate::identifier::normalize(url);
        if id.kind == IdentifierKind::Url && !identifiers.contains(&id) {
            identifiers.push(id);
        }
    }

    Payload {
        title: csl_title(item),
        contributors: csl_contributors(item),
        container: csl_container(item),
        date: csl_date(item),
        identifiers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_csl_item() {
        let item: serde_json::Value = serde_json::from_str(
            r#"{
                "title": ["Craft of Use: Post-Growth Fashion"],
                "author": [
                    {"given": "Kate", "family": "Fletcher"},
                    {"literal": "European Commission"}
                ],
                "container-title": ["Routledge"],
                "issued": {"date-parts": [[2016, 3]]},
                "DOI": "10.4324/9781315647371",
                "URL": "https://doi.org/10.4324/9781315647371"
            }"#,
        )
        .unwrap();

        let payload = parse_csl_item(&item);
        assert_eq!(
            payload.title.as_deref(),
            Some("Craft of Use: Post-Growth Fashion")
        );
        assert_eq!(payload.contributors.len(), 2);
        assert_eq!(
            payload.contributors[0],
            Contributor::person("Kate", "Fletcher")
        );
        assert_eq!(
            payload.contributors[1],
            Contributor::organization("European Commission")
        );
        assert_eq!(payload.container.as_deref(), Some("Routledge"));
        assert_eq!(payload.date.as_deref(), Some("2016-03"));
        assert_eq!(payload.identifiers[0], Identifier::doi("10.4324/9781315647371"));
    }

    #[test]
    fn parse_title_as_plain_string() {
        let item: serde_json::Value =
            serde_json::from_str(r#"{"title": "A Plain Title"}"#).unwrap();
        let payload = parse_csl_item(&item);
        assert_eq!(payload.title.as_deref(), Some("A Plain Title"));
        assert!(payload.contributors.is_empty());
        assert!(payload.date.is_none());
    }

    #[test]
    fn parse_family_only_author_becomes_organization_when_orgish() {
        let item: serde_json::Value = serde_json::from_str(
            r#"{"title": ["X"], "author": [{"family": "World Health Organization"}]}"#,
        )
        .unwrap();
        let payload = parse_csl_item(&item);
        assert_eq!(
            payload.contributors[0],
            Contributor::organization("World Health Organization")
        );
    }

    #[test]
    fn parse_year_only_date() {
        let item: serde_json::Value =
            serde_json::from_str(r#"{"issued": {"date-parts": [[2021]]}}"#).unwrap();
        assert_eq!(parse_csl_item(&item).date.as_deref(), Some("2021"));
    }

    #[test]
    fn supports_doi_ids_and_queries() {
        let source = CrossRef { mailto: None };
        assert!(source.supports(&LookupRequest::ById(crate::identifier::normalize(
            "10.1000/xyz123"
        ))));
        assert!(source.supports(&LookupRequest::ByQuery("Craft of Use".into())));
        assert!(!source.supports(&LookupRequest::ById(crate::identifier::normalize(
            "arXiv:2104.00000"
        ))));
    }
}
