use super::{
    DirectLinkSource, LinkedRecord, PreprintSource, SourceFuture, encode_doi_path, status_error,
};
use crate::rate_limit::SourceError;
use crate::temporal::from_date_parts;
use crate::{PreprintRecord, Server};
use std::time::Duration;

/// Crossref works API: preprint metadata and `is-preprint-of` relations.
pub struct CrossRef {
    pub mailto: Option<String>,
}

impl CrossRef {
    /// Fetch the `message` object of a work. `Ok(None)` on 404.
    async fn work(
        &self,
        doi: &str,
        client: &reqwest::Client,
        timeout: Duration,
    ) -> Result<Option<serde_json::Value>, SourceError> {
        let mut url = format!("https://api.crossref.org/works/{}", encode_doi_path(doi));

        let user_agent = if let Some(ref email) = self.mailto {
            url.push_str(&format!("?mailto={}", urlencoding::encode(email)));
            format!("{} (mailto:{})", crate::USER_AGENT, email)
        } else {
            crate::USER_AGENT.to_string()
        };

        let resp = client
            .get(&url)
            .header("User-Agent", user_agent)
            .timeout(timeout)
            .send()
            .await?;

        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        status_error(&resp)?;

        let mut data: serde_json::Value = resp.json().await?;
        Ok(Some(data["message"].take()))
    }
}

impl DirectLinkSource for CrossRef {
    fn name(&self) -> &str {
        "Crossref"
    }

    fn applies_to(&self, _server: Server) -> bool {
        true
    }

    fn lookup<'a>(
        &'a self,
        doi: &'a str,
        _server: Server,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> SourceFuture<'a, Option<String>> {
        Box::pin(async move {
            Ok(self
                .work(doi, client, timeout)
                .await?
                .and_then(|work| parse_is_preprint_of(&work)))
        })
    }
}

impl PreprintSource for CrossRef {
    fn name(&self) -> &str {
        "Crossref"
    }

    fn fetch<'a>(
        &'a self,
        doi: &'a str,
        server: Server,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> SourceFuture<'a, Option<PreprintRecord>> {
        Box::pin(async move {
            match self.work(doi, client, timeout).await? {
                Some(work) => parse_preprint(&work, doi, server).map(Some),
                None => Ok(None),
            }
        })
    }

    fn links_as(&self) -> Option<&str> {
        Some("Crossref")
    }

    fn fetch_linked<'a>(
        &'a self,
        doi: &'a str,
        server: Server,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> SourceFuture<'a, Option<LinkedRecord>> {
        Box::pin(async move {
            let Some(work) = self.work(doi, client, timeout).await? else {
                return Ok(None);
            };
            parse_linked(&work, doi, server).map(Some)
        })
    }
}

/// The `is-preprint-of` link when present, otherwise the preprint record.
pub fn parse_linked(
    work: &serde_json::Value,
    doi: &str,
    server: Server,
) -> Result<LinkedRecord, SourceError> {
    match parse_is_preprint_of(work) {
        Some(journal_doi) => Ok(LinkedRecord::Journal(journal_doi)),
        None => parse_preprint(work, doi, server).map(LinkedRecord::Preprint),
    }
}

/// First journal DOI among the work's `is-preprint-of` relations.
pub fn parse_is_preprint_of(work: &serde_json::Value) -> Option<String> {
    work["relation"]["is-preprint-of"]
        .as_array()?
        .iter()
        .find(|entry| entry["id-type"].as_str() == Some("doi"))
        .and_then(|entry| entry["id"].as_str())
        .map(String::from)
}

/// Build a [`PreprintRecord`] from a Crossref work.
///
/// Missing title or abstract become empty strings and are reported by
/// [`PreprintRecord::validate`]; a work without any date is an error since
/// no record can be built.
pub fn parse_preprint(
    work: &serde_json::Value,
    doi: &str,
    server: Server,
) -> Result<PreprintRecord, SourceError> {
    let title = work["title"]
        .as_array()
        .and_then(|a| a.first())
        .and_then(|v| v.as_str())
        .map(collapse_whitespace)
        .unwrap_or_default();

    let abstract_text = work["abstract"]
        .as_str()
        .map(strip_markup)
        .unwrap_or_default();

    let posted = ["posted", "created"]
        .iter()
        .find_map(|key| {
            let parts: Vec<i64> = work[*key]["date-parts"][0]
                .as_array()?
                .iter()
                .filter_map(|p| p.as_i64())
                .collect();
            from_date_parts(&parts)
        })
        .ok_or_else(|| SourceError::Other(format!("Crossref record for {} has no date", doi)))?;

    // Entries without a given name are usually consortia
    let authors: Vec<String> = work["author"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|a| {
                    let given = a["given"].as_str()?;
                    let family = a["family"].as_str().unwrap_or("");
                    Some(format!("{} {}", given, family).trim().to_string())
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(PreprintRecord {
        doi: doi.to_string(),
        title,
        authors,
        abstract_text,
        posted,
        server,
    })
}

/// Remove JATS/HTML tags from an abstract, keeping the text.
fn strip_markup(html: &str) -> String {
    let fragment = scraper::Html::parse_fragment(html);
    let text: String = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    collapse_whitespace(&text)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
