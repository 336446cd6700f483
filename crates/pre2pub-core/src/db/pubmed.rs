use super::{BibliographicSearch, SourceFuture, status_error};
use crate::CandidateArticle;
use crate::rate_limit::SourceError;
use crate::temporal::parse_date;
use std::collections::HashMap;
use std::time::Duration;

const ESEARCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi";
const EFETCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi";

/// Restricts results to journal articles so preprints indexed in PubMed are not returned.
const JOURNAL_ARTICLE_FILTER: &str = " AND Journal Article[filter]";

/// PubMed via NCBI E-utilities: `esearch` for ranked PMIDs, `efetch` for MEDLINE records.
pub struct PubMed {
    pub email: Option<String>,
    pub api_key: Option<String>,
}

impl PubMed {
    fn common_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("db", "pubmed".to_string()), ("tool", "pre2pub".to_string())];
        if let Some(ref email) = self.email {
            params.push(("email", email.clone()));
        }
        if let Some(ref key) = self.api_key {
            params.push(("api_key", key.clone()));
        }
        params
    }

    /// Ranked PMIDs for a search term, at most `limit`.
    async fn esearch(
        &self,
        term: &str,
        limit: usize,
        client: &reqwest::Client,
        timeout: Duration,
    ) -> Result<Vec<String>, SourceError> {
        let mut params = self.common_params();
        params.push(("term", format!("{}{}", term, JOURNAL_ARTICLE_FILTER)));
        params.push(("retmode", "json".to_string()));
        params.push(("retmax", limit.to_string()));

        let resp = client
            .get(ESEARCH_URL)
            .query(&params)
            .header("User-Agent", crate::USER_AGENT)
            .timeout(timeout)
            .send()
            .await?;
        status_error(&resp)?;

        let data: serde_json::Value = resp.json().await?;
        if let Some(err) = data["esearchresult"]["ERROR"].as_str() {
            return Err(SourceError::Other(format!("esearch: {}", err)));
        }

        let mut ids: Vec<String> = data["esearchresult"]["idlist"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        ids.truncate(limit);
        Ok(ids)
    }

    /// Fetch MEDLINE records and return them in the order of `ids`.
    async fn efetch(
        &self,
        ids: &[String],
        client: &reqwest::Client,
        timeout: Duration,
    ) -> Result<Vec<CandidateArticle>, SourceError> {
        let mut params = self.common_params();
        params.push(("id", ids.join(",")));
        params.push(("rettype", "medline".to_string()));
        params.push(("retmode", "text".to_string()));

        let resp = client
            .get(EFETCH_URL)
            .query(&params)
            .header("User-Agent", crate::USER_AGENT)
            .timeout(timeout)
            .send()
            .await?;
        status_error(&resp)?;

        let text = resp.text().await?;
        let mut by_pmid: HashMap<String, CandidateArticle> = parse_medline(&text)
            .iter()
            .filter_map(MedlineRecord::to_candidate)
            .map(|c| (c.pmid.clone(), c))
            .collect();

        Ok(ids.iter().filter_map(|id| by_pmid.remove(id)).collect())
    }

    async fn search(
        &self,
        term: &str,
        limit: usize,
        client: &reqwest::Client,
        timeout: Duration,
    ) -> Result<Vec<CandidateArticle>, SourceError> {
        let ids = self.esearch(term, limit, client, timeout).await?;
        tracing::debug!(term, hits = ids.len(), "PubMed esearch");
        if ids.is_empty() {
            return Ok(vec![]);
        }
        self.efetch(&ids, client, timeout).await
    }
}

impl BibliographicSearch for PubMed {
    fn name(&self) -> &str {
        "PubMed"
    }

    fn search_by_title<'a>(
        &'a self,
        title: &'a str,
        limit: usize,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> SourceFuture<'a, Vec<CandidateArticle>> {
        Box::pin(async move { self.search(title, limit, client, timeout).await })
    }

    fn search_by_author<'a>(
        &'a self,
        authors: &'a [String],
        limit: usize,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> SourceFuture<'a, Vec<CandidateArticle>> {
        Box::pin(async move {
            let term = author_term(authors);
            if term.is_empty() {
                return Ok(vec![]);
            }
            self.search(&term, limit, client, timeout).await
        })
    }
}

/// Entrez author query: every author tagged `[author]`, all required.
pub fn author_term(authors: &[String]) -> String {
    authors
        .iter()
        .map(|a| a.replace([',', '.'], " "))
        .map(|a| a.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|a| !a.is_empty())
        .map(|a| format!("{}[author]", a))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// One record of a MEDLINE text export: ordered `(tag, value)` pairs.
#[derive(Debug, Default)]
pub struct MedlineRecord {
    fields: Vec<(String, String)>,
}

impl MedlineRecord {
    pub fn first(&self, tag: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(t, _)| t == tag)
            .map(|(_, v)| v.as_str())
    }

    pub fn all<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(t, _)| t == tag)
            .map(|(_, v)| v.as_str())
    }

    /// Article DOI from the `AID` list (`10.1000/xyz [doi]`).
    pub fn doi(&self) -> Option<String> {
        self.all("AID")
            .find_map(|aid| aid.strip_suffix("[doi]"))
            .map(|doi| doi.trim().to_string())
            .filter(|doi| !doi.is_empty())
    }

    pub fn to_candidate(&self) -> Option<CandidateArticle> {
        let pmid = self.first("PMID")?.to_string();
        let published = ["EDAT", "DEP", "DP"]
            .iter()
            .find_map(|tag| self.first(tag).and_then(parse_date));

        Some(CandidateArticle {
            doi: self.doi(),
            title: self.first("TI").map(String::from),
            authors: self.all("AU").map(String::from).collect(),
            abstract_text: self.first("AB").map(String::from),
            published,
            pmid,
        })
    }
}

/// Parse MEDLINE text. Tags occupy the first four columns followed by `- `;
/// continuation lines are indented by six spaces; records are separated by
/// blank lines.
pub fn parse_medline(text: &str) -> Vec<MedlineRecord> {
    let mut records = Vec::new();
    let mut current = MedlineRecord::default();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.fields.is_empty() {
                records.push(std::mem::take(&mut current));
            }
            continue;
        }

        if line.starts_with("      ") {
            if let Some((_, value)) = current.fields.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }

        if let Some((tag, value)) = line.split_once('-') {
            let tag = tag.trim();
            if !tag.is_empty() && tag.len() <= 4 && tag.chars().all(|c| c.is_ascii_uppercase()) {
                current
                    .fields
                    .push((tag.to_string(), value.trim().to_string()));
            }
        }
    }

    if !current.fields.is_empty() {
        records.push(current);
    }
    records
}
