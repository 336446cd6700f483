use super::{DirectLinkSource, SourceFuture, encode_doi_path, status_error};
use crate::Server;
use std::time::Duration;

/// The bioRxiv/medRxiv details API, which records the published DOI of a preprint.
pub struct BioRxiv;

impl DirectLinkSource for BioRxiv {
    fn name(&self) -> &str {
        "bioRxiv"
    }

    fn applies_to(&self, server: Server) -> bool {
        server.has_direct_link_api()
    }

    fn lookup<'a>(
        &'a self,
        doi: &'a str,
        server: Server,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> SourceFuture<'a, Option<String>> {
        Box::pin(async move {
            let url = format!(
                "https://api.biorxiv.org/details/{}/{}",
                server.as_str(),
                encode_doi_path(doi)
            );

            let resp = client
                .get(&url)
                .header("User-Agent", crate::USER_AGENT)
                .timeout(timeout)
                .send()
                .await?;
            status_error(&resp)?;

            let data: serde_json::Value = resp.json().await?;
            Ok(parse_published(&data))
        })
    }
}

/// Extract the journal DOI from a details response.
///
/// The API answers unpublished preprints with `"NA"` and unknown DOIs with
/// an empty collection.
pub fn parse_published(data: &serde_json::Value) -> Option<String> {
    let published = data["collection"]
        .as_array()?
        .first()?
        .get("published")?
        .as_str()?
        .trim();

    if published.is_empty() || published.eq_ignore_ascii_case("NA") {
        None
    } else {
        Some(published.to_string())
    }
}
