//! Source traits and implementations for the external bibliographic services.

pub mod biorxiv;
pub mod crossref;
pub mod mock;
pub mod pubmed;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::rate_limit::SourceError;
use crate::{CandidateArticle, PreprintRecord, Server};

pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SourceError>> + Send + 'a>>;

/// A service that publishes preprint-to-journal links itself.
pub trait DirectLinkSource: Send + Sync {
    /// The canonical name of this source (e.g., "bioRxiv", "Crossref").
    fn name(&self) -> &str;

    /// Whether this source knows about preprints from `server`.
    fn applies_to(&self, server: Server) -> bool;

    /// Look up the journal DOI linked to a preprint. `Ok(None)` is a miss.
    fn lookup<'a>(
        &'a self,
        doi: &'a str,
        server: Server,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> SourceFuture<'a, Option<String>>;
}

/// Title and author search against a bibliographic database.
///
/// Both searches return at most `limit` candidates in the database's rank
/// order, and an empty list when nothing matches.
pub trait BibliographicSearch: Send + Sync {
    fn name(&self) -> &str;

    fn search_by_title<'a>(
        &'a self,
        title: &'a str,
        limit: usize,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> SourceFuture<'a, Vec<CandidateArticle>>;

    fn search_by_author<'a>(
        &'a self,
        authors: &'a [String],
        limit: usize,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> SourceFuture<'a, Vec<CandidateArticle>>;
}

/// Answer of [`PreprintSource::fetch_linked`].
#[derive(Debug, Clone)]
pub enum LinkedRecord {
    /// The source links the preprint to this journal DOI.
    Journal(String),
    Preprint(PreprintRecord),
}

/// A service that supplies preprint metadata by DOI.
pub trait PreprintSource: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch the preprint record. `Ok(None)` when the DOI is unknown.
    fn fetch<'a>(
        &'a self,
        doi: &'a str,
        server: Server,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> SourceFuture<'a, Option<PreprintRecord>>;

    /// Name of the [`DirectLinkSource`] whose lookup [`fetch_linked`](Self::fetch_linked)
    /// also answers, if any.
    fn links_as(&self) -> Option<&str> {
        None
    }

    /// Fetch the journal link if the source has one, otherwise the preprint
    /// record, with a single request.
    fn fetch_linked<'a>(
        &'a self,
        doi: &'a str,
        server: Server,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> SourceFuture<'a, Option<LinkedRecord>> {
        Box::pin(async move {
            Ok(self
                .fetch(doi, server, client, timeout)
                .await?
                .map(LinkedRecord::Preprint))
        })
    }
}

/// Percent-encode a DOI for use in a URL path, keeping its `/` separators.
pub(crate) fn encode_doi_path(doi: &str) -> String {
    doi.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Map a non-success, non-429 HTTP status to an error.
pub(crate) fn status_error(resp: &reqwest::Response) -> Result<(), SourceError> {
    crate::rate_limit::check_rate_limit_response(resp)?;
    let status = resp.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(SourceError::Other(format!("HTTP {}", status)))
    }
}
