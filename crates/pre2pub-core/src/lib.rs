use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod authors;
pub mod config_file;
pub mod db;
pub mod doi;
pub mod embedding;
pub mod matching;
pub mod orchestrator;
pub mod pool;
pub mod rate_limit;
pub mod retriever;
pub mod similarity;
pub mod temporal;

// Re-export for convenience
pub use authors::{CanonicalAuthor, canonicalize, same_authorship};
pub use embedding::{EmbeddingError, EmbeddingModel, TextEmbeddingsServer};
pub use orchestrator::{Backends, Resolver};
pub use pool::{ResolveOutcome, ResolveRequest};
pub use rate_limit::{RateLimiters, SourceError};
pub use retriever::{MAX_CANDIDATES, SearchMode};
pub use similarity::SimilarityScorer;

/// User-Agent sent to every bibliographic source.
pub const USER_AGENT: &str = concat!("pre2pub/", env!("CARGO_PKG_VERSION"));

/// Sentence-embedding model used when nothing else is configured.
pub const DEFAULT_EMBEDDING_MODEL: &str = "dmis-lab/biobert-base-cased-v1.1";

/// Preprint server a record was posted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Server {
    Biorxiv,
    Medrxiv,
    Other,
}

impl Server {
    /// Path segment used by the bioRxiv details API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Server::Biorxiv => "biorxiv",
            Server::Medrxiv => "medrxiv",
            Server::Other => "other",
        }
    }

    /// Whether the server publishes its own preprint-to-journal links.
    pub fn has_direct_link_api(&self) -> bool {
        matches!(self, Server::Biorxiv | Server::Medrxiv)
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Server {
    type Err = std::convert::Infallible;

    /// Unknown names map to [`Server::Other`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "biorxiv" => Server::Biorxiv,
            "medrxiv" => Server::Medrxiv,
            _ => Server::Other,
        })
    }
}

/// Metadata of the preprint being resolved. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct PreprintRecord {
    pub doi: String,
    pub title: String,
    /// Raw author names in the order the source listed them.
    pub authors: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub posted: NaiveDate,
    pub server: Server,
}

impl PreprintRecord {
    /// Check the fields every pipeline stage relies on.
    pub fn validate(&self) -> Result<(), ResolveError> {
        let missing = if self.title.trim().is_empty() {
            Some("title")
        } else if self.authors.iter().all(|a| a.trim().is_empty()) {
            Some("authors")
        } else if self.abstract_text.trim().is_empty() {
            Some("abstract")
        } else {
            None
        };

        match missing {
            Some(field) => Err(ResolveError::MissingField {
                doi: self.doi.clone(),
                field,
            }),
            None => Ok(()),
        }
    }
}

/// Identifier of a published article.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum ArticleId {
    Doi(String),
    Pmid(String),
}

impl ArticleId {
    /// Resolvable URL for the article.
    pub fn url(&self) -> String {
        match self {
            ArticleId::Doi(doi) => format!("https://doi.org/{}", doi),
            ArticleId::Pmid(pmid) => format!("https://pubmed.ncbi.nlm.nih.gov/{}/", pmid),
        }
    }
}

impl fmt::Display for ArticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArticleId::Doi(doi) => write!(f, "doi:{}", doi),
            ArticleId::Pmid(pmid) => write!(f, "pmid:{}", pmid),
        }
    }
}

/// A journal article returned by the bibliographic search.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CandidateArticle {
    pub pmid: String,
    pub doi: Option<String>,
    pub title: Option<String>,
    pub authors: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub published: Option<NaiveDate>,
}

impl CandidateArticle {
    /// The DOI when the record carries one, otherwise the PubMed ID.
    pub fn identifier(&self) -> ArticleId {
        match &self.doi {
            Some(doi) => ArticleId::Doi(doi.clone()),
            None => ArticleId::Pmid(self.pmid.clone()),
        }
    }
}

/// How the verdict was reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    /// A source published the link itself.
    DirectLink { source: String },
    TitleSearch,
    AuthorSearch,
}

impl From<SearchMode> for Strategy {
    fn from(mode: SearchMode) -> Self {
        match mode {
            SearchMode::Title => Strategy::TitleSearch,
            SearchMode::Author => Strategy::AuthorSearch,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::DirectLink { source } => write!(f, "direct link ({})", source),
            Strategy::TitleSearch => f.write_str("title search"),
            Strategy::AuthorSearch => f.write_str("author search"),
        }
    }
}

/// Stages of the resolution state machine, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    DirectLinkCheck,
    TitleSearch,
    AuthorSearch,
    Verify,
    DateFilter,
    AbstractVerify,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::DirectLinkCheck => "direct link check",
            PipelineStage::TitleSearch => "title search",
            PipelineStage::AuthorSearch => "author search",
            PipelineStage::Verify => "verification",
            PipelineStage::DateFilter => "date filter",
            PipelineStage::AbstractVerify => "abstract verification",
        };
        f.write_str(name)
    }
}

/// Terminal outcome of a resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Matched { article: ArticleId },
    Unmatched,
}

/// The single verdict produced for a preprint.
#[derive(Debug, Clone, Serialize)]
pub struct MatchVerdict {
    pub doi: String,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub strategy: Strategy,
    /// Stage at which the pipeline terminated.
    pub decided_at: PipelineStage,
    /// Abstract similarity of the winning candidate (search matches only).
    pub abstract_similarity: Option<f64>,
}

impl MatchVerdict {
    pub fn matched(
        doi: &str,
        article: ArticleId,
        strategy: Strategy,
        decided_at: PipelineStage,
        abstract_similarity: Option<f64>,
    ) -> Self {
        Self {
            doi: doi.to_string(),
            outcome: Outcome::Matched { article },
            strategy,
            decided_at,
            abstract_similarity,
        }
    }

    pub fn unmatched(doi: &str, strategy: Strategy, decided_at: PipelineStage) -> Self {
        Self {
            doi: doi.to_string(),
            outcome: Outcome::Unmatched,
            strategy,
            decided_at,
            abstract_similarity: None,
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self.outcome, Outcome::Matched { .. })
    }

    /// The matched article, if any.
    pub fn article(&self) -> Option<&ArticleId> {
        match &self.outcome {
            Outcome::Matched { article } => Some(article),
            Outcome::Unmatched => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ResolveError {
    /// An external source could not be checked. Never reported as "no match".
    #[error("{name} query failed: {error}")]
    Source { name: String, error: SourceError },
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error("preprint {doi} has no {field}")]
    MissingField { doi: String, field: &'static str },
    #[error("preprint {doi} is not registered in {source_name}")]
    UnknownPreprint { doi: String, source_name: String },
}

impl ResolveError {
    pub fn source_failure(name: &str, error: SourceError) -> Self {
        ResolveError::Source {
            name: name.to_string(),
            error,
        }
    }
}

/// Coarse status of one batch entry, for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Matched,
    Unmatched,
    Failed,
}

/// Progress events emitted during batch resolution.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started {
        index: usize,
        total: usize,
        doi: String,
    },
    Finished {
        index: usize,
        total: usize,
        doi: String,
        status: BatchStatus,
    },
}

/// Configuration for the resolver.
#[derive(Clone)]
pub struct Config {
    /// Contact address sent to Crossref (raises its rate limit).
    pub crossref_mailto: Option<String>,
    /// Contact address sent to NCBI E-utilities.
    pub ncbi_email: Option<String>,
    pub ncbi_api_key: Option<String>,
    /// Base URL of the text-embeddings inference server.
    pub embedding_url: String,
    /// Model the embedding server is required to serve.
    pub embedding_model: String,
    pub source_timeout_secs: u64,
    pub num_workers: usize,
    /// Direct-link sources to skip (case-insensitive names).
    pub disabled_sources: Vec<String>,
    pub rate_limiters: Arc<RateLimiters>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field(
                "crossref_mailto",
                &self.crossref_mailto.as_ref().map(|_| "***"),
            )
            .field("ncbi_email", &self.ncbi_email.as_ref().map(|_| "***"))
            .field("ncbi_api_key", &self.ncbi_api_key.as_ref().map(|_| "***"))
            .field("embedding_url", &self.embedding_url)
            .field("embedding_model", &self.embedding_model)
            .field("source_timeout_secs", &self.source_timeout_secs)
            .field("num_workers", &self.num_workers)
            .field("disabled_sources", &self.disabled_sources)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crossref_mailto: None,
            ncbi_email: None,
            ncbi_api_key: None,
            embedding_url: "http://localhost:8080".to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            source_timeout_secs: 10,
            num_workers: 4,
            disabled_sources: vec![],
            rate_limiters: Arc::new(RateLimiters::default()),
        }
    }
}

impl Config {
    pub fn source_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.source_timeout_secs)
    }

    pub fn is_disabled(&self, source_name: &str) -> bool {
        self.disabled_sources
            .iter()
            .any(|d| d.eq_ignore_ascii_case(source_name))
    }
}

/// Resolve many preprints concurrently.
///
/// Each preprint runs its own sequential pipeline; results come back in input
/// order. Progress events are emitted via the callback. The operation can be
/// cancelled via the CancellationToken.
pub async fn resolve_preprints(
    requests: Vec<ResolveRequest>,
    resolver: Arc<Resolver>,
    progress: impl Fn(ProgressEvent) + Send + Sync + 'static,
    cancel: CancellationToken,
) -> Vec<ResolveOutcome> {
    pool::resolve_all(requests, resolver, progress, cancel).await
}
