//! Mock sources and embedding model for testing.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{BibliographicSearch, DirectLinkSource, LinkedRecord, PreprintSource, SourceFuture};
use crate::embedding::{EmbeddingError, EmbeddingFuture, EmbeddingModel};
use crate::matching::prepare_for_embedding;
use crate::rate_limit::SourceError;
use crate::{CandidateArticle, PreprintRecord, Server};

/// A configurable mock response for a source call.
#[derive(Clone, Debug)]
pub enum MockResponse<T> {
    Found(T),
    /// Simulate a 429 rate-limit response.
    RateLimited { retry_after: Option<Duration> },
    /// Simulate a transport failure.
    Error(String),
}

impl<T: Clone> MockResponse<T> {
    fn to_result(&self) -> Result<T, SourceError> {
        match self {
            MockResponse::Found(v) => Ok(v.clone()),
            MockResponse::RateLimited { retry_after } => Err(SourceError::RateLimited {
                retry_after: *retry_after,
            }),
            MockResponse::Error(msg) => Err(SourceError::Other(msg.clone())),
        }
    }
}

/// Mock [`DirectLinkSource`] returning a fixed link (or miss).
pub struct MockDirectLink {
    name: &'static str,
    response: MockResponse<Option<String>>,
    applies_to_other: bool,
    call_count: AtomicUsize,
}

impl MockDirectLink {
    /// A source that applies to every server.
    pub fn new(name: &'static str, response: MockResponse<Option<String>>) -> Self {
        Self {
            name,
            response,
            applies_to_other: true,
            call_count: AtomicUsize::new(0),
        }
    }

    /// A source that, like bioRxiv, only knows biorxiv/medrxiv preprints.
    pub fn rxiv_only(mut self) -> Self {
        self.applies_to_other = false;
        self
    }

    pub fn miss(name: &'static str) -> Self {
        Self::new(name, MockResponse::Found(None))
    }

    pub fn hit(name: &'static str, journal_doi: &str) -> Self {
        Self::new(name, MockResponse::Found(Some(journal_doi.to_string())))
    }

    /// How many times `lookup()` has been called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

impl DirectLinkSource for MockDirectLink {
    fn name(&self) -> &str {
        self.name
    }

    fn applies_to(&self, server: Server) -> bool {
        self.applies_to_other || server.has_direct_link_api()
    }

    fn lookup<'a>(
        &'a self,
        _doi: &'a str,
        _server: Server,
        _client: &'a reqwest::Client,
        _timeout: Duration,
    ) -> SourceFuture<'a, Option<String>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let result = self.response.to_result();
        Box::pin(async move { result })
    }
}

/// Mock [`BibliographicSearch`] with separate title and author results.
///
/// Records every query so tests can assert which search mode ran.
pub struct MockSearch {
    by_title: MockResponse<Vec<CandidateArticle>>,
    by_author: MockResponse<Vec<CandidateArticle>>,
    title_calls: AtomicUsize,
    author_calls: AtomicUsize,
    title_queries: Mutex<Vec<String>>,
    limits: Mutex<Vec<usize>>,
}

impl MockSearch {
    pub fn new(by_title: Vec<CandidateArticle>, by_author: Vec<CandidateArticle>) -> Self {
        Self::with_responses(MockResponse::Found(by_title), MockResponse::Found(by_author))
    }

    pub fn with_responses(
        by_title: MockResponse<Vec<CandidateArticle>>,
        by_author: MockResponse<Vec<CandidateArticle>>,
    ) -> Self {
        Self {
            by_title,
            by_author,
            title_calls: AtomicUsize::new(0),
            author_calls: AtomicUsize::new(0),
            title_queries: Mutex::new(Vec::new()),
            limits: Mutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self::new(vec![], vec![])
    }

    pub fn title_calls(&self) -> usize {
        self.title_calls.load(Ordering::SeqCst)
    }

    pub fn author_calls(&self) -> usize {
        self.author_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.title_calls() + self.author_calls()
    }

    /// Title strings passed to `search_by_title`, in call order.
    pub fn title_queries(&self) -> Vec<String> {
        self.title_queries.lock().unwrap().clone()
    }

    /// `limit` arguments of every call, in call order.
    pub fn limits(&self) -> Vec<usize> {
        self.limits.lock().unwrap().clone()
    }

    fn answer(
        &self,
        response: &MockResponse<Vec<CandidateArticle>>,
        limit: usize,
    ) -> Result<Vec<CandidateArticle>, SourceError> {
        self.limits.lock().unwrap().push(limit);
        response.to_result()
    }
}

impl BibliographicSearch for MockSearch {
    fn name(&self) -> &str {
        "MockSearch"
    }

    fn search_by_title<'a>(
        &'a self,
        title: &'a str,
        limit: usize,
        _client: &'a reqwest::Client,
        _timeout: Duration,
    ) -> SourceFuture<'a, Vec<CandidateArticle>> {
        self.title_calls.fetch_add(1, Ordering::SeqCst);
        self.title_queries.lock().unwrap().push(title.to_string());
        let result = self.answer(&self.by_title, limit);
        Box::pin(async move { result })
    }

    fn search_by_author<'a>(
        &'a self,
        _authors: &'a [String],
        limit: usize,
        _client: &'a reqwest::Client,
        _timeout: Duration,
    ) -> SourceFuture<'a, Vec<CandidateArticle>> {
        self.author_calls.fetch_add(1, Ordering::SeqCst);
        let result = self.answer(&self.by_author, limit);
        Box::pin(async move { result })
    }
}

/// Mock [`PreprintSource`] serving records from a map keyed by DOI.
#[derive(Default)]
pub struct MockPreprintSource {
    records: HashMap<String, PreprintRecord>,
    failing: HashMap<String, String>,
    links_as: Option<String>,
    links: HashMap<String, String>,
    call_count: AtomicUsize,
}

impl MockPreprintSource {
    pub fn new(records: Vec<PreprintRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.doi.clone(), r)).collect(),
            ..Default::default()
        }
    }

    /// Make lookups of `doi` fail with a transport error.
    pub fn failing_for(mut self, doi: &str, message: &str) -> Self {
        self.failing.insert(doi.to_string(), message.to_string());
        self
    }

    /// Also answer lookups for the direct-link source called `name`.
    pub fn linking_as(mut self, name: &str) -> Self {
        self.links_as = Some(name.to_string());
        self
    }

    /// Link `doi` to `journal_doi` in [`fetch_linked`](PreprintSource::fetch_linked).
    pub fn with_link(mut self, doi: &str, journal_doi: &str) -> Self {
        self.links.insert(doi.to_string(), journal_doi.to_string());
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    fn record_for(&self, doi: &str) -> Result<Option<PreprintRecord>, SourceError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        match self.failing.get(doi) {
            Some(msg) => Err(SourceError::Other(msg.clone())),
            None => Ok(self.records.get(doi).cloned()),
        }
    }
}

impl PreprintSource for MockPreprintSource {
    fn name(&self) -> &str {
        "MockPreprints"
    }

    fn fetch<'a>(
        &'a self,
        doi: &'a str,
        _server: Server,
        _client: &'a reqwest::Client,
        _timeout: Duration,
    ) -> SourceFuture<'a, Option<PreprintRecord>> {
        let result = self.record_for(doi);
        Box::pin(async move { result })
    }

    fn links_as(&self) -> Option<&str> {
        self.links_as.as_deref()
    }

    fn fetch_linked<'a>(
        &'a self,
        doi: &'a str,
        _server: Server,
        _client: &'a reqwest::Client,
        _timeout: Duration,
    ) -> SourceFuture<'a, Option<LinkedRecord>> {
        let result = self.record_for(doi).map(|record| match self.links.get(doi) {
            Some(journal_doi) => Some(LinkedRecord::Journal(journal_doi.clone())),
            None => record.map(LinkedRecord::Preprint),
        });
        Box::pin(async move { result })
    }
}

/// Table-driven mock embedding model.
///
/// Texts registered with [`with`](MockEmbedder::with) return their vector;
/// any other text gets a deterministic 26-dimensional letter histogram, so
/// identical texts always embed identically.
pub struct MockEmbedder {
    table: HashMap<String, Vec<f32>>,
    fail: bool,
    call_count: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
            fail: false,
            call_count: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Register the vector for `text`. The key is cleaned the same way the
    /// scorer cleans its input, so raw titles and abstracts can be used.
    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        let prepared = prepare_for_embedding(text);
        let key = if prepared.is_empty() {
            text.trim().to_string()
        } else {
            prepared
        };
        self.table.insert(key, vector);
        self
    }

    /// Every call fails with an inference error.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Texts received by `embed()`, in call order.
    pub fn seen_texts(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    fn letter_histogram(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; 26];
        for c in text.chars().filter(|c| c.is_ascii_lowercase()) {
            v[(c as u8 - b'a') as usize] += 1.0;
        }
        v
    }
}

/// Two-dimensional unit vector whose cosine with `[1, 0]` is `similarity`.
pub fn vector_with_similarity(similarity: f32) -> Vec<f32> {
    vec![similarity, (1.0 - similarity * similarity).max(0.0).sqrt()]
}

impl EmbeddingModel for MockEmbedder {
    fn embed<'a>(&'a self, text: &'a str) -> EmbeddingFuture<'a> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(text.to_string());
        let result = if self.fail {
            Err(EmbeddingError::Inference("mock failure".into()))
        } else {
            Ok(self
                .table
                .get(text)
                .cloned()
                .unwrap_or_else(|| Self::letter_histogram(text)))
        };
        Box::pin(async move { result })
    }
}
