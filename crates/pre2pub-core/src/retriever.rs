use std::sync::Arc;

use serde::Serialize;

use crate::db::BibliographicSearch;
use crate::matching::strip_stopwords;
use crate::rate_limit::call_with_rate_limit;
use crate::{CandidateArticle, Config, ResolveError};

/// Upper bound on candidates per search. Keeps false positives in check.
pub const MAX_CANDIDATES: usize = 5;

/// Which field the candidates were retrieved by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Title,
    Author,
}

/// Title and author retrieval against the bibliographic database.
#[derive(Clone)]
pub struct CandidateRetriever {
    search: Arc<dyn BibliographicSearch>,
}

impl CandidateRetriever {
    pub fn new(search: Arc<dyn BibliographicSearch>) -> Self {
        Self { search }
    }

    /// Search by the stopword-stripped title.
    ///
    /// A title made only of stopwords is searched as written.
    pub async fn by_title(
        &self,
        title: &str,
        client: &reqwest::Client,
        config: &Config,
    ) -> Result<Vec<CandidateArticle>, ResolveError> {
        let stripped = strip_stopwords(title);
        let query = if stripped.is_empty() {
            title.trim()
        } else {
            stripped.as_str()
        };
        if query.is_empty() {
            return Ok(vec![]);
        }

        let search = self.search.as_ref();
        let timeout = config.source_timeout();
        let result = call_with_rate_limit(search.name(), &config.rate_limiters, timeout, || {
            search.search_by_title(query, MAX_CANDIDATES, client, timeout)
        })
        .await;

        self.finish(SearchMode::Title, result)
    }

    /// Search by the preprint's author list.
    pub async fn by_authors(
        &self,
        authors: &[String],
        client: &reqwest::Client,
        config: &Config,
    ) -> Result<Vec<CandidateArticle>, ResolveError> {
        if authors.iter().all(|a| a.trim().is_empty()) {
            return Ok(vec![]);
        }

        let search = self.search.as_ref();
        let timeout = config.source_timeout();
        let result = call_with_rate_limit(search.name(), &config.rate_limiters, timeout, || {
            search.search_by_author(authors, MAX_CANDIDATES, client, timeout)
        })
        .await;

        self.finish(SearchMode::Author, result)
    }

    fn finish(
        &self,
        mode: SearchMode,
        result: Result<Vec<CandidateArticle>, crate::SourceError>,
    ) -> Result<Vec<CandidateArticle>, ResolveError> {
        let mut candidates =
            result.map_err(|e| ResolveError::source_failure(self.search.name(), e))?;
        candidates.truncate(MAX_CANDIDATES);
        tracing::debug!(
            source = self.search.name(),
            mode = ?mode,
            candidates = candidates.len(),
            "candidate retrieval"
        );
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock::{MockResponse, MockSearch};

    fn candidates(n: usize) -> Vec<CandidateArticle> {
        (0..n)
            .map(|i| CandidateArticle {
                pmid: i.to_string(),
                ..Default::default()
            })
            .collect()
    }

    #[tokio::test]
    async fn title_search_strips_stopwords_and_caps_limit() {
        let search = Arc::new(MockSearch::new(candidates(8), vec![]));
        let retriever = CandidateRetriever::new(search.clone());
        let client = reqwest::Client::new();
        let found = retriever
            .by_title("The impact of masks on the spread", &client, &Config::default())
            .await
            .unwrap();

        assert_eq!(found.len(), MAX_CANDIDATES);
        assert_eq!(found[0].pmid, "0");
        assert_eq!(search.title_queries(), vec!["The impact masks spread"]);
        assert_eq!(search.limits(), vec![MAX_CANDIDATES]);
        assert_eq!(search.author_calls(), 0);
    }

    #[tokio::test]
    async fn stopword_only_title_is_searched_as_written() {
        let search = Arc::new(MockSearch::empty());
        let retriever = CandidateRetriever::new(search.clone());
        let client = reqwest::Client::new();
        retriever
            .by_title("what is this", &client, &Config::default())
            .await
            .unwrap();
        assert_eq!(search.title_queries(), vec!["what is this"]);
    }

    #[tokio::test]
    async fn empty_result_is_not_an_error() {
        let search = Arc::new(MockSearch::empty());
        let retriever = CandidateRetriever::new(search);
        let client = reqwest::Client::new();
        let found = retriever
            .by_authors(&["Smith J".into()], &client, &Config::default())
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn source_failure_is_surfaced() {
        let search = Arc::new(MockSearch::with_responses(
            MockResponse::Error("connection reset".into()),
            MockResponse::Found(vec![]),
        ));
        let retriever = CandidateRetriever::new(search);
        let client = reqwest::Client::new();
        let err = retriever
            .by_title("Masks", &client, &Config::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Source { ref name, .. } if name == "MockSearch"));
    }
}
