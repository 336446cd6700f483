use crate::authors::{canonicalize_all, compare_author_lists};
use crate::db::{BibliographicSearch, DirectLinkSource, LinkedRecord, PreprintSource};
use crate::rate_limit::call_with_rate_limit;
use crate::retriever::{CandidateRetriever, SearchMode};
use crate::similarity::{
    ABSTRACT_SIMILARITY_THRESHOLD, SimilarityScorer, TITLE_SIMILARITY_THRESHOLD, exceeds,
};
use crate::temporal;
use crate::{
    ArticleId, CandidateArticle, Config, MatchVerdict, PipelineStage, PreprintRecord,
    ResolveError, Server, Strategy,
};
use std::sync::Arc;
use std::time::Duration;

/// The external collaborators a [`Resolver`] talks to.
#[derive(Clone)]
pub struct Backends {
    /// Direct-link sources in priority order.
    pub direct_sources: Vec<Arc<dyn DirectLinkSource>>,
    pub preprint_source: Arc<dyn PreprintSource>,
    pub search: Arc<dyn BibliographicSearch>,
}

impl Backends {
    /// bioRxiv, then Crossref, for direct links; Crossref for preprint
    /// metadata; PubMed for candidate search.
    pub fn from_config(config: &Config) -> Self {
        use crate::db::*;

        let crossref = Arc::new(crossref::CrossRef {
            mailto: config.crossref_mailto.clone(),
        });

        let direct_sources: Vec<Arc<dyn DirectLinkSource>> =
            vec![Arc::new(biorxiv::BioRxiv), crossref.clone()];

        Self {
            direct_sources,
            preprint_source: crossref,
            search: Arc::new(pubmed::PubMed {
                email: config.ncbi_email.clone(),
                api_key: config.ncbi_api_key.clone(),
            }),
        }
    }
}

/// Resolves preprints to their published journal articles.
///
/// Shareable across tasks; every call to [`resolve`](Resolver::resolve) runs
/// its own sequential pipeline and keeps no state between calls.
pub struct Resolver {
    config: Arc<Config>,
    direct_sources: Vec<Arc<dyn DirectLinkSource>>,
    preprint_source: Arc<dyn PreprintSource>,
    retriever: CandidateRetriever,
    scorer: SimilarityScorer,
    client: reqwest::Client,
}

impl Resolver {
    pub fn new(config: Arc<Config>, backends: Backends, scorer: SimilarityScorer) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            config,
            direct_sources: backends.direct_sources,
            preprint_source: backends.preprint_source,
            retriever: CandidateRetriever::new(backends.search),
            scorer,
            client,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolve a preprint known only by DOI.
    ///
    /// Direct links need nothing but the DOI, so they are checked before the
    /// preprint metadata is fetched. When the preprint source is itself one
    /// of the direct-link sources, its lookup and the metadata fetch share a
    /// single request.
    pub async fn resolve_doi(&self, doi: &str, server: Server) -> Result<MatchVerdict, ResolveError> {
        let doi = doi.trim();
        let prefetched = match self.check_direct_links(doi, server, true).await? {
            DirectCheck::Linked(verdict) => return Ok(verdict),
            DirectCheck::Missed { prefetched } => prefetched,
        };

        let preprint = match prefetched {
            Some(record) => record?,
            None => self.fetch_preprint(doi, server).await?,
        };
        preprint.validate()?;
        self.search_and_verify(&preprint).await
    }

    /// Resolve a preprint whose metadata is already at hand.
    pub async fn resolve(&self, preprint: &PreprintRecord) -> Result<MatchVerdict, ResolveError> {
        preprint.validate()?;
        match self.check_direct_links(&preprint.doi, preprint.server, false).await? {
            DirectCheck::Linked(verdict) => Ok(verdict),
            DirectCheck::Missed { .. } => self.search_and_verify(preprint).await,
        }
    }

    /// Fetch preprint metadata from the configured preprint source.
    pub async fn fetch_preprint(
        &self,
        doi: &str,
        server: Server,
    ) -> Result<PreprintRecord, ResolveError> {
        let source = self.preprint_source.as_ref();
        let name = source.name();
        let client = &self.client;
        let timeout = self.config.source_timeout();

        let record = call_with_rate_limit(name, &self.config.rate_limiters, timeout, || {
            source.fetch(doi, server, client, timeout)
        })
        .await
        .map_err(|e| ResolveError::source_failure(name, e))?;

        record.ok_or_else(|| unknown_preprint(doi, name))
    }

    /// Ask each applicable direct-link source in priority order; the first hit wins.
    ///
    /// With `fetch_metadata`, the source shared with the preprint source is
    /// asked through [`PreprintSource::fetch_linked`] and the record it
    /// returns on a miss is handed back.
    async fn check_direct_links(
        &self,
        doi: &str,
        server: Server,
        fetch_metadata: bool,
    ) -> Result<DirectCheck, ResolveError> {
        let client = &self.client;
        let timeout = self.config.source_timeout();
        let shared = self
            .preprint_source
            .links_as()
            .filter(|_| fetch_metadata);
        let mut prefetched = None;

        for source in &self.direct_sources {
            let source = source.as_ref();
            let name = source.name();
            if self.config.is_disabled(name) || !source.applies_to(server) {
                tracing::debug!(doi, source = name, "direct-link source skipped");
                continue;
            }

            let link = if shared == Some(name) {
                let preprint_source = self.preprint_source.as_ref();
                let linked = call_with_rate_limit(name, &self.config.rate_limiters, timeout, || {
                    preprint_source.fetch_linked(doi, server, client, timeout)
                })
                .await
                .map_err(|e| ResolveError::source_failure(name, e))?;

                match linked {
                    Some(LinkedRecord::Journal(journal_doi)) => Some(journal_doi),
                    Some(LinkedRecord::Preprint(record)) => {
                        prefetched = Some(Ok(record));
                        None
                    }
                    None => {
                        prefetched = Some(Err(unknown_preprint(doi, preprint_source.name())));
                        None
                    }
                }
            } else {
                call_with_rate_limit(name, &self.config.rate_limiters, timeout, || {
                    source.lookup(doi, server, client, timeout)
                })
                .await
                .map_err(|e| ResolveError::source_failure(name, e))?
            };

            match link {
                Some(journal_doi) => {
                    tracing::info!(doi, source = name, journal_doi = %journal_doi, "direct link found");
                    return Ok(DirectCheck::Linked(MatchVerdict::matched(
                        doi,
                        ArticleId::Doi(journal_doi),
                        Strategy::DirectLink {
                            source: name.to_string(),
                        },
                        PipelineStage::DirectLinkCheck,
                        None,
                    )));
                }
                None => tracing::debug!(doi, source = name, "no direct link"),
            }
        }
        Ok(DirectCheck::Missed { prefetched })
    }

    /// Retrieval, verification, date filter and abstract check.
    async fn search_and_verify(
        &self,
        preprint: &PreprintRecord,
    ) -> Result<MatchVerdict, ResolveError> {
        let doi = preprint.doi.as_str();

        tracing::debug!(doi, stage = %PipelineStage::TitleSearch, "stage");
        let by_title = self
            .retriever
            .by_title(&preprint.title, &self.client, &self.config)
            .await?;

        let (mode, candidates) = if !by_title.is_empty() {
            (SearchMode::Title, by_title)
        } else {
            tracing::debug!(doi, stage = %PipelineStage::AuthorSearch, "stage");
            let by_author = self
                .retriever
                .by_authors(&preprint.authors, &self.client, &self.config)
                .await?;
            if by_author.is_empty() {
                return Ok(unmatched(doi, Strategy::AuthorSearch, PipelineStage::AuthorSearch));
            }
            (SearchMode::Author, by_author)
        };
        let strategy = Strategy::from(mode);

        tracing::debug!(doi, stage = %PipelineStage::Verify, candidates = candidates.len(), "stage");
        let verified = self.verify(preprint, mode, candidates).await?;
        if verified.is_empty() {
            return Ok(unmatched(doi, strategy, PipelineStage::Verify));
        }

        tracing::debug!(doi, stage = %PipelineStage::DateFilter, candidates = verified.len(), "stage");
        let dated: Vec<CandidateArticle> = verified
            .into_iter()
            .filter(|c| {
                if c.published.is_none() {
                    tracing::debug!(doi, candidate = %c.identifier(), "candidate has no date");
                }
                temporal::passes(preprint.posted, c.published)
            })
            .collect();
        if dated.is_empty() {
            return Ok(unmatched(doi, strategy, PipelineStage::DateFilter));
        }

        tracing::debug!(doi, stage = %PipelineStage::AbstractVerify, candidates = dated.len(), "stage");
        match self.select_by_abstract(preprint, &dated).await? {
            Some((candidate, score)) => {
                let article = candidate.identifier();
                tracing::info!(doi, strategy = %strategy, article = %article, score, "matched");
                Ok(MatchVerdict::matched(
                    doi,
                    article,
                    strategy,
                    PipelineStage::AbstractVerify,
                    Some(score),
                ))
            }
            None => Ok(unmatched(doi, strategy, PipelineStage::AbstractVerify)),
        }
    }

    /// Apply the check complementary to the retrieval key, keeping rank order.
    async fn verify(
        &self,
        preprint: &PreprintRecord,
        mode: SearchMode,
        candidates: Vec<CandidateArticle>,
    ) -> Result<Vec<CandidateArticle>, ResolveError> {
        match mode {
            // Retrieved by title: authors decide
            SearchMode::Title => {
                let preprint_authors = canonicalize_all(&preprint.authors);
                Ok(candidates
                    .into_iter()
                    .filter(|c| {
                        let rule = compare_author_lists(&preprint_authors, &canonicalize_all(&c.authors));
                        tracing::debug!(candidate = %c.identifier(), rule = ?rule, "author check");
                        rule.is_some()
                    })
                    .collect())
            }
            // Retrieved by authors: title similarity decides
            SearchMode::Author => {
                let Some(reference) = self.scorer.embed(&preprint.title).await? else {
                    return Ok(vec![]);
                };
                let mut kept = Vec::new();
                for c in candidates {
                    let Some(title) = c.title.as_deref() else {
                        tracing::debug!(candidate = %c.identifier(), "candidate has no title");
                        continue;
                    };
                    let score = self.scorer.score_against(&reference, title).await?;
                    tracing::debug!(candidate = %c.identifier(), score, "title check");
                    if exceeds(score, TITLE_SIMILARITY_THRESHOLD) {
                        kept.push(c);
                    }
                }
                Ok(kept)
            }
        }
    }

    /// First candidate, in rank order, whose abstract clears the threshold.
    async fn select_by_abstract<'c>(
        &self,
        preprint: &PreprintRecord,
        candidates: &'c [CandidateArticle],
    ) -> Result<Option<(&'c CandidateArticle, f64)>, ResolveError> {
        let Some(reference) = self.scorer.embed(&preprint.abstract_text).await? else {
            tracing::warn!(doi = %preprint.doi, "preprint abstract is blank");
            return Ok(None);
        };

        for c in candidates {
            let Some(abstract_text) = c.abstract_text.as_deref() else {
                tracing::debug!(candidate = %c.identifier(), "candidate has no abstract");
                continue;
            };
            let score = self.scorer.score_against(&reference, abstract_text).await?;
            tracing::debug!(candidate = %c.identifier(), score, "abstract check");
            if exceeds(score, ABSTRACT_SIMILARITY_THRESHOLD) {
                return Ok(Some((c, score)));
            }
        }
        Ok(None)
    }
}

/// Result of the direct-link stage.
enum DirectCheck {
    Linked(MatchVerdict),
    /// No link. Carries the preprint lookup when it was answered on the way.
    Missed {
        prefetched: Option<Result<PreprintRecord, ResolveError>>,
    },
}

fn unknown_preprint(doi: &str, source_name: &str) -> ResolveError {
    ResolveError::UnknownPreprint {
        doi: doi.to_string(),
        source_name: source_name.to_string(),
    }
}

fn unmatched(doi: &str, strategy: Strategy, stage: PipelineStage) -> MatchVerdict {
    tracing::info!(doi, strategy = %strategy, stage = %stage, "unmatched");
    MatchVerdict::unmatched(doi, strategy, stage)
}
