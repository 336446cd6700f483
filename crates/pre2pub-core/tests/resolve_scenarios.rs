//! End-to-end pipeline tests for [`Resolver`] against mock sources.
//!
//! Every collaborator is a mock from `db::mock`, so no HTTP requests are made.
//! Embeddings are table-driven: each text used below is registered with a
//! vector whose cosine against the preprint's vector is known.

use std::sync::Arc;

use chrono::NaiveDate;
use pre2pub_core::db::DirectLinkSource;
use pre2pub_core::db::mock::{
    MockDirectLink, MockEmbedder, MockPreprintSource, MockResponse, MockSearch,
    vector_with_similarity,
};
use pre2pub_core::{
    ArticleId, Backends, CandidateArticle, Config, PipelineStage, PreprintRecord, ResolveError,
    Resolver, Server, SimilarityScorer, Strategy,
};

const PREPRINT_DOI: &str = "10.1101/2020.07.25.20161844";
const TITLE: &str = "Seroprevalence of antibodies in hospital workers";
const ABSTRACT: &str = "We measured antibodies in hospital workers.";

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn preprint() -> PreprintRecord {
    PreprintRecord {
        doi: PREPRINT_DOI.into(),
        title: TITLE.into(),
        authors: vec!["John Smith".into(), "Anna Doe".into(), "Peter Miller".into()],
        abstract_text: ABSTRACT.into(),
        posted: date(2020, 7, 25),
        server: Server::Medrxiv,
    }
}

fn same_authors() -> Vec<String> {
    vec!["Smith J".into(), "Doe A".into(), "Miller P".into()]
}

fn other_authors() -> Vec<String> {
    vec!["Roe R".into(), "Chan K".into()]
}

fn candidate(pmid: &str, title: &str, authors: Vec<String>, abstract_text: &str) -> CandidateArticle {
    CandidateArticle {
        pmid: pmid.into(),
        doi: Some(format!("10.1000/{}", pmid)),
        title: Some(title.into()),
        authors,
        abstract_text: Some(abstract_text.into()),
        published: Some(date(2020, 10, 1)),
    }
}

/// Embedder knowing the preprint title and abstract as `[1, 0]`.
fn embedder() -> MockEmbedder {
    MockEmbedder::new()
        .with(TITLE, vec![1.0, 0.0])
        .with(ABSTRACT, vec![1.0, 0.0])
}

struct Harness {
    direct: Vec<Arc<MockDirectLink>>,
    preprints: Arc<MockPreprintSource>,
    search: Arc<MockSearch>,
    embedder: Arc<MockEmbedder>,
    resolver: Resolver,
}

fn harness_with(
    config: Config,
    direct: Vec<MockDirectLink>,
    search: MockSearch,
    embedder: MockEmbedder,
) -> Harness {
    let preprints = MockPreprintSource::new(vec![preprint()]);
    harness_full(config, direct, preprints, search, embedder)
}

fn harness_full(
    config: Config,
    direct: Vec<MockDirectLink>,
    preprints: MockPreprintSource,
    search: MockSearch,
    embedder: MockEmbedder,
) -> Harness {
    let direct: Vec<Arc<MockDirectLink>> = direct.into_iter().map(Arc::new).collect();
    let preprints = Arc::new(preprints);
    let search = Arc::new(search);
    let embedder = Arc::new(embedder);

    let backends = Backends {
        direct_sources: direct
            .iter()
            .map(|d| d.clone() as Arc<dyn DirectLinkSource>)
            .collect(),
        preprint_source: preprints.clone(),
        search: search.clone(),
    };
    let resolver = Resolver::new(
        Arc::new(config),
        backends,
        SimilarityScorer::new(embedder.clone()),
    );

    Harness {
        direct,
        preprints,
        search,
        embedder,
        resolver,
    }
}

fn no_direct_links() -> Vec<MockDirectLink> {
    vec![
        MockDirectLink::miss("MockRxiv").rxiv_only(),
        MockDirectLink::miss("MockCrossref"),
    ]
}

fn harness(search: MockSearch, embedder: MockEmbedder) -> Harness {
    harness_with(Config::default(), no_direct_links(), search, embedder)
}

// ── Direct links ───────────────────────────────────────────────────────

#[tokio::test]
async fn direct_link_short_circuits_pipeline() {
    let h = harness_with(
        Config::default(),
        vec![
            MockDirectLink::hit("MockRxiv", "10.1016/j.jcv.2020.104388").rxiv_only(),
            MockDirectLink::miss("MockCrossref"),
        ],
        MockSearch::new(vec![candidate("1", TITLE, same_authors(), ABSTRACT)], vec![]),
        embedder(),
    );

    let verdict = h.resolver.resolve_doi(PREPRINT_DOI, Server::Medrxiv).await.unwrap();

    assert_eq!(
        verdict.article(),
        Some(&ArticleId::Doi("10.1016/j.jcv.2020.104388".into()))
    );
    assert_eq!(
        verdict.strategy,
        Strategy::DirectLink {
            source: "MockRxiv".into()
        }
    );
    assert_eq!(verdict.decided_at, PipelineStage::DirectLinkCheck);
    assert_eq!(h.direct[1].call_count(), 0, "Crossref must not be asked");
    assert_eq!(h.preprints.call_count(), 0, "metadata must not be fetched");
    assert_eq!(h.search.total_calls(), 0, "retriever must not run");
    assert_eq!(h.embedder.call_count(), 0, "scorer must not run");
}

#[tokio::test]
async fn crossref_link_used_when_rxiv_misses() {
    let h = harness_with(
        Config::default(),
        vec![
            MockDirectLink::miss("MockRxiv").rxiv_only(),
            MockDirectLink::hit("MockCrossref", "10.3390/jcm9020538"),
        ],
        MockSearch::empty(),
        embedder(),
    );

    let verdict = h.resolver.resolve(&preprint()).await.unwrap();

    assert_eq!(verdict.article(), Some(&ArticleId::Doi("10.3390/jcm9020538".into())));
    assert_eq!(
        verdict.strategy,
        Strategy::DirectLink {
            source: "MockCrossref".into()
        }
    );
    assert_eq!(h.direct[0].call_count(), 1);
    assert_eq!(h.search.total_calls(), 0);
}

#[tokio::test]
async fn rxiv_source_skipped_for_other_servers() {
    let h = harness(MockSearch::empty(), embedder());
    let mut p = preprint();
    p.server = Server::Other;

    h.resolver.resolve(&p).await.unwrap();

    assert_eq!(h.direct[0].call_count(), 0);
    assert_eq!(h.direct[1].call_count(), 1);
}

#[tokio::test]
async fn disabled_source_is_not_queried() {
    let config = Config {
        disabled_sources: vec!["mockcrossref".into()],
        ..Config::default()
    };
    let h = harness_with(config, no_direct_links(), MockSearch::empty(), embedder());

    h.resolver.resolve(&preprint()).await.unwrap();

    assert_eq!(h.direct[0].call_count(), 1);
    assert_eq!(h.direct[1].call_count(), 0);
}

// ── Retrieval strategy ─────────────────────────────────────────────────

#[tokio::test]
async fn author_search_verifies_by_title_embedding() {
    let unrelated = "Outcomes of a cardiology trial";
    let matching = "Seroprevalence of antibodies among hospital staff";
    let serology = "Serology of health care staff";
    let matching_abstract = "Antibody levels were measured in hospital staff.";

    // Authors deliberately differ: only the title check may be applied here
    let search = MockSearch::new(
        vec![],
        vec![
            candidate("1", unrelated, other_authors(), "Heart failure outcomes."),
            candidate("2", matching, other_authors(), matching_abstract),
            candidate("3", serology, other_authors(), "Serology in staff."),
        ],
    );
    let model = embedder()
        .with(unrelated, vector_with_similarity(0.5))
        .with(matching, vector_with_similarity(0.97))
        .with(serology, vector_with_similarity(0.2))
        .with(matching_abstract, vector_with_similarity(0.96));
    let h = harness(search, model);

    let verdict = h.resolver.resolve(&preprint()).await.unwrap();

    assert_eq!(verdict.strategy, Strategy::AuthorSearch);
    assert_eq!(verdict.decided_at, PipelineStage::AbstractVerify);
    assert_eq!(verdict.article(), Some(&ArticleId::Doi("10.1000/2".into())));
    let score = verdict.abstract_similarity.unwrap();
    assert!((score - 0.96).abs() < 1e-4, "score {score}");

    assert_eq!(h.search.title_calls(), 1);
    assert_eq!(h.search.author_calls(), 1);
    let seen = h.embedder.seen_texts();
    assert!(seen.contains(&"outcomes cardiology trial".to_string()));
    assert!(seen.contains(&"serology health care staff".to_string()));
}

#[tokio::test]
async fn title_search_verifies_by_authors() {
    let search = MockSearch::new(
        vec![candidate("1", "Anything at all", same_authors(), ABSTRACT)],
        vec![],
    );
    let h = harness(search, embedder());

    let verdict = h.resolver.resolve(&preprint()).await.unwrap();

    assert_eq!(verdict.strategy, Strategy::TitleSearch);
    assert!(verdict.is_matched());
    assert_eq!(h.search.author_calls(), 0);
    // Only the abstracts were embedded, never a title
    assert!(!h.embedder.seen_texts().contains(&"anything".to_string()));
    assert_eq!(h.embedder.call_count(), 2);
}

#[tokio::test]
async fn no_candidates_anywhere_is_unmatched() {
    let h = harness(MockSearch::empty(), embedder());

    let verdict = h.resolver.resolve(&preprint()).await.unwrap();

    assert!(!verdict.is_matched());
    assert_eq!(verdict.strategy, Strategy::AuthorSearch);
    assert_eq!(verdict.decided_at, PipelineStage::AuthorSearch);
    assert_eq!(h.embedder.call_count(), 0);
}

#[tokio::test]
async fn failed_author_check_is_unmatched_at_verify() {
    let search = MockSearch::new(
        vec![candidate("1", TITLE, other_authors(), ABSTRACT)],
        vec![],
    );
    let h = harness(search, embedder());

    let verdict = h.resolver.resolve(&preprint()).await.unwrap();

    assert!(!verdict.is_matched());
    assert_eq!(verdict.decided_at, PipelineStage::Verify);
}

// ── Date filter ────────────────────────────────────────────────────────

#[tokio::test]
async fn same_day_candidate_dropped_at_date_filter() {
    let mut c = candidate("1", TITLE, other_authors(), ABSTRACT);
    c.published = Some(preprint().posted);
    let h = harness(MockSearch::new(vec![], vec![c]), embedder());

    let verdict = h.resolver.resolve(&preprint()).await.unwrap();

    assert!(!verdict.is_matched());
    assert_eq!(verdict.strategy, Strategy::AuthorSearch);
    assert_eq!(verdict.decided_at, PipelineStage::DateFilter);
    // Both titles embedded, abstracts never reached
    assert_eq!(h.embedder.call_count(), 2);
}

#[tokio::test]
async fn undated_candidate_fails_date_filter() {
    let mut c = candidate("1", "Title", same_authors(), ABSTRACT);
    c.published = None;
    let h = harness(MockSearch::new(vec![c], vec![]), embedder());

    let verdict = h.resolver.resolve(&preprint()).await.unwrap();

    assert_eq!(verdict.decided_at, PipelineStage::DateFilter);
}

// ── Abstract verification ──────────────────────────────────────────────

#[tokio::test]
async fn third_ranked_candidate_wins_when_only_it_clears_every_gate() {
    let abstracts: Vec<String> = (1..=5).map(|i| format!("Abstract number {}", "x".repeat(i))).collect();
    let mut candidates: Vec<CandidateArticle> = abstracts
        .iter()
        .enumerate()
        .map(|(i, a)| candidate(&(i + 1).to_string(), "Title", other_authors(), a))
        .collect();
    candidates[2].authors = same_authors();

    let mut model = embedder();
    for (i, a) in abstracts.iter().enumerate() {
        let sim = if i == 2 { 0.96 } else { 0.99 };
        model = model.with(a, vector_with_similarity(sim));
    }
    let h = harness(MockSearch::new(candidates, vec![]), model);

    let verdict = h.resolver.resolve(&preprint()).await.unwrap();

    assert_eq!(verdict.strategy, Strategy::TitleSearch);
    assert_eq!(verdict.article(), Some(&ArticleId::Doi("10.1000/3".into())));
}

#[tokio::test]
async fn first_in_rank_order_wins_over_higher_score() {
    let (a1, a2) = ("First abstract", "Second abstract");
    let search = MockSearch::new(
        vec![
            candidate("1", "T", same_authors(), a1),
            candidate("2", "T", same_authors(), a2),
        ],
        vec![],
    );
    let model = embedder()
        .with(a1, vector_with_similarity(0.96))
        .with(a2, vector_with_similarity(0.999));
    let h = harness(search, model);

    let verdict = h.resolver.resolve(&preprint()).await.unwrap();

    assert_eq!(verdict.article(), Some(&ArticleId::Doi("10.1000/1".into())));
}

#[tokio::test]
async fn low_abstract_similarity_is_unmatched() {
    let a = "Some different abstract";
    let search = MockSearch::new(vec![candidate("1", "T", same_authors(), a)], vec![]);
    let h = harness(search, embedder().with(a, vector_with_similarity(0.94)));

    let verdict = h.resolver.resolve(&preprint()).await.unwrap();

    assert!(!verdict.is_matched());
    assert_eq!(verdict.decided_at, PipelineStage::AbstractVerify);
}

#[tokio::test]
async fn candidate_without_abstract_is_skipped() {
    let mut no_abstract = candidate("1", "T", same_authors(), "");
    no_abstract.abstract_text = None;
    let search = MockSearch::new(
        vec![no_abstract, candidate("2", "T", same_authors(), ABSTRACT)],
        vec![],
    );
    let h = harness(search, embedder());

    let verdict = h.resolver.resolve(&preprint()).await.unwrap();

    assert_eq!(verdict.article(), Some(&ArticleId::Doi("10.1000/2".into())));
}

#[tokio::test]
async fn pmid_used_when_candidate_has_no_doi() {
    let mut c = candidate("32781258", "T", same_authors(), ABSTRACT);
    c.doi = None;
    let h = harness(MockSearch::new(vec![c], vec![]), embedder());

    let verdict = h.resolver.resolve(&preprint()).await.unwrap();

    assert_eq!(verdict.article(), Some(&ArticleId::Pmid("32781258".into())));
}

// ── Errors ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn search_failure_is_surfaced_not_unmatched() {
    let search = MockSearch::with_responses(
        MockResponse::Found(vec![]),
        MockResponse::Error("connection reset".into()),
    );
    let h = harness(search, embedder());

    let err = h.resolver.resolve(&preprint()).await.unwrap_err();

    assert!(matches!(err, ResolveError::Source { ref name, .. } if name == "MockSearch"));
}

#[tokio::test]
async fn direct_link_failure_is_surfaced() {
    let h = harness_with(
        Config::default(),
        vec![MockDirectLink::new(
            "MockCrossref",
            MockResponse::Error("timeout".into()),
        )],
        MockSearch::empty(),
        embedder(),
    );

    let err = h.resolver.resolve(&preprint()).await.unwrap_err();

    assert!(matches!(err, ResolveError::Source { ref name, .. } if name == "MockCrossref"));
    assert_eq!(h.search.total_calls(), 0);
}

#[tokio::test]
async fn embedding_failure_is_surfaced() {
    let search = MockSearch::new(vec![candidate("1", "T", same_authors(), ABSTRACT)], vec![]);
    let h = harness(search, MockEmbedder::failing());

    let err = h.resolver.resolve(&preprint()).await.unwrap_err();

    assert!(matches!(err, ResolveError::Embedding(_)));
}

#[tokio::test]
async fn missing_abstract_rejected_before_any_stage() {
    let h = harness(MockSearch::empty(), embedder());
    let mut p = preprint();
    p.abstract_text = String::new();

    let err = h.resolver.resolve(&p).await.unwrap_err();

    assert!(matches!(err, ResolveError::MissingField { field: "abstract", .. }));
    assert!(h.direct.iter().all(|d| d.call_count() == 0));
    assert_eq!(h.search.total_calls(), 0);
}

#[tokio::test]
async fn resolve_doi_fetches_metadata_then_searches() {
    let search = MockSearch::new(vec![candidate("1", "T", same_authors(), ABSTRACT)], vec![]);
    let h = harness(search, embedder());

    let verdict = h.resolver.resolve_doi(PREPRINT_DOI, Server::Medrxiv).await.unwrap();

    assert!(verdict.is_matched());
    assert_eq!(h.preprints.call_count(), 1);
    assert_eq!(h.search.title_queries(), vec!["Seroprevalence antibodies hospital workers"]);
}

#[tokio::test]
async fn unknown_preprint_doi_is_an_error() {
    let h = harness(MockSearch::empty(), embedder());

    let err = h
        .resolver
        .resolve_doi("10.1101/unknown", Server::Biorxiv)
        .await
        .unwrap_err();

    assert!(matches!(err, ResolveError::UnknownPreprint { .. }));
}

// ── Shared preprint and direct-link source ─────────────────────────────

fn linking_preprints() -> MockPreprintSource {
    MockPreprintSource::new(vec![preprint()]).linking_as("MockCrossref")
}

#[tokio::test]
async fn shared_source_answers_link_and_metadata_in_one_request() {
    let search = MockSearch::new(vec![candidate("1", "T", same_authors(), ABSTRACT)], vec![]);
    let h = harness_full(
        Config::default(),
        no_direct_links(),
        linking_preprints(),
        search,
        embedder(),
    );

    let verdict = h.resolver.resolve_doi(PREPRINT_DOI, Server::Medrxiv).await.unwrap();

    assert!(verdict.is_matched());
    assert_eq!(verdict.strategy, Strategy::TitleSearch);
    assert_eq!(h.preprints.call_count(), 1);
    assert_eq!(h.direct[0].call_count(), 1);
    assert_eq!(h.direct[1].call_count(), 0, "lookup answered by the preprint fetch");
}

#[tokio::test]
async fn shared_source_link_short_circuits() {
    let h = harness_full(
        Config::default(),
        no_direct_links(),
        linking_preprints().with_link(PREPRINT_DOI, "10.1000/journal"),
        MockSearch::empty(),
        embedder(),
    );

    let verdict = h.resolver.resolve_doi(PREPRINT_DOI, Server::Medrxiv).await.unwrap();

    assert_eq!(verdict.article(), Some(&ArticleId::Doi("10.1000/journal".into())));
    assert_eq!(
        verdict.strategy,
        Strategy::DirectLink {
            source: "MockCrossref".into()
        }
    );
    assert_eq!(h.preprints.call_count(), 1);
    assert_eq!(h.search.total_calls(), 0);
}

#[tokio::test]
async fn shared_source_unknown_doi_fetched_once() {
    let h = harness_full(
        Config::default(),
        no_direct_links(),
        linking_preprints(),
        MockSearch::empty(),
        embedder(),
    );

    let err = h
        .resolver
        .resolve_doi("10.1101/unknown", Server::Other)
        .await
        .unwrap_err();

    assert!(matches!(err, ResolveError::UnknownPreprint { .. }));
    assert_eq!(h.preprints.call_count(), 1);
}

#[tokio::test]
async fn resolve_with_record_uses_plain_lookup() {
    let h = harness_full(
        Config::default(),
        no_direct_links(),
        linking_preprints(),
        MockSearch::empty(),
        embedder(),
    );

    h.resolver.resolve(&preprint()).await.unwrap();

    assert_eq!(h.preprints.call_count(), 0);
    assert_eq!(h.direct[1].call_count(), 1);
}

// ── Text that cleans to nothing ────────────────────────────────────────

#[tokio::test]
async fn stopword_only_title_is_still_verified() {
    let mut p = preprint();
    p.title = "The".into();
    let search = MockSearch::new(
        vec![],
        vec![candidate("1", "The", other_authors(), ABSTRACT)],
    );
    let h = harness(search, embedder());

    let verdict = h.resolver.resolve(&p).await.unwrap();

    assert_eq!(verdict.strategy, Strategy::AuthorSearch);
    assert_eq!(verdict.article(), Some(&ArticleId::Doi("10.1000/1".into())));
    assert_eq!(h.search.title_queries(), vec!["The"]);
}
