mod helpers;

use helpers::{test_config, test_db, write_transcript, StubProvider};
use tacit::extract::rules::RuleExtractor;
use tacit::ingest::extract_session;
use tacit::retrieval::recall;

#[test]
fn recall_never_crosses_project_boundaries() {
    let mut conn = test_db();
    let config = test_config();
    let provider = StubProvider::new();
    let dir = tempfile::tempdir().unwrap();

    let t1 = write_transcript(
        &dir,
        "a.jsonl",
        &["The deploy script lives at infra/deploy.sh."],
    );
    let t2 = write_transcript(
        &dir,
        "b.jsonl",
        &["The deploy script lives at tools/deploy.sh today."],
    );

    extract_session(&mut conn, &provider, &RuleExtractor, &t1, "alpha", "s1", &config).unwrap();
    extract_session(&mut conn, &provider, &RuleExtractor, &t2, "beta", "s1", &config).unwrap();

    let response =
        recall(&conn, &provider, "alpha", "deploy script", 10, &config.retrieval).unwrap();
    assert!(!response.hits.is_empty());
    for hit in &response.hits {
        assert_eq!(hit.fact.project_id, "alpha");
        assert!(hit.fact.text.contains("infra/deploy.sh"));
    }

    let response =
        recall(&conn, &provider, "beta", "deploy script", 10, &config.retrieval).unwrap();
    assert!(!response.hits.is_empty());
    for hit in &response.hits {
        assert_eq!(hit.fact.project_id, "beta");
    }

    // A project with no facts gets an empty result, not someone else's
    let response =
        recall(&conn, &provider, "gamma", "deploy script", 10, &config.retrieval).unwrap();
    assert!(response.hits.is_empty());
}

#[test]
fn identical_statements_in_two_projects_stay_separate() {
    let mut conn = test_db();
    let config = test_config();
    let provider = StubProvider::new();
    let dir = tempfile::tempdir().unwrap();

    let t = write_transcript(
        &dir,
        "same.jsonl",
        &["We decided to use sqlite for local storage."],
    );

    let r1 =
        extract_session(&mut conn, &provider, &RuleExtractor, &t, "alpha", "s1", &config).unwrap();
    let r2 =
        extract_session(&mut conn, &provider, &RuleExtractor, &t, "beta", "s1", &config).unwrap();
    assert_eq!(r1.facts_added, 1);
    // Same text, different project: stored again, not deduplicated away
    assert_eq!(r2.facts_added, 1);
    assert_eq!(r2.skipped_duplicates, 0);
}
