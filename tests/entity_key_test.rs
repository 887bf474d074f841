mod helpers;

use helpers::{test_config, test_db, write_transcript, StubProvider};
use tacit::extract::rules::RuleExtractor;
use tacit::ingest::extract_session;

#[test]
fn restatements_across_sessions_share_one_entity() {
    let mut conn = test_db();
    let config = test_config();
    let provider = StubProvider::new();
    let dir = tempfile::tempdir().unwrap();

    let t1 = write_transcript(
        &dir,
        "s1.jsonl",
        &["The deploy script lives at infra/deploy.sh."],
    );
    let t2 = write_transcript(
        &dir,
        "s2.jsonl",
        &["The   Deploy   Script lives at infra/run.sh today."],
    );

    extract_session(&mut conn, &provider, &RuleExtractor, &t1, "proj", "s1", &config).unwrap();
    extract_session(&mut conn, &provider, &RuleExtractor, &t2, "proj", "s2", &config).unwrap();

    let (count, mentions): (i64, i64) = conn
        .query_row(
            "SELECT COUNT(*), MAX(mention_count) FROM entities \
             WHERE project_id = 'proj' AND name_norm = 'deploy script'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(count, 1, "case/whitespace variants must share one entity");
    assert_eq!(mentions, 2);
}

#[test]
fn entity_rows_link_back_to_their_facts() {
    let mut conn = test_db();
    let config = test_config();
    let provider = StubProvider::new();
    let dir = tempfile::tempdir().unwrap();

    let t1 = write_transcript(
        &dir,
        "s1.jsonl",
        &["The deploy script lives at infra/deploy.sh."],
    );
    extract_session(&mut conn, &provider, &RuleExtractor, &t1, "proj", "s1", &config).unwrap();

    let linked: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM fact_entities fe \
             JOIN entities e ON e.id = fe.entity_id \
             WHERE e.name_norm IN ('deploy script', 'infra/deploy.sh')",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(linked, 2);
}
