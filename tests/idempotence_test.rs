mod helpers;

use helpers::{test_config, test_db, write_transcript, StubProvider};
use tacit::extract::rules::RuleExtractor;
use tacit::ingest::extract_session;

#[test]
fn second_run_over_unchanged_transcript_adds_nothing() {
    let mut conn = test_db();
    let config = test_config();
    let provider = StubProvider::new();
    let dir = tempfile::tempdir().unwrap();
    let transcript = write_transcript(
        &dir,
        "session.jsonl",
        &[
            "We decided to use sqlite for local storage.",
            "The deploy script lives at infra/deploy.sh.",
        ],
    );

    let first = extract_session(
        &mut conn,
        &provider,
        &RuleExtractor,
        &transcript,
        "proj",
        "s1",
        &config,
    )
    .unwrap();
    assert_eq!(first.facts_added, 2);
    assert_eq!(first.skipped_duplicates, 0);

    let second = extract_session(
        &mut conn,
        &provider,
        &RuleExtractor,
        &transcript,
        "proj",
        "s1",
        &config,
    )
    .unwrap();
    // The marker already covers the whole file, so nothing is even re-read
    assert_eq!(second.facts_added, 0);
    assert_eq!(second.facts_superseded, 0);

    let live: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM facts WHERE superseded_by IS NULL",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(live, 2);
}

#[test]
fn appended_content_is_processed_incrementally() {
    let mut conn = test_db();
    let config = test_config();
    let provider = StubProvider::new();
    let dir = tempfile::tempdir().unwrap();
    let transcript = write_transcript(
        &dir,
        "session.jsonl",
        &["We decided to use sqlite for local storage."],
    );

    extract_session(&mut conn, &provider, &RuleExtractor, &transcript, "proj", "s1", &config)
        .unwrap();

    helpers::append_transcript(&transcript, &["The service listens on port 8080 normally."]);
    let second = extract_session(
        &mut conn,
        &provider,
        &RuleExtractor,
        &transcript,
        "proj",
        "s1",
        &config,
    )
    .unwrap();
    assert_eq!(second.facts_added, 1);
    assert_eq!(second.skipped_duplicates, 0);
}

#[test]
fn rewritten_prefix_resets_marker_without_duplicating_facts() {
    let mut conn = test_db();
    let config = test_config();
    let provider = StubProvider::new();
    let dir = tempfile::tempdir().unwrap();
    let transcript = write_transcript(
        &dir,
        "session.jsonl",
        &["We decided to use sqlite for local storage."],
    );

    extract_session(&mut conn, &provider, &RuleExtractor, &transcript, "proj", "s1", &config)
        .unwrap();

    // Rewrite the file from scratch: same statement with different spacing
    // (so the stored prefix hash no longer matches) plus one new line
    let transcript = write_transcript(
        &dir,
        "session.jsonl",
        &[
            "We  decided to use sqlite  for local storage.",
            "The service listens on port 8080 normally.",
        ],
    );
    let report = extract_session(
        &mut conn,
        &provider,
        &RuleExtractor,
        &transcript,
        "proj",
        "s1",
        &config,
    )
    .unwrap();

    // First statement dedups against the stored fact, second is new
    assert_eq!(report.facts_added, 1);
    assert_eq!(report.skipped_duplicates, 1);

    let live: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM facts WHERE superseded_by IS NULL",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(live, 2);
}
