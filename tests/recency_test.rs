mod helpers;

use chrono::{Duration, Utc};
use helpers::{test_config, test_db, StubProvider};
use rusqlite::params;
use tacit::dedup::DedupThresholds;
use tacit::embedding::EMBEDDING_DIM;
use tacit::extract::EntityMention;
use tacit::retrieval::recall;
use tacit::store::facts::{store_fact, NewFact};
use tacit::store::types::{EntityKind, FactKind};

fn thresholds() -> DedupThresholds {
    DedupThresholds {
        merge: 0.92,
        reinforce: 0.80,
    }
}

#[test]
fn newer_fact_outranks_equally_relevant_older_one() {
    let mut conn = test_db();
    let config = test_config();

    let entities = [EntityMention {
        name: "deploy window".to_string(),
        kind: EntityKind::Concept,
    }];

    // Two equally relevant facts on orthogonal embedding axes
    let mut emb_old = vec![0.0f32; EMBEDDING_DIM];
    emb_old[40] = 1.0;
    let mut emb_new = vec![0.0f32; EMBEDDING_DIM];
    emb_new[50] = 1.0;

    let old = store_fact(
        &mut conn,
        &NewFact {
            project_id: "proj",
            session_id: "s1",
            kind: FactKind::Fact,
            text: "The deploy window opens at noon on Mondays.",
            confidence: 0.8,
            entities: &entities,
            span_start: 0,
            span_end: 50,
        },
        &emb_old,
        &thresholds(),
    )
    .unwrap();
    let new = store_fact(
        &mut conn,
        &NewFact {
            project_id: "proj",
            session_id: "s2",
            kind: FactKind::Fact,
            text: "The deploy window opens at noon on Fridays.",
            confidence: 0.8,
            entities: &entities,
            span_start: 0,
            span_end: 50,
        },
        &emb_new,
        &thresholds(),
    )
    .unwrap();

    // Age the first fact by ninety days
    let backdated = (Utc::now() - Duration::days(90)).to_rfc3339();
    conn.execute(
        "UPDATE facts SET created_at = ?1 WHERE id = ?2",
        params![backdated, old.fact_id()],
    )
    .unwrap();

    // Query vector equidistant from both facts
    let mut query_emb = vec![0.0f32; EMBEDDING_DIM];
    query_emb[40] = std::f32::consts::FRAC_1_SQRT_2;
    query_emb[50] = std::f32::consts::FRAC_1_SQRT_2;
    let provider = StubProvider::new().with_override("deploy window schedule", query_emb);

    let response = recall(
        &conn,
        &provider,
        "proj",
        "deploy window schedule",
        5,
        &config.retrieval,
    )
    .unwrap();

    assert_eq!(response.hits.len(), 2);
    assert_eq!(response.hits[0].fact.id, new.fact_id());
    assert_eq!(response.hits[1].fact.id, old.fact_id());
    assert!(response.hits[0].score > response.hits[1].score);
}

#[test]
fn decay_dampens_but_never_erases_old_knowledge() {
    let mut conn = test_db();
    let config = test_config();

    let mut emb = vec![0.0f32; EMBEDDING_DIM];
    emb[60] = 1.0;
    let stored = store_fact(
        &mut conn,
        &NewFact {
            project_id: "proj",
            session_id: "s1",
            kind: FactKind::Constraint,
            text: "The gateway cannot handle more than 100 connections.",
            confidence: 0.9,
            entities: &[],
            span_start: 0,
            span_end: 50,
        },
        &emb,
        &thresholds(),
    )
    .unwrap();

    let backdated = (Utc::now() - Duration::days(365 * 2)).to_rfc3339();
    conn.execute(
        "UPDATE facts SET created_at = ?1 WHERE id = ?2",
        params![backdated, stored.fact_id()],
    )
    .unwrap();

    let provider = StubProvider::new().with_override("gateway connections", {
        let mut q = vec![0.0f32; EMBEDDING_DIM];
        q[60] = 1.0;
        q
    });
    let response = recall(
        &conn,
        &provider,
        "proj",
        "gateway connections",
        5,
        &config.retrieval,
    )
    .unwrap();

    // Two years old and still recallable, just with a damped score
    assert_eq!(response.hits.len(), 1);
    assert!(response.hits[0].score > 0.0);
    assert!(response.hits[0].score < 1.0);
}
