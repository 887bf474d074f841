//! Deterministic rule-based extraction.
//!
//! Scans user and assistant messages sentence by sentence, keeps declarative
//! statements that carry a knowledge cue, classifies them into fact kinds by
//! lexical cues, and pulls out entity mentions (paths, identifiers, the
//! subject phrase of location statements). Tool events are skipped: tool
//! chatter is transient, not durable knowledge.

use anyhow::Result;

use super::{guess_entity_kind, CandidateFact, EntityMention, FactExtractor};
use crate::store::normalize_name;
use crate::store::types::{EntityKind, FactKind, RelationType};
use crate::transcript::{EventKind, TranscriptEvent};

const CORRECTION_CUES: &[&str] = &[
    "actually",
    "instead",
    "moved to",
    "was moved",
    "renamed",
    "no longer",
    "not anymore",
    "correction:",
    "now lives",
];

const DECISION_CUES: &[&str] = &[
    "decided",
    "decision",
    "we'll use",
    "will use",
    "chose",
    "going with",
    "agreed",
    "settled on",
];

const CONSTRAINT_CUES: &[&str] = &[
    "must ",
    "must.",
    "cannot",
    "can't",
    "requires",
    "required",
    "only works",
    "never ",
    "needs to",
    "has to",
    "limited to",
];

const PATTERN_CUES: &[&str] = &[
    "always",
    "convention",
    "whenever",
    "typically",
    "usually",
    "every time",
    "by default",
];

const FACT_CUES: &[&str] = &[
    "lives at",
    "lives in",
    "is located",
    "is stored",
    "is in ",
    "is a ",
    "is the ",
    "uses ",
    "runs on",
    "defaults to",
    "points to",
    "listens on",
];

/// Cues that mark a statement about where something lives; the phrase before
/// the cue becomes a concept entity so that restatements about the same
/// subject share an entity reference.
const LOCATION_CUES: &[&str] = &[
    "lives at",
    "lives in",
    "was moved to",
    "moved to",
    "is located at",
    "is stored in",
    "now lives at",
];

const MIN_WORDS: usize = 4;
const MAX_WORDS: usize = 60;

pub struct RuleExtractor;

impl FactExtractor for RuleExtractor {
    fn extract(&self, events: &[TranscriptEvent]) -> Result<Vec<CandidateFact>> {
        let mut candidates: Vec<CandidateFact> = Vec::new();

        for event in events {
            if !matches!(
                event.kind,
                EventKind::UserMessage | EventKind::AssistantMessage
            ) {
                continue;
            }
            for sentence in split_sentences(&event.text) {
                if let Some(candidate) = classify_sentence(&sentence, event) {
                    candidates.push(candidate);
                }
            }
        }

        link_corrections(&mut candidates);
        Ok(candidates)
    }
}

/// Split text into sentences: newline always ends a sentence; `.`, `!`, `?`
/// end one only when followed by whitespace, so paths like `infra/deploy.sh`
/// survive intact.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    for line in text.lines() {
        let mut current = String::new();
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            current.push(c);
            if matches!(c, '.' | '!' | '?')
                && chars.peek().map(|n| n.is_whitespace()).unwrap_or(true)
            {
                let s = current.trim();
                if !s.is_empty() {
                    sentences.push(s.to_string());
                }
                current.clear();
            }
        }
        let s = current.trim();
        if !s.is_empty() {
            sentences.push(s.to_string());
        }
    }
    sentences
}

/// Keep a sentence if it carries a knowledge cue; classify and mine entities.
fn classify_sentence(sentence: &str, event: &TranscriptEvent) -> Option<CandidateFact> {
    let word_count = sentence.split_whitespace().count();
    if !(MIN_WORDS..=MAX_WORDS).contains(&word_count) {
        return None;
    }
    // Questions are requests, not knowledge
    if sentence.trim_end().ends_with('?') {
        return None;
    }

    let lower = sentence.to_lowercase();
    let kind = if contains_any(&lower, CORRECTION_CUES) {
        FactKind::Correction
    } else if contains_any(&lower, DECISION_CUES) {
        FactKind::Decision
    } else if contains_any(&lower, CONSTRAINT_CUES) {
        FactKind::Constraint
    } else if contains_any(&lower, PATTERN_CUES) {
        FactKind::Pattern
    } else if contains_any(&lower, FACT_CUES) {
        FactKind::Fact
    } else {
        return None;
    };

    let text = sentence.split_whitespace().collect::<Vec<_>>().join(" ");
    let entities = extract_entities(&text, &lower);

    Some(CandidateFact {
        kind,
        text,
        entities,
        related_to: Vec::new(),
        relation_type: None,
        confidence: base_confidence(kind),
        span_start: event.start,
        span_end: event.end,
    })
}

fn contains_any(haystack: &str, cues: &[&str]) -> bool {
    cues.iter().any(|cue| haystack.contains(cue))
}

fn base_confidence(kind: FactKind) -> f64 {
    match kind {
        FactKind::Decision | FactKind::Constraint => 0.9,
        FactKind::Correction => 0.85,
        FactKind::Pattern => 0.8,
        FactKind::Fact => 0.75,
    }
}

/// Mine entity mentions from a sentence: path/file tokens, code identifiers,
/// and the subject phrase of location statements.
fn extract_entities(text: &str, lower: &str) -> Vec<EntityMention> {
    let mut mentions: Vec<EntityMention> = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    let mut push = |name: String, kind: EntityKind| {
        let norm = normalize_name(&name);
        if norm.is_empty() || seen.contains(&norm) {
            return;
        }
        seen.push(norm);
        mentions.push(EntityMention { name, kind });
    };

    for raw in text.split_whitespace() {
        let token = raw.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '/');
        let token = token.trim_matches('/');
        if token.len() < 3 || !token.chars().any(|c| c.is_ascii_alphabetic()) {
            continue;
        }
        match guess_entity_kind(token) {
            EntityKind::File => push(token.to_string(), EntityKind::File),
            EntityKind::Identifier => push(token.to_string(), EntityKind::Identifier),
            _ => {}
        }
    }

    if let Some(subject) = location_subject(lower) {
        push(subject, EntityKind::Concept);
    }

    mentions
}

/// For "the deploy script lives at infra/deploy.sh", returns "deploy script".
fn location_subject(lower: &str) -> Option<String> {
    const FILLER: &[&str] = &[
        "actually", "the", "a", "an", "our", "my", "so", "now", "ok", "okay", "note", "but",
        "and", "also", "btw", "correction:",
    ];
    for cue in LOCATION_CUES {
        if let Some(idx) = lower.find(cue) {
            let words: Vec<&str> = lower[..idx]
                .split_whitespace()
                .skip_while(|w| FILLER.contains(w))
                .collect();
            let subject = words.join(" ");
            let subject = subject.trim_matches(|c: char| !c.is_ascii_alphanumeric());
            let count = subject.split_whitespace().count();
            if (1..=4).contains(&count) {
                return Some(subject.to_string());
            }
        }
    }
    None
}

/// A correction that shares an entity with an earlier candidate in the same
/// batch supersedes it. Cross-batch supersession is the deduplicator's job.
fn link_corrections(candidates: &mut [CandidateFact]) {
    for i in (0..candidates.len()).rev() {
        if candidates[i].kind != FactKind::Correction || candidates[i].relation_type.is_some() {
            continue;
        }
        let norms: Vec<String> = candidates[i]
            .entities
            .iter()
            .map(|e| normalize_name(&e.name))
            .collect();
        let target = (0..i).rev().find(|&j| {
            candidates[j]
                .entities
                .iter()
                .any(|e| norms.contains(&normalize_name(&e.name)))
        });
        if let Some(j) = target {
            candidates[i].related_to.push(j);
            candidates[i].relation_type = Some(RelationType::Supersedes);
        }
    }
}
