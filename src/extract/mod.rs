//! Turning transcripts into candidate facts.
//!
//! The extraction algorithm is pluggable behind [`FactExtractor`]. Two
//! implementations exist: [`rules::RuleExtractor`] (deterministic lexical
//! heuristics, works offline, the default) and [`llm::LlmExtractor`] (asks a
//! model to produce structured knowledge chunks). Idempotence across runs is
//! not the extractor's job — the session marker bounds what it sees and the
//! deduplicator folds repeated candidates.

pub mod llm;
pub mod rules;

use anyhow::Result;

use crate::config::ExtractionConfig;
use crate::store::types::{EntityKind, FactKind, RelationType};
use crate::transcript::TranscriptEvent;

/// An entity mentioned by a candidate fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMention {
    pub name: String,
    pub kind: EntityKind,
}

/// A fact candidate produced by extraction, before dedup and storage.
#[derive(Debug, Clone)]
pub struct CandidateFact {
    pub kind: FactKind,
    /// Normalized declarative statement.
    pub text: String,
    pub entities: Vec<EntityMention>,
    /// Indices of earlier candidates in the same batch this one relates to.
    pub related_to: Vec<usize>,
    pub relation_type: Option<RelationType>,
    /// Extraction confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    /// Byte span of the contributing transcript events.
    pub span_start: u64,
    pub span_end: u64,
}

/// Trait for transcript-to-candidates extraction.
///
/// Must be deterministic given the same events and configuration: re-running
/// on an unchanged transcript yields candidates that dedup to the same live
/// facts.
pub trait FactExtractor: Send + Sync {
    fn extract(&self, events: &[TranscriptEvent]) -> Result<Vec<CandidateFact>>;
}

/// Create an extractor from config.
pub fn create_extractor(config: &ExtractionConfig) -> Result<Box<dyn FactExtractor>> {
    match config.extractor.as_str() {
        "rules" => Ok(Box::new(rules::RuleExtractor)),
        "llm" => Ok(Box::new(llm::LlmExtractor::new(config)?)),
        other => anyhow::bail!("unknown extractor: {other}. Supported: rules, llm"),
    }
}

/// Guess an entity kind from its surface form: path-like names are files,
/// code-shaped names are identifiers, everything else is a concept.
pub(crate) fn guess_entity_kind(name: &str) -> EntityKind {
    if name.contains('/') || looks_like_filename(name) {
        EntityKind::File
    } else if name.contains('_')
        || (name.chars().skip(1).any(|c| c.is_uppercase()) && !name.contains(' '))
        || name.contains("::")
    {
        EntityKind::Identifier
    } else {
        EntityKind::Concept
    }
}

fn looks_like_filename(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((stem, ext)) => {
            !stem.is_empty()
                && !ext.is_empty()
                && ext.len() <= 4
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
                && ext.chars().any(|c| c.is_ascii_alphabetic())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_kind_guesses() {
        assert_eq!(guess_entity_kind("infra/deploy.sh"), EntityKind::File);
        assert_eq!(guess_entity_kind("deploy.sh"), EntityKind::File);
        assert_eq!(guess_entity_kind("max_retries"), EntityKind::Identifier);
        assert_eq!(guess_entity_kind("TacitConfig"), EntityKind::Identifier);
        assert_eq!(guess_entity_kind("deploy script"), EntityKind::Concept);
        assert_eq!(guess_entity_kind("postgres"), EntityKind::Concept);
        // Version numbers are not filenames
        assert_eq!(guess_entity_kind("v1.2"), EntityKind::Concept);
    }
}
