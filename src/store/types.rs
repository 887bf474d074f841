//! Core knowledge type definitions.
//!
//! Defines [`FactKind`] (the five knowledge categories carried over from the
//! extraction vocabulary), [`EntityKind`], [`RelationType`] (graph edge
//! labels), and the row structs for facts and relations.

use serde::{Deserialize, Serialize};

/// Categories of extracted knowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    /// An architectural or tooling decision that was made.
    Decision,
    /// A change in approach — supersedes earlier knowledge.
    Correction,
    /// A discovered technical limit or requirement.
    Constraint,
    /// An established convention or workflow.
    Pattern,
    /// Anything else worth remembering.
    Fact,
}

impl FactKind {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decision => "decision",
            Self::Correction => "correction",
            Self::Constraint => "constraint",
            Self::Pattern => "pattern",
            Self::Fact => "fact",
        }
    }

    /// All kinds, in injection-priority order.
    pub fn all() -> [FactKind; 5] {
        [
            Self::Decision,
            Self::Constraint,
            Self::Pattern,
            Self::Correction,
            Self::Fact,
        ]
    }
}

impl std::fmt::Display for FactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "decision" => Ok(Self::Decision),
            "correction" => Ok(Self::Correction),
            "constraint" => Ok(Self::Constraint),
            "pattern" => Ok(Self::Pattern),
            "fact" => Ok(Self::Fact),
            _ => Err(format!("unknown fact kind: {s}")),
        }
    }
}

/// What sort of named thing an entity is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    File,
    Identifier,
    Concept,
    Tool,
    Person,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Identifier => "identifier",
            Self::Concept => "concept",
            Self::Tool => "tool",
            Self::Person => "person",
        }
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Self::File),
            "identifier" => Ok(Self::Identifier),
            "concept" => Ok(Self::Concept),
            "tool" => Ok(Self::Tool),
            "person" => Ok(Self::Person),
            _ => Err(format!("unknown entity kind: {s}")),
        }
    }
}

/// Graph edge labels between entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Contradicts,
    Supersedes,
    DependsOn,
    RejectedInFavorOf,
    /// Co-mention within one fact.
    Mentions,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contradicts => "contradicts",
            Self::Supersedes => "supersedes",
            Self::DependsOn => "depends_on",
            Self::RejectedInFavorOf => "rejected_in_favor_of",
            Self::Mentions => "mentions",
        }
    }
}

impl std::str::FromStr for RelationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contradicts" => Ok(Self::Contradicts),
            "supersedes" => Ok(Self::Supersedes),
            "depends_on" => Ok(Self::DependsOn),
            "rejected_in_favor_of" => Ok(Self::RejectedInFavorOf),
            "mentions" => Ok(Self::Mentions),
            _ => Err(format!("unknown relation type: {s}")),
        }
    }
}

/// A fact row, matching the `facts` table schema.
#[derive(Debug, Clone, Serialize)]
pub struct Fact {
    /// UUID v7 (time-sortable) primary key.
    pub id: String,
    pub project_id: String,
    pub source_session_id: String,
    pub kind: String,
    pub text: String,
    /// Confidence score in `[0.0, 1.0]` from extraction, bumped by reinforcement.
    pub confidence: f64,
    pub access_count: u32,
    /// Byte span of the contributing transcript events.
    pub span_start: u64,
    pub span_end: u64,
    pub created_at: String,
    pub updated_at: String,
    /// If this fact was replaced, the ID of the replacement. Superseded facts
    /// stay queryable for history but are excluded from default retrieval.
    pub superseded_by: Option<String>,
    /// ID of the live fact this one reinforces, if dedup put it in the
    /// middle similarity band.
    pub reinforces: Option<String>,
}

/// An entity row.
#[derive(Debug, Clone, Serialize)]
pub struct Entity {
    pub id: String,
    pub project_id: String,
    /// Display name as first seen.
    pub name: String,
    /// Normalization key: trimmed, whitespace-collapsed, lowercased.
    pub name_norm: String,
    pub kind: String,
    pub mention_count: u32,
}
