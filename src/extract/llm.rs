//! Model-driven extraction against an OpenAI-compatible chat endpoint.
//!
//! Sends a rendered conversation window with a structured-extraction prompt
//! and parses the returned JSON array into candidates. Malformed model output
//! is a warning, never an error: extraction yields nothing rather than
//! failing the ingestion run.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use super::{guess_entity_kind, CandidateFact, EntityMention, FactExtractor};
use crate::config::ExtractionConfig;
use crate::store::types::{FactKind, RelationType};
use crate::transcript::{EventKind, TranscriptEvent};

const EXTRACTION_PROMPT: &str = r#"Analyze this conversation and extract structured knowledge chunks.

For each piece of knowledge, return a JSON object with:
- kind: one of "decision", "correction", "constraint", "pattern", "fact"
- text: A declarative statement (1-3 sentences) capturing the knowledge
- entities: List of code entities, concepts, or technologies mentioned
- related_to: List of indices (0-based) of other chunks this one relates to
- relation_type: One of "contradicts", "supersedes", "depends_on", "rejected_in_favor_of", or null

Focus on:
- Architectural decisions made
- Corrections or changes in approach
- Constraints discovered (technical limits, requirements)
- Patterns established (coding conventions, workflows)
- Important facts learned

Return ONLY a JSON array of these objects. If no knowledge worth extracting, return [].

Conversation:
"#;

pub struct LlmExtractor {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
    max_chars: usize,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct RawChunk {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    entities: Vec<String>,
    #[serde(default)]
    related_to: Vec<usize>,
    #[serde(default)]
    relation_type: Option<String>,
}

impl LlmExtractor {
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            url: format!(
                "{}/chat/completions",
                config.llm_endpoint.trim_end_matches('/')
            ),
            model: config.llm_model.clone(),
            max_chars: config.llm_max_chars,
        })
    }

    fn complete(&self, conversation: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({
                "model": self.model,
                "temperature": 0,
                "max_tokens": 2048,
                "messages": [{
                    "role": "user",
                    "content": format!("{EXTRACTION_PROMPT}{conversation}"),
                }],
            }))
            .send()
            .with_context(|| format!("extraction request to {} failed", self.url))?;

        anyhow::ensure!(
            response.status().is_success(),
            "extraction endpoint returned HTTP {}",
            response.status()
        );

        let body: ChatResponse = response
            .json()
            .context("failed to decode extraction response")?;
        let content = body
            .choices
            .into_iter()
            .next()
            .context("extraction endpoint returned no choices")?
            .message
            .content;
        Ok(content)
    }
}

impl FactExtractor for LlmExtractor {
    fn extract(&self, events: &[TranscriptEvent]) -> Result<Vec<CandidateFact>> {
        let conversation = render_conversation(events, self.max_chars);
        if conversation.trim().is_empty() {
            return Ok(Vec::new());
        }

        let span_start = events.first().map(|e| e.start).unwrap_or(0);
        let span_end = events.last().map(|e| e.end).unwrap_or(0);

        let raw = self.complete(&conversation)?;
        Ok(parse_chunks(&raw, span_start, span_end))
    }
}

/// Render message events as `User:`/`Assistant:` turns, truncated to a
/// character budget.
fn render_conversation(events: &[TranscriptEvent], max_chars: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut total = 0usize;
    for event in events {
        let prefix = match event.kind {
            EventKind::UserMessage => "User",
            EventKind::AssistantMessage => "Assistant",
            _ => continue,
        };
        let line = format!("{prefix}: {}", event.text);
        total += line.len();
        lines.push(line);
        if total >= max_chars {
            break;
        }
    }
    let mut result = lines.join("\n\n");
    if result.len() > max_chars {
        let mut cut = max_chars;
        while !result.is_char_boundary(cut) {
            cut -= 1;
        }
        result.truncate(cut);
    }
    result
}

/// Parse the model's JSON array, tolerating markdown code fences. Invalid
/// kinds fall back to `fact`, invalid relation types are dropped, empty
/// texts are skipped. Unparseable output yields an empty batch.
fn parse_chunks(raw: &str, span_start: u64, span_end: u64) -> Vec<CandidateFact> {
    let cleaned: String = raw
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n");

    let chunks: Vec<RawChunk> = match serde_json::from_str(cleaned.trim()) {
        Ok(chunks) => chunks,
        Err(e) => {
            tracing::warn!(error = %e, "extraction returned invalid JSON, dropping batch");
            return Vec::new();
        }
    };

    // Empty-text chunks are dropped below, shifting the positions of the
    // survivors; relation indices refer to the model's original array, so
    // they have to be mapped to post-filter positions
    let mut remapped: Vec<Option<usize>> = vec![None; chunks.len()];
    let mut next = 0usize;
    for (i, chunk) in chunks.iter().enumerate() {
        if !chunk.text.trim().is_empty() {
            remapped[i] = Some(next);
            next += 1;
        }
    }

    chunks
        .into_iter()
        .enumerate()
        .filter_map(|(i, chunk)| {
            let text = chunk.text.trim();
            if text.is_empty() {
                return None;
            }
            let own = remapped[i];
            let kind = FactKind::from_str(&chunk.kind).unwrap_or(FactKind::Fact);
            let relation_type = chunk
                .relation_type
                .as_deref()
                .and_then(|r| RelationType::from_str(&r.to_lowercase()).ok());
            let entities = chunk
                .entities
                .iter()
                .filter(|name| !name.trim().is_empty())
                .map(|name| EntityMention {
                    name: name.trim().to_string(),
                    kind: guess_entity_kind(name.trim()),
                })
                .collect();
            Some(CandidateFact {
                kind,
                text: text.to_string(),
                entities,
                related_to: chunk
                    .related_to
                    .into_iter()
                    .filter_map(|idx| remapped.get(idx).copied().flatten())
                    .filter(|idx| Some(*idx) != own)
                    .collect(),
                relation_type,
                confidence: 0.8,
                span_start,
                span_end,
            })
        })
        .collect()
}
