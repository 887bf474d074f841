//! Persistent knowledge for a personal coding agent.
//!
//! Tacit watches session transcripts, extracts durable facts (decisions,
//! corrections, constraints, patterns), and stores them in one SQLite
//! database with three lookup paths over the same rows: FTS5 keyword match,
//! sqlite-vec similarity, and a k-hop walk over an entity relation graph.
//! Recall fuses all three, biased toward recent knowledge, and keeps serving
//! from the surviving paths when one is down.
//!
//! # Architecture
//!
//! - **Storage**: SQLite with FTS5 for keyword search and
//!   [sqlite-vec](https://github.com/asg017/sqlite-vec) for vector search
//! - **Embeddings**: any OpenAI-compatible `/embeddings` endpoint
//!   (e.g. Ollama with nomic-embed-text, 768 dimensions)
//! - **Extraction**: deterministic lexical rules by default, optionally an
//!   LLM behind an OpenAI-compatible chat endpoint
//!
//! # Modules
//!
//! - [`config`] — Configuration loading from TOML files and environment variables
//! - [`db`] — SQLite database initialization, schema, migrations, and health checks
//! - [`transcript`] — JSONL session transcript parsing with byte-span provenance
//! - [`extract`] — Transcript-to-candidate-fact extraction
//! - [`embedding`] — Text-to-vector embedding pipeline
//! - [`store`] — Facts, entities, relations, session markers, and the graph walk
//! - [`dedup`] — Incoming-fact classification and result near-duplicate suppression
//! - [`retrieval`] — Fused keyword + vector + graph recall with recency decay
//! - [`ingest`] — The extraction run coordinator: locking, markers, retries
//! - [`inject`] — Markdown rendering of knowledge for session startup

pub mod cli;
pub mod config;
pub mod db;
pub mod dedup;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod inject;
pub mod retrieval;
pub mod store;
pub mod transcript;
