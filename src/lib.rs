//! Briefwire - AI-curated feed-to-digest pipeline
//!
//! Briefwire ingests a catalog of RSS/Atom feeds on a recurring schedule,
//! decomposes each article into atomic, scored "information units" through a
//! multi-agent LLM pipeline, deduplicates and merges those units across
//! sources via an entity knowledge graph, and periodically emails a curated
//! digest.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Briefwire Service                        │
//! │                                                                  │
//! │  Scheduler ──▶ Fetcher ──▶ Article Store ──▶ Orchestrator        │
//! │   (interval,    (bounded     (URL-unique)        │               │
//! │    wall-clock)   pools)                          ▼               │
//! │                              ┌──────────────────────────────┐    │
//! │                              │ Agents                       │    │
//! │                              │  Collector → Librarian       │    │
//! │                              │  {Skeptic ∥ Economist ∥      │    │
//! │                              │   Detective} → Editor        │    │
//! │                              │  Extractor → Merger          │    │
//! │                              └──────┬───────────────────────┘    │
//! │                                     │  every call via            │
//! │                 LLM Gateway ◀───────┘  the gateway               │
//! │                     │                                            │
//! │                     ▼                                            │
//! │                 Telemetry (JSONL shards + query index)           │
//! │                                                                  │
//! │  Information Store ◀── dedup/merge ──▶ Entity Store (graph)      │
//! │        │                                                         │
//! │        ▼                                                         │
//! │  Curator ──▶ Notifier (per-recipient SMTP digest)                │
//! │                                                                  │
//! │  Admin surface: HTTP API + WS log/progress streams               │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`scheduler`]: interval and wall-clock job triggers with clean shutdown
//! - [`feeds`]: persisted feed registry
//! - [`fetcher`]: concurrent feed retrieval and full-text extraction
//! - [`llm`]: the single funnel for model calls (retries, JSON recovery,
//!   token accounting, ambient call tagging)
//! - [`vector`]: pluggable embedding index used for semantic dedup and RAG
//! - [`agents`]: the analysis pipeline and its orchestrator
//! - [`storage`]: SQLite-backed article / information / entity / telemetry
//!   stores
//! - [`notifier`]: digest rendering and SMTP delivery
//! - [`web`]: operational HTTP/WebSocket admin surface

pub mod agents;
pub mod config;
pub mod error;
pub mod feeds;
pub mod fetcher;
pub mod llm;
pub mod models;
pub mod notifier;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod telemetry;
pub mod vector;
pub mod web;

pub use config::AppConfig;
pub use error::{Error, Result};
