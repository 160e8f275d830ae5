//! `recall-runtime` – The memory core.
//!
//! Everything between a raw conversational turn and the context string a
//! model finally sees.
//!
//! # Modules
//!
//! - [`assembly`] – [`ContextAssemblyService`][assembly::ContextAssemblyService]:
//!   the entry point.  `capture` durably persists a turn before anything
//!   else happens, assembles a [`ConversationMemory`][recall_types::ConversationMemory]
//!   from recent turns, the active session and semantic memory, caches it,
//!   and hands distillation of finished exchanges to the background pool.
//!   `get_context` renders the fixed-format context block.
//! - [`retrieval`] – [`MemoryRetrievalEngine`][retrieval::MemoryRetrievalEngine]:
//!   contextual, free-text and emotional retrieval over semantic memory,
//!   recurring-pattern mining and progress markers.
//! - [`distill`] – [`Distiller`][distill::Distiller]: turns an exchange into
//!   a semantic unit plus automatic links, extracts explicit facts, and
//!   generates insights.
//! - [`continuity`] – [`ContinuityManager`][continuity::ContinuityManager]:
//!   the session state machine, cross-session threads and bridges, and the
//!   opening context for a returning user.
//! - [`completion`] – the [`CompletionService`][completion::CompletionService]
//!   seam and [`LlmDriver`][completion::LlmDriver], an OpenAI-compatible
//!   client for local models such as [Ollama](https://ollama.com).  Structured
//!   requests carry the payload's JSON Schema in `response_format`.
//! - [`heuristics`] – [`KeywordTables`][heuristics::KeywordTables]: the
//!   data-driven emotion, topic, stop-word and relevance tables.
//! - [`cache`] – [`ContextCache`][cache::ContextCache] and its in-memory and
//!   disabled implementations.
//! - [`worker`] – [`BackgroundPool`][worker::BackgroundPool]: bounded,
//!   drainable execution of best-effort jobs.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export.
//!
//! # Failure policy
//!
//! Memory problems never fail a conversation.  Storage errors are retried
//! and then degrade to fallback context; completion-service failures are
//! logged and skipped; rows belonging to another user are stripped before a
//! caller can see them.

pub mod assembly;
pub mod cache;
pub mod completion;
pub mod continuity;
pub mod distill;
pub mod heuristics;
pub mod retrieval;
pub mod telemetry;
pub mod worker;

pub use assembly::{AssembledContext, AssemblyConfig, AssemblyStores, ContextAssemblyService};
pub use cache::{ContextCache, DisabledCache, InMemoryContextCache};
pub use completion::{ChatMessage, CompletionError, CompletionService, LlmDriver, Role};
pub use continuity::{ContinuityConfig, ContinuityManager};
pub use distill::{DistillConfig, Distiller};
pub use heuristics::KeywordTables;
pub use retrieval::{MemoryRetrievalEngine, RetrievalQuery, ScoringWeights};
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use worker::{BackgroundPool, PoolConfig};
