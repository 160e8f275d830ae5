//! `recall-memory` – The persistence layer.
//!
//! Gives the memory core its only cross-process source of truth, backed by a
//! local SQLite substrate.
//!
//! # Modules
//!
//! - [`store`] – [`Database`][store::Database] handle, the schema, and the
//!   [`TurnStore`][store::TurnStore], [`SemanticStore`][store::SemanticStore]
//!   and [`SessionStore`][store::SessionStore] contracts.
//! - [`turns`] – the Durable Turn Store: an append-only SQLite turn log plus
//!   [`DurableTurnStore`][turns::DurableTurnStore], which retries writes and
//!   strips rows that belong to another user.
//! - [`semantic`] – semantic memory units, links and insights.
//! - [`sessions`] – sessions, cross-session threads and continuity bridges.

pub mod semantic;
pub mod sessions;
pub mod store;
pub mod turns;
