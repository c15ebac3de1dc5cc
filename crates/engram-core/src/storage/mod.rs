//! Storage layer
//!
//! Durable single-writer SQLite store with typed tables, secondary indexes,
//! and forward-only numbered migrations.

pub mod migrations;
mod sqlite;

pub use sqlite::{
    ConflictRecord, EngineStats, RetrievalHit, Store, UnifiedSearchOptions,
};
