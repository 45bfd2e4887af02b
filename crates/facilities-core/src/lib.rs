//! # Facilities Core
//!
//! Shared, WASM-safe logic for Facilities Drafter: chunk models, the
//! recursive text splitter, the vector index abstraction, semantic retrieval
//! with category filtering, and the drift & overlap analyzer.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or HTTP clients.
//! Embedding backends and persistent indexes are supplied by the caller
//! through the [`embedding::Embedder`] and [`store::VectorIndex`] traits.

pub mod chunk;
pub mod drift;
pub mod embedding;
pub mod error;
pub mod models;
pub mod overlap;
pub mod retrieve;
pub mod store;
