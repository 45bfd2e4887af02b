//! # Facilities Drafter
//!
//! Retrieval-augmented drafting of the "Facilities, Equipment and Other
//! Resources" section of grant proposals.
//!
//! Past proposals are chunked, embedded and stored in a persistent vector
//! index tagged by funding agency (the name of the directory they were found
//! in). A composer retrieves agency-filtered context for each section, adds
//! snippets from an allowlisted web search, and asks a language model to
//! draft the text. Drift and overlap analysis measure how repeatable and how
//! diverse retrieval is.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  PDF/DOCX   │──▶│   Ingest    │──▶│ SQLite index │
//! │  MD / TXT   │   │ Chunk+Embed │   │  (vectors)   │
//! └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                            │ Retriever
//!                      ┌─────────────────────┤
//!                      ▼                     ▼
//!                ┌───────────┐        ┌────────────┐
//!                │ Analysis  │        │  Composer  │◀── web search, LLM
//!                └───────────┘        └────────────┘
//! ```
//!
//! Pure logic (chunking, retrieval, drift and overlap metrics, the in-memory
//! index) lives in `facilities-core`; this crate adds the SQLite index,
//! HTTP providers, file extraction and the CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] / [`migrate`] | SQLite connection and schema |
//! | [`sqlite_index`] | Persistent vector index |
//! | [`extract`] | PDF, DOCX and text extraction |
//! | [`ingest`] | Scan, chunk, embed and commit with retry |
//! | [`embedding`] | Embedding providers |
//! | [`search`] / [`stats`] | Inspection commands |
//! | [`analysis`] | Drift and overlap reports |
//! | [`llm`] / [`web_search`] / [`compose`] | Draft composition |

pub mod analysis;
pub mod compose;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod http;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod search;
pub mod sqlite_index;
pub mod stats;
pub mod web_search;
