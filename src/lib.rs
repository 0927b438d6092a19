//! # codescope
//!
//! A hybrid (keyword + semantic) code retrieval engine scoped to a single
//! workspace root.
//!
//! codescope scans a repository, splits source files into syntax-aware
//! chunks with tree-sitter, embeds them, and indexes them twice: an exact
//! vector index and a TF-IDF keyword index. Queries search both, fuse the
//! scores, and return ranked snippets. No result ever points outside the
//! workspace root.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌───────────┐   ┌─────────────────┐
//! │ Scanner  │──▶│  Chunker  │──▶│ Embedding │──▶│ Vector+Keyword  │
//! │ (walk)   │   │(tree-sit.)│   │  client   │   │   generation    │
//! └──────────┘   └───────────┘   └───────────┘   └───────┬─────────┘
//!                                                        │ stage/commit
//!                        ┌────────────┐            ┌─────▼─────┐
//!           query ──────▶│ HybridQuery│◀───────────│  SQLite   │
//!                        │   Engine   │   Arc swap │   store   │
//!                        └────────────┘            └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! codescope index ./my-repo
//! codescope search ./my-repo "where is the config parsed"
//! codescope update ./my-repo
//! codescope stats ./my-repo --json
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`workspace`] | Workspace root and path containment |
//! | [`scanner`] | Repository walk and relevance tiers |
//! | [`ignore_rules`] | gitignore-style rules |
//! | [`languages`] | Extension tables and tree-sitter grammars |
//! | [`chunker`] | Syntax-aware chunk extraction |
//! | [`embedding`] | Embedding providers |
//! | [`embed_client`] | Batching, retry and caching |
//! | [`index_store`] | Generations, rebuild and incremental update |
//! | [`query`] | Hybrid query execution |
//! | [`sqlite_store`] | SQLite persistence |
//! | [`engine`] | One-shot entry points |
//! | [`stats`] | Index statistics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunker;
pub mod config;
pub mod db;
pub mod embed_client;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod ignore_rules;
pub mod index_store;
pub mod languages;
pub mod migrate;
pub mod query;
pub mod scanner;
pub mod sqlite_store;
pub mod stats;
pub mod workspace;

pub use codescope_core as core;
pub use error::{EngineError, Result};
