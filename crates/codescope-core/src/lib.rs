//! # codescope core
//!
//! Pure retrieval logic shared by the `codescope` engine: data models,
//! the identifier-aware tokenizer, line-window chunking, the vector and
//! keyword indexes, score fusion, and the [`store::SnapshotStore`]
//! abstraction over persisted index generations.
//!
//! This crate performs no filesystem, network, or database I/O. Scanning,
//! syntax-aware chunking, embedding providers and SQLite persistence live
//! in the `codescope` crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod keyword;
pub mod models;
pub mod search;
pub mod store;
pub mod tokenize;
pub mod vector;

pub use error::IndexError;
