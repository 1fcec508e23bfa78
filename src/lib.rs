//! Incremental, content-addressed code indexer.
//!
//! Client-side: [`hash`] (C1), [`chunker`] (C2), [`merkle`] (C3), [`dirty`]
//! (C4), [`watcher`] (C5), [`project`] (C6), and the [`sync`] orchestrator
//! (C7). Server-side: [`server`] wires the reconciliation core (C8), the
//! embedding cache (C9), and the vector store adapter (C10) behind an axum
//! router. [`protocol`] is the wire-format contract both sides share.

pub mod chunker;
pub mod config;
pub mod dirty;
pub mod error;
pub mod hash;
pub mod merkle;
pub mod project;
pub mod protocol;
pub mod server;
pub mod state;
pub mod sync;
pub mod watcher;
