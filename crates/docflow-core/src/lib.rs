//! Shared library for the document pipeline and hybrid retrieval engine.
//!
//! Consumed by the `docflow-worker` (queue consumer, ingest sources) and
//! `docflow-api` (thin HTTP surface) binaries. Nothing in here is async-web
//! specific; both binaries wire these pieces into their own runtime loop.

pub mod access;
pub mod blob;
pub mod chunker;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod event_bus;
pub mod extractor;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod provider_factory;
pub mod queue;
pub mod rag;
pub mod retrieval;

pub use error::{CoreError, CoreResult};
