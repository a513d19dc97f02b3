//! Multi-tenant memory engine for autonomous agents.
//!
//! Unifies a record store, vector index, knowledge graph, and event bus
//! behind one write/read path, with background lifecycle workers for
//! deduplication, summarization, expiry, and session closure.

pub mod config;
pub mod control_plane;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod journal;
pub mod lifecycle;
pub mod realtime;
pub mod sharing;
pub mod storage;
pub mod types;

pub use config::Config;
pub use control_plane::ControlPlane;
pub use engine::MemoryEngine;
pub use error::{MemoriaError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
