//! Storage adapter abstractions (spec §4.1)
//!
//! Four capability traits — `RecordStore`, `VectorStore`, `GraphStore`,
//! `EventBus` — plus one production (SQLite-backed) and one in-memory
//! implementation per capability. The engine depends only on the traits;
//! adapters fail with `MemoriaError::TransientStorage` (retryable) or
//! `MemoriaError::PermanentStorage` (surfaced), never panic.

pub mod eventbus;
pub mod graph;
pub mod record;
pub mod session;
pub mod sqlite;
pub mod vector;

pub use eventbus::{EventBus, InMemoryEventBus};
pub use graph::{GraphEdge, GraphNode, GraphStore, InMemoryGraphStore};
pub use record::{InMemoryRecordStore, RecordPatch, RecordStore};
pub use session::{InMemorySessionStore, SessionStore};
pub use vector::{InMemoryVectorStore, VectorStore};

use serde::{Deserialize, Serialize};

/// Per-adapter health (spec §6 "Health contract")
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterStatus {
    Ok,
    Degraded,
    Down,
}

/// Composite health across all four adapters.
///
/// RecordStore and VectorStore are required: if either is down, the
/// composite is down. GraphStore and EventBus failures only degrade it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub record_store: AdapterStatus,
    pub vector_store: AdapterStatus,
    pub graph_store: AdapterStatus,
    pub event_bus: AdapterStatus,
}

impl HealthReport {
    pub fn composite(&self) -> AdapterStatus {
        if self.record_store == AdapterStatus::Down || self.vector_store == AdapterStatus::Down {
            return AdapterStatus::Down;
        }
        [
            self.record_store,
            self.vector_store,
            self.graph_store,
            self.event_bus,
        ]
        .into_iter()
        .max()
        .unwrap_or(AdapterStatus::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_adapter_down_makes_composite_down() {
        let report = HealthReport {
            record_store: AdapterStatus::Ok,
            vector_store: AdapterStatus::Down,
            graph_store: AdapterStatus::Ok,
            event_bus: AdapterStatus::Ok,
        };
        assert_eq!(report.composite(), AdapterStatus::Down);
    }

    #[test]
    fn optional_adapter_degraded_only_degrades_composite() {
        let report = HealthReport {
            record_store: AdapterStatus::Ok,
            vector_store: AdapterStatus::Ok,
            graph_store: AdapterStatus::Degraded,
            event_bus: AdapterStatus::Ok,
        };
        assert_eq!(report.composite(), AdapterStatus::Degraded);
    }
}
