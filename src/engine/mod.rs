//! The memory engine: write path, read path, and the dependencies both share.

pub mod classify;
pub mod language;
pub mod read;
pub mod session;
pub mod write;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

use crate::config::Config;
use crate::embedding::{Completer, Embedder};
use crate::journal::{AuditLog, UndoLog};
use crate::realtime::RealtimeCoordinator;
use crate::sharing::SharingRegistry;
use crate::storage::{EventBus, GraphStore, RecordStore, SessionStore, VectorStore};

/// The engine's dependencies, constructed once and injected (spec §9:
/// "implicit module-level singletons... become explicit dependencies").
pub struct MemoryEngine {
    pub record_store: Arc<dyn RecordStore>,
    pub vector_store: Arc<dyn VectorStore>,
    pub graph_store: Arc<dyn GraphStore>,
    pub event_bus: Arc<dyn EventBus>,
    pub embedder: Arc<dyn Embedder>,
    pub completer: Option<Arc<dyn Completer>>,
    pub audit_log: Arc<dyn AuditLog>,
    pub undo_log: Arc<dyn UndoLog>,
    pub session_store: Arc<dyn SessionStore>,
    pub sharing: Arc<SharingRegistry>,
    pub realtime: Arc<RealtimeCoordinator>,
    pub config: Config,
    pub(crate) language_detector: language::LanguageDetector,
    /// Fingerprint lock: one short-TTL lease per `SHA-256(user_id|agent_id|text)`
    /// (spec §4.3, §5). Held only while an add for that key is in flight; the
    /// map entry is not evicted, so repeat fingerprints reuse the same mutex.
    pub(crate) fingerprint_locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

pub struct MemoryEngineBuilder {
    record_store: Option<Arc<dyn RecordStore>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    graph_store: Option<Arc<dyn GraphStore>>,
    event_bus: Option<Arc<dyn EventBus>>,
    embedder: Option<Arc<dyn Embedder>>,
    completer: Option<Arc<dyn Completer>>,
    audit_log: Option<Arc<dyn AuditLog>>,
    undo_log: Option<Arc<dyn UndoLog>>,
    session_store: Option<Arc<dyn SessionStore>>,
    config: Config,
}

impl MemoryEngineBuilder {
    pub fn new(config: Config) -> Self {
        MemoryEngineBuilder {
            record_store: None,
            vector_store: None,
            graph_store: None,
            event_bus: None,
            embedder: None,
            completer: None,
            audit_log: None,
            undo_log: None,
            session_store: None,
            config,
        }
    }

    pub fn record_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.record_store = Some(store);
        self
    }

    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    pub fn graph_store(mut self, store: Arc<dyn GraphStore>) -> Self {
        self.graph_store = Some(store);
        self
    }

    pub fn event_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn completer(mut self, completer: Arc<dyn Completer>) -> Self {
        self.completer = Some(completer);
        self
    }

    pub fn audit_log(mut self, log: Arc<dyn AuditLog>) -> Self {
        self.audit_log = Some(log);
        self
    }

    pub fn undo_log(mut self, log: Arc<dyn UndoLog>) -> Self {
        self.undo_log = Some(log);
        self
    }

    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    /// Builds the engine, defaulting any unset capability to its in-memory
    /// implementation — the shape every test harness in this crate uses.
    pub fn build(self) -> MemoryEngine {
        let queue_capacity = 256;
        MemoryEngine {
            record_store: self
                .record_store
                .unwrap_or_else(|| Arc::new(crate::storage::InMemoryRecordStore::new())),
            vector_store: self
                .vector_store
                .unwrap_or_else(|| Arc::new(crate::storage::InMemoryVectorStore::new())),
            graph_store: self
                .graph_store
                .unwrap_or_else(|| Arc::new(crate::storage::InMemoryGraphStore::new())),
            event_bus: self
                .event_bus
                .unwrap_or_else(|| Arc::new(crate::storage::InMemoryEventBus::default())),
            embedder: self
                .embedder
                .unwrap_or_else(|| Arc::new(crate::embedding::TfIdfEmbedder::new(self.config.embedding.dimensions))),
            completer: self.completer,
            audit_log: self
                .audit_log
                .unwrap_or_else(|| Arc::new(crate::journal::InMemoryAuditLog::new())),
            undo_log: self
                .undo_log
                .unwrap_or_else(|| Arc::new(crate::journal::InMemoryUndoLog::new())),
            session_store: self
                .session_store
                .unwrap_or_else(|| Arc::new(crate::storage::InMemorySessionStore::new())),
            sharing: Arc::new(SharingRegistry::new()),
            realtime: Arc::new(RealtimeCoordinator::new(queue_capacity)),
            config: self.config,
            language_detector: language::LanguageDetector::new(),
            fingerprint_locks: DashMap::new(),
        }
    }
}

/// A cooperative cancellation signal threaded through every suspension
/// point of a request (spec §5 "every operation accepts a cancellation
/// signal"). Cheap to clone; `cancel()` is visible to all clones.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<std::sync::atomic::AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> crate::error::Result<()> {
        if self.is_cancelled() {
            Err(crate::error::MemoriaError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl MemoryEngine {
    pub fn builder(config: Config) -> MemoryEngineBuilder {
        MemoryEngineBuilder::new(config)
    }

    /// A lease on this engine's in-process fingerprint lock registry,
    /// serializing concurrent identical adds (spec §4.3, §5).
    pub(crate) fn fingerprint_lock(&self, key: &str) -> Arc<AsyncMutex<()>> {
        self.fingerprint_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}
