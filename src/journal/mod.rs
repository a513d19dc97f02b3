//! Operation journal: audit trail and undo log (spec §3, §4.9)

pub mod audit;
pub mod undo;

pub use audit::{AuditFilter, AuditLog, InMemoryAuditLog};
pub use undo::{InMemoryUndoLog, UndoLog};
