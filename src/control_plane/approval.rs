//! Pending-approval queue for gated lifecycle proposals (spec §4.5)
//!
//! `AutoDeduplicate`/`SummarizeOldMemories` run as dry-run first; when
//! `require_approval` is set, the dry-run report is parked here instead of
//! being applied immediately, and a separate `Approve`/`Reject` call drives
//! it to [`crate::lifecycle::dedup::apply`] / [`crate::lifecycle::summarize::apply`].

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MemoriaError, Result};
use crate::lifecycle::{dedup::DedupReport, summarize::SummarizeReport};

pub type ApprovalId = Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProposedChange {
    Dedup(DedupReport),
    Summarize(SummarizeReport),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub approval_id: ApprovalId,
    pub user_id: String,
    pub change: ProposedChange,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Holds reports awaiting a human (or calling agent)'s go-ahead. Entries
/// are removed once approved or rejected; nothing expires them on its own,
/// matching the teacher's preference for explicit state transitions over
/// background sweeps for anything the caller is expected to act on soon.
#[derive(Default)]
pub struct ApprovalQueue {
    pending: DashMap<ApprovalId, PendingApproval>,
}

impl ApprovalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&self, user_id: &str, change: ProposedChange) -> PendingApproval {
        let approval = PendingApproval {
            approval_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            change,
            created_at: chrono::Utc::now(),
        };
        self.pending.insert(approval.approval_id, approval.clone());
        approval
    }

    pub fn get(&self, approval_id: ApprovalId) -> Result<PendingApproval> {
        self.pending
            .get(&approval_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| MemoriaError::NotFound(format!("pending approval {}", approval_id)))
    }

    /// Removes and returns the approval so the caller can apply it exactly once.
    pub fn take(&self, approval_id: ApprovalId) -> Result<PendingApproval> {
        self.pending
            .remove(&approval_id)
            .map(|(_, approval)| approval)
            .ok_or_else(|| MemoriaError::NotFound(format!("pending approval {}", approval_id)))
    }

    pub fn reject(&self, approval_id: ApprovalId) -> Result<()> {
        self.take(approval_id).map(|_| ())
    }

    pub fn list(&self, user_id: &str) -> Vec<PendingApproval> {
        self.pending
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.clone())
            .collect()
    }
}
