//! Core data model for the memory engine (spec §3)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::error::{MemoriaError, Result};

/// Opaque 128-bit memory identity
pub type MemoryId = Uuid;
/// Opaque 128-bit session identity
pub type SessionId = Uuid;
/// Opaque 128-bit shared-space identity
pub type SpaceId = Uuid;
/// Opaque 128-bit undo-log entry identity
pub type UndoId = Uuid;
/// Opaque 128-bit audit-log entry identity
pub type AuditId = Uuid;

/// Reserved metadata keys (spec §9: "dynamically typed metadata bags")
pub mod reserved_metadata_keys {
    pub const ORIGINAL_TEXT: &str = "original_text";
    pub const MENTION_COUNT: &str = "mention_count";
    pub const REPAIR_PENDING: &str = "repair_pending";
    pub const SIBLING_OF: &str = "sibling_of";
}

/// Memory classification type (spec §3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Bugfix,
    Feature,
    Decision,
    Refactor,
    Discovery,
    #[default]
    General,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Bugfix => "bugfix",
            MemoryType::Feature => "feature",
            MemoryType::Decision => "decision",
            MemoryType::Refactor => "refactor",
            MemoryType::Discovery => "discovery",
            MemoryType::General => "general",
        }
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bugfix" => Ok(MemoryType::Bugfix),
            "feature" => Ok(MemoryType::Feature),
            "decision" => Ok(MemoryType::Decision),
            "refactor" => Ok(MemoryType::Refactor),
            "discovery" => Ok(MemoryType::Discovery),
            "general" => Ok(MemoryType::General),
            _ => Err(format!("unknown memory type: {}", s)),
        }
    }
}

/// Memory concept axis (spec §3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MemoryConcept {
    HowItWorks,
    Gotcha,
    TradeOff,
    Pattern,
    #[default]
    General,
}

impl MemoryConcept {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryConcept::HowItWorks => "how-it-works",
            MemoryConcept::Gotcha => "gotcha",
            MemoryConcept::TradeOff => "trade-off",
            MemoryConcept::Pattern => "pattern",
            MemoryConcept::General => "general",
        }
    }

    /// An Observation is a Memory with non-general type/concept (spec GLOSSARY)
    pub fn is_observation_concept(&self) -> bool {
        !matches!(self, MemoryConcept::General)
    }
}

impl std::str::FromStr for MemoryConcept {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "how-it-works" | "how_it_works" => Ok(MemoryConcept::HowItWorks),
            "gotcha" => Ok(MemoryConcept::Gotcha),
            "trade-off" | "trade_off" | "tradeoff" => Ok(MemoryConcept::TradeOff),
            "pattern" => Ok(MemoryConcept::Pattern),
            "general" => Ok(MemoryConcept::General),
            _ => Err(format!("unknown memory concept: {}", s)),
        }
    }
}

/// Sharing policy for a memory (spec §3, §4.6)
///
/// `Custom` cannot be constructed with an empty `allowed_agents` set — the
/// invariant "share_policy=custom => allowed_agents non-empty" is enforced
/// at construction via [`SharePolicy::custom`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SharePolicy {
    Private,
    Shared,
    CategoryShared { category: String },
    Custom { allowed_agents: BTreeSet<String> },
}

impl Default for SharePolicy {
    fn default() -> Self {
        SharePolicy::Private
    }
}

impl SharePolicy {
    /// Construct a `Custom` policy, validating the non-empty invariant.
    pub fn custom(allowed_agents: BTreeSet<String>) -> Result<Self> {
        if allowed_agents.is_empty() {
            return Err(MemoriaError::InvalidInput(
                "custom share policy requires at least one allowed agent".into(),
            ));
        }
        Ok(SharePolicy::Custom { allowed_agents })
    }
}

/// A stored memory (spec §3 "Memory")
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: MemoryId,
    pub agent_id: String,
    pub user_id: String,

    pub text: String,
    pub summary: String,
    pub char_count: usize,
    pub token_estimate: usize,

    pub memory_type: MemoryType,
    pub memory_concept: MemoryConcept,

    pub narrative: Option<String>,
    pub before_state: Option<String>,
    pub after_state: Option<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub facts: Vec<String>,

    pub language_code: String,
    pub language_confidence: f32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub expires_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub summarized: bool,

    pub session_id: Option<SessionId>,

    #[serde(default)]
    pub share_policy: SharePolicy,

    /// Present iff the vector store holds an embedding under this id (spec §3 invariant)
    #[serde(default)]
    pub has_vector: bool,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Memory {
    /// `char_count(m) == len(m.text)` and `token_estimate(m) == ceil(char_count/4)` (spec §8)
    pub fn token_estimate_for(char_count: usize) -> usize {
        char_count.div_ceil(4)
    }

    /// Deterministic summary: `text[:200] + "..."` if `len(text) > 200`, else `text` (spec §3, §8)
    pub fn derive_summary(text: &str) -> String {
        const SUMMARY_CHARS: usize = 200;
        let char_count = text.chars().count();
        if char_count <= SUMMARY_CHARS {
            text.to_string()
        } else {
            let truncated: String = text.chars().take(SUMMARY_CHARS).collect();
            format!("{}...", truncated)
        }
    }

    /// A memory is hidden from non-administrative reads once past expiry or archived,
    /// or while a partial write is being repaired (spec §4.3, §4.10).
    pub fn is_read_visible_lifecycle(&self, now: DateTime<Utc>) -> bool {
        if self.archived_at.is_some() {
            return false;
        }
        if let Some(expires_at) = self.expires_at {
            if expires_at < now {
                return false;
            }
        }
        if self
            .metadata
            .get(reserved_metadata_keys::REPAIR_PENDING)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            return false;
        }
        true
    }
}

/// A requester identity for visibility/access evaluation (spec §4.4, §4.6)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Requester {
    pub user_id: String,
    pub agent_id: String,
}

/// Input for creating a new memory (spec §4.3 `AddMemory`)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CreateMemoryInput {
    pub text: String,
    pub agent_id: String,
    pub user_id: String,

    pub memory_type: Option<MemoryType>,
    pub memory_concept: Option<MemoryConcept>,

    pub narrative: Option<String>,
    pub before_state: Option<String>,
    pub after_state: Option<String>,
    pub files: Option<Vec<String>>,
    pub facts: Option<Vec<String>>,

    pub language_code: Option<String>,

    pub session_id: Option<SessionId>,
    pub share_policy: Option<SharePolicy>,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    pub ttl_seconds: Option<i64>,

    /// Skip the dedup probe for this add (spec §4.3 step 5)
    #[serde(default)]
    pub skip_dedup: bool,
}

/// Input for updating a memory (spec §4.3 `UpdateMemory`); `None` fields are unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateMemoryInput {
    pub text: Option<String>,
    pub memory_type: Option<MemoryType>,
    pub memory_concept: Option<MemoryConcept>,
    pub narrative: Option<String>,
    pub before_state: Option<String>,
    pub after_state: Option<String>,
    pub files: Option<Vec<String>>,
    pub facts: Option<Vec<String>>,
    pub share_policy: Option<SharePolicy>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    pub ttl_seconds: Option<Option<i64>>,
}

/// Ordering for `ListMemories`/`RecordStore::query` (spec §4.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    CreatedAtDesc,
    RelevanceDesc,
}

/// Closed set of filters a `RecordStore` query accepts (spec §4.1)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryFilter {
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub memory_type: Option<MemoryType>,
    pub memory_concept: Option<MemoryConcept>,
    pub language_code: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub file: Option<String>,
    pub session_id: Option<SessionId>,
    pub text_contains: Option<String>,
    /// Include archived/expired memories (administrative reads only)
    #[serde(default)]
    pub include_hidden: bool,
}

/// Opaque pagination cursor encoding `(created_at, id)` (spec §4.1)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub created_at: DateTime<Utc>,
    pub id: MemoryId,
}

impl Cursor {
    pub fn encode(&self) -> String {
        format!("{}|{}", self.created_at.to_rfc3339(), self.id)
    }

    pub fn decode(s: &str) -> Result<Self> {
        let (ts, id) = s
            .split_once('|')
            .ok_or_else(|| MemoriaError::InvalidInput("malformed cursor".into()))?;
        let created_at = DateTime::parse_from_rfc3339(ts)
            .map_err(|e| MemoriaError::InvalidInput(format!("malformed cursor: {}", e)))?
            .with_timezone(&Utc);
        let id = Uuid::parse_str(id)
            .map_err(|e| MemoriaError::InvalidInput(format!("malformed cursor: {}", e)))?;
        Ok(Cursor { created_at, id })
    }
}

/// A page of memories with an opaque next-cursor (spec §4.1)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

/// Weights for `SearchHybrid` (spec §4.4, §6 `search.weights`)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SearchWeights {
    pub semantic: f32,
    pub lexical: f32,
    pub recency: f32,
}

impl Default for SearchWeights {
    fn default() -> Self {
        SearchWeights {
            semantic: 0.5,
            lexical: 0.3,
            recency: 0.2,
        }
    }
}

/// A search hit with the scoring breakdown that produced it (spec §4.4)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub memory: Memory,
    pub score: f32,
    pub semantic_score: Option<f32>,
    pub lexical_score: Option<f32>,
    pub recency_score: Option<f32>,
}

/// Layer-1 progressive-disclosure hit: `(id, summary, type, created_at, token_estimate)` (spec §4.4)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexHit {
    pub id: MemoryId,
    pub summary: String,
    pub memory_type: MemoryType,
    pub created_at: DateTime<Utc>,
    pub token_estimate: usize,
}

impl From<&Memory> for IndexHit {
    fn from(m: &Memory) -> Self {
        IndexHit {
            id: m.id,
            summary: m.summary.clone(),
            memory_type: m.memory_type,
            created_at: m.created_at,
            token_estimate: m.token_estimate,
        }
    }
}

/// Facet counts for `GetFacets` (spec §4.4)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Facets {
    pub by_language: HashMap<String, i64>,
    pub by_type: HashMap<String, i64>,
    pub by_concept: HashMap<String, i64>,
    pub by_category: HashMap<String, i64>,
}

/// A conversational session grouping memories (spec §3 "Session")
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub user_id: String,
    pub agent_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }
}

/// A named group of agents with mutual visibility (spec §3 "Shared Space")
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedSpace {
    pub space_id: SpaceId,
    pub name: String,
    pub members: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

/// Event types emitted to the bus (spec §3 "Event")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    MemoryAdded,
    MemoryUpdated,
    MemoryDeleted,
    SessionStarted,
    SessionEnded,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::MemoryAdded => "memory_added",
            EventType::MemoryUpdated => "memory_updated",
            EventType::MemoryDeleted => "memory_deleted",
            EventType::SessionStarted => "session_started",
            EventType::SessionEnded => "session_ended",
        }
    }

    /// `memory_deleted` is never dropped under subscriber backpressure (spec §4.7)
    pub fn is_critical(&self) -> bool {
        matches!(self, EventType::MemoryDeleted)
    }
}

/// An event published to the bus (spec §3, §6 event channel grammar)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub memory_id: Option<MemoryId>,
    pub session_id: Option<SessionId>,
    pub agent_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl Event {
    /// Topic per spec §6: `memory.<user_id>.<agent_id>.<event_type>`
    pub fn topic(&self) -> String {
        format!("memory.{}.{}.{}", self.user_id, self.agent_id, self.event_type.as_str())
    }

    /// Idempotency key per spec §3: `(event_type, memory_id, timestamp)`
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.event_type.as_str(),
            self.memory_id.map(|m| m.to_string()).unwrap_or_default(),
            self.timestamp.to_rfc3339()
        )
    }
}

/// Status of an undo-log entry (spec §3 "Undo Entry")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndoStatus {
    Pending,
    Completed,
    Failed,
    Expired,
}

/// A reversible-operation record (spec §3, §4.9)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoEntry {
    pub undo_id: UndoId,
    pub operation_type: String,
    pub agent_id: String,
    pub original_state: serde_json::Value,
    pub new_state: serde_json::Value,
    pub memory_id: Option<MemoryId>,
    pub operation_chain_id: Option<Uuid>,
    pub status: UndoStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of an audited operation (spec §3 "Audit Entry")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Failure,
    Partial,
}

/// An append-only audit record (spec §3, §4.9)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub log_id: AuditId,
    pub timestamp: DateTime<Utc>,
    pub operation_type: String,
    pub agent_id: String,
    pub status: AuditStatus,
    pub memory_id: Option<MemoryId>,
    /// The undo entry this operation produced, if any (spec §4.9) — lets a
    /// caller that only has an audit trail still find what to undo.
    #[serde(default)]
    pub undo_id: Option<UndoId>,
    #[serde(default)]
    pub detail: HashMap<String, serde_json::Value>,
    pub execution_time_ms: f64,
    pub error_message: Option<String>,
}
