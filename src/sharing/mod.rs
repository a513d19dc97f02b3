//! Sharing & access layer (spec §4.4 visibility filter, §4.6)
//!
//! Generalizes the teacher's `auth::permissions` shape (a `HashSet`-backed
//! set type with `has_*`/`add`/`merge`) from per-resource-type RBAC to this
//! spec's per-memory visibility rules.

use dashmap::DashMap;
use std::collections::BTreeSet;

use crate::error::{MemoriaError, Result};
use crate::types::{Memory, Requester, SharePolicy, SpaceId, SharedSpace};

/// Why a [`SharingRegistry::check_access`] call returned what it did —
/// surfaced verbatim by the `CheckMemoryAccess` operation (spec §8 scenario 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessReason {
    Owner,
    Shared,
    CategoryShared,
    Custom,
    SharedSpace,
    Denied,
}

impl AccessReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessReason::Owner => "owner",
            AccessReason::Shared => "shared",
            AccessReason::CategoryShared => "category",
            AccessReason::Custom => "custom",
            AccessReason::SharedSpace => "space",
            AccessReason::Denied => "denied",
        }
    }
}

/// Tracks Shared Spaces and category memberships within one tenant
/// (`user_id`). `category_shared`'s vocabulary is left to the tenant (spec
/// §9 open question): a category is an opaque string key, and "same
/// category" means the requester's agent was explicitly added as a member
/// of that category by the tenant.
#[derive(Default)]
pub struct SharingRegistry {
    spaces: DashMap<SpaceId, SharedSpace>,
    category_members: DashMap<String, BTreeSet<String>>,
}

impl SharingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_space(&self, name: String, members: BTreeSet<String>) -> SharedSpace {
        let space = SharedSpace {
            space_id: uuid::Uuid::new_v4(),
            name,
            members,
            created_at: chrono::Utc::now(),
        };
        self.spaces.insert(space.space_id, space.clone());
        space
    }

    pub fn get_space(&self, space_id: SpaceId) -> Result<SharedSpace> {
        self.spaces
            .get(&space_id)
            .map(|s| s.clone())
            .ok_or_else(|| MemoriaError::NotFound(format!("shared space {}", space_id)))
    }

    pub fn add_category_member(&self, category: &str, agent_id: &str) {
        self.category_members
            .entry(category.to_string())
            .or_default()
            .insert(agent_id.to_string());
    }

    fn shares_space(&self, agent_a: &str, agent_b: &str) -> bool {
        self.spaces
            .iter()
            .any(|entry| entry.members.contains(agent_a) && entry.members.contains(agent_b))
    }

    fn is_category_member(&self, category: &str, agent_id: &str) -> bool {
        self.category_members
            .get(category)
            .map(|members| members.contains(agent_id))
            .unwrap_or(false)
    }

    /// Evaluates the six visibility rules of spec §4.4 against one memory.
    pub fn check_access(&self, memory: &Memory, requester: &Requester) -> (bool, AccessReason) {
        if requester.user_id != memory.user_id {
            return (false, AccessReason::Denied);
        }

        match &memory.share_policy {
            SharePolicy::Private => {
                if requester.agent_id == memory.agent_id {
                    return (true, AccessReason::Owner);
                }
            }
            SharePolicy::Shared => return (true, AccessReason::Shared),
            SharePolicy::CategoryShared { category } => {
                if self.is_category_member(category, &requester.agent_id) {
                    return (true, AccessReason::CategoryShared);
                }
            }
            SharePolicy::Custom { allowed_agents } => {
                if allowed_agents.contains(&requester.agent_id) {
                    return (true, AccessReason::Custom);
                }
            }
        }

        if self.shares_space(&requester.agent_id, &memory.agent_id) {
            return (true, AccessReason::SharedSpace);
        }

        (false, AccessReason::Denied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MemoryConcept, MemoryType};
    use uuid::Uuid;

    fn sample_memory(share_policy: SharePolicy) -> Memory {
        let now = chrono::Utc::now();
        Memory {
            id: Uuid::new_v4(),
            agent_id: "owner-agent".into(),
            user_id: "u1".into(),
            text: "secret".into(),
            summary: "secret".into(),
            char_count: 6,
            token_estimate: 2,
            memory_type: MemoryType::General,
            memory_concept: MemoryConcept::General,
            narrative: None,
            before_state: None,
            after_state: None,
            files: vec![],
            facts: vec![],
            language_code: "en".into(),
            language_confidence: 1.0,
            created_at: now,
            updated_at: now,
            expires_at: None,
            archived_at: None,
            summarized: false,
            session_id: None,
            share_policy,
            has_vector: false,
            metadata: Default::default(),
        }
    }

    #[test]
    fn owner_sees_private_memory() {
        let registry = SharingRegistry::new();
        let memory = sample_memory(SharePolicy::Private);
        let requester = Requester {
            user_id: "u1".into(),
            agent_id: "owner-agent".into(),
        };
        assert_eq!(registry.check_access(&memory, &requester), (true, AccessReason::Owner));
    }

    #[test]
    fn other_agent_denied_private_memory() {
        let registry = SharingRegistry::new();
        let memory = sample_memory(SharePolicy::Private);
        let requester = Requester {
            user_id: "u1".into(),
            agent_id: "other-agent".into(),
        };
        assert_eq!(
            registry.check_access(&memory, &requester),
            (false, AccessReason::Denied)
        );
    }

    #[test]
    fn custom_policy_grants_only_allowed_agents() {
        let registry = SharingRegistry::new();
        let mut allowed = BTreeSet::new();
        allowed.insert("a2".to_string());
        let memory = sample_memory(SharePolicy::Custom { allowed_agents: allowed });

        let allowed_requester = Requester {
            user_id: "u1".into(),
            agent_id: "a2".into(),
        };
        assert_eq!(
            registry.check_access(&memory, &allowed_requester),
            (true, AccessReason::Custom)
        );

        let denied_requester = Requester {
            user_id: "u1".into(),
            agent_id: "a3".into(),
        };
        assert_eq!(
            registry.check_access(&memory, &denied_requester),
            (false, AccessReason::Denied)
        );
    }

    #[test]
    fn different_user_always_denied_regardless_of_policy() {
        let registry = SharingRegistry::new();
        let memory = sample_memory(SharePolicy::Shared);
        let requester = Requester {
            user_id: "u2".into(),
            agent_id: "owner-agent".into(),
        };
        assert_eq!(
            registry.check_access(&memory, &requester),
            (false, AccessReason::Denied)
        );
    }

    #[test]
    fn shared_space_membership_grants_private_memory_access() {
        let registry = SharingRegistry::new();
        let mut members = BTreeSet::new();
        members.insert("owner-agent".to_string());
        members.insert("teammate-agent".to_string());
        registry.create_space("team-alpha".into(), members);

        let memory = sample_memory(SharePolicy::Private);
        let requester = Requester {
            user_id: "u1".into(),
            agent_id: "teammate-agent".into(),
        };
        assert_eq!(
            registry.check_access(&memory, &requester),
            (true, AccessReason::SharedSpace)
        );
    }
}
