//! Group membership lookup.
//!
//! Membership is owned by the platform's social-graph service; the
//! gateway only asks "who is in group X" at routing time. The in-memory
//! implementation serves single-node setups (seeded from config) and
//! tests.

use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::GatewayError;
use crate::ws::protocol::UserId;

#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Members of `group_id`. Unknown groups resolve to the empty set.
    async fn members_of(&self, group_id: i64) -> Result<HashSet<UserId>, GatewayError>;
}

#[derive(Default)]
pub struct InMemoryMembership {
    groups: DashMap<i64, HashSet<UserId>>,
}

impl InMemoryMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_group(&self, group_id: i64, members: HashSet<UserId>) {
        self.groups.insert(group_id, members);
    }

    pub fn add_member(&self, group_id: i64, user_id: UserId) {
        self.groups.entry(group_id).or_default().insert(user_id);
    }
}

#[async_trait]
impl MembershipStore for InMemoryMembership {
    async fn members_of(&self, group_id: i64) -> Result<HashSet<UserId>, GatewayError> {
        Ok(self
            .groups
            .get(&group_id)
            .map(|members| members.clone())
            .unwrap_or_default())
    }
}
