use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

use super::auth::Actor;

pub const PERFORMANCE_VIEW: &str = "performance.view";
pub const PERFORMANCE_MANAGE: &str = "performance.manage";

/// Authorization collaborator consulted before every data operation.
#[async_trait]
pub trait CapabilityChecker: Send + Sync {
    async fn has_capability(&self, actor: &Actor, capability: &str) -> bool;
}

/// Grants a capability when the token lists it or any of the actor's roles maps to it.
#[derive(Debug, Clone, Default)]
pub struct RoleCapabilities {
    roles: HashMap<String, HashSet<String>>,
}

impl RoleCapabilities {
    pub fn new(role_capabilities: &HashMap<String, Vec<String>>) -> Self {
        let roles = role_capabilities
            .iter()
            .map(|(role, caps)| (role.to_lowercase(), caps.iter().cloned().collect()))
            .collect();
        Self { roles }
    }

    pub fn with_role(mut self, role: &str, capabilities: &[&str]) -> Self {
        self.roles
            .entry(role.to_lowercase())
            .or_default()
            .extend(capabilities.iter().map(|c| c.to_string()));
        self
    }

    fn role_grants(&self, role: &str, capability: &str) -> bool {
        self.roles
            .get(&role.to_lowercase())
            .is_some_and(|caps| caps.contains(capability))
    }
}

#[async_trait]
impl CapabilityChecker for RoleCapabilities {
    async fn has_capability(&self, actor: &Actor, capability: &str) -> bool {
        actor.capabilities.iter().any(|c| c == capability)
            || actor.roles.iter().any(|r| self.role_grants(r, capability))
    }
}
