use crate::{error::PolicyError, models::Role};
use std::collections::{HashMap, HashSet};

/// Immutable catalog of roles and the permissions they grant.
///
/// Built once at startup and shared by reference between requests.
#[derive(Debug, Clone, Default)]
pub struct RoleRegistry {
    roles: HashMap<String, Role>,
    permissions: HashMap<String, HashSet<String>>,
}

impl RoleRegistry {
    /// Build the registry, rejecting duplicate names and roles without
    /// permissions.
    pub fn new(roles: impl IntoIterator<Item = Role>) -> Result<Self, PolicyError> {
        let mut registry = Self::default();
        for role in roles {
            if registry.roles.contains_key(&role.name) {
                return Err(PolicyError::InvalidRoleCatalog(format!(
                    "duplicate role '{}'",
                    role.name
                )));
            }
            if role.included_permissions.is_empty() {
                return Err(PolicyError::InvalidRoleCatalog(format!(
                    "role '{}' has no permissions",
                    role.name
                )));
            }
            registry.permissions.insert(
                role.name.clone(),
                role.included_permissions.iter().cloned().collect(),
            );
            registry.roles.insert(role.name.clone(), role);
        }
        Ok(registry)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Role> {
        self.roles.get(name)
    }

    /// False for roles the registry does not know
    pub fn has_permission(&self, role_name: &str, permission: &str) -> bool {
        self.permissions
            .get(role_name)
            .is_some_and(|permissions| permissions.contains(permission))
    }

    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.roles.values()
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}
