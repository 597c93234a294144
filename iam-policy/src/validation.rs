//! Request validation.
//!
//! Violations are collected per field path (`policy.bindings[0].members[1]`)
//! so a rejected request reports everything wrong with it at once.

use crate::{
    hierarchy::{contains_wildcard, validate_resource_name, ROOT_RESOURCE},
    models::Policy,
    registry::RoleRegistry,
};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// A value that does not follow its grammar
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct FormatError(String);

impl FormatError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub description: String,
}

/// Every field violation found in one request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    violations: Vec<FieldViolation>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, description: impl Into<String>) {
        self.violations.push(FieldViolation {
            field: field.into(),
            description: description.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[FieldViolation] {
        &self.violations
    }

    /// Whether any violation was recorded against `field`
    pub fn has_field(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, violation) in self.violations.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", violation.field, violation.description)?;
        }
        Ok(())
    }
}

/// Checks member identity strings before they are stored
pub trait MemberValidator: Send + Sync {
    fn validate(&self, member: &str) -> Result<(), FormatError>;
}

/// Default `kind:value` member grammar
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardMemberValidator;

impl MemberValidator for StandardMemberValidator {
    fn validate(&self, member: &str) -> Result<(), FormatError> {
        let (kind, value) = member
            .split_once(':')
            .ok_or_else(|| FormatError::new("member must have the form 'kind:value'"))?;
        if kind.is_empty() || !kind.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(FormatError::new(format!("invalid member kind '{}'", kind)));
        }
        if value.is_empty() {
            return Err(FormatError::new("member value is empty"));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(FormatError::new("member value must not contain whitespace"));
        }
        Ok(())
    }
}

/// Permissions look like `service.resource.verb`
pub fn validate_permission(permission: &str) -> Result<(), FormatError> {
    let parts: Vec<&str> = permission.split('.').collect();
    if parts.len() != 3 {
        return Err(FormatError::new(
            "permission must have the form 'service.resource.verb'",
        ));
    }
    if parts
        .iter()
        .any(|part| part.is_empty() || !part.chars().all(|c| c.is_ascii_alphanumeric()))
    {
        return Err(FormatError::new(format!("invalid permission '{}'", permission)));
    }
    Ok(())
}

/// Role names look like `roles/{role}`
pub fn validate_role_name(name: &str) -> Result<(), FormatError> {
    match name.split_once('/') {
        Some(("roles", role)) if !role.contains('/') && validate_resource_name(role).is_ok() => {
            Ok(())
        }
        _ => Err(FormatError::new("role name must have the form 'roles/{role}'")),
    }
}

/// Validate a resource field that must name one concrete resource
pub fn validate_resource_field(errors: &mut ValidationErrors, field: &str, resource: &str) {
    match resource {
        ROOT_RESOURCE => {}
        "" => errors.add(field, "missing required field"),
        _ => {
            if let Err(err) = validate_resource_name(resource) {
                errors.add(field, err.to_string());
            } else if contains_wildcard(resource) {
                errors.add(field, "must not contain wildcard");
            }
        }
    }
}

/// Validate the bindings of a policy about to be written
pub fn validate_policy(
    errors: &mut ValidationErrors,
    policy: &Policy,
    roles: &RoleRegistry,
    member_validator: &dyn MemberValidator,
) {
    let mut seen_roles = HashSet::new();
    for (i, binding) in policy.bindings.iter().enumerate() {
        let role_field = format!("policy.bindings[{}].role", i);
        if binding.role.is_empty() {
            errors.add(&role_field, "missing required field");
        } else if roles.find_by_name(&binding.role).is_none() {
            errors.add(&role_field, format!("unknown role: '{}'", binding.role));
        }
        if !seen_roles.insert(binding.role.as_str()) {
            errors.add(&role_field, format!("duplicate role: '{}'", binding.role));
        }

        if binding.members.is_empty() {
            errors.add(format!("policy.bindings[{}].members", i), "missing required field");
        }
        let mut seen_members = HashSet::new();
        for (j, member) in binding.members.iter().enumerate() {
            let member_field = format!("policy.bindings[{}].members[{}]", i, j);
            if let Err(err) = member_validator.validate(member) {
                errors.add(&member_field, err.to_string());
            }
            if !seen_members.insert(member.as_str()) {
                errors.add(&member_field, "duplicate member");
            }
        }
    }
}

/// Validate the permission list of a permission test
pub fn validate_permissions(errors: &mut ValidationErrors, permissions: &[String]) {
    for (i, permission) in permissions.iter().enumerate() {
        if let Err(err) = validate_permission(permission) {
            errors.add(format!("permissions[{}]", i), err.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Binding, Role};

    fn registry() -> RoleRegistry {
        RoleRegistry::new(vec![
            Role::new("roles/viewer", ["storage.objects.get"]),
            Role::new("roles/editor", ["storage.objects.get", "storage.objects.update"]),
        ])
        .unwrap()
    }

    fn violations_for(policy: &Policy) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        validate_policy(&mut errors, policy, &registry(), &StandardMemberValidator);
        errors
    }

    #[test]
    fn test_standard_member_validator() {
        let validator = StandardMemberValidator;
        assert!(validator.validate("user:a@x.com").is_ok());
        assert!(validator.validate("serviceAccount:sa@p1.iam.example.com").is_ok());
        assert!(validator.validate("a@x.com").is_err());
        assert!(validator.validate(":a@x.com").is_err());
        assert!(validator.validate("user:").is_err());
        assert!(validator.validate("user:a b").is_err());
    }

    #[test]
    fn test_validate_permission() {
        assert!(validate_permission("storage.objects.get").is_ok());
        assert!(validate_permission("storage.objects").is_err());
        assert!(validate_permission("storage..get").is_err());
        assert!(validate_permission("storage.objects.get.extra").is_err());
        assert!(validate_permission("").is_err());
    }

    #[test]
    fn test_validate_role_name() {
        assert!(validate_role_name("roles/viewer").is_ok());
        assert!(validate_role_name("roles/").is_err());
        assert!(validate_role_name("viewer").is_err());
        assert!(validate_role_name("roles/a/b").is_err());
        assert!(validate_role_name("groups/viewer").is_err());
    }

    #[test]
    fn test_resource_field() {
        let mut errors = ValidationErrors::new();
        validate_resource_field(&mut errors, "resource", ROOT_RESOURCE);
        validate_resource_field(&mut errors, "resource", "projects/p1");
        assert!(errors.is_empty());

        validate_resource_field(&mut errors, "resource", "");
        validate_resource_field(&mut errors, "resource", "projects/-");
        assert_eq!(errors.violations().len(), 2);
        assert_eq!(errors.violations()[0].description, "missing required field");
        assert_eq!(errors.violations()[1].description, "must not contain wildcard");
    }

    #[test]
    fn test_duplicate_role_is_rejected() {
        let policy = Policy::new(vec![
            Binding::new("roles/viewer", ["user:a@x.com"]),
            Binding::new("roles/viewer", ["user:b@x.com"]),
        ]);

        let errors = violations_for(&policy);
        assert!(errors.has_field("policy.bindings[1].role"));
        assert!(!errors.has_field("policy.bindings[0].role"));
    }

    #[test]
    fn test_duplicate_member_is_rejected() {
        let policy = Policy::new(vec![Binding::new(
            "roles/viewer",
            ["user:a@x.com", "user:a@x.com"],
        )]);

        let errors = violations_for(&policy);
        assert_eq!(errors.violations().len(), 1);
        assert!(errors.has_field("policy.bindings[0].members[1]"));
    }

    #[test]
    fn test_member_may_repeat_across_bindings() {
        let policy = Policy::new(vec![
            Binding::new("roles/viewer", ["user:a@x.com"]),
            Binding::new("roles/editor", ["user:a@x.com"]),
        ]);

        assert!(violations_for(&policy).is_empty());
    }

    #[test]
    fn test_all_violations_are_collected() {
        let policy = Policy::new(vec![
            Binding::new("roles/unknown", ["user:a@x.com"]),
            Binding::new("", Vec::<String>::new()),
            Binding::new("roles/viewer", ["nokind"]),
        ]);

        let errors = violations_for(&policy);
        assert!(errors.has_field("policy.bindings[0].role"));
        assert!(errors.has_field("policy.bindings[1].role"));
        assert!(errors.has_field("policy.bindings[1].members"));
        assert!(errors.has_field("policy.bindings[2].members[0]"));
    }
}
