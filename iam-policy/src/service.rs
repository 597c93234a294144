use crate::{
    assembler::{policy_from_rows, policy_to_rows},
    caller::{CallerResolver, ErrorObserver, TracingErrorObserver},
    config::PolicyServiceConfig,
    error::{IntegrityError, PolicyError, StoreError},
    etag::{compute_etag, ETag},
    hierarchy::{ancestors_of, contains_wildcard},
    models::{Policy, PolicyBinding, RequestContext, Role},
    registry::RoleRegistry,
    repository::{BindingStore, BindingTransaction},
    validation::{
        validate_permissions, validate_policy, validate_resource_field, validate_role_name,
        MemberValidator, StandardMemberValidator, ValidationErrors,
    },
};
use std::collections::HashSet;
use std::error::Error;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// IAM policy service: reads, replaces and evaluates resource policies
pub struct PolicyService {
    /// Storage for flat binding rows
    store: Arc<dyn BindingStore>,

    /// Role catalog, shared read-only between requests
    roles: Arc<RoleRegistry>,

    /// Maps a request to its principal's member identities
    caller_resolver: Arc<dyn CallerResolver>,

    member_validator: Arc<dyn MemberValidator>,

    error_observer: Option<Arc<dyn ErrorObserver>>,

    /// Bound applied to every storage call
    storage_timeout: Option<Duration>,
}

impl PolicyService {
    /// Create a service, building the role registry from `roles`.
    ///
    /// A malformed catalog fails here rather than on the first request.
    pub fn new(
        store: Arc<dyn BindingStore>,
        roles: Vec<Role>,
        caller_resolver: Arc<dyn CallerResolver>,
    ) -> Result<Self, PolicyError> {
        let registry = RoleRegistry::new(roles)?;
        Ok(Self::with_registry(store, Arc::new(registry), caller_resolver))
    }

    /// Create a service sharing an already built registry
    pub fn with_registry(
        store: Arc<dyn BindingStore>,
        roles: Arc<RoleRegistry>,
        caller_resolver: Arc<dyn CallerResolver>,
    ) -> Self {
        Self {
            store,
            roles,
            caller_resolver,
            member_validator: Arc::new(StandardMemberValidator),
            error_observer: None,
            storage_timeout: None,
        }
    }

    /// Replace the standard member grammar check
    pub fn with_member_validator(mut self, validator: Arc<dyn MemberValidator>) -> Self {
        self.member_validator = validator;
        self
    }

    pub fn with_error_observer(mut self, observer: Arc<dyn ErrorObserver>) -> Self {
        self.error_observer = Some(observer);
        self
    }

    pub fn with_storage_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.storage_timeout = timeout;
        self
    }

    /// Apply the storage timeout and, unless an observer is already set,
    /// log observed errors through `tracing`
    pub fn with_config(mut self, config: &PolicyServiceConfig) -> Self {
        if self.error_observer.is_none() {
            self.error_observer = Some(Arc::new(TracingErrorObserver::from_logger_config(
                &config.logging,
            )));
        }
        self.with_storage_timeout(config.storage_timeout())
    }

    pub fn roles(&self) -> Arc<RoleRegistry> {
        self.roles.clone()
    }

    // =============================================================================
    // Policy Operations
    // =============================================================================

    /// Get the policy set directly on `resource`.
    ///
    /// A resource without bindings yields an empty policy with a valid etag.
    pub async fn get_policy(
        &self,
        ctx: &RequestContext,
        resource: &str,
    ) -> Result<Policy, PolicyError> {
        let mut errors = ValidationErrors::new();
        validate_resource_field(&mut errors, "resource", resource);
        errors.into_result()?;

        let rows = self.storage(ctx, self.store.read_own_policy(resource)).await?;
        let policy = self.assemble(ctx, rows)?;
        let etag = compute_etag(&policy)?;

        debug!("Read policy on {} with {} bindings", resource, policy.bindings.len());
        Ok(policy.with_etag(etag))
    }

    /// Replace the policy on `resource`.
    ///
    /// When `if_match` is a non-empty etag the write only happens if it still
    /// matches the stored policy; otherwise the last writer wins. The
    /// `etag` field of `policy` itself is not consulted. The returned policy
    /// carries the etag of what was written.
    pub async fn set_policy(
        &self,
        ctx: &RequestContext,
        resource: &str,
        policy: Policy,
        if_match: Option<&ETag>,
    ) -> Result<Policy, PolicyError> {
        let mut errors = ValidationErrors::new();
        validate_resource_field(&mut errors, "resource", resource);
        validate_policy(
            &mut errors,
            &policy,
            &self.roles,
            self.member_validator.as_ref(),
        );
        errors.into_result()?;

        info!("Setting policy on {} with {} bindings", resource, policy.bindings.len());
        let rows = policy_to_rows(resource, &policy);
        let if_match = if_match.filter(|etag| !etag.is_empty());

        let mut tx = self.storage(ctx, self.store.begin_exclusive(resource)).await?;
        let outcome = self
            .replace_in_transaction(ctx, tx.as_mut(), resource, &rows, if_match)
            .await;
        if let Err(err) = outcome {
            self.rollback(ctx, tx).await;
            return Err(err);
        }
        self.storage(ctx, tx.commit()).await?;

        let etag = compute_etag(&policy)?;
        Ok(Policy {
            bindings: policy.bindings,
            etag,
        })
    }

    async fn replace_in_transaction(
        &self,
        ctx: &RequestContext,
        tx: &mut dyn BindingTransaction,
        resource: &str,
        rows: &[PolicyBinding],
        if_match: Option<&ETag>,
    ) -> Result<(), PolicyError> {
        if let Some(expected) = if_match {
            let current_rows = self.storage(ctx, tx.read_own_policy(resource)).await?;
            let current = compute_etag(&self.assemble(ctx, current_rows)?)?;
            if current.as_bytes() != expected.as_bytes() {
                warn!("Freshness check failed for policy on {}", resource);
                return Err(PolicyError::Conflict);
            }
        }

        self.storage(ctx, tx.replace_all(resource, rows)).await
    }

    /// Roll back under the storage timeout. A rollback that times out drops
    /// the transaction, which discards it as well.
    async fn rollback(&self, ctx: &RequestContext, tx: Box<dyn BindingTransaction>) {
        // Failures are already reported; the caller returns its own error.
        let _ = self.storage(ctx, tx.rollback()).await;
    }

    // =============================================================================
    // Permission Evaluation
    // =============================================================================

    /// Subset of `permissions` the caller holds on `resource`, including
    /// grants inherited from ancestors, in request order
    pub async fn test_permissions(
        &self,
        ctx: &RequestContext,
        resource: &str,
        permissions: &[String],
    ) -> Result<Vec<String>, PolicyError> {
        let mut errors = ValidationErrors::new();
        validate_resource_field(&mut errors, "resource", resource);
        validate_permissions(&mut errors, permissions);
        errors.into_result()?;

        let caller = self
            .caller_resolver
            .resolve_caller(ctx)
            .await
            .map_err(|err| {
                self.report(ctx, &*err);
                PolicyError::Unauthenticated
            })?;
        if caller.members.is_empty() || permissions.is_empty() {
            return Ok(Vec::new());
        }

        let resources = ancestors_of(resource);
        let rows = self
            .storage(ctx, self.store.read_matching(&resources, &caller.members))
            .await?;

        let mut granted: HashSet<&str> = HashSet::new();
        for row in &rows {
            if self.roles.find_by_name(&row.role).is_none() {
                self.report(
                    ctx,
                    &IntegrityError::UnknownRole {
                        resource: row.resource.clone(),
                        role: row.role.clone(),
                    },
                );
                continue;
            }
            for permission in permissions {
                if self.roles.has_permission(&row.role, permission) {
                    granted.insert(permission.as_str());
                }
            }
        }

        debug!(
            "Caller holds {} of {} permissions on {}",
            granted.len(),
            permissions.len(),
            resource
        );
        Ok(permissions
            .iter()
            .filter(|permission| granted.contains(permission.as_str()))
            .cloned()
            .collect())
    }

    // =============================================================================
    // Role Catalog
    // =============================================================================

    /// Look up a role by its `roles/{role}` name
    pub fn get_role(&self, name: &str) -> Result<Role, PolicyError> {
        let mut errors = ValidationErrors::new();
        if name.is_empty() {
            errors.add("name", "required field");
        } else if contains_wildcard(name) {
            errors.add("name", "must not contain wildcards");
        } else if validate_role_name(name).is_err() {
            errors.add("name", "invalid format");
        }
        errors.into_result()?;

        self.roles
            .find_by_name(name)
            .cloned()
            .ok_or_else(|| PolicyError::NotFound(format!("role '{}'", name)))
    }

    // =============================================================================
    // Internals
    // =============================================================================

    /// Run a storage call under the configured timeout. Failures are reported
    /// to the observer and surface as an opaque storage error.
    async fn storage<T>(
        &self,
        ctx: &RequestContext,
        operation: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, PolicyError> {
        let result = match self.storage_timeout {
            Some(limit) => tokio::time::timeout(limit, operation)
                .await
                .unwrap_or(Err(StoreError::Timeout(limit))),
            None => operation.await,
        };

        result.map_err(|err| {
            self.report(ctx, &err);
            PolicyError::Storage
        })
    }

    fn assemble(
        &self,
        ctx: &RequestContext,
        rows: Vec<PolicyBinding>,
    ) -> Result<Policy, PolicyError> {
        policy_from_rows(rows).map_err(|err| {
            self.report(ctx, &err);
            PolicyError::DataIntegrity
        })
    }

    fn report(&self, ctx: &RequestContext, error: &(dyn Error + 'static)) {
        if let Some(ref observer) = self.error_observer {
            observer.observe(ctx, error);
        }
    }
}
