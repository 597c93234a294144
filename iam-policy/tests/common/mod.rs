//! Shared fixtures for the policy service integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use iam_policy::repository::{BindingStore, BindingTransaction, InMemoryBindingStore};
use iam_policy::*;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const ALICE: &str = "user:alice@example.com";
pub const BOB: &str = "user:bob@example.com";
pub const ADMINS: &str = "group:admins@example.com";

pub const OBJECTS_GET: &str = "storage.objects.get";
pub const OBJECTS_LIST: &str = "storage.objects.list";
pub const OBJECTS_UPDATE: &str = "storage.objects.update";
pub const OBJECTS_DELETE: &str = "storage.objects.delete";

pub fn catalog() -> Vec<Role> {
    vec![
        Role::new("roles/viewer", [OBJECTS_GET, OBJECTS_LIST]).with_title("Viewer"),
        Role::new("roles/editor", [OBJECTS_GET, OBJECTS_LIST, OBJECTS_UPDATE])
            .with_title("Editor"),
        Role::new(
            "roles/owner",
            [OBJECTS_GET, OBJECTS_LIST, OBJECTS_UPDATE, OBJECTS_DELETE],
        )
        .with_title("Owner")
        .with_description("Full control over objects"),
    ]
}

pub fn permissions(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

/// Resolves every request to a fixed member list
pub struct StaticCaller(pub Vec<String>);

impl StaticCaller {
    pub fn new(members: &[&str]) -> Self {
        Self(members.iter().map(|m| m.to_string()).collect())
    }
}

#[async_trait]
impl CallerResolver for StaticCaller {
    async fn resolve_caller(&self, _ctx: &RequestContext) -> anyhow::Result<Caller> {
        Ok(Caller::new(self.0.clone()))
    }
}

/// Resolves callers from the `caller` request metadata entry
pub struct MetadataCaller;

#[async_trait]
impl CallerResolver for MetadataCaller {
    async fn resolve_caller(&self, ctx: &RequestContext) -> anyhow::Result<Caller> {
        match ctx.metadata("caller") {
            Some(member) => Ok(Caller::new([member])),
            None => anyhow::bail!("request carries no caller credentials"),
        }
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    errors: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl ErrorObserver for RecordingObserver {
    fn observe(&self, _ctx: &RequestContext, error: &(dyn Error + 'static)) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

/// Counts every call that reaches the wrapped store
#[derive(Default)]
pub struct CountingStore {
    pub inner: InMemoryBindingStore,
    calls: AtomicUsize,
}

impl CountingStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BindingStore for CountingStore {
    async fn read_own_policy(&self, resource: &str) -> Result<Vec<PolicyBinding>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.read_own_policy(resource).await
    }

    async fn read_matching(
        &self,
        resources: &[String],
        members: &[String],
    ) -> Result<Vec<PolicyBinding>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.read_matching(resources, members).await
    }

    async fn begin_exclusive(
        &self,
        resource: &str,
    ) -> Result<Box<dyn BindingTransaction>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.begin_exclusive(resource).await
    }
}

/// Store whose transactions stage the replacement and then fail
#[derive(Default)]
pub struct FailingWriteStore {
    pub inner: InMemoryBindingStore,
}

struct FailingTransaction {
    inner: Box<dyn BindingTransaction>,
}

#[async_trait]
impl BindingStore for FailingWriteStore {
    async fn read_own_policy(&self, resource: &str) -> Result<Vec<PolicyBinding>, StoreError> {
        self.inner.read_own_policy(resource).await
    }

    async fn read_matching(
        &self,
        resources: &[String],
        members: &[String],
    ) -> Result<Vec<PolicyBinding>, StoreError> {
        self.inner.read_matching(resources, members).await
    }

    async fn begin_exclusive(
        &self,
        resource: &str,
    ) -> Result<Box<dyn BindingTransaction>, StoreError> {
        let inner = self.inner.begin_exclusive(resource).await?;
        Ok(Box::new(FailingTransaction { inner }))
    }
}

#[async_trait]
impl BindingTransaction for FailingTransaction {
    async fn read_own_policy(&mut self, resource: &str) -> Result<Vec<PolicyBinding>, StoreError> {
        self.inner.read_own_policy(resource).await
    }

    async fn replace_all(
        &mut self,
        resource: &str,
        rows: &[PolicyBinding],
    ) -> Result<(), StoreError> {
        self.inner.replace_all(resource, rows).await?;
        Err(StoreError::TransactionFailed("disk full".to_string()))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}

pub fn service(store: Arc<dyn BindingStore>, caller: &[&str]) -> PolicyService {
    PolicyService::new(store, catalog(), Arc::new(StaticCaller::new(caller))).unwrap()
}

pub async fn grant(service: &PolicyService, resource: &str, bindings: Vec<Binding>) -> Policy {
    service
        .set_policy(&RequestContext::new(), resource, Policy::new(bindings), None)
        .await
        .unwrap()
}
