use crate::{error::StoreError, models::PolicyBinding};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

pub mod postgres;

pub use postgres::PostgresBindingStore;

/// Storage interface for flat policy binding rows.
///
/// Rows come back in no particular order. An empty result means "no
/// bindings", never an error.
#[async_trait]
pub trait BindingStore: Send + Sync {
    /// Rows stored on exactly `resource`, without ancestors
    async fn read_own_policy(&self, resource: &str) -> Result<Vec<PolicyBinding>, StoreError>;

    /// Rows on any of `resources` granted to any of `members`, in one batch
    async fn read_matching(
        &self,
        resources: &[String],
        members: &[String],
    ) -> Result<Vec<PolicyBinding>, StoreError>;

    /// Open a transaction that excludes other writers on `resource` until it
    /// commits or rolls back
    async fn begin_exclusive(
        &self,
        resource: &str,
    ) -> Result<Box<dyn BindingTransaction>, StoreError>;
}

/// A write transaction on the binding store.
///
/// Dropping a transaction without committing rolls it back.
#[async_trait]
pub trait BindingTransaction: Send {
    async fn read_own_policy(&mut self, resource: &str) -> Result<Vec<PolicyBinding>, StoreError>;

    /// Delete every row of `resource`, then insert `rows`
    async fn replace_all(
        &mut self,
        resource: &str,
        rows: &[PolicyBinding],
    ) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// In-memory binding store for testing and development.
///
/// Write locks are kept per resource for the life of the store, including
/// resources whose policy was later cleared.
#[derive(Default)]
pub struct InMemoryBindingStore {
    bindings: Arc<DashMap<String, Vec<PolicyBinding>>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl InMemoryBindingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed rows across all resources
    pub fn row_count(&self) -> usize {
        self.bindings.iter().map(|entry| entry.value().len()).sum()
    }
}

#[async_trait]
impl BindingStore for InMemoryBindingStore {
    async fn read_own_policy(&self, resource: &str) -> Result<Vec<PolicyBinding>, StoreError> {
        Ok(self
            .bindings
            .get(resource)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn read_matching(
        &self,
        resources: &[String],
        members: &[String],
    ) -> Result<Vec<PolicyBinding>, StoreError> {
        let members: HashSet<&str> = members.iter().map(String::as_str).collect();
        let mut rows = Vec::new();
        for resource in resources {
            if let Some(entry) = self.bindings.get(resource) {
                rows.extend(
                    entry
                        .value()
                        .iter()
                        .filter(|row| members.contains(row.member.as_str()))
                        .cloned(),
                );
            }
        }
        Ok(rows)
    }

    async fn begin_exclusive(
        &self,
        resource: &str,
    ) -> Result<Box<dyn BindingTransaction>, StoreError> {
        let lock = Arc::clone(&self.locks.entry(resource.to_string()).or_default());
        let guard = lock.lock_owned().await;
        debug!("Acquired in-memory write lock on {}", resource);

        Ok(Box::new(InMemoryBindingTransaction {
            bindings: Arc::clone(&self.bindings),
            staged: HashMap::new(),
            _guard: guard,
        }))
    }
}

struct InMemoryBindingTransaction {
    bindings: Arc<DashMap<String, Vec<PolicyBinding>>>,
    staged: HashMap<String, Vec<PolicyBinding>>,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl BindingTransaction for InMemoryBindingTransaction {
    async fn read_own_policy(&mut self, resource: &str) -> Result<Vec<PolicyBinding>, StoreError> {
        if let Some(rows) = self.staged.get(resource) {
            return Ok(rows.clone());
        }
        Ok(self
            .bindings
            .get(resource)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn replace_all(
        &mut self,
        resource: &str,
        rows: &[PolicyBinding],
    ) -> Result<(), StoreError> {
        if let Some(row) = rows.iter().find(|row| row.resource != resource) {
            return Err(StoreError::InvalidRow(format!(
                "row for '{}' written to '{}'",
                row.resource, resource
            )));
        }
        self.staged.insert(resource.to_string(), rows.to_vec());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let Self {
            bindings, staged, ..
        } = *self;
        for (resource, rows) in staged {
            if rows.is_empty() {
                bindings.remove(&resource);
            } else {
                bindings.insert(resource, rows);
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn row(resource: &str, role: &str, member: &str) -> PolicyBinding {
        PolicyBinding {
            resource: resource.to_string(),
            binding_index: 0,
            role: role.to_string(),
            member_index: 0,
            member: member.to_string(),
        }
    }

    #[tokio::test]
    async fn test_replace_is_invisible_until_commit() {
        let store = InMemoryBindingStore::new();
        let rows = vec![row("projects/p1", "roles/viewer", "user:a@x.com")];

        let mut tx = store.begin_exclusive("projects/p1").await.unwrap();
        tx.replace_all("projects/p1", &rows).await.unwrap();

        assert!(store.read_own_policy("projects/p1").await.unwrap().is_empty());
        assert_eq!(tx.read_own_policy("projects/p1").await.unwrap(), rows);

        tx.commit().await.unwrap();
        assert_eq!(store.read_own_policy("projects/p1").await.unwrap(), rows);
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes() {
        let store = InMemoryBindingStore::new();

        {
            let mut tx = store.begin_exclusive("projects/p1").await.unwrap();
            tx.replace_all("projects/p1", &[row("projects/p1", "roles/viewer", "user:a@x.com")])
                .await
                .unwrap();
        }

        assert_eq!(store.row_count(), 0);
    }

    #[tokio::test]
    async fn test_read_matching_filters_resources_and_members() {
        let store = InMemoryBindingStore::new();
        for resource in ["/", "projects/p1", "projects/p2"] {
            let mut tx = store.begin_exclusive(resource).await.unwrap();
            tx.replace_all(
                resource,
                &[
                    row(resource, "roles/viewer", "user:a@x.com"),
                    PolicyBinding {
                        member_index: 1,
                        ..row(resource, "roles/viewer", "user:b@x.com")
                    },
                ],
            )
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }

        let rows = store
            .read_matching(
                &["/".to_string(), "projects/p1".to_string()],
                &["user:a@x.com".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.member == "user:a@x.com"));
        assert!(rows.iter().all(|r| r.resource != "projects/p2"));
    }

    #[tokio::test]
    async fn test_second_writer_waits_for_first() {
        let store = Arc::new(InMemoryBindingStore::new());
        let first = store.begin_exclusive("projects/p1").await.unwrap();

        let contender = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.begin_exclusive("projects/p1").await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // Other resources are not blocked
        store.begin_exclusive("projects/p2").await.unwrap();

        first.rollback().await.unwrap();
        contender.await.unwrap().unwrap();
    }
}
