//! Hierarchical IAM policy service for RustCare Engine
//!
//! Every resource in a hierarchical namespace may carry a policy granting
//! roles to members. Policies are inherited down the hierarchy: a grant on
//! `projects/p1` also applies to `projects/p1/datasets/d1`, and a grant on the
//! root resource `/` applies everywhere.
//!
//! # Core Concepts
//!
//! - **Resource**: a path of alternating collection/id segments
//! - **Role**: a named bundle of permissions from an immutable catalog
//! - **Binding**: one role granted to an ordered list of members
//! - **Policy**: the ordered bindings of one resource plus an etag
//! - **Binding row**: the flat storage form of one member's grant
//!
//! Policies are stored only as binding rows and rebuilt on every read. Writes
//! replace the whole row set of a resource inside one transaction, guarded by
//! an optional etag for optimistic concurrency.
//!
//! # Example
//!
//! ```rust,no_run
//! use iam_policy::{
//!     repository::InMemoryBindingStore, Binding, Caller, CallerResolver, Policy,
//!     PolicyService, RequestContext, Role,
//! };
//! use std::sync::Arc;
//!
//! struct StaticCaller;
//!
//! #[async_trait::async_trait]
//! impl CallerResolver for StaticCaller {
//!     async fn resolve_caller(&self, _ctx: &RequestContext) -> anyhow::Result<Caller> {
//!         Ok(Caller::new(["user:alice@example.com"]))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = PolicyService::new(
//!         Arc::new(InMemoryBindingStore::new()),
//!         vec![Role::new("roles/viewer", ["storage.objects.get"])],
//!         Arc::new(StaticCaller),
//!     )?;
//!     let ctx = RequestContext::new();
//!
//!     let policy = Policy::new(vec![Binding::new(
//!         "roles/viewer",
//!         ["user:alice@example.com"],
//!     )]);
//!     service.set_policy(&ctx, "projects/p1", policy, None).await?;
//!
//!     let held = service
//!         .test_permissions(
//!             &ctx,
//!             "projects/p1/datasets/d1",
//!             &["storage.objects.get".to_string()],
//!         )
//!         .await?;
//!     assert_eq!(held, vec!["storage.objects.get"]);
//!
//!     Ok(())
//! }
//! ```

pub mod assembler;
pub mod caller;
pub mod config;
pub mod error;
pub mod etag;
pub mod hierarchy;
pub mod models;
pub mod registry;
pub mod repository;
pub mod service;
pub mod validation;

pub use caller::*;
pub use config::*;
pub use error::{IntegrityError, PolicyError, StoreError};
pub use etag::{compute_etag, ETag};
pub use hierarchy::{ancestors_of, ROOT_RESOURCE};
pub use models::*;
pub use registry::RoleRegistry;
pub use service::PolicyService;
pub use validation::{FieldViolation, MemberValidator, StandardMemberValidator, ValidationErrors};
