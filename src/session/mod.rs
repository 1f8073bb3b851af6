// ============================================================================
// Session Collaborator
// ============================================================================
//
// The batch layer talks to storage only through the `Session` trait: a
// stateful gateway with an identity map of managed objects and a buffer of
// pending writes that is synchronized by `flush` and purged by `clear`.
//
// `MemorySession` is the in-process implementation used by the tools and the
// test-suite.
//
// ============================================================================

pub mod change;
pub mod entity;
pub mod logging;
pub mod memory;

use crate::core::{Result, Value};
use crate::query::{Criteria, Query, QueryBuilder, StreamingResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use change::Change;
pub use entity::Entity;
pub use logging::{DiagnosticLogger, LoggerSuspension, MemoryLogger, SharedLogger, TracingLogger};
pub use memory::{MemorySession, SessionStats};

/// Name of a concrete entity type, as registered with the session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeDescriptor(String);

impl TypeDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TypeDescriptor {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for TypeDescriptor {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered tuple of identifying field values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrimaryKey(Vec<Value>);

impl PrimaryKey {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }
}

impl From<Value> for PrimaryKey {
    fn from(value: Value) -> Self {
        Self(vec![value])
    }
}

impl From<i64> for PrimaryKey {
    fn from(value: i64) -> Self {
        Self(vec![Value::Integer(value)])
    }
}

impl From<i32> for PrimaryKey {
    fn from(value: i32) -> Self {
        Self(vec![Value::from(value)])
    }
}

impl From<&str> for PrimaryKey {
    fn from(value: &str) -> Self {
        Self(vec![Value::from(value)])
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|v| v.to_string()).collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// Type plus primary key: everything needed to re-fetch an object after a purge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityIdentity {
    pub type_descriptor: TypeDescriptor,
    pub primary_key: PrimaryKey,
}

impl EntityIdentity {
    pub fn new(
        type_descriptor: impl Into<TypeDescriptor>,
        primary_key: impl Into<PrimaryKey>,
    ) -> Self {
        Self {
            type_descriptor: type_descriptor.into(),
            primary_key: primary_key.into(),
        }
    }
}

impl fmt::Display for EntityIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.type_descriptor, self.primary_key)
    }
}

/// Stateful gateway to a persistent store.
///
/// Objects handed out by a session are *managed* until the next [`Session::clear`],
/// after which they are detached and must be re-fetched by identity before
/// being written again.
///
/// All methods take `&self`; implementations are expected to use interior
/// mutability so one session can be shared through an `Arc` by a coordinator,
/// its cursors and the caller.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// Handle to a managed object.
    type Object: Clone + Send + Sync + 'static;

    /// Schedules a new object for insertion (no-op for managed objects).
    async fn persist(&self, object: &Self::Object) -> Result<()>;
    /// Schedules a managed object for deletion.
    async fn remove(&self, object: &Self::Object) -> Result<()>;
    /// Writes every pending change to storage.
    async fn flush(&self) -> Result<()>;
    /// Detaches every managed object and discards pending changes.
    async fn clear(&self) -> Result<()>;
    /// Loads an object by identity, `None` when it does not exist.
    async fn find(
        &self,
        type_descriptor: &TypeDescriptor,
        primary_key: &PrimaryKey,
    ) -> Result<Option<Self::Object>>;

    /// Resolves the concrete type and primary key of an object.
    fn class_identity(&self, object: &Self::Object) -> Result<EntityIdentity>;

    /// Installs a diagnostic statement logger and returns the previous one.
    fn set_diagnostic_logger(&self, logger: Option<SharedLogger>) -> Option<SharedLogger>;

    fn create_query_builder(&self) -> QueryBuilder {
        QueryBuilder::new()
    }

    /// Translates criteria into builder clauses.
    ///
    /// Fails with [`crate::DbError::CriteriaTranslation`] when the criteria do
    /// not fit the builder's root entity.
    fn apply_criteria(&self, builder: QueryBuilder, criteria: &Criteria) -> Result<QueryBuilder>;

    /// Executes a query as a lazy stream of `(object, auxiliary columns)` rows.
    async fn stream(&self, query: &Query) -> Result<StreamingResult<Self::Object>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_display() {
        let identity = EntityIdentity::new("user", PrimaryKey::new(vec![1.into(), "eu".into()]));
        assert_eq!(identity.to_string(), "user#(1, 'eu')");
    }

    #[test]
    fn test_identity_equality_uses_type_and_key() {
        assert_eq!(EntityIdentity::new("user", 1), EntityIdentity::new("user", 1));
        assert_ne!(EntityIdentity::new("user", 1), EntityIdentity::new("order", 1));
        assert_ne!(EntityIdentity::new("user", 1), EntityIdentity::new("user", 2));
    }
}
