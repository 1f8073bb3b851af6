use crate::core::{DbError, Result};
use crate::session::{EntityIdentity, Session};
use log::warn;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Reference bag shared between a caller and the cursors that reload it.
pub type SharedReferenceBag<S> = Arc<Mutex<ReferenceBag<S>>>;

/// One pinned object.
///
/// `identity` is captured when the object is pinned and never re-derived,
/// so the entry stays reloadable after the object it was taken from is
/// detached.
#[derive(Debug, Clone)]
pub struct PinnedEntity<O> {
    key: String,
    object: Option<O>,
    identity: EntityIdentity,
}

impl<O> PinnedEntity<O> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current reference; `None` once a reload found the entity gone.
    pub fn object(&self) -> Option<&O> {
        self.object.as_ref()
    }

    pub fn identity(&self) -> &EntityIdentity {
        &self.identity
    }
}

/// Keeps a handful of objects usable across identity-map purges.
///
/// A `clear` detaches every object the session handed out. Objects pinned
/// here are re-fetched by identity on [`ReferenceBag::reload`], which batch
/// cursors call right after each purge.
///
/// # Examples
///
/// ```
/// use batchdb::{Column, DataType, Entity, EntitySchema, MemorySession, ReferenceBag, Session};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> batchdb::Result<()> {
/// let session = Arc::new(MemorySession::new());
/// session.register(EntitySchema::new("user", vec![Column::new("id", DataType::Integer)]))?;
/// let owner = Entity::new("user").with("id", 1);
/// session.persist(&owner).await?;
/// session.flush().await?;
///
/// let mut bag = ReferenceBag::new(session.clone());
/// bag.set("owner", owner.clone())?;
///
/// session.clear().await?;
/// bag.reload().await?;
///
/// let reloaded = bag.get("owner")?.expect("owner still stored");
/// assert!(!reloaded.same_instance(&owner));
/// assert!(session.is_managed(&reloaded));
/// # Ok(())
/// # }
/// ```
pub struct ReferenceBag<S: Session> {
    session: Arc<S>,
    entries: BTreeMap<String, PinnedEntity<S::Object>>,
}

impl<S: Session> ReferenceBag<S> {
    pub fn new(session: Arc<S>) -> Self {
        Self {
            session,
            entries: BTreeMap::new(),
        }
    }

    pub fn shared(session: Arc<S>) -> SharedReferenceBag<S> {
        Arc::new(Mutex::new(Self::new(session)))
    }

    /// Pins `object` under `key`, replacing any previous entry.
    pub fn set(&mut self, key: impl Into<String>, object: S::Object) -> Result<()> {
        let identity = self.session.class_identity(&object)?;
        let key = key.into();
        self.entries.insert(
            key.clone(),
            PinnedEntity {
                key,
                object: Some(object),
                identity,
            },
        );
        Ok(())
    }

    /// Returns the pinned reference.
    ///
    /// Fails with [`DbError::NotFound`] for an unknown key; `Ok(None)` means
    /// the entity no longer existed at the last reload.
    pub fn get(&self, key: &str) -> Result<Option<S::Object>> {
        self.entries
            .get(key)
            .map(|entry| entry.object.clone())
            .ok_or_else(|| DbError::NotFound(key.to_string()))
    }

    pub fn entry(&self, key: &str) -> Option<&PinnedEntity<S::Object>> {
        self.entries.get(key)
    }

    pub fn identity(&self, key: &str) -> Option<&EntityIdentity> {
        self.entries.get(key).map(PinnedEntity::identity)
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Re-fetches every pinned object by its captured identity.
    ///
    /// A vanished entity leaves a `None` placeholder instead of failing the
    /// whole reload; session errors propagate.
    pub async fn reload(&mut self) -> Result<()> {
        for entry in self.entries.values_mut() {
            let identity = &entry.identity;
            entry.object = self
                .session
                .find(&identity.type_descriptor, &identity.primary_key)
                .await?;

            if entry.object.is_none() {
                warn!(
                    "Pinned entity '{}' ({}) no longer exists in storage",
                    entry.key, identity
                );
            }
        }
        Ok(())
    }
}
