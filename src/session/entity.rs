use super::TypeDescriptor;
use crate::core::{Fields, Value};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug)]
struct EntityData {
    type_descriptor: TypeDescriptor,
    fields: Fields,
}

/// Shared handle to an entity instance.
///
/// Cloning the handle does not copy the entity: clones observe each other's
/// writes. [`Entity::same_instance`] tells whether two handles point at the
/// same in-memory instance, which is how a session distinguishes its managed
/// objects from detached copies carrying the same identity.
#[derive(Clone)]
pub struct Entity {
    inner: Arc<RwLock<EntityData>>,
}

impl Entity {
    pub fn new(type_descriptor: impl Into<TypeDescriptor>) -> Self {
        Self::from_fields(type_descriptor, Fields::new())
    }

    pub fn from_fields(type_descriptor: impl Into<TypeDescriptor>, fields: Fields) -> Self {
        Self {
            inner: Arc::new(RwLock::new(EntityData {
                type_descriptor: type_descriptor.into(),
                fields,
            })),
        }
    }

    /// Builder-style field assignment.
    pub fn with(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn type_descriptor(&self) -> TypeDescriptor {
        self.read().type_descriptor.clone()
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        self.read().fields.get(field).cloned()
    }

    pub fn set(&self, field: impl Into<String>, value: impl Into<Value>) {
        self.write().fields.insert(field.into(), value.into());
    }

    /// Copy of the current field values.
    pub fn fields(&self) -> Fields {
        self.read().fields.clone()
    }

    pub fn same_instance(&self, other: &Entity) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // every write is a single map insert, so poisoning is ignored
    fn read(&self) -> RwLockReadGuard<'_, EntityData> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, EntityData> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.read();
        f.debug_struct("Entity")
            .field("type", &data.type_descriptor)
            .field("fields", &data.fields)
            .finish()
    }
}
