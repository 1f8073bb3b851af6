// ============================================================================
// Unit-of-Work Change Set
// ============================================================================
//
// A flush turns the session's pending state into an ordered list of changes:
// inserts in persist order, then dirty-checked updates, then deletes.
// The list is validated as a whole before any change reaches storage.
//
// ============================================================================

use super::EntityIdentity;
use crate::core::Fields;

#[derive(Debug, Clone)]
pub enum Change {
    /// Write a newly persisted entity
    Insert {
        identity: EntityIdentity,
        fields: Fields,
    },

    /// Rewrite a managed entity whose fields changed since it was loaded
    Update {
        identity: EntityIdentity,
        old_fields: Fields,
        new_fields: Fields,
    },

    /// Delete a managed entity scheduled for removal
    Delete { identity: EntityIdentity },
}

impl Change {
    pub fn identity(&self) -> &EntityIdentity {
        match self {
            Change::Insert { identity, .. } => identity,
            Change::Update { identity, .. } => identity,
            Change::Delete { identity } => identity,
        }
    }

    pub fn type_name(&self) -> &str {
        self.identity().type_descriptor.as_str()
    }

    /// Names of the fields an update actually touches.
    pub fn changed_fields(&self) -> Vec<&str> {
        match self {
            Change::Update {
                old_fields,
                new_fields,
                ..
            } => new_fields
                .iter()
                .filter(|(name, value)| old_fields.get(*name) != Some(*value))
                .map(|(name, _)| name.as_str())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Statement text reported to diagnostic loggers.
    pub fn to_statement(&self) -> String {
        match self {
            Change::Insert { identity, fields } => {
                let columns: Vec<&str> = fields.keys().map(String::as_str).collect();
                let values: Vec<String> = fields.values().map(|v| v.to_string()).collect();
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    identity.type_descriptor,
                    columns.join(", "),
                    values.join(", ")
                )
            }
            Change::Update {
                identity,
                new_fields,
                ..
            } => {
                let assignments: Vec<String> = self
                    .changed_fields()
                    .into_iter()
                    .filter_map(|name| new_fields.get(name).map(|v| format!("{} = {}", name, v)))
                    .collect();
                format!(
                    "UPDATE {} SET {} WHERE key = {}",
                    identity.type_descriptor,
                    assignments.join(", "),
                    identity.primary_key
                )
            }
            Change::Delete { identity } => format!(
                "DELETE FROM {} WHERE key = {}",
                identity.type_descriptor, identity.primary_key
            ),
        }
    }
}
