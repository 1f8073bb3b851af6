use super::{DataType, DbError, Result, Value};
use std::collections::BTreeMap;

/// Field values of one entity, keyed by column name.
pub type Fields = BTreeMap<String, Value>;

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn validate(&self, value: &Value) -> Result<()> {
        if matches!(value, Value::Null) {
            if !self.nullable {
                return Err(DbError::ConstraintViolation(format!(
                    "Column '{}' cannot be NULL",
                    self.name
                )));
            }
            return Ok(());
        }

        if !self.data_type.is_compatible(value) {
            return Err(DbError::TypeMismatch(format!(
                "Column '{}' expects type {}, got {}",
                self.name,
                self.data_type,
                value.type_name()
            )));
        }

        Ok(())
    }
}

/// Declared shape of an entity type: typed columns plus an ordered primary key.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    name: String,
    columns: Vec<Column>,
    primary_key: Vec<String>,
}

impl EntitySchema {
    /// Creates a schema whose primary key is the first column.
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        let primary_key = columns
            .first()
            .map(|col| vec![col.name.clone()])
            .unwrap_or_default();
        Self {
            name: name.into(),
            columns,
            primary_key,
        }
    }

    /// Overrides the primary key with a composite key, in the given order.
    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|col| col.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.get_column(name).is_some()
    }

    /// Checks declared columns, key completeness and stray fields.
    pub fn validate(&self, fields: &Fields) -> Result<()> {
        for name in fields.keys() {
            if !self.has_column(name) {
                return Err(DbError::ColumnNotFound(name.clone(), self.name.clone()));
            }
        }

        for column in &self.columns {
            column.validate(fields.get(&column.name).unwrap_or(&Value::Null))?;
        }

        for key in &self.primary_key {
            if fields.get(key).is_none_or(Value::is_null) {
                return Err(DbError::ConstraintViolation(format!(
                    "Primary key column '{}' of '{}' must be set",
                    key, self.name
                )));
            }
        }

        Ok(())
    }
}
