use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Invalid argument '{argument}': expected {expected}")]
    InvalidInput {
        argument: &'static str,
        expected: &'static str,
    },

    #[error("Transactional entity with key '{0}' was not found")]
    NotFound(String),

    #[error("Criteria translation error: {0}")]
    CriteriaTranslation(String),

    #[error("Entity type '{0}' is not registered")]
    EntityTypeNotFound(String),

    #[error("Column '{0}' not found in entity type '{1}'")]
    ColumnNotFound(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Detached entity {0} cannot be used for writes; reload it by identity first")]
    DetachedEntity(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl DbError {
    pub(crate) fn invalid_input(argument: &'static str, expected: &'static str) -> Self {
        Self::InvalidInput { argument, expected }
    }
}

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}
