//! Repository error types.

use thiserror::Error;
use vpipe_models::{Classify, ErrorKind};

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("video not found: {0}")]
    NotFound(String),

    #[error("invalid video id format: {0}")]
    InvalidId(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("invalid stored record: {0}")]
    InvalidRecord(String),

    #[error("database configuration error: {0}")]
    ConfigError(String),

    #[error("database unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl RepositoryError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_id(id: impl Into<String>) -> Self {
        Self::InvalidId(id.into())
    }

    pub fn constraint_violation(msg: impl Into<String>) -> Self {
        Self::ConstraintViolation(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::error::ErrorKind as DbErrorKind;

        let mapped = match &err {
            sqlx::Error::RowNotFound => Some(RepositoryError::not_found("no matching row")),
            sqlx::Error::Database(db) => match db.kind() {
                DbErrorKind::UniqueViolation
                | DbErrorKind::ForeignKeyViolation
                | DbErrorKind::NotNullViolation
                | DbErrorKind::CheckViolation => {
                    Some(RepositoryError::constraint_violation(db.message()))
                }
                // invalid_text_representation, e.g. a malformed uuid literal
                _ if db.code().as_deref() == Some("22P02") => {
                    Some(RepositoryError::invalid_id(db.message()))
                }
                _ => None,
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Some(RepositoryError::unavailable(err.to_string()))
            }
            _ => None,
        };

        mapped.unwrap_or(RepositoryError::Database(err))
    }
}

impl Classify for RepositoryError {
    fn kind(&self) -> ErrorKind {
        match self {
            RepositoryError::NotFound(_) => ErrorKind::NotFound,
            RepositoryError::InvalidId(_)
            | RepositoryError::ConstraintViolation(_)
            | RepositoryError::InvalidRecord(_)
            | RepositoryError::ConfigError(_)
            | RepositoryError::Migration(_) => ErrorKind::Permanent,
            RepositoryError::Unavailable(_) | RepositoryError::Database(_) => ErrorKind::Transient,
        }
    }
}
