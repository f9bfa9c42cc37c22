// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Duplicate action name in catalog: {0}")]
    DuplicateAction(String),

    #[error("Action not found: {0}")]
    ActionNotFound(String),

    #[error("Index out of range: {0}")]
    IndexOutOfRange(usize),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
