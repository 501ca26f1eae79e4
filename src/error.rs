// Pantry error taxonomy
// Expected lookups that miss are values (NotFound), everything else is fatal.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PantryError {
    /// Item id does not exist (recoverable - callers report it and continue)
    #[error("item {0} not found")]
    ItemNotFound(i64),

    /// Database unreachable or statement failed (fatal for the current run)
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored value could not be decoded
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Vision model request or response problem
    #[error("vision model error: {0}")]
    Vision(String),

    /// Image capture or image file handling problem
    #[error("image error: {0}")]
    Image(String),
}

impl PantryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PantryError::ItemNotFound(_))
    }
}

pub type PantryResult<T> = std::result::Result<T, PantryError>;
