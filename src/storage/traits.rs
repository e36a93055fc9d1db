//! Document store trait and listing types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LoomError, Result};

/// Listing entry for a stored document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub name: String,
    pub modified: DateTime<Utc>,
}

/// Named text documents.
pub trait DocumentStore: Send + Sync {
    /// Create or overwrite `name`.
    fn save(&self, name: &str, content: &str) -> Result<()>;

    /// Content of `name`, or `None` if it does not exist.
    fn load(&self, name: &str) -> Result<Option<String>>;

    /// All documents, newest first.
    fn list(&self) -> Result<Vec<DocumentInfo>>;

    /// Fails if `old` is missing or `new` already exists.
    fn rename(&self, old: &str, new: &str) -> Result<()>;

    /// Fails if `name` is missing.
    fn delete(&self, name: &str) -> Result<()>;
}

/// Reject names that are empty or could leave the store directory
pub fn validate_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed != name
        || name.contains(['/', '\\', '\0'])
        || name.contains("..")
        || name.starts_with('.')
    {
        return Err(LoomError::InvalidDocumentName(name.to_string()));
    }
    Ok(())
}
