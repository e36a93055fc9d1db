//! The growing document

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The text being grown by a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Display name (also the store key)
    pub name: String,
    /// Full accumulated text
    pub text: String,
    /// Last mutation time
    pub modified: DateTime<Utc>,
}

impl Document {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            modified: Utc::now(),
        }
    }

    /// Document named after the current time, e.g. `loom-20250101-120000`
    pub fn untitled(text: impl Into<String>) -> Self {
        Self::new(default_name(Utc::now()), text)
    }

    /// Append a chosen continuation verbatim
    pub fn append(&mut self, continuation: &str) {
        self.text.push_str(continuation);
        self.modified = Utc::now();
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.modified = Utc::now();
    }
}

pub fn default_name(at: DateTime<Utc>) -> String {
    format!("loom-{}", at.format("%Y%m%d-%H%M%S"))
}
