//! Storage layer for selfloom - named plain-text documents on disk.

mod documents;
mod traits;

pub use documents::FsDocumentStore;
pub use traits::{DocumentInfo, DocumentStore, validate_name};
