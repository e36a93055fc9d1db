//! Plain-text document store: one `<name>.txt` file per document.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{LoomError, Result};
use crate::storage::traits::{DocumentInfo, DocumentStore, validate_name};

const EXTENSION: &str = "txt";

#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    dir: PathBuf,
}

impl FsDocumentStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{}.{}", name, EXTENSION)))
    }
}

impl DocumentStore for FsDocumentStore {
    fn save(&self, name: &str, content: &str) -> Result<()> {
        let path = self.path_for(name)?;
        fs::write(&path, content)?;
        log::debug!("Saved document {:?} ({} bytes)", name, content.len());
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Option<String>> {
        let path = self.path_for(name)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<DocumentInfo>> {
        let mut docs = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let modified: DateTime<Utc> = fs::metadata(&path)?.modified()?.into();
            docs.push(DocumentInfo {
                name: name.to_string(),
                modified,
            });
        }
        docs.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
        Ok(docs)
    }

    fn rename(&self, old: &str, new: &str) -> Result<()> {
        let from = self.path_for(old)?;
        let to = self.path_for(new)?;
        if !from.exists() {
            return Err(LoomError::DocumentNotFound(old.to_string()));
        }
        if to.exists() {
            return Err(LoomError::DocumentExists(new.to_string()));
        }
        fs::rename(&from, &to)?;
        log::info!("Renamed document {:?} -> {:?}", old, new);
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                log::info!("Deleted document {:?}", name);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(LoomError::DocumentNotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}
