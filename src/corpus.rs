use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

use serde_json::Value;
use walkdir::WalkDir;

use crate::{
    analyzer::parse_document_value,
    error::{IndexError, Result},
    models::RawWorkflowDocument,
};

const DOCUMENT_EXTENSION: &str = "json";

/// A read-only directory tree of workflow documents.
#[derive(Debug, Clone)]
pub struct Corpus {
    root: PathBuf,
}

impl Corpus {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Document paths in walk order (sorted per directory). Unreadable
    /// entries are skipped.
    pub fn document_paths(&self) -> impl Iterator<Item = PathBuf> {
        WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file() && is_document(entry.path()))
            .map(|entry| entry.into_path())
    }

    pub fn locate(&self, filename: &str) -> Result<PathBuf> {
        self.locate_until(filename, None)
    }

    /// Like [`locate`](Self::locate) but gives up with `Timeout` once
    /// `deadline` has passed.
    pub fn locate_until(&self, filename: &str, deadline: Option<Instant>) -> Result<PathBuf> {
        validate_filename(filename)?;
        for path in self.document_paths() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(IndexError::Timeout(format!("locating {filename}")));
            }
            if path.file_name().is_some_and(|name| name == filename) {
                return Ok(path);
            }
        }
        Err(IndexError::NotFound(filename.to_string()))
    }

    pub fn read_bytes(&self, filename: &str) -> Result<Vec<u8>> {
        self.read_bytes_until(filename, None)
    }

    pub fn read_bytes_until(&self, filename: &str, deadline: Option<Instant>) -> Result<Vec<u8>> {
        let path = self.locate_until(filename, deadline)?;
        fs::read(&path).map_err(|err| IndexError::io(format!("reading workflow {filename}"), err))
    }

    pub fn read_value(&self, filename: &str) -> Result<Value> {
        self.read_value_until(filename, None)
    }

    pub fn read_value_until(&self, filename: &str, deadline: Option<Instant>) -> Result<Value> {
        let bytes = self.read_bytes_until(filename, deadline)?;
        serde_json::from_slice(&bytes).map_err(|err| IndexError::parse(filename, err))
    }

    pub fn read_document(&self, filename: &str) -> Result<RawWorkflowDocument> {
        parse_document_value(filename, self.read_value(filename)?)
    }
}

fn is_document(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(DOCUMENT_EXTENSION))
}

/// Lookups take a bare file name; anything that could address a path outside
/// the corpus is rejected.
pub fn validate_filename(filename: &str) -> Result<()> {
    let trimmed = filename.trim();
    if trimmed.is_empty()
        || trimmed.contains('/')
        || trimmed.contains('\\')
        || trimmed.contains("..")
        || trimmed != filename
    {
        return Err(IndexError::InvalidArgument(
            "filename must be a bare document name".to_string(),
        ));
    }
    Ok(())
}
