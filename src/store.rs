use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    builder::{write_snapshot, IndexBuilder},
    corpus::Corpus,
    error::{IndexError, Result},
    models::{IndexSnapshot, IndexStats, MissingIndexPolicy, WorkflowRecord},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreSource {
    Loaded,
    Rebuilt,
    Empty,
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub snapshot_path: PathBuf,
    pub policy: MissingIndexPolicy,
    pub rebuild_timeout: Option<Duration>,
}

/// The in-memory index. Immutable once constructed; share it behind an `Arc`
/// for concurrent readers.
#[derive(Debug)]
pub struct IndexStore {
    snapshot: IndexSnapshot,
    by_filename: HashMap<String, usize>,
    source: StoreSource,
}

impl IndexStore {
    pub fn from_snapshot(snapshot: IndexSnapshot) -> Self {
        Self::with_source(snapshot, StoreSource::Loaded)
    }

    pub fn empty() -> Self {
        Self::with_source(IndexSnapshot::empty(), StoreSource::Empty)
    }

    fn with_source(snapshot: IndexSnapshot, source: StoreSource) -> Self {
        let mut by_filename = HashMap::with_capacity(snapshot.workflows.len());
        for (idx, workflow) in snapshot.workflows.iter().enumerate() {
            by_filename.entry(workflow.filename.clone()).or_insert(idx);
        }
        Self {
            snapshot,
            by_filename,
            source,
        }
    }

    /// Loads the persisted snapshot. A missing or unreadable snapshot is
    /// handled by `options.policy`; a rebuilt snapshot is persisted for the
    /// next start.
    pub fn open(options: &StoreOptions, builder: &IndexBuilder, corpus: &Corpus) -> Self {
        match read_snapshot(&options.snapshot_path) {
            Ok(snapshot) => {
                info!(
                    workflows = snapshot.workflows.len(),
                    "Loaded index snapshot"
                );
                return Self::from_snapshot(snapshot);
            }
            Err(err) if err.is_not_found() => {
                info!("No persisted index snapshot found");
            }
            Err(err) => {
                warn!("Ignoring unreadable index snapshot: {err}");
            }
        }

        match options.policy {
            MissingIndexPolicy::Empty => {
                warn!("Serving an empty index");
                Self::empty()
            }
            MissingIndexPolicy::Rebuild => {
                let deadline = options.rebuild_timeout.map(|t| Instant::now() + t);
                match builder.build_until(corpus, deadline) {
                    Ok(report) => {
                        if let Some(err) = &report.empty_corpus {
                            warn!("Rebuild found nothing to index: {err}");
                            return Self::empty();
                        }
                        if let Err(err) = write_snapshot(&report.snapshot, &options.snapshot_path) {
                            warn!("Failed persisting rebuilt index snapshot: {err}");
                        }
                        Self::with_source(report.snapshot, StoreSource::Rebuilt)
                    }
                    Err(err) => {
                        error!("Index rebuild failed, serving an empty index: {err}");
                        Self::empty()
                    }
                }
            }
        }
    }

    pub fn stats(&self) -> &IndexStats {
        &self.snapshot.stats
    }

    pub fn workflows(&self) -> &[WorkflowRecord] {
        &self.snapshot.workflows
    }

    pub fn find(&self, filename: &str) -> Option<&WorkflowRecord> {
        self.by_filename
            .get(filename)
            .map(|&idx| &self.snapshot.workflows[idx])
    }

    pub fn generated_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot.generated_at
    }

    pub fn version(&self) -> &str {
        &self.snapshot.version
    }

    pub fn source(&self) -> StoreSource {
        self.source
    }
}

pub fn read_snapshot(path: &Path) -> Result<IndexSnapshot> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(IndexError::NotFound("index snapshot".to_string()));
        }
        Err(err) => return Err(IndexError::io("reading index snapshot", err)),
    };
    serde_json::from_slice(&bytes).map_err(|err| IndexError::parse("index snapshot", err))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::{analyzer::WorkflowAnalyzer, services::ServiceResolver};

    fn builder() -> IndexBuilder {
        IndexBuilder::new(WorkflowAnalyzer::new(ServiceResolver::builtin().unwrap()))
    }

    fn options(dir: &Path, policy: MissingIndexPolicy) -> StoreOptions {
        StoreOptions {
            snapshot_path: dir.join("index.json"),
            policy,
            rebuild_timeout: None,
        }
    }

    fn corpus_with_one(dir: &Path) -> Corpus {
        let root = dir.join("workflows");
        fs::create_dir_all(&root).unwrap();
        fs::write(
            root.join("one.json"),
            serde_json::to_vec(&json!({"name": "One", "nodes": []})).unwrap(),
        )
        .unwrap();
        Corpus::new(root)
    }

    #[test]
    fn loads_persisted_snapshot() {
        let tmp = TempDir::new().unwrap();
        let corpus = corpus_with_one(tmp.path());
        let report = builder().build(&corpus).unwrap();
        write_snapshot(&report.snapshot, &tmp.path().join("index.json")).unwrap();

        let store = IndexStore::open(
            &options(tmp.path(), MissingIndexPolicy::Empty),
            &builder(),
            &corpus,
        );
        assert_eq!(store.source(), StoreSource::Loaded);
        assert_eq!(store.stats().total, 1);
        assert!(store.find("one.json").is_some());
        assert!(store.find("two.json").is_none());
    }

    #[test]
    fn missing_snapshot_with_empty_policy_serves_nothing() {
        let tmp = TempDir::new().unwrap();
        let corpus = corpus_with_one(tmp.path());
        let store = IndexStore::open(
            &options(tmp.path(), MissingIndexPolicy::Empty),
            &builder(),
            &corpus,
        );
        assert_eq!(store.source(), StoreSource::Empty);
        assert!(store.workflows().is_empty());
        assert_eq!(store.stats().total, 0);
    }

    #[test]
    fn missing_snapshot_with_rebuild_policy_builds_and_persists() {
        let tmp = TempDir::new().unwrap();
        let corpus = corpus_with_one(tmp.path());
        let opts = options(tmp.path(), MissingIndexPolicy::Rebuild);

        let store = IndexStore::open(&opts, &builder(), &corpus);
        assert_eq!(store.source(), StoreSource::Rebuilt);
        assert_eq!(store.stats().total, 1);
        assert!(opts.snapshot_path.exists());
    }

    #[test]
    fn corrupt_snapshot_falls_back_to_policy() {
        let tmp = TempDir::new().unwrap();
        let corpus = corpus_with_one(tmp.path());
        let opts = options(tmp.path(), MissingIndexPolicy::Rebuild);
        fs::write(&opts.snapshot_path, b"garbage").unwrap();

        let store = IndexStore::open(&opts, &builder(), &corpus);
        assert_eq!(store.source(), StoreSource::Rebuilt);
        assert_eq!(store.workflows().len(), 1);
    }

    #[test]
    fn partial_records_get_defaults() {
        let snapshot: IndexSnapshot = serde_json::from_value(json!({
            "stats": {"total": 1},
            "workflows": [{"filename": "x.json", "name": "X"}]
        }))
        .unwrap();
        let store = IndexStore::from_snapshot(snapshot);
        let record = store.find("x.json").unwrap();
        assert_eq!(record.node_count, 0);
        assert!(record.integrations.is_empty());
        assert_eq!(store.stats().active, 0);
    }
}
