use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::Path,
    time::Instant,
};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::{
    analyzer::{file_name_of, WorkflowAnalyzer},
    corpus::Corpus,
    error::{IndexError, Result},
    models::{IndexSnapshot, IndexStats, WorkflowRecord, SNAPSHOT_VERSION},
};

const PROGRESS_EVERY: usize = 100;

#[derive(Debug, Clone)]
pub struct SkippedDocument {
    pub filename: String,
    pub reason: String,
}

#[derive(Debug)]
pub struct BuildReport {
    pub snapshot: IndexSnapshot,
    pub skipped: Vec<SkippedDocument>,
    pub empty_corpus: Option<IndexError>,
}

impl BuildReport {
    pub fn errors(&self) -> usize {
        self.skipped.len()
    }
}

#[derive(Debug, Clone)]
pub struct IndexBuilder {
    analyzer: WorkflowAnalyzer,
    timestamp: Option<DateTime<Utc>>,
}

impl IndexBuilder {
    pub fn new(analyzer: WorkflowAnalyzer) -> Self {
        Self {
            analyzer,
            timestamp: None,
        }
    }

    /// Pins `generated_at`/`last_indexed` for reproducible snapshots.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn analyzer(&self) -> &WorkflowAnalyzer {
        &self.analyzer
    }

    pub fn build(&self, corpus: &Corpus) -> Result<BuildReport> {
        self.build_until(corpus, None)
    }

    /// Like [`build`](Self::build) but gives up with `Timeout` once
    /// `deadline` has passed. Per-document failures never abort the build.
    pub fn build_until(&self, corpus: &Corpus, deadline: Option<Instant>) -> Result<BuildReport> {
        let timestamp = self.timestamp.unwrap_or_else(Utc::now);

        if !corpus.exists() {
            warn!(root = %corpus.root().display(), "Workflows directory not found");
            return Ok(empty_report(corpus));
        }

        let paths: Vec<_> = corpus.document_paths().collect();
        if paths.is_empty() {
            warn!(root = %corpus.root().display(), "No workflow documents found");
            return Ok(empty_report(corpus));
        }

        info!(files = paths.len(), "Processing workflow files");

        let mut workflows = Vec::with_capacity(paths.len());
        let mut skipped = Vec::new();

        for (i, path) in paths.iter().enumerate() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(IndexError::Timeout(format!(
                    "index build stopped after {i} of {} documents",
                    paths.len()
                )));
            }

            match self.analyzer.analyze_file(path) {
                Ok(record) => workflows.push(record),
                Err(err) => {
                    let filename = file_name_of(path);
                    warn!(file = %filename, "Skipping workflow: {err}");
                    skipped.push(SkippedDocument {
                        filename,
                        reason: err.to_string(),
                    });
                }
            }

            if (i + 1) % PROGRESS_EVERY == 0 {
                info!(processed = i + 1, total = paths.len(), "Index build progress");
            }
        }

        let stats = compute_stats(&workflows, &timestamp);
        info!(
            total = stats.total,
            active = stats.active,
            total_nodes = stats.total_nodes,
            unique_integrations = stats.unique_integrations,
            errors = skipped.len(),
            "Index build complete"
        );

        Ok(BuildReport {
            snapshot: IndexSnapshot {
                stats,
                workflows,
                generated_at: Some(timestamp),
                version: SNAPSHOT_VERSION.to_string(),
            },
            skipped,
            empty_corpus: None,
        })
    }
}

fn empty_report(corpus: &Corpus) -> BuildReport {
    BuildReport {
        snapshot: IndexSnapshot::empty(),
        skipped: Vec::new(),
        empty_corpus: Some(IndexError::EmptyCorpus(
            corpus.root().display().to_string(),
        )),
    }
}

pub fn compute_stats(workflows: &[WorkflowRecord], timestamp: &DateTime<Utc>) -> IndexStats {
    let mut triggers = BTreeMap::new();
    let mut complexity = BTreeMap::new();
    let mut integrations = HashSet::new();

    for workflow in workflows {
        *triggers
            .entry(workflow.trigger_type.to_string())
            .or_insert(0) += 1;
        *complexity
            .entry(workflow.complexity.to_string())
            .or_insert(0) += 1;
        integrations.extend(workflow.integrations.iter().map(String::as_str));
    }

    let total = workflows.len();
    let active = workflows.iter().filter(|w| w.active).count();

    IndexStats {
        total,
        active,
        inactive: total - active,
        triggers,
        complexity,
        total_nodes: workflows.iter().map(|w| w.node_count).sum(),
        unique_integrations: integrations.len(),
        last_indexed: timestamp.format("%Y-%m-%d").to_string(),
    }
}

/// Writes the snapshot compactly through a temporary sibling file so readers
/// never observe a partial index. Concurrent writers: last rename wins.
pub fn write_snapshot(snapshot: &IndexSnapshot, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|err| IndexError::io("creating snapshot directory", err))?;
    }

    let bytes = serde_json::to_vec(snapshot)?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, bytes).map_err(|err| IndexError::io("writing snapshot", err))?;
    fs::rename(&tmp_path, path).map_err(|err| IndexError::io("replacing snapshot", err))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::{models::TriggerType, services::ServiceResolver};

    fn builder() -> IndexBuilder {
        let analyzer = WorkflowAnalyzer::new(ServiceResolver::builtin().unwrap());
        IndexBuilder::new(analyzer).with_timestamp(Utc.with_ymd_and_hms(2025, 8, 21, 0, 0, 0).unwrap())
    }

    fn write(dir: &Path, name: &str, value: serde_json::Value) {
        fs::write(dir.join(name), serde_json::to_vec(&value).unwrap()).unwrap();
    }

    #[test]
    fn missing_directory_gives_empty_snapshot() {
        let report = builder().build(&Corpus::new("/no/such/workflows")).unwrap();
        assert!(report.snapshot.workflows.is_empty());
        assert_eq!(report.snapshot.stats.total, 0);
        assert!(matches!(report.empty_corpus, Some(IndexError::EmptyCorpus(_))));
    }

    #[test]
    fn empty_directory_gives_empty_snapshot() {
        let tmp = TempDir::new().unwrap();
        let report = builder().build(&Corpus::new(tmp.path())).unwrap();
        assert!(report.empty_corpus.is_some());
        assert_eq!(report.errors(), 0);
    }

    #[test]
    fn malformed_documents_are_skipped_and_counted() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "1_ok.json",
            json!({"name": "Ok", "active": true, "nodes": [{"type": "n8n-nodes-base.slack", "name": "Post"}]}),
        );
        fs::write(tmp.path().join("2_broken.json"), b"{ not json").unwrap();

        let report = builder().build(&Corpus::new(tmp.path())).unwrap();
        assert_eq!(report.snapshot.workflows.len(), 1);
        assert_eq!(report.errors(), 1);
        assert_eq!(report.skipped[0].filename, "2_broken.json");
        assert!(report.empty_corpus.is_none());
    }

    #[test]
    fn stats_aggregate_over_records() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "a.json",
            json!({"name": "A", "active": true, "nodes": [
                {"type": "n8n-nodes-base.webhook", "name": "Hook"},
                {"type": "n8n-nodes-base.slack", "name": "Post"}
            ]}),
        );
        write(
            tmp.path(),
            "b.json",
            json!({"name": "B", "active": false, "nodes": [
                {"type": "n8n-nodes-base.slack", "name": "Post"},
                {"type": "n8n-nodes-base.gmail", "name": "Mail"},
                {"type": "n8n-nodes-base.set", "name": "Set"}
            ]}),
        );

        let report = builder().build(&Corpus::new(tmp.path())).unwrap();
        let stats = &report.snapshot.stats;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.inactive, 1);
        assert_eq!(stats.total_nodes, 5);
        assert_eq!(stats.unique_integrations, 3);
        assert_eq!(stats.triggers.get(TriggerType::Webhook.as_str()), Some(&1));
        assert_eq!(stats.triggers.get(TriggerType::Manual.as_str()), Some(&1));
        assert_eq!(stats.complexity.get("low"), Some(&2));
        assert_eq!(stats.last_indexed, "2025-08-21");
        assert_eq!(report.snapshot.version, "1.0");
    }

    #[test]
    fn expired_deadline_times_out() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.json", json!({"nodes": []}));
        let past = Instant::now() - Duration::from_millis(1);
        let err = builder()
            .build_until(&Corpus::new(tmp.path()), Some(past))
            .unwrap_err();
        assert!(matches!(err, IndexError::Timeout(_)));
    }

    #[test]
    fn snapshot_write_replaces_previous_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out").join("index.json");

        write_snapshot(&IndexSnapshot::empty(), &path).unwrap();
        let mut snapshot = IndexSnapshot::empty();
        snapshot.stats.total = 7;
        write_snapshot(&snapshot, &path).unwrap();

        let loaded: IndexSnapshot = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(loaded.stats.total, 7);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
