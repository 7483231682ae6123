use std::{fs, path::Path};

use serde_json::{json, Value};
use tempfile::TempDir;
use workflow_index::{
    builder::write_snapshot,
    models::{Complexity, MissingIndexPolicy, SearchQuery, TriggerType},
    Corpus, IndexBuilder, IndexStore, QueryEngine, ServiceResolver, StoreOptions, StoreSource,
    WorkflowAnalyzer,
};

fn builder() -> IndexBuilder {
    IndexBuilder::new(WorkflowAnalyzer::new(
        ServiceResolver::builtin().expect("built-in service map"),
    ))
}

fn write(dir: &Path, name: &str, doc: Value) {
    fs::write(dir.join(name), serde_json::to_vec_pretty(&doc).unwrap()).unwrap();
}

fn node(name: &str, node_type: &str) -> Value {
    json!({"name": name, "type": node_type, "parameters": {}})
}

/// Three documents: a webhook flow, a 20-node flow with four integrations,
/// and a small manual flow. All three mention slack somewhere.
fn three_document_corpus() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();

    write(
        root,
        "1_webhook_to_slack.json",
        json!({
            "name": "Webhook To Slack",
            "active": true,
            "nodes": [
                node("Incoming Hook", "n8n-nodes-base.webhook"),
                node("Post Message", "n8n-nodes-base.slack"),
            ],
            "connections": {
                "Incoming Hook": {"main": [[{"node": "Post Message", "type": "main", "index": 0}]]}
            }
        }),
    );

    let mut nodes = vec![
        node("Read Feed", "n8n-nodes-base.rssFeedReadTrigger"),
        node("Notify Team", "n8n-nodes-base.slack"),
        node("Send Mail", "n8n-nodes-base.gmail"),
        node("Append Row", "n8n-nodes-base.googleSheets"),
        node("Ping Bot", "n8n-nodes-base.telegram"),
    ];
    nodes.extend((1..=15).map(|i| node(&format!("Step {i}"), "n8n-nodes-base.set")));
    write(
        root,
        "2_feed_fanout.json",
        json!({"name": "Feed Fanout", "nodes": nodes}),
    );

    let nested = root.join("drafts");
    fs::create_dir_all(&nested).unwrap();
    write(
        &nested,
        "3_manual_digest.json",
        json!({
            "name": "Manual Digest",
            "tags": ["slack"],
            "nodes": [
                node("Start", "n8n-nodes-base.manualTrigger"),
                node("Edit Fields", "n8n-nodes-base.set"),
            ]
        }),
    );

    tmp
}

#[test]
fn classifies_the_three_document_corpus() {
    let tmp = three_document_corpus();
    let report = builder().build(&Corpus::new(tmp.path())).unwrap();
    let snapshot = &report.snapshot;

    assert_eq!(snapshot.stats.total, 3);
    assert_eq!(report.errors(), 0);

    let by_file = |name: &str| {
        snapshot
            .workflows
            .iter()
            .find(|w| w.filename == name)
            .unwrap_or_else(|| panic!("{name} indexed"))
    };

    let webhook = by_file("1_webhook_to_slack.json");
    assert_eq!(webhook.trigger_type, TriggerType::Webhook);
    assert_eq!(webhook.complexity, Complexity::Low);

    let complex = by_file("2_feed_fanout.json");
    assert_eq!(complex.node_count, 20);
    assert_eq!(complex.integrations.len(), 4);
    assert_eq!(complex.trigger_type, TriggerType::Complex);
    assert_eq!(complex.complexity, Complexity::High);

    let manual = by_file("3_manual_digest.json");
    assert_eq!(manual.trigger_type, TriggerType::Manual);
    assert_eq!(manual.complexity, Complexity::Low);
    assert!(manual.integrations.is_empty());
}

#[test]
fn complex_only_with_many_nodes_and_integrations() {
    let tmp = three_document_corpus();
    let report = builder().build(&Corpus::new(tmp.path())).unwrap();
    for record in &report.snapshot.workflows {
        if record.trigger_type == TriggerType::Complex {
            assert!(record.node_count > 10 && record.integrations.len() > 3);
        }
        let expected = match record.node_count {
            0..=5 => Complexity::Low,
            6..=15 => Complexity::Medium,
            _ => Complexity::High,
        };
        assert_eq!(record.complexity, expected);
    }
}

#[test]
fn paged_search_returns_second_match() {
    let tmp = three_document_corpus();
    let report = builder().build(&Corpus::new(tmp.path())).unwrap();
    let store = IndexStore::from_snapshot(report.snapshot);
    let engine = QueryEngine::new(&store);

    let result = engine.search(&SearchQuery::text("slack").with_page(2, 1));
    assert_eq!(result.total, 3);
    assert_eq!(result.pages, 3);
    assert_eq!(result.items.len(), 1);
    assert_eq!(result.items[0].filename, "2_feed_fanout.json");

    let everything = engine.search(&SearchQuery::default());
    assert_eq!(everything.total, store.workflows().len());
}

#[test]
fn deep_search_for_absent_token_is_empty() {
    let tmp = three_document_corpus();
    let result = workflow_index::deep_search(
        &Corpus::new(tmp.path()),
        "nonexistent-token-xyz",
        10,
        None,
    )
    .unwrap();
    assert!(result.results.is_empty());
    assert_eq!(result.total, 0);
    assert!(!result.timed_out);
}

#[test]
fn snapshot_round_trip_preserves_counts() {
    let tmp = three_document_corpus();
    fs::write(tmp.path().join("4_broken.json"), b"{ nope").unwrap();
    let corpus = Corpus::new(tmp.path());
    let snapshot_dir = TempDir::new().unwrap();
    let snapshot_path = snapshot_dir.path().join("workflow_index.json");

    let report = builder().build(&corpus).unwrap();
    assert_eq!(report.errors(), 1);
    write_snapshot(&report.snapshot, &snapshot_path).unwrap();

    let store = IndexStore::open(
        &StoreOptions {
            snapshot_path,
            policy: MissingIndexPolicy::Empty,
            rebuild_timeout: None,
        },
        &builder(),
        &corpus,
    );
    assert_eq!(store.source(), StoreSource::Loaded);
    assert_eq!(store.stats().total, 3);
    assert_eq!(store.workflows(), report.snapshot.workflows.as_slice());
}
