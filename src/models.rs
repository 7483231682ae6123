use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

pub const SNAPSHOT_VERSION: &str = "1.0";
pub const FILTER_SENTINEL_ALL: &str = "all";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawWorkflowDocument {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub active: bool,
    #[serde(default, deserialize_with = "lenient_tags")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub created_at: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub updated_at: String,
    #[serde(default)]
    pub description: Option<Value>,
    #[serde(default)]
    pub meta: Option<Value>,
    #[serde(default, deserialize_with = "lenient_nodes")]
    pub nodes: Vec<RawNode>,
    #[serde(default, deserialize_with = "lenient_object")]
    pub connections: Map<String, Value>,
}

impl RawWorkflowDocument {
    pub fn meta_description(&self) -> String {
        self.meta
            .as_ref()
            .and_then(|meta| meta.get("description"))
            .map(value_text)
            .unwrap_or_default()
    }

    /// Flattens `connections` into `(source, target)` name pairs in document order.
    pub fn connection_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for (source, by_kind) in &self.connections {
            let Some(by_kind) = by_kind.as_object() else {
                continue;
            };
            for outputs in by_kind.values() {
                let Some(outputs) = outputs.as_array() else {
                    continue;
                };
                for group in outputs.iter().filter_map(Value::as_array) {
                    for target in group {
                        if let Some(node) = target.get("node").and_then(Value::as_str) {
                            pairs.push((source.clone(), node.to_string()));
                        }
                    }
                }
            }
        }
        pairs
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawNode {
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(rename = "type", default, deserialize_with = "lenient_string")]
    pub node_type: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub position: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TriggerType {
    #[default]
    Manual,
    Webhook,
    Scheduled,
    Complex,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "Manual",
            Self::Webhook => "Webhook",
            Self::Scheduled => "Scheduled",
            Self::Complex => "Complex",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    #[default]
    Low,
    Medium,
    High,
}

impl Complexity {
    pub fn from_node_count(node_count: usize) -> Self {
        match node_count {
            0..=5 => Self::Low,
            6..=15 => Self::Medium,
            _ => Self::High,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One analyzed workflow as stored in the index. Missing fields in a
/// persisted snapshot fall back to their defaults on load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowRecord {
    pub filename: String,
    pub name: String,
    pub workflow_id: String,
    pub active: bool,
    pub description: String,
    pub trigger_type: TriggerType,
    pub complexity: Complexity,
    pub node_count: usize,
    pub integrations: Vec<String>,
    pub tags: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
    pub file_hash: String,
    pub file_size: u64,
    pub content: String,
}

impl WorkflowRecord {
    /// Minimal importable document used when the source file is gone but
    /// the record is still indexed.
    pub fn placeholder_document(&self) -> Value {
        json!({
            "id": self.workflow_id,
            "name": self.name,
            "active": self.active,
            "nodes": [
                {
                    "id": "trigger-node",
                    "name": format!("{} Trigger", self.trigger_type),
                    "type": "n8n-nodes-base.start",
                    "typeVersion": 1,
                    "position": [0, 0],
                    "parameters": {}
                },
                {
                    "id": "main-node",
                    "name": self.name,
                    "type": "n8n-nodes-base.noOp",
                    "typeVersion": 1,
                    "position": [300, 0],
                    "parameters": {}
                }
            ],
            "connections": {
                "trigger-node": {
                    "main": [[{ "node": "main-node", "type": "main", "index": 0 }]]
                }
            },
            "meta": {
                "description": self.description,
                "tags": self.tags,
            }
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexStats {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub triggers: BTreeMap<String, usize>,
    pub complexity: BTreeMap<String, usize>,
    pub total_nodes: usize,
    pub unique_integrations: usize,
    pub last_indexed: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSnapshot {
    pub stats: IndexStats,
    pub workflows: Vec<WorkflowRecord>,
    pub generated_at: Option<DateTime<Utc>>,
    pub version: String,
}

impl IndexSnapshot {
    pub fn empty() -> Self {
        Self {
            version: SNAPSHOT_VERSION.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    pub page: usize,
    pub per_page: usize,
    pub trigger: Option<String>,
    pub complexity: Option<String>,
    pub active_only: bool,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            text: String::new(),
            page: 1,
            per_page: 20,
            trigger: None,
            complexity: None,
            active_only: false,
        }
    }
}

impl SearchQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_page(mut self, page: usize, per_page: usize) -> Self {
        self.page = page;
        self.per_page = per_page;
        self
    }

    pub fn normalized(mut self, max_per_page: usize) -> Self {
        self.page = self.page.max(1);
        self.per_page = self.per_page.clamp(1, max_per_page.max(1));
        self
    }

    /// Filter value with the `"all"` sentinel and blanks treated as absent.
    pub fn active_filter(value: &Option<String>) -> Option<&str> {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case(FILTER_SENTINEL_ALL))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AppliedFilters {
    pub trigger: Option<String>,
    pub complexity: Option<String>,
    pub active_only: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult<'a> {
    #[serde(rename = "workflows")]
    pub items: Vec<&'a WorkflowRecord>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub pages: usize,
    pub query: String,
    pub filters: AppliedFilters,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeepSearchHit {
    pub filename: String,
    pub name: String,
    pub description: String,
    pub node_count: usize,
    pub integrations: Vec<String>,
    pub match_type: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeepSearchResult {
    pub query: String,
    pub results: Vec<DeepSearchHit>,
    pub total: usize,
    pub search_type: &'static str,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingIndexPolicy {
    Rebuild,
    Empty,
}

impl FromStr for MissingIndexPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rebuild" => Ok(Self::Rebuild),
            "empty" => Ok(Self::Empty),
            other => Err(format!("unknown missing-index policy: {other}")),
        }
    }
}

/// Renders any JSON value as search text: strings verbatim, everything else
/// as compact JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_text(&Value::deserialize(deserializer)?))
}

fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = value_text(&Value::deserialize(deserializer)?);
    Ok(Some(text).filter(|s| !s.is_empty()))
}

/// Truthiness of a loosely typed flag: non-zero numbers and non-empty
/// strings, arrays and objects count as set.
fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(flag) => flag,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Null => false,
    })
}

fn lenient_tags<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };

    Ok(items
        .iter()
        .map(|tag| match tag.get("name").and_then(Value::as_str) {
            Some(name) => name.to_string(),
            None => value_text(tag),
        })
        .filter(|tag| !tag.is_empty())
        .collect())
}

fn lenient_nodes<'de, D>(deserializer: D) -> Result<Vec<RawNode>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<RawNode>>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_object<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}
