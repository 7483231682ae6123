use std::{collections::BTreeSet, fs, path::Path};

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::{
    error::{IndexError, Result},
    models::{value_text, Complexity, RawNode, RawWorkflowDocument, TriggerType, WorkflowRecord},
    services::ServiceResolver,
};

const PLACEHOLDER_NAME_PREFIXES: &[&str] = &["My workflow"];
const STICKY_NOTE_TYPE: &str = "n8n-nodes-base.stickyNote";
const CODE_NODE_TYPE: &str = "n8n-nodes-base.code";
const CODE_SOURCE_KEYS: &[&str] = &["jsCode", "pythonCode"];

const COMPLEX_MIN_NODES: usize = 10;
const COMPLEX_MIN_INTEGRATIONS: usize = 3;
const DESCRIPTION_SERVICE_LIMIT: usize = 3;

#[derive(Debug, Clone)]
pub struct WorkflowAnalyzer {
    resolver: ServiceResolver,
}

impl WorkflowAnalyzer {
    pub fn new(resolver: ServiceResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &ServiceResolver {
        &self.resolver
    }

    pub fn analyze_file(&self, path: &Path) -> Result<WorkflowRecord> {
        let filename = file_name_of(path);
        let bytes = fs::read(path)
            .map_err(|err| IndexError::io(format!("reading workflow {filename}"), err))?;
        self.analyze_bytes(&filename, &bytes)
    }

    pub fn analyze_bytes(&self, filename: &str, bytes: &[u8]) -> Result<WorkflowRecord> {
        let doc = parse_document(filename, bytes)?;
        let mut record = self.analyze(filename, &doc);
        record.file_hash = hex::encode(Sha256::digest(bytes));
        record.file_size = bytes.len() as u64;
        Ok(record)
    }

    /// Derives every metadata field except the file digest and size.
    pub fn analyze(&self, filename: &str, doc: &RawWorkflowDocument) -> WorkflowRecord {
        let node_count = doc.nodes.len();
        let integrations = self.extract_integrations(&doc.nodes);
        let trigger_type = classify_trigger(&doc.nodes, node_count, integrations.len());
        let name = display_name(&doc.name, filename);
        let integrations: Vec<String> = integrations.into_iter().collect();
        let description = synthesize_description(&name, trigger_type, node_count, &integrations);

        WorkflowRecord {
            filename: filename.to_string(),
            name,
            workflow_id: doc.id.clone(),
            active: doc.active,
            description,
            trigger_type,
            complexity: Complexity::from_node_count(node_count),
            node_count,
            integrations,
            tags: doc.tags.clone(),
            created_at: doc.created_at.clone(),
            updated_at: doc.updated_at.clone(),
            file_hash: String::new(),
            file_size: 0,
            content: extract_content(doc),
        }
    }

    fn extract_integrations(&self, nodes: &[RawNode]) -> BTreeSet<String> {
        nodes
            .iter()
            .filter_map(|node| self.resolver.resolve(&node.node_type, &node.name))
            .map(ToString::to_string)
            .collect()
    }
}

pub fn parse_document(filename: &str, bytes: &[u8]) -> Result<RawWorkflowDocument> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|err| IndexError::parse(filename, err))?;
    parse_document_value(filename, value)
}

pub fn parse_document_value(filename: &str, value: Value) -> Result<RawWorkflowDocument> {
    if !value.is_object() {
        return Err(IndexError::parse(
            filename,
            "workflow document must be a JSON object",
        ));
    }
    serde_json::from_value(value).map_err(|err| IndexError::parse(filename, err))
}

/// Keyword rules in priority order, then the size/variety override.
pub fn classify_trigger(
    nodes: &[RawNode],
    node_count: usize,
    integration_count: usize,
) -> TriggerType {
    if node_count > COMPLEX_MIN_NODES && integration_count > COMPLEX_MIN_INTEGRATIONS {
        return TriggerType::Complex;
    }

    let lowered: Vec<(String, String)> = nodes
        .iter()
        .map(|node| (node.node_type.to_lowercase(), node.name.to_lowercase()))
        .collect();

    if lowered
        .iter()
        .any(|(ty, name)| ty.contains("webhook") || name.contains("webhook"))
    {
        TriggerType::Webhook
    } else if lowered
        .iter()
        .any(|(ty, _)| ty.contains("cron") || ty.contains("schedule"))
    {
        TriggerType::Scheduled
    } else if lowered
        .iter()
        .any(|(ty, _)| ty.contains("trigger") && !ty.contains("manual"))
    {
        TriggerType::Webhook
    } else {
        TriggerType::Manual
    }
}

pub fn display_name(doc_name: &str, filename: &str) -> String {
    let trimmed = doc_name.trim();
    let stem = filename.replace(".json", "");
    let is_placeholder = PLACEHOLDER_NAME_PREFIXES
        .iter()
        .any(|prefix| trimmed.starts_with(prefix));

    if trimmed.is_empty() || trimmed == stem || is_placeholder {
        title_from_filename(filename)
    } else {
        trimmed.to_string()
    }
}

/// `0042_slack_daily_digest.json` becomes `Slack Daily Digest`.
pub fn title_from_filename(filename: &str) -> String {
    let stem = filename.replace(".json", "");
    let mut parts: Vec<&str> = stem.split('_').collect();
    if parts.len() > 1 && is_numeric(parts[0]) {
        parts.remove(0);
    }
    parts
        .into_iter()
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_numeric(part: &str) -> bool {
    !part.is_empty() && part.chars().all(|c| c.is_ascii_digit())
}

fn capitalize(part: &str) -> String {
    let mut chars = part.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

pub fn synthesize_description(
    name: &str,
    trigger_type: TriggerType,
    node_count: usize,
    integrations: &[String],
) -> String {
    let mut desc = String::new();

    if let Some(services) = services_phrase(integrations) {
        let lead = match trigger_type {
            TriggerType::Complex => Some("Complex multi-step automation"),
            TriggerType::Webhook => Some("Webhook-triggered automation"),
            TriggerType::Scheduled => Some("Scheduled automation"),
            TriggerType::Manual => None,
        };
        match lead {
            // Legacy wording, double space included.
            Some(lead) => desc.push_str(&format!("{lead} that  {node_count} nodes and {services}")),
            None => desc.push_str(&format!("Workflow with {node_count} nodes {services}")),
        }
        desc.push_str(purpose_clause(name));
    } else {
        desc.push_str(&format!("Workflow with {node_count} nodes"));
    }

    desc.push_str(&format!(". Uses {node_count} nodes"));
    if integrations.len() > COMPLEX_MIN_INTEGRATIONS {
        desc.push_str(&format!(
            " and integrates with {} services",
            integrations.len()
        ));
    }
    desc.push('.');
    desc
}

fn services_phrase(integrations: &[String]) -> Option<String> {
    let top: Vec<&str> = integrations
        .iter()
        .take(DESCRIPTION_SERVICE_LIMIT)
        .map(String::as_str)
        .collect();
    match top.as_slice() {
        [] => None,
        [only] => Some(format!("using {only}")),
        [first, second] => Some(format!("connecting {first} and {second}")),
        [init @ .., last] => Some(format!("orchestrating {}, and {last}", init.join(", "))),
    }
}

fn purpose_clause(name: &str) -> &'static str {
    let lowered = name.to_lowercase();
    if lowered.contains("create") {
        " to create new records"
    } else if lowered.contains("update") {
        " to update existing data"
    } else if lowered.contains("sync") {
        " to synchronize data"
    } else if lowered.contains("process") {
        " for data processing"
    } else if lowered.contains("automation") {
        " for automation tasks"
    } else {
        " for data processing"
    }
}

/// Flattened search text: workflow name and description, then per node its
/// type, name, parameters, sticky/code bodies, then tags.
pub fn extract_content(doc: &RawWorkflowDocument) -> String {
    let mut parts: Vec<String> = Vec::new();

    parts.push(doc.name.clone());
    if let Some(description) = &doc.description {
        parts.push(value_text(description));
    }

    for node in &doc.nodes {
        parts.push(node.node_type.clone());
        parts.push(node.name.clone());

        if let Value::Object(params) = &node.parameters {
            for (key, value) in params {
                match value {
                    Value::Object(_) => parts.push(value.to_string()),
                    other => parts.push(format!("{key}: {}", value_text(other))),
                }
            }

            if node.node_type == STICKY_NOTE_TYPE {
                if let Some(content) = params.get("content") {
                    parts.push(value_text(content));
                }
            }

            if node.node_type == CODE_NODE_TYPE {
                for key in CODE_SOURCE_KEYS {
                    if let Some(source) = params.get(*key) {
                        parts.push(value_text(source));
                    }
                }
            }
        }
    }

    parts.extend(doc.tags.iter().cloned());

    parts.retain(|part| !part.is_empty());
    parts.join(" ")
}

pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
