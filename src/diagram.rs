use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::models::RawWorkflowDocument;

const MAX_LABEL_CHARS: usize = 30;
const TRUNCATED_LABEL_CHARS: usize = 27;
const UNKNOWN_LABEL: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagramNode {
    pub id: String,
    pub label: String,
    pub name: String,
    pub node_type: String,
}

/// How an edge endpoint was matched, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeResolution {
    Name,
    NodeId,
    Label,
    Partial,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagramEdge {
    pub from: String,
    pub to: String,
    /// Weakest resolution of the two endpoints.
    pub resolution: EdgeResolution,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagram {
    pub nodes: Vec<DiagramNode>,
    pub edges: Vec<DiagramEdge>,
    pub unresolved: Vec<String>,
    pub collisions: Vec<String>,
}

impl Diagram {
    pub fn to_mermaid(&self) -> String {
        let mut lines = vec!["graph TD".to_string()];
        for node in &self.nodes {
            lines.push(format!("    {}[\"{}\"]", node.id, node.label));
        }
        for edge in &self.edges {
            lines.push(format!("    {} --> {}", edge.from, edge.to));
        }
        lines.join("\n")
    }
}

pub fn sanitize_label(name: &str) -> String {
    let base = if name.is_empty() { UNKNOWN_LABEL } else { name };
    let cleaned: String = base.chars().filter(|c| *c != '"' && *c != '\'').collect();
    if cleaned.chars().count() > MAX_LABEL_CHARS {
        let head: String = cleaned.chars().take(TRUNCATED_LABEL_CHARS).collect();
        format!("{head}...")
    } else {
        cleaned
    }
}

/// Endpoint lookup tables for one document. Duplicate keys keep the first
/// node in document order.
struct EndpointIndex<'a> {
    by_name: HashMap<&'a str, usize>,
    by_id: HashMap<&'a str, usize>,
    labels: Vec<(String, usize)>,
}

impl<'a> EndpointIndex<'a> {
    fn new(doc: &'a RawWorkflowDocument, labels: Vec<String>) -> Self {
        let mut by_name = HashMap::new();
        let mut by_id = HashMap::new();
        for (idx, node) in doc.nodes.iter().enumerate() {
            if !node.name.is_empty() {
                by_name.entry(node.name.as_str()).or_insert(idx);
            }
            if let Some(id) = node.id.as_deref() {
                by_id.entry(id).or_insert(idx);
            }
        }
        Self {
            by_name,
            by_id,
            labels: labels.into_iter().enumerate().map(|(i, l)| (l, i)).collect(),
        }
    }

    fn resolve(&self, endpoint: &str) -> Option<(usize, EdgeResolution)> {
        if endpoint.is_empty() {
            return None;
        }
        if let Some(&idx) = self.by_name.get(endpoint) {
            return Some((idx, EdgeResolution::Name));
        }
        if let Some(&idx) = self.by_id.get(endpoint) {
            return Some((idx, EdgeResolution::NodeId));
        }
        if let Some((_, idx)) = self.labels.iter().find(|(label, _)| label == endpoint) {
            return Some((*idx, EdgeResolution::Label));
        }
        self.labels
            .iter()
            .filter(|(label, _)| !label.is_empty())
            .find(|(label, _)| endpoint.contains(label.as_str()) || label.contains(endpoint))
            .map(|(_, idx)| (*idx, EdgeResolution::Partial))
    }
}

/// Rebuilds the node/edge graph of one document. Nodes get sequential ids
/// `node1..nodeN` in document order. Connection endpoints are matched by
/// exact node name, then node id, then display label, then substring of the
/// label. Names or labels shared by several nodes resolve to the first such
/// node and are listed in `collisions`.
pub fn reconstruct(doc: &RawWorkflowDocument) -> Diagram {
    let labels: Vec<String> = doc.nodes.iter().map(|n| sanitize_label(&n.name)).collect();

    let nodes: Vec<DiagramNode> = doc
        .nodes
        .iter()
        .zip(&labels)
        .enumerate()
        .map(|(i, (node, label))| DiagramNode {
            id: format!("node{}", i + 1),
            label: label.clone(),
            name: node.name.clone(),
            node_type: node.node_type.clone(),
        })
        .collect();

    let collisions = find_collisions(doc, &labels);
    let index = EndpointIndex::new(doc, labels);

    let mut edges = Vec::new();
    let mut unresolved = Vec::new();
    for (source, target) in doc.connection_pairs() {
        let from = index.resolve(&source);
        let to = index.resolve(&target);
        match (from, to) {
            (Some((from, from_how)), Some((to, to_how))) => edges.push(DiagramEdge {
                from: nodes[from].id.clone(),
                to: nodes[to].id.clone(),
                resolution: from_how.max(to_how),
            }),
            _ => {
                for (endpoint, resolved) in [(source, from), (target, to)] {
                    if resolved.is_none() && !unresolved.contains(&endpoint) {
                        unresolved.push(endpoint);
                    }
                }
            }
        }
    }

    Diagram {
        nodes,
        edges,
        unresolved,
        collisions,
    }
}

fn find_collisions(doc: &RawWorkflowDocument, labels: &[String]) -> Vec<String> {
    let mut seen_names = HashSet::new();
    let mut label_owner: HashMap<&str, &str> = HashMap::new();
    let mut collisions = Vec::new();

    for (node, label) in doc.nodes.iter().zip(labels) {
        let name = node.name.as_str();
        if !seen_names.insert(name) {
            if !collisions.iter().any(|c| c == name) {
                collisions.push(name.to_string());
            }
            continue;
        }
        match label_owner.get(label.as_str()) {
            Some(owner) if *owner != name => {
                if !collisions.iter().any(|c| c == label) {
                    collisions.push(label.clone());
                }
            }
            Some(_) => {}
            None => {
                label_owner.insert(label.as_str(), name);
            }
        }
    }
    collisions
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc(value: serde_json::Value) -> RawWorkflowDocument {
        serde_json::from_value(value).expect("document")
    }

    #[test]
    fn labels_are_sanitized_and_truncated() {
        assert_eq!(sanitize_label("Say \"hi\" it's"), "Say hi its");
        assert_eq!(sanitize_label(""), "Unknown");
        let long = "a".repeat(31);
        assert_eq!(sanitize_label(&long), format!("{}...", "a".repeat(27)));
        let exact = "b".repeat(30);
        assert_eq!(sanitize_label(&exact), exact);
    }

    #[test]
    fn edges_follow_connections() {
        let d = doc(json!({
            "nodes": [
                {"id": "a1", "name": "Start", "type": "n8n-nodes-base.manualTrigger"},
                {"id": "b2", "name": "Fetch", "type": "n8n-nodes-base.httpRequest"},
                {"id": "c3", "name": "Notify", "type": "n8n-nodes-base.slack"}
            ],
            "connections": {
                "Start": {"main": [[{"node": "Fetch", "type": "main", "index": 0}]]},
                "Fetch": {"main": [[{"node": "Notify", "type": "main", "index": 0}]]}
            }
        }));
        let diagram = reconstruct(&d);
        assert_eq!(diagram.nodes.len(), 3);
        assert_eq!(diagram.nodes[2].id, "node3");
        assert_eq!(
            diagram
                .edges
                .iter()
                .map(|e| (e.from.as_str(), e.to.as_str()))
                .collect::<Vec<_>>(),
            vec![("node1", "node2"), ("node2", "node3")]
        );
        assert!(diagram.edges.iter().all(|e| e.resolution == EdgeResolution::Name));
        assert_eq!(
            diagram.to_mermaid(),
            "graph TD\n    node1[\"Start\"]\n    node2[\"Fetch\"]\n    node3[\"Notify\"]\n    node1 --> node2\n    node2 --> node3"
        );
    }

    #[test]
    fn long_names_resolve_by_name_not_truncated_label() {
        let long = "Send the weekly report to the whole team channel";
        let d = doc(json!({
            "nodes": [
                {"name": "Start"},
                {"name": long}
            ],
            "connections": { "Start": {"main": [[{"node": long}]]} }
        }));
        let diagram = reconstruct(&d);
        assert_eq!(diagram.edges.len(), 1);
        assert_eq!(diagram.edges[0].to, "node2");
        assert_eq!(diagram.nodes[1].label.chars().count(), 30);
    }

    #[test]
    fn falls_back_to_ids_and_partial_labels() {
        let d = doc(json!({
            "nodes": [
                {"id": "uuid-1", "name": "Start"},
                {"id": "uuid-2", "name": "Quote \"me\""}
            ],
            "connections": {
                "uuid-1": {"main": [[{"node": "Quote me"}]]},
                "Start": {"main": [[{"node": "Quote me please"}]]}
            }
        }));
        let diagram = reconstruct(&d);
        assert_eq!(diagram.edges.len(), 2);
        assert_eq!(diagram.edges[0].resolution, EdgeResolution::Label);
        assert_eq!(diagram.edges[1].resolution, EdgeResolution::Partial);
        assert!(diagram.edges.iter().all(|e| e.to == "node2"));
    }

    #[test]
    fn unresolved_endpoints_drop_the_edge() {
        let d = doc(json!({
            "nodes": [{"name": "Start"}],
            "connections": { "Start": {"main": [[{"node": "Ghost"}]]} }
        }));
        let diagram = reconstruct(&d);
        assert!(diagram.edges.is_empty());
        assert_eq!(diagram.unresolved, vec!["Ghost"]);
    }

    #[test]
    fn duplicate_names_resolve_to_first_and_are_reported() {
        let d = doc(json!({
            "nodes": [
                {"name": "Start"},
                {"name": "Set"},
                {"name": "Set"}
            ],
            "connections": { "Start": {"main": [[{"node": "Set"}]]} }
        }));
        let diagram = reconstruct(&d);
        assert_eq!(diagram.edges[0].to, "node2");
        assert_eq!(diagram.collisions, vec!["Set"]);
    }

    #[test]
    fn truncation_collisions_are_reported() {
        let prefix = "x".repeat(27);
        let d = doc(json!({
            "nodes": [
                {"name": format!("{prefix}-first-node")},
                {"name": format!("{prefix}-second-node")}
            ]
        }));
        let diagram = reconstruct(&d);
        assert_eq!(diagram.collisions, vec![format!("{prefix}...")]);
    }
}
