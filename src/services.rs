use std::{collections::HashMap, fs, path::Path};

use serde::Deserialize;

use crate::error::{IndexError, Result};

const BUILTIN_MAPPINGS: &str = include_str!("../data/service_mappings.json");

const BASE_NODE_PREFIX: &str = "n8n-nodes-base.";
const SCOPED_NODE_PREFIX: &str = "@n8n/";

#[derive(Debug, Deserialize)]
struct MappingEntry {
    key: String,
    name: String,
}

/// Canonical integration names keyed by normalized node type. Entry order is
/// preserved because the display-name scan takes the first key it finds.
#[derive(Debug, Clone)]
pub struct ServiceResolver {
    entries: Vec<(String, String)>,
    by_key: HashMap<String, usize>,
}

impl ServiceResolver {
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_MAPPINGS, "builtin service mappings")
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| IndexError::io("reading service mapping file", err))?;
        Self::from_json(&raw, &path.display().to_string())
    }

    pub fn from_json(raw: &str, origin: &str) -> Result<Self> {
        let parsed: Vec<MappingEntry> =
            serde_json::from_str(raw).map_err(|err| IndexError::parse(origin, err))?;
        Ok(Self::from_pairs(
            parsed.into_iter().map(|entry| (entry.key, entry.name)),
        ))
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut entries: Vec<(String, String)> = Vec::new();
        let mut by_key: HashMap<String, usize> = HashMap::new();
        for (key, name) in pairs {
            let key = key.into().trim().to_lowercase();
            let name = name.into();
            if key.is_empty() || name.is_empty() {
                continue;
            }
            // A repeated key keeps its first position and takes the later name.
            match by_key.get(&key) {
                Some(&idx) => entries[idx].1 = name,
                None => {
                    by_key.insert(key.clone(), entries.len());
                    entries.push((key, name));
                }
            }
        }
        Self { entries, by_key }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.by_key
            .get(key)
            .map(|&idx| self.entries[idx].1.as_str())
    }

    pub fn resolve_type(&self, node_type: &str) -> Option<&str> {
        normalize_node_type(node_type).and_then(|key| self.lookup(&key))
    }

    pub fn resolve_name(&self, node_name: &str) -> Option<&str> {
        let lowered = node_name.to_lowercase();
        if lowered.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|(key, _)| lowered.contains(key.as_str()))
            .map(|(_, name)| name.as_str())
    }

    /// A match on the display name wins over a match on the type.
    pub fn resolve(&self, node_type: &str, node_name: &str) -> Option<&str> {
        self.resolve_name(node_name)
            .or_else(|| self.resolve_type(node_type))
    }
}

/// Strips the known namespace prefixes and the literal `trigger` from a node
/// type. Types outside those namespaces have no normalized form.
pub fn normalize_node_type(node_type: &str) -> Option<String> {
    let lowered = node_type.to_lowercase();
    let raw = if let Some(rest) = lowered.strip_prefix(BASE_NODE_PREFIX) {
        rest
    } else if lowered.starts_with(SCOPED_NODE_PREFIX) {
        lowered.rsplit('.').next().unwrap_or(lowered.as_str())
    } else {
        return None;
    };
    Some(raw.replace("trigger", ""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_loads() {
        let resolver = ServiceResolver::builtin().expect("builtin mappings");
        assert!(resolver.len() > 50);
        assert_eq!(resolver.lookup("slack"), Some("Slack"));
        assert_eq!(resolver.lookup("telegramtrigger"), Some("Telegram"));
    }

    #[test]
    fn normalizes_base_and_scoped_types() {
        assert_eq!(
            normalize_node_type("n8n-nodes-base.googleSheetsTrigger").as_deref(),
            Some("googlesheets")
        );
        assert_eq!(
            normalize_node_type("@n8n/n8n-nodes-langchain.lmChatOpenAi").as_deref(),
            Some("lmchatopenai")
        );
        assert_eq!(normalize_node_type("n8n-nodes-custom.thing"), None);
    }

    #[test]
    fn name_match_overrides_type_match() {
        let resolver = ServiceResolver::builtin().expect("builtin mappings");
        assert_eq!(
            resolver.resolve("n8n-nodes-base.httpRequest", "Post to Slack"),
            Some("Slack")
        );
        assert_eq!(
            resolver.resolve("n8n-nodes-base.httpRequest", "Fetch data"),
            Some("HTTP Request")
        );
        assert_eq!(resolver.resolve("n8n-nodes-base.set", "Edit fields"), None);
    }

    #[test]
    fn name_scan_takes_first_key_in_table_order() {
        let resolver = ServiceResolver::from_pairs([("gmail", "Gmail"), ("mail", "Mail")]);
        assert_eq!(resolver.resolve_name("Gmail inbox"), Some("Gmail"));

        let resolver = ServiceResolver::from_pairs([("mail", "Mail"), ("gmail", "Gmail")]);
        assert_eq!(resolver.resolve_name("Gmail inbox"), Some("Mail"));
    }

    #[test]
    fn repeated_keys_keep_position_and_take_last_name() {
        let resolver =
            ServiceResolver::from_pairs([("a", "First"), ("b", "Bee"), ("A", "Second")]);
        assert_eq!(resolver.len(), 2);
        assert_eq!(resolver.lookup("a"), Some("Second"));
    }

    #[test]
    fn malformed_mapping_file_is_a_parse_error() {
        let err = ServiceResolver::from_json("{not json", "test").unwrap_err();
        assert!(matches!(err, IndexError::Parse { .. }));
    }
}
