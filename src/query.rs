use std::{collections::HashSet, fs, time::Instant};

use serde_json::Value;
use tracing::debug;

use crate::{
    analyzer::{file_name_of, parse_document_value},
    corpus::Corpus,
    error::{IndexError, Result},
    models::{
        AppliedFilters, DeepSearchHit, DeepSearchResult, QueryResult, SearchQuery, WorkflowRecord,
    },
    store::IndexStore,
};

pub const DEEP_MATCH_TYPE: &str = "JSON content match";
pub const DEEP_SEARCH_TYPE: &str = "deep_json_search";
const UNKNOWN_NAME: &str = "Unknown";

/// Metadata search over a borrowed, immutable index.
#[derive(Debug, Clone, Copy)]
pub struct QueryEngine<'a> {
    store: &'a IndexStore,
}

impl<'a> QueryEngine<'a> {
    pub fn new(store: &'a IndexStore) -> Self {
        Self { store }
    }

    pub fn search(&self, query: &SearchQuery) -> QueryResult<'a> {
        let page = query.page.max(1);
        let per_page = query.per_page.max(1);
        let needle = query.text.to_lowercase();
        let trigger = SearchQuery::active_filter(&query.trigger).map(str::to_lowercase);
        let complexity = SearchQuery::active_filter(&query.complexity).map(str::to_lowercase);

        let matches: Vec<&'a WorkflowRecord> = self
            .store
            .workflows()
            .iter()
            .filter(|w| needle.is_empty() || text_matches(w, &needle))
            .filter(|w| {
                trigger
                    .as_deref()
                    .map_or(true, |t| w.trigger_type.as_str().to_lowercase() == t)
            })
            .filter(|w| {
                complexity
                    .as_deref()
                    .map_or(true, |c| w.complexity.as_str() == c)
            })
            .filter(|w| !query.active_only || w.active)
            .collect();

        let total = matches.len();
        let start = (page - 1).saturating_mul(per_page);
        let items = matches
            .into_iter()
            .skip(start)
            .take(per_page)
            .collect::<Vec<_>>();

        QueryResult {
            items,
            total,
            page,
            per_page,
            pages: total.div_ceil(per_page),
            query: query.text.clone(),
            filters: AppliedFilters {
                trigger: query.trigger.clone(),
                complexity: query.complexity.clone(),
                active_only: query.active_only,
            },
        }
    }
}

/// `needle` must already be lower-cased.
fn text_matches(workflow: &WorkflowRecord, needle: &str) -> bool {
    let contains = |field: &str| field.to_lowercase().contains(needle);

    contains(&workflow.name)
        || contains(&workflow.description)
        || workflow.integrations.iter().any(|i| contains(i))
        || workflow.node_count.to_string().contains(needle)
        || contains(workflow.trigger_type.as_str())
        || contains(workflow.complexity.as_str())
        || workflow.tags.iter().any(|t| contains(t))
        || contains(&workflow.filename)
}

/// Scans raw documents on disk, bypassing the index. Stops at `limit` hits
/// or when `deadline` passes; unreadable documents are skipped and do not
/// count towards the limit.
pub fn deep_search(
    corpus: &Corpus,
    text: &str,
    limit: usize,
    deadline: Option<Instant>,
) -> Result<DeepSearchResult> {
    if text.is_empty() {
        return Err(IndexError::EmptyQuery);
    }
    if limit == 0 {
        return Err(IndexError::InvalidArgument(
            "limit must be at least 1".to_string(),
        ));
    }

    let needle = text.to_lowercase();
    let mut results = Vec::new();
    let mut timed_out = false;

    for path in corpus.document_paths() {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            timed_out = true;
            break;
        }

        let filename = file_name_of(&path);
        let Some(value) = fs::read(&path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
        else {
            debug!(file = %filename, "Deep search skipped unreadable document");
            continue;
        };

        if !value.to_string().to_lowercase().contains(&needle) {
            continue;
        }

        let Ok(doc) = parse_document_value(&filename, value) else {
            continue;
        };

        let mut seen = HashSet::new();
        let integrations = doc
            .nodes
            .iter()
            .filter(|node| !node.node_type.is_empty())
            .filter_map(|node| node.node_type.rsplit('.').next())
            .filter(|suffix| seen.insert(*suffix))
            .map(ToString::to_string)
            .collect();

        results.push(DeepSearchHit {
            name: if doc.name.is_empty() {
                UNKNOWN_NAME.to_string()
            } else {
                doc.name.clone()
            },
            description: doc.meta_description(),
            node_count: doc.nodes.len(),
            integrations,
            match_type: DEEP_MATCH_TYPE,
            filename,
        });

        if results.len() >= limit {
            debug!(limit, "Deep search reached its limit");
            break;
        }
    }

    Ok(DeepSearchResult {
        query: text.to_string(),
        total: results.len(),
        results,
        search_type: DEEP_SEARCH_TYPE,
        timed_out,
    })
}
