//! Tool-use interceptor (C7).
//!
//! Sits on the stream parser's output, before the message converter. Detects
//! the two catalog tools (`search_catalog`, `load_tools`) inside the model's
//! emitted tool_use blocks and serves them locally against the catalog index,
//! without a network round-trip.

use crate::catalog::CatalogIndex;
use crate::types::ToolSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Mutex;

pub const SEARCH_CATALOG_TOOL: &str = "search_catalog";
pub const LOAD_TOOLS_TOOL: &str = "load_tools";

#[derive(Debug, Deserialize)]
pub struct SearchCatalogInput {
    pub query: String,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_max_results() -> usize {
    10
}

#[derive(Debug, Serialize)]
pub struct SearchResultItem {
    pub name: String,
    pub description: String,
    pub relevance: f64,
}

#[derive(Debug, Serialize)]
pub struct SearchCatalogResult {
    pub results: Vec<SearchResultItem>,
    pub total_available: usize,
}

#[derive(Debug, Deserialize)]
pub struct LoadToolsInput {
    pub tool_names: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct LoadToolsResult {
    pub loaded: Vec<String>,
    pub not_found: Vec<String>,
}

/// Per-session state: which tool names have been loaded so far, bounded by
/// `max_loaded_tools_per_session`.
pub struct ToolUseInterceptor {
    catalog: std::sync::Arc<Mutex<CatalogIndex>>,
    loaded: Mutex<HashSet<String>>,
    max_loaded: usize,
}

impl ToolUseInterceptor {
    pub fn new(catalog: std::sync::Arc<Mutex<CatalogIndex>>, max_loaded_tools_per_session: usize) -> Self {
        Self {
            catalog,
            loaded: Mutex::new(HashSet::new()),
            max_loaded: max_loaded_tools_per_session,
        }
    }

    pub fn is_intercepted(name: &str) -> bool {
        matches!(name, SEARCH_CATALOG_TOOL | LOAD_TOOLS_TOOL)
    }

    /// Relevance = matched query terms / total query terms, computed against
    /// name+description (independent of the index's internal keyword score).
    pub fn search_catalog(&self, input: SearchCatalogInput) -> SearchCatalogResult {
        let catalog = self.catalog.lock().unwrap();
        let total_available = catalog.len();
        let query_terms = crate::catalog::tokenize_description(&input.query);
        let hits = catalog.search(&input.query, input.max_results);

        let results = hits
            .into_iter()
            .filter_map(|hit| {
                let item = catalog.get_by_name(&hit.name)?;
                let haystack = format!("{} {}", item.schema.name, item.schema.description).to_lowercase();
                let matched = query_terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                let relevance = if query_terms.is_empty() {
                    0.0
                } else {
                    matched as f64 / query_terms.len() as f64
                };
                Some(SearchResultItem {
                    name: item.schema.name.clone(),
                    description: item.schema.description.clone(),
                    relevance,
                })
            })
            .collect();

        SearchCatalogResult {
            results,
            total_available,
        }
    }

    /// Partitions requested names into `loaded`/`not_found`, adding loaded
    /// names to the session set (bounded). Returns the newly loaded schemas
    /// via `on_loaded` so the dispatcher can advertise them in subsequent
    /// turns.
    pub fn load_tools(
        &self,
        input: LoadToolsInput,
        mut on_loaded: impl FnMut(Vec<ToolSchema>),
    ) -> LoadToolsResult {
        let catalog = self.catalog.lock().unwrap();
        let mut loaded_set = self.loaded.lock().unwrap();

        let mut loaded = Vec::new();
        let mut not_found = Vec::new();
        let mut newly_loaded_schemas = Vec::new();

        for name in input.tool_names {
            match catalog.get_by_name(&name) {
                Some(item) => {
                    if loaded_set.len() < self.max_loaded || loaded_set.contains(&name) {
                        if loaded_set.insert(name.clone()) {
                            newly_loaded_schemas.push(item.schema.clone());
                        }
                        loaded.push(name);
                    } else {
                        not_found.push(name);
                    }
                }
                None => not_found.push(name),
            }
        }

        on_loaded(newly_loaded_schemas);

        LoadToolsResult { loaded, not_found }
    }

    pub fn loaded_tool_names(&self) -> Vec<String> {
        self.loaded.lock().unwrap().iter().cloned().collect()
    }
}
