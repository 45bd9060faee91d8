//! Drives the catalog-search and tool-loading tools together against one
//! populated catalog, the round trip a real conversation takes: the model
//! searches for a widget, then asks to load the ones it picked.

use genui_engine::{
    CatalogIndex, LoadToolsInput, SearchCatalogInput, ToolSchema, ToolUseInterceptor,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

fn populated_catalog() -> Arc<Mutex<CatalogIndex>> {
    let mut index = CatalogIndex::new();
    let widgets = [
        ("date_picker", "Pick a calendar date"),
        ("time_picker", "Pick a time of day"),
        ("data_table", "Tabular data display with sorting and paging"),
        ("button", "A clickable button"),
    ];
    for (name, description) in widgets {
        index.add(ToolSchema::new(name, description, HashMap::new(), vec![]));
    }
    Arc::new(Mutex::new(index))
}

#[test]
fn search_then_load_resolves_the_schema_the_search_surfaced() {
    let interceptor = ToolUseInterceptor::new(populated_catalog(), 10);

    let search = interceptor.search_catalog(SearchCatalogInput {
        query: "calendar date".to_string(),
        categories: None,
        max_results: 5,
    });
    assert_eq!(search.total_available, 4);
    assert_eq!(search.results[0].name, "date_picker");
    assert!(search.results[0].relevance > 0.0);

    let top_hit = search.results[0].name.clone();
    let mut loaded_schemas = Vec::new();
    let load = interceptor.load_tools(
        LoadToolsInput { tool_names: vec![top_hit.clone()] },
        |schemas| loaded_schemas = schemas,
    );

    assert_eq!(load.loaded, vec![top_hit.clone()]);
    assert!(load.not_found.is_empty());
    assert_eq!(loaded_schemas.len(), 1);
    assert_eq!(loaded_schemas[0].name, top_hit);
    assert_eq!(interceptor.loaded_tool_names(), vec![top_hit]);
}

#[test]
fn loading_beyond_the_session_bound_reports_names_as_not_found_even_though_the_catalog_has_them() {
    let interceptor = ToolUseInterceptor::new(populated_catalog(), 2);

    let first = interceptor.load_tools(
        LoadToolsInput {
            tool_names: vec!["button".to_string(), "date_picker".to_string()],
        },
        |_| {},
    );
    assert_eq!(first.loaded, vec!["button".to_string(), "date_picker".to_string()]);

    // time_picker exists in the catalog, but the session is already at its
    // loaded-tool bound, so it comes back not_found rather than loaded.
    let second = interceptor.load_tools(
        LoadToolsInput { tool_names: vec!["time_picker".to_string()] },
        |_| {},
    );
    assert!(second.loaded.is_empty());
    assert_eq!(second.not_found, vec!["time_picker".to_string()]);

    // Re-requesting an already-loaded name still succeeds; it doesn't count
    // twice against the bound.
    let third = interceptor.load_tools(
        LoadToolsInput { tool_names: vec!["button".to_string()] },
        |_| {},
    );
    assert_eq!(third.loaded, vec!["button".to_string()]);
}

#[test]
fn search_with_no_matching_terms_returns_zero_relevance_but_keeps_total_available() {
    let interceptor = ToolUseInterceptor::new(populated_catalog(), 10);
    let result = interceptor.search_catalog(SearchCatalogInput {
        query: "nonexistent widget kind".to_string(),
        categories: None,
        max_results: 5,
    });
    assert_eq!(result.total_available, 4);
    assert!(result.results.iter().all(|r| r.relevance == 0.0) || result.results.is_empty());
}
