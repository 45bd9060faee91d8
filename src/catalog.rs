//! Keyword extraction and the searchable tool catalog (C2).
//!
//! Exposes a very large widget vocabulary to the model without loading every
//! tool definition into every request: schemas are tokenized once at add-time
//! and the resulting inverted index drives exact+prefix search with relevance
//! scoring.

use crate::types::{IndexedCatalogItem, ToolSchema};
use std::collections::{HashMap, HashSet};

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "if", "then", "else", "of", "to", "in", "on",
    "for", "with", "at", "by", "from", "up", "about", "into", "over", "after", "is",
    "are", "was", "were", "be", "been", "being", "has", "have", "had", "do", "does",
    "did", "will", "would", "should", "can", "could", "may", "might", "must", "this",
    "that", "these", "those", "it", "its", "as", "not", "no", "so",
    "object", "string", "number", "boolean", "array", "null", "true", "false",
    "optional", "required", "default", "value", "type",
];

fn stopwords() -> &'static HashSet<&'static str> {
    use std::sync::OnceLock;
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| STOPWORDS.iter().copied().collect())
}

fn is_stopword(word: &str) -> bool {
    stopwords().contains(word)
}

fn is_purely_numeric(word: &str) -> bool {
    !word.is_empty() && word.chars().all(|c| c.is_ascii_digit())
}

fn accept(word: &str) -> Option<String> {
    let lower = word.to_lowercase();
    if lower.len() < 2 || is_stopword(&lower) || is_purely_numeric(&lower) {
        return None;
    }
    Some(lower)
}

/// Tokenizes a name by splitting on `_`, `-`, and case boundaries.
/// "HTTPClient" -> ["HTTP", "Client"]; "camelCase" -> ["camel", "Case"].
pub fn tokenize_name(name: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let chars: Vec<char> = name.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if c == '_' || c == '-' {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            continue;
        }

        if c.is_uppercase() && !current.is_empty() {
            let prev = chars[i - 1];
            let next = chars.get(i + 1);
            let prev_is_lower = prev.is_lowercase();
            let next_is_lower = next.is_some_and(|c| c.is_lowercase());
            // camelCase boundary, or an uppercase run followed by lowercase
            // ("HTTPClient" -> split before the 'C' that starts "Client").
            if prev_is_lower || (prev.is_uppercase() && next_is_lower) {
                tokens.push(std::mem::take(&mut current));
            }
        }

        current.push(c);
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    tokens.into_iter().filter_map(|t| accept(&t)).collect()
}

/// Lowercases, strips punctuation, and splits a free-text description on
/// whitespace.
pub fn tokenize_description(description: &str) -> Vec<String> {
    let cleaned: String = description
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned
        .split_whitespace()
        .filter_map(accept)
        .collect()
}

/// Recursively extracts keywords from a JSON schema: `description` strings,
/// `enum` string values (length >= 2), property names (tokenized via the
/// name rule), and the contents of `items`.
pub fn extract_schema_keywords(schema: &serde_json::Value) -> Vec<String> {
    let mut out = Vec::new();
    walk_schema(schema, &mut out);
    out
}

fn walk_schema(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(desc) = map.get("description").and_then(|v| v.as_str()) {
                out.extend(tokenize_description(desc));
            }
            if let Some(variants) = map.get("enum").and_then(|v| v.as_array()) {
                for variant in variants {
                    if let Some(s) = variant.as_str() {
                        if s.len() >= 2 {
                            out.extend(tokenize_description(s));
                        }
                    }
                }
            }
            if let Some(props) = map.get("properties").and_then(|v| v.as_object()) {
                for (name, sub) in props {
                    out.extend(tokenize_name(name));
                    walk_schema(sub, out);
                }
            }
            if let Some(items) = map.get("items") {
                walk_schema(items, out);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                walk_schema(item, out);
            }
        }
        _ => {}
    }
}

/// Computes the full, deterministic, sorted keyword set for a schema: name,
/// description, and schema body combined and deduplicated.
pub fn extract_keywords(schema: &ToolSchema) -> Vec<String> {
    let mut words: HashSet<String> = HashSet::new();
    words.extend(tokenize_name(&schema.name));
    words.extend(tokenize_description(&schema.description));
    let schema_value = serde_json::Value::Object(
        schema
            .input_schema
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    );
    words.extend(extract_schema_keywords(&schema_value));

    let mut sorted: Vec<String> = words.into_iter().collect();
    sorted.sort();
    sorted
}

/// One scored hit returned from `CatalogIndex::search`.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub name: String,
    pub score: u32,
}

/// Dual index over a set of `ToolSchema`s: name -> item, keyword -> set of
/// names. Mutations (`add`/`clear`) must not overlap searches (single-writer,
/// see the concurrency notes); concurrent reads are safe.
#[derive(Debug, Default)]
pub struct CatalogIndex {
    items: HashMap<String, IndexedCatalogItem>,
    keyword_index: HashMap<String, HashSet<String>>,
    insertion_order: Vec<String>,
}

impl CatalogIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent by name: re-adding a name recomputes and replaces its entry.
    pub fn add(&mut self, schema: ToolSchema) {
        let name = schema.name.clone();
        if self.items.contains_key(&name) {
            self.remove_from_keyword_index(&name);
        } else {
            self.insertion_order.push(name.clone());
        }

        let keywords = extract_keywords(&schema);
        for kw in &keywords {
            self.keyword_index
                .entry(kw.clone())
                .or_default()
                .insert(name.clone());
        }
        self.items
            .insert(name.clone(), IndexedCatalogItem { schema, keywords });
    }

    fn remove_from_keyword_index(&mut self, name: &str) {
        if let Some(existing) = self.items.get(name) {
            for kw in &existing.keywords {
                if let Some(names) = self.keyword_index.get_mut(kw) {
                    names.remove(name);
                    if names.is_empty() {
                        self.keyword_index.remove(kw);
                    }
                }
            }
        }
    }

    pub fn get_by_name(&self, name: &str) -> Option<&IndexedCatalogItem> {
        self.items.get(name)
    }

    /// Missing names are silently skipped.
    pub fn get_by_names(&self, names: &[String]) -> Vec<&IndexedCatalogItem> {
        names.iter().filter_map(|n| self.items.get(n)).collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.keyword_index.clear();
        self.insertion_order.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// All registered names, in insertion order.
    pub fn all_names(&self) -> &[String] {
        &self.insertion_order
    }

    /// Exact keyword matches score 3 points per query term, prefix matches
    /// score 1; scores sum across query terms. Ties break by insertion order.
    pub fn search(&self, query: &str, max_results: usize) -> Vec<SearchHit> {
        let terms = tokenize_description(query);
        if terms.is_empty() {
            return Vec::new();
        }

        let mut scores: HashMap<String, u32> = HashMap::new();
        for term in &terms {
            if let Some(names) = self.keyword_index.get(term) {
                for name in names {
                    *scores.entry(name.clone()).or_insert(0) += 3;
                }
            }
            for (kw, names) in &self.keyword_index {
                if kw != term && kw.starts_with(term.as_str()) {
                    for name in names {
                        *scores.entry(name.clone()).or_insert(0) += 1;
                    }
                }
            }
        }

        let order: HashMap<&String, usize> = self
            .insertion_order
            .iter()
            .enumerate()
            .map(|(i, n)| (n, i))
            .collect();

        let mut ranked: Vec<(String, u32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| order.get(&a.0).cmp(&order.get(&b.0)))
        });

        ranked
            .into_iter()
            .take(max_results)
            .map(|(name, score)| SearchHit { name, score })
            .collect()
    }
}
