use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use genui_engine::{CatalogIndex, StreamEvent, StreamParser, ToolSchema};
use serde_json::{Value, json};
use std::collections::HashMap;

fn widget_schema(name: &str, description: &str) -> ToolSchema {
    let mut properties = HashMap::new();
    properties.insert("label".to_string(), json!({"type": "string"}));
    properties.insert("value".to_string(), json!({"type": "string"}));
    ToolSchema::new(name, description, properties, vec!["label".to_string()])
}

fn populated_catalog(count: usize) -> CatalogIndex {
    let mut index = CatalogIndex::new();
    let kinds = [
        ("date_picker", "Pick a calendar date"),
        ("time_picker", "Pick a time of day"),
        ("data_table", "Tabular data display with sorting"),
        ("button", "A clickable button"),
        ("text_field", "Single line text input"),
        ("checkbox", "A boolean toggle control"),
        ("dropdown_select", "Select one option from a list"),
        ("progress_bar", "Indicate completion progress"),
    ];
    for i in 0..count {
        let (kind, description) = kinds[i % kinds.len()];
        index.add(widget_schema(&format!("{kind}_{i}"), description));
    }
    index
}

// Benchmark: CatalogIndex::search across catalog sizes.
fn bench_catalog_search_by_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("catalog_search_by_size");

    for count in [10, 100, 1000, 5000].iter() {
        let index = populated_catalog(*count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &index, |b, idx| {
            b.iter(|| idx.search(black_box("date picker"), black_box(10)));
        });
    }

    group.finish();
}

// Benchmark: CatalogIndex::add, including keyword extraction, one schema at a time.
fn bench_catalog_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("catalog_add");

    for count in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| {
                let mut index = CatalogIndex::new();
                for i in 0..count {
                    index.add(black_box(widget_schema(
                        &format!("widget_{i}"),
                        "Pick a date value for the calendar view",
                    )));
                }
                index
            });
        });
    }

    group.finish();
}

// Helper: a content_block_start/delta*/stop triple for one tool_use block,
// the shape a real upstream splits a `surface_update` call across.
fn tool_use_block_events(index: i64, chunk_count: usize, chunk_size: usize) -> Vec<Value> {
    let mut events = vec![json!({
        "type": "content_block_start",
        "index": index,
        "content_block": {"type": "tool_use", "id": format!("call_{index}"), "name": "surface_update"},
    })];

    let fragment = "a".repeat(chunk_size);
    for _ in 0..chunk_count {
        events.push(json!({
            "type": "content_block_delta",
            "index": index,
            "delta": {"type": "input_json_delta", "partial_json": fragment},
        }));
    }

    events.push(json!({"type": "content_block_stop", "index": index}));
    events
}

// Benchmark: StreamParser::feed over one growing tool_use block.
fn bench_stream_parser_tool_use_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_parser_tool_use_block");

    for chunk_count in [10, 100, 500].iter() {
        let events = tool_use_block_events(0, *chunk_count, 32);
        group.bench_with_input(BenchmarkId::from_parameter(chunk_count), &events, |b, events| {
            b.iter(|| stream_through(events));
        });
    }

    group.finish();
}

// Benchmark: StreamParser::feed interleaving many concurrent block indices,
// the shape a real response with several widgets streamed in parallel takes.
fn bench_stream_parser_interleaved_blocks(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_parser_interleaved_blocks");

    for block_count in [2, 8, 32].iter() {
        let mut events = Vec::new();
        for i in 0..*block_count {
            events.extend(tool_use_block_events(i as i64, 20, 16));
        }
        group.bench_with_input(BenchmarkId::from_parameter(block_count), &events, |b, events| {
            b.iter(|| stream_through(events));
        });
    }

    group.finish();
}

fn stream_through(events: &[Value]) -> usize {
    let mut count = 0;
    let mut parser = StreamParser::new();
    for event in events {
        for stream_event in parser.feed(black_box(event)) {
            if matches!(stream_event, StreamEvent::RawDelta { .. }) {
                count += 1;
            }
        }
    }
    count
}

criterion_group!(
    benches,
    bench_catalog_search_by_size,
    bench_catalog_add,
    bench_stream_parser_tool_use_block,
    bench_stream_parser_interleaved_blocks,
);
criterion_main!(benches);
