use clicker_store::{CollectionSnapshot, Document, DocumentSnapshot};
use clicker_sync::{build_chat_window, build_leaderboard};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

fn documents(n: u64, body: impl Fn(u64) -> serde_json::Value) -> CollectionSnapshot {
    let documents = (0..n)
        .map(|i| {
            let data: Document = match body(i) {
                serde_json::Value::Object(m) => m,
                _ => Document::new(),
            };
            DocumentSnapshot {
                id: format!("p{i}"),
                seq: i,
                data,
            }
        })
        .collect();
    CollectionSnapshot {
        collection: "bench".into(),
        documents,
    }
}

fn bench_views(c: &mut Criterion) {
    let players = documents(2_000, |i| {
        json!({
            "displayName": format!("player{i}"),
            "score": ((i * 7_919) % 100_003) as f64,
            "cps": (i % 97) as f64,
            "inventory": {"cursor": i % 13, "floppy": i % 5},
            "trophies": ["hello_world"],
        })
    });
    c.bench_function("leaderboard_2000", |b| {
        b.iter(|| build_leaderboard(black_box(&players)))
    });

    let chat = documents(2_000, |i| {
        json!({
            "username": "u",
            "text": "hello",
            "timestamp": format!("2024-01-01T00:{:02}:{:02}Z", (i / 60) % 60, i % 60),
        })
    });
    c.bench_function("chat_window_2000", |b| {
        b.iter(|| build_chat_window(black_box(&chat), 50))
    });
}

criterion_group!(benches, bench_views);
criterion_main!(benches);
