use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, SamplingMode, Throughput};
use std::sync::Arc;

use docweave::auth::AuthContext;
use docweave::filter::{Filter, FilterCompiler};
use docweave::schema::SchemaRegistry;
use docweave::store::{DocumentStore, MemoryStore};
use docweave::Engine;
use serde_json::json;

const SCHEMAS: &str = r#"[
  {"name": "User", "hidden": ["password"], "relations": {"posts": {"type": "hasMany", "model": "Post"}}},
  {"name": "Post", "relations": {
      "author": {"type": "belongsTo", "model": "User"},
      "comments": {"type": "hasMany", "model": "Comment"}
  }},
  {"name": "Comment", "relations": {"post": {"type": "belongsTo", "model": "Post"}}}
]"#;

const FILTER: &str = r#"{
  "where": {"created": {"$gt": "$30dago"}, "authorId": "5f1d7a2b9c8e4f0012345678", "state": {"$in": ["open", "draft"]}},
  "order": ["created DESC", "title ASC"],
  "skip": 20,
  "limit": 10,
  "include": ["author", {"relation": "comments", "scope": {"where": {"flagged": false}, "limit": 5, "include": "post"}}]
}"#;

fn bench_compile(c: &mut Criterion) {
    let registry = SchemaRegistry::from_json(SCHEMAS, "db").expect("schemas");
    let post = registry.get("Post").expect("Post").clone();
    let filter = Filter::from_json(FILTER).expect("filter");

    let mut group = c.benchmark_group("filter_compile");
    group.sampling_mode(SamplingMode::Flat);
    group.bench_function("compile_nested", |b| {
        b.iter(|| {
            let stages = FilterCompiler::new(&registry, false).compile(&post, Some(&filter)).expect("compile");
            criterion::black_box(stages);
        });
    });
    group.bench_function("compile_no_conversion", |b| {
        b.iter(|| {
            let stages = FilterCompiler::new(&registry, true).compile(&post, Some(&filter)).expect("compile");
            criterion::black_box(stages);
        });
    });
    group.finish();
}

fn seeded_engine(posts: usize) -> Engine {
    let db = MemoryStore::new("db");
    db.seed("User", vec![json!({"_id": "u1", "name": "ann"}).as_object().cloned().unwrap_or_default()]);
    let docs = (0..posts)
        .map(|i| json!({"_id": format!("p{}", i), "title": format!("post {}", i), "userId": "u1"}).as_object().cloned().unwrap_or_default())
        .collect();
    db.seed("Post", docs);
    let registry = SchemaRegistry::from_json(SCHEMAS, "db").expect("schemas");
    Engine::builder(registry)
        .datasource("db", Arc::new(db) as Arc<dyn DocumentStore>)
        .build()
        .expect("engine")
}

fn bench_find_many(c: &mut Criterion) {
    let ns = [100usize, 1_000usize];
    let mut group = c.benchmark_group("find_many_include");
    group.sampling_mode(SamplingMode::Flat);
    group.sample_size(20);
    let filter = Filter::from_json(r#"{"include": "author"}"#).expect("filter");
    let auth = AuthContext::system();

    for &n in &ns {
        let engine = seeded_engine(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("author", n.to_string()), &n, |b, _| {
            let repo = engine.repository("Post").expect("repo");
            b.iter(|| {
                let rows = repo.find_many(Some(&filter), &auth).expect("find_many");
                criterion::black_box(rows.len());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compile, bench_find_many);
criterion_main!(benches);
