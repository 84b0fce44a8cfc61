use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use docweave::auth::{AuthContext, Bearer};
use docweave::cache::{CacheStore, KvStore};
use docweave::config::EngineConfig;
use docweave::filter::Filter;
use docweave::schema::SchemaRegistry;
use docweave::store::{Document, DocumentStore, MemoryStore};
use docweave::Engine;

const USAGE: &str = "usage: docweave --schema <file|dir> --model <Name> [--data <file>] [--filter <json>] \
[--compile-only] [--config <file>] [--subject <id> [--roles a,b]] [--system]";

#[derive(Debug, Default)]
struct CliArgs {
    schema: Option<PathBuf>,
    data: Option<PathBuf>,
    config: Option<PathBuf>,
    model: Option<String>,
    filter: Option<String>,
    compile_only: bool,
    subject: Option<String>,
    roles: Vec<String>,
    system: bool,
}

impl CliArgs {
    fn parse<I: Iterator<Item = String>>(mut it: I) -> anyhow::Result<Self> {
        let mut a = CliArgs::default();
        while let Some(flag) = it.next() {
            let mut value = |name: &str| it.next().ok_or_else(|| anyhow!("{} requires a value\n{}", name, USAGE));
            match flag.as_str() {
                "--schema" => a.schema = Some(PathBuf::from(value("--schema")?)),
                "--data" => a.data = Some(PathBuf::from(value("--data")?)),
                "--config" => a.config = Some(PathBuf::from(value("--config")?)),
                "--model" => a.model = Some(value("--model")?),
                "--filter" => a.filter = Some(value("--filter")?),
                "--subject" => a.subject = Some(value("--subject")?),
                "--roles" => {
                    a.roles = value("--roles")?.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
                }
                "--compile-only" => a.compile_only = true,
                "--system" => a.system = true,
                "-h" | "--help" => bail!("{}", USAGE),
                other => bail!("unknown argument '{}'\n{}", other, USAGE),
            }
        }
        Ok(a)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow!(e.to_string()))?;
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let args = CliArgs::parse(std::env::args().skip(1))?;
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(target: "docweave", "docweave starting: RUST_LOG='{}', schema={:?}, data={:?}", rust_log, args.schema, args.data);

    // store round-trips are synchronous; keep them off the async workers
    let out = tokio::task::spawn_blocking(move || run(args)).await??;
    println!("{}", out);
    Ok(())
}

fn run(args: CliArgs) -> anyhow::Result<String> {
    let mut config = match &args.config {
        Some(p) => EngineConfig::load(p)?,
        None => EngineConfig::default(),
    };
    config.apply_env();

    let schema = args.schema.as_deref().ok_or_else(|| anyhow!("--schema is required\n{}", USAGE))?;
    let model = args.model.clone().ok_or_else(|| anyhow!("--model is required\n{}", USAGE))?;
    let registry = load_registry(schema, &config.default_datasource)?;
    let filter = args.filter.as_deref().map(Filter::from_json).transpose()?;

    let mut datasources: BTreeSet<String> = BTreeSet::new();
    let mut cache_names: BTreeSet<String> = BTreeSet::new();
    for m in registry.iter() {
        datasources.insert(m.datasource.clone());
        if let Some(p) = &m.cache { cache_names.insert(p.datasource_name.clone()); }
    }

    let fixtures = match &args.data {
        Some(p) => load_fixtures(p)?,
        None => HashMap::new(),
    };
    let mut builder = Engine::builder(registry).config(config);
    for ds in &datasources {
        let store = MemoryStore::new(ds);
        if let Some(colls) = fixtures.get(ds) { store.seed_all(colls.clone()); }
        builder = builder.datasource(ds, Arc::new(store) as Arc<dyn DocumentStore>);
    }
    for name in &cache_names {
        builder = builder.cache_store(name, Arc::new(KvStore::new(name)) as Arc<dyn CacheStore>);
    }
    let engine = builder.build()?;

    if args.compile_only {
        let stages = engine.compile(&model, filter.as_ref())?;
        let out = match stages {
            Some(s) => Value::Array(s.iter().map(|st| st.to_json()).collect()),
            None => Value::Null,
        };
        return Ok(serde_json::to_string_pretty(&out)?);
    }

    let auth = if args.system {
        AuthContext::system()
    } else {
        match args.subject {
            Some(s) => AuthContext::bearer(Bearer::new(&s).with_roles(args.roles)),
            None => AuthContext::anonymous(),
        }
    };
    let rows = engine.repository(&model)?.find_many(filter.as_ref(), &auth)?;
    let out = Value::Array(rows.iter().map(|i| Value::Object(i.to_json())).collect());
    Ok(serde_json::to_string_pretty(&out)?)
}

fn load_registry(path: &Path, default_ds: &str) -> anyhow::Result<SchemaRegistry> {
    if path.is_dir() {
        return Ok(SchemaRegistry::load_dir(path, default_ds)?);
    }
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(SchemaRegistry::from_json(&text, default_ds)?)
}

/// `{ "<datasource>": { "<collection>": [ {..}, .. ] } }`
fn load_fixtures(path: &Path) -> anyhow::Result<HashMap<String, HashMap<String, Vec<Document>>>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let parsed: HashMap<String, HashMap<String, Vec<Document>>> =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(parsed)
}
