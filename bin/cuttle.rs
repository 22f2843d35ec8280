use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cuttle::{Batch, Document, Index, IndexConfig, PerformanceProfile};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "cuttle")]
#[command(about = "Inspect and maintain a cuttle segment index", long_about = None)]
struct Args {
    /// Index directory
    #[arg(long, env = "CUTTLE_INDEX_DIR", default_value = "./index")]
    dir: PathBuf,

    /// Performance profile (low-latency, balanced, high-throughput, durable)
    #[arg(long, env = "CUTTLE_PROFILE", default_value = "balanced")]
    profile: String,

    /// Number of catalog epochs to keep for rollback
    #[arg(long, env = "CUTTLE_KEEP_SNAPSHOTS", default_value = "1")]
    keep: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print index statistics as JSON
    Stats,
    /// List the epochs the index can roll back to, newest first
    RollbackPoints,
    /// Roll the index back to a persisted epoch
    Rollback { epoch: u64 },
    /// Index a JSON-lines file; every object needs a string "id"
    Ingest {
        file: PathBuf,
        #[arg(long, default_value = "1000")]
        batch_size: usize,
    },
    /// Print documents containing a term
    Term {
        field: String,
        term: String,
        /// Stop after this many hits
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Print the term dictionary of a field
    Dict {
        field: String,
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long)]
        fuzzy: Option<String>,
        #[arg(long, default_value = "1")]
        distance: u8,
    },
    /// Merge segments until the merge policy has nothing left to do
    ForceMerge,
}

fn parse_profile(name: &str) -> PerformanceProfile {
    match name.to_lowercase().as_str() {
        "low-latency" | "low_latency" => PerformanceProfile::LowLatency,
        "balanced" => PerformanceProfile::Balanced,
        "high-throughput" | "high_throughput" => PerformanceProfile::HighThroughput,
        "durable" => PerformanceProfile::Durable,
        _ => {
            warn!("Unknown profile '{}', using 'balanced'", name);
            PerformanceProfile::Balanced
        }
    }
}

fn parse_line(line: &str) -> Result<Document> {
    let value: serde_json::Value = serde_json::from_str(line)?;
    let object = value.as_object().context("expected a JSON object")?;
    let id = object
        .get("id")
        .and_then(|v| v.as_str())
        .context("missing string \"id\"")?;
    let mut doc = Document::new(id);
    for (name, value) in object {
        if name == "id" {
            continue;
        }
        match value {
            serde_json::Value::String(s) => doc = doc.with_text(name, s.as_str()),
            serde_json::Value::Null => {}
            other => doc = doc.with_keyword(name, other.to_string()),
        }
    }
    Ok(doc)
}

fn ingest(index: &Index, file: &PathBuf, batch_size: usize) -> Result<()> {
    let reader = BufReader::new(File::open(file).with_context(|| format!("open {:?}", file))?);
    let mut batch = Batch::new();
    let mut total = 0usize;
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let doc = parse_line(&line).with_context(|| format!("line {}", n + 1))?;
        batch.update(doc);
        if batch.len() >= batch_size.max(1) {
            total += batch.len();
            index.batch(std::mem::take(&mut batch))?;
            info!(documents = total, "batch applied");
        }
    }
    if !batch.is_empty() {
        total += batch.len();
        index.batch(batch)?;
    }
    info!(documents = total, "ingest complete");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    info!("cuttle v{} opening {:?}", cuttle::VERSION, args.dir);

    let config = IndexConfig::new(&args.dir)
        .with_profile(parse_profile(&args.profile))
        .with_snapshots_to_keep(args.keep.max(1));
    let index = Index::open_default(config)?;

    match args.command {
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&index.stats_map())?);
        }
        Command::RollbackPoints => {
            for point in index.rollback_points()? {
                println!("{}\t{} internal keys", point.epoch(), point.internal().len());
            }
        }
        Command::Rollback { epoch } => {
            let points = index.rollback_points()?;
            let Some(point) = points.iter().find(|p| p.epoch() == epoch) else {
                bail!("no rollback point at epoch {}", epoch);
            };
            index.rollback(point)?;
            info!(epoch, "rolled back");
        }
        Command::Ingest { file, batch_size } => ingest(&index, &file, batch_size)?,
        Command::Term { field, term, limit } => {
            let reader = index.reader();
            let mut postings = reader.term_field_reader(&term, &field, true, false, false)?;
            println!("{} documents", postings.count());
            let mut shown = 0;
            while let Some(hit) = postings.next()? {
                if shown >= limit {
                    break;
                }
                let external = reader.external_id(hit.id)?.unwrap_or_default();
                println!("{}\tfreq={}", external, hit.freq);
                shown += 1;
            }
            postings.close()?;
        }
        Command::Dict {
            field,
            prefix,
            fuzzy,
            distance,
        } => {
            let reader = index.reader();
            let dict = match (prefix, fuzzy) {
                (Some(p), _) => reader.field_dict_prefix(&field, &p)?,
                (None, Some(t)) => reader.field_dict_fuzzy(&field, &t, distance)?,
                (None, None) => reader.field_dict(&field)?,
            };
            for entry in dict {
                println!("{}\t{}", entry.term, entry.count);
            }
        }
        Command::ForceMerge => {
            index.force_merge()?;
            let reader = index.reader();
            info!(
                segments = reader.segment_count(),
                docs = reader.doc_count(),
                "force merge complete"
            );
        }
    }

    index.close()?;
    Ok(())
}
