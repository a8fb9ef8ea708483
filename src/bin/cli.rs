//! Mnemosyne CLI
//!
//! Command-line front end over `mnemosyne::MemoryManager`: store/recall/
//! search/update/delete, maintenance passes (consolidate/forget/decay),
//! the graph layer (link/unlink/related/path/suggest/discover/reject),
//! and backup/restore. One database file backs everything; see
//! `mnemosyne::storage::connection` for why a single SQLite connection is
//! shared across the vector, relational, and cache layers.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use mnemosyne::vector::{PayloadFilter, PredicateOp};
use mnemosyne::{
    backup, Category, Direction, EngineConfig, MemoryId, MnemosyneError, RelationType, Result,
    SortBy, Storage, WorkingContext,
};

#[derive(Parser)]
#[command(name = "mnemosyne")]
#[command(about = "Persistent memory engine CLI")]
#[command(version)]
struct Cli {
    /// Database path
    #[arg(long, env = "MNEMOSYNE_DB_PATH")]
    db_path: Option<String>,

    /// Path to a JSON `EngineConfig` document; falls back to a dev-friendly
    /// default (hash embedder, 64 dimensions) when omitted.
    #[arg(long, env = "MNEMOSYNE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a new memory
    Store {
        /// Content to remember
        content: String,
        #[arg(short, long)]
        category: Option<String>,
        /// Tags, comma-separated
        #[arg(short, long)]
        tags: Option<String>,
        #[arg(short, long)]
        importance: Option<f32>,
        /// Metadata as a JSON object
        #[arg(short, long)]
        metadata: Option<String>,
    },
    /// Fetch one memory by id
    Get { id: Uuid },
    /// List memories, newest first, with no query
    List {
        #[arg(short, long)]
        category: Option<String>,
        #[arg(short, long, default_value = "date")]
        sort_by: String,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Semantic search
    Search {
        query: String,
        #[arg(short, long)]
        category: Option<String>,
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        min_score: Option<f32>,
        #[arg(long)]
        text_match: Option<String>,
    },
    /// Update a memory's content and/or payload
    Update {
        id: Uuid,
        #[arg(short, long)]
        content: Option<String>,
        #[arg(short, long)]
        tags: Option<String>,
        #[arg(short, long)]
        importance: Option<f32>,
        /// Metadata patch as a JSON object; `null` values delete the key
        #[arg(short, long)]
        metadata_patch: Option<String>,
    },
    /// Delete a memory (no-op if unknown)
    Delete { id: Uuid },
    /// Set ambient working-context fields merged into subsequent stores
    SetContext {
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        client: Option<String>,
        #[arg(long)]
        file: Option<String>,
    },
    /// Clear the working context
    ClearContext,
    /// Merge near-duplicate memories within a category
    Consolidate {
        category: String,
        #[arg(long)]
        similarity_threshold: Option<f32>,
        #[arg(long)]
        min_importance: Option<f32>,
        #[arg(long)]
        max_age_days: Option<i64>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete stale, low-importance, unlinked memories
    Forget {
        category: String,
        #[arg(long)]
        max_age_days: Option<i64>,
        #[arg(long)]
        min_importance: Option<f32>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Exponentially decay importance for idle memories
    Decay {
        category: String,
        half_life_days: f64,
        #[arg(long)]
        dry_run: bool,
    },
    /// Create a typed edge
    Link {
        source: Uuid,
        target: Uuid,
        relation_type: String,
        #[arg(long)]
        weight: Option<f32>,
    },
    /// Remove edges between two memories
    Unlink {
        source: Uuid,
        target: Uuid,
        #[arg(long)]
        relation_type: Option<String>,
    },
    /// Traverse neighbors from a memory
    Related {
        id: Uuid,
        #[arg(short, long, default_value_t = 1)]
        depth: usize,
        #[arg(short = 'D', long, default_value = "both")]
        direction: String,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Shortest path between two memories
    Path {
        from: Uuid,
        to: Uuid,
        #[arg(long, default_value_t = 6)]
        max_depth: usize,
    },
    /// Suggest relation candidates for a memory
    Suggest {
        id: Uuid,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Batch-scan for suggestions, auto-accepting high-confidence ones
    Discover {
        #[arg(short, long)]
        category: Option<String>,
        #[arg(long)]
        min_confidence: Option<f32>,
    },
    /// Reject a suggested triple so it stops resurfacing
    Reject {
        source: Uuid,
        target: Uuid,
        relation_type: String,
    },
    /// Materialize a suggested triple as an edge
    AcceptSuggestion {
        source: Uuid,
        target: Uuid,
        relation_type: String,
    },
    /// Export memories, edges, and rejections to a JSON file
    Export {
        output: PathBuf,
        #[arg(short, long)]
        category: Option<String>,
        #[arg(long)]
        include_vectors: bool,
    },
    /// Import a previously exported JSON file
    Import {
        input: PathBuf,
        #[arg(long)]
        skip_existing: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_ansi(false))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let db_path = resolve_db_path(cli.db_path);

    let storage = Storage::open(&db_path, config.embedding.dimension)?;
    let manager = mnemosyne::MemoryManager::new(storage, config)?;
    manager.reconcile().await?;

    match cli.command {
        Commands::Store { content, category, tags, importance, metadata } => {
            let id = manager
                .store(content, parse_category(category)?, parse_tags(tags), importance, parse_metadata(metadata)?)
                .await?;
            println!("{id}");
        }

        Commands::Get { id } => {
            let filter = PayloadFilter::new().with("memory_id", PredicateOp::Equals(serde_json::Value::String(id.to_string())));
            let hits = manager.search(None, None, Some(filter), SortBy::Relevance, 1).await?;
            match hits.into_iter().next() {
                Some(hit) => println!("{}", serde_json::to_string_pretty(&hit.memory)?),
                None => return Err(MnemosyneError::NotFound(id)),
            }
        }

        Commands::List { category, sort_by, limit } => {
            let categories = parse_category(category)?.map(|c| vec![c]);
            let hits = manager.search(None, categories, None, parse_sort_by(&sort_by), limit).await?;
            for hit in hits {
                print_memory_line(&hit.memory, hit.score);
            }
        }

        Commands::Search { query, category, limit, min_score, text_match } => {
            let categories = parse_category(category)?.map(|c| vec![c]);
            let hits = manager
                .recall(&query, categories, Some(limit), min_score, text_match.as_deref(), None)
                .await?;
            for hit in hits {
                print_memory_line(&hit.memory, hit.score);
            }
        }

        Commands::Update { id, content, tags, importance, metadata_patch } => {
            manager.update(id, content, parse_tags(tags), importance, parse_metadata_patch(metadata_patch)?).await?;
            println!("Updated {id}");
        }

        Commands::Delete { id } => {
            manager.delete(id).await?;
            println!("Deleted {id}");
        }

        Commands::SetContext { project, client, file } => {
            manager.set_context(WorkingContext { project, client, file });
            println!("Context set");
        }

        Commands::ClearContext => {
            manager.clear_context();
            println!("Context cleared");
        }

        Commands::Consolidate { category, similarity_threshold, min_importance, max_age_days, dry_run } => {
            let report = manager
                .consolidate(parse_category_required(&category)?, similarity_threshold, min_importance, max_age_days, dry_run)
                .await?;
            print_report(&report);
        }

        Commands::Forget { category, max_age_days, min_importance, dry_run } => {
            let report = manager.forget(parse_category_required(&category)?, max_age_days, min_importance, dry_run).await?;
            print_report(&report);
        }

        Commands::Decay { category, half_life_days, dry_run } => {
            let report = manager.decay(parse_category_required(&category)?, half_life_days, dry_run).await?;
            print_report(&report);
        }

        Commands::Link { source, target, relation_type, weight } => {
            manager.link(source, target, parse_relation_type(&relation_type)?, weight).await?;
            println!("Linked {source} -> {target} ({relation_type})");
        }

        Commands::Unlink { source, target, relation_type } => {
            let relation_type = relation_type.as_deref().map(parse_relation_type).transpose()?;
            manager.unlink(source, target, relation_type).await?;
            println!("Unlinked {source} -> {target}");
        }

        Commands::Related { id, depth, direction, limit } => {
            let hits = manager.related(id, depth, None, parse_direction(&direction)?, limit).await?;
            for hit in hits {
                println!("[{}] depth={} {} - {}", hit.relation_type, hit.depth, hit.memory.id, truncate(&hit.memory.content, 60));
            }
        }

        Commands::Path { from, to, max_depth } => {
            let steps = manager.path(from, to, max_depth).await?;
            if steps.is_empty() {
                println!("no path within {max_depth} hops");
            }
            for step in steps {
                println!("-[{}]-> {}", step.relation_type, step.memory_id);
            }
        }

        Commands::Suggest { id, limit } => {
            for suggestion in manager.suggest(id, limit).await? {
                println!(
                    "{} -[{}]-> {} (confidence {:.2})",
                    suggestion.source_id, suggestion.relation_type, suggestion.target_id, suggestion.confidence
                );
            }
        }

        Commands::Discover { category, min_confidence } => {
            let categories = parse_category(category)?.map(|c| vec![c]);
            let report = manager.discover(categories, min_confidence).await?;
            println!("{} suggestions found, {} auto-accepted", report.suggestions.len(), report.auto_accepted);
            for suggestion in &report.suggestions {
                println!(
                    "  {} -[{}]-> {} (confidence {:.2})",
                    suggestion.source_id, suggestion.relation_type, suggestion.target_id, suggestion.confidence
                );
            }
        }

        Commands::Reject { source, target, relation_type } => {
            manager.reject(source, target, parse_relation_type(&relation_type)?).await?;
            println!("Rejected {source} -[{relation_type}]-> {target}");
        }

        Commands::AcceptSuggestion { source, target, relation_type } => {
            manager.accept_suggestion(source, target, parse_relation_type(&relation_type)?).await?;
            println!("Accepted {source} -[{relation_type}]-> {target}");
        }

        Commands::Export { output, category, include_vectors } => {
            let categories = parse_category(category)?.map(|c| vec![c]);
            let doc = backup::export(&manager, categories, include_vectors).await?;
            std::fs::write(&output, serde_json::to_string_pretty(&doc)?)?;
            println!(
                "Exported {} memories, {} edges, {} rejections to {}",
                doc.counts.memories,
                doc.counts.edges,
                doc.counts.rejections,
                output.display()
            );
        }

        Commands::Import { input, skip_existing } => {
            let raw = std::fs::read_to_string(&input)?;
            let doc: backup::BackupDocument = serde_json::from_str(&raw)?;
            let report = backup::import(&manager, &doc, skip_existing).await?;
            println!(
                "Imported {} memories ({} skipped), {} edges ({} skipped), {} rejections",
                report.memories_created, report.memories_skipped, report.edges_created, report.edges_skipped, report.rejections_restored
            );
            for error in &report.errors {
                eprintln!("  error: {error}");
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&raw)?)
        }
        None => Ok(EngineConfig::dev_default()),
    }
}

fn resolve_db_path(explicit: Option<String>) -> String {
    explicit.unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("mnemosyne")
            .join("memories.db")
            .to_string_lossy()
            .into_owned()
    })
}

fn parse_category(s: Option<String>) -> Result<Option<Category>> {
    s.map(|s| s.parse().map_err(MnemosyneError::InvalidInput)).transpose()
}

fn parse_category_required(s: &str) -> Result<Category> {
    s.parse().map_err(MnemosyneError::InvalidInput)
}

fn parse_relation_type(s: &str) -> Result<RelationType> {
    s.parse().map_err(MnemosyneError::InvalidInput)
}

fn parse_direction(s: &str) -> Result<Direction> {
    match s.to_lowercase().as_str() {
        "in" => Ok(Direction::In),
        "out" => Ok(Direction::Out),
        "both" => Ok(Direction::Both),
        other => Err(MnemosyneError::InvalidInput(format!("unknown direction: {other}"))),
    }
}

fn parse_sort_by(s: &str) -> SortBy {
    match s.to_lowercase().as_str() {
        "importance" => SortBy::Importance,
        "access_count" | "access-count" => SortBy::AccessCount,
        "relevance" => SortBy::Relevance,
        _ => SortBy::Date,
    }
}

fn parse_tags(s: Option<String>) -> Option<Vec<String>> {
    s.map(|s| s.split(',').map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect())
}

fn parse_metadata(s: Option<String>) -> Result<Option<HashMap<String, serde_json::Value>>> {
    s.map(|s| serde_json::from_str(&s)).transpose().map_err(MnemosyneError::from)
}

fn parse_metadata_patch(s: Option<String>) -> Result<Option<HashMap<String, Option<serde_json::Value>>>> {
    s.map(|s| serde_json::from_str(&s)).transpose().map_err(MnemosyneError::from)
}

fn print_memory_line(memory: &mnemosyne::Memory, score: f32) {
    println!(
        "{} [{}] (score {:.3}, importance {:.2}) {}",
        memory.id,
        memory.category,
        score,
        memory.importance,
        truncate(&memory.content, 80)
    );
}

fn print_report(report: &mnemosyne::ConsolidationReport) {
    println!(
        "{}: processed {}, merged {}, forgotten {}, updated {} ({}{:?})",
        report.operation,
        report.total_processed,
        report.merged_count,
        report.forgotten_count,
        report.updated_count,
        if report.is_preview { "dry run, " } else { "" },
        report.duration
    );
}

fn truncate(s: &str, max: usize) -> String {
    let first_line = s.lines().next().unwrap_or(s);
    if first_line.len() <= max {
        first_line.to_string()
    } else {
        format!("{}...", &first_line[..max.saturating_sub(3)])
    }
}
