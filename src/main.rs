//! kgscope CLI: ingest documents, build the derived indexes, and query.

use std::collections::HashSet;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use kgscope::cancel::CancellationToken;
use kgscope::community::label::dendrogram_edges;
use kgscope::config::ScopeConfig;
use kgscope::engine::Engine;

#[derive(Parser)]
#[command(name = "kgscope", version, about = "Provenance-aware graph retrieval")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true, default_value = "kgscope.toml")]
    config: PathBuf,

    /// Data directory (overrides the config file).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the effective configuration to the config path.
    Init,

    /// Chunk, extract and upload documents (.txt pages split on form feeds, .srt cues).
    Ingest {
        /// Documents to ingest.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Union every checkpoint graph into graph.json.
    Aggregate {
        /// Report chunk relations missing from the existing graph.json instead.
        #[arg(long)]
        check: bool,
    },

    /// Rebuild the triple → source index from checkpoints.
    Index,

    /// Replay every checkpoint into the graph store.
    Upload {
        /// Keep existing store contents instead of clearing first.
        #[arg(long)]
        keep: bool,
    },

    /// Build or query the community label tree.
    Labels {
        #[command(subcommand)]
        action: LabelAction,
    },

    /// Answer a question from the graph.
    Query {
        question: String,

        /// Also print the chunk texts behind the evidence.
        #[arg(long)]
        sources: bool,
    },

    /// Print a raw checkpoint record.
    Checkpoint {
        /// Checkpoint id (`chunk-<md5>.json` or the bare hash).
        id: String,
    },

    /// Chunk processing-time statistics.
    Stats,

    /// Show engine info.
    Info,
}

#[derive(Subcommand)]
enum LabelAction {
    /// Partition and label the graph, writing the label cache.
    Build {
        /// Rebuild even if a cache exists.
        #[arg(long)]
        refresh: bool,

        /// Only print how many model calls a build would make.
        #[arg(long)]
        estimate: bool,
    },
    /// Print the subtree rooted at a label or entity id.
    Find { label: String },
    /// Print the pruned path from the root to one or more entities.
    Path {
        #[arg(required = true)]
        entities: Vec<String>,

        /// Print parent → child label edges instead of the tree.
        #[arg(long)]
        edges: bool,
    },
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = ScopeConfig::resolve(Some(&cli.config))?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    let engine = Engine::open(config.clone())?;
    let cancel = CancellationToken::new();

    match cli.command {
        Commands::Init => {
            config.save(&cli.config)?;
            println!("Wrote {}", cli.config.display());
            println!("{}", engine.info()?);
        }

        Commands::Ingest { files } => {
            for file in &files {
                let stats = engine.ingest_file(file, &cancel)?;
                println!(
                    "{}: {} chunks ({} reused, {} failed), {} entities, {} relations",
                    file.display(),
                    stats.chunks,
                    stats.reused,
                    stats.failed,
                    stats.entities,
                    stats.relations
                );
            }
        }

        Commands::Aggregate { check: false } => {
            let graph = engine.aggregate()?;
            println!(
                "Aggregated {} entities, {} relations into {}",
                graph.entities.len(),
                graph.relations.len(),
                engine.paths().graph_file.display()
            );
        }

        Commands::Aggregate { check: true } => {
            let missing = engine.missing_from_aggregate()?;
            if missing.is_empty() {
                println!("All chunk relations are present in the aggregate.");
            } else {
                println!("{} relations missing from the aggregate:", missing.len());
                for triple in &missing {
                    println!("  {triple}");
                }
            }
        }

        Commands::Index => {
            let index = engine.build_index()?;
            println!(
                "Indexed {} triples into {}",
                index.len(),
                engine.paths().index_file.display()
            );
        }

        Commands::Upload { keep } => {
            let stats = engine.upload(!keep, &cancel)?;
            println!(
                "Uploaded {} entities, {} relations ({} changed)",
                stats.entities, stats.relations, stats.changed
            );
        }

        Commands::Labels { action } => match action {
            LabelAction::Build { estimate: true, .. } => {
                let est = engine.label_estimate(&cancel)?;
                println!(
                    "Labeling will make {} calls with about {} input words",
                    est.calls, est.tokens
                );
            }
            LabelAction::Build { refresh, .. } => match engine.build_labels(refresh, &cancel)? {
                Some(tree) => println!(
                    "Label tree: {} leaves, {} branches, root \"{}\"",
                    tree.leaf_ids().len(),
                    tree.branch_count(),
                    tree.label().unwrap_or_default()
                ),
                None => println!("The graph store is empty; nothing to label."),
            },
            LabelAction::Find { label } => match engine.find_label(&label)? {
                Some(node) => print_json(&node)?,
                None => miette::bail!("label not found: {label}"),
            },
            LabelAction::Path { entities, edges } => {
                let wanted: HashSet<String> = entities.into_iter().collect();
                let Some(tree) = engine.label_paths(&wanted)? else {
                    miette::bail!("none of the entities are in the label tree");
                };
                if edges {
                    for (parent, child) in dendrogram_edges(&tree) {
                        println!("{parent} -> {child}");
                    }
                } else {
                    print_json(&tree)?;
                }
            }
        },

        Commands::Query { question, sources } => {
            let response = engine.query(&question, &cancel)?;
            println!("{}\n", response.answer);
            for (statement, tags) in response.statements.iter().zip(&response.sources) {
                let cited: Vec<String> = tags.iter().map(ToString::to_string).collect();
                println!("  - {statement}  {}", cited.join("; "));
            }
            if sources {
                let texts = engine.pull_source_texts(&response.sources.concat())?;
                for text in texts {
                    println!("\n---\n{text}");
                }
            }
        }

        Commands::Checkpoint { id } => match engine.checkpoint(&id)? {
            Some(record) => print_json(&record)?,
            None => miette::bail!("checkpoint not found: {id}"),
        },

        Commands::Stats => {
            let stats = engine.stats()?;
            println!("chunks:  {} ({} failed)", stats.chunks, stats.failed);
            println!("mean:    {:.2}s", stats.mean_secs);
            println!("median:  {:.2}s", stats.median_secs);
        }

        Commands::Info => println!("{}", engine.info()?),
    }

    Ok(())
}
