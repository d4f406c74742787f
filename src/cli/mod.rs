//! Command-line front end
//!
//! A thin driver over the engine: it assembles the configuration from
//! environment and flags, dispatches to the factories, and maps errors to
//! stable exit codes. stdout carries program output only; everything
//! informational goes to stderr.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::{RagError, Result};
use crate::kb::{KnowledgeBaseManager, ResetOptions};
use crate::mode::{detect_mode, open_ingestion_pipeline, open_search_engine};
use crate::search::SearchOptions;
use crate::store::{ContentType, MetadataStore, RerankStrategy};
use crate::output::{self, OutputMode};
use crate::status_print;

/// Local-first semantic retrieval over your documents
#[derive(Parser, Debug)]
#[command(name = "raglite")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Data directory holding the store and the index
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Directory for downloaded model artifacts
    #[arg(long, global = true)]
    pub model_cache: Option<PathBuf>,

    /// Suppress informational output (only show results/errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, global = true, default_value = "info")]
    pub loglevel: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest a file or directory into the corpus
    Ingest {
        /// File or directory to ingest
        path: PathBuf,

        /// Chunk size in characters
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Chunk overlap in characters
        #[arg(long)]
        chunk_overlap: Option<usize>,

        /// Embedding batch size
        #[arg(long)]
        batch_size: Option<usize>,

        /// Embedding model (all-minilm-l6-v2, bge-small-en-v1.5,
        /// bge-base-en-v1.5, mxbai-embed-large-v1, clip-vit-b-32)
        #[arg(long)]
        model: Option<String>,

        /// Reset the knowledge base before ingesting (required when
        /// switching models)
        #[arg(long)]
        force_rebuild: bool,
    },

    /// Search the corpus with natural language
    Search {
        /// Search query
        query: String,

        /// Maximum number of results
        #[arg(short = 'k', long, default_value = "10")]
        top_k: usize,

        /// Apply the configured reranker
        #[arg(long)]
        rerank: bool,

        /// Restrict results to one content type (text, image, combined)
        #[arg(long)]
        content_type: Option<String>,

        /// Output JSON for tooling
        #[arg(long)]
        json: bool,

        /// Show relevance scores
        #[arg(long)]
        scores: bool,
    },

    /// Re-embed every stored chunk and rewrite the index
    Rebuild {
        /// Embedding model to rebuild with (defaults to the stored model)
        #[arg(long)]
        model: Option<String>,
    },

    /// Clear the store and the index without deleting files
    Reset {
        /// Keep the corpus mode and model configuration
        #[arg(long)]
        keep_config: bool,

        /// Reclaim store file space afterwards
        #[arg(long)]
        vacuum: bool,

        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Show corpus statistics
    Stats,
}

fn build_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = EngineConfig::from_env()?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(dir) = &cli.model_cache {
        config.model_cache_path = Some(dir.clone());
    }
    Ok(config)
}

pub async fn run(cancel_token: CancellationToken) -> Result<()> {
    let cli = Cli::parse();

    if cli.quiet {
        output::set_mode(OutputMode::Quiet);
    }

    let mut config = build_config(&cli)?;

    match cli.command {
        Commands::Ingest {
            path,
            chunk_size,
            chunk_overlap,
            batch_size,
            model,
            force_rebuild,
        } => {
            if let Some(value) = chunk_size {
                config.chunk_size = value;
            }
            if let Some(value) = chunk_overlap {
                config.chunk_overlap = value;
            }
            if let Some(value) = batch_size {
                config.batch_size = value;
            }
            if model.is_some() {
                config.embedding_model = model;
            }
            config.force_rebuild = config.force_rebuild || force_rebuild;
            config.validate()?;

            status_print!("{}", "📚 raglite ingest".bright_cyan().bold());
            status_print!("📂 Source: {}", path.display());
            status_print!("💾 Data directory: {}", config.data_dir.display());

            let mut pipeline = open_ingestion_pipeline(&config, cancel_token.clone()).await?;
            let result = pipeline.ingest_path(&path).await;
            pipeline.cleanup().await;
            let report = result?;

            status_print!(
                "✅ {} documents, {} chunks, {} embeddings in {}ms",
                report.documents_processed,
                report.chunks_created,
                report.embeddings_generated,
                report.processing_time_ms
            );
            if report.document_errors > 0 || report.embedding_errors > 0 {
                status_print!(
                    "⚠️  {} document errors, {} embedding errors (see the log)",
                    report.document_errors,
                    report.embedding_errors
                );
            }
            Ok(())
        }

        Commands::Search {
            query,
            top_k,
            rerank,
            content_type,
            json,
            scores,
        } => {
            if json {
                output::set_mode(OutputMode::Json);
            }
            let content_type = match content_type {
                Some(raw) => Some(ContentType::from_str(&raw).map_err(|_| {
                    RagError::invalid_argument(format!(
                        "unknown content type '{raw}': expected 'text', 'image' or 'combined'"
                    ))
                })?),
                None => None,
            };
            let options = SearchOptions {
                top_k,
                rerank,
                content_type,
            };

            let mut engine = open_search_engine(&config).await?;
            let result = engine.search(&query, &options).await;
            engine.cleanup().await;
            let hits = result?;

            if json {
                let rendered = serde_json::to_string_pretty(&hits)
                    .map_err(|e| RagError::search(format!("could not render results: {e}")))?;
                println!("{rendered}");
                return Ok(());
            }

            if hits.is_empty() {
                status_print!("No results.");
                return Ok(());
            }
            let mut stdout = std::io::stdout().lock();
            for (rank, hit) in hits.iter().enumerate() {
                let heading = format!(
                    "{}. {} ({})",
                    rank + 1,
                    hit.document.source,
                    hit.document.title
                );
                let written = if scores {
                    writeln!(
                        stdout,
                        "{} {}",
                        heading.bright_green(),
                        format!("[{:.3}]", hit.score).dimmed()
                    )
                } else {
                    writeln!(stdout, "{}", heading.bright_green())
                };
                written.map_err(|e| RagError::io("stdout", e.to_string()))?;
                let preview: String = hit.content.chars().take(200).collect();
                writeln!(stdout, "   {}", preview.replace('\n', " "))
                    .map_err(|e| RagError::io("stdout", e.to_string()))?;
            }
            Ok(())
        }

        Commands::Rebuild { model } => {
            if model.is_some() {
                config.embedding_model = model;
            }
            status_print!("{}", "🔨 Rebuilding the vector index...".bright_cyan());
            let mut pipeline = open_ingestion_pipeline(&config, cancel_token.clone()).await?;
            let result = pipeline.rebuild_index().await;
            pipeline.cleanup().await;
            let count = result?;
            status_print!("✅ Rebuilt index with {count} vectors");
            Ok(())
        }

        Commands::Reset {
            keep_config,
            vacuum,
            yes,
        } => {
            if !yes && !confirm("This clears all indexed data. Continue? [y/N] ")? {
                status_print!("Aborted.");
                return Ok(());
            }
            let kb = KnowledgeBaseManager::new(config);
            let outcome = kb
                .reset(ResetOptions {
                    preserve_system_info: keep_config,
                    run_vacuum: vacuum,
                })
                .await?;
            status_print!(
                "✅ Reset: {} documents, {} chunks, {} content rows, {} vectors cleared in {}ms",
                outcome.documents_deleted,
                outcome.chunks_deleted,
                outcome.content_deleted,
                outcome.vectors_cleared,
                outcome.total_time_ms
            );
            for warning in &outcome.warnings {
                status_print!("⚠️  {warning}");
            }
            Ok(())
        }

        Commands::Stats => {
            let store_path = config.store_path();
            if !store_path.exists() {
                status_print!("No corpus at {}. Run `raglite ingest` first.", config.data_dir.display());
                return Ok(());
            }
            let mode = detect_mode(&store_path);
            let store = MetadataStore::open(&store_path)?;
            status_print!("{}", "📊 Corpus statistics".bright_cyan().bold());
            status_print!("   Mode: {} ({})", mode.mode, mode.model_name);
            status_print!("   Dimensions: {}", mode.dimensions);
            status_print!(
                "   Reranking: {}",
                if mode.reranking_strategy == RerankStrategy::Disabled {
                    "disabled".to_string()
                } else {
                    mode.reranking_strategy.to_string()
                }
            );
            status_print!("   Documents: {}", store.count_documents()?);
            status_print!("   Chunks: {}", store.count_chunks()?);
            let index_path = config.index_path();
            if index_path.exists() {
                let size = std::fs::metadata(&index_path).map(|m| m.len()).unwrap_or(0);
                status_print!("   Index: {} ({} KiB)", index_path.display(), size / 1024);
            } else {
                status_print!("   Index: not yet saved");
            }
            Ok(())
        }
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt}");
    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .map_err(|e| RagError::io("stdin", e.to_string()))?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
