use clap::{Parser, Subcommand};
use std::path::PathBuf;

use blog_rag::Result;
use blog_rag::commands::{
    run_optimize, run_query, run_rebuild, run_synthesis, show_stats, write_config,
};
use blog_rag::config::{Config, DEFAULT_CONFIG_FILE, show_config};
use blog_rag::service::{ContentType, DEFAULT_TOP_K};

#[derive(Parser)]
#[command(name = "blog-rag")]
#[command(about = "Semantic search and content analysis over a file-based blog")]
#[command(version)]
struct Cli {
    /// Settings file; missing means defaults plus environment overrides
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search indexed posts and quotes
    Query {
        /// Text to search for
        text: String,
        /// Number of results to return
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
        /// Content to search: posts, quotes or all
        #[arg(long = "type", default_value_t = ContentType::All)]
        content_type: ContentType,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rebuild the whole index from the content tree
    Rebuild {
        /// Skip the warning and replace an index built with another model
        #[arg(long)]
        force: bool,
    },
    /// Show index statistics and storage size
    Stats,
    /// Find fleeting thoughts, orphaned posts and unreferenced quotes
    Synthesis {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compact the index tables
    Optimize,
    /// Inspect configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
        /// Write the current configuration to the settings file
        #[arg(long, conflicts_with = "show")]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Query {
            text,
            top_k,
            content_type,
            json,
        } => {
            run_query(config, &text, top_k, content_type, json).await?;
        }
        Commands::Rebuild { force } => {
            run_rebuild(config, force).await?;
        }
        Commands::Stats => {
            show_stats(config).await?;
        }
        Commands::Synthesis { json } => {
            run_synthesis(config, json).await?;
        }
        Commands::Optimize => {
            run_optimize(config).await?;
        }
        Commands::Config { show, init } => {
            if show {
                show_config(&config);
            } else if init {
                write_config(&config, &cli.config)?;
            } else {
                eprintln!(
                    "Settings are read from {} and RAG_* / OLLAMA_* environment variables. Use --show to print them or --init to write them.",
                    cli.config.display()
                );
            }
        }
    }

    Ok(())
}
