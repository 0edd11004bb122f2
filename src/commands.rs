use anyhow::Context;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::config::Config;
use crate::content::FsContentSource;
use crate::embeddings::chunking::ChunkMetadata;
use crate::service::{ContentType, QueryOptions, QueryResult, RagService};
use crate::synthesis::{self, SynthesisReport};
use crate::{RagError, Result};

const RULE_WIDTH: usize = 80;

/// Search the index and print ranked results
#[inline]
pub async fn run_query(
    config: Config,
    text: &str,
    top_k: usize,
    content_type: ContentType,
    json: bool,
) -> Result<()> {
    let service = RagService::new(config);
    let options = QueryOptions {
        top_k,
        content_type,
        filter: None,
    };

    if !json {
        println!("🔍 Searching for: \"{}\"\n", text);
    }

    let started = std::time::Instant::now();
    let results = service.query(text, &options).await?;
    let elapsed = started.elapsed();

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    for (rank, result) in results.iter().enumerate() {
        print_result(rank + 1, result);
    }
    println!(
        "\nFound {} results in {}ms",
        results.len(),
        elapsed.as_millis()
    );

    Ok(())
}

fn print_result(rank: usize, result: &QueryResult) {
    let rule = "=".repeat(RULE_WIDTH);
    let thin_rule = "-".repeat(RULE_WIDTH);

    println!("\n{}", rule);
    println!(
        "Result #{} - Similarity: {}",
        rank,
        style(format!("{:.1}%", result.score * 100.0)).cyan()
    );
    println!("{}", rule);

    match &result.metadata {
        ChunkMetadata::Post(post) => {
            println!("\n📝 {}", style("Blog Post").bold());
            println!("Title: {}", post.title);
            if let Some(url) = &result.url {
                println!("URL: {}", style(url).underlined());
            }
            if let Some(tags) = post.tags.as_ref().filter(|t| !t.is_empty()) {
                println!("Tags: {}", tags.join(", "));
            }
            if let Some(series) = &post.series {
                println!("Series: {}", series);
            }
            println!("Post Type: {}", post.post_type.as_str());
            println!("\nContent Preview:\n{}", thin_rule);
        }
        ChunkMetadata::Quote(quote) => {
            println!("\n💬 {}", style("Book Quote").bold());
            println!("Book: {}", quote.book_title);
            println!("Author: {}", quote.book_author);
            if let Some(tags) = quote.tags.as_ref().filter(|t| !t.is_empty()) {
                println!("Tags: {}", tags.join(", "));
            }
            println!("\nQuote:\n{}", thin_rule);
        }
    }

    println!("{}", result.content);
    println!("{}", thin_rule);
}

/// Re-embed the whole content tree.
///
/// With `force`, an index built by a different embedding model is discarded
/// instead of aborting the rebuild.
#[inline]
pub async fn run_rebuild(config: Config, force: bool) -> Result<()> {
    println!("{}", style("🔄 RAG Index Rebuild").bold().cyan());
    if !force {
        eprintln!(
            "{} This rebuilds the entire index from scratch; all embeddings are regenerated.",
            style("⚠️  Warning:").yellow()
        );
        eprintln!("   Use --force to skip this warning and replace an incompatible index.\n");
    }

    let source = FsContentSource::from_config(&config.content);
    let service = RagService::new(config.clone());

    let service = match service.initialize().await {
        Ok(()) => service,
        Err(RagError::DimensionMismatch { .. }) if force => {
            warn!(
                "Discarding incompatible index at {}",
                config.data_dir.display()
            );
            discard_index(&config)?;
            let fresh = RagService::new(config);
            fresh.initialize().await?;
            fresh
        }
        Err(e) => return Err(e),
    };

    let bar = if console::user_attended_stderr() {
        ProgressBar::new(0).with_style(
            ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} posts ({elapsed})")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        )
    } else {
        ProgressBar::hidden()
    };

    let stats = service
        .rebuild_with_progress(&source, |done, total| {
            bar.set_length(total as u64);
            bar.set_position(done as u64);
        })
        .await;
    bar.finish_and_clear();
    let stats = stats?;

    println!("\n✅ Index rebuilt successfully!\n");
    println!("{}", style("📊 Statistics:").bold());
    println!("   Posts processed: {}", stats.posts_processed);
    println!("   Paragraphs indexed: {}", stats.paragraphs_indexed);
    println!("   Quotes indexed: {}", stats.quotes_indexed);
    println!("   Time taken: {:.1}s", stats.time_ms as f64 / 1000.0);

    Ok(())
}

fn discard_index(config: &Config) -> Result<()> {
    for path in [config.posts_table_path(), config.quotes_table_path()] {
        if path.exists() {
            fs::remove_dir_all(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
    }
    let metadata_path = config.metadata_path();
    if metadata_path.exists() {
        fs::remove_file(&metadata_path)
            .with_context(|| format!("Failed to remove {}", metadata_path.display()))?;
    }
    Ok(())
}

/// Print index metadata and on-disk size
#[inline]
pub async fn show_stats(config: Config) -> Result<()> {
    println!("{}", style("📊 RAG Index Statistics").bold().cyan());
    println!();

    let posts_path = config.posts_table_path();
    let quotes_path = config.quotes_table_path();
    let service = RagService::new(config);

    let Some(stats) = service.get_stats().await? else {
        println!("⚠️  No index found. Run `blog-rag rebuild` to create one.");
        return Ok(());
    };

    println!("{}", style("Embedding Configuration:").bold().yellow());
    println!("  Model: {}", style(&stats.embedding_model).cyan());
    println!("  Provider: {}", style(&stats.provider).cyan());
    println!("  Dimensions: {}", stats.embedding_dim);
    println!("  Version: {}", stats.version);
    println!();

    println!("{}", style("Content Statistics:").bold().yellow());
    println!("  Posts: {}", stats.stats.total_posts);
    println!("  Paragraphs: {}", stats.stats.total_paragraphs);
    println!("  Quotes: {}", stats.stats.total_quotes);
    println!();

    println!(
        "Last Updated: {}",
        stats.last_updated.format("%Y-%m-%d %H:%M:%S UTC")
    );

    let posts_size = dir_size(&posts_path);
    let quotes_size = dir_size(&quotes_path);
    if posts_size > 0 || quotes_size > 0 {
        println!();
        println!("{}", style("Storage:").bold().yellow());
        println!("  Posts table: {}", format_bytes(posts_size));
        println!("  Quotes table: {}", format_bytes(quotes_size));
        println!("  Total: {}", format_bytes(posts_size + quotes_size));
    }

    Ok(())
}

/// Total size of regular files under `path`, 0 when it cannot be read
#[inline]
pub fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(path) else {
        return 0;
    };

    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| match entry.file_type() {
            Ok(file_type) if file_type.is_dir() => dir_size(&entry.path()),
            Ok(file_type) if file_type.is_file() => entry.metadata().map(|m| m.len()).unwrap_or(0),
            _ => 0,
        })
        .sum()
}

/// Human readable byte count, one decimal, trailing `.0` dropped
#[inline]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = format!("{:.1}", value);
    let trimmed = rounded.strip_suffix(".0").unwrap_or(&rounded);
    format!("{} {}", trimmed, UNITS[unit])
}

/// Report synthesis opportunities across the content tree
#[inline]
pub async fn run_synthesis(config: Config, json: bool) -> Result<()> {
    let source = FsContentSource::from_config(&config.content);
    let service = RagService::new(config);

    let report = synthesis::analyze(&service, &source).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_synthesis(&report);
    }
    Ok(())
}

fn print_synthesis(report: &SynthesisReport) {
    println!("{}", style("🧩 Synthesis Opportunities").bold().cyan());

    println!(
        "\n{} ({})",
        style("Fleeting thoughts ready to expand").bold().yellow(),
        report.counts.fleeting_thoughts
    );
    for thought in &report.fleeting_thoughts {
        println!(
            "  • {} ({}) - {} related",
            thought.title, thought.slug, thought.related_count
        );
        for related in &thought.related_posts {
            println!(
                "      {} {:.1}%",
                related.title,
                related.score * 100.0
            );
        }
    }

    println!(
        "\n{} ({})",
        style("Orphaned content").bold().yellow(),
        report.counts.orphaned_content
    );
    for orphan in &report.orphaned_content {
        println!(
            "  • {} ({}, {}) - {} connections",
            orphan.title,
            orphan.slug,
            orphan.post_type.as_str(),
            orphan.connection_count
        );
    }

    println!(
        "\n{} ({})",
        style("Unreferenced quotes").bold().yellow(),
        report.counts.unreferenced_quotes
    );
    for quote in &report.unreferenced_quotes {
        println!(
            "  • {} by {} [{}#{}]",
            quote.book_title, quote.book_author, quote.quotes_ref, quote.quote_index
        );
        println!("      \"{}\"", quote.quote_text);
    }
}

/// Compact both tables
#[inline]
pub async fn run_optimize(config: Config) -> Result<()> {
    let service = RagService::new(config);
    info!("Optimizing index tables");
    service.optimize().await?;

    let counts = service.row_counts().await?;
    println!(
        "✅ Optimized index: {} post chunks, {} quotes",
        counts.posts, counts.quotes
    );
    Ok(())
}

/// Write the active configuration to `path`, leaving an existing file alone
#[inline]
pub fn write_config(config: &Config, path: &Path) -> Result<bool> {
    if path.exists() {
        println!(
            "{} {} already exists, not overwriting",
            style("⚠️").yellow(),
            path.display()
        );
        return Ok(false);
    }

    config.save(path)?;
    println!("✅ Wrote configuration to {}", path.display());
    Ok(true)
}
