use console::style;

use super::{Config, ProviderChoice};

/// Print the active configuration to stderr
#[inline]
pub fn show_config(config: &Config) {
    eprintln!("{}", style("🔍 RAG Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embeddings:").bold().yellow());
    eprintln!("  Provider: {}", style(config.provider).cyan());
    if config.provider != ProviderChoice::Local {
        match config.remote.ollama_url() {
            Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
            Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
        }
        eprintln!(
            "  Ollama Model: {} (dimensions auto-detected)",
            style(&config.remote.model).cyan()
        );
    }
    if config.provider != ProviderChoice::Remote {
        eprintln!(
            "  Local Model: {} ({}d)",
            style(&config.local.model).cyan(),
            style(config.local.dimensions).cyan()
        );
    }
    if config.provider == ProviderChoice::Auto && !config.detect_remote {
        eprintln!("  {}", style("Remote detection disabled").dim());
    }

    eprintln!();
    eprintln!("{}", style("Storage:").bold().yellow());
    eprintln!("  Data Dir: {}", style(config.data_dir.display()).cyan());

    eprintln!();
    eprintln!("{}", style("Content:").bold().yellow());
    eprintln!("  Posts: {}", style(config.content.blog_dir.display()).dim());
    eprintln!(
        "  Book Quotes: {}",
        style(config.content.quotes_dir.display()).dim()
    );
}
