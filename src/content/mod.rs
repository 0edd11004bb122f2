// Content sources feeding index rebuilds and synthesis

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use fancy_regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::config::ContentConfig;
use crate::embeddings::chunking::{PostMetadata, PostType, QuoteInput};
use crate::{RagError, Result};

/// Opening `---` line, YAML up to a line that is exactly `---`, then the body
static FRONT_MATTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\A---[ \t]*\r?\n(.*?)(?<=\n)---[ \t]*(?:\r?\n|\z)(.*)\z")
        .expect("valid regex")
});

/// A blog post as read from the content tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePost {
    pub slug: String,
    pub title: String,
    pub post_type: PostType,
    pub tags: Option<Vec<String>>,
    pub series: Option<String>,
    pub pub_date: Option<String>,
    pub body: String,
    pub book_title: Option<String>,
    pub book_author: Option<String>,
    pub quotes_ref: Option<String>,
    pub draft: bool,
}

impl SourcePost {
    /// Minimal standard post, mostly for tests and embedding callers
    #[inline]
    pub fn new<S: Into<String>, T: Into<String>, B: Into<String>>(slug: S, title: T, body: B) -> Self {
        Self {
            slug: slug.into(),
            title: title.into(),
            post_type: PostType::Standard,
            tags: None,
            series: None,
            pub_date: None,
            body: body.into(),
            book_title: None,
            book_author: None,
            quotes_ref: None,
            draft: false,
        }
    }

    #[inline]
    pub fn post_metadata(&self) -> PostMetadata {
        PostMetadata {
            slug: self.slug.clone(),
            title: self.title.clone(),
            post_type: self.post_type,
            tags: self.tags.clone(),
            series: self.series.clone(),
            pub_date: self.pub_date.clone(),
        }
    }
}

/// A book's quote collection, one YAML file per book
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookQuotes {
    #[serde(skip)]
    pub quotes_ref: String,
    pub book_title: String,
    pub book_author: String,
    #[serde(default)]
    pub quotes: Vec<QuoteInput>,
}

/// Where rebuilds and synthesis read the full set of documents from
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn load_posts(&self) -> Result<Vec<SourcePost>>;

    /// `None` when the collection does not exist or lacks its book fields
    async fn load_book_quotes(&self, quotes_ref: &str) -> Result<Option<BookQuotes>>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FrontMatter {
    title: Option<String>,
    post_type: Option<PostType>,
    tags: Option<Vec<String>>,
    series: Option<String>,
    pub_date: Option<serde_yaml::Value>,
    book_title: Option<String>,
    book_author: Option<String>,
    quotes_ref: Option<String>,
    #[serde(default)]
    draft: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBookQuotes {
    book_title: Option<String>,
    book_author: Option<String>,
    #[serde(default)]
    quotes: Vec<QuoteInput>,
}

/// Markdown posts with YAML front matter plus per-book quote YAML files
#[derive(Debug, Clone)]
pub struct FsContentSource {
    blog_dir: PathBuf,
    quotes_dir: PathBuf,
}

impl FsContentSource {
    #[inline]
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(blog_dir: P, quotes_dir: Q) -> Self {
        Self {
            blog_dir: blog_dir.into(),
            quotes_dir: quotes_dir.into(),
        }
    }

    #[inline]
    pub fn from_config(config: &ContentConfig) -> Self {
        Self::new(&config.blog_dir, &config.quotes_dir)
    }

    async fn quotes_file(&self, quotes_ref: &str) -> Option<PathBuf> {
        for extension in ["yaml", "yml"] {
            let path = self.quotes_dir.join(format!("{}.{}", quotes_ref, extension));
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Some(path);
            }
        }
        None
    }
}

#[async_trait]
impl ContentSource for FsContentSource {
    #[inline]
    async fn load_posts(&self) -> Result<Vec<SourcePost>> {
        let mut entries = tokio::fs::read_dir(&self.blog_dir).await.map_err(|e| {
            RagError::Content(format!(
                "Failed to read blog directory {}: {}",
                self.blog_dir.display(),
                e
            ))
        })?;

        let mut posts = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(slug) = markdown_slug(&path) else {
                continue;
            };

            let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
                RagError::Content(format!("Failed to read {}: {}", path.display(), e))
            })?;

            match parse_post(&slug, &raw) {
                Ok(post) => posts.push(post),
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }

        posts.sort_by(|a, b| a.slug.cmp(&b.slug));
        debug!(
            "Loaded {} posts from {}",
            posts.len(),
            self.blog_dir.display()
        );
        Ok(posts)
    }

    #[inline]
    async fn load_book_quotes(&self, quotes_ref: &str) -> Result<Option<BookQuotes>> {
        validate_quotes_ref(quotes_ref)?;

        let Some(path) = self.quotes_file(quotes_ref).await else {
            warn!("No book quotes file for {}", quotes_ref);
            return Ok(None);
        };

        let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
            RagError::Content(format!("Failed to read {}: {}", path.display(), e))
        })?;
        parse_book_quotes(quotes_ref, &raw)
    }
}

/// Fixed posts and quote collections held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryContentSource {
    posts: Vec<SourcePost>,
    quotes: HashMap<String, BookQuotes>,
}

impl InMemoryContentSource {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn with_post(mut self, post: SourcePost) -> Self {
        self.posts.push(post);
        self
    }

    #[inline]
    pub fn with_quotes(mut self, quotes: BookQuotes) -> Self {
        self.quotes.insert(quotes.quotes_ref.clone(), quotes);
        self
    }
}

#[async_trait]
impl ContentSource for InMemoryContentSource {
    #[inline]
    async fn load_posts(&self) -> Result<Vec<SourcePost>> {
        Ok(self.posts.clone())
    }

    #[inline]
    async fn load_book_quotes(&self, quotes_ref: &str) -> Result<Option<BookQuotes>> {
        Ok(self.quotes.get(quotes_ref).cloned())
    }
}

fn markdown_slug(path: &Path) -> Option<String> {
    let extension = path.extension()?.to_str()?;
    if extension != "md" && extension != "mdx" {
        return None;
    }
    path.file_stem()?.to_str().map(str::to_string)
}

/// Split `---` fenced YAML front matter from the body. Files without a
/// front matter block are all body.
fn split_front_matter(raw: &str) -> (Option<&str>, &str) {
    let content = raw.strip_prefix('\u{feff}').unwrap_or(raw);

    match FRONT_MATTER.captures(content) {
        Ok(Some(captures)) => {
            let yaml = captures.get(1).map_or("", |m| m.as_str());
            let body = captures.get(2).map_or("", |m| m.as_str());
            (Some(yaml), body)
        }
        Ok(None) => (None, content),
        Err(e) => {
            warn!("Front matter scan failed, treating file as body: {}", e);
            (None, content)
        }
    }
}

fn parse_post(slug: &str, raw: &str) -> Result<SourcePost> {
    let (yaml, body) = split_front_matter(raw);

    let front_matter: FrontMatter = match yaml {
        Some(yaml) if !yaml.trim().is_empty() => serde_yaml::from_str(yaml)
            .map_err(|e| RagError::Content(format!("Invalid front matter: {}", e)))?,
        _ => FrontMatter::default(),
    };

    Ok(SourcePost {
        slug: slug.to_string(),
        title: front_matter.title.unwrap_or_else(|| slug.to_string()),
        post_type: front_matter.post_type.unwrap_or(PostType::Standard),
        tags: front_matter.tags,
        series: front_matter.series,
        pub_date: front_matter.pub_date.as_ref().and_then(normalize_pub_date),
        body: body.to_string(),
        book_title: front_matter.book_title,
        book_author: front_matter.book_author,
        quotes_ref: front_matter.quotes_ref,
        draft: front_matter.draft,
    })
}

/// Dates are stored as RFC 3339 UTC timestamps; a bare `YYYY-MM-DD` means midnight UTC
fn normalize_pub_date(value: &serde_yaml::Value) -> Option<String> {
    let raw = match value {
        serde_yaml::Value::String(s) => s.trim().to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        _ => return None,
    };

    if let Ok(date_time) = DateTime::parse_from_rfc3339(&raw) {
        return Some(
            date_time
                .with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        );
    }
    if let Some(midnight) = NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Some(
            midnight
                .and_utc()
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        );
    }
    Some(raw)
}

fn parse_book_quotes(quotes_ref: &str, raw: &str) -> Result<Option<BookQuotes>> {
    let parsed: RawBookQuotes = serde_yaml::from_str(raw).map_err(|e| {
        RagError::Content(format!("Invalid book quotes file {}: {}", quotes_ref, e))
    })?;

    match (parsed.book_title, parsed.book_author) {
        (Some(book_title), Some(book_author))
            if !book_title.trim().is_empty() && !book_author.trim().is_empty() =>
        {
            Ok(Some(BookQuotes {
                quotes_ref: quotes_ref.to_string(),
                book_title,
                book_author,
                quotes: parsed.quotes,
            }))
        }
        _ => {
            warn!("Invalid book quotes file: {}", quotes_ref);
            Ok(None)
        }
    }
}

fn validate_quotes_ref(quotes_ref: &str) -> Result<()> {
    if quotes_ref.is_empty()
        || quotes_ref.contains(['/', '\\'])
        || quotes_ref.starts_with('.')
    {
        return Err(RagError::Content(format!(
            "Invalid quotes reference: '{}'",
            quotes_ref
        )));
    }
    Ok(())
}
