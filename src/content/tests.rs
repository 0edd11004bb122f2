use super::*;
use std::fs;
use tempfile::TempDir;

const BOOK_NOTE: &str = "---
title: Notes on Atomic Habits
postType: bookNote
tags:
  - habits
  - books
pubDate: 2025-01-15
bookTitle: Atomic Habits
bookAuthor: James Clear
quotesRef: atomic-habits
---

The body of the book note starts here and runs long enough to be indexed.
";

const QUOTES_YAML: &str = "bookTitle: Atomic Habits
bookAuthor: James Clear
quotes:
  - text: You do not rise to the level of your goals.
    tags: [systems]
  - text: Every action is a vote for the type of person you wish to become.
    quoteSource: Chapter 2
";

fn content_dirs() -> (TempDir, FsContentSource) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let blog = temp_dir.path().join("blog");
    let quotes = temp_dir.path().join("bookQuotes");
    fs::create_dir_all(&blog).expect("should create blog dir");
    fs::create_dir_all(&quotes).expect("should create quotes dir");
    let source = FsContentSource::new(blog, quotes);
    (temp_dir, source)
}

#[test]
fn front_matter_split() {
    let (yaml, body) = split_front_matter("---\ntitle: Hi\n---\nBody text\n");
    assert_eq!(yaml, Some("title: Hi\n"));
    assert_eq!(body, "Body text\n");

    let (yaml, body) = split_front_matter("No front matter here.");
    assert_eq!(yaml, None);
    assert_eq!(body, "No front matter here.");

    let (yaml, body) = split_front_matter("---\ntitle: never closed\n");
    assert_eq!(yaml, None);
    assert_eq!(body, "---\ntitle: never closed\n");

    let (yaml, body) = split_front_matter("---\r\ntitle: Hi\r\n---\r\nBody");
    assert_eq!(yaml, Some("title: Hi\r\n"));
    assert_eq!(body, "Body");

    let (yaml, body) = split_front_matter("---\n---\nOnly body\n---\nstill body");
    assert_eq!(yaml, Some(""));
    assert_eq!(body, "Only body\n---\nstill body");

    let (yaml, body) = split_front_matter("---\ntitle: a---b\n---");
    assert_eq!(yaml, Some("title: a---b\n"));
    assert_eq!(body, "");
}

#[test]
fn parses_book_note_front_matter() {
    let post = parse_post("atomic-habits-notes", BOOK_NOTE).expect("should parse post");

    assert_eq!(post.slug, "atomic-habits-notes");
    assert_eq!(post.title, "Notes on Atomic Habits");
    assert_eq!(post.post_type, PostType::BookNote);
    assert_eq!(
        post.tags,
        Some(vec!["habits".to_string(), "books".to_string()])
    );
    assert_eq!(post.pub_date.as_deref(), Some("2025-01-15T00:00:00.000Z"));
    assert_eq!(post.book_title.as_deref(), Some("Atomic Habits"));
    assert_eq!(post.quotes_ref.as_deref(), Some("atomic-habits"));
    assert!(!post.draft);
    assert!(post.body.trim_start().starts_with("The body of the book note"));
}

#[test]
fn missing_front_matter_fields_use_defaults() {
    let post = parse_post("bare", "Just a body without any front matter at all.")
        .expect("should parse post");
    assert_eq!(post.title, "bare");
    assert_eq!(post.post_type, PostType::Standard);
    assert_eq!(post.tags, None);
    assert_eq!(post.pub_date, None);
}

#[test]
fn invalid_front_matter_is_an_error() {
    let result = parse_post("broken", "---\ntitle: [unclosed\n---\nBody");
    assert!(matches!(result, Err(RagError::Content(_))));
}

#[test]
fn pub_date_normalization() {
    let value = |s: &str| serde_yaml::Value::String(s.to_string());
    assert_eq!(
        normalize_pub_date(&value("2024-06-01T12:30:00+02:00")).as_deref(),
        Some("2024-06-01T10:30:00.000Z")
    );
    assert_eq!(
        normalize_pub_date(&value("June 2024")).as_deref(),
        Some("June 2024")
    );
    assert_eq!(normalize_pub_date(&serde_yaml::Value::Null), None);
}

#[test]
fn book_quotes_require_title_and_author() {
    let quotes = parse_book_quotes("atomic-habits", QUOTES_YAML)
        .expect("should parse quotes")
        .expect("quotes should be valid");
    assert_eq!(quotes.quotes_ref, "atomic-habits");
    assert_eq!(quotes.book_author, "James Clear");
    assert_eq!(quotes.quotes.len(), 2);
    assert_eq!(quotes.quotes[0].tags, Some(vec!["systems".to_string()]));
    assert_eq!(quotes.quotes[1].quote_source.as_deref(), Some("Chapter 2"));

    let missing_author = "bookTitle: Atomic Habits\nquotes: []\n";
    assert!(
        parse_book_quotes("x", missing_author)
            .expect("should parse")
            .is_none()
    );

    assert!(parse_book_quotes("x", "quotes: [[[").is_err());
}

#[test]
fn quotes_refs_cannot_escape_the_directory() {
    assert!(validate_quotes_ref("atomic-habits").is_ok());
    assert!(validate_quotes_ref("../secrets").is_err());
    assert!(validate_quotes_ref("nested/ref").is_err());
    assert!(validate_quotes_ref("").is_err());
}

#[test]
fn post_metadata_conversion() {
    let mut post = SourcePost::new("slug", "Title", "Body");
    post.series = Some("Series".to_string());
    let metadata = post.post_metadata();
    assert_eq!(metadata.slug, "slug");
    assert_eq!(metadata.series.as_deref(), Some("Series"));
    assert_eq!(metadata.tags, None);
}

#[tokio::test]
async fn loads_markdown_posts_from_directory() {
    let (temp_dir, source) = content_dirs();
    let blog = temp_dir.path().join("blog");
    fs::write(blog.join("b-post.md"), BOOK_NOTE).expect("write md");
    fs::write(
        blog.join("a-post.mdx"),
        "---\ntitle: MDX post\npostType: fleeting\n---\nBody",
    )
    .expect("write mdx");
    fs::write(blog.join("notes.txt"), "ignored").expect("write txt");
    fs::write(blog.join("broken.md"), "---\ntitle: [oops\n---\n").expect("write broken");

    let posts = source.load_posts().await.expect("should load posts");

    let slugs: Vec<&str> = posts.iter().map(|p| p.slug.as_str()).collect();
    assert_eq!(slugs, vec!["a-post", "b-post"]);
    assert_eq!(posts[0].post_type, PostType::Fleeting);
}

#[tokio::test]
async fn missing_blog_directory_is_an_error() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let source = FsContentSource::new(temp_dir.path().join("nope"), temp_dir.path());

    let result = source.load_posts().await;
    assert!(matches!(result, Err(RagError::Content(_))));
}

#[tokio::test]
async fn loads_book_quotes_by_reference() {
    let (temp_dir, source) = content_dirs();
    let quotes_dir = temp_dir.path().join("bookQuotes");
    fs::write(quotes_dir.join("atomic-habits.yaml"), QUOTES_YAML).expect("write yaml");
    fs::write(quotes_dir.join("deep-work.yml"), QUOTES_YAML).expect("write yml");

    let quotes = source
        .load_book_quotes("atomic-habits")
        .await
        .expect("should load")
        .expect("should exist");
    assert_eq!(quotes.quotes.len(), 2);

    let yml = source
        .load_book_quotes("deep-work")
        .await
        .expect("should load");
    assert_eq!(yml.map(|q| q.quotes_ref), Some("deep-work".to_string()));

    let missing = source
        .load_book_quotes("unknown-book")
        .await
        .expect("missing file is not an error");
    assert!(missing.is_none());
}

#[tokio::test]
async fn in_memory_source_returns_what_it_holds() {
    let source = InMemoryContentSource::new()
        .with_post(SourcePost::new("one", "One", "Body one"))
        .with_quotes(BookQuotes {
            quotes_ref: "book".to_string(),
            book_title: "Book".to_string(),
            book_author: "Author".to_string(),
            quotes: vec![QuoteInput::new("Hi.")],
        });

    assert_eq!(source.load_posts().await.expect("posts").len(), 1);
    assert!(
        source
            .load_book_quotes("book")
            .await
            .expect("quotes")
            .is_some()
    );
    assert!(
        source
            .load_book_quotes("other")
            .await
            .expect("quotes")
            .is_none()
    );
}
