// Content gap analysis over the indexed corpus


use serde::Serialize;
use tracing::{debug, info, warn};

use crate::Result;
use crate::content::{ContentSource, SourcePost};
use crate::embeddings::chunking::PostType;
use crate::service::{ContentType, QueryOptions, QueryResult, RagService};

pub const FLEETING_QUERY_TOP_K: usize = 10;
pub const FLEETING_RELATED_KEPT: usize = 5;
pub const FLEETING_MIN_RELATED: usize = 3;

pub const ORPHAN_QUERY_TOP_K: usize = 5;
pub const ORPHAN_MIN_SCORE: f32 = 0.5;
pub const ORPHAN_MIN_CONNECTIONS: usize = 2;

/// Characters of a quote that must appear verbatim in a post to count as a reference
pub const QUOTE_REFERENCE_PREFIX: usize = 50;

const FLEETING_REPORT_CAP: usize = 10;
const ORPHAN_REPORT_CAP: usize = 10;
const QUOTE_REPORT_CAP: usize = 20;

const UNKNOWN_BOOK_FIELD: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedPost {
    pub slug: String,
    pub title: String,
    pub score: f32,
}

/// A fleeting post with enough related material to grow into a full post
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetingThought {
    pub slug: String,
    pub title: String,
    pub related_count: usize,
    pub related_posts: Vec<RelatedPost>,
}

/// A post with fewer than [`ORPHAN_MIN_CONNECTIONS`] strong neighbours.
/// `connection_count` counts matching paragraphs, not distinct posts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanedContent {
    pub slug: String,
    pub title: String,
    pub post_type: PostType,
    pub connection_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreferencedQuote {
    pub quotes_ref: String,
    pub book_title: String,
    pub book_author: String,
    pub quote_text: String,
    pub quote_index: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisCounts {
    pub fleeting_thoughts: usize,
    pub orphaned_content: usize,
    pub unreferenced_quotes: usize,
}

/// Capped lists of synthesis opportunities with their uncapped counts
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisReport {
    pub fleeting_thoughts: Vec<FleetingThought>,
    pub orphaned_content: Vec<OrphanedContent>,
    pub unreferenced_quotes: Vec<UnreferencedQuote>,
    pub counts: SynthesisCounts,
}

/// Analyze every post of `source` against the index behind `service`
#[inline]
pub async fn analyze(
    service: &RagService,
    source: &dyn ContentSource,
) -> Result<SynthesisReport> {
    let posts = source.load_posts().await?;
    info!("Analyzing {} posts for synthesis opportunities", posts.len());

    let mut fleeting_thoughts = Vec::new();
    for post in posts.iter().filter(|p| p.post_type == PostType::Fleeting) {
        let related = related_posts(service, post, FLEETING_QUERY_TOP_K).await?;
        let related: Vec<RelatedPost> = related.into_iter().take(FLEETING_RELATED_KEPT).collect();
        if related.len() >= FLEETING_MIN_RELATED {
            fleeting_thoughts.push(FleetingThought {
                slug: post.slug.clone(),
                title: post.title.clone(),
                related_count: related.len(),
                related_posts: related,
            });
        }
    }

    let mut orphaned_content = Vec::new();
    for post in &posts {
        let connection_count = neighbour_chunks(service, post, ORPHAN_QUERY_TOP_K)
            .await?
            .iter()
            .filter(|r| r.score > ORPHAN_MIN_SCORE)
            .count();
        if connection_count < ORPHAN_MIN_CONNECTIONS {
            orphaned_content.push(OrphanedContent {
                slug: post.slug.clone(),
                title: post.title.clone(),
                post_type: post.post_type,
                connection_count,
            });
        }
    }

    let unreferenced_quotes = unreferenced_quotes(source, &posts).await;

    let counts = SynthesisCounts {
        fleeting_thoughts: fleeting_thoughts.len(),
        orphaned_content: orphaned_content.len(),
        unreferenced_quotes: unreferenced_quotes.len(),
    };
    debug!("Synthesis counts: {:?}", counts);

    Ok(SynthesisReport {
        fleeting_thoughts: capped(fleeting_thoughts, FLEETING_REPORT_CAP),
        orphaned_content: capped(orphaned_content, ORPHAN_REPORT_CAP),
        unreferenced_quotes: capped(unreferenced_quotes, QUOTE_REPORT_CAP),
        counts,
    })
}

/// Other posts near `post`, one entry per slug at its best score
async fn related_posts(
    service: &RagService,
    post: &SourcePost,
    top_k: usize,
) -> Result<Vec<RelatedPost>> {
    let results = neighbour_chunks(service, post, top_k).await?;
    Ok(dedupe_related(&post.slug, results))
}

/// Post chunks of other documents near `post`. Several paragraphs of one
/// neighbour each count as a hit.
async fn neighbour_chunks(
    service: &RagService,
    post: &SourcePost,
    top_k: usize,
) -> Result<Vec<QueryResult>> {
    if post.body.trim().is_empty() {
        return Ok(Vec::new());
    }

    let options = QueryOptions {
        top_k,
        content_type: ContentType::Posts,
        filter: None,
    };
    let mut results = service.query(&post.body, &options).await?;
    results.retain(|r| r.metadata.as_post().is_some_and(|m| m.slug != post.slug));
    Ok(results)
}

fn dedupe_related(own_slug: &str, results: Vec<QueryResult>) -> Vec<RelatedPost> {
    let mut related: Vec<RelatedPost> = Vec::new();
    for result in results {
        let Some(metadata) = result.metadata.as_post() else {
            continue;
        };
        if metadata.slug == own_slug || related.iter().any(|r| r.slug == metadata.slug) {
            continue;
        }
        related.push(RelatedPost {
            slug: metadata.slug.clone(),
            title: metadata.title.clone(),
            score: result.score,
        });
    }
    related
}

async fn unreferenced_quotes(
    source: &dyn ContentSource,
    posts: &[SourcePost],
) -> Vec<UnreferencedQuote> {
    let mut unreferenced = Vec::new();

    let book_notes = posts
        .iter()
        .filter(|p| p.post_type == PostType::BookNote)
        .filter_map(|p| p.quotes_ref.as_deref().map(|quotes_ref| (p, quotes_ref)));

    for (book_note, quotes_ref) in book_notes {
        let collection = match source.load_book_quotes(quotes_ref).await {
            Ok(Some(collection)) => collection,
            Ok(None) => continue,
            Err(e) => {
                warn!("Failed to process quotes for {}: {}", quotes_ref, e);
                continue;
            }
        };

        for (quote_index, quote) in collection.quotes.iter().enumerate() {
            let needle = char_prefix(&quote.text, QUOTE_REFERENCE_PREFIX);
            if posts.iter().any(|p| p.body.contains(needle)) {
                continue;
            }
            unreferenced.push(UnreferencedQuote {
                quotes_ref: quotes_ref.to_string(),
                book_title: book_note
                    .book_title
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_BOOK_FIELD.to_string()),
                book_author: book_note
                    .book_author
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_BOOK_FIELD.to_string()),
                quote_text: quote.text.clone(),
                quote_index,
            });
        }
    }

    unreferenced
}

fn char_prefix(text: &str, chars: usize) -> &str {
    match text.char_indices().nth(chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

fn capped<T>(mut items: Vec<T>, cap: usize) -> Vec<T> {
    items.truncate(cap);
    items
}
