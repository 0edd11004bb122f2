
use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::debug;

/// Paragraphs shorter than this (in characters) are not indexed
pub const MIN_PARAGRAPH_LENGTH: usize = 50;
/// Paragraphs longer than this are re-split at sentence boundaries
pub const MAX_PARAGRAPH_LENGTH: usize = 2000;

const POST_PREFIX: &str = "post";
const QUOTE_PREFIX: &str = "quote";

/// A line break followed by one or more blank lines
static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n(?:[ \t\r]*\n)+").expect("valid regex"));

/// A run of `.`, `!` or `?` followed by whitespace or the end of the text
static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+(?:\s+|$)").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PostType {
    Standard,
    Fleeting,
    BookNote,
}

impl PostType {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Fleeting => "fleeting",
            Self::BookNote => "bookNote",
        }
    }
}

/// Document-level metadata supplied by the caller for a post
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostMetadata {
    pub slug: String,
    pub title: String,
    pub post_type: PostType,
    pub tags: Option<Vec<String>>,
    pub series: Option<String>,
    pub pub_date: Option<String>,
}

/// Metadata attached to every paragraph chunk of a post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostChunkMetadata {
    pub slug: String,
    pub title: String,
    pub post_type: PostType,
    pub paragraph_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pub_date: Option<String>,
}

/// Metadata attached to every book quote chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteChunkMetadata {
    pub quotes_ref: String,
    pub book_title: String,
    pub book_author: String,
    pub quote_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_source: Option<String>,
}

/// Chunk metadata as stored alongside the vector. Serialized without a tag;
/// the two shapes are told apart by their required fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChunkMetadata {
    Post(PostChunkMetadata),
    Quote(QuoteChunkMetadata),
}

impl ChunkMetadata {
    #[inline]
    pub fn as_post(&self) -> Option<&PostChunkMetadata> {
        match self {
            Self::Post(post) => Some(post),
            Self::Quote(_) => None,
        }
    }

    #[inline]
    pub fn as_quote(&self) -> Option<&QuoteChunkMetadata> {
        match self {
            Self::Quote(quote) => Some(quote),
            Self::Post(_) => None,
        }
    }

    #[inline]
    pub fn tags(&self) -> Option<&[String]> {
        match self {
            Self::Post(post) => post.tags.as_deref(),
            Self::Quote(quote) => quote.tags.as_deref(),
        }
    }
}

/// An indexable unit of content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// A single quote as written in a book quotes file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteInput {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_source: Option<String>,
}

impl QuoteInput {
    #[inline]
    pub fn new<S: Into<String>>(text: S) -> Self {
        Self {
            text: text.into(),
            tags: None,
            quote_author: None,
            quote_source: None,
        }
    }
}

/// Book-level fields shared by every quote of a collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookMetadata {
    pub quotes_ref: String,
    pub book_title: String,
    pub book_author: String,
}

/// Id prefix shared by every chunk of a post, `post:<slug>:`
#[inline]
pub fn post_id_prefix(slug: &str) -> String {
    format!("{}:{}:", POST_PREFIX, slug)
}

/// Id prefix shared by every chunk of a quote collection, `quote:<quotes_ref>:`
#[inline]
pub fn quote_id_prefix(quotes_ref: &str) -> String {
    format!("{}:{}:", QUOTE_PREFIX, quotes_ref)
}

/// Chunk a post body into paragraphs.
///
/// Paragraphs are separated by one or more blank lines, trimmed, and dropped
/// when shorter than [`MIN_PARAGRAPH_LENGTH`]. Paragraphs longer than
/// [`MAX_PARAGRAPH_LENGTH`] are regrouped at sentence boundaries. Paragraph
/// indices run across the whole document.
#[inline]
pub fn chunk_post_content(content: &str, metadata: &PostMetadata) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut paragraph_index = 0;
    let prefix = post_id_prefix(&metadata.slug);

    for paragraph in split_paragraphs(content) {
        if char_len(paragraph) < MIN_PARAGRAPH_LENGTH {
            continue;
        }

        for piece in split_long_paragraph(paragraph, MAX_PARAGRAPH_LENGTH) {
            chunks.push(Chunk {
                id: format!("{}{}", prefix, paragraph_index),
                content: piece,
                metadata: ChunkMetadata::Post(PostChunkMetadata {
                    slug: metadata.slug.clone(),
                    title: metadata.title.clone(),
                    post_type: metadata.post_type,
                    paragraph_index,
                    tags: metadata.tags.clone(),
                    series: metadata.series.clone(),
                    pub_date: metadata.pub_date.clone(),
                }),
            });
            paragraph_index += 1;
        }
    }

    debug!(
        "Chunked post '{}' into {} paragraphs",
        metadata.slug,
        chunks.len()
    );

    chunks
}

/// One chunk per quote, in input order. Quotes are never length-filtered.
#[inline]
pub fn chunk_book_quotes(quotes: &[QuoteInput], book: &BookMetadata) -> Vec<Chunk> {
    let prefix = quote_id_prefix(&book.quotes_ref);

    quotes
        .iter()
        .enumerate()
        .map(|(index, quote)| Chunk {
            id: format!("{}{}", prefix, index),
            content: quote.text.clone(),
            metadata: ChunkMetadata::Quote(QuoteChunkMetadata {
                quotes_ref: book.quotes_ref.clone(),
                book_title: book.book_title.clone(),
                book_author: book.book_author.clone(),
                quote_index: index,
                tags: quote.tags.clone(),
                quote_author: quote.quote_author.clone(),
                quote_source: quote.quote_source.clone(),
            }),
        })
        .collect()
}

/// True when the chunk has an id and at least [`MIN_PARAGRAPH_LENGTH`] characters of content
#[inline]
pub fn validate_chunk(chunk: &Chunk) -> bool {
    !chunk.id.is_empty()
        && !chunk.content.is_empty()
        && char_len(&chunk.content) >= MIN_PARAGRAPH_LENGTH
}

#[inline]
pub(crate) fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Split on blank lines (whitespace-only lines count as blank), trimming each paragraph
fn split_paragraphs(content: &str) -> Vec<&str> {
    let mut paragraphs = Vec::new();
    let mut start = 0;

    for separator in PARAGRAPH_BREAK.find_iter(content).flatten() {
        paragraphs.push(content[start..separator.start()].trim());
        start = separator.end();
    }
    paragraphs.push(content[start..].trim());

    paragraphs.retain(|p| !p.is_empty());
    paragraphs
}

/// Split text into sentences, each keeping its terminators. Text after the
/// last terminator is kept as a trailing sentence.
fn split_into_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for boundary in SENTENCE_END.find_iter(text).flatten() {
        let sentence = text[start..boundary.end()].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        start = boundary.end();
    }

    let remaining = text[start..].trim();
    if !remaining.is_empty() {
        sentences.push(remaining);
    }

    sentences
}

/// Greedily pack sentences into pieces of at most `max_length` characters.
/// A sentence that alone exceeds the limit becomes its own piece.
fn split_long_paragraph(paragraph: &str, max_length: usize) -> Vec<String> {
    if char_len(paragraph) <= max_length {
        return vec![paragraph.to_string()];
    }

    let mut groups: Vec<Vec<&str>> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0;

    for sentence in split_into_sentences(paragraph) {
        let sentence_len = char_len(sentence);

        if sentence_len > max_length {
            if !current.is_empty() {
                groups.push(std::mem::take(&mut current));
                current_len = 0;
            }
            groups.push(vec![sentence]);
            continue;
        }

        let joined_len = if current.is_empty() {
            sentence_len
        } else {
            current_len + 1 + sentence_len
        };

        if joined_len > max_length && !current.is_empty() {
            groups.push(std::mem::take(&mut current));
            current_len = sentence_len;
        } else {
            current_len = joined_len;
        }
        current.push(sentence);
    }

    if !current.is_empty() {
        groups.push(current);
    }

    rebalance_short_groups(&mut groups, max_length);
    groups.into_iter().map(|group| group.join(" ")).collect()
}

fn group_len(group: &[&str]) -> usize {
    group.iter().map(|s| char_len(s)).sum::<usize>() + group.len().saturating_sub(1)
}

/// Bring every sentence group up to [`MIN_PARAGRAPH_LENGTH`]. A short group
/// first takes whole sentences from the end of its predecessor, then merges
/// into whichever neighbour still fits within `max_length`. Only when neither
/// fits (a neighbour is a single oversized sentence) does a merge exceed it.
fn rebalance_short_groups(groups: &mut Vec<Vec<&str>>, max_length: usize) {
    let mut i = 0;
    while i < groups.len() {
        if groups.len() == 1 || group_len(&groups[i]) >= MIN_PARAGRAPH_LENGTH {
            i += 1;
            continue;
        }

        if i > 0 {
            borrow_from_previous(groups, i, max_length);
            if group_len(&groups[i]) >= MIN_PARAGRAPH_LENGTH {
                i += 1;
                continue;
            }
        }

        let mut short = groups.remove(i);
        let short_len = group_len(&short);
        let fits_previous = i > 0 && group_len(&groups[i - 1]) + 1 + short_len <= max_length;
        let fits_next = i < groups.len() && group_len(&groups[i]) + 1 + short_len <= max_length;

        if fits_previous || (i > 0 && !fits_next) {
            groups[i - 1].append(&mut short);
        } else {
            short.append(&mut groups[i]);
            groups[i] = short;
        }
    }
}

/// Move trailing sentences of `groups[i - 1]` to the front of `groups[i]`
/// while the latter is short, keeping both within bounds
fn borrow_from_previous(groups: &mut [Vec<&str>], i: usize, max_length: usize) {
    let (before, after) = groups.split_at_mut(i);
    let (Some(previous), Some(short)) = (before.last_mut(), after.first_mut()) else {
        return;
    };

    while group_len(short) < MIN_PARAGRAPH_LENGTH && previous.len() > 1 {
        let Some(&sentence) = previous.last() else {
            break;
        };
        let sentence_len = char_len(sentence);
        let previous_left = group_len(previous) - sentence_len - 1;
        if previous_left < MIN_PARAGRAPH_LENGTH || group_len(short) + 1 + sentence_len > max_length {
            break;
        }
        previous.pop();
        short.insert(0, sentence);
    }
}
