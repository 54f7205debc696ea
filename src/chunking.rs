//! Chunking policies that turn extracted documents into retrieval units.
//!
//! Markdown is split at headings first; sections that are still too long are
//! split again by length with markdown-aware separators. Every other text is
//! split by length only. Both the response index and the reject index use
//! these rules, and differ only in how markdown source text is prepared
//! (see [`ChunkPolicy`]).

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    extractor::FileType,
    splitter::{RecursiveSplitter, split_markdown_headers},
    text_util::normalize,
};

/// Target chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 768;

/// Overlap between adjacent chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 32;

/// Markdown sections at or above this length are split again by length.
pub const SECTION_SPLIT_THRESHOLD: usize = 1024;

/// Markdown pieces shorter than this are treated as noise and dropped.
pub const MIN_CHUNK_CHARS: usize = 10;

/// Metadata key holding the heading path of a markdown chunk.
pub const HEADER_KEY: &str = "header";

/// An extracted source file, produced once per file at ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    /// Absolute path of the originating file.
    pub source: PathBuf,
    pub file_type: FileType,
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    pub fn new(content: String, source: PathBuf, file_type: FileType) -> Self {
        Self {
            content,
            source,
            file_type,
            metadata: BTreeMap::new(),
        }
    }

    /// Base name of the source file, used as a prefix for its chunks.
    pub fn basename(&self) -> String {
        self.source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// A bounded unit of document text stored in a vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    /// Absolute path of the originating file.
    pub source: PathBuf,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Chunk {
    pub fn new(content: String, source: &Path) -> Self {
        Self {
            content,
            source: source.to_path_buf(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn header(&self) -> Option<&str> {
        self.metadata.get(HEADER_KEY).map(String::as_str)
    }
}

/// Which index a document is being chunked for.
///
/// The response index wants denoised prose, so markdown is normalized
/// before splitting. The reject index keeps raw markdown, code and tables
/// included, because lexical overlap with the corpus is its signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkPolicy {
    Response,
    Reject,
}

impl ChunkPolicy {
    pub const ALL: [ChunkPolicy; 2] =
        [ChunkPolicy::Response, ChunkPolicy::Reject];

    /// Directory name of the index built with this policy.
    pub fn index_name(self) -> &'static str {
        match self {
            Self::Response => "db_response",
            Self::Reject => "db_reject",
        }
    }

    fn prepare_markdown(self, basename: &str, raw: &str) -> String {
        match self {
            Self::Response => format!("{basename}\n{}", normalize(raw)),
            Self::Reject => format!("{basename}\n{raw}"),
        }
    }
}

impl std::fmt::Display for ChunkPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Response => f.write_str("response"),
            Self::Reject => f.write_str("reject"),
        }
    }
}

/// Chunk one document for the given index.
///
/// The file's base name is prepended to the text so it takes part in the
/// embedded signal.
pub fn chunk_document(policy: ChunkPolicy, document: &Document) -> Vec<Chunk> {
    let basename = document.basename();
    match document.file_type {
        FileType::Markdown => {
            let text = policy.prepare_markdown(&basename, &document.content);
            chunk_markdown(&text, &document.source)
        }
        _ => {
            let text = format!("{basename}\n{}", document.content);
            chunk_plain(&text, &document.source)
        }
    }
}

/// Split markdown at headings, then by length where a section is too long.
///
/// Each chunk is `"<headings> <lowercased body>"`, where `<headings>` is the
/// active `#`/`##`/`###` path joined by spaces. Pieces shorter than
/// [`MIN_CHUNK_CHARS`] are dropped. A chunk that is still
/// [`SECTION_SPLIT_THRESHOLD`] characters or longer is logged, not rejected.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use docgate::chunking::chunk_markdown;
///
/// let chunks = chunk_markdown(
///     "# Install\nRun pip install mmpose.",
///     Path::new("/docs/a.md"),
/// );
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].content, "Install run pip install mmpose.");
/// ```
pub fn chunk_markdown(text: &str, source: &Path) -> Vec<Chunk> {
    if text.chars().count() <= 1 {
        return Vec::new();
    }

    let splitter =
        RecursiveSplitter::markdown(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP);
    let mut chunks = Vec::new();

    for section in split_markdown_headers(text) {
        let header = section.headers.joined();
        let len = section.content.chars().count();

        let bodies = if len >= SECTION_SPLIT_THRESHOLD {
            splitter
                .split(&section.content)
                .into_iter()
                .filter(|piece| piece.chars().count() >= MIN_CHUNK_CHARS)
                .collect()
        } else if len >= MIN_CHUNK_CHARS {
            vec![section.content]
        } else {
            Vec::new()
        };

        for body in bodies {
            let body = body.to_lowercase();
            let content = if header.is_empty() {
                body
            } else {
                format!("{header} {body}")
            };
            let mut chunk = Chunk::new(content, source);
            if !header.is_empty() {
                chunk.metadata.insert(HEADER_KEY.to_string(), header.clone());
            }
            chunks.push(chunk);
        }
    }

    for chunk in &chunks {
        let len = chunk.content.chars().count();
        if len >= SECTION_SPLIT_THRESHOLD {
            tracing::warn!(
                source = %source.display(),
                len,
                "markdown chunk could not be split below {SECTION_SPLIT_THRESHOLD} chars"
            );
        }
    }

    chunks
}

/// Split arbitrary text by length only.
///
/// Returns nothing for input of at most one character.
pub fn chunk_plain(text: &str, source: &Path) -> Vec<Chunk> {
    if text.chars().count() <= 1 {
        return Vec::new();
    }

    RecursiveSplitter::text(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
        .split(text)
        .into_iter()
        .map(|content| Chunk::new(content, source))
        .collect()
}
