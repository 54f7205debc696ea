//! Text splitters used by the chunker.
//!
//! [`RecursiveSplitter`] splits text on the first separator that occurs in
//! it, merges the pieces back into windows of at most `chunk_size`
//! characters with up to `overlap` characters carried between neighbours,
//! and recurses with finer separators into pieces that are still too long.
//! Separators stay attached to the start of the piece that follows them.
//!
//! [`split_markdown_headers`] cuts a markdown document at `#`, `##` and
//! `###` headings and records which headings each section lives under.
//!
//! All lengths are counted in characters, not bytes.

use regex::Regex;

/// Separators for generic text, coarsest first.
const TEXT_SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

/// Separators for markdown, coarsest first. These are regular expressions.
const MARKDOWN_SEPARATORS: &[&str] = &[
    r"\n#{1,6} ",
    "```\n",
    r"\n\*\*\*+\n",
    r"\n---+\n",
    r"\n___+\n",
    r"\n\n",
    r"\n",
    " ",
    "",
];

#[derive(Debug, Clone)]
enum Separator {
    Pattern(Regex),
    /// Split between every character.
    Chars,
}

impl Separator {
    fn from_pattern(pattern: &str) -> Self {
        if pattern.is_empty() {
            Self::Chars
        } else {
            // Separator tables are compile-time constants.
            Self::Pattern(Regex::new(pattern).unwrap())
        }
    }

    fn occurs_in(&self, text: &str) -> bool {
        match self {
            Self::Pattern(re) => re.is_match(text),
            Self::Chars => true,
        }
    }

    /// Split `text`, keeping each separator at the start of the next piece.
    /// Empty pieces are dropped.
    fn split<'t>(&self, text: &'t str) -> Vec<&'t str> {
        let cuts: Vec<usize> = match self {
            Self::Pattern(re) => re
                .find_iter(text)
                .map(|m| m.start())
                .filter(|&start| start > 0)
                .collect(),
            Self::Chars => {
                text.char_indices().map(|(i, _)| i).skip(1).collect()
            }
        };

        let mut pieces = Vec::with_capacity(cuts.len() + 1);
        let mut start = 0;
        for cut in cuts {
            if cut > start {
                pieces.push(&text[start..cut]);
                start = cut;
            }
        }
        if start < text.len() {
            pieces.push(&text[start..]);
        }
        pieces
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Length-bounded recursive splitter.
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    overlap: usize,
    separators: Vec<Separator>,
}

impl RecursiveSplitter {
    /// Splitter for plain text: paragraphs, lines, words, characters.
    pub fn text(chunk_size: usize, overlap: usize) -> Self {
        let separators = TEXT_SEPARATORS
            .iter()
            .map(|s| Separator::from_pattern(&regex::escape(s)))
            .collect();
        Self {
            chunk_size,
            overlap,
            separators,
        }
    }

    /// Splitter that prefers markdown structure (headings, fences, rules)
    /// before falling back to paragraphs, lines, words and characters.
    pub fn markdown(chunk_size: usize, overlap: usize) -> Self {
        let separators = MARKDOWN_SEPARATORS
            .iter()
            .map(|s| Separator::from_pattern(s))
            .collect();
        Self {
            chunk_size,
            overlap,
            separators,
        }
    }

    /// Split `text` into trimmed, non-empty windows.
    ///
    /// # Examples
    ///
    /// ```
    /// use docgate::splitter::RecursiveSplitter;
    ///
    /// let splitter = RecursiveSplitter::text(20, 0);
    /// let chunks = splitter.split("alpha beta gamma delta epsilon zeta");
    /// assert!(chunks.len() >= 2);
    /// assert!(chunks.iter().all(|c| c.chars().count() <= 20));
    /// ```
    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &self.separators)
    }

    fn split_with(&self, text: &str, separators: &[Separator]) -> Vec<String> {
        let mut separator =
            separators.last().cloned().unwrap_or(Separator::Chars);
        let mut finer: &[Separator] = &[];
        for (i, candidate) in separators.iter().enumerate() {
            if matches!(candidate, Separator::Chars) {
                separator = Separator::Chars;
                break;
            }
            if candidate.occurs_in(text) {
                separator = candidate.clone();
                finer = &separators[i + 1..];
                break;
            }
        }

        let mut output = Vec::new();
        let mut pending: Vec<&str> = Vec::new();
        for piece in separator.split(text) {
            if char_len(piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                output.extend(self.merge(&pending));
                pending.clear();
            }
            if finer.is_empty() {
                output.push(piece.to_string());
            } else {
                output.extend(self.split_with(piece, finer));
            }
        }
        if !pending.is_empty() {
            output.extend(self.merge(&pending));
        }
        output
    }

    /// Greedily pack small pieces into windows, keeping a tail of at most
    /// `overlap` characters when a window is flushed.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut windows = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size {
                if total > self.chunk_size {
                    tracing::trace!(
                        total,
                        chunk_size = self.chunk_size,
                        "window longer than chunk size"
                    );
                }
                if !current.is_empty() {
                    push_trimmed(&mut windows, &current);
                    while total > self.overlap
                        || (total + len > self.chunk_size && total > 0)
                    {
                        let dropped = current.remove(0);
                        total -= char_len(dropped);
                    }
                }
            }
            current.push(piece);
            total += len;
        }
        push_trimmed(&mut windows, &current);
        windows
    }
}

fn push_trimmed(windows: &mut Vec<String>, pieces: &[&str]) {
    let joined = pieces.concat();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        windows.push(trimmed.to_string());
    }
}

/// Heading path of a markdown section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderPath {
    pub h1: Option<String>,
    pub h2: Option<String>,
    pub h3: Option<String>,
}

impl HeaderPath {
    /// Active headings joined by single spaces, missing levels omitted.
    ///
    /// ```
    /// use docgate::splitter::HeaderPath;
    ///
    /// let path = HeaderPath {
    ///     h1: Some("Guide".into()),
    ///     h2: None,
    ///     h3: Some("Pip".into()),
    /// };
    /// assert_eq!(path.joined(), "Guide Pip");
    /// ```
    pub fn joined(&self) -> String {
        [&self.h1, &self.h2, &self.h3]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .filter(|title| !title.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn is_empty(&self) -> bool {
        self.h1.is_none() && self.h2.is_none() && self.h3.is_none()
    }

    fn set(&mut self, level: usize, title: String) {
        match level {
            1 => {
                self.h1 = Some(title);
                self.h2 = None;
                self.h3 = None;
            }
            2 => {
                self.h2 = Some(title);
                self.h3 = None;
            }
            _ => self.h3 = Some(title),
        }
    }
}

/// A run of markdown content under one heading path. Heading lines
/// themselves are not part of `content`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownSection {
    pub headers: HeaderPath,
    pub content: String,
}

/// Parse a `#`, `##` or `###` heading line into `(level, title)`.
fn parse_heading(line: &str) -> Option<(usize, String)> {
    for (marker, level) in [("###", 3), ("##", 2), ("#", 1)] {
        if let Some(rest) = line.strip_prefix(marker) {
            if rest.is_empty() || rest.starts_with(' ') {
                return Some((level, rest.trim().to_string()));
            }
            return None;
        }
    }
    None
}

/// Split markdown into sections at `#`, `##` and `###` headings.
///
/// Lines are trimmed. Blank lines separate runs of content, and adjacent
/// runs under the same heading path are joined again with a newline.
/// Heading markers inside fenced code blocks are treated as content.
pub fn split_markdown_headers(text: &str) -> Vec<MarkdownSection> {
    let mut lines: Vec<(HeaderPath, String)> = Vec::new();
    let mut headers = HeaderPath::default();
    let mut current: Vec<&str> = Vec::new();
    let mut current_headers = HeaderPath::default();
    let mut in_code_block = false;
    let mut fence = "";

    let mut flush = |current: &mut Vec<&str>, path: &HeaderPath| {
        if !current.is_empty() {
            lines.push((path.clone(), current.join("\n")));
            current.clear();
        }
    };

    for raw in text.lines() {
        let line = raw.trim();

        if !in_code_block {
            if line.starts_with("```") || line.starts_with("~~~") {
                in_code_block = true;
                fence = &line[..3];
            }
        } else if line.starts_with(fence) {
            in_code_block = false;
            fence = "";
        }

        if !in_code_block
            && let Some((level, title)) = parse_heading(line)
        {
            flush(&mut current, &current_headers);
            headers.set(level, title);
            current_headers = headers.clone();
            continue;
        }

        if !line.is_empty() {
            current.push(line);
        } else {
            flush(&mut current, &current_headers);
        }
        current_headers = headers.clone();
    }
    flush(&mut current, &current_headers);

    let mut sections: Vec<MarkdownSection> = Vec::new();
    for (path, content) in lines {
        match sections.last_mut() {
            Some(last) if last.headers == path => {
                last.content.push('\n');
                last.content.push_str(&content);
            }
            _ => sections.push(MarkdownSection {
                headers: path,
                content,
            }),
        }
    }
    sections
}
