use std::sync::LazyLock;

use regex::Regex;

/// Questions longer than this are truncated before evaluation.
pub const MAX_QUESTION_CHARS: usize = 400;

static MARKDOWN_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(.*?)\]\(.*?\)").unwrap());

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```").unwrap());

static UNDERLINE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_{5,}").unwrap());

/// Clean markdown source text before it is chunked for the response index.
///
/// Replaces `[label](url)` links with their label, drops fenced code
/// blocks, drops runs of five or more underscores and lowercases the rest.
/// Removing one construct can expose another (a code block sitting between
/// `]` and `(` for instance), so the removals repeat until nothing changes.
///
/// # Examples
///
/// ```
/// use docgate::text_util::normalize;
///
/// let cleaned =
///     normalize("See [The Docs](https://x.io)\n```sh\npip install\n```\n______");
/// assert_eq!(cleaned, "see the docs\n\n");
/// ```
pub fn normalize(raw: &str) -> String {
    let mut text = raw.to_string();
    loop {
        let next = strip_markup(&text);
        if next == text {
            break;
        }
        text = next;
    }
    text.to_lowercase()
}

fn strip_markup(text: &str) -> String {
    let text = MARKDOWN_LINK.replace_all(text, "$1");
    let text = CODE_FENCE.replace_all(&text, "");
    UNDERLINE_RUN.replace_all(&text, "").into_owned()
}

/// Collapse a passage onto one line and cap it at `max_chars` characters.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut cut: String = flat.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

/// Truncate a query to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}
