//! Naming convention for stacked outputs.
//! - `<original-stem>[ <prefix>] stacked<ext>`, single spaces, whitespace collapsed.
//! - A stem that already contains the word "stacked" is never re-tagged.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

/// The word appended to stacked outputs.
pub const PROCESSED_MARKER: &str = "stacked";

static PROCESSED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bstacked\b").expect("static regex"));
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));

/// True if `stem` already carries the processed marker as a whole word (case-insensitive).
pub fn is_processed_stem(stem: &str) -> bool {
    PROCESSED_RE.is_match(stem)
}

/// Same as [`is_processed_stem`] but takes a full filename and ignores its extension.
pub fn is_already_processed(filename: &str) -> bool {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    is_processed_stem(stem)
}

/// Build the tagged filename for a stacked output.
///
/// `ext` includes its leading dot (or is empty). The optional `prefix` is trimmed and
/// dropped when blank.
pub fn stacked_name(stem: &str, ext: &str, prefix: Option<&str>) -> String {
    let mut parts = vec![stem];
    if let Some(p) = prefix.map(str::trim).filter(|p| !p.is_empty()) {
        parts.push(p);
    }
    parts.push(PROCESSED_MARKER);
    let joined = parts.join(" ");
    let collapsed = WHITESPACE_RE.replace_all(&joined, " ");
    format!("{collapsed}{ext}")
}

/// Name to use for a stacked output: tagged unless it is already processed.
pub fn output_name(stem: &str, ext: &str, prefix: Option<&str>) -> String {
    if is_processed_stem(stem) {
        format!("{stem}{ext}")
    } else {
        stacked_name(stem, ext, prefix)
    }
}

/// Portion of a stem that carries the camera's numbering.
///
/// Tagged outputs look like `<original> [<prefix>] stacked`. The marker and everything after
/// it is dropped, then trailing prefix words until the text ends in a digit, so
/// `Trip P7010123 macro stacked` yields `Trip P7010123`. Untagged stems are returned unchanged.
pub fn identity_stem(stem: &str) -> &str {
    let Some(m) = PROCESSED_RE.find(stem) else {
        return stem;
    };
    let mut head = stem[..m.start()].trim_end();
    while !head.ends_with(|c: char| c.is_ascii_digit()) {
        match head.rfind(char::is_whitespace) {
            Some(i) => head = head[..i].trim_end(),
            None => break,
        }
    }
    if head.is_empty() { stem } else { head }
}
