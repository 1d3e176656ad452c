//! Post-processing: deterministic repair of LLM completions.
//!
//! Even well-prompted models add artefacts that are harmless on screen but
//! wrong for a speech synthesizer or for the section parser:
//!
//! - Wrapping the answer in ```` ```text ... ``` ```` fences
//! - Opening with "Here is the cleaned text:"
//! - Markdown headings and emphasis (`## Methods`, `**bold**`)
//! - Section markers in the wrong case or wrapped in emphasis
//! - Windows-style `\r\n` line endings and zero-width characters
//!
//! Fixing these here keeps the prompts focused on the rewrite itself. Each
//! rule is a pure `&str -> String` function and independently testable.
//!
//! ## Rule Order
//!
//! Fences are stripped before the preamble check so a fenced answer with a
//! preamble inside still loses both. Line endings are normalised before any
//! line-based rule, and section markers are canonicalised after emphasis is
//! removed so `**[Section: x]**` is recognised.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all repair rules to a raw completion.
///
/// Rules (applied in order):
/// 1. Strip outer code fences
/// 2. Normalise line endings (CRLF → LF)
/// 3. Drop a leading "Here is ..." preamble line
/// 4. Strip Markdown heading hashes and emphasis markers
/// 5. Canonicalise `[SECTION: Name]` markers onto their own line
/// 6. Trim trailing whitespace per line
/// 7. Collapse runs of blank lines to one
/// 8. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 9. Trim the whole text
pub fn clean_completion(input: &str) -> String {
    let s = strip_code_fences(input);
    let s = normalise_line_endings(&s);
    let s = strip_preamble(&s);
    let s = strip_markdown_markup(&s);
    let s = canonicalise_section_markers(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    s.trim().to_string()
}

// ── Rule 1: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\r?\n(.*?)\r?\n```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Drop a chatty preamble ───────────────────────────────────────────

static RE_PREAMBLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:here\s+is|here's|below\s+is|sure[,!]?)[^\n]{0,120}:\s*\n").unwrap()
});

fn strip_preamble(input: &str) -> String {
    RE_PREAMBLE.replace(input, "").to_string()
}

// ── Rule 4: Strip Markdown headings and emphasis ─────────────────────────────

static RE_HEADING_HASHES: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*#{1,6}[ \t]+").unwrap());
static RE_EMPHASIS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\*\*|__)([^\n*_]+?)(\*\*|__)").unwrap());

fn strip_markdown_markup(input: &str) -> String {
    let s = RE_HEADING_HASHES.replace_all(input, "");
    RE_EMPHASIS.replace_all(&s, "${2}").to_string()
}

// ── Rule 5: Canonicalise section markers ─────────────────────────────────────

static RE_SECTION_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[\s*section\s*:\s*([^\]\n]+?)\s*\]").unwrap());

/// Rewrite every marker as `[SECTION: Name]` and make sure it starts its
/// own line, so [`crate::sections::parse_sections`] sees it.
fn canonicalise_section_markers(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 16);
    let mut last = 0;
    for caps in RE_SECTION_MARKER.captures_iter(input) {
        let Some(m) = caps.get(0) else { continue };
        let before = &input[last..m.start()];
        out.push_str(before.trim_end_matches([' ', '\t']));
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("[SECTION: ");
        out.push_str(&caps[1]);
        out.push(']');
        let rest = &input[m.end()..];
        if !rest.starts_with('\n') && !rest.trim_start_matches([' ', '\t']).is_empty() {
            out.push('\n');
        }
        last = m.end();
        while input[last..].starts_with([' ', '\t']) {
            last += 1;
        }
    }
    out.push_str(&input[last..]);
    out
}

// ── Rule 6: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 7: Collapse blank-line runs ─────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Rule 8: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}
