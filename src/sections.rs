//! `[SECTION: Name]` markers in reorganized text.
//!
//! The reorganization stage labels each section with a marker line. This
//! module parses those markers and renders the text for a listener: each
//! marker becomes a spoken heading ("Methods."), and sections that are never
//! read aloud (references, appendices, ...) are dropped.
//!
//! Section order is whatever the reorganization stage produced; nothing here
//! reorders or merges sections.

use crate::normalize::should_skip_section;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static RE_MARKER_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mi)^[ \t]*\[\s*SECTION\s*:\s*([^\]\n]+?)\s*\][ \t]*$").unwrap());

/// One section of reorganized text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Marker name. `None` for text before the first marker.
    pub name: Option<String>,
    /// Section text without the marker line, trimmed.
    pub body: String,
}

impl Section {
    /// Whether the section is back matter that is not read aloud.
    pub fn is_skippable(&self) -> bool {
        self.name.as_deref().is_some_and(should_skip_section)
    }
}

/// Split `text` at marker lines.
///
/// Text without markers yields one unnamed section. Empty unnamed preambles
/// are omitted; empty named sections are kept.
pub fn parse_sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut name: Option<String> = None;
    let mut start = 0;

    for caps in RE_MARKER_LINE.captures_iter(text) {
        let Some(marker) = caps.get(0) else { continue };
        push_section(&mut sections, name.take(), &text[start..marker.start()]);
        name = Some(caps[1].trim().to_string());
        start = marker.end();
    }
    push_section(&mut sections, name, &text[start..]);
    sections
}

fn push_section(sections: &mut Vec<Section>, name: Option<String>, body: &str) {
    let body = body.trim();
    if name.is_none() && body.is_empty() {
        return;
    }
    sections.push(Section {
        name,
        body: body.to_string(),
    });
}

/// Render reorganized text for speech.
///
/// Markers become a heading sentence followed by a blank line; skippable
/// sections are dropped. Text without markers is returned trimmed.
pub fn render_for_speech(text: &str) -> String {
    let sections = parse_sections(text);
    if sections.iter().all(|s| s.name.is_none()) {
        return text.trim().to_string();
    }

    sections
        .iter()
        .filter(|s| !s.is_skippable())
        .map(|s| match &s.name {
            Some(name) if s.body.is_empty() => spoken_heading(name),
            Some(name) => format!("{}\n\n{}", spoken_heading(name), s.body),
            None => s.body.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn spoken_heading(name: &str) -> String {
    let name = name.trim_end_matches(['.', ':', ' ']);
    format!("{name}.")
}
