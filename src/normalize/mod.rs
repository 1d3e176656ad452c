//! Deterministic, rule-based text normalization for speech.
//!
//! [`TextNormalizer`] rewrites extracted paper text into something a speech
//! model can read: citations, URLs and markup are removed, equations become a
//! placeholder, symbols are spelled out and whitespace is repaired. The rule
//! groups run in a fixed order (see [`RuleGroup::ORDER`]), one pass each.
//!
//! The normalizer holds no mutable state. One instance can be shared across
//! any number of tasks and threads without locking.
//!
//! ```rust
//! use papercast::normalize::{NormalizeOptions, TextNormalizer};
//!
//! let n = TextNormalizer::default();
//! let out = n
//!     .normalize("Results show (Smith, 2020) a 65% ± 5% effect [1,2].", &NormalizeOptions::default())
//!     .unwrap();
//! assert_eq!(out.as_str(), "Results show a 65% plus or minus 5% effect.");
//! ```

pub mod rules;
pub mod symbols;

pub use rules::{NormalizationRule, RewriteAction, RuleGroup, RuleSet, RuleSetBuilder};
pub use symbols::SymbolTable;

use crate::error::{LengthBound, PapercastError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Section headings whose content is not read aloud.
pub const SKIP_SECTIONS: &[&str] = &[
    "references",
    "bibliography",
    "citations",
    "appendix",
    "supplementary material",
    "acknowledgments",
    "acknowledgements",
];

/// Per-call normalization switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeOptions {
    /// Run the citation group. Every other group always runs. Default: true.
    pub remove_citations: bool,
    /// Outputs shorter than this many characters are a collapse. Default: 3.
    pub min_output_chars: usize,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            remove_citations: true,
            min_output_chars: 3,
        }
    }
}

/// Output of [`TextNormalizer::normalize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedText {
    text: String,
    original_len: usize,
}

impl NormalizedText {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }

    /// Character count of the input.
    pub fn original_len(&self) -> usize {
        self.original_len
    }

    /// Character count of the output.
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl fmt::Display for NormalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl AsRef<str> for NormalizedText {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

/// The normalization engine: an immutable, shareable rule set.
#[derive(Debug, Clone, Default)]
pub struct TextNormalizer {
    rules: Arc<RuleSet>,
}

impl TextNormalizer {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules: Arc::new(rules),
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Normalize `text` for speech.
    ///
    /// # Errors
    /// - [`PapercastError::EmptyInput`] when `text` is empty or whitespace.
    /// - [`PapercastError::NormalizationCollapse`] when fewer than
    ///   `options.min_output_chars` characters survive.
    pub fn normalize(
        &self,
        text: &str,
        options: &NormalizeOptions,
    ) -> Result<NormalizedText, PapercastError> {
        if text.trim().is_empty() {
            return Err(PapercastError::EmptyInput);
        }
        let original_len = text.chars().count();

        let mut out = self.rules.repair_layout(text);
        for group in RuleGroup::ORDER {
            if group == RuleGroup::Citation && !options.remove_citations {
                continue;
            }
            out = self.rules.apply_group(group, &out);
        }

        let normalized_len = out.chars().count();
        debug!("Normalized text: {} → {} chars", original_len, normalized_len);

        let min_len = options.min_output_chars.max(1);
        if normalized_len < min_len {
            return Err(PapercastError::NormalizationCollapse {
                original_len,
                normalized_len,
                min_len,
            });
        }

        Ok(NormalizedText {
            text: out,
            original_len,
        })
    }
}

/// True when `heading` starts a section that should not be read aloud.
///
/// Case-insensitive prefix match against [`SKIP_SECTIONS`] after trimming.
pub fn should_skip_section(heading: &str) -> bool {
    let lower = heading.trim().to_lowercase();
    SKIP_SECTIONS.iter().any(|s| lower.starts_with(s))
}

/// Check that `text` has between `min` and `max` characters (inclusive).
pub fn validate_length(text: &str, min: usize, max: usize) -> Result<(), PapercastError> {
    let actual = text.chars().count();
    if actual < min {
        return Err(PapercastError::LengthViolation {
            bound: LengthBound::Min,
            limit: min,
            actual,
        });
    }
    if actual > max {
        return Err(PapercastError::LengthViolation {
            bound: LengthBound::Max,
            limit: max,
            actual,
        });
    }
    Ok(())
}

static RE_HEADING_DECORATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:#+\s*)?(?:\[SECTION:\s*)?(?:(?:\d+(?:\.\d+)*|[IVXLC]+)\.?\s+)?").unwrap()
});

/// Heading text of a line that looks like a standalone section heading.
fn heading_of(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.ends_with('.') {
        return None;
    }
    let start = RE_HEADING_DECORATION
        .find(trimmed)
        .map(|m| m.end())
        .unwrap_or(0);
    let heading = trimmed[start..].trim_end_matches(']').trim();
    if heading.is_empty() || heading.split_whitespace().count() > 6 {
        return None;
    }
    Some(heading)
}

/// Cut the document at the first standalone back-matter heading
/// (References, Appendix, ...). Text before it is returned unchanged.
///
/// A heading on the first line is ignored: there is nothing in front of it
/// worth keeping, and trimming would empty the document.
pub fn trim_back_matter(text: &str) -> &str {
    let mut offset = 0;
    for (i, line) in text.split_inclusive('\n').enumerate() {
        if i > 0 {
            if let Some(heading) = heading_of(line) {
                if should_skip_section(heading) {
                    debug!("Trimming back matter at '{}' (byte {})", heading, offset);
                    return text[..offset].trim_end();
                }
            }
        }
        offset += line.len();
    }
    text
}
