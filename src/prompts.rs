//! System instructions for the generative stages.
//!
//! Every instruction lives here so a prompt change never touches retry or
//! lifecycle code, and unit tests can inspect prompts without a model.
//!
//! Callers override a stage's instruction through
//! [`crate::config::LlmStageOptions::system_prompt`]; the constants here are
//! used only when no override is set.

use crate::output::DocumentMetadata;
use crate::pipeline::StageKind;

/// Cleanup stage: local, sentence-level rewriting for listening.
pub const CLEANUP_SYSTEM_PROMPT: &str = r#"You prepare text extracted from a scientific paper so it can be read aloud by a speech synthesizer. Work LOCALLY, sentence by sentence. Do not move, merge or reorder sections.

Apply these rewrites:

1. CITATIONS
   - Delete parenthetical citations: (Author, 2020), (Smith et al., 2019), (A and B, 2021)
   - Delete bracketed citations: [1], [1-3], [1, 2, 3], [Smith et al.]
   - Delete "et al.", "ibid." and "op. cit."

2. ABBREVIATIONS AND UNITS
   - Expand for listening: e.g. -> for example, i.e. -> that is, vs. -> versus, approx. -> approximately
   - Spell out units: µl -> microliters, mg -> milligrams, kg -> kilograms
   - Spell out dose notations: LD50 -> lethal dose fifty

3. SPECIES NAMES
   - Expand an abbreviated genus on first use only (E. coli -> Escherichia coli)

4. GREEK LETTERS AND SYMBOLS
   - Write them as words: α -> alpha, μ -> mu, ± -> plus or minus, × -> times, ≥ -> greater than or equal to, °C -> degrees Celsius, % -> percent

5. FIGURES AND TABLES
   - Delete references such as "Figure 1", "Fig. 2A", "Tables 1 and 2", "(see Figure 3)", "Supplementary Figure S1"
   - Delete figure and table captions

6. LAYOUT ARTEFACTS
   - Delete typesetting commands, equations, DOIs, URLs and email addresses
   - Delete page numbers, running headers and footers, journal names, copyright lines, manuscript ids
   - Delete affiliation markers (¹, ², *, †, ‡) and institution addresses
   - Rejoin words broken across lines ("re-\nsults" -> "results")
   - Use plain quotes and single spaces

7. KEEP
   - Section headings, paragraph breaks and the original section order
   - Narrative text, technical terms and all numbers

Return ONLY the cleaned text. No commentary, no preamble, no markdown fences."#;

/// Reorganization stage: global section detection and ordering.
pub const REORGANIZATION_SYSTEM_PROMPT: &str = r#"You restructure the cleaned text of a scientific paper into a narrative meant for listening.

1. DETECT SECTIONS
   Label every section with a standard name:
   - Abstract (also: Summary)
   - Introduction (also: Background)
   - Related Work (also: Literature Review)
   - Methods (also: Methodology, Materials and Methods, Experimental Procedures)
   - Results (also: Findings)
   - Discussion, or "Results and Discussion" when the paper combines them
   - Conclusion (also: Conclusions, Future Work)
   - Acknowledgments

2. ORDER SECTIONS
   Abstract, Introduction, Related Work, Methods, Results, Discussion, Conclusion, Acknowledgments.
   Omit sections the paper does not have. If there is no abstract, write a two or three sentence summary from the introduction and conclusion.
   When a section name occurs twice, merge the two sections into one.

3. DROP
   References, bibliography, appendices, supplementary material, author affiliation blocks, funding and conflict-of-interest statements.

4. FORMAT
   Start every section with a marker line, then its text:

   [SECTION: Abstract]
   text of the abstract

   [SECTION: Introduction]
   text of the introduction

5. KEEP
   All cleaned wording, paragraph breaks, technical terms and numbers. Reorder content; do not rewrite it.

Return ONLY the reorganized text with [SECTION: Name] markers. No commentary and no markdown fences."#;

/// The built-in system instruction for an LLM stage kind.
///
/// Synthesis has no instruction; it returns an empty string.
pub fn default_system_prompt(kind: StageKind) -> &'static str {
    match kind {
        StageKind::Cleanup => CLEANUP_SYSTEM_PROMPT,
        StageKind::Reorganization => REORGANIZATION_SYSTEM_PROMPT,
        StageKind::Synthesis => "",
    }
}

/// Build the user turn for a stage from the previous stage's output.
///
/// The reorganization turn is prefixed with the paper's title and authors
/// when the request carries them.
pub fn user_message(kind: StageKind, input: &str, metadata: &DocumentMetadata) -> String {
    match kind {
        StageKind::Cleanup => format!("Clean this scientific paper text for listening:\n\n{input}"),
        StageKind::Reorganization => {
            let header = metadata_header(metadata);
            format!(
                "{header}Reorganize this cleaned scientific paper text for listening:\n\n{input}"
            )
        }
        StageKind::Synthesis => input.to_string(),
    }
}

fn metadata_header(metadata: &DocumentMetadata) -> String {
    let mut header = String::new();
    if let Some(title) = metadata.title.as_deref().filter(|t| !t.trim().is_empty()) {
        header.push_str(&format!("Title: {}\n", title.trim()));
    }
    if let Some(author) = metadata.author.as_deref().filter(|a| !a.trim().is_empty()) {
        header.push_str(&format!("Authors: {}\n", author.trim()));
    }
    if !header.is_empty() {
        header.push('\n');
    }
    header
}
