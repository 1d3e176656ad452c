//! Rule model for the text normalizer.
//!
//! A [`RuleSet`] maps each [`RuleGroup`] to an ordered list of
//! [`NormalizationRule`]s. Groups always run in [`RuleGroup::ORDER`]; within
//! a group each rule runs once, left to right, over the output of the rule
//! before it. There is no fixed-point iteration.
//!
//! Before the first group, a layout repair pass ([`RuleSet::repair_layout`])
//! undoes extraction artifacts: invisible characters, non-breaking spaces,
//! words split across lines and spaces before punctuation. Citation and
//! reference patterns therefore see the same spelling the whitespace group
//! produces at the end, so a second normalization finds nothing new.
//!
//! The default rules live in `Lazy` statics so compiling them is paid once per
//! process. Callers who need a stricter or looser rule set replace individual
//! groups through [`RuleSetBuilder`].

use super::symbols::SymbolTable;
use crate::error::PapercastError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a normalization rule. Declaration order is application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleGroup {
    /// Author-year and numeric citations, "et al." phrases.
    Citation,
    /// URLs, email addresses, DOIs, figure/table cross-references.
    ReferenceApparatus,
    /// Inline and display equations.
    Math,
    /// Typesetting commands.
    Markup,
    /// Symbols, units and Latin abbreviations; affiliation markers.
    Symbol,
    /// Parenthetical acronym glosses such as `(TTS)`.
    ParentheticalAbbreviation,
    /// Quotes, invisible characters, punctuation spacing, run collapse.
    Whitespace,
}

impl RuleGroup {
    pub const ORDER: [RuleGroup; 7] = [
        RuleGroup::Citation,
        RuleGroup::ReferenceApparatus,
        RuleGroup::Math,
        RuleGroup::Markup,
        RuleGroup::Symbol,
        RuleGroup::ParentheticalAbbreviation,
        RuleGroup::Whitespace,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RuleGroup::Citation => "citation",
            RuleGroup::ReferenceApparatus => "reference_apparatus",
            RuleGroup::Math => "math",
            RuleGroup::Markup => "markup",
            RuleGroup::Symbol => "symbol",
            RuleGroup::ParentheticalAbbreviation => "parenthetical_abbreviation",
            RuleGroup::Whitespace => "whitespace",
        }
    }
}

impl fmt::Display for RuleGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with a match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteAction {
    /// Remove the matched span.
    Delete,
    /// Replace the matched span with fixed text.
    Literal(String),
    /// Replace using capture-group expansion (`$1`, `${name}`).
    Template(String),
}

/// One pattern and what to do with its matches.
#[derive(Debug, Clone)]
pub struct NormalizationRule {
    pub name: String,
    pub pattern: Regex,
    pub action: RewriteAction,
}

impl NormalizationRule {
    /// Compile a rule. Invalid patterns are a configuration error.
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        action: RewriteAction,
    ) -> Result<Self, PapercastError> {
        let name = name.into();
        let pattern = Regex::new(pattern)
            .map_err(|e| PapercastError::InvalidConfig(format!("rule '{name}': {e}")))?;
        Ok(Self {
            name,
            pattern,
            action,
        })
    }

    pub fn delete(name: impl Into<String>, pattern: &str) -> Result<Self, PapercastError> {
        Self::new(name, pattern, RewriteAction::Delete)
    }

    pub fn literal(
        name: impl Into<String>,
        pattern: &str,
        replacement: impl Into<String>,
    ) -> Result<Self, PapercastError> {
        Self::new(name, pattern, RewriteAction::Literal(replacement.into()))
    }

    pub fn template(
        name: impl Into<String>,
        pattern: &str,
        template: impl Into<String>,
    ) -> Result<Self, PapercastError> {
        Self::new(name, pattern, RewriteAction::Template(template.into()))
    }

    /// Apply the rule once over `text`.
    pub fn apply(&self, text: &str) -> String {
        match &self.action {
            RewriteAction::Delete => self.pattern.replace_all(text, "").into_owned(),
            RewriteAction::Literal(s) => self
                .pattern
                .replace_all(text, regex::NoExpand(s.as_str()))
                .into_owned(),
            RewriteAction::Template(t) => self.pattern.replace_all(text, t.as_str()).into_owned(),
        }
    }
}

// Default rule patterns are compile-time constants.
fn rule(name: &str, pattern: &str, action: RewriteAction) -> NormalizationRule {
    NormalizationRule::new(name, pattern, action).unwrap()
}

// ── Citation ──────────────────────────────────────────────────────────────

/// One author-year reference: `Smith 2020`, `Smith et al., 2019a`,
/// `Smith and Jones, 2021`, `Smith & Jones 2021`.
const AUTHOR_YEAR: &str = r"[A-Z][\p{L}'’-]+(?:\s+(?:and|&)\s+[A-Z][\p{L}'’-]+)?(?:\s+et\s+al\.?)?(?:\s*,\s*|\s+)\d{4}[a-z]?";

static CITATION_RULES: Lazy<Vec<NormalizationRule>> = Lazy::new(|| {
    vec![
        rule(
            "author_year",
            &format!(r"\(\s*{AUTHOR_YEAR}(?:\s*;\s*{AUTHOR_YEAR})*\s*\)"),
            RewriteAction::Delete,
        ),
        rule(
            "numeric_brackets",
            r"\[\s*\d+(?:\s*[-–,]\s*\d+)*\s*\]",
            RewriteAction::Delete,
        ),
        rule(
            "author_brackets",
            r"\[[A-Z][\p{L}'’-]+(?:\s+et\s+al\.?)?(?:,?\s*\d{4}[a-z]?)?\]",
            RewriteAction::Delete,
        ),
        rule("et_al", r"\s*\bet\s+al\b\.?", RewriteAction::Delete),
    ]
});

// ── Reference apparatus ───────────────────────────────────────────────────

static REFERENCE_RULES: Lazy<Vec<NormalizationRule>> = Lazy::new(|| {
    vec![
        rule("doi", r"(?i)\b(?:doi:\s*|https?://(?:dx\.)?doi\.org/)10\.\d{4,9}/\S+", RewriteAction::Delete),
        rule("bare_doi", r"\b10\.\d{4,9}/[^\s,;]+[^\s.,;:)]", RewriteAction::Delete),
        rule("url", r"(?:https?://|www\.)[^\s<>()]*[^\s<>().,;:!?'\x22]", RewriteAction::Delete),
        rule(
            "email",
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
            RewriteAction::Delete,
        ),
        rule(
            "figure_reference",
            r"(?i)\(\s*(?:see\s+)?(?:fig(?:ure)?s?\.?|tables?|eqs?\.?|equations?|sections?|supplementary\s+\w+)\s*[A-Z]?\d+[A-Za-z]?(?:\s*(?:,|and|&|-|–)\s*[A-Z]?\d+[A-Za-z]?)*\s*\)",
            RewriteAction::Delete,
        ),
    ]
});

// ── Math ──────────────────────────────────────────────────────────────────

/// Placeholder left where an equation was. Keeps the sentence's rhythm when
/// read aloud.
pub const EQUATION_PLACEHOLDER: &str = " [equation] ";

static MATH_RULES: Lazy<Vec<NormalizationRule>> = Lazy::new(|| {
    let placeholder = || RewriteAction::Literal(EQUATION_PLACEHOLDER.to_string());
    vec![
        rule("display_dollars", r"(?s)\$\$.+?\$\$", placeholder()),
        rule("display_brackets", r"(?s)\\\[.+?\\\]", placeholder()),
        rule("inline_parens", r"(?s)\\\(.+?\\\)", placeholder()),
        // `$5 and $10` is currency: the opening `$` must not precede a digit
        // or space, and the closing one must not precede a digit.
        rule(
            "inline_dollars",
            r"\$[^$\n\d\s][^$\n]*?\$(\D|$)",
            RewriteAction::Template(format!("{EQUATION_PLACEHOLDER}${{1}}")),
        ),
    ]
});

// ── Markup ────────────────────────────────────────────────────────────────

static MARKUP_RULES: Lazy<Vec<NormalizationRule>> = Lazy::new(|| {
    vec![
        // Commands whose argument is not prose.
        rule(
            "reference_commands",
            r"\\(?:cite[a-zA-Z]*|ref|eqref|autoref|cref|Cref|label|url|href)\*?(?:\[[^\]]*\])*\{[^{}]*\}(?:\{[^{}]*\})?",
            RewriteAction::Delete,
        ),
        // Formatting commands: keep the argument.
        rule(
            "command_with_argument",
            r"\\[a-zA-Z]+\*?(?:\[[^\]]*\])*\{([^{}]*)\}",
            RewriteAction::Template("${1}".into()),
        ),
        rule("bare_command", r"\\[a-zA-Z]+\*?", RewriteAction::Delete),
        rule("stray_braces", r"[{}]", RewriteAction::Delete),
    ]
});

// ── Symbol ────────────────────────────────────────────────────────────────

static SYMBOL_RULES: Lazy<Vec<NormalizationRule>> = Lazy::new(|| {
    vec![rule(
        "affiliation_markers",
        r"[¹²³⁴⁵⁶⁷⁸⁹⁰†‡]+",
        RewriteAction::Delete,
    )]
});

// ── Parenthetical abbreviation ────────────────────────────────────────────

static ABBREVIATION_RULES: Lazy<Vec<NormalizationRule>> = Lazy::new(|| {
    vec![rule(
        "parenthetical_acronym",
        r"\(\s*(?:[A-Z]{2,}s?|[A-Z][a-z]+)\s*\)",
        RewriteAction::Delete,
    )]
});

// ── Layout repair ─────────────────────────────────────────────────────────

static LAYOUT_RULES: Lazy<Vec<NormalizationRule>> = Lazy::new(|| {
    vec![
        rule("smart_double_quotes", "[\u{201C}\u{201D}\u{201E}\u{00AB}\u{00BB}]", RewriteAction::Literal("\"".into())),
        rule("smart_single_quotes", "[\u{2018}\u{2019}\u{201A}]", RewriteAction::Literal("'".into())),
        rule("non_breaking_space", "[\u{00A0}\u{2007}\u{202F}\u{2009}]", RewriteAction::Literal(" ".into())),
        rule("invisible", "[\u{200B}\u{200C}\u{200D}\u{2060}\u{FEFF}\u{00AD}]", RewriteAction::Delete),
        rule("hyphenated_line_break", r"(\w)-[ \t]*\r?\n[ \t]*(\w)", RewriteAction::Template("${1}${2}".into())),
        rule("space_before_punctuation", r"\s+([.,;:!?])", RewriteAction::Template("${1}".into())),
    ]
});

// ── Whitespace ────────────────────────────────────────────────────────────

static WHITESPACE_RULES: Lazy<Vec<NormalizationRule>> = Lazy::new(|| {
    // Layout rules again, for text the earlier groups rejoined; punctuation
    // spacing waits until the separator repairs below.
    let mut rules: Vec<NormalizationRule> = LAYOUT_RULES
        .iter()
        .filter(|r| r.name != "space_before_punctuation")
        .cloned()
        .collect();
    rules.extend([
        rule("empty_brackets", r"\(\s*[,;]?\s*\)|\[\s*\]", RewriteAction::Delete),
        rule("space_after_open_bracket", r"([(\[])\s+", RewriteAction::Template("${1}".into())),
        rule("space_before_close_bracket", r"\s+([)\]])", RewriteAction::Template("${1}".into())),
        rule("doubled_separators", r"([,;:])(?:\s*[,;:])+", RewriteAction::Template("${1}".into())),
        rule("repeated_periods", r"\.(?:\s+\.)+", RewriteAction::Literal(".".into())),
        rule("space_before_punctuation", r"\s+([.,;:!?])", RewriteAction::Template("${1}".into())),
        rule("space_after_punctuation", r"([.,;:!?])([A-Za-z])", RewriteAction::Template("${1} ${2}".into())),
    ]);
    rules
});

static DEFAULT_RULE_SET: Lazy<RuleSet> = Lazy::new(|| RuleSet {
    groups: [
        CITATION_RULES.clone(),
        REFERENCE_RULES.clone(),
        MATH_RULES.clone(),
        MARKUP_RULES.clone(),
        SYMBOL_RULES.clone(),
        ABBREVIATION_RULES.clone(),
        WHITESPACE_RULES.clone(),
    ],
    layout: LAYOUT_RULES.clone(),
    symbols: SymbolTable::default(),
});

/// The full, ordered rule configuration of a normalizer.
#[derive(Debug, Clone)]
pub struct RuleSet {
    groups: [Vec<NormalizationRule>; 7],
    layout: Vec<NormalizationRule>,
    symbols: SymbolTable,
}

impl Default for RuleSet {
    fn default() -> Self {
        DEFAULT_RULE_SET.clone()
    }
}

impl RuleSet {
    /// Start from the default rules.
    pub fn builder() -> RuleSetBuilder {
        RuleSetBuilder {
            set: Self::default(),
        }
    }

    /// Rules of one group, in application order.
    pub fn rules(&self, group: RuleGroup) -> &[NormalizationRule] {
        &self.groups[group.index()]
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Layout repair rules, run once before the first group.
    pub fn layout_rules(&self) -> &[NormalizationRule] {
        &self.layout
    }

    /// Undo extraction artifacts before any group runs.
    pub fn repair_layout(&self, text: &str) -> String {
        self.layout
            .iter()
            .fold(text.to_string(), |acc, r| r.apply(&acc))
    }

    /// Run every rule of `group` once, then the group's built-in step
    /// (symbol expansion for [`RuleGroup::Symbol`], run collapse for
    /// [`RuleGroup::Whitespace`]).
    pub fn apply_group(&self, group: RuleGroup, text: &str) -> String {
        let mut out = self
            .rules(group)
            .iter()
            .fold(text.to_string(), |acc, r| r.apply(&acc));
        match group {
            RuleGroup::Symbol => out = self.symbols.expand(&out),
            RuleGroup::Whitespace => out = collapse_runs(&out),
            _ => {}
        }
        out
    }
}

/// Builder for [`RuleSet`]: replace, extend or clear individual groups.
#[derive(Debug)]
pub struct RuleSetBuilder {
    set: RuleSet,
}

impl RuleSetBuilder {
    /// Start from an empty rule set: no rules, empty symbol table. Only the
    /// whitespace run collapse remains.
    pub fn empty() -> Self {
        Self {
            set: RuleSet {
                groups: Default::default(),
                layout: Vec::new(),
                symbols: SymbolTable::empty(),
            },
        }
    }

    pub fn group(mut self, group: RuleGroup, rules: Vec<NormalizationRule>) -> Self {
        self.set.groups[group.index()] = rules;
        self
    }

    pub fn push(mut self, group: RuleGroup, rule: NormalizationRule) -> Self {
        self.set.groups[group.index()].push(rule);
        self
    }

    /// Replace the layout repair rules.
    pub fn layout(mut self, rules: Vec<NormalizationRule>) -> Self {
        self.set.layout = rules;
        self
    }

    pub fn symbols(mut self, table: SymbolTable) -> Self {
        self.set.symbols = table;
        self
    }

    pub fn build(self) -> RuleSet {
        self.set
    }
}

static RE_PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t\r]*\n\s*").unwrap());

/// Collapse whitespace runs to a single space inside each paragraph; keep
/// paragraph breaks as a single blank line.
pub fn collapse_runs(text: &str) -> String {
    RE_PARAGRAPH_BREAK
        .split(text)
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
