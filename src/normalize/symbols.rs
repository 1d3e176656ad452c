//! Spoken-word expansion table for technical symbols and Latin abbreviations.
//!
//! The table is data, not code: callers can start from
//! [`SymbolTable::default`] and add or replace entries, or build a table
//! from scratch for a different domain. All keys are compiled into one
//! alternation so a single left-to-right pass expands every symbol.

use crate::error::PapercastError;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

/// Default expansions, in declaration order.
///
/// Matching always prefers the longest key, so `°C` wins over `°` and
/// `µm` wins over `µ` regardless of their position here.
const DEFAULT_ENTRIES: &[(&str, &str)] = &[
    // Greek letters
    ("α", "alpha"),
    ("β", "beta"),
    ("γ", "gamma"),
    ("δ", "delta"),
    ("Δ", "delta"),
    ("ε", "epsilon"),
    ("θ", "theta"),
    ("λ", "lambda"),
    ("μ", "mu"),
    ("π", "pi"),
    ("ρ", "rho"),
    ("σ", "sigma"),
    ("Σ", "sigma"),
    ("τ", "tau"),
    ("φ", "phi"),
    ("χ", "chi"),
    ("ψ", "psi"),
    ("ω", "omega"),
    ("Ω", "ohms"),
    // Operators and relations
    ("±", "plus or minus"),
    ("×", "times"),
    ("÷", "divided by"),
    ("≥", "greater than or equal to"),
    ("≤", "less than or equal to"),
    ("≈", "approximately"),
    ("≠", "not equal to"),
    ("→", "to"),
    ("∞", "infinity"),
    ("√", "square root of"),
    // Units
    ("°C", "degrees Celsius"),
    ("°F", "degrees Fahrenheit"),
    ("°", "degrees"),
    ("µm", "micrometers"),
    ("μm", "micrometers"),
    ("µl", "microliters"),
    ("µL", "microliters"),
    ("μl", "microliters"),
    ("μL", "microliters"),
    ("µg", "micrograms"),
    ("μg", "micrograms"),
    ("µM", "micromolar"),
    ("μM", "micromolar"),
    ("µs", "microseconds"),
    ("μs", "microseconds"),
    ("µ", "micro"),
    // Latin abbreviations
    ("e.g.", "for example"),
    ("i.e.", "that is"),
    ("etc.", "et cetera"),
    ("vs.", "versus"),
    ("cf.", "compare"),
    ("approx.", "approximately"),
];

static DEFAULT_TABLE: Lazy<SymbolTable> = Lazy::new(|| {
    SymbolTable::new(DEFAULT_ENTRIES.iter().map(|(k, v)| (*k, *v)))
        .expect("default symbol table is valid")
});

/// Ordered key → spoken-form mapping applied by the symbol rule group.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    entries: Vec<(String, String)>,
    lookup: HashMap<String, String>,
    matcher: Option<Regex>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        DEFAULT_TABLE.clone()
    }
}

impl SymbolTable {
    /// Build a table from `(key, expansion)` pairs.
    ///
    /// Later duplicates of a key replace earlier ones. Fails with
    /// [`PapercastError::InvalidConfig`] when a key is empty or when any
    /// expansion contains a key, since expanding twice would then change
    /// already-normalized text.
    pub fn new<I, K, V>(entries: I) -> Result<Self, PapercastError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut ordered: Vec<(String, String)> = Vec::new();
        for (k, v) in entries {
            let (k, v) = (k.into(), v.into());
            if k.is_empty() {
                return Err(PapercastError::InvalidConfig(
                    "symbol table keys must not be empty".into(),
                ));
            }
            match ordered.iter_mut().find(|(existing, _)| *existing == k) {
                Some(slot) => slot.1 = v,
                None => ordered.push((k, v)),
            }
        }

        for (key, _) in &ordered {
            if let Some((_, expansion)) = ordered.iter().find(|(_, v)| v.contains(key.as_str())) {
                return Err(PapercastError::InvalidConfig(format!(
                    "symbol expansion '{expansion}' contains key '{key}'"
                )));
            }
        }

        let matcher = compile_matcher(&ordered)?;
        let lookup = ordered.iter().cloned().collect();
        Ok(Self {
            entries: ordered,
            lookup,
            matcher,
        })
    }

    /// An empty table: the symbol group becomes a no-op.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            lookup: HashMap::new(),
            matcher: None,
        }
    }

    /// Return a new table with `key` added or replaced.
    pub fn with_entry(
        &self,
        key: impl Into<String>,
        expansion: impl Into<String>,
    ) -> Result<Self, PapercastError> {
        let mut entries = self.entries.clone();
        entries.push((key.into(), expansion.into()));
        Self::new(entries)
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.lookup.get(key).map(String::as_str)
    }

    /// Replace every key occurrence with its spoken form.
    ///
    /// A space is inserted between an expansion and an adjacent
    /// alphanumeric character so `5±2` reads `5 plus or minus 2`.
    pub fn expand(&self, text: &str) -> String {
        let Some(re) = &self.matcher else {
            return text.to_string();
        };
        re.replace_all(text, |caps: &Captures<'_>| {
            let m = match caps.get(0) {
                Some(m) => m,
                None => return String::new(),
            };
            let spoken = self.lookup.get(m.as_str()).map(String::as_str).unwrap_or("");
            let before = text[..m.start()].chars().next_back();
            let after = text[m.end()..].chars().next();
            let mut out = String::with_capacity(spoken.len() + 2);
            if before.is_some_and(char::is_alphanumeric) {
                out.push(' ');
            }
            out.push_str(spoken);
            if after.is_some_and(char::is_alphanumeric) {
                out.push(' ');
            }
            out
        })
        .into_owned()
    }
}

/// Longest-first alternation. Keys that begin or end with an ASCII
/// alphanumeric get a word boundary on that side so `vs.` never matches
/// inside `cvs.` and `µm` never matches inside `µmol`.
fn compile_matcher(entries: &[(String, String)]) -> Result<Option<Regex>, PapercastError> {
    if entries.is_empty() {
        return Ok(None);
    }
    let mut keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
    keys.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then(a.cmp(b)));

    let alternation = keys
        .iter()
        .map(|k| {
            let mut piece = String::new();
            if k.chars().next().is_some_and(|c| c.is_ascii_alphanumeric()) {
                piece.push_str(r"\b");
            }
            piece.push_str(&regex::escape(k));
            if k.chars().next_back().is_some_and(|c| c.is_ascii_alphanumeric()) {
                piece.push_str(r"\b");
            }
            piece
        })
        .collect::<Vec<_>>()
        .join("|");

    Regex::new(&alternation)
        .map(Some)
        .map_err(|e| PapercastError::InvalidConfig(format!("symbol table pattern: {e}")))
}
