//! Voice identifiers and their presentation categories.
//!
//! Voice ids follow a two-letter convention: region then gender
//! (`af_sarah` is an American female voice, `bm_george` a British male one).
//! The category is only used to group voices for listing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// How many voice ids a [`crate::PapercastError::VoiceNotFound`] lists.
pub const VOICE_SAMPLE_LEN: usize = 10;

/// Listing bucket derived from a voice id prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceCategory {
    AmericanFemale,
    AmericanMale,
    BritishFemale,
    BritishMale,
    Other,
}

impl VoiceCategory {
    pub fn of(voice: &str) -> Self {
        match voice.get(..3) {
            Some("af_") => VoiceCategory::AmericanFemale,
            Some("am_") => VoiceCategory::AmericanMale,
            Some("bf_") => VoiceCategory::BritishFemale,
            Some("bm_") => VoiceCategory::BritishMale,
            _ => VoiceCategory::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VoiceCategory::AmericanFemale => "american_female",
            VoiceCategory::AmericanMale => "american_male",
            VoiceCategory::BritishFemale => "british_female",
            VoiceCategory::BritishMale => "british_male",
            VoiceCategory::Other => "other",
        }
    }
}

impl fmt::Display for VoiceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The voices offered by one model load. Immutable until the model is
/// unloaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceSet {
    voices: Vec<String>,
}

impl VoiceSet {
    /// Keeps the back-end's order; duplicates are dropped.
    pub fn new(voices: Vec<String>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let voices = voices
            .into_iter()
            .filter(|v| seen.insert(v.clone()))
            .collect();
        Self { voices }
    }

    pub fn contains(&self, voice: &str) -> bool {
        self.voices.iter().any(|v| v == voice)
    }

    pub fn first(&self) -> Option<&str> {
        self.voices.first().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.voices
    }

    /// The first [`VOICE_SAMPLE_LEN`] voices, for error messages.
    pub fn sample(&self) -> Vec<String> {
        self.voices.iter().take(VOICE_SAMPLE_LEN).cloned().collect()
    }

    /// Voices grouped by category. Every category is present, possibly empty.
    pub fn categories(&self) -> BTreeMap<VoiceCategory, Vec<String>> {
        let mut map: BTreeMap<VoiceCategory, Vec<String>> = [
            VoiceCategory::AmericanFemale,
            VoiceCategory::AmericanMale,
            VoiceCategory::BritishFemale,
            VoiceCategory::BritishMale,
            VoiceCategory::Other,
        ]
        .into_iter()
        .map(|c| (c, Vec::new()))
        .collect();
        for v in &self.voices {
            map.entry(VoiceCategory::of(v)).or_default().push(v.clone());
        }
        map
    }
}
