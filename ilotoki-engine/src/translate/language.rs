//! Natural languages offered opposite Toki Pona

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Toki Pona's name as used in prompts.
pub const TOKI_PONA: &str = "Toki Pona";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[default]
    #[serde(alias = "english", alias = "en")]
    English,
    #[serde(alias = "russian", alias = "ru")]
    Russian,
    #[serde(alias = "vietnamese", alias = "vi")]
    Vietnamese,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::English, Language::Russian, Language::Vietnamese];

    /// Name used in the prompt ("Translate English to Toki Pona.")
    pub fn label(self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Russian => "Russian",
            Language::Vietnamese => "Vietnamese",
        }
    }

    /// ISO 639-1 code
    pub fn code(self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Russian => "ru",
            Language::Vietnamese => "vi",
        }
    }

    /// Flag shown on the language chip
    pub fn flag(self) -> &'static str {
        match self {
            Language::English => "🇺🇸",
            Language::Russian => "🇷🇺",
            Language::Vietnamese => "🇻🇳",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unsupported language: '{0}' (expected English, Russian or Vietnamese)")]
pub struct UnknownLanguage(pub String);

impl FromStr for Language {
    type Err = UnknownLanguage;

    /// Accepts the label or the code, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Language::ALL
            .into_iter()
            .find(|lang| {
                lang.label().eq_ignore_ascii_case(needle) || lang.code().eq_ignore_ascii_case(needle)
            })
            .ok_or_else(|| UnknownLanguage(s.to_string()))
    }
}
