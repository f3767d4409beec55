//! Prompt construction

use super::language::{Language, TOKI_PONA};

/// One user-initiated translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationRequest {
    pub query: String,
    pub source_is_toki_pona: bool,
    /// The non-Toki-Pona side, as named in the prompt
    pub other_language: String,
}

impl TranslationRequest {
    pub fn new(
        query: impl Into<String>,
        source_is_toki_pona: bool,
        other_language: impl Into<String>,
    ) -> Self {
        Self {
            query: query.into(),
            source_is_toki_pona,
            other_language: other_language.into(),
        }
    }

    pub fn with_language(
        query: impl Into<String>,
        source_is_toki_pona: bool,
        language: Language,
    ) -> Self {
        Self::new(query, source_is_toki_pona, language.label())
    }

    pub fn source(&self) -> &str {
        if self.source_is_toki_pona {
            TOKI_PONA
        } else {
            &self.other_language
        }
    }

    pub fn target(&self) -> &str {
        if self.source_is_toki_pona {
            &self.other_language
        } else {
            TOKI_PONA
        }
    }

    pub fn is_blank(&self) -> bool {
        self.query.trim().is_empty()
    }

    pub fn prompt(&self) -> String {
        build_prompt(self.source(), self.target(), &self.query)
    }
}

/// `Translate {source} to {target}.\nQuery: {query}\nAnswer:` with the query trimmed.
pub fn build_prompt(source: &str, target: &str, query: &str) -> String {
    format!(
        "Translate {} to {}.\nQuery: {}\nAnswer:",
        source,
        target,
        query.trim()
    )
}
