//! Output normalization applied to generated fragments

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputNormalization {
    /// Pass fragments through unchanged
    Verbatim,
    /// Drop whitespace before the first and after the last visible character
    #[default]
    Trim,
}

/// Applies an [`OutputNormalization`] to a fragment stream without buffering
/// more than a run of whitespace.
#[derive(Debug)]
pub struct Normalizer {
    mode: OutputNormalization,
    started: bool,
    /// Whitespace withheld until something visible follows it
    held: String,
}

impl Normalizer {
    pub fn new(mode: OutputNormalization) -> Self {
        Self {
            mode,
            started: false,
            held: String::new(),
        }
    }

    /// Feed one fragment; returns what can be shown now.
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        if self.mode == OutputNormalization::Verbatim {
            return (!fragment.is_empty()).then(|| fragment.to_string());
        }

        let fragment = if self.started {
            fragment
        } else {
            fragment.trim_start()
        };
        let body = fragment.trim_end();
        if body.is_empty() {
            if self.started {
                self.held.push_str(fragment);
            }
            return None;
        }

        self.started = true;
        let mut out = std::mem::take(&mut self.held);
        out.push_str(body);
        self.held.push_str(&fragment[body.len()..]);
        Some(out)
    }

    /// End of stream; returns anything still withheld that should be shown.
    pub fn finish(&mut self) -> Option<String> {
        match self.mode {
            OutputNormalization::Verbatim => None,
            OutputNormalization::Trim => {
                self.held.clear();
                None
            }
        }
    }
}
