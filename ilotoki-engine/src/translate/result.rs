//! Incrementally built translation output

/// Fragments of one translation, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslationResult {
    fragments: Vec<String>,
    text: String,
    finished: bool,
}

impl TranslationResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment. Ignored once the result is finished.
    pub fn push(&mut self, fragment: impl Into<String>) {
        if self.finished {
            return;
        }
        let fragment = fragment.into();
        self.text.push_str(&fragment);
        self.fragments.push(fragment);
    }

    pub fn finish(&mut self) {
        self.finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    /// All fragments concatenated.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn clear(&mut self) {
        self.fragments.clear();
        self.text.clear();
        self.finished = false;
    }
}
