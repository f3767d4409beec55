//! Translation façade: prompt in, text fragments out
//!
//! [`translate`] never fails. A blank query or a missing session yields a
//! fixed message without touching the model, and a generation error ends the
//! stream with an `Error: …` fragment.

mod language;
mod normalize;
mod prompt;
mod result;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::model::{GenerationError, InferenceSession, Tokens, report};

pub use language::{Language, TOKI_PONA, UnknownLanguage};
pub use normalize::{Normalizer, OutputNormalization};
pub use prompt::{TranslationRequest, build_prompt};
pub use result::TranslationResult;

/// Shown instead of a translation when the query is blank.
pub const EMPTY_QUERY_MESSAGE: &str = "Please enter a query";
/// Shown instead of a translation when no model session is available.
pub const MODEL_NOT_LOADED_MESSAGE: &str = "Model not loaded";

/// Fragments kept in flight between the generating thread and the consumer.
pub const FRAGMENT_BUFFER: usize = 32;

/// Lazily produced output of one translation.
pub struct Fragments<'a> {
    source: Source<'a>,
    normalizer: Normalizer,
}

enum Source<'a> {
    Message(Option<String>),
    Tokens(Tokens<'a>),
    Done,
}

impl<'a> Fragments<'a> {
    fn message(text: impl Into<String>) -> Self {
        Self {
            source: Source::Message(Some(text.into())),
            normalizer: Normalizer::new(OutputNormalization::Verbatim),
        }
    }
}

impl Iterator for Fragments<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            match &mut self.source {
                Source::Done => return None,
                Source::Message(message) => {
                    let message = message.take();
                    self.source = Source::Done;
                    return message;
                }
                Source::Tokens(tokens) => match tokens.next() {
                    Some(Ok(fragment)) => {
                        if let Some(text) = self.normalizer.push(&fragment) {
                            return Some(text);
                        }
                    }
                    Some(Err(e)) => {
                        self.source = Source::Done;
                        return Some(error_fragment(&e));
                    }
                    None => {
                        self.source = Source::Done;
                        if let Some(text) = self.normalizer.finish() {
                            return Some(text);
                        }
                    }
                },
            }
        }
    }
}

fn error_fragment(err: &GenerationError) -> String {
    let message = report(err);
    warn!("Translation failed: {}", message);
    format!("Error: {}", message)
}

/// Translate `request` with `session`.
pub fn translate<'a, S>(
    session: Option<&'a S>,
    request: &TranslationRequest,
    normalization: OutputNormalization,
) -> Fragments<'a>
where
    S: InferenceSession + ?Sized,
{
    let Some(session) = session else {
        return Fragments::message(MODEL_NOT_LOADED_MESSAGE);
    };
    if request.is_blank() {
        return Fragments::message(EMPTY_QUERY_MESSAGE);
    }

    debug!(
        "Translating {} -> {} ({} chars)",
        request.source(),
        request.target(),
        request.query.trim().chars().count()
    );
    match session.generate(&request.prompt()) {
        Ok(tokens) => Fragments {
            source: Source::Tokens(tokens),
            normalizer: Normalizer::new(normalization),
        },
        Err(e) => Fragments::message(error_fragment(&e)),
    }
}

/// Run [`translate`] on the blocking pool and hand fragments over a channel.
///
/// Dropping the receiver stops generation after the fragment in progress.
/// Must be called from within a tokio runtime.
pub fn spawn_translation<S>(
    session: Option<Arc<S>>,
    request: TranslationRequest,
    normalization: OutputNormalization,
) -> mpsc::Receiver<String>
where
    S: InferenceSession,
{
    let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
    tokio::task::spawn_blocking(move || {
        for fragment in translate(session.as_deref(), &request, normalization) {
            if tx.blocking_send(fragment).is_err() {
                debug!("Translation receiver dropped, stopping generation");
                break;
            }
        }
    });
    rx
}

/// Append everything from `rx` to `result`, calling `on_fragment` for each
/// piece, then finish the result.
pub async fn receive_into(
    mut rx: mpsc::Receiver<String>,
    result: &mut TranslationResult,
    mut on_fragment: impl FnMut(&str),
) {
    while let Some(fragment) = rx.recv().await {
        on_fragment(&fragment);
        result.push(fragment);
    }
    result.finish();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays canned fragments and records prompts.
    #[derive(Default)]
    struct Scripted {
        fragments: Vec<&'static str>,
        fail_after: Option<usize>,
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl InferenceSession for Scripted {
        fn generate(&self, prompt: &str) -> Result<Tokens<'_>, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            let fail_after = self.fail_after;
            let iter = self
                .fragments
                .iter()
                .enumerate()
                .map(move |(i, f)| match fail_after {
                    Some(n) if i >= n => Err(GenerationError::Decode("kv cache full".into())),
                    _ => Ok(f.to_string()),
                });
            Ok(Box::new(iter))
        }
    }

    fn collect(fragments: Fragments<'_>) -> Vec<String> {
        fragments.collect()
    }

    #[test]
    fn test_blank_query_skips_session() {
        let session = Scripted::default();
        let req = TranslationRequest::new("   ", true, "English");
        let out = collect(translate(Some(&session), &req, OutputNormalization::Trim));
        assert_eq!(out, [EMPTY_QUERY_MESSAGE]);
        assert_eq!(session.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_session() {
        let req = TranslationRequest::new("mi moku", true, "English");
        let out = collect(translate::<Scripted>(None, &req, OutputNormalization::Trim));
        assert_eq!(out, [MODEL_NOT_LOADED_MESSAGE]);
    }

    #[test]
    fn test_streams_fragments_with_prompt() {
        let session = Scripted {
            fragments: vec![" I", " eat", ".", "\n"],
            ..Default::default()
        };
        let req = TranslationRequest::new(" mi moku ", true, "English");
        let out = collect(translate(Some(&session), &req, OutputNormalization::Trim));
        assert_eq!(out.concat(), "I eat.");
        assert_eq!(
            session.prompts.lock().unwrap().as_slice(),
            ["Translate Toki Pona to English.\nQuery: mi moku\nAnswer:"]
        );
    }

    #[test]
    fn test_error_becomes_final_fragment() {
        let session = Scripted {
            fragments: vec![" mi", " moku", " pona"],
            fail_after: Some(2),
            ..Default::default()
        };
        let req = TranslationRequest::new("I eat well", false, "English");
        let out = collect(translate(Some(&session), &req, OutputNormalization::Verbatim));
        assert_eq!(out, [" mi", " moku", "Error: decode failed: kv cache full"]);
    }

    #[tokio::test]
    async fn test_spawn_translation_hands_over_fragments() {
        let session = Arc::new(Scripted {
            fragments: vec!["mi", " moku"],
            ..Default::default()
        });
        let req = TranslationRequest::new("I eat", false, "English");
        let rx = spawn_translation(Some(session), req, OutputNormalization::Trim);

        let mut result = TranslationResult::new();
        let mut seen = 0;
        receive_into(rx, &mut result, |_| seen += 1).await;
        assert_eq!(result.text(), "mi moku");
        assert_eq!(seen, 2);
        assert!(result.is_finished());
    }
}
