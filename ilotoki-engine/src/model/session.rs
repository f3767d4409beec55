//! Inference capability seen by the rest of the crate
//!
//! The engine only needs two operations from an inference backend: load a
//! model file into a session, and turn a prompt into a stream of text
//! fragments. [`super::llamacpp`] provides the real implementation; tests use
//! stubs.

use std::path::Path;

use super::error::{GenerationError, LoadError};

/// llama.cpp's "pick a random seed" value.
pub const DEFAULT_SEED: u32 = 0xFFFF_FFFF;

/// Parameters applied when a model is loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceParams {
    /// Sampling temperature (0 or below = greedy)
    pub temperature: f32,
    /// Keep the running conversation and prefix it to later prompts
    pub store_chats: bool,
    /// Context window in tokens (0 = model default)
    pub n_ctx: u32,
    /// Inference threads (0 = llama.cpp default)
    pub n_threads: u32,
    /// Upper bound on generated tokens per prompt
    pub max_new_tokens: usize,
    pub seed: u32,
}

impl Default for InferenceParams {
    fn default() -> Self {
        Self {
            temperature: 0.5,
            store_chats: false,
            n_ctx: 2048,
            n_threads: 0,
            max_new_tokens: 256,
            seed: DEFAULT_SEED,
        }
    }
}

/// Lazily generated text fragments. Ends after the last fragment or the first error.
pub type Tokens<'a> = Box<dyn Iterator<Item = Result<String, GenerationError>> + 'a>;

/// A loaded model that can answer prompts.
///
/// A session serves one conversation; callers must not run two generations
/// on the same session at once.
pub trait InferenceSession: Send + Sync + 'static {
    fn generate(&self, prompt: &str) -> Result<Tokens<'_>, GenerationError>;
}

/// Turns a model file into an [`InferenceSession`]. Called on a blocking thread.
pub trait ModelLoader: Send + Sync + 'static {
    type Session: InferenceSession;

    fn load(&self, path: &Path, params: &InferenceParams) -> Result<Self::Session, LoadError>;
}
