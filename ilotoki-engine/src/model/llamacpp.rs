//! llama.cpp based GGUF inference via the llama-cpp-2 crate

use std::num::NonZeroU32;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel};
use llama_cpp_2::sampling::LlamaSampler;
use tracing::{debug, info};

use super::error::{GenerationError, LoadError};
use super::session::{InferenceParams, InferenceSession, ModelLoader, Tokens};

/// Global llama.cpp backend (can only be initialized once)
static LLAMA_BACKEND: OnceLock<std::result::Result<LlamaBackend, String>> = OnceLock::new();

/// Get or initialize the global llama.cpp backend
fn get_backend() -> Result<&'static LlamaBackend, LoadError> {
    let result = LLAMA_BACKEND.get_or_init(|| {
        let mut backend = LlamaBackend::init().map_err(|e| e.to_string())?;
        backend.void_logs();
        Ok(backend)
    });
    match result {
        Ok(backend) => Ok(backend),
        Err(e) => Err(LoadError::Backend(
            format!("Failed to initialize llama.cpp backend: {}", e).into(),
        )),
    }
}

/// Bytes requested per token piece.
const PIECE_BUFFER: usize = 128;

/// Loads GGUF files with llama.cpp.
#[derive(Debug, Clone, Copy, Default)]
pub struct LlamaLoader;

impl ModelLoader for LlamaLoader {
    type Session = LlamaSession;

    fn load(&self, path: &Path, params: &InferenceParams) -> Result<LlamaSession, LoadError> {
        if !path.is_file() {
            return Err(LoadError::Missing(path.to_path_buf()));
        }
        let backend = get_backend()?;

        let model = LlamaModel::load_from_file(backend, path, &LlamaModelParams::default())
            .map_err(|e| LoadError::Model(e.into()))?;
        info!(
            "Loaded {:?} (n_ctx_train={}, temperature={}, store_chats={})",
            path,
            model.n_ctx_train(),
            params.temperature,
            params.store_chats
        );

        Ok(LlamaSession {
            model,
            params: params.clone(),
            transcript: Mutex::new(String::new()),
        })
    }
}

/// A loaded GGUF model. Each prompt gets a fresh llama.cpp context.
pub struct LlamaSession {
    model: LlamaModel,
    params: InferenceParams,
    /// Previous prompts and answers when `store_chats` is enabled
    transcript: Mutex<String>,
}

impl LlamaSession {
    fn n_ctx(&self) -> u32 {
        if self.params.n_ctx > 0 {
            self.params.n_ctx
        } else {
            self.model.n_ctx_train()
        }
    }

    /// Build LlamaContextParams with configured n_ctx and n_threads
    fn context_params(&self) -> LlamaContextParams {
        let n_ctx = self.n_ctx();
        let params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(n_ctx))
            .with_n_batch(n_ctx);
        if self.params.n_threads > 0 {
            params
                .with_n_threads(self.params.n_threads as i32)
                .with_n_threads_batch(self.params.n_threads as i32)
        } else {
            params
        }
    }

    fn sampler(&self) -> LlamaSampler {
        if self.params.temperature <= 0.0 {
            return LlamaSampler::greedy();
        }
        LlamaSampler::chain_simple([
            LlamaSampler::top_k(40),
            LlamaSampler::top_p(0.95, 1),
            LlamaSampler::temp(self.params.temperature),
            LlamaSampler::dist(self.params.seed),
        ])
    }

    /// Forget the stored conversation.
    pub fn clear_transcript(&self) {
        if let Ok(mut transcript) = self.transcript.lock() {
            transcript.clear();
        }
    }
}

impl InferenceSession for LlamaSession {
    fn generate(&self, prompt: &str) -> Result<Tokens<'_>, GenerationError> {
        let backend = get_backend().map_err(|e| GenerationError::Context(e.into()))?;

        let mut full_prompt = if self.params.store_chats {
            let transcript = self
                .transcript
                .lock()
                .map_err(|e| GenerationError::Context(e.to_string().into()))?;
            format!("{}{}", transcript, prompt)
        } else {
            prompt.to_string()
        };

        let tokenize = |text: &str| {
            self.model
                .str_to_token(text, AddBos::Always)
                .map_err(|e| GenerationError::Tokenize(e.into()))
        };
        let mut tokens = tokenize(&full_prompt)?;
        let n_ctx = self.n_ctx();
        if tokens.len() >= n_ctx as usize && full_prompt.len() > prompt.len() {
            debug!("Transcript no longer fits in {} tokens, starting over", n_ctx);
            self.clear_transcript();
            full_prompt = prompt.to_string();
            tokens = tokenize(&full_prompt)?;
        }
        if tokens.is_empty() || tokens.len() >= n_ctx as usize {
            return Err(GenerationError::PromptTooLong {
                tokens: tokens.len(),
                n_ctx,
            });
        }

        let mut ctx = self
            .model
            .new_context(backend, self.context_params())
            .map_err(|e| GenerationError::Context(e.into()))?;

        let mut batch = LlamaBatch::new(tokens.len().max(512), 1);
        batch
            .add_sequence(&tokens, 0, false)
            .map_err(|e| GenerationError::Decode(e.into()))?;
        ctx.decode(&mut batch)
            .map_err(|e| GenerationError::Decode(e.into()))?;
        debug!("Prompt decoded ({} tokens)", tokens.len());

        Ok(Box::new(LlamaTokens {
            session: self,
            ctx,
            batch,
            sampler: self.sampler(),
            n_cur: tokens.len(),
            n_ctx: n_ctx as usize,
            remaining: self.params.max_new_tokens,
            pending: Vec::new(),
            record: self.params.store_chats.then_some(full_prompt),
            done: false,
        }))
    }
}

/// Token-by-token generation over one llama.cpp context.
struct LlamaTokens<'a> {
    session: &'a LlamaSession,
    ctx: LlamaContext<'a>,
    batch: LlamaBatch,
    sampler: LlamaSampler,
    n_cur: usize,
    n_ctx: usize,
    remaining: usize,
    /// Bytes of a piece that does not end on a UTF-8 boundary yet
    pending: Vec<u8>,
    /// Prompt plus generated text, written back to the transcript at the end
    record: Option<String>,
    done: bool,
}

impl LlamaTokens<'_> {
    fn step(&mut self) -> Result<Option<String>, GenerationError> {
        let model = &self.session.model;
        let token = self.sampler.sample(&self.ctx, -1);
        if model.is_eog_token(token) {
            return Ok(None);
        }

        let bytes = model
            .token_to_piece_bytes(token, PIECE_BUFFER, false, None)
            .map_err(|e| GenerationError::Decode(e.into()))?;
        self.pending.extend_from_slice(&bytes);

        self.batch.clear();
        self.batch
            .add(token, self.n_cur as i32, &[0], true)
            .map_err(|e| GenerationError::Decode(e.into()))?;
        self.ctx
            .decode(&mut self.batch)
            .map_err(|e| GenerationError::Decode(e.into()))?;
        self.n_cur += 1;
        self.remaining -= 1;

        Ok(Some(take_complete_utf8(&mut self.pending)))
    }

    fn finish(&mut self) -> Option<String> {
        self.done = true;
        let tail = (!self.pending.is_empty())
            .then(|| String::from_utf8_lossy(&std::mem::take(&mut self.pending)).into_owned());
        if let Some(mut record) = self.record.take() {
            if let Some(tail) = &tail {
                record.push_str(tail);
            }
            record.push('\n');
            if let Ok(mut transcript) = self.session.transcript.lock() {
                *transcript = record;
            }
        }
        tail
    }
}

impl Iterator for LlamaTokens<'_> {
    type Item = Result<String, GenerationError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            if self.remaining == 0 || self.n_cur >= self.n_ctx {
                return self.finish().map(Ok);
            }
            match self.step() {
                Ok(Some(text)) if text.is_empty() => continue,
                Ok(Some(text)) => {
                    if let Some(record) = &mut self.record {
                        record.push_str(&text);
                    }
                    return Some(Ok(text));
                }
                Ok(None) => return self.finish().map(Ok),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

/// Split off the longest prefix of `pending` that is valid UTF-8.
///
/// An incomplete trailing sequence stays in `pending`; invalid bytes are
/// replaced with U+FFFD.
fn take_complete_utf8(pending: &mut Vec<u8>) -> String {
    match std::str::from_utf8(pending) {
        Ok(text) => {
            let text = text.to_string();
            pending.clear();
            text
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let text = String::from_utf8_lossy(&pending[..valid]).into_owned();
            pending.drain(..valid);
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            text
        }
    }
}
