//! ilotoki-engine: Toki Pona translation on a local GGUF model
//!
//! [`model`] gets the model onto the device and into a llama.cpp session;
//! [`translate`] turns a query into a prompt and streams the answer.

pub mod model;
pub mod translate;

pub use model::{
    AcquireError, AcquisitionState, Fetcher, InferenceParams, InferenceSession, LlamaLoader,
    LlamaSession, ModelAcquirer, ModelAsset, ModelLoader, ModelStore, Phase, ProgressEvent,
};
pub use translate::{
    EMPTY_QUERY_MESSAGE, Language, MODEL_NOT_LOADED_MESSAGE, OutputNormalization, TOKI_PONA,
    TranslationRequest, TranslationResult, receive_into, spawn_translation, translate,
};
