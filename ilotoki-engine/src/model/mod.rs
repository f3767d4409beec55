//! Model acquisition: download, local storage, and llama.cpp sessions

pub mod acquire;
pub mod error;
pub mod fetch;
pub mod llamacpp;
pub mod model_config;
pub mod session;
pub mod store;

pub use acquire::{AcquisitionState, ModelAcquirer, Phase};
pub use error::{AcquireError, GenerationError, LoadError, TransferError, UnknownVariant, report};
pub use fetch::{Fetcher, ProgressEvent};
pub use llamacpp::{LlamaLoader, LlamaSession};
pub use model_config::{ModelAsset, ModelFamily, ModelRegistry, VariantConfig, registry};
pub use session::{InferenceParams, InferenceSession, ModelLoader, Tokens};
pub use store::ModelStore;
