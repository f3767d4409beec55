//! ilotoki-app: offline Toki Pona translator
//!
//! This crate wires ilotoki-engine to user settings and exposes a translator
//! view model, both as a Rust API and as a C ABI for native front-ends.

pub mod config;
pub mod core;
pub mod ffi;

pub use config::Settings;
pub use core::translator::{Form, Translator, TranslatorError};
