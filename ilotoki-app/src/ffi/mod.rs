//! C FFI interface for native front-ends
//!
//! This module provides C-compatible functions that a platform UI (Android
//! JNI shim, desktop toolkit) can call. Strings returned to C are cached on
//! the handle and stay valid until the next call to the same getter.

use std::ffi::{CStr, CString};
use std::path::Path;
use std::sync::Once;

use anyhow::{Context, Result};
use ilotoki_engine::Language;
use tokio::runtime::Runtime;

use crate::config::Settings;
use crate::core::translator::Translator;

mod input;
mod lifecycle;
mod query;


/// Null-check + deref for `*const` FFI pointers. Returns `$default` if null.
macro_rules! ffi_ref {
    ($ptr:expr, $default:expr) => {{
        if $ptr.is_null() {
            return $default;
        }
        unsafe { &*$ptr }
    }};
}

/// Null-check + deref for `*mut` FFI pointers. Returns `$default` if null.
/// Use without default for void functions.
macro_rules! ffi_mut {
    ($ptr:expr) => {{
        if $ptr.is_null() {
            return;
        }
        unsafe { &mut *$ptr }
    }};
    ($ptr:expr, $default:expr) => {{
        if $ptr.is_null() {
            return $default;
        }
        unsafe { &mut *$ptr }
    }};
}

// Make macros available to submodules
pub(crate) use ffi_mut;
pub(crate) use ffi_ref;

static INIT_LOGGING: Once = Once::new();

fn init_logging() {
    INIT_LOGGING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_writer(std::io::stderr)
            .init();
    });
}

/// NUL-terminated language labels for C callers.
fn language_label(language: Language) -> &'static CStr {
    match language {
        Language::English => c"English",
        Language::Russian => c"Russian",
        Language::Vietnamese => c"Vietnamese",
    }
}

fn language_flag(language: Language) -> &'static CStr {
    match language {
        Language::English => c"🇺🇸",
        Language::Russian => c"🇷🇺",
        Language::Vietnamese => c"🇻🇳",
    }
}

fn language_index(language: Language) -> usize {
    Language::ALL
        .iter()
        .position(|&l| l == language)
        .unwrap_or_default()
}

/// Strings handed out to C, kept alive on the handle.
#[derive(Default)]
struct StringCache {
    status: CString,
    size_text: CString,
    query: CString,
    result: CString,
}

/// Opaque handle to a translator instance
pub struct IlotokiTranslator {
    // Dropped before the runtime so background tasks are aborted first
    translator: Translator,
    runtime: Runtime,
    strings: StringCache,
}

impl IlotokiTranslator {
    fn new(settings: &Settings) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("ilotoki")
            .build()
            .context("Failed to start async runtime")?;
        let translator = Translator::from_settings(settings)?;
        Ok(Self {
            translator,
            runtime,
            strings: StringCache::default(),
        })
    }

    fn from_config_file(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) => Settings::load_from(path)?,
            None => Settings::load().unwrap_or_default(),
        };
        tracing::info!(
            "ilotoki init: variant={:?}, models_dir={:?}",
            settings.model.variant,
            settings.model.models_dir
        );
        Self::new(&settings)
    }
}

/// Convert to a C string, dropping interior NULs rather than failing.
fn to_cstring(text: &str) -> CString {
    CString::new(text.replace('\0', "")).unwrap_or_default()
}
