#![allow(clippy::not_unsafe_ptr_arg_deref)]

use std::ffi::{CStr, c_char, c_int};
use std::path::Path;
use std::ptr;

use super::{IlotokiTranslator, ffi_mut, init_logging};

fn into_handle(result: anyhow::Result<IlotokiTranslator>) -> *mut IlotokiTranslator {
    match result {
        Ok(translator) => Box::into_raw(Box::new(translator)),
        Err(e) => {
            tracing::error!("Failed to create translator: {:#}", e);
            ptr::null_mut()
        }
    }
}

/// Create a translator using the user's config.toml (or defaults)
/// Returns a pointer to the translator, or null on failure
#[unsafe(no_mangle)]
pub extern "C" fn ilotoki_translator_new() -> *mut IlotokiTranslator {
    init_logging();
    into_handle(IlotokiTranslator::from_config_file(None))
}

/// Create a translator from a specific config file, merged over defaults
/// Returns null if the path is null, not UTF-8, or the config is invalid
#[unsafe(no_mangle)]
pub extern "C" fn ilotoki_translator_new_with_config(path: *const c_char) -> *mut IlotokiTranslator {
    init_logging();
    if path.is_null() {
        return ptr::null_mut();
    }
    // SAFETY: path pointer is non-null (checked above) and expected to be a valid C string
    let Ok(path) = unsafe { CStr::from_ptr(path) }.to_str() else {
        tracing::warn!("new_with_config: path is not valid UTF-8");
        return ptr::null_mut();
    };
    into_handle(IlotokiTranslator::from_config_file(Some(Path::new(path))))
}

/// Start downloading/loading the model in the background
/// Returns 0 if started, 1 if an acquisition is already running, -1 on a null handle
#[unsafe(no_mangle)]
pub extern "C" fn ilotoki_translator_start(translator: *mut IlotokiTranslator) -> c_int {
    let handle = ffi_mut!(translator, -1);
    let _guard = handle.runtime.enter();
    if handle.translator.start() { 0 } else { 1 }
}

/// Wipe the model directory and acquire again (after a terminal failure)
/// Returns 0 if started, 1 if an acquisition is already running, -1 on a null handle
#[unsafe(no_mangle)]
pub extern "C" fn ilotoki_translator_retry(translator: *mut IlotokiTranslator) -> c_int {
    let handle = ffi_mut!(translator, -1);
    let _guard = handle.runtime.enter();
    if handle.translator.retry() { 0 } else { 1 }
}

/// Block until the background acquisition settles
/// Returns 1 if the model is ready, 0 otherwise
#[unsafe(no_mangle)]
pub extern "C" fn ilotoki_translator_wait_ready(translator: *mut IlotokiTranslator) -> c_int {
    let handle = ffi_mut!(translator, 0);
    let ready = handle.runtime.block_on(handle.translator.wait_ready());
    if ready.is_some() { 1 } else { 0 }
}

/// Destroy a translator instance, releasing the model
#[unsafe(no_mangle)]
pub extern "C" fn ilotoki_translator_free(translator: *mut IlotokiTranslator) {
    if !translator.is_null() {
        // SAFETY: Pointer is non-null (checked above) and was created by Box::into_raw in ilotoki_translator_new*
        unsafe {
            drop(Box::from_raw(translator));
        }
    }
}
