#![allow(clippy::not_unsafe_ptr_arg_deref)]

use std::ffi::{CStr, c_char, c_int, c_uint};

use ilotoki_engine::Language;

use crate::core::translator::TranslatorError;

use super::{IlotokiTranslator, ffi_mut};

/// Replace the query text
/// A null or non-UTF-8 string clears the query
#[unsafe(no_mangle)]
pub extern "C" fn ilotoki_translator_set_query(
    translator: *mut IlotokiTranslator,
    text: *const c_char,
) {
    let handle = ffi_mut!(translator);
    if text.is_null() {
        handle.translator.set_query("");
        return;
    }
    // SAFETY: text pointer is non-null (checked above) and expected to be a valid C string
    match unsafe { CStr::from_ptr(text) }.to_str() {
        Ok(query) => handle.translator.set_query(query),
        Err(e) => {
            tracing::warn!("set_query: invalid UTF-8: {}", e);
            handle.translator.set_query("");
        }
    }
}

/// Select the target language by index
/// Returns 0 on success, -1 if the index is out of range
#[unsafe(no_mangle)]
pub extern "C" fn ilotoki_translator_select_language(
    translator: *mut IlotokiTranslator,
    index: c_uint,
) -> c_int {
    let handle = ffi_mut!(translator, -1);
    let Some(&language) = Language::ALL.get(index as usize) else {
        return -1;
    };
    handle.translator.select_language(language);
    0
}

/// Flip the translation direction; a non-empty result becomes the query
#[unsafe(no_mangle)]
pub extern "C" fn ilotoki_translator_swap_direction(translator: *mut IlotokiTranslator) {
    let handle = ffi_mut!(translator);
    handle.translator.swap_direction();
}

/// Translate the current query, blocking until generation ends
/// Returns 0 on success, 1 if a translation is already running, -1 on null
#[unsafe(no_mangle)]
pub extern "C" fn ilotoki_translator_translate(translator: *mut IlotokiTranslator) -> c_int {
    let handle = ffi_mut!(translator, -1);
    match handle.runtime.block_on(handle.translator.translate(|_| {})) {
        Ok(result) => {
            tracing::debug!("Translated into {} fragments", result.fragments().len());
            0
        }
        Err(TranslatorError::Busy) => 1,
    }
}
