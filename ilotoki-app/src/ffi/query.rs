#![allow(clippy::not_unsafe_ptr_arg_deref)]

use std::ffi::{c_char, c_int, c_uint};
use std::ptr;

use ilotoki_engine::Language;
use ilotoki_engine::model::Phase;

use super::{
    IlotokiTranslator, ffi_mut, ffi_ref, language_flag, language_index, language_label,
    to_cstring,
};

/// Get the acquisition phase
/// Returns 0 = idle, 1 = downloading, 2 = loading, 3 = ready, 4 = failed, -1 on null
#[unsafe(no_mangle)]
pub extern "C" fn ilotoki_translator_get_phase(translator: *const IlotokiTranslator) -> c_int {
    let handle = ffi_ref!(translator, -1);
    match handle.translator.state().phase() {
        Phase::Idle => 0,
        Phase::Downloading => 1,
        Phase::Loading => 2,
        Phase::Ready => 3,
        Phase::Failed => 4,
    }
}

/// Get the download progress in whole percent
/// Returns -1 when not downloading or the size is unknown
#[unsafe(no_mangle)]
pub extern "C" fn ilotoki_translator_get_progress(translator: *const IlotokiTranslator) -> c_int {
    let handle = ffi_ref!(translator, -1);
    handle
        .translator
        .state()
        .progress()
        .and_then(|p| p.percent())
        .map_or(-1, c_int::from)
}

/// Get the one-line status ("Downloading model…", "Model ready", ...)
#[unsafe(no_mangle)]
pub extern "C" fn ilotoki_translator_get_status(
    translator: *mut IlotokiTranslator,
) -> *const c_char {
    let handle = ffi_mut!(translator, ptr::null());
    handle.strings.status = to_cstring(&handle.translator.status_line());
    handle.strings.status.as_ptr()
}

/// Get "x.xx / y.yy GiB" while downloading, or an empty string
#[unsafe(no_mangle)]
pub extern "C" fn ilotoki_translator_get_size_text(
    translator: *mut IlotokiTranslator,
) -> *const c_char {
    let handle = ffi_mut!(translator, ptr::null());
    let text = handle
        .translator
        .state()
        .progress()
        .and_then(|p| p.size_text())
        .unwrap_or_default();
    handle.strings.size_text = to_cstring(&text);
    handle.strings.size_text.as_ptr()
}

/// Get the current query text
#[unsafe(no_mangle)]
pub extern "C" fn ilotoki_translator_get_query(
    translator: *mut IlotokiTranslator,
) -> *const c_char {
    let handle = ffi_mut!(translator, ptr::null());
    handle.strings.query = to_cstring(&handle.translator.form().query);
    handle.strings.query.as_ptr()
}

/// Get the text of the last translation
#[unsafe(no_mangle)]
pub extern "C" fn ilotoki_translator_get_result(
    translator: *mut IlotokiTranslator,
) -> *const c_char {
    let handle = ffi_mut!(translator, ptr::null());
    handle.strings.result = to_cstring(handle.translator.result().text());
    handle.strings.result.as_ptr()
}

/// Returns 1 when translating from Toki Pona, 0 when translating into it
#[unsafe(no_mangle)]
pub extern "C" fn ilotoki_translator_from_toki_pona(translator: *const IlotokiTranslator) -> c_int {
    let handle = ffi_ref!(translator, 0);
    if handle.translator.form().from_toki_pona {
        1
    } else {
        0
    }
}

/// Returns 1 while a translation is running
#[unsafe(no_mangle)]
pub extern "C" fn ilotoki_translator_is_translating(translator: *const IlotokiTranslator) -> c_int {
    let handle = ffi_ref!(translator, 0);
    if handle.translator.is_translating() { 1 } else { 0 }
}

/// Get the index of the selected language (see `ilotoki_language_label`)
#[unsafe(no_mangle)]
pub extern "C" fn ilotoki_translator_get_language(translator: *const IlotokiTranslator) -> c_int {
    let handle = ffi_ref!(translator, -1);
    language_index(handle.translator.form().language) as c_int
}

/// Number of selectable languages
#[unsafe(no_mangle)]
pub extern "C" fn ilotoki_language_count() -> c_uint {
    Language::ALL.len() as c_uint
}

/// Get a language label by index, or null if out of range
#[unsafe(no_mangle)]
pub extern "C" fn ilotoki_language_label(index: c_uint) -> *const c_char {
    Language::ALL
        .get(index as usize)
        .map(|&l| language_label(l).as_ptr())
        .unwrap_or(ptr::null())
}

/// Get a language's flag emoji by index, or null if out of range
#[unsafe(no_mangle)]
pub extern "C" fn ilotoki_language_flag(index: c_uint) -> *const c_char {
    Language::ALL
        .get(index as usize)
        .map(|&l| language_flag(l).as_ptr())
        .unwrap_or(ptr::null())
}
