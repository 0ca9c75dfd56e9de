//! The `extern "C"` boundary.
//!
//! Every exported symbol mirrors one operation in [`crate::engine`]
//! one-to-one, translating between Rust types and the C ABI shapes the
//! spec mandates: non-owning `*const c_char` in, heap-allocated
//! `CString`/byte-buffer out (caller frees), sentinel-on-failure instead of
//! an error channel. A [`crate::engine::catch_panic`] shim wraps every
//! function body so a panic in handler code cannot unwind across the
//! boundary.

use std::{
    ffi::{c_char, CStr, CString},
    panic::AssertUnwindSafe,
    ptr, slice,
};

use bytes::Bytes;

use crate::engine::{self, catch_panic};

fn c_char_as_str<'a>(input: *const c_char) -> &'a str {
    if input.is_null() {
        ""
    } else {
        unsafe { CStr::from_ptr(input) }.to_str().unwrap_or("")
    }
}

fn str_to_c_char(input: &str) -> *mut c_char {
    #[expect(clippy::unwrap_used, reason = "engine-produced strings never contain interior NUL bytes")]
    CString::new(input).unwrap().into_raw()
}

fn bytes_from_raw(bytes: *const u8, len: usize) -> Bytes {
    if bytes.is_null() || len == 0 {
        Bytes::new()
    } else {
        Bytes::copy_from_slice(unsafe { slice::from_raw_parts(bytes, len) })
    }
}

/// `CreateHandler(name, urn) -> char* error_or_null`. Caller frees a
/// non-null return with [`drop_string`].
///
/// # Safety
/// `name` and `urn` must each be a valid, NUL-terminated C string pointer
/// or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weaver_create_handler(name: *const c_char, urn: *const c_char) -> *mut c_char {
    catch_panic(AssertUnwindSafe(|| {
        let name = c_char_as_str(name);
        let urn = c_char_as_str(urn);
        match engine::create_handler(name, urn) {
            Ok(()) => ptr::null_mut(),
            Err(message) => str_to_c_char(&message),
        }
    }))
    .unwrap_or(ptr::null_mut())
}

/// `DestroyHandler(name)`.
///
/// # Safety
/// `name` must be a valid, NUL-terminated C string pointer or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weaver_destroy_handler(name: *const c_char) {
    catch_panic(AssertUnwindSafe(|| engine::destroy_handler(c_char_as_str(name))));
}

/// `CreateRequest(handler_name) -> id` (0 on failure).
///
/// # Safety
/// `handler_name` must be a valid, NUL-terminated C string pointer or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weaver_create_request(handler_name: *const c_char) -> u32 {
    catch_panic(AssertUnwindSafe(|| engine::create_request(c_char_as_str(handler_name)))).unwrap_or(0)
}

/// `BeginRequest(id, header_block)`.
///
/// # Safety
/// `header_block` must be a valid, NUL-terminated C string pointer or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weaver_begin_request(id: u32, header_block: *const c_char) {
    catch_panic(AssertUnwindSafe(|| engine::begin_request(id, c_char_as_str(header_block))));
}

/// `PollRequest(id, block) -> char* command`. Caller frees with
/// [`drop_string`].
#[unsafe(no_mangle)]
pub extern "C" fn weaver_poll_request(id: u32, block: i32) -> *mut c_char {
    catch_panic(AssertUnwindSafe(|| str_to_c_char(&engine::poll_request(id, block != 0).to_wire())))
        .unwrap_or(ptr::null_mut())
}

/// `SendRequestBodyChunk(id, last, bytes, len)`.
///
/// # Safety
/// `bytes` must point to at least `len` readable bytes, or be null with
/// `len == 0`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weaver_send_request_body_chunk(id: u32, last: i32, bytes: *const u8, len: usize) {
    catch_panic(AssertUnwindSafe(|| {
        engine::send_request_body_chunk(id, last != 0, bytes_from_raw(bytes, len));
    }));
}

/// `FreeRequest(id)`.
#[unsafe(no_mangle)]
pub extern "C" fn weaver_free_request(id: u32) {
    catch_panic(AssertUnwindSafe(|| engine::free_request(id)));
}

/// `CreateResponse(handler_name) -> rid`.
///
/// # Safety
/// `handler_name` must be a valid, NUL-terminated C string pointer or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weaver_create_response(handler_name: *const c_char) -> u32 {
    catch_panic(AssertUnwindSafe(|| engine::create_response(c_char_as_str(handler_name)))).unwrap_or(0)
}

/// `BeginResponse(rid, request_id, status_code, header_block)`.
///
/// # Safety
/// `header_block` must be a valid, NUL-terminated C string pointer or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weaver_begin_response(
    rid: u32,
    request_id: u32,
    status_code: u16,
    header_block: *const c_char,
) {
    catch_panic(AssertUnwindSafe(|| {
        engine::begin_response(rid, request_id, status_code, c_char_as_str(header_block));
    }));
}

/// `PollResponse(rid, block) -> char* command`. Caller frees with
/// [`drop_string`].
#[unsafe(no_mangle)]
pub extern "C" fn weaver_poll_response(rid: u32, block: i32) -> *mut c_char {
    catch_panic(AssertUnwindSafe(|| str_to_c_char(&engine::poll_response(rid, block != 0).to_wire())))
        .unwrap_or(ptr::null_mut())
}

/// `SendResponseBodyChunk(rid, last, bytes, len)`.
///
/// # Safety
/// `bytes` must point to at least `len` readable bytes, or be null with
/// `len == 0`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weaver_send_response_body_chunk(rid: u32, last: i32, bytes: *const u8, len: usize) {
    catch_panic(AssertUnwindSafe(|| {
        engine::send_response_body_chunk(rid, last != 0, bytes_from_raw(bytes, len));
    }));
}

/// `FreeResponse(rid)`.
#[unsafe(no_mangle)]
pub extern "C" fn weaver_free_response(rid: u32) {
    catch_panic(AssertUnwindSafe(|| engine::free_response(rid)));
}

/// A byte buffer heap-allocated for the host, paired with its length.
/// Freed with [`weaver_release_bytes`].
#[repr(C)]
pub struct WeaverBytes {
    /// Pointer to the first byte, or null if the chunk was unknown.
    pub data: *mut u8,
    /// Number of bytes at `data`.
    pub len: usize,
}

/// `GetChunk(chunk_id) -> bytes*`. Caller frees with
/// [`weaver_release_bytes`]; `data` is null if `chunk_id` is unknown.
#[unsafe(no_mangle)]
pub extern "C" fn weaver_get_chunk(chunk_id: u32) -> WeaverBytes {
    catch_panic(AssertUnwindSafe(|| match engine::get_chunk(chunk_id) {
        Some(bytes) => {
            let mut boxed = bytes.to_vec().into_boxed_slice();
            let data = boxed.as_mut_ptr();
            let len = boxed.len();
            std::mem::forget(boxed);
            WeaverBytes { data, len }
        }
        None => WeaverBytes { data: ptr::null_mut(), len: 0 },
    }))
    .unwrap_or(WeaverBytes { data: ptr::null_mut(), len: 0 })
}

/// Free a [`WeaverBytes`] previously returned by [`weaver_get_chunk`].
///
/// # Safety
/// `bytes` must be the unmodified return value of a prior
/// [`weaver_get_chunk`] call, and must not be freed twice.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weaver_release_bytes(bytes: WeaverBytes) {
    if !bytes.data.is_null() {
        drop(unsafe { Box::from_raw(slice::from_raw_parts_mut(bytes.data, bytes.len)) });
    }
}

/// `GetChunkLength(chunk_id) -> length`.
#[unsafe(no_mangle)]
pub extern "C" fn weaver_get_chunk_length(chunk_id: u32) -> u32 {
    catch_panic(AssertUnwindSafe(|| engine::get_chunk_length(chunk_id))).unwrap_or(0)
}

/// `ReleaseChunk(chunk_id)`.
#[unsafe(no_mangle)]
pub extern "C" fn weaver_release_chunk(chunk_id: u32) {
    catch_panic(AssertUnwindSafe(|| engine::release_chunk(chunk_id)));
}

/// Free a string previously returned by any `weaver_*` function that
/// documents a `char*` return value.
///
/// # Safety
/// `s` must be the unmodified return value of such a call, or null, and
/// must not be freed twice.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn drop_string(s: *mut c_char) {
    if !s.is_null() {
        drop(unsafe { CString::from_raw(s) });
    }
}
