//! Error handling infrastructure for the renderer core.
//!
//! Errors carry an FFI-compatible numeric code so host bindings can
//! report failures without unwinding across the boundary, plus a
//! thread-local "last error" slot holding the formatted message of
//! the most recent failure (the `errno` pattern).
//!
//! # Error Code Ranges
//!
//! | Range     | Category | Description                              |
//! |-----------|----------|------------------------------------------|
//! | 0         | Success  | Operation completed successfully         |
//! | 1-99      | Resource | Host-side allocation / capacity failures |
//! | 100-199   | Gpu      | Failures reported by the GPU backend     |
//! | 200-299   | Shader   | Shader compile / program link failures   |
//! | 300-399   | Format   | Unsupported pixel-format combinations    |
//! | 900-999   | State    | Invalid renderer state                   |

use std::cell::RefCell;

use thiserror::Error;

/// FFI-compatible error code type.
pub type RenderErrorCode = i32;

/// Operation completed successfully.
pub const SUCCESS: RenderErrorCode = 0;

/// Host-side allocation failed or a fixed capacity was exceeded.
pub const ERR_RESOURCE_EXHAUSTED: RenderErrorCode = 1;

/// The GPU backend reported an error for a call issued by the core.
pub const ERR_GPU_BACKEND: RenderErrorCode = 100;

/// Shader compilation failed.
pub const ERR_SHADER_COMPILE_FAILED: RenderErrorCode = 200;

/// Program linking failed.
pub const ERR_PROGRAM_LINK_FAILED: RenderErrorCode = 201;

/// Texture format outside the supported set, or a cross-format
/// render-target copy not covered by the swizzle table.
pub const ERR_UNSUPPORTED_FORMAT: RenderErrorCode = 300;

/// Operation issued against invalid renderer state (incomplete
/// framebuffer, destroyed resource, null draw arguments).
pub const ERR_INVALID_STATE: RenderErrorCode = 900;

/// The main error type for the renderer core.
///
/// Each variant maps to a stable numeric code via
/// [`RenderError::error_code`]; the message side is free-form and is
/// what lands in the thread-local last-error slot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// Host allocation failed or a per-call capacity was exceeded.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The GPU backend reported an error. `error` is the translated
    /// constant name (e.g. `GL_INVALID_OPERATION`), `prefix` the
    /// call-site tag supplied by the polling code.
    #[error("{prefix}: GPU error {error}")]
    GpuBackend {
        prefix: String,
        error: &'static str,
    },

    /// Shader compilation failed; carries the info log when the
    /// backend could produce one.
    #[error("failed to compile shader: {0}")]
    ShaderCompileFailed(String),

    /// Program linking failed; carries the info log when available.
    #[error("failed to link shader program: {0}")]
    ProgramLinkFailed(String),

    /// Texture format not in the allowed set, or a cross-format
    /// render-target combination the swizzle table does not cover.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Framebuffer incomplete, destroyed resource, or another
    /// invalid-state condition.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl RenderError {
    /// Returns the FFI-compatible error code for this error.
    #[inline]
    pub const fn error_code(&self) -> RenderErrorCode {
        match self {
            RenderError::ResourceExhausted(_) => ERR_RESOURCE_EXHAUSTED,
            RenderError::GpuBackend { .. } => ERR_GPU_BACKEND,
            RenderError::ShaderCompileFailed(_) => ERR_SHADER_COMPILE_FAILED,
            RenderError::ProgramLinkFailed(_) => ERR_PROGRAM_LINK_FAILED,
            RenderError::UnsupportedFormat(_) => ERR_UNSUPPORTED_FORMAT,
            RenderError::InvalidState(_) => ERR_INVALID_STATE,
        }
    }

    /// Returns the error category as a static string.
    #[inline]
    pub const fn category(&self) -> &'static str {
        error_category(self.error_code())
    }
}

/// A specialized `Result` for renderer operations.
pub type RenderResult<T> = Result<T, RenderError>;

/// Returns the category name for an error code.
#[inline]
pub const fn error_category(code: RenderErrorCode) -> &'static str {
    match code {
        SUCCESS => "Success",
        1..=99 => "Resource",
        100..=199 => "Gpu",
        200..=299 => "Shader",
        300..=399 => "Format",
        900..=999 => "State",
        _ => "Unknown",
    }
}

thread_local! {
    /// Last error for the current thread. Errors never cross thread
    /// boundaries, matching `errno` semantics.
    static LAST_ERROR: RefCell<Option<RenderError>> = const { RefCell::new(None) };
}

/// Stores `error` as the current thread's last error.
pub fn set_last_error(error: RenderError) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = Some(error);
    });
}

/// Removes and returns the current thread's last error.
pub fn take_last_error() -> Option<RenderError> {
    LAST_ERROR.with(|e| e.borrow_mut().take())
}

/// Returns the code of the last error, or [`SUCCESS`] if none is set.
/// Does not clear the slot.
pub fn last_error_code() -> RenderErrorCode {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|err| err.error_code())
            .unwrap_or(SUCCESS)
    })
}

/// Returns the formatted message of the last error, if any.
pub fn last_error_message() -> Option<String> {
    LAST_ERROR.with(|e| e.borrow().as_ref().map(|err| err.to_string()))
}

/// Clears the current thread's last error.
pub fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Records `error` in the last-error slot and returns it, so fallible
/// paths can `return Err(record(err))` in one step.
pub fn record(error: RenderError) -> RenderError {
    set_last_error(error.clone());
    error
}
