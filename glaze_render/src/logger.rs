//! Logging bootstrap. The library itself only uses the `log` facade;
//! binaries opt into env_logger with [`init`].

/// Initializes env_logger. Call once near program start; levels are
/// controlled with `RUST_LOG` as usual.
pub fn init() {
    env_logger::init();
}
