mod log_err;

pub use log_err::ErrLog;

/// The crate-wide `Result` alias. Every fallible call in the scheduling core
/// returns this rather than a bespoke error type per module.
pub type Result<T = (), E = crate::Error> = std::result::Result<T, E>;
