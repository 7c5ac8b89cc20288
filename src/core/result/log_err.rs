use std::fmt;

use tracing::Level;

use super::Result;

/// Log an `Err` at the given level and pass the `Result` through unchanged.
/// Saves the common `if let Err(e) = &r { error!(...) }` dance at call
/// sites that want to observe a failure without handling it there.
pub trait ErrLog<T, E>
where
	E: fmt::Display,
{
	#[must_use]
	fn log_err(self, level: Level) -> Self;
}

impl<T, E> ErrLog<T, E> for Result<T, E>
where
	E: fmt::Display,
{
	fn log_err(self, level: Level) -> Self {
		if let Err(error) = &self {
			match level {
				| Level::ERROR => tracing::error!("{error}"),
				| Level::WARN => tracing::warn!("{error}"),
				| Level::INFO => tracing::info!("{error}"),
				| Level::DEBUG => tracing::debug!("{error}"),
				| Level::TRACE => tracing::trace!("{error}"),
			}
		}
		self
	}
}
