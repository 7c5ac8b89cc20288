mod err;

use std::{borrow::Cow, fmt};

pub use err::*;

/// Error kinds raised anywhere in the scheduling core. One enum, matching
/// the taxonomy in the error handling design: every fallible call returns
/// one of these, never an out-of-band control flow.
#[derive(thiserror::Error)]
pub enum Error {
	/// A model's device spec could not be parsed or makes no sense for the
	/// engine's capabilities.
	#[error("bad device spec: {0}")]
	BadSpec(Cow<'static, str>),

	/// The device registry or planner could not find enough free devices.
	#[error("no device capacity: {0}")]
	NoCapacity(Cow<'static, str>),

	/// The planner found some but not enough slots for the requested count.
	#[error("insufficient slots: wanted {wanted}, found {found}")]
	InsufficientSlots { wanted: usize, found: usize },

	/// A specific device range conflicts with existing occupancy.
	#[error("device range conflict: {0}")]
	Conflict(Cow<'static, str>),

	/// A pool's job queue is at capacity.
	#[error("queue full for model {0}")]
	QueueFull(Cow<'static, str>),

	/// The pool or server is shutting down and refuses new work.
	#[error("shutting down")]
	Shutdown,

	/// A worker died mid-batch; the batch's jobs are failed with this.
	#[error("worker fault: {0}")]
	WorkerFault(Cow<'static, str>),

	/// An engine adapter failed to load a model.
	#[error("engine load failed: {0}")]
	EngineLoad(Cow<'static, str>),

	/// A `StreamingResult::next` call timed out.
	#[error("timed out waiting for next chunk")]
	Timeout,

	/// A streaming consumer fell behind the backpressure watermark.
	#[error("backpressure: consumer did not drain in time")]
	Backpressure,

	/// A model with this id is already registered, or is not registered.
	#[error("{0}")]
	NotFound(Cow<'static, str>),

	#[error("{0}")]
	AlreadyExists(Cow<'static, str>),

	#[error("there was a problem with the '{0}' configuration item: {1}")]
	Config(&'static str, Cow<'static, str>),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("join error: {0}")]
	JoinError(#[from] tokio::task::JoinError),

	#[error("{0}")]
	ParseIntError(#[from] std::num::ParseIntError),

	#[error("{0}")]
	ParseFloatError(#[from] std::num::ParseFloatError),

	/// unique / untyped
	#[error("{0}")]
	Err(Cow<'static, str>),
}

impl Error {
	#[must_use]
	pub fn sanitized_string(&self) -> String {
		match self {
			| Self::Io(..) => String::from("I/O error occurred."),
			| _ => self.to_string(),
		}
	}
}

impl fmt::Debug for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{self}") }
}
