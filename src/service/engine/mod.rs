//! The engine adapter interface: an external collaborator the
//! core only calls *through*. Engine execution itself is out of scope;
//! this module specifies the boundary precisely enough to compile and test
//! the worker pool against a fake.

#[cfg(any(test, feature = "testing"))]
pub mod fake;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serving_core::Result;

use crate::streaming::Chunk;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineCapabilities {
	pub accelerator: bool,
	pub streaming: bool,
}

/// Options passed through to `load`; left intentionally opaque (serialized
/// JSON or similar) since their shape is entirely engine-specific.
pub type EngineOptions = serde_json::Value;

/// One payload item per job in a batch, in dispatch order.
pub type BatchPayload = Vec<Vec<u8>>;

#[async_trait]
pub trait EngineAdapter: Send + Sync {
	/// Loads a model instance bound to `devices` (a CPU slot is the empty
	/// slice).
	async fn load(
		&self,
		model_url: &str,
		devices: &[i64],
		options: &EngineOptions,
	) -> Result<Box<dyn EngineHandle>>;

	fn capabilities(&self) -> EngineCapabilities;
}

#[async_trait]
pub trait EngineHandle: Send + Sync {
	/// Runs a batch and returns a stream of per-job output chunks. Whether
	/// unbatching happens in the engine or the worker is decided by the
	/// worker, not this trait: if the engine streams per-job it tags each
	/// chunk with the job's index; if it returns one combined output the
	/// worker splits it itself.
	async fn infer(&self, batch: BatchPayload) -> Result<BoxStream<'static, Result<IndexedChunk>>>;

	async fn unload(self: Box<Self>);
}

/// A chunk tagged with which job (by position in the dispatched batch) it
/// belongs to, so the worker can route it to the right `StreamingResult`
/// without caring whether the engine streamed per-job or returned one
/// combined output.
#[derive(Clone, Debug)]
pub struct IndexedChunk {
	pub job_index: usize,
	pub chunk: Chunk,
}
