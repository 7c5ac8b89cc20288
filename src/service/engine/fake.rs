//! A fake [`EngineAdapter`] used by the worker pool's own tests and by
//! integration tests exercising end-to-end scheduling scenarios. Not a
//! mock framework: just the smallest thing that satisfies the trait.

use std::sync::{
	atomic::{AtomicBool, AtomicUsize, Ordering},
	Arc, Mutex,
};

use async_trait::async_trait;
use futures::{stream, StreamExt};
use serving_core::{err, Result};
use tokio::sync::Notify;

use super::{BatchPayload, EngineAdapter, EngineCapabilities, EngineHandle, EngineOptions, IndexedChunk};
use crate::streaming::Chunk;

/// Echoes each input payload back as a single chunk, per job, in order.
/// Optionally primed to fail on its Nth `infer` call, to exercise worker
/// fault handling in tests, to record the size of every batch it's handed
/// (to observe the batcher's grouping decisions from outside), or to hold
/// a batch open until released (to hold a worker `Busy` on demand).
pub struct FakeEngine {
	pub capabilities: EngineCapabilities,
	pub crash_after: Option<usize>,
	pub batch_sizes: Option<Arc<Mutex<Vec<usize>>>>,
	pub hold: Option<Arc<Notify>>,
}

impl Default for FakeEngine {
	fn default() -> Self {
		Self {
			capabilities: EngineCapabilities { accelerator: true, streaming: true },
			crash_after: None,
			batch_sizes: None,
			hold: None,
		}
	}
}

#[async_trait]
impl EngineAdapter for FakeEngine {
	async fn load(&self, _model_url: &str, devices: &[i64], _options: &EngineOptions) -> Result<Box<dyn EngineHandle>> {
		Ok(Box::new(FakeHandle {
			devices: devices.to_vec(),
			calls: AtomicUsize::new(0),
			crash_after: self.crash_after,
			batch_sizes: self.batch_sizes.clone(),
			hold: self.hold.clone(),
			unloaded: AtomicBool::new(false),
		}))
	}

	fn capabilities(&self) -> EngineCapabilities { self.capabilities }
}

struct FakeHandle {
	devices: Vec<i64>,
	calls: AtomicUsize,
	crash_after: Option<usize>,
	batch_sizes: Option<Arc<Mutex<Vec<usize>>>>,
	hold: Option<Arc<Notify>>,
	unloaded: AtomicBool,
}

#[async_trait]
impl EngineHandle for FakeHandle {
	async fn infer(&self, batch: BatchPayload) -> Result<futures::stream::BoxStream<'static, Result<IndexedChunk>>> {
		let call = self.calls.fetch_add(1, Ordering::AcqRel);
		if let Some(sizes) = &self.batch_sizes {
			sizes.lock().expect("batch size log poisoned").push(batch.len());
		}
		if self.crash_after.is_some_and(|n| call >= n) {
			return Err(err!(WorkerFault("fake engine crashed on devices {:?}", self.devices)));
		}
		if let Some(hold) = &self.hold {
			hold.notified().await;
		}

		let chunks = batch
			.into_iter()
			.enumerate()
			.map(|(job_index, payload)| Ok(IndexedChunk { job_index, chunk: Chunk::new(payload, true) }))
			.collect::<Vec<_>>();

		Ok(stream::iter(chunks).boxed())
	}

	async fn unload(self: Box<Self>) { self.unloaded.store(true, Ordering::Release); }
}

#[must_use]
pub fn arc() -> Arc<dyn EngineAdapter> { Arc::new(FakeEngine::default()) }
