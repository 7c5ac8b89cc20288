//! Worker: state machine, lifecycle, and the per-worker task loop.

pub mod pool;

use std::{
	sync::{
		atomic::{AtomicU8, Ordering},
		Arc,
	},
	time::Instant,
};

use futures::StreamExt;
use serving_core::{error, warn};
use tokio::sync::Mutex;

use crate::{
	engine::{EngineAdapter, EngineHandle},
	job::Batch,
	model::ModelKey,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
	Starting = 0,
	Idle = 1,
	Busy = 2,
	Draining = 3,
	Dead = 4,
}

impl From<u8> for WorkerState {
	fn from(v: u8) -> Self {
		match v {
			| 0 => Self::Starting,
			| 1 => Self::Idle,
			| 2 => Self::Busy,
			| 3 => Self::Draining,
			| _ => Self::Dead,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u64);

/// A worker's device assignment: empty means the CPU pseudo-slot
/// (device id `-1`).
pub type DeviceSet = Vec<i64>;

/// Long-running executor bound to one device set. Owns its devices for its
/// lifetime; the pool releases them once this worker reaches `Dead`.
pub struct Worker {
	pub id: WorkerId,
	pub model: ModelKey,
	pub devices: DeviceSet,
	state: AtomicU8,
	last_active_at: Mutex<Instant>,
	handle: Mutex<Option<Box<dyn EngineHandle>>>,
}

impl Worker {
	#[must_use]
	pub fn new(id: WorkerId, model: ModelKey, devices: DeviceSet) -> Self {
		Self {
			id,
			model,
			devices,
			state: AtomicU8::new(WorkerState::Starting as u8),
			last_active_at: Mutex::new(Instant::now()),
			handle: Mutex::new(None),
		}
	}

	#[must_use]
	pub fn state(&self) -> WorkerState { WorkerState::from(self.state.load(Ordering::Acquire)) }

	fn set_state(&self, s: WorkerState) { self.state.store(s as u8, Ordering::Release); }

	pub async fn last_active_at(&self) -> Instant { *self.last_active_at.lock().await }

	async fn touch(&self) { *self.last_active_at.lock().await = Instant::now(); }

	/// `Starting -> Idle` on success, `Starting -> Dead` on failure. Returns
	/// the engine-load error so the pool can fail registration and release
	/// the worker's slots.
	pub async fn start(&self, engine: &Arc<dyn EngineAdapter>, model_url: &str, options: &serde_json::Value) -> serving_core::Result<()> {
		match engine.load(model_url, &self.devices, options).await {
			| Ok(handle) => {
				*self.handle.lock().await = Some(handle);
				self.set_state(WorkerState::Idle);
				self.touch().await;
				Ok(())
			},
			| Err(e) => {
				self.set_state(WorkerState::Dead);
				Err(e)
			},
		}
	}

	/// Signals this worker to drain: it finishes its current batch (if
	/// any) and then stops accepting new ones. Idempotent once the worker
	/// is already `Draining` or `Dead`.
	pub fn drain(&self) {
		let prev = WorkerState::from(self.state.swap(WorkerState::Draining as u8, Ordering::AcqRel));
		if matches!(prev, WorkerState::Dead) {
			self.set_state(WorkerState::Dead);
		}
	}

	#[must_use]
	pub fn accepts_work(&self) -> bool { matches!(self.state(), WorkerState::Idle) }

	/// Runs one batch to completion: `Idle -> Busy -> Idle`, or `-> Dead`
	/// on engine fault. Splits/routes output chunks to the job each belongs
	/// to and fails the batch's jobs with `ERR_WORKER_FAULT` on crash.
	pub async fn run_batch(&self, batch: Batch) {
		self.set_state(WorkerState::Busy);

		let handle_guard = self.handle.lock().await;
		let Some(handle) = handle_guard.as_ref() else {
			drop(handle_guard);
			self.fault(batch, "worker has no engine handle");
			return;
		};

		let payload = batch.jobs.iter().map(|j| j.payload.clone()).collect();
		let stream = match handle.infer(payload).await {
			| Ok(s) => s,
			| Err(e) => {
				drop(handle_guard);
				self.fault_with(batch, e);
				return;
			},
		};
		drop(handle_guard);

		let mut stream = stream;
		let mut delivered = vec![false; batch.jobs.len()];
		let mut crashed = false;
		while let Some(item) = stream.next().await {
			match item {
				| Ok(indexed) => {
					if let Some(job) = batch.jobs.get(indexed.job_index) {
						if job.result.publish(indexed.chunk.clone()).is_err() {
							warn!("backpressure dropping chunk for job");
						}
						if indexed.chunk.last {
							delivered[indexed.job_index] = true;
						}
					}
				},
				| Err(e) => {
					error!("engine stream error: {e}");
					crashed = true;
					break;
				},
			}
		}

		if crashed {
			// Jobs that never got a terminal chunk fail with ERR_WORKER_FAULT;
			// the missing-tail case from open question.
			for (job, done) in batch.jobs.iter().zip(delivered.iter()) {
				if !*done {
					job.result.publish_error(serving_core::err!(WorkerFault("engine crashed mid-batch")));
				}
			}
			self.set_state(WorkerState::Dead);
			return;
		}

		self.touch().await;
		if self.state() != WorkerState::Draining {
			self.set_state(WorkerState::Idle);
		} else {
			self.set_state(WorkerState::Dead);
		}
	}

	fn fault(&self, batch: Batch, reason: &str) { self.fault_with(batch, serving_core::err!(WorkerFault("{reason}"))); }

	fn fault_with(&self, batch: Batch, error: serving_core::Error) {
		for job in &batch.jobs {
			job.result.publish_error(serving_core::err!(WorkerFault("{error}")));
		}
		self.set_state(WorkerState::Dead);
	}

	pub async fn shutdown(&self) {
		if let Some(handle) = self.handle.lock().await.take() {
			handle.unload().await;
		}
		self.set_state(WorkerState::Dead);
	}
}
