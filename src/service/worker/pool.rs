//! Worker Pool: per-model fleet management, and the Batcher task that
//! drains the queue and hands batches to idle workers.

use std::{
	collections::BTreeMap,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc,
	},
	time::Duration,
};

use serving_core::{debug, err, info, warn, ErrLog, Err, Result};
use tokio::sync::{Notify, RwLock};

use super::{DeviceSet, Worker, WorkerId, WorkerState};
use crate::{
	device::{self, DeviceRegistry, HolderId},
	engine::EngineAdapter,
	job::{Job, JobId},
	model::{DeviceKind, ModelInfo},
	queue::JobQueue,
	streaming::StreamingResult,
};

/// Per-model fleet: workers, queue, and the scaling target. `workers.len()
/// == target` in steady state; during scaling it may temporarily differ.
pub struct WorkerPool {
	pub model: ModelInfo,
	registry: Arc<DeviceRegistry>,
	device_kind: DeviceKind,
	engine: Arc<dyn EngineAdapter>,
	model_url: String,
	options: serde_json::Value,

	queue: Arc<JobQueue>,
	workers: RwLock<BTreeMap<WorkerId, Arc<Worker>>>,
	target: AtomicU64,
	min_workers: AtomicU64,
	max_workers: AtomicU64,
	next_worker_id: AtomicU64,
	next_job_id: AtomicU64,
	shutting_down: std::sync::atomic::AtomicBool,
	idle_worker: Notify,
}

impl WorkerPool {
	/// Runs the planner, acquires slots, and spawns `|plan.slots|`
	/// workers. Atomic: if any worker fails to start, previously acquired
	/// slots are released and no workers are left alive.
	pub async fn register(
		model: ModelInfo,
		model_url: String,
		options: serde_json::Value,
		registry: Arc<DeviceRegistry>,
		device_kind: DeviceKind,
		engine: Arc<dyn EngineAdapter>,
	) -> Result<Arc<Self>> {
		let plan = device::plan(&model, &registry, device_kind)?;

		let capacity = model.batch_size * 2;
		let queue = Arc::new(JobQueue::new(capacity, model.batch_size, model.max_batch_delay));

		let pool = Arc::new(Self {
			min_workers: AtomicU64::new(1),
			max_workers: AtomicU64::new(model.max_workers.max(plan.slots.len()) as u64),
			target: AtomicU64::new(plan.slots.len() as u64),
			model,
			registry,
			device_kind,
			engine,
			model_url,
			options,
			queue,
			workers: RwLock::new(BTreeMap::new()),
			next_worker_id: AtomicU64::new(0),
			next_job_id: AtomicU64::new(0),
			shutting_down: std::sync::atomic::AtomicBool::new(false),
			idle_worker: Notify::new(),
		});

		let mut spawned = Vec::new();
		for slot in plan.slots {
			match pool.spawn_worker(slot, plan.exclusive).await {
				| Ok(worker) => spawned.push(worker),
				| Err(e) => {
					// Atomic registration: the failed slot released its own
					// acquisition internally; unwind everything spawned before it.
					for w in &spawned {
						pool.release_worker_devices(w).await;
					}
					return Err(e);
				},
			}
		}

		let mut workers = pool.workers.write().await;
		for w in spawned {
			workers.insert(w.id, w);
		}
		drop(workers);

		Ok(pool)
	}

	/// Devices are tracked in the registry under the worker's own id as the
	/// holder, so releasing a worker never needs to remember a separate
	/// holder token.
	async fn release_worker_devices(&self, worker: &Arc<Worker>) {
		let ids: Vec<usize> = worker.devices.iter().filter_map(|&d| usize::try_from(d).ok()).collect();
		if !ids.is_empty() {
			self.registry.release(HolderId(worker.id.0), &ids);
		}
	}

	async fn spawn_worker(&self, slot: Vec<usize>, exclusive: bool) -> Result<Arc<Worker>> {
		let id = WorkerId(self.next_worker_id.fetch_add(1, Ordering::Relaxed));
		let holder = HolderId(id.0);

		let acquired = if slot.is_empty() {
			Vec::new()
		} else if exclusive {
			self.registry.acquire_exclusive_at(holder, slot[0], slot.len())?
		} else {
			for &dev in &slot {
				self.registry.acquire_shared(holder, dev, 0, 0)?;
			}
			slot.clone()
		};

		// Empty devices is the CPU pseudo-slot (spec's `id = -1`).
		let devices: DeviceSet = acquired.iter().map(|&d| d as i64).collect();

		let worker = Arc::new(Worker::new(id, self.model.key.clone(), devices));
		if let Err(e) = worker.start(&self.engine, &self.model_url, &self.options).await {
			self.registry.release(holder, &acquired);
			return Err(err!(EngineLoad("worker failed to start: {e}")));
		}

		self.spawn_worker_task(worker.clone());
		Ok(worker)
	}

	/// Spawns the dedicated per-worker task: it parks waiting for a batch
	/// assignment and runs it when one arrives. Workers don't poll the
	/// queue themselves — the pool's batcher assigns batches directly — so
	/// this task body is really just "run whatever `run_batch` is called
	/// with", driven from `dispatch_loop`.
	fn spawn_worker_task(&self, _worker: Arc<Worker>) {
		// Intentionally a no-op: batches are driven synchronously from the
		// batcher's dispatch loop via `Worker::run_batch`, each call spawned
		// as its own task (see `dispatch_one`). A persistent per-worker task
		// would just be an extra hop with no additional concurrency, since
		// only one batch is ever in flight per worker at a time.
	}

	/// Drains the queue, matching idle workers to batches, round-robin.
	/// One instance of this loop runs per pool.
	pub async fn run_batcher(self: Arc<Self>) {
		let mut ticker = tokio::time::interval(self.model.max_batch_delay.max(Duration::from_millis(1)));
		let mut last_dispatch = tokio::time::Instant::now();

		loop {
			if self.shutting_down.load(Ordering::Acquire) && self.queue.is_empty() {
				return;
			}

			tokio::select! {
				() = self.queue.wait_for_work() => {},
				_ = ticker.tick() => {},
			}

			loop {
				let batch = if last_dispatch.elapsed() >= self.model.max_batch_delay && !self.queue.is_empty() {
					self.queue.take_whatever()
				} else {
					self.queue.try_take_batch()
				};

				let Some(batch) = batch else { break };
				last_dispatch = tokio::time::Instant::now();

				let Some(worker) = self.wait_for_idle_worker().await else {
					// Pool is shutting down with no workers left; fail the batch.
					for job in batch.jobs {
						job.result.publish_error(err!(Shutdown));
					}
					continue;
				};

				self.dispatch_one(worker, batch);
			}
		}
	}

	/// Round-robin over idle workers: picks the first `Idle` worker found,
	/// waiting on the idle-worker notification if none is currently free.
	/// The `Notified` future is registered before the state check so a
	/// worker freeing up between the check and the wait is never missed.
	async fn wait_for_idle_worker(&self) -> Option<Arc<Worker>> {
		loop {
			let notified = self.idle_worker.notified();

			{
				let workers = self.workers.read().await;
				if workers.values().all(|w| w.state() == WorkerState::Dead) && workers.is_empty() {
					return None;
				}
				if let Some(w) = workers.values().find(|w| w.accepts_work()) {
					return Some(w.clone());
				}
			}
			if self.shutting_down.load(Ordering::Acquire) && self.workers.read().await.is_empty() {
				return None;
			}
			notified.await;
		}
	}

	/// Runs a batch on `worker` as its own task so the batcher loop is
	/// never blocked on a slow inference call; on completion (or fault)
	/// the worker's state transition wakes the next `wait_for_idle_worker`.
	/// The worker is marked `Busy` synchronously before spawning so the
	/// batcher's next iteration can't hand it a second batch in the window
	/// before the spawned task actually runs.
	fn dispatch_one(self: &Arc<Self>, worker: Arc<Worker>, batch: crate::job::Batch) {
		worker.set_state(WorkerState::Busy);
		let pool = self.clone();
		tokio::spawn(async move {
			worker.run_batch(batch).await;
			if worker.state() == WorkerState::Dead {
				pool.handle_worker_death(worker).await;
			}
			pool.idle_worker.notify_waiters();
		});
	}

	/// A worker that died (fault or finished draining) has its devices
	/// released; if the pool still wants more workers than it has, a
	/// replacement is spawned. Background work: logs and continues, never
	/// crashes the process.
	async fn handle_worker_death(self: &Arc<Self>, worker: Arc<Worker>) {
		self.release_worker_devices(&worker).await;
		self.workers.write().await.remove(&worker.id);

		if self.shutting_down.load(Ordering::Acquire) {
			return;
		}

		let target = self.target.load(Ordering::Acquire) as usize;
		if self.workers.read().await.len() < target {
			if self
				.clone()
				.spawn_replacement()
				.await
				.log_err(tracing::Level::WARN)
				.is_ok()
			{
				info!("spawned replacement worker for model {}", self.model.key);
			}
		}
	}

	/// Retires a worker: if it's sitting `Idle` there is no in-flight batch
	/// to wait out, so it's shut down and removed immediately. A `Busy`
	/// worker is only marked `Draining` here — `dispatch_one` finalizes it
	/// once its current batch finishes.
	async fn retire(self: &Arc<Self>, worker: Arc<Worker>) {
		if worker.accepts_work() {
			worker.drain();
			worker.shutdown().await;
			self.release_worker_devices(&worker).await;
			self.workers.write().await.remove(&worker.id);
		} else {
			worker.drain();
		}
	}

	async fn spawn_replacement(self: Arc<Self>) -> Result<()> {
		let plan = device::plan(&self.model, &self.registry, self.device_kind)?;
		let Some(slot) = plan.slots.into_iter().next() else {
			return Err!(NoCapacity("no slot available for replacement worker"));
		};
		let worker = self.spawn_worker(slot, plan.exclusive).await?;
		self.workers.write().await.insert(worker.id, worker);
		self.idle_worker.notify_waiters();
		Ok(())
	}

	/// `submit(Job) -> StreamingResult | ERR_QUEUE_FULL | ERR_SHUTDOWN`.
	pub fn submit(&self, payload: Vec<u8>) -> Result<StreamingResult> {
		if self.shutting_down.load(Ordering::Acquire) {
			return Err!(Shutdown);
		}

		let (producer, consumer) = crate::streaming::channel();
		let job = Job {
			id: JobId(self.next_job_id.fetch_add(1, Ordering::Relaxed)),
			model: self.model.key.clone(),
			payload,
			result: producer,
			created_at: std::time::Instant::now(),
		};

		self.queue.push(job)?;
		Ok(consumer)
	}

	/// Adjusts `target`. Up-scaling acquires additional slots (may fail
	/// with `ERR_NO_CAPACITY`, leaving the pool unchanged); down-scaling
	/// picks the most recently idle workers to drain first.
	pub async fn scale(self: &Arc<Self>, min_workers: usize, max_workers: usize) -> Result<()> {
		self.min_workers.store(min_workers.max(1) as u64, Ordering::Release);
		self.max_workers.store(max_workers.max(min_workers).max(1) as u64, Ordering::Release);

		let current = self.workers.read().await.len();
		let target = max_workers.max(min_workers).max(1);
		self.target.store(target as u64, Ordering::Release);

		if target == current {
			return Ok(());
		}

		if target > current {
			for _ in current..target {
				if let Err(e) = self.clone().spawn_replacement().await {
					warn!("scale-up could not add a worker for model {}: {e}", self.model.key);
					return Err(e);
				}
			}
			return Ok(());
		}

		// Scale down: pick the most recently idle workers to drain first.
		let mut candidates: Vec<Arc<Worker>> = self.workers.read().await.values().cloned().collect();
		let mut with_age = Vec::with_capacity(candidates.len());
		for w in candidates.drain(..) {
			let age = w.last_active_at().await;
			with_age.push((age, w));
		}
		with_age.sort_by_key(|(age, _)| std::cmp::Reverse(*age));

		let to_drain = current.saturating_sub(target);
		for (_, w) in with_age.into_iter().take(to_drain) {
			self.retire(w).await;
		}
		self.idle_worker.notify_waiters();

		Ok(())
	}

	/// Sets target to 0, stops accepting new jobs, and lets in-flight
	/// batches finish before transitioning every worker to `Draining` then
	/// `Dead`, releasing their devices.
	pub async fn unregister(self: &Arc<Self>) {
		self.shutting_down.store(true, Ordering::Release);
		self.target.store(0, Ordering::Release);

		let workers: Vec<Arc<Worker>> = self.workers.read().await.values().cloned().collect();
		for w in workers {
			self.retire(w).await;
		}
		self.idle_worker.notify_waiters();

		// Wait for every worker to reach Dead, then release their devices.
		loop {
			let remaining = self.workers.read().await.len();
			if remaining == 0 {
				break;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	}

	/// Background sweep: retires workers idle longer than `maxIdleTime`,
	/// never dropping below `max(1, minWorkers)`. Runs on a period
	/// `<= τ/2`.
	pub async fn run_idle_sweep(self: Arc<Self>) {
		let period = (self.model.max_idle_time / 2).max(Duration::from_millis(50));
		let mut ticker = tokio::time::interval(period);

		loop {
			ticker.tick().await;
			if self.shutting_down.load(Ordering::Acquire) {
				return;
			}

			let min = self.min_workers.load(Ordering::Acquire).max(1) as usize;
			let workers: Vec<Arc<Worker>> = self
				.workers
				.read()
				.await
				.values()
				.filter(|w| w.accepts_work())
				.cloned()
				.collect();

			let mut live_count = self.workers.read().await.len();
			for w in workers {
				if live_count <= min.max(1) {
					break;
				}
				let idle_since = w.last_active_at().await;
				if idle_since.elapsed() >= self.model.max_idle_time {
					debug!(idle_ms = serving_core::utils::time::elapsed_ms(idle_since), "retiring idle worker for model {}", self.model.key);
					self.retire(w).await;
					live_count -= 1;
				}
			}
		}
	}

	#[must_use]
	pub async fn worker_count(&self) -> usize { self.workers.read().await.len() }

	#[must_use]
	pub fn queue_len(&self) -> usize { self.queue.len() }
}

/// End-to-end scenarios run against the `FakeEngine` directly through the
/// pool rather than through the admission façade, so tests can inspect
/// worker state that the façade intentionally doesn't expose.
#[cfg(test)]
mod tests {
	use std::{
		sync::Mutex as StdMutex,
		time::Duration,
	};

	use tokio::sync::Notify;

	use super::*;
	use crate::{
		device::MaxShared,
		engine::fake::FakeEngine,
		model::{EngineKind, ModelKey},
		streaming::Next,
	};

	fn model(name: &str, max_workers: usize, batch_size: usize, delay_ms: u64) -> ModelInfo {
		ModelInfo {
			key: ModelKey::new(name, None),
			engine: EngineKind::Native,
			accelerator_capable: true,
			device_spec: String::new(),
			tp: 1,
			max_workers,
			batch_size,
			max_batch_delay: Duration::from_millis(delay_ms),
			max_idle_time: Duration::from_secs(60),
			mpi: false,
		}
	}

	async fn register(model: ModelInfo, engine: Arc<dyn EngineAdapter>) -> Arc<WorkerPool> {
		let registry = Arc::new(DeviceRegistry::new(0, MaxShared::All));
		let pool = WorkerPool::register(model, "file:///m".into(), serde_json::Value::Null, registry, DeviceKind::Cpu, engine)
			.await
			.unwrap();
		tokio::spawn(pool.clone().run_batcher());
		pool
	}

	/// Scenario: CPU registration followed by a single job.
	#[tokio::test]
	async fn cpu_registration_single_job() {
		let pool = register(model("m1", 1, 4, 10), Arc::new(FakeEngine::default())).await;

		let mut result = pool.submit(b"hello".to_vec()).unwrap();
		let chunk = result.next(Duration::from_secs(1)).await.unwrap();
		assert!(matches!(chunk, Next::Chunk(d) if d == b"hello"));
		assert!(matches!(result.next(Duration::from_secs(1)).await.unwrap(), Next::End));
	}

	/// Scenario: three jobs submitted within the batch delay are dispatched
	/// together once the delay elapses, below the configured batch size.
	#[tokio::test]
	async fn batching_threshold_groups_pending_jobs() {
		let batch_sizes = Arc::new(StdMutex::new(Vec::new()));
		let engine = FakeEngine {
			batch_sizes: Some(batch_sizes.clone()),
			..FakeEngine::default()
		};
		let pool = register(model("m1", 1, 4, 40), Arc::new(engine)).await;

		let mut results = Vec::new();
		for i in 0..3 {
			results.push(pool.submit(format!("job-{i}").into_bytes()).unwrap());
		}

		for result in &mut results {
			let chunk = result.next(Duration::from_secs(1)).await.unwrap();
			assert!(matches!(chunk, Next::Chunk(_)));
		}

		let sizes = batch_sizes.lock().unwrap().clone();
		assert_eq!(sizes, vec![3], "all three jobs should land in a single batch below batch_size");
	}

	/// Scenario: a worker that faults mid-batch fails its jobs and is
	/// replaced automatically, without the pool getting stuck.
	#[tokio::test]
	async fn worker_fault_spawns_replacement() {
		let engine = FakeEngine { crash_after: Some(0), ..FakeEngine::default() };
		let pool = register(model("m1", 1, 1, 5), Arc::new(engine)).await;

		let mut first = pool.submit(b"one".to_vec()).unwrap();
		assert!(first.next(Duration::from_secs(1)).await.is_err());

		let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
		loop {
			if pool.worker_count().await == 1 {
				break;
			}
			assert!(tokio::time::Instant::now() < deadline, "replacement worker never arrived");
			tokio::time::sleep(Duration::from_millis(5)).await;
		}

		// The replacement is primed to crash too: the pool keeps accepting
		// and failing work rather than wedging.
		let mut second = pool.submit(b"two".to_vec()).unwrap();
		assert!(second.next(Duration::from_secs(1)).await.is_err());
	}

	/// Scenario: scaling down while some workers are mid-batch drains idle
	/// workers first and leaves busy ones to finish.
	#[tokio::test]
	async fn scale_down_drains_idle_before_busy() {
		let hold = Arc::new(Notify::new());
		let engine = FakeEngine { hold: Some(hold.clone()), ..FakeEngine::default() };
		let pool = register(model("m1", 1, 1, 5), Arc::new(engine)).await;

		pool.scale(4, 4).await.unwrap();
		assert_eq!(pool.worker_count().await, 4);

		let mut busy = Vec::new();
		for i in 0..2 {
			busy.push(pool.submit(format!("busy-{i}").into_bytes()).unwrap());
		}

		let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
		loop {
			let busy_count = pool.workers.read().await.values().filter(|w| w.state() == WorkerState::Busy).count();
			if busy_count == 2 {
				break;
			}
			assert!(tokio::time::Instant::now() < deadline, "jobs never reached two workers");
			tokio::time::sleep(Duration::from_millis(5)).await;
		}

		pool.scale(2, 2).await.unwrap();
		assert_eq!(pool.worker_count().await, 2, "idle workers should drain immediately, busy ones survive");

		hold.notify_waiters();
		for result in &mut busy {
			assert!(matches!(result.next(Duration::from_secs(1)).await.unwrap(), Next::Chunk(_)));
		}
		assert_eq!(pool.worker_count().await, 2, "busy workers that finish without being drained stay in the pool");
	}
}
