//! Admission Façade: the single entry point a front end (or the admin
//! console) calls through. Never touches the `DeviceRegistry` directly —
//! that stays behind the planner/pool boundary.

pub mod url;

use std::{collections::HashMap, sync::Arc, time::Duration};

use serving_core::{err, Err, Result};
use tokio::sync::RwLock;

use crate::{
	device::DeviceRegistry,
	engine::EngineAdapter,
	model::{DeviceKind, EngineKind, ModelInfo, ModelKey},
	streaming::StreamingResult,
	worker::pool::WorkerPool,
};

pub use url::{parse_model_url, ParsedModelUrl};

/// Maps an engine name (as named in a model-store URL or registration
/// call) to the adapter that runs it. One process may host several engine
/// kinds at once (e.g. a native engine and a Python one).
pub type EngineRegistry = HashMap<String, Arc<dyn EngineAdapter>>;

pub struct Admission {
	registry: Arc<DeviceRegistry>,
	device_kind: DeviceKind,
	engines: EngineRegistry,
	default_engine: String,
	pools: RwLock<HashMap<ModelKey, Arc<WorkerPool>>>,
}

impl Admission {
	#[must_use]
	pub fn new(registry: Arc<DeviceRegistry>, device_kind: DeviceKind, engines: EngineRegistry, default_engine: impl Into<String>) -> Self {
		Self {
			registry,
			device_kind,
			engines,
			default_engine: default_engine.into(),
			pools: RwLock::new(HashMap::new()),
		}
	}

	fn resolve_engine(&self, name: Option<&str>) -> Result<(Arc<dyn EngineAdapter>, EngineKind)> {
		let name = name.unwrap_or(&self.default_engine);
		let adapter = self
			.engines
			.get(name)
			.ok_or_else(|| err!(BadSpec("unknown engine {name:?}")))?
			.clone();
		let kind = if name.eq_ignore_ascii_case("python") {
			EngineKind::Python
		} else {
			EngineKind::Native
		};
		Ok((adapter, kind))
	}

	/// `register(modelName, version?, url, engine?, deviceSpec, batchSize,
	/// maxBatchDelayMs, maxIdleTimeMs) -> ok | err`. Runs the planner,
	/// acquires slots, and spawns the pool's workers; failure leaves no
	/// trace in the device registry.
	#[allow(clippy::too_many_arguments)]
	pub async fn register(
		&self,
		name: impl Into<String>,
		version: Option<String>,
		url: String,
		engine: Option<String>,
		device_spec: String,
		tp: usize,
		mpi: bool,
		max_workers: usize,
		batch_size: usize,
		max_batch_delay: Duration,
		max_idle_time: Duration,
	) -> Result<()> {
		let key = ModelKey::new(name, version);

		{
			let pools = self.pools.read().await;
			if pools.contains_key(&key) {
				return Err!(AlreadyExists("model {key} is already registered"));
			}
		}

		let (adapter, engine_kind) = self.resolve_engine(engine.as_deref())?;
		let accelerator_capable = adapter.capabilities().accelerator;

		let model = ModelInfo {
			key: key.clone(),
			engine: engine_kind,
			accelerator_capable,
			device_spec,
			tp,
			max_workers,
			batch_size,
			max_batch_delay,
			max_idle_time,
			mpi,
		};

		let pool = WorkerPool::register(model, url, serde_json::Value::Null, self.registry.clone(), self.device_kind, adapter).await?;

		tokio::spawn(pool.clone().run_batcher());
		tokio::spawn(pool.clone().run_idle_sweep());

		self.pools.write().await.insert(key, pool);
		Ok(())
	}

	/// `unregister(modelName, version?) -> ok`. Best-effort on an
	/// unknown model: already-absent is not an error.
	pub async fn unregister(&self, name: &str, version: Option<&str>) -> Result<()> {
		let key = lookup_key(name, version);
		let pool = self.pools.write().await.remove(&key);
		if let Some(pool) = pool {
			pool.unregister().await;
		}
		Ok(())
	}

	/// `scale(modelName, version?, minWorkers, maxWorkers) -> ok | err`.
	pub async fn scale(&self, name: &str, version: Option<&str>, min_workers: usize, max_workers: usize) -> Result<()> {
		let pool = self.pool_for(name, version).await?;
		pool.scale(min_workers, max_workers).await
	}

	/// `submit(modelName, version?, payload) -> StreamingResult`.
	pub async fn submit(&self, name: &str, version: Option<&str>, payload: Vec<u8>) -> Result<StreamingResult> {
		let pool = self.pool_for(name, version).await?;
		pool.submit(payload)
	}

	async fn pool_for(&self, name: &str, version: Option<&str>) -> Result<Arc<WorkerPool>> {
		let key = lookup_key(name, version);
		self.pools
			.read()
			.await
			.get(&key)
			.cloned()
			.ok_or_else(|| err!(NotFound("model {key} is not registered")))
	}

	/// A point-in-time listing for the admin console's `list` command.
	pub async fn list(&self) -> Vec<ModelKey> { self.pools.read().await.keys().cloned().collect() }

	/// Per-model stats for the admin console's `stat` command.
	pub async fn stat(&self, name: &str, version: Option<&str>) -> Result<PoolStat> {
		let pool = self.pool_for(name, version).await?;
		Ok(PoolStat {
			workers: pool.worker_count().await,
			queue_len: pool.queue_len(),
		})
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStat {
	pub workers: usize,
	pub queue_len: usize,
}

fn lookup_key(name: &str, version: Option<&str>) -> ModelKey { ModelKey::new(name, version.map(str::to_string)) }

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;
	use crate::{device::MaxShared, engine::fake};

	fn admission() -> Admission {
		let registry = Arc::new(DeviceRegistry::new(0, MaxShared::All));
		let mut engines: EngineRegistry = HashMap::new();
		engines.insert("native".into(), fake::arc());
		Admission::new(registry, DeviceKind::Cpu, engines, "native")
	}

	#[tokio::test]
	async fn register_then_submit_round_trip() {
		let admission = admission();
		admission
			.register("m1", None, "file:///m1".into(), None, String::new(), 1, false, 1, 4, Duration::from_millis(10), Duration::from_secs(60))
			.await
			.unwrap();

		let mut result = admission.submit("m1", None, b"hi".to_vec()).await.unwrap();
		let chunk = result.next(Duration::from_secs(1)).await.unwrap();
		assert!(matches!(chunk, crate::streaming::Next::Chunk(d) if d == b"hi"));
	}

	#[tokio::test]
	async fn double_register_is_rejected() {
		let admission = admission();
		admission
			.register("m1", None, "file:///m1".into(), None, String::new(), 1, false, 1, 4, Duration::from_millis(10), Duration::from_secs(60))
			.await
			.unwrap();
		let second = admission
			.register("m1", None, "file:///m1".into(), None, String::new(), 1, false, 1, 4, Duration::from_millis(10), Duration::from_secs(60))
			.await;
		assert!(second.is_err());
	}

	#[tokio::test]
	async fn submit_to_unknown_model_errors() {
		let admission = admission();
		assert!(admission.submit("nope", None, Vec::new()).await.is_err());
	}
}
