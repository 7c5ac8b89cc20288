use std::{
	sync::atomic::{AtomicBool, Ordering},
	time::SystemTime,
};

use tokio::{runtime, sync::broadcast};

use crate::{log, Config, Error, Result};

/// Process-wide server handle: configuration, shutdown signaling, and the
/// logging subsystem. No restart/reload/hot-module machinery here — the
/// device registry's invariants are process-lifetime, not reload-safe.
pub struct Server {
	pub config: Config,

	pub started: SystemTime,

	/// Shutdown desired indicator. Set once and never cleared.
	pub stopping: AtomicBool,

	pub runtime: Option<runtime::Handle>,

	/// Shutdown signal, broadcast to every worker/batcher/sweep task.
	pub signal: broadcast::Sender<&'static str>,

	pub log: log::Log,
}

impl Server {
	#[must_use]
	pub fn new(config: Config, runtime: Option<runtime::Handle>, log: log::Log) -> Self {
		Self {
			config,
			started: SystemTime::now(),
			stopping: AtomicBool::new(false),
			runtime,
			signal: broadcast::channel::<&'static str>(1).0,
			log,
		}
	}

	pub fn shutdown(&self) -> Result<()> {
		if self.stopping.swap(true, Ordering::AcqRel) {
			return Err(Error::Err("shutdown already in progress".into()));
		}

		self.signal("SIGTERM")
	}

	pub fn signal(&self, sig: &'static str) -> Result<()> {
		_ = self.signal.send(sig);
		Ok(())
	}

	#[inline]
	#[must_use]
	pub fn runtime(&self) -> &runtime::Handle { self.runtime.as_ref().expect("runtime handle available in Server") }

	#[inline]
	#[must_use]
	pub fn running(&self) -> bool { !self.stopping.load(Ordering::Acquire) }
}
