//! Data model: `ModelInfo` and small supporting types shared across the
//! planner, pool, and admission façade.

use std::{fmt, time::Duration};

/// `(name, version)` pair identifying a registered model. Matches the
/// model-store URL grammar's `<name>[:<ver>]` prefix.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelKey {
	pub name: String,
	pub version: Option<String>,
}

impl ModelKey {
	#[must_use]
	pub fn new(name: impl Into<String>, version: Option<String>) -> Self {
		Self { name: name.into(), version }
	}
}

impl fmt::Display for ModelKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.version {
			| Some(v) => write!(f, "{}:{v}", self.name),
			| None => write!(f, "{}", self.name),
		}
	}
}

/// Which device kind the process's accelerator pool (if any) is made of.
/// The design explicitly assumes a single accelerator kind per process; a
/// heterogeneous mix is an open question resolved out of scope (see
/// DESIGN.md).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceKind {
	Cpu,
	Gpu,
	Accelerator,
}

/// Coarse engine classification, just enough for the planner's default
/// exclusivity rule ("Python engine on an Accelerator platform").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineKind {
	Python,
	Native,
}

/// Immutable descriptor for a registered model.
#[derive(Clone, Debug)]
pub struct ModelInfo {
	pub key: ModelKey,
	pub engine: EngineKind,
	pub accelerator_capable: bool,
	pub device_spec: String,
	pub tp: usize,
	pub max_workers: usize,
	pub batch_size: usize,
	pub max_batch_delay: Duration,
	pub max_idle_time: Duration,
	pub mpi: bool,
}

impl ModelInfo {
	/// `devicesPerSlot = tp × (mpi ? mw : 1)`.
	#[must_use]
	pub fn devices_per_slot(&self) -> usize { self.tp * if self.mpi { self.max_workers } else { 1 } }
}
