//! Wires the process's singletons together: one [`DeviceRegistry`] and one
//! [`Admission`] façade, constructed once at startup and shared by every
//! caller for the life of the process. A flat struct rather than a
//! dependency-injection container — there are exactly two long-lived
//! singletons here and no dependency graph between them worth generalizing.

use std::sync::Arc;

use serving_core::{Config, Result};

use crate::{
	admission::{Admission, EngineRegistry},
	device::{DeviceRegistry, MaxShared},
	model::DeviceKind,
};

pub struct Services {
	pub registry: Arc<DeviceRegistry>,
	pub admission: Arc<Admission>,
}

impl Services {
	/// Builds the registry from `config.shared_devices`/the probed device
	/// count, and the admission façade over the caller-supplied engine set.
	pub fn build(config: &Config, device_count: usize, device_kind: DeviceKind, engines: EngineRegistry, default_engine: &str) -> Result<Self> {
		let max_shared = MaxShared::parse(config.shared_devices.as_deref(), device_count)?;
		let registry = Arc::new(DeviceRegistry::new(device_count, max_shared));
		let admission = Arc::new(Admission::new(registry.clone(), device_kind, engines, default_engine));
		Ok(Self { registry, admission })
	}
}
