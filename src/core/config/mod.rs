pub mod manager;

use std::path::PathBuf;

use serde::Deserialize;

pub use self::manager::Manager;
use crate::{Err, Result};

/// All config options for the scheduling core.
///
/// Loaded by [`Manager::load`] from a TOML file layered under
/// `SERVING_`-prefixed environment variables: file first, environment
/// overrides.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	/// Filesystem root the model-repository download layer resolves model
	/// URLs under. Consumed from `SERVING_MODEL_STORE`; the core only reads
	/// this to hand to the (out-of-scope) download collaborator, it never
	/// touches the filesystem itself.
	#[serde(default = "default_model_store")]
	pub model_store: PathBuf,

	/// `SERVING_SHARED_DEVICES`: an integer count or a float in `(0, 1]`.
	/// Absent means "all devices may be used in shared mode". Kept as the
	/// raw string here; [`crate::server::Server`] parses it into a
	/// `MaxShared` via the device registry's own parser so the config
	/// module doesn't need to know the registry's types.
	#[serde(default)]
	pub shared_devices: Option<String>,

	/// Default bounded-queue capacity multiplier applied to a model's
	/// `batchSize` when the model doesn't specify its own queue capacity
	/// (default `2·b` per the job queue design).
	#[serde(default = "default_queue_capacity_multiplier")]
	pub queue_capacity_multiplier: usize,

	/// Log filter directive, e.g. `"info"` or `"serving_service=debug"`.
	#[serde(default = "default_log")]
	pub log: String,

	/// Path to a UNIX socket the admin console listens on. `None` disables
	/// the console (the default for library embedding / tests).
	#[serde(default)]
	pub admin_socket_path: Option<PathBuf>,

	/// Size of the process-wide device sequence `D₀…D_{n-1}`. Actual hardware
	/// discovery (probing accelerator drivers) is an external collaborator
	/// this core doesn't implement; the binary takes the count as
	/// configuration, the same way it would take it from a discovery
	/// sidecar in production.
	#[serde(default)]
	pub device_count: usize,

	/// The kind of accelerator `device_count` describes, if any. Only meant
	/// to disambiguate the planner's "Python engine on an Accelerator
	/// platform" exclusivity default; a process is assumed to have at most
	/// one accelerator kind.
	#[serde(default = "default_device_kind")]
	pub device_kind: String,
}

fn default_model_store() -> PathBuf { PathBuf::from("/var/lib/serving/models") }

fn default_queue_capacity_multiplier() -> usize { 2 }

fn default_log() -> String { String::from("info") }

fn default_device_kind() -> String { String::from("cpu") }

impl Config {
	/// Sanity-check the loaded configuration beyond what serde's
	/// `Deserialize` impl already enforces.
	pub fn check(&self) -> Result<()> {
		if self.queue_capacity_multiplier == 0 {
			return Err!(Config(
				"queue_capacity_multiplier",
				"must be at least 1, got 0"
			));
		}

		if let Some(raw) = &self.shared_devices {
			if raw.parse::<usize>().is_err() && raw.parse::<f64>().is_err() {
				return Err!(Config(
					"shared_devices",
					"must be an integer count or a float in (0, 1], got {raw:?}"
				));
			}
		}

		if !matches!(self.device_kind.as_str(), "cpu" | "gpu" | "accelerator") {
			return Err!(Config("device_kind", "must be one of cpu, gpu, accelerator, got {kind:?}", kind = self.device_kind));
		}

		Ok(())
	}
}
