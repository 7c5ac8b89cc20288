use std::path::Path;

use figment::{
	providers::{Env, Format, Toml},
	Figment,
};

use super::Config;
use crate::{err, Result};

/// Loads [`Config`] from an optional TOML file layered under
/// `SERVING_`-prefixed environment variables, environment winning. Config
/// changes require a process restart, matching the device registry's
/// process-lifetime invariants — there is no reload/hot-swap path.
pub struct Manager;

impl Manager {
	pub fn load(path: Option<&Path>) -> Result<Config> {
		let mut figment = Figment::new();

		if let Some(path) = path {
			figment = figment.merge(Toml::file(path));
		}

		figment = figment.merge(Env::prefixed("SERVING_").global().split("__"));

		let config: Config = figment
			.extract()
			.map_err(|e| err!(Config("<root>", "failed to parse configuration: {e}")))?;

		config.check()?;

		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn loads_defaults_with_no_file() {
		let config = Manager::load(None).expect("defaults are always valid");
		assert_eq!(config.queue_capacity_multiplier, 2);
		assert_eq!(config.log, "info");
	}
}
