//! Process entry point: wires configuration, logging, the device registry,
//! the admission façade, and (if configured) the admin console together,
//! then idles until a shutdown signal arrives. The HTTP/gRPC front end, the
//! plugin loader, and real engine adapters are external collaborators this
//! binary doesn't implement; it's just enough of a host process to make the
//! scheduling core runnable standalone.

mod clap_args;
mod signal;

use std::{collections::HashMap, process::ExitCode, sync::Arc};

use serving_core::{config::Manager, error, info, warn};
use serving_service::{admission::EngineRegistry, engine, DeviceKind, Services};

/// Exit codes: `0` normal, `1` configuration error, `2` bind/startup
/// error.
const EXIT_OK: u8 = 0;
const EXIT_CONFIG_ERROR: u8 = 1;
const EXIT_STARTUP_ERROR: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
	let args = clap_args::parse();

	let config = match Manager::load(args.config.as_deref()) {
		| Ok(config) => config,
		| Err(e) => {
			eprintln!("configuration error: {e}");
			return ExitCode::from(EXIT_CONFIG_ERROR);
		},
	};

	let log = match serving_core::log::init(&config.log) {
		| Ok(log) => log,
		| Err(e) => {
			eprintln!("failed to initialize logging: {e}");
			return ExitCode::from(EXIT_CONFIG_ERROR);
		},
	};

	let device_kind = match config.device_kind.as_str() {
		| "gpu" => DeviceKind::Gpu,
		| "accelerator" => DeviceKind::Accelerator,
		| _ => DeviceKind::Cpu,
	};

	// Real engine adapters are loaded by name from the (out-of-scope) plugin
	// loader; this binary ships the echo adapter as the "native" engine so
	// it's runnable without one attached.
	let mut engines: EngineRegistry = HashMap::new();
	engines.insert("native".to_string(), engine::fake::arc());

	let services = match Services::build(&config, config.device_count, device_kind, engines, "native") {
		| Ok(services) => services,
		| Err(e) => {
			eprintln!("failed to initialize scheduling core: {e}");
			return ExitCode::from(EXIT_CONFIG_ERROR);
		},
	};

	// Bind the admin console eagerly, before doing anything else that could
	// block: a bad socket path is a startup error, not a config error.
	let console_listener = match &config.admin_socket_path {
		| Some(path) => match serving_admin::console::bind(path) {
			| Ok(listener) => Some(listener),
			| Err(e) => {
				error!("admin console failed to bind {path:?}: {e}");
				return ExitCode::from(EXIT_STARTUP_ERROR);
			},
		},
		| None => None,
	};

	let server = Arc::new(serving_core::Server::new(config.clone(), Some(tokio::runtime::Handle::current()), log));
	info!(device_count = config.device_count, device_kind = %config.device_kind, "scheduling core started");

	tokio::spawn(signal::listen(server.clone()));

	let console_task = console_listener.map(|listener| {
		let admission = services.admission.clone();
		let shutdown = server.signal.subscribe();
		tokio::spawn(serving_admin::console::serve(listener, admission, shutdown))
	});

	let mut shutdown = server.signal.subscribe();
	_ = shutdown.recv().await;

	warn!("shutting down: draining registered models");
	for key in services.admission.list().await {
		_ = services.admission.unregister(&key.name, key.version.as_deref()).await;
	}

	if let Some(console_task) = console_task {
		console_task.abort();
	}

	ExitCode::from(EXIT_OK)
}
