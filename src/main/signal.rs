//! Signal handling: this core has no hot-reload path, so every signal this
//! binary cares about means the same thing — begin graceful shutdown.

use std::sync::Arc;

use serving_core::{warn, Server};
use tokio::signal;

#[cfg(unix)]
pub async fn listen(server: Arc<Server>) {
	use signal::unix::{self, SignalKind};

	let mut quit = unix::signal(SignalKind::quit()).expect("SIGQUIT handler installs");
	let mut term = unix::signal(SignalKind::terminate()).expect("SIGTERM handler installs");

	let sig: &'static str;
	tokio::select! {
		_ = signal::ctrl_c() => { sig = "SIGINT"; },
		_ = quit.recv() => { sig = "SIGQUIT"; },
		_ = term.recv() => { sig = "SIGTERM"; },
	}

	warn!("received {sig}, shutting down");
	_ = server.shutdown();
}

#[cfg(not(unix))]
pub async fn listen(server: Arc<Server>) {
	if signal::ctrl_c().await.is_ok() {
		warn!("received Ctrl+C, shutting down");
		_ = server.shutdown();
	}
}
