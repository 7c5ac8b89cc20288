//! Binds a UNIX socket and serves the hand-parsed command surface from
//! [`super::dispatch`] over it, one line in, one line out, per connection.
//! This is the whole of the admin console: no framing beyond newlines, no
//! authentication (the socket's filesystem permissions are the boundary),
//! matching the scope of an operator convenience rather than a public API.

use std::{path::Path, sync::Arc};

use serving_core::{info, warn};
use serving_service::Admission;
use tokio::{
	io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
	net::{UnixListener, UnixStream},
	sync::broadcast,
};

/// Binds `socket_path`, removing a stale socket file left behind by a
/// previous run. Split out from [`serve`] so the binary can fail fast at
/// startup before spawning the accept loop.
pub fn bind(socket_path: &Path) -> std::io::Result<UnixListener> {
	if socket_path.exists() {
		std::fs::remove_file(socket_path)?;
	}
	UnixListener::bind(socket_path)
}

/// Serves connections on an already-bound listener until `shutdown` fires.
pub async fn serve(listener: UnixListener, admission: Arc<Admission>, mut shutdown: broadcast::Receiver<&'static str>) {
	info!("admin console listening");

	loop {
		tokio::select! {
			accepted = listener.accept() => {
				let (stream, _addr) = match accepted {
					| Ok(pair) => pair,
					| Err(e) => {
						warn!("admin console accept failed: {e}");
						continue;
					},
				};
				let admission = admission.clone();
				tokio::spawn(async move { handle_connection(stream, admission).await; });
			},
			_ = shutdown.recv() => {
				info!("admin console shutting down");
				return;
			},
		}
	}
}

async fn handle_connection(stream: UnixStream, admission: Arc<Admission>) {
	let (reader, mut writer) = stream.into_split();
	let mut lines = BufReader::new(reader).lines();

	loop {
		let line = match lines.next_line().await {
			| Ok(Some(line)) => line,
			| Ok(None) => return,
			| Err(e) => {
				warn!("admin console connection read failed: {e}");
				return;
			},
		};

		if line.trim().is_empty() {
			continue;
		}

		let reply = super::dispatch(&admission, &line).await;
		if writer.write_all(reply.as_bytes()).await.is_err() || writer.write_all(b"\n").await.is_err() {
			return;
		}
	}
}
