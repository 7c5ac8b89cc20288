//! Admin console: a small, hand-parsed command surface over the same
//! [`Admission`] façade an HTTP front end would call through. The verb set
//! is four words wide (`register`, `unregister`, `scale`, `submit`, plus
//! the `list`/`stat` introspection pair), narrow enough that a `clap`
//! subcommand tree would be pure overhead.

pub mod console;

use std::time::Duration;

use serving_core::{err, Result};
use serving_service::Admission;

/// Parses one line of console input into the five-to-six token shapes below
/// and runs it against `admission`, returning the line to write back to the
/// caller. A parse error is reported the same way a handler error is: as a
/// line of text, never a panic — the console is an operator convenience,
/// not a trusted input path.
pub async fn dispatch(admission: &Admission, line: &str) -> String {
	match execute(admission, line).await {
		| Ok(reply) => reply,
		| Err(e) => format!("error: {e}"),
	}
}

/// `-` is the console's placeholder for an absent optional field (`version`,
/// `engine`), since the wire format is whitespace-split and `None` has no
/// other unambiguous spelling in a fixed-arity command line.
fn opt(token: &str) -> Option<String> {
	if token == "-" {
		None
	} else {
		Some(token.to_string())
	}
}

async fn execute(admission: &Admission, line: &str) -> Result<String> {
	let mut tokens = line.split_whitespace();
	let verb = tokens.next().ok_or_else(|| err!(BadSpec("empty command")))?;

	match verb {
		| "register" => {
			let args: Vec<&str> = tokens.collect();
			let [name, version, url, engine, device_spec, tp, mpi, max_workers, batch_size, max_batch_delay_ms, max_idle_time_ms] = args[..] else {
				return Err!(BadSpec(
					"usage: register <name> <version|-> <url> <engine|-> <device-spec|-> <tp> <mpi> <max-workers> <batch-size> <max-batch-delay-ms> <max-idle-time-ms>"
				));
			};

			admission
				.register(
					name.to_string(),
					opt(version),
					url.to_string(),
					opt(engine),
					opt(device_spec).unwrap_or_default(),
					parse(tp, "tp")?,
					parse_bool(mpi, "mpi")?,
					parse(max_workers, "max-workers")?,
					parse(batch_size, "batch-size")?,
					Duration::from_millis(parse(max_batch_delay_ms, "max-batch-delay-ms")?),
					Duration::from_millis(parse(max_idle_time_ms, "max-idle-time-ms")?),
				)
				.await?;
			Ok(format!("registered {name}"))
		},

		| "unregister" => {
			let args: Vec<&str> = tokens.collect();
			let [name, version] = args[..] else {
				return Err!(BadSpec("usage: unregister <name> <version|->"));
			};
			admission.unregister(name, opt(version).as_deref()).await?;
			Ok(format!("unregistered {name}"))
		},

		| "scale" => {
			let args: Vec<&str> = tokens.collect();
			let [name, version, min_workers, max_workers] = args[..] else {
				return Err!(BadSpec("usage: scale <name> <version|-> <min-workers> <max-workers>"));
			};
			admission
				.scale(name, opt(version).as_deref(), parse(min_workers, "min-workers")?, parse(max_workers, "max-workers")?)
				.await?;
			Ok(format!("scaled {name}"))
		},

		| "submit" => {
			let name = tokens.next().ok_or_else(|| err!(BadSpec("usage: submit <name> <version|-> <payload...>")))?;
			let version = tokens.next().ok_or_else(|| err!(BadSpec("usage: submit <name> <version|-> <payload...>")))?;
			let payload = tokens.collect::<Vec<_>>().join(" ");
			let mut result = admission.submit(name, opt(version).as_deref(), payload.into_bytes()).await?;

			let mut out = String::new();
			loop {
				match result.next(Duration::from_secs(30)).await? {
					| serving_service::streaming::Next::Chunk(data) => out.push_str(&String::from_utf8_lossy(&data)),
					| serving_service::streaming::Next::End => break,
				}
			}
			Ok(out)
		},

		| "list" => {
			let names = admission.list().await.into_iter().map(|k| k.to_string()).collect::<Vec<_>>();
			Ok(names.join(", "))
		},

		| "stat" => {
			let args: Vec<&str> = tokens.collect();
			let [name, version] = args[..] else {
				return Err!(BadSpec("usage: stat <name> <version|->"));
			};
			let stat = admission.stat(name, opt(version).as_deref()).await?;
			Ok(format!("workers={} queue_len={}", stat.workers, stat.queue_len))
		},

		| other => Err!(BadSpec("unknown command {other:?}; expected register, unregister, scale, submit, list, or stat")),
	}
}

fn parse<T: std::str::FromStr>(token: &str, field: &str) -> Result<T> {
	token.parse().map_err(|_| err!(BadSpec("expected an integer for {field}, got {token:?}")))
}

fn parse_bool(token: &str, field: &str) -> Result<bool> {
	match token {
		| "true" => Ok(true),
		| "false" => Ok(false),
		| _ => Err!(BadSpec("expected true or false for {field}, got {token:?}")),
	}
}

#[cfg(test)]
mod tests {
	use std::{collections::HashMap, sync::Arc};

	use serving_service::{device::MaxShared, engine, DeviceKind, DeviceRegistry};

	use super::*;

	fn admission() -> Admission {
		let registry = Arc::new(DeviceRegistry::new(0, MaxShared::All));
		let mut engines: serving_service::admission::EngineRegistry = HashMap::new();
		engines.insert("native".into(), engine::fake::arc());
		Admission::new(registry, DeviceKind::Cpu, engines, "native")
	}

	#[tokio::test]
	async fn register_list_unregister_round_trip() {
		let admission = admission();
		let reply = dispatch(&admission, "register m1 - file:///m1 - - 1 false 1 4 10 60000").await;
		assert_eq!(reply, "registered m1");

		assert_eq!(dispatch(&admission, "list").await, "m1");

		let reply = dispatch(&admission, "unregister m1 -").await;
		assert_eq!(reply, "unregistered m1");
		assert_eq!(dispatch(&admission, "list").await, "");
	}

	#[tokio::test]
	async fn submit_echoes_payload_through_fake_engine() {
		let admission = admission();
		dispatch(&admission, "register m1 - file:///m1 - - 1 false 1 4 10 60000").await;
		let reply = dispatch(&admission, "submit m1 - hello").await;
		assert_eq!(reply, "hello");
	}

	#[tokio::test]
	async fn unknown_command_reports_error() {
		let admission = admission();
		let reply = dispatch(&admission, "frobnicate").await;
		assert!(reply.starts_with("error:"));
	}

	#[tokio::test]
	async fn register_wrong_arity_reports_usage_error() {
		let admission = admission();
		let reply = dispatch(&admission, "register m1").await;
		assert!(reply.starts_with("error:"));
	}
}
