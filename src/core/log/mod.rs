use tracing_subscriber::{reload, EnvFilter};

/// Logging subsystem state held by [`crate::Server`]. Kept as its own
/// struct, rather than scattered statics, so reload and shutdown have one
/// place to reach into.
pub struct Log {
	pub reload: reload::Handle<EnvFilter, tracing_subscriber::Registry>,
}

impl Log {
	#[must_use]
	pub fn new(reload: reload::Handle<EnvFilter, tracing_subscriber::Registry>) -> Self { Self { reload } }

	/// Replace the active filter directive at runtime (e.g. from the admin
	/// console's `log <directive>` command).
	pub fn set_filter(&self, directive: &str) -> crate::Result<()> {
		let filter = EnvFilter::try_new(directive)
			.map_err(|e| crate::err!(Config("log", "bad filter directive: {e}")))?;
		self.reload
			.reload(filter)
			.map_err(|e| crate::err!("failed to reload log filter: {e}"))
	}
}

// Wraps for logging macros. Call sites use these rather than reaching for
// `::tracing` directly, so the macro set can grow a capture/suppress layer
// later without touching every call site.

#[macro_export]
macro_rules! error {
	( $($x:tt)+ ) => { ::tracing::error!( $($x)+ ) }
}

#[macro_export]
macro_rules! warn {
	( $($x:tt)+ ) => { ::tracing::warn!( $($x)+ ) }
}

#[macro_export]
macro_rules! info {
	( $($x:tt)+ ) => { ::tracing::info!( $($x)+ ) }
}

#[macro_export]
macro_rules! debug {
	( $($x:tt)+ ) => { ::tracing::debug!( $($x)+ ) }
}

#[macro_export]
macro_rules! trace {
	( $($x:tt)+ ) => { ::tracing::trace!( $($x)+ ) }
}

/// Build the default subscriber from `RUST_LOG`/config directive, returning
/// a [`Log`] handle the [`crate::Server`] can hold onto for later reload.
pub fn init(directive: &str) -> crate::Result<Log> {
	let filter = EnvFilter::try_new(directive)
		.map_err(|e| crate::err!(Config("log", "bad filter directive: {e}")))?;
	let (filter, reload) = reload::Layer::new(filter);

	use tracing_subscriber::layer::SubscriberExt;
	let subscriber = tracing_subscriber::registry()
		.with(filter)
		.with(tracing_subscriber::fmt::layer());

	tracing::subscriber::set_global_default(subscriber)
		.map_err(|e| crate::err!("failed to install global tracing subscriber: {e}"))?;

	Ok(Log::new(reload))
}
