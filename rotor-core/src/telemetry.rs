// Simplified relative to the teacher's `agent_core::telemetry`, which layers a
// custom JSON formatter and a non-blocking batching writer on top of
// `tracing-subscriber`. For this crate's scale, plain `tracing_subscriber::fmt`
// with an `EnvFilter` (the same setup the teacher's own `src/main.rs` uses) is
// the right amount of ambient logging machinery.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::SubscriberInitExt;

static INIT: OnceLock<()> = OnceLock::new();

/// Installs a `tracing` subscriber writing to stderr, honoring `RUST_LOG`
/// (defaulting to `info`). Safe to call more than once; only the first call
/// takes effect.
pub fn setup_logging() {
	INIT.get_or_init(|| {
		let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
		let subscriber = tracing_subscriber::fmt()
			.with_env_filter(filter)
			.with_writer(std::io::stderr)
			.with_ansi(false)
			.finish();
		subscriber.init();
	});
}
