//! CLI entry point. Shape matches the teacher's
//! `crates/agentgateway-app/src/main.rs` (`--config`/`--file`/
//! `--validate-only`, `tracing` setup before anything else runs) with the
//! XDS/copy-self machinery dropped since it doesn't apply here.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use rotorproxy::config::{Config, Mode};
use rotorproxy::{ConfigSource, EnvHintSystemProxy, FileConfigSource, NoopSystemProxy, NullProtocolCore, ProtocolCore, Supervisor, SystemProxy};
use tokio::sync::watch;
use tracing::info;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
#[command(disable_version_flag = true)]
struct Args {
	/// Path to a YAML settings file.
	#[arg(short, long, value_name = "file")]
	file: Option<PathBuf>,

	/// Only load and validate configuration; do not start the service.
	#[arg(long)]
	validate_only: bool,

	/// Print version and exit.
	#[arg(short = 'V', long = "version")]
	version: bool,
}

fn main() -> anyhow::Result<()> {
	rotor_core::telemetry::setup_logging();

	let args = Args::parse();
	if args.version {
		println!("{}", rotor_core::version::BuildInfo::new());
		return Ok(());
	}

	let config = Config::load(args.file.as_ref())?;
	if args.validate_only {
		println!("configuration is valid");
		return Ok(());
	}

	tokio::runtime::Builder::new_multi_thread()
		.worker_threads(config.num_worker_threads.max(1))
		.enable_all()
		.build()?
		.block_on(run(config))
}

async fn run(config: Config) -> anyhow::Result<()> {
	info!(version = %rotor_core::version::BuildInfo::new(), "starting rotorproxy");

	let config_source: Arc<dyn ConfigSource> = match &config.source_path {
		Some(path) => Arc::new(FileConfigSource::new(path.clone())),
		None => anyhow::bail!("no candidate-uri source configured; set source_path in the config file or ROTORPROXY_SOURCE_PATH"),
	};
	// A real Xray/sing-box binding is out of scope for this crate (§1); the
	// null core is the documented extension point.
	let protocol_core: Arc<dyn ProtocolCore> = Arc::new(NullProtocolCore);
	let system_proxy: Arc<dyn SystemProxy> = match config.mode {
		Mode::System => Arc::new(EnvHintSystemProxy),
		Mode::Inbound => Arc::new(NoopSystemProxy),
	};

	let supervisor = Supervisor::new(config, config_source, protocol_core, system_proxy)?;

	let (drain_trigger, drain_watcher) = rotor_core::drain::new();
	let (_force_rotate_tx, force_rotate_rx) = watch::channel(());

	let shutdown = rotor_core::signal::Shutdown::new();
	tokio::spawn(async move {
		shutdown.wait().await;
		info!("shutdown signal received; draining");
		drain_trigger.start_drain_and_wait(rotor_core::drain::DrainMode::Graceful).await;
	});

	supervisor.run(drain_watcher, force_rotate_rx).await?;
	Ok(())
}
