//! The Supervisor (§4.G): wires the collaborators together and owns the
//! top-level run loop. Mirrors the teacher's top-level `Gateway`/`App`
//! assembly (construct dependencies once in `new`, no global mutable state,
//! run until a drain signal fires).

use crate::blacklist::Blacklist;
use crate::config::{Config, InboundProtocolConfig, Mode};
use crate::dialer::DialerBridge;
use crate::entry::ConfigEntry;
use crate::error::SupervisorError;
use crate::inbound::{InboundProtocol, InboundServer};
use crate::protocol::ProtocolCore;
use crate::rotator::{Rotator, RotatorConfig};
use crate::source::ConfigSource;
use crate::system_proxy::{self, SystemProxy};
use rotor_core::drain::DrainWatcher;
use rotor_core::readiness::Ready;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::info;

pub struct Supervisor {
	config: Config,
	config_source: Arc<dyn ConfigSource>,
	protocol_core: Arc<dyn ProtocolCore>,
	system_proxy: Arc<dyn SystemProxy>,
	blacklist: Arc<Blacklist>,
	bridge: Arc<DialerBridge>,
	config_count: Arc<AtomicUsize>,
	closed: Arc<AtomicBool>,
}

impl Supervisor {
	pub fn new(
		config: Config,
		config_source: Arc<dyn ConfigSource>,
		protocol_core: Arc<dyn ProtocolCore>,
		system_proxy: Arc<dyn SystemProxy>,
	) -> Result<Supervisor, SupervisorError> {
		if config.listen_port == 0 {
			return Err(SupervisorError::Config("listen_port must be nonzero".into()));
		}
		let blacklist = Arc::new(Blacklist::new(config.blacklist_strikes, config.blacklist_duration));
		let bridge = Arc::new(DialerBridge::new());
		Ok(Supervisor {
			config,
			config_source,
			protocol_core,
			system_proxy,
			blacklist,
			bridge,
			config_count: Arc::new(AtomicUsize::new(0)),
			closed: Arc::new(AtomicBool::new(false)),
		})
	}

	pub fn config_count(&self) -> usize {
		self.config_count.load(Ordering::SeqCst)
	}

	pub fn dialer_bridge(&self) -> Arc<DialerBridge> {
		self.bridge.clone()
	}

	/// Step 1: fetch the initial pool, failing fast if empty (§4.G, §7
	/// `SourceError`). Step 2: apply `SystemProxy` if configured. Step 3-4:
	/// start the Rotator and wait for its first Serving transition before
	/// starting the Inbound Server. Step 5: run until the drain watcher fires
	/// or a fatal error surfaces. Step 6: unwind in reverse.
	pub async fn run(self, drain: DrainWatcher, force_rotate: watch::Receiver<()>) -> Result<(), SupervisorError> {
		let uris = self.config_source.fetch().await.map_err(|_| SupervisorError::Source)?;
		let entries: Vec<ConfigEntry> = uris.into_iter().map(ConfigEntry::new).collect();
		if entries.is_empty() {
			return Err(SupervisorError::Source);
		}
		self.config_count.store(entries.len(), Ordering::SeqCst);

		let mut previous_proxy_settings = None;
		if self.config.mode == Mode::System {
			let saved = self.system_proxy.get();
			self.system_proxy.save_state(&saved)?;
			previous_proxy_settings = Some(saved);
			self.system_proxy.set(self.config.listen_addr, self.config.listen_port)?;
		}

		let readiness = Ready::new();
		let ready_guard = readiness.register_task("rotator-first-serving");

		let rotator_config = RotatorConfig {
			rotation_interval: self.config.rotation_interval,
			maximum_allowed_delay: self.config.maximum_allowed_delay,
			batch_size: self.config.batch_size,
			concurrency: self.config.concurrency,
			health_check_interval: self.config.health_check_interval,
			drain_timeout: self.config.drain_timeout,
			blacklist_strikes: self.config.blacklist_strikes,
			blacklist_duration: self.config.blacklist_duration,
			test_endpoint: self.config.test_endpoint.clone(),
		};
		let rotator = Arc::new(Rotator::new(
			rotator_config,
			self.config_source.clone(),
			self.protocol_core.clone(),
			self.blacklist.clone(),
			self.bridge.clone(),
		));

		let (dial_tx, dial_rx) = mpsc::channel(256);
		let rotator_drain = drain.clone();
		let rotator_task = tokio::spawn(rotator.run(entries, rotator_drain, force_rotate, dial_rx, ready_guard));

		let readiness_wait_drain = drain.clone();
		tokio::select! {
			_ = wait_for_readiness(&readiness) => {
				info!("rotator reached first Serving state; accepting inbound connections");
			}
			_ = readiness_wait_drain.wait_for_drain() => {
				info!("shutdown requested before first Serving transition");
			}
		}

		let listen_addr = SocketAddr::new(self.config.listen_addr, self.config.listen_port);
		let inbound_protocol = match self.config.inbound_protocol {
			InboundProtocolConfig::Socks => InboundProtocol::Socks,
			InboundProtocolConfig::Http => InboundProtocol::Http,
			// VLESS/VMess inbound modes are reserved for the external core's
			// own inbound implementation (§4.F); this crate only serves
			// SOCKS/HTTP locally and falls back to SOCKS for those values.
			InboundProtocolConfig::Vless | InboundProtocolConfig::Vmess => InboundProtocol::Socks,
		};
		let inbound = InboundServer::new(listen_addr, inbound_protocol, self.bridge.clone(), dial_tx);

		let (inbound_shutdown_tx, inbound_shutdown_rx) = watch::channel(());
		let inbound_drain = drain.clone();
		let inbound_task = tokio::spawn(inbound.run(inbound_drain, inbound_shutdown_rx));

		let result = tokio::select! {
			res = rotator_task => {
				res.map_err(|e| SupervisorError::Shutdown(e.to_string()))
					.and_then(|r| r.map_err(|e| SupervisorError::Shutdown(e.to_string())))
			}
			res = inbound_task => {
				res.map_err(|e| SupervisorError::Shutdown(e.to_string()))
					.and_then(|r| r.map_err(|source| SupervisorError::InboundListen { addr: listen_addr, source }))
			}
		};

		let _ = inbound_shutdown_tx.send(());
		if let Some(saved) = previous_proxy_settings {
			self.system_proxy.restore(saved)?;
		}
		self.closed.store(true, Ordering::SeqCst);
		result
	}

	/// Best-effort, idempotent cleanup for callers that hold a `Supervisor`
	/// without driving it through `run` to completion (e.g. tests that abort
	/// early). Restores `SystemProxy` state from the crash-recovery blob if
	/// present.
	pub fn close(&self) -> Result<(), SupervisorError> {
		if self.closed.swap(true, Ordering::SeqCst) {
			return Ok(());
		}
		if self.config.mode == Mode::System {
			if let Some(saved) = system_proxy::load_persisted_state() {
				self.system_proxy.restore(saved)?;
			}
		}
		Ok(())
	}
}

async fn wait_for_readiness(readiness: &Ready) {
	while !readiness.is_ready() {
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::config::RawConfig;
	use crate::protocol::NullProtocolCore;
	use crate::source::StaticConfigSource;
	use crate::system_proxy::NoopSystemProxy;
	use wiremock::matchers::method;
	use wiremock::{Mock, MockServer, ResponseTemplate};

	#[tokio::test]
	async fn new_rejects_zero_listen_port() {
		let raw = RawConfig { listen_port: Some(0), ..Default::default() };
		let cfg = Config::from_raw(raw).unwrap();
		let source: Arc<dyn ConfigSource> = Arc::new(StaticConfigSource::new(vec!["vless://a@example.com:443".into()]));
		let core: Arc<dyn ProtocolCore> = Arc::new(NullProtocolCore);
		let proxy: Arc<dyn SystemProxy> = Arc::new(NoopSystemProxy);
		assert!(Supervisor::new(cfg, source, core, proxy).is_err());
	}

	#[tokio::test]
	async fn empty_source_fails_run_with_source_error() {
		let cfg = Config::from_raw(RawConfig { listen_port: Some(19999), ..Default::default() }).unwrap();
		let source: Arc<dyn ConfigSource> = Arc::new(StaticConfigSource::new(vec![]));
		let core: Arc<dyn ProtocolCore> = Arc::new(NullProtocolCore);
		let proxy: Arc<dyn SystemProxy> = Arc::new(NoopSystemProxy);
		let supervisor = Supervisor::new(cfg, source, core, proxy).unwrap();
		let (_trigger, watcher) = rotor_core::drain::new();
		let (_force_tx, force_rx) = watch::channel(());
		let result = supervisor.run(watcher, force_rx).await;
		assert!(matches!(result, Err(SupervisorError::Source)));
	}

	#[tokio::test]
	async fn close_is_idempotent() {
		let cfg = Config::from_raw(RawConfig::default()).unwrap();
		let source: Arc<dyn ConfigSource> = Arc::new(StaticConfigSource::new(vec!["vless://a@example.com:443".into()]));
		let core: Arc<dyn ProtocolCore> = Arc::new(NullProtocolCore);
		let proxy: Arc<dyn SystemProxy> = Arc::new(NoopSystemProxy);
		let supervisor = Supervisor::new(cfg, source, core, proxy).unwrap();
		supervisor.close().unwrap();
		supervisor.close().unwrap();
	}

	#[tokio::test]
	async fn full_run_reaches_serving_and_accepts_connections() {
		let server = MockServer::start().await;
		Mock::given(method("GET")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

		let mut cfg = Config::from_raw(RawConfig::default()).unwrap();
		cfg.listen_port = 0; // overridden below once we know a free port
		cfg.test_endpoint = server.uri();
		cfg.health_check_interval = Duration::ZERO;
		cfg.rotation_interval = Duration::from_secs(3600);

		// Grab an ephemeral free port up front since Config itself has no
		// "any port" notion (§6 lists a fixed default).
		let probe_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
		cfg.listen_port = probe_listener.local_addr().unwrap().port();
		drop(probe_listener);

		let source: Arc<dyn ConfigSource> = Arc::new(StaticConfigSource::new(vec!["vless://a@example.com:443".into()]));
		let core: Arc<dyn ProtocolCore> = Arc::new(NullProtocolCore);
		let proxy: Arc<dyn SystemProxy> = Arc::new(NoopSystemProxy);
		let supervisor = Supervisor::new(cfg, source, core, proxy).unwrap();

		let (drain_trigger, watcher) = rotor_core::drain::new();
		let (_force_tx, force_rx) = watch::channel(());
		let handle = tokio::spawn(supervisor.run(watcher, force_rx));

		tokio::time::sleep(Duration::from_millis(200)).await;
		drain_trigger.start_drain_and_wait(rotor_core::drain::DrainMode::Immediate).await;
		let result = tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
		assert!(result.is_ok());
	}
}
