//! End-to-end Rotator scenarios (§8), driven through the same public API a
//! Supervisor would use. Shape matches the teacher's own top-level
//! `tests/integration.rs` style: spin up real listeners, drive the component
//! for a bounded wall-clock window, assert on observable state.
//!
//! Every probe in these tests hits the same literal endpoint string
//! (`http://rotation.test/trace`); per-entry latency/failure is achieved by
//! having the test's `ProtocolCore` resolve that hostname to a distinct
//! `127.0.0.1` mock server per entry via `reqwest::ClientBuilder::resolve`,
//! keyed off the URI's own `host:port` authority (parsed the same way
//! `NullProtocolCore` parses it).

use async_trait::async_trait;
use rotorproxy::entry::ConfigEntry;
use rotorproxy::protocol::{BoxedStream, DialerFn, GeneralConfig, InstanceHandle, Protocol, ProtocolCore};
use rotorproxy::{ConfigSource, Fingerprint, SourceError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PROBE_URL: &str = "http://rotation.test/trace";

struct NoopHandle;
impl InstanceHandle for NoopHandle {
	fn close(self: Box<Self>) {}
}

struct RoutedProtocol {
	uri: String,
	general: GeneralConfig,
}

impl Protocol for RoutedProtocol {
	fn parse(&mut self) -> Result<(), rotorproxy::error::ProbeError> {
		let authority = self.uri.split("://").nth(1).ok_or_else(|| rotorproxy::error::ProbeError::Parse(self.uri.clone()))?;
		let authority = authority.rsplit_once('@').map(|(_, host)| host).unwrap_or(authority);
		let (host, port) = authority
			.rsplit_once(':')
			.ok_or_else(|| rotorproxy::error::ProbeError::Parse(self.uri.clone()))?;
		let port: u16 = port.parse().map_err(|_| rotorproxy::error::ProbeError::Parse(self.uri.clone()))?;
		self.general = GeneralConfig { address: host.to_string(), port };
		Ok(())
	}

	fn general_config(&self) -> GeneralConfig {
		self.general.clone()
	}
}

/// Routes every probe's literal `rotation.test` endpoint to whatever real
/// mock server address the entry's URI authority names, so each candidate can
/// have independently-configured latency/failure behavior in a single batch.
struct RoutedProtocolCore;

#[async_trait]
impl ProtocolCore for RoutedProtocolCore {
	fn create_protocol(&self, uri: &str) -> Result<Box<dyn Protocol>, rotorproxy::error::ProbeError> {
		Ok(Box::new(RoutedProtocol { uri: uri.to_string(), general: GeneralConfig::default() }))
	}

	async fn make_http_client(
		&self,
		protocol: &dyn Protocol,
		timeout: Duration,
	) -> Result<(reqwest::Client, Box<dyn InstanceHandle>), rotorproxy::error::ProbeError> {
		let general = protocol.general_config();
		let addr: SocketAddr = format!("{}:{}", general.address, general.port)
			.parse()
			.map_err(|_| rotorproxy::error::ProbeError::Parse(general.address.clone()))?;
		let client = reqwest::Client::builder()
			.resolve("rotation.test", addr)
			.timeout(timeout)
			.build()
			.map_err(|e| rotorproxy::error::ProbeError::Network(e.to_string()))?;
		Ok((client, Box::new(NoopHandle)))
	}

	fn make_dialer(&self, protocol: &dyn Protocol) -> Result<DialerFn, rotorproxy::error::ProbeError> {
		let general = protocol.general_config();
		let addr: SocketAddr = format!("{}:{}", general.address, general.port)
			.parse()
			.map_err(|_| rotorproxy::error::ProbeError::Parse(general.address.clone()))?;
		Ok(Box::new(move |_target: SocketAddr| {
			Box::pin(async move {
				let stream = tokio::net::TcpStream::connect(addr).await?;
				Ok(Box::new(stream) as BoxedStream)
			})
		}))
	}
}

struct FixedSource(Vec<String>);

#[async_trait]
impl ConfigSource for FixedSource {
	async fn fetch(&self) -> Result<Vec<String>, SourceError> {
		if self.0.is_empty() {
			return Err(SourceError::Empty);
		}
		Ok(self.0.clone())
	}
}

fn uri_for(server: &MockServer) -> String {
	format!("vless://node@{}", server.address())
}

async fn mock_server_with_delay(status: u16, delay: Duration) -> MockServer {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/trace"))
		.respond_with(ResponseTemplate::new(status).set_delay(delay))
		.mount(&server)
		.await;
	server
}

fn test_rotator_config(interval: Duration, health_interval: Duration) -> rotorproxy::rotator::RotatorConfig {
	rotorproxy::rotator::RotatorConfig {
		rotation_interval: interval,
		maximum_allowed_delay: Duration::from_secs(2),
		batch_size: 0,
		concurrency: 0,
		health_check_interval: health_interval,
		drain_timeout: Duration::ZERO,
		blacklist_strikes: 2,
		blacklist_duration: Duration::from_secs(600),
		test_endpoint: PROBE_URL.to_string(),
	}
}

async fn wait_for_state(rx: &mut watch::Receiver<rotorproxy::rotator::RotatorState>, target: rotorproxy::rotator::RotatorState) {
	tokio::time::timeout(Duration::from_secs(5), async {
		loop {
			if *rx.borrow() == target {
				return;
			}
			rx.changed().await.unwrap();
		}
	})
	.await
	.unwrap_or_else(|_| panic!("timed out waiting for {target:?}"));
}

/// A fast, healthy entry should win over a slow one on the very first
/// probing round (§4.D ranking policy).
#[tokio::test]
async fn cold_start_prefers_lower_latency_candidate() {
	let fast = mock_server_with_delay(200, Duration::from_millis(10)).await;
	let slow = mock_server_with_delay(200, Duration::from_millis(300)).await;

	let pool = vec![ConfigEntry::new(uri_for(&fast)), ConfigEntry::new(uri_for(&slow))];
	let fast_fingerprint = pool[0].fingerprint;

	let blacklist = Arc::new(rotorproxy::blacklist::Blacklist::new(2, Duration::from_secs(600)));
	let bridge = Arc::new(rotorproxy::dialer::DialerBridge::new());
	let source: Arc<dyn ConfigSource> = Arc::new(FixedSource(vec![]));
	let core: Arc<dyn ProtocolCore> = Arc::new(RoutedProtocolCore);

	let rotator = Arc::new(rotorproxy::rotator::Rotator::new(
		test_rotator_config(Duration::from_secs(3600), Duration::ZERO),
		source,
		core,
		blacklist,
		bridge.clone(),
	));
	let mut state_rx = rotator.state_watcher();

	let (_drain_trigger, drain_watcher) = rotor_core::drain::new();
	let (_force_tx, force_rx) = watch::channel(());
	let (_signal_tx, signal_rx) = mpsc::channel(4);
	let readiness = rotor_core::readiness::Ready::new();
	let guard = readiness.register_task("test");

	let handle = tokio::spawn(rotator.run(pool, drain_watcher, force_rx, signal_rx, guard));
	wait_for_state(&mut state_rx, rotorproxy::rotator::RotatorState::Serving).await;

	let active = bridge.load().expect("a winner should be installed");
	assert_eq!(active.entry.fingerprint, fast_fingerprint);
	handle.abort();
}

/// A health-check failure against the serving entry should strike it past
/// the blacklist threshold and force a rotation onto the remaining healthy
/// candidate (§4.D "Health checks", §9 shared-counter decision).
#[tokio::test]
async fn health_check_failure_forces_rotation_to_healthy_candidate() {
	let unhealthy = mock_server_with_delay(200, Duration::ZERO).await;
	let healthy = mock_server_with_delay(200, Duration::from_millis(5)).await;

	let unhealthy_uri = uri_for(&unhealthy);
	let healthy_uri = uri_for(&healthy);
	let pool = vec![ConfigEntry::new(unhealthy_uri.clone()), ConfigEntry::new(healthy_uri.clone())];
	let healthy_fingerprint = Fingerprint::of(&healthy_uri);

	let blacklist = Arc::new(rotorproxy::blacklist::Blacklist::new(1, Duration::from_secs(600)));
	let bridge = Arc::new(rotorproxy::dialer::DialerBridge::new());
	let source: Arc<dyn ConfigSource> = Arc::new(FixedSource(vec![]));
	let core: Arc<dyn ProtocolCore> = Arc::new(RoutedProtocolCore);

	let mut cfg = test_rotator_config(Duration::from_secs(3600), Duration::from_millis(50));
	cfg.blacklist_strikes = 1;
	let rotator = Arc::new(rotorproxy::rotator::Rotator::new(cfg, source, core, blacklist, bridge.clone()));
	let mut state_rx = rotator.state_watcher();

	let (_drain_trigger, drain_watcher) = rotor_core::drain::new();
	let (_force_tx, force_rx) = watch::channel(());
	let (_signal_tx, signal_rx) = mpsc::channel(4);
	let readiness = rotor_core::readiness::Ready::new();
	let guard = readiness.register_task("test");

	let handle = tokio::spawn(rotator.run(pool, drain_watcher, force_rx, signal_rx, guard));
	wait_for_state(&mut state_rx, rotorproxy::rotator::RotatorState::Serving).await;

	// First Serving transition always picks the only reachable entry (it has
	// zero delay, the `healthy` one has 5ms). Dropping its listener here
	// turns every subsequent connection attempt into a real refused
	// connection, which is what makes the next health check actually fail —
	// the prober itself never inspects HTTP status codes (§4.C), so a mocked
	// error status would not have worked.
	drop(unhealthy);

	tokio::time::timeout(Duration::from_secs(5), async {
		loop {
			if let Some(active) = bridge.load() {
				if active.entry.fingerprint == healthy_fingerprint {
					return;
				}
			}
			tokio::time::sleep(Duration::from_millis(20)).await;
		}
	})
	.await
	.expect("rotator should cut over to the healthy candidate after a health-check failure");

	handle.abort();
}

/// `RotatorSignal::DialFailed` should strike the serving entry and trigger an
/// immediate rotation rather than waiting for the next timer tick (§4.D,
/// §7 `DialError`).
#[tokio::test]
async fn dial_failed_signal_forces_immediate_rotation() {
	let first = mock_server_with_delay(200, Duration::ZERO).await;
	let second = mock_server_with_delay(200, Duration::from_millis(5)).await;

	let first_uri = uri_for(&first);
	let second_uri = uri_for(&second);
	let pool = vec![ConfigEntry::new(first_uri.clone()), ConfigEntry::new(second_uri)];
	let first_fingerprint = Fingerprint::of(&first_uri);

	let blacklist = Arc::new(rotorproxy::blacklist::Blacklist::new(1, Duration::from_secs(600)));
	let bridge = Arc::new(rotorproxy::dialer::DialerBridge::new());
	let source: Arc<dyn ConfigSource> = Arc::new(FixedSource(vec![]));
	let core: Arc<dyn ProtocolCore> = Arc::new(RoutedProtocolCore);

	let mut cfg = test_rotator_config(Duration::from_secs(3600), Duration::ZERO);
	cfg.blacklist_strikes = 1;
	let rotator = Arc::new(rotorproxy::rotator::Rotator::new(cfg, source, core, blacklist, bridge.clone()));
	let mut state_rx = rotator.state_watcher();

	let (_drain_trigger, drain_watcher) = rotor_core::drain::new();
	let (_force_tx, force_rx) = watch::channel(());
	let (signal_tx, signal_rx) = mpsc::channel(4);
	let readiness = rotor_core::readiness::Ready::new();
	let guard = readiness.register_task("test");

	let handle = tokio::spawn(rotator.run(pool, drain_watcher, force_rx, signal_rx, guard));
	wait_for_state(&mut state_rx, rotorproxy::rotator::RotatorState::Serving).await;

	let active = bridge.load().unwrap();
	assert_eq!(active.entry.fingerprint, first_fingerprint);

	signal_tx.send(rotorproxy::rotator::RotatorSignal::DialFailed(first_fingerprint)).await.unwrap();

	tokio::time::timeout(Duration::from_secs(5), async {
		loop {
			if let Some(active) = bridge.load() {
				if active.entry.fingerprint != first_fingerprint {
					return;
				}
			}
			tokio::time::sleep(Duration::from_millis(20)).await;
		}
	})
	.await
	.expect("a DialFailed signal should force an immediate cut-over away from the failed entry");

	handle.abort();
}

/// When every candidate is blacklisted, the Rotator should keep retrying with
/// backoff rather than giving up, and recover once `ConfigSource::fetch`
/// supplies a healthy entry (§4.D `NoCandidates`, §7).
#[tokio::test]
async fn recovers_after_all_candidates_blacklisted() {
	// A real refused connection, not a mocked error status: the prober only
	// ever treats connection/timeout failures as probe failures, never HTTP
	// status codes (§4.C).
	let broken_addr = {
		let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
		listener.local_addr().unwrap()
	};
	let broken_uri = format!("vless://node@{broken_addr}");
	let pool = vec![ConfigEntry::new(broken_uri)];

	let healthy = mock_server_with_delay(200, Duration::from_millis(5)).await;
	let healthy_uri = uri_for(&healthy);
	let healthy_fingerprint = Fingerprint::of(&healthy_uri);

	let blacklist = Arc::new(rotorproxy::blacklist::Blacklist::new(1, Duration::from_secs(600)));
	let bridge = Arc::new(rotorproxy::dialer::DialerBridge::new());
	// Once the pool is exhausted the Rotator re-fetches from the source; hand
	// it the healthy candidate on that second call.
	let source: Arc<dyn ConfigSource> = Arc::new(FixedSource(vec![healthy_uri]));
	let core: Arc<dyn ProtocolCore> = Arc::new(RoutedProtocolCore);

	let mut cfg = test_rotator_config(Duration::from_secs(3600), Duration::ZERO);
	cfg.blacklist_strikes = 1;
	let rotator = Arc::new(rotorproxy::rotator::Rotator::new(cfg, source, core, blacklist, bridge.clone()));
	let mut state_rx = rotator.state_watcher();

	let (_drain_trigger, drain_watcher) = rotor_core::drain::new();
	let (_force_tx, force_rx) = watch::channel(());
	let (_signal_tx, signal_rx) = mpsc::channel(4);
	let readiness = rotor_core::readiness::Ready::new();
	let guard = readiness.register_task("test");

	let handle = tokio::spawn(rotator.run(pool, drain_watcher, force_rx, signal_rx, guard));
	wait_for_state(&mut state_rx, rotorproxy::rotator::RotatorState::Serving).await;

	let active = bridge.load().unwrap();
	assert_eq!(active.entry.fingerprint, healthy_fingerprint);
	handle.abort();
}

/// A challenger that is only marginally faster than the current incumbent
/// should not trigger a cut-over (§4.D prefer-incumbent tie-break).
#[tokio::test]
async fn prefer_incumbent_tie_break_avoids_needless_churn() {
	let incumbent = mock_server_with_delay(200, Duration::from_millis(50)).await;
	let incumbent_uri = uri_for(&incumbent);
	let incumbent_fingerprint = Fingerprint::of(&incumbent_uri);

	let blacklist = Arc::new(rotorproxy::blacklist::Blacklist::new(3, Duration::from_secs(600)));
	let bridge = Arc::new(rotorproxy::dialer::DialerBridge::new());
	let core: Arc<dyn ProtocolCore> = Arc::new(RoutedProtocolCore);

	// Install the incumbent directly so the cold-start round (which fires on
	// the rotator's very first tick) has a serving fingerprint to compare
	// the challenger against, exercising the tie-break path immediately.
	let mut protocol = core.create_protocol(&incumbent_uri).unwrap();
	protocol.parse().unwrap();
	let dialer = core.make_dialer(protocol.as_ref()).unwrap();
	let mut incumbent_entry = ConfigEntry::new(incumbent_uri.clone());
	incumbent_entry.record_success(50);
	bridge.swap(rotorproxy::dialer::ActiveOutbound::new(incumbent_entry.clone(), dialer));

	// A challenger within 15% of the incumbent's last known delay (50ms) —
	// e.g. 55ms — should not dethrone it.
	let challenger = mock_server_with_delay(200, Duration::from_millis(55)).await;
	let challenger_uri = uri_for(&challenger);

	let pool = vec![incumbent_entry, ConfigEntry::new(challenger_uri)];
	let source: Arc<dyn ConfigSource> = Arc::new(FixedSource(vec![]));

	let cfg = test_rotator_config(Duration::from_secs(3600), Duration::ZERO);
	let rotator = Arc::new(rotorproxy::rotator::Rotator::new(cfg, source, core, blacklist, bridge.clone()));
	let mut state_rx = rotator.state_watcher();

	let (_drain_trigger, drain_watcher) = rotor_core::drain::new();
	let (force_tx, force_rx) = watch::channel(());
	let (_signal_tx, signal_rx) = mpsc::channel(4);
	let readiness = rotor_core::readiness::Ready::new();
	let guard = readiness.register_task("test");

	let handle = tokio::spawn(rotator.run(pool, drain_watcher, force_rx, signal_rx, guard));
	wait_for_state(&mut state_rx, rotorproxy::rotator::RotatorState::Serving).await;
	force_tx.send(()).unwrap();
	wait_for_state(&mut state_rx, rotorproxy::rotator::RotatorState::Probing).await;
	wait_for_state(&mut state_rx, rotorproxy::rotator::RotatorState::Serving).await;

	let active = bridge.load().unwrap();
	assert_eq!(active.entry.fingerprint, incumbent_fingerprint, "challenger within tolerance must not dethrone the incumbent");
	handle.abort();
}
