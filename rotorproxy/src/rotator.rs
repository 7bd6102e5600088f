//! The Rotator state machine (§4.D): the single control task that owns the
//! pool, the blacklist strike counters, and the Dialer Bridge. Event-driven
//! via one `tokio::select!` loop, mirroring the shape of the teacher's
//! `Gateway::run`/`app::run` top-level loops — one task, one `select!`, every
//! state transition local to it.

use crate::blacklist::Blacklist;
use crate::dialer::{ActiveOutbound, DialerBridge};
use crate::entry::{ConfigEntry, Fingerprint};
use crate::error::RotatorError;
use crate::prober::{Prober, ProbeOutcome};
use crate::protocol::ProtocolCore;
use crate::source::ConfigSource;
use rand::seq::SliceRandom;
use rotor_core::drain::DrainWatcher;
use rotor_core::readiness::BlockReady;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const MAX_BACKOFF: Duration = Duration::from_secs(30);
const TOTAL_FAILURE_WARN_THRESHOLD: u32 = 5;
/// Keep the incumbent unless a challenger beats it by more than this fraction
/// (§4.D tie-breaking, "reduce churn").
const INCUMBENT_TOLERANCE: f64 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotatorState {
	Idle,
	Probing,
	Serving,
	Draining,
	Stopped,
}

#[derive(Debug, Clone)]
pub struct RotatorConfig {
	pub rotation_interval: Duration,
	pub maximum_allowed_delay: Duration,
	/// `0` = auto (`min(concurrency * 4, pool_size)`).
	pub batch_size: usize,
	/// `0` = auto (4).
	pub concurrency: usize,
	/// `Duration::ZERO` disables health checks.
	pub health_check_interval: Duration,
	/// `Duration::ZERO` means immediate cut-over, no drain grace period.
	pub drain_timeout: Duration,
	pub blacklist_strikes: u32,
	pub blacklist_duration: Duration,
	pub test_endpoint: String,
}

impl RotatorConfig {
	fn resolved_concurrency(&self) -> usize {
		if self.concurrency == 0 { 4 } else { self.concurrency }
	}

	fn resolved_batch_size(&self, pool_size: usize) -> usize {
		let auto = self.resolved_concurrency() * 4;
		let requested = if self.batch_size == 0 { auto } else { self.batch_size };
		requested.min(pool_size).max(1.min(pool_size))
	}
}

/// A signal delivered into the Rotator's event channel from outside its own
/// task (§5 "Signal/force-rotate: the Supervisor forwards events ..."). The
/// rotation-interval and health-check ticks are generated internally.
#[derive(Debug, Clone)]
pub enum RotatorSignal {
	/// The inbound server failed to dial through the current winner: one
	/// strike against it, and an immediate rotation (§4.D, §7 `DialError`).
	DialFailed(Fingerprint),
}

pub struct Rotator {
	config: RotatorConfig,
	config_source: Arc<dyn ConfigSource>,
	protocol_core: Arc<dyn ProtocolCore>,
	blacklist: Arc<Blacklist>,
	bridge: Arc<DialerBridge>,
	state_tx: watch::Sender<RotatorState>,
}

impl Rotator {
	pub fn new(
		config: RotatorConfig,
		config_source: Arc<dyn ConfigSource>,
		protocol_core: Arc<dyn ProtocolCore>,
		blacklist: Arc<Blacklist>,
		bridge: Arc<DialerBridge>,
	) -> Rotator {
		let (state_tx, _) = watch::channel(RotatorState::Idle);
		Rotator { config, config_source, protocol_core, blacklist, bridge, state_tx }
	}

	pub fn state_watcher(&self) -> watch::Receiver<RotatorState> {
		self.state_tx.subscribe()
	}

	fn set_state(&self, state: RotatorState) {
		self.state_tx.send_replace(state);
	}

	/// Drives the state machine until the drain watcher fires. `initial_pool`
	/// comes from the Supervisor's first `ConfigSource::fetch` (§4.G step 1).
	/// `ready` is dropped the moment the first Serving transition happens,
	/// unblocking the Supervisor's readiness gate (§2 "Readiness").
	pub async fn run(
		self: Arc<Self>,
		initial_pool: Vec<ConfigEntry>,
		drain: DrainWatcher,
		mut force_rotate: watch::Receiver<()>,
		mut signals: mpsc::Receiver<RotatorSignal>,
		ready: BlockReady,
	) -> Result<(), RotatorError> {
		let mut pool = initial_pool;
		let prober = Prober::new(
			self.protocol_core.clone(),
			self.config.test_endpoint.clone(),
			self.config.maximum_allowed_delay,
			self.config.resolved_concurrency(),
		);

		// `interval()`'s first tick fires immediately, which is exactly what we
		// want here: it drives the cold-start probing round (§4.D `Idle ->
		// Probing`) without a separate "kick" path. Do not `.reset()` this —
		// that would push the first tick a full `rotation_interval` out.
		let mut rotation_ticker = tokio::time::interval(self.config.rotation_interval.max(Duration::from_millis(1)));
		rotation_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		let health_enabled = !self.config.health_check_interval.is_zero();
		let mut health_ticker = tokio::time::interval(if health_enabled { self.config.health_check_interval } else { Duration::from_secs(3600) });
		health_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		let mut backoff = Duration::from_millis(500);
		let mut consecutive_total_failures: u32 = 0;
		let mut ready = Some(ready);
		let mut force_rotate_pending = false;
		let cancel = CancellationToken::new();

		let mut drained = false;
		let mut drain_fut = std::pin::pin!(drain.wait_for_drain());

		loop {
			tokio::select! {
				biased;

				_release = &mut drain_fut, if !drained => {
					drained = true;
				}

				_ = rotation_ticker.tick() => {
					force_rotate_pending = true;
				}

				_ = health_ticker.tick(), if health_enabled => {
					if let Err(fingerprint) = self.run_health_check().await {
						warn!(%fingerprint, "health check failed, striking serving entry");
						if self.blacklist.strike(fingerprint) >= self.config.blacklist_strikes.max(1) && self.config.blacklist_strikes > 0 {
							force_rotate_pending = true;
						}
					}
				}

				signal = signals.recv() => {
					match signal {
						Some(RotatorSignal::DialFailed(fingerprint)) => {
							self.blacklist.strike(fingerprint);
							force_rotate_pending = true;
						}
						None => {}
					}
				}

				changed = force_rotate.changed() => {
					if changed.is_ok() {
						force_rotate_pending = true;
					}
				}
			}

			if drained {
				self.set_state(RotatorState::Stopped);
				break;
			}

			// A loop, not a one-shot `if`: `NoCandidates` re-arms
			// `force_rotate_pending` for the next backoff-delayed retry, and
			// that retry must not wait for an unrelated ambient event (the
			// next rotation tick could be a full `rotation_interval` away) to
			// get re-evaluated.
			while force_rotate_pending && !drained {
				force_rotate_pending = false;
				self.set_state(RotatorState::Probing);

				match self.probing_round(&mut pool, &prober, &cancel).await {
					Ok(()) => {
						backoff = Duration::from_millis(500);
						consecutive_total_failures = 0;
						self.set_state(RotatorState::Serving);
						if let Some(guard) = ready.take() {
							drop(guard);
						}
					}
					Err(RotatorError::NoCandidates) => {
						consecutive_total_failures += 1;
						if consecutive_total_failures >= TOTAL_FAILURE_WARN_THRESHOLD {
							warn!(consecutive_total_failures, "every candidate blacklisted or unreachable; still retrying");
						}
						if let Ok(fresh) = self.config_source.fetch().await {
							for uri in fresh {
								let fp = Fingerprint::of(&uri);
								if !pool.iter().any(|e| e.fingerprint == fp) {
									pool.push(ConfigEntry::new(uri));
								}
							}
						}
						self.set_state(RotatorState::Idle);
						tokio::select! {
							biased;
							_release = &mut drain_fut, if !drained => { drained = true; }
							_ = tokio::time::sleep(backoff) => {}
						}
						backoff = (backoff * 2).min(MAX_BACKOFF);
						force_rotate_pending = true;
					}
				}
			}

			if drained {
				self.set_state(RotatorState::Stopped);
				break;
			}
		}

		cancel.cancel();
		Ok(())
	}

	/// One probing round: select a batch, probe it, pick a winner, and cut
	/// over (§4.D transitions, §4.D batch selection policy).
	async fn probing_round(&self, pool: &mut [ConfigEntry], prober: &Prober, cancel: &CancellationToken) -> Result<(), RotatorError> {
		let serving_fingerprint = self.bridge.load().map(|a| a.entry.fingerprint);

		let mut allowed: Vec<&ConfigEntry> = self.blacklist.filter_allowed(pool);
		if allowed.is_empty() {
			return Err(RotatorError::NoCandidates);
		}
		allowed.shuffle(&mut rand::rng());

		let batch_size = self.config.resolved_batch_size(allowed.len());
		let mut batch: Vec<&ConfigEntry> = allowed.into_iter().take(batch_size).collect();
		if let Some(fp) = serving_fingerprint {
			if !batch.iter().any(|e| e.fingerprint == fp) {
				if let Some(incumbent) = pool.iter().find(|e| e.fingerprint == fp) {
					batch.push(incumbent);
				}
			}
		}

		let results = prober.probe_batch(&batch, cancel.clone()).await;

		for result in &results {
			let Some(entry) = pool.iter_mut().find(|e| e.fingerprint == result.fingerprint) else { continue };
			match result.outcome {
				ProbeOutcome::Ok { delay_ms } => {
					entry.record_success(delay_ms);
					self.blacklist.clear(entry.fingerprint);
				}
				ProbeOutcome::Timeout | ProbeOutcome::Error(_) => {
					entry.record_failure();
					let strikes = self.blacklist.strike(entry.fingerprint);
					debug!(fingerprint = %entry.fingerprint, strikes, "probe failed");
				}
			}
		}

		let mut winner: Option<Fingerprint> = None;
		let mut winner_delay = i64::MAX;
		for result in &results {
			if let ProbeOutcome::Ok { delay_ms } = result.outcome {
				if delay_ms < winner_delay {
					winner_delay = delay_ms;
					winner = Some(result.fingerprint);
				}
			}
		}

		let Some(winner_fp) = winner else {
			return Err(RotatorError::NoCandidates);
		};

		// Prefer-incumbent tie-break: keep the currently serving entry if it's
		// within tolerance of the new best (§4.D).
		let chosen_fp = if let Some(incumbent_fp) = serving_fingerprint {
			if incumbent_fp != winner_fp {
				if let Some(incumbent_delay) = pool.iter().find(|e| e.fingerprint == incumbent_fp).map(|e| e.last_delay_ms) {
					if incumbent_delay >= 0 && !self.blacklist.is_blacklisted(incumbent_fp) {
						let tolerance = (winner_delay as f64) * (1.0 + INCUMBENT_TOLERANCE);
						if (incumbent_delay as f64) <= tolerance {
							incumbent_fp
						} else {
							winner_fp
						}
					} else {
						winner_fp
					}
				} else {
					winner_fp
				}
			} else {
				incumbent_fp
			}
		} else {
			winner_fp
		};

		if Some(chosen_fp) == serving_fingerprint {
			// No cut-over needed; the incumbent already occupies the bridge.
			return Ok(());
		}

		let chosen_entry = pool.iter().find(|e| e.fingerprint == chosen_fp).cloned().ok_or(RotatorError::NoCandidates)?;
		let mut protocol = self
			.protocol_core
			.create_protocol(&chosen_entry.uri)
			.map_err(|_| RotatorError::NoCandidates)?;
		protocol.parse().map_err(|_| RotatorError::NoCandidates)?;
		let dialer = self.protocol_core.make_dialer(protocol.as_ref()).map_err(|_| RotatorError::NoCandidates)?;

		let new_outbound = ActiveOutbound::new(chosen_entry, dialer);
		info!(fingerprint = %new_outbound.entry.fingerprint, delay_ms = new_outbound.entry.last_delay_ms, "installing new active outbound");
		let previous = self.bridge.swap(new_outbound);

		if let Some(previous) = previous {
			self.set_state(RotatorState::Draining);
			self.drain_previous(previous).await;
		}

		Ok(())
	}

	/// Keeps a superseded outbound alive until `drain_timeout` elapses or its
	/// inflight count reaches zero, whichever comes first (§4.D Probing ->
	/// Draining transition).
	async fn drain_previous(&self, previous: Arc<ActiveOutbound>) {
		if self.config.drain_timeout.is_zero() {
			return;
		}
		let deadline = tokio::time::sleep(self.config.drain_timeout);
		tokio::pin!(deadline);
		loop {
			if previous.inflight() == 0 {
				break;
			}
			tokio::select! {
				_ = &mut deadline => {
					warn!(fingerprint = %previous.entry.fingerprint, "drain timeout elapsed with connections still inflight");
					break;
				}
				_ = tokio::time::sleep(Duration::from_millis(50)) => {}
			}
		}
	}

	/// A lightweight probe against whatever is currently serving, run on its
	/// own ticker (§4.D "Health checks"). Returns the fingerprint to strike on
	/// failure; the shared Blacklist counter is used for both this and
	/// regular probes (§9 resolved open question).
	async fn run_health_check(&self) -> Result<(), Fingerprint> {
		let Some(active) = self.bridge.load() else { return Ok(()) };
		let fingerprint = active.entry.fingerprint;
		let mut protocol = match self.protocol_core.create_protocol(&active.entry.uri) {
			Ok(p) => p,
			Err(_) => return Err(fingerprint),
		};
		if protocol.parse().is_err() {
			return Err(fingerprint);
		}
		let (client, handle) = match self
			.protocol_core
			.make_http_client(protocol.as_ref(), self.config.maximum_allowed_delay)
			.await
		{
			Ok(pair) => pair,
			Err(_) => return Err(fingerprint),
		};
		let result = tokio::time::timeout(self.config.maximum_allowed_delay, client.get(&self.config.test_endpoint).send()).await;
		handle.close();
		match result {
			Ok(Ok(resp)) if resp.status().is_success() => {
				// A successful health check resets strikes the same way a
				// successful regular probe does (§4.D "strikes reset to 0"); this
				// is what makes `blacklist_strikes` count consecutive failures
				// rather than failures-ever.
				self.blacklist.clear(fingerprint);
				Ok(())
			}
			_ => Err(fingerprint),
		}
	}
}
