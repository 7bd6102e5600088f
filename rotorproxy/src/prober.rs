//! Concurrent reachability/latency probing (§4.C). Bounded concurrency via a
//! `Semaphore` permit per in-flight probe, grounded directly on the
//! `novaprox` reference tool's `Semaphore`-gated `buffer_unordered` loop
//! (`other_examples/c122ff24_suprohub-novaprox__src-main.rs.rs`).

use crate::entry::{ConfigEntry, Fingerprint};
use crate::error::ProbeError;
use crate::protocol::ProtocolCore;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub enum ProbeOutcome {
	Ok { delay_ms: i64 },
	Timeout,
	Error(String),
}

#[derive(Debug, Clone)]
pub struct ProbeResult {
	pub fingerprint: Fingerprint,
	pub outcome: ProbeOutcome,
	pub observed_at: Instant,
}

pub struct Prober {
	core: Arc<dyn ProtocolCore>,
	test_endpoint: String,
	timeout: Duration,
	concurrency: usize,
}

impl Prober {
	pub fn new(core: Arc<dyn ProtocolCore>, test_endpoint: impl Into<String>, timeout: Duration, concurrency: usize) -> Prober {
		Prober {
			core,
			test_endpoint: test_endpoint.into(),
			timeout,
			concurrency: concurrency.max(1),
		}
	}

	/// Probes `batch` concurrently, bounded by `concurrency` permits, and
	/// returns as soon as every probe has either completed, timed out, or been
	/// cancelled via `cancel`. Successful results are sorted ascending by
	/// delay, ties broken by earlier `observed_at` (§4.C ranking policy).
	pub async fn probe_batch(&self, batch: &[&ConfigEntry], cancel: tokio_util::sync::CancellationToken) -> Vec<ProbeResult> {
		let semaphore = Arc::new(Semaphore::new(self.concurrency));
		let mut futures = FuturesUnordered::new();

		for entry in batch {
			let fingerprint = entry.fingerprint;
			let uri = entry.uri.clone();
			let core = self.core.clone();
			let endpoint = self.test_endpoint.clone();
			let timeout = self.timeout;
			let semaphore = semaphore.clone();
			let cancel = cancel.clone();

			futures.push(async move {
				let Ok(_permit) = semaphore.acquire_owned().await else {
					return ProbeResult { fingerprint, outcome: ProbeOutcome::Error("semaphore closed".into()), observed_at: Instant::now() };
				};
				tokio::select! {
					biased;
					_ = cancel.cancelled() => ProbeResult { fingerprint, outcome: ProbeOutcome::Error("cancelled".into()), observed_at: Instant::now() },
					result = probe_one(core, &uri, &endpoint, timeout) => result_to_probe_result(fingerprint, result),
				}
			});
		}

		let mut results = Vec::with_capacity(batch.len());
		while let Some(result) = futures.next().await {
			results.push(result);
		}

		results.sort_by(|a, b| match (&a.outcome, &b.outcome) {
			(ProbeOutcome::Ok { delay_ms: da }, ProbeOutcome::Ok { delay_ms: db }) => da.cmp(db).then(a.observed_at.cmp(&b.observed_at)),
			(ProbeOutcome::Ok { .. }, _) => std::cmp::Ordering::Less,
			(_, ProbeOutcome::Ok { .. }) => std::cmp::Ordering::Greater,
			_ => a.observed_at.cmp(&b.observed_at),
		});
		results
	}
}

async fn probe_one(core: Arc<dyn ProtocolCore>, uri: &str, endpoint: &str, timeout: Duration) -> Result<i64, ProbeError> {
	let mut protocol = core.create_protocol(uri)?;
	protocol.parse()?;
	let (client, handle) = core.make_http_client(protocol.as_ref(), timeout).await?;

	let started = Instant::now();
	let result = tokio::time::timeout(timeout, client.get(endpoint).send()).await;
	handle.close();

	match result {
		Err(_) => Err(ProbeError::Timeout(timeout)),
		Ok(Err(e)) => Err(ProbeError::Network(e.to_string())),
		Ok(Ok(response)) => match response.bytes().await {
			Ok(_) => Ok(started.elapsed().as_millis() as i64),
			Err(e) => Err(ProbeError::Network(e.to_string())),
		},
	}
}

fn result_to_probe_result(fingerprint: Fingerprint, result: Result<i64, ProbeError>) -> ProbeResult {
	let outcome = match result {
		Ok(delay_ms) => ProbeOutcome::Ok { delay_ms },
		Err(ProbeError::Timeout(_)) => ProbeOutcome::Timeout,
		Err(e) => ProbeOutcome::Error(e.to_string()),
	};
	ProbeResult { fingerprint, outcome, observed_at: Instant::now() }
}
