//! The Dialer Bridge (§4.E): a single atomically-readable reference to the
//! currently-serving outbound. `ArcSwap` gives wait-free loads on the
//! inbound hot path and a single atomic pointer swap on rotation — the same
//! trade the teacher makes with `ArcSwapOption` in `client/dns.rs`.

use crate::entry::ConfigEntry;
use crate::protocol::DialerFn;
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// One installed outbound. The Rotator constructs this on cut-over; inbound
/// connections that accepted before the next swap keep their own `Arc` clone
/// alive for the duration of the drain window (§4.E).
pub struct ActiveOutbound {
	pub entry: ConfigEntry,
	pub dialer: DialerFn,
	pub installed_at: Instant,
	inflight: AtomicU64,
}

impl ActiveOutbound {
	pub fn new(entry: ConfigEntry, dialer: DialerFn) -> ActiveOutbound {
		ActiveOutbound { entry, dialer, installed_at: Instant::now(), inflight: AtomicU64::new(0) }
	}

	pub fn inflight(&self) -> u64 {
		self.inflight.load(Ordering::SeqCst)
	}

	/// RAII guard incrementing the counter on accept and decrementing on drop,
	/// mirroring the teacher's connection-lifecycle accounting in
	/// `tcpproxy.rs`/`drain.rs`.
	pub fn track_connection(self: &Arc<Self>) -> InflightGuard {
		self.inflight.fetch_add(1, Ordering::SeqCst);
		InflightGuard { outbound: self.clone() }
	}
}

pub struct InflightGuard {
	outbound: Arc<ActiveOutbound>,
}

impl Drop for InflightGuard {
	fn drop(&mut self) {
		self.outbound.inflight.fetch_sub(1, Ordering::SeqCst);
	}
}

/// The bridge itself: a single `ArcSwapOption<ActiveOutbound>`, the same
/// wrapper the teacher already depends on for its DNS resolver cache. `None`
/// before the first Serving transition (§4.D `Idle`).
#[derive(Default)]
pub struct DialerBridge {
	slot: ArcSwapOption<ActiveOutbound>,
}

impl DialerBridge {
	pub fn new() -> DialerBridge {
		DialerBridge { slot: ArcSwapOption::empty() }
	}

	/// Called once per accepted inbound connection (§4.E step 2).
	pub fn load(&self) -> Option<Arc<ActiveOutbound>> {
		self.slot.load_full()
	}

	/// Installs a new winner, atomically replacing whatever was there. The
	/// caller is responsible for draining the value this returns.
	pub fn swap(&self, new: ActiveOutbound) -> Option<Arc<ActiveOutbound>> {
		self.slot.swap(Some(Arc::new(new)))
	}
}
