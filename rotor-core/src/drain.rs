//! Originally derived from the teacher's `agent_core::drain` (itself derived
//! from linkerd2-proxy / ztunnel). Trimmed to the watch/mpsc core: this crate
//! has no hyper connections to wrap, only plain TCP streams and Tokio tasks.

pub use internal::{
	DrainMode, ReleaseShutdown as DrainBlocker, Signal as DrainTrigger, Watch as DrainWatcher,
};

/// Constructs a new pair for draining.
/// * `DrainTrigger` starts a draining sequence and waits for it to complete.
/// * `DrainWatcher` should be held by anything that wants to participate in the
///   drain. It can be cloned; a drain will not complete until all outstanding
///   watchers are dropped.
pub fn new() -> (DrainTrigger, DrainWatcher) {
	internal::channel()
}

mod internal {
	use tokio::sync::{mpsc, watch};

	pub fn channel() -> (Signal, Watch) {
		let (signal_tx, signal_rx) = watch::channel(None);
		let (drained_tx, drained_rx) = mpsc::channel(1);
		(
			Signal { drained_rx, signal_tx },
			Watch { drained_tx, signal_rx },
		)
	}

	enum Never {}

	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub enum DrainMode {
		Immediate,
		Graceful,
	}

	/// Sends a drain command to all watchers.
	pub struct Signal {
		drained_rx: mpsc::Receiver<Never>,
		signal_tx: watch::Sender<Option<DrainMode>>,
	}

	/// Watches for a drain command. Must be dropped for `Signal::start_drain_and_wait` to complete.
	#[derive(Clone)]
	pub struct Watch {
		drained_tx: mpsc::Sender<Never>,
		signal_rx: watch::Receiver<Option<DrainMode>>,
	}

	#[must_use = "DrainBlocker should be dropped explicitly to release the drain"]
	pub struct ReleaseShutdown(mpsc::Sender<Never>, DrainMode);

	impl ReleaseShutdown {
		pub fn mode(&self) -> DrainMode {
			self.1
		}
	}

	impl Signal {
		pub fn count(&self) -> usize {
			self.signal_tx.receiver_count()
		}

		/// Signals all watchers to begin draining and waits for all handles to be dropped.
		pub async fn start_drain_and_wait(self, mode: DrainMode) {
			let Signal { mut drained_rx, signal_tx } = self;
			let _ = signal_tx.send(Some(mode));
			match drained_rx.recv().await {
				None => {},
				Some(n) => match n {},
			}
		}
	}

	impl Watch {
		/// Returns a `ReleaseShutdown` once the drain has been signaled. Drop the
		/// handle once cleanup is complete to unblock the graceful shutdown.
		pub async fn wait_for_drain(mut self) -> ReleaseShutdown {
			let mode = self
				.signal_rx
				.wait_for(Option::is_some)
				.await
				.map(|mode| mode.expect("already asserted is_some"))
				.unwrap_or(DrainMode::Immediate);
			ReleaseShutdown(self.drained_tx, mode)
		}
	}

	impl std::fmt::Debug for Signal {
		fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
			f.debug_struct("Signal").finish_non_exhaustive()
		}
	}

	impl std::fmt::Debug for Watch {
		fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
			f.debug_struct("Watch").finish_non_exhaustive()
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::sync::Arc;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	#[tokio::test]
	async fn drain_waits_for_all_watchers() {
		let (trigger, watcher) = new();
		let done = Arc::new(AtomicUsize::new(0));
		for i in 1..=3u64 {
			let watcher = watcher.clone();
			let done = done.clone();
			tokio::spawn(async move {
				let blocker = watcher.wait_for_drain().await;
				tokio::time::sleep(Duration::from_millis(i * 5)).await;
				done.fetch_add(1, Ordering::SeqCst);
				drop(blocker);
			});
		}
		drop(watcher);
		trigger.start_drain_and_wait(DrainMode::Graceful).await;
		assert_eq!(done.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn immediate_mode_does_not_wait_for_sleep() {
		let (trigger, watcher) = new();
		let observed = Arc::new(std::sync::Mutex::new(None));
		let observed2 = observed.clone();
		tokio::spawn(async move {
			let blocker = watcher.wait_for_drain().await;
			*observed2.lock().unwrap() = Some(blocker.mode());
			drop(blocker);
		});
		trigger.start_drain_and_wait(DrainMode::Immediate).await;
		assert_eq!(*observed.lock().unwrap(), Some(DrainMode::Immediate));
	}
}
