// Originally derived from the teacher's `agent_core::readiness` (itself
// derived from https://github.com/istio/ztunnel, Apache 2.0 licensed).

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Tracks whether the process is ready: a set of named pending tasks, empty
/// once every caller that registered one has dropped its `BlockReady` handle.
#[derive(Clone, Debug, Default)]
pub struct Ready(Arc<Mutex<HashSet<String>>>);

impl Ready {
	pub fn new() -> Ready {
		Ready::default()
	}

	/// Registers a dependency that must complete before the process is "ready".
	pub fn register_task(&self, name: &str) -> BlockReady {
		self.0.lock().unwrap().insert(name.to_string());
		BlockReady {
			parent: self.clone(),
			name: name.to_string(),
		}
	}

	pub fn pending(&self) -> HashSet<String> {
		self.0.lock().unwrap().clone()
	}

	pub fn is_ready(&self) -> bool {
		self.0.lock().unwrap().is_empty()
	}
}

/// Blocks readiness for as long as it is held; dropping it marks the task complete.
pub struct BlockReady {
	parent: Ready,
	name: String,
}

impl Drop for BlockReady {
	fn drop(&mut self) {
		let mut pending = self.parent.0.lock().unwrap();
		let removed = pending.remove(&self.name);
		debug_assert!(removed);
		let left = pending.len();
		if left == 0 {
			info!("task '{}' complete, marking server ready", self.name);
		} else {
			info!("task '{}' complete, still awaiting {left} tasks", self.name);
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn ready_once_all_tasks_drop() {
		let ready = Ready::new();
		let a = ready.register_task("a");
		let b = ready.register_task("b");
		assert!(!ready.is_ready());
		drop(a);
		assert!(!ready.is_ready());
		drop(b);
		assert!(ready.is_ready());
	}
}
