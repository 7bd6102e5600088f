// Simplified relative to the teacher's `agent_core::version`, which stamps in
// build-time git/rustc info via a `build.rs`. This crate has no release
// pipeline of its own, so it reports what `cargo` already knows at compile
// time via `CARGO_PKG_VERSION`.

use std::fmt;

#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct BuildInfo {
	pub version: String,
}

impl BuildInfo {
	pub fn new() -> Self {
		BuildInfo {
			version: env!("CARGO_PKG_VERSION").to_string(),
		}
	}
}

impl fmt::Display for BuildInfo {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "rotorproxy {}", self.version)
	}
}
