//! The `SystemProxy` collaborator contract (§6). Full OS proxy registry
//! editing is out of scope (§1); this module ships the no-op default and a
//! narrow env-var-hint implementation, plus the crash-recovery persistence
//! both of them share.

use crate::error::SupervisorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SavedProxySettings {
	pub http_proxy: Option<String>,
	pub https_proxy: Option<String>,
	pub all_proxy: Option<String>,
}

#[async_trait]
pub trait SystemProxy: Send + Sync {
	fn get(&self) -> SavedProxySettings;
	fn set(&self, addr: IpAddr, port: u16) -> Result<(), SupervisorError>;
	fn restore(&self, saved: SavedProxySettings) -> Result<(), SupervisorError>;
	fn save_state(&self, saved: &SavedProxySettings) -> Result<(), SupervisorError>;
}

/// Loads the persisted crash-recovery blob, if any, from
/// `$XDG_CONFIG_HOME/rotorproxy/system_proxy_state.json` (or the platform
/// equivalent via `homedir`).
pub fn state_file_path() -> Result<PathBuf, SupervisorError> {
	let home = homedir::my_home()
		.map_err(|e| SupervisorError::Config(format!("could not determine home directory: {e}")))?
		.ok_or_else(|| SupervisorError::Config("no home directory found".into()))?;
	Ok(home.join(".config").join("rotorproxy").join("system_proxy_state.json"))
}

fn persist(saved: &SavedProxySettings) -> Result<(), SupervisorError> {
	let path = state_file_path()?;
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent).map_err(|e| SupervisorError::Shutdown(e.to_string()))?;
	}
	let json = serde_json::to_vec_pretty(saved).map_err(|e| SupervisorError::Shutdown(e.to_string()))?;
	std::fs::write(&path, json).map_err(|e| SupervisorError::Shutdown(e.to_string()))?;
	Ok(())
}

pub fn load_persisted_state() -> Option<SavedProxySettings> {
	let path = state_file_path().ok()?;
	let bytes = std::fs::read(&path).ok()?;
	serde_json::from_slice(&bytes).ok()
}

/// The default: `mode = "inbound"` never touches system state.
#[derive(Debug, Default)]
pub struct NoopSystemProxy;

#[async_trait]
impl SystemProxy for NoopSystemProxy {
	fn get(&self) -> SavedProxySettings {
		SavedProxySettings::default()
	}

	fn set(&self, _addr: IpAddr, _port: u16) -> Result<(), SupervisorError> {
		Ok(())
	}

	fn restore(&self, _saved: SavedProxySettings) -> Result<(), SupervisorError> {
		Ok(())
	}

	fn save_state(&self, _saved: &SavedProxySettings) -> Result<(), SupervisorError> {
		Ok(())
	}
}

/// `mode = "system"`: reads and overwrites the `HTTP_PROXY`/`HTTPS_PROXY`/
/// `ALL_PROXY` environment variables for the current process tree, and
/// persists the prior values to the crash-recovery blob. A deliberately
/// narrow stand-in for real OS registry/network-settings editing (§1).
#[derive(Debug, Default)]
pub struct EnvHintSystemProxy;

#[async_trait]
impl SystemProxy for EnvHintSystemProxy {
	fn get(&self) -> SavedProxySettings {
		SavedProxySettings {
			http_proxy: std::env::var("HTTP_PROXY").ok(),
			https_proxy: std::env::var("HTTPS_PROXY").ok(),
			all_proxy: std::env::var("ALL_PROXY").ok(),
		}
	}

	fn set(&self, addr: IpAddr, port: u16) -> Result<(), SupervisorError> {
		let value = format!("http://{addr}:{port}");
		// SAFETY: rotorproxy is single-threaded with respect to env mutation —
		// this runs once at Supervisor startup before any worker tasks read
		// the environment.
		unsafe {
			std::env::set_var("HTTP_PROXY", &value);
			std::env::set_var("HTTPS_PROXY", &value);
			std::env::set_var("ALL_PROXY", &value);
		}
		warn!(%value, "set process-local proxy env vars; shells must source them to take effect");
		Ok(())
	}

	fn restore(&self, saved: SavedProxySettings) -> Result<(), SupervisorError> {
		unsafe {
			restore_var("HTTP_PROXY", saved.http_proxy);
			restore_var("HTTPS_PROXY", saved.https_proxy);
			restore_var("ALL_PROXY", saved.all_proxy);
		}
		Ok(())
	}

	fn save_state(&self, saved: &SavedProxySettings) -> Result<(), SupervisorError> {
		persist(saved)
	}
}

unsafe fn restore_var(name: &str, value: Option<String>) {
	match value {
		Some(v) => unsafe { std::env::set_var(name, v) },
		None => unsafe { std::env::remove_var(name) },
	}
}
