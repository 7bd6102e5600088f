//! Candidate configuration entries: an opaque URI plus cached, once-parsed
//! metadata and the runtime score the Rotator maintains. Grounded on the
//! teacher's small discriminated-tag enums in `types/agent.rs`
//! (`ListenerProtocol`, `BindProtocol`) rather than any inheritance hierarchy.

use std::fmt;
use std::time::{Instant, SystemTime};

/// The proxy protocol family a configuration URI declares via its scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
	VMess,
	VLess,
	Trojan,
	Shadowsocks,
	Hysteria2,
	WireGuard,
	Socks,
	/// The scheme did not match any known protocol; the entry is still
	/// admitted (§4.A) and will fail its first probe with `ProbeError::Parse`.
	Unknown,
}

impl Protocol {
	pub fn from_uri(uri: &str) -> Protocol {
		let scheme = uri.split("://").next().unwrap_or_default().to_ascii_lowercase();
		match scheme.as_str() {
			"vmess" => Protocol::VMess,
			"vless" => Protocol::VLess,
			"trojan" => Protocol::Trojan,
			"ss" | "shadowsocks" => Protocol::Shadowsocks,
			"hy2" | "hysteria2" => Protocol::Hysteria2,
			"wg" | "wireguard" => Protocol::WireGuard,
			"socks" | "socks5" => Protocol::Socks,
			_ => Protocol::Unknown,
		}
	}
}

impl fmt::Display for Protocol {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Protocol::VMess => "vmess",
			Protocol::VLess => "vless",
			Protocol::Trojan => "trojan",
			Protocol::Shadowsocks => "ss",
			Protocol::Hysteria2 => "hy2",
			Protocol::WireGuard => "wg",
			Protocol::Socks => "socks",
			Protocol::Unknown => "unknown",
		};
		f.write_str(s)
	}
}

/// A stable identifier for a configuration URI, used as the blacklist and pool
/// key. Pure function of the URI string: identical URIs always fingerprint
/// identically (§8 round-trip property), independent of process restarts or
/// hasher randomization (unlike `std`'s `DefaultHasher`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct Fingerprint(u64);

impl Fingerprint {
	pub fn of(uri: &str) -> Fingerprint {
		// FNV-1a: small, dependency-free, and stable across runs/platforms,
		// which is all this needs (it is not a security boundary).
		const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
		const PRIME: u64 = 0x100000001b3;
		let mut hash = OFFSET_BASIS;
		for byte in uri.trim().as_bytes() {
			hash ^= *byte as u64;
			hash = hash.wrapping_mul(PRIME);
		}
		Fingerprint(hash)
	}
}

impl fmt::Display for Fingerprint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:016x}", self.0)
	}
}

/// A candidate outbound configuration. Created when a URI is admitted into the
/// pool; mutated only by the Rotator's single control task; destroyed when the
/// pool is refreshed or the service shuts down (§3).
#[derive(Debug, Clone)]
pub struct ConfigEntry {
	pub uri: String,
	pub fingerprint: Fingerprint,
	pub protocol: Protocol,
	/// Last successful probe delay in milliseconds; `-1` if never probed.
	pub last_delay_ms: i64,
	pub last_probed_at: Option<Instant>,
	/// Mirrors `last_probed_at` but as a wall-clock time, for persistence/display.
	pub last_probed_wall: Option<SystemTime>,
	pub consecutive_failures: u32,
}

impl ConfigEntry {
	pub fn new(uri: impl Into<String>) -> ConfigEntry {
		let uri = uri.into();
		let fingerprint = Fingerprint::of(&uri);
		let protocol = Protocol::from_uri(&uri);
		ConfigEntry {
			uri,
			fingerprint,
			protocol,
			last_delay_ms: -1,
			last_probed_at: None,
			last_probed_wall: None,
			consecutive_failures: 0,
		}
	}

	pub fn record_success(&mut self, delay_ms: i64) {
		self.last_delay_ms = delay_ms;
		self.last_probed_at = Some(Instant::now());
		self.last_probed_wall = Some(SystemTime::now());
		self.consecutive_failures = 0;
	}

	pub fn record_failure(&mut self) {
		self.last_probed_at = Some(Instant::now());
		self.last_probed_wall = Some(SystemTime::now());
		self.consecutive_failures += 1;
	}
}
