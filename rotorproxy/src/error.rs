//! Error taxonomy. Layered the way the teacher's `proxy::ProxyError` /
//! `ProxyResponse` pair is: small per-seam enums (`ProbeError`,
//! `RotatorError`) that never escape their component, plus an outer
//! `SupervisorError` that aggregates only the kinds the spec says are fatal.

use std::net::SocketAddr;
use thiserror::Error;

/// Errors from a single probe attempt. Local to the Prober/Rotator; never
/// surfaced to the Supervisor directly (each one becomes a `Blacklist` strike).
#[derive(Error, Debug, Clone)]
pub enum ProbeError {
	#[error("failed to parse configuration uri: {0}")]
	Parse(String),
	#[error("probe timed out after {0:?}")]
	Timeout(std::time::Duration),
	#[error("probe failed: {0}")]
	Network(String),
	#[error("protocol core rejected configuration: {0}")]
	ProtocolCore(String),
}

/// Errors surfaced while the inbound server tries to dial through the current
/// winner. Always paired with a strike + rotation signal (§7 `DialError`).
#[derive(Error, Debug)]
pub enum DialError {
	#[error("no active outbound installed")]
	NoActiveOutbound,
	#[error("dial to {target} failed: {source}")]
	Failed {
		target: SocketAddr,
		#[source]
		source: std::io::Error,
	},
}

/// Errors raised while negotiating an inbound client connection (SOCKS5 or
/// HTTP). These close the client connection but never strike or rotate.
#[derive(Error, Debug)]
pub enum InboundProtocolError {
	#[error("unsupported socks version: {0:#x}")]
	UnsupportedSocksVersion(u8),
	#[error("unsupported socks address type: {0:#x}")]
	UnsupportedAddressType(u8),
	#[error("no acceptable socks auth method offered")]
	NoAcceptableAuthMethod,
	#[error("malformed http request line")]
	MalformedRequest,
	#[error("unsupported http method for forward proxy: {0}")]
	UnsupportedMethod(String),
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
}

/// Errors local to the Rotator's control loop. `NoCandidates` is logged and
/// retried, never fatal (§7).
#[derive(Error, Debug, Clone)]
pub enum RotatorError {
	#[error("every candidate is blacklisted or unreachable")]
	NoCandidates,
}

/// Outer boundary error. Only `Config`, `Source` (when the pool is empty at
/// startup), and `InboundListen` are fatal per §7; everything else is logged
/// and handled locally by the component that produced it.
#[derive(Error, Debug)]
pub enum SupervisorError {
	#[error("configuration error: {0}")]
	Config(String),
	#[error("config source returned no candidate configurations")]
	Source,
	#[error("failed to bind inbound listener on {addr}: {source}")]
	InboundListen {
		addr: SocketAddr,
		#[source]
		source: std::io::Error,
	},
	#[error("shutdown cleanup failed: {0}")]
	Shutdown(String),
}
