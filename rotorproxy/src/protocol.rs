//! The `ProtocolCore`/`Protocol` collaborator contract (§6). Parsing of
//! individual proxy URI schemes and the real dialer/client construction is
//! explicitly out of scope (§1) — this module defines the seam and ships a
//! deterministic stand-in, the way the teacher keeps `xds::Client` behind a
//! trait and tests it against an in-process fake rather than a real control
//! plane.

use crate::error::ProbeError;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// A parsed configuration's network-relevant fields, as much as the outer
/// crate ever needs to see — everything else stays behind the trait.
#[derive(Debug, Clone, Default)]
pub struct GeneralConfig {
	pub address: String,
	pub port: u16,
}

/// A live handle representing a constructed protocol engine instance.
/// `close` consumes it; dropping without calling `close` is still safe (the
/// shipped implementation is a no-op either way) but real FFI-backed cores
/// are expected to treat an un-closed drop as a leak worth logging.
pub trait InstanceHandle: Send {
	fn close(self: Box<Self>);
}

/// One parsed, ready-to-probe configuration. `ProtocolCore::create_protocol`
/// produces these; `parse` must run before `general_config` is meaningful.
pub trait Protocol: Send + Sync {
	fn parse(&mut self) -> Result<(), ProbeError>;
	fn general_config(&self) -> GeneralConfig;
}

/// A boxed duplex stream, the dialer's return type. Real cores hand back a
/// TLS- or protocol-wrapped stream; `rotor_core::copy` only needs the two
/// marker traits plus `Unpin`.
pub type BoxedStream = Box<dyn AsyncReadWriteUnpin>;

pub trait AsyncReadWriteUnpin: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncReadWriteUnpin for T {}

/// A dialer bound to one parsed protocol instance, handed to the Dialer
/// Bridge (§4.E). `target` is the final destination the inbound protocol
/// negotiated (not the proxy's own address).
pub type DialerFn =
	Box<dyn Fn(SocketAddr) -> std::pin::Pin<Box<dyn std::future::Future<Output = std::io::Result<BoxedStream>> + Send>> + Send + Sync>;

/// External collaborator supplying protocol parsing, an HTTP client for
/// probing, and a dialer for the inbound server's hot path. Out of scope for
/// this crate's own implementation per §1 — a real binding would wrap an
/// Xray or sing-box core behind this same seam.
#[async_trait::async_trait]
pub trait ProtocolCore: Send + Sync {
	fn create_protocol(&self, uri: &str) -> Result<Box<dyn Protocol>, ProbeError>;

	async fn make_http_client(
		&self,
		protocol: &dyn Protocol,
		timeout: Duration,
	) -> Result<(reqwest::Client, Box<dyn InstanceHandle>), ProbeError>;

	fn make_dialer(&self, protocol: &dyn Protocol) -> Result<DialerFn, ProbeError>;
}

/// Deterministic in-process stand-in for a real protocol core. Parses only
/// `host:port` out of the URI's authority (ignoring scheme-specific
/// ciphers/transports it has no business understanding) and dials directly
/// with a plain `TcpStream` — exactly what the tests, and a documented future
/// real-core binding, need as a baseline.
#[derive(Debug, Default)]
pub struct NullProtocolCore;

struct NullProtocol {
	uri: String,
	general: GeneralConfig,
}

impl Protocol for NullProtocol {
	fn parse(&mut self) -> Result<(), ProbeError> {
		let authority = self
			.uri
			.split("://")
			.nth(1)
			.ok_or_else(|| ProbeError::Parse(self.uri.clone()))?;
		let authority = authority.split(['/', '?', '#']).next().unwrap_or(authority);
		let authority = authority.rsplit_once('@').map(|(_, host)| host).unwrap_or(authority);
		let (host, port) = authority
			.rsplit_once(':')
			.ok_or_else(|| ProbeError::Parse(self.uri.clone()))?;
		let port: u16 = port.parse().map_err(|_| ProbeError::Parse(self.uri.clone()))?;
		self.general = GeneralConfig { address: host.to_string(), port };
		Ok(())
	}

	fn general_config(&self) -> GeneralConfig {
		self.general.clone()
	}
}

struct NullInstanceHandle;

impl InstanceHandle for NullInstanceHandle {
	fn close(self: Box<Self>) {}
}

#[async_trait::async_trait]
impl ProtocolCore for NullProtocolCore {
	fn create_protocol(&self, uri: &str) -> Result<Box<dyn Protocol>, ProbeError> {
		Ok(Box::new(NullProtocol { uri: uri.to_string(), general: GeneralConfig::default() }))
	}

	async fn make_http_client(
		&self,
		_protocol: &dyn Protocol,
		timeout: Duration,
	) -> Result<(reqwest::Client, Box<dyn InstanceHandle>), ProbeError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| ProbeError::Network(e.to_string()))?;
		Ok((client, Box::new(NullInstanceHandle)))
	}

	fn make_dialer(&self, protocol: &dyn Protocol) -> Result<DialerFn, ProbeError> {
		let general = protocol.general_config();
		if general.address.is_empty() {
			return Err(ProbeError::ProtocolCore("protocol not parsed before dialer construction".into()));
		}
		Ok(Box::new(move |target: SocketAddr| {
			Box::pin(async move {
				let stream = tokio::net::TcpStream::connect(target).await?;
				Ok(Box::new(stream) as BoxedStream)
			})
		}))
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn parses_host_port_from_authority() {
		let core = NullProtocolCore;
		let mut proto = core.create_protocol("vless://uuid@example.com:443?type=ws#tag").unwrap();
		proto.parse().unwrap();
		let cfg = proto.general_config();
		assert_eq!(cfg.address, "example.com");
		assert_eq!(cfg.port, 443);
	}

	#[test]
	fn rejects_uri_without_authority() {
		let core = NullProtocolCore;
		let mut proto = core.create_protocol("not-a-uri").unwrap();
		assert!(proto.parse().is_err());
	}

	#[tokio::test]
	async fn make_http_client_respects_timeout() {
		let core = NullProtocolCore;
		let mut proto = core.create_protocol("socks://127.0.0.1:1080").unwrap();
		proto.parse().unwrap();
		let (_client, handle) = core.make_http_client(proto.as_ref(), Duration::from_millis(50)).await.unwrap();
		handle.close();
	}
}
