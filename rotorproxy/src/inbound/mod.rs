//! The Inbound Server (§4.F): accepts local client connections, negotiates
//! SOCKS5 or HTTP, and bridges them through whatever the Dialer Bridge
//! currently holds. Accept-loop shape grounded on the teacher's
//! `Bind::run_bind` (`crates/proxy/src/gateway.rs`): one listener task, one
//! `tokio::spawn` per connection, a `force_shutdown` watch race for
//! immediate cut-off, and a `drain` clone dropped on completion so graceful
//! shutdown can observe outstanding connections.

pub mod http;
pub mod socks;

use crate::dialer::DialerBridge;
use crate::error::DialError;
use crate::rotator::RotatorSignal;
use rotor_core::copy::{ConnectionStats, copy_bidirectional};
use rotor_core::drain::DrainWatcher;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundProtocol {
	Socks,
	Http,
}

pub struct InboundServer {
	listen_addr: SocketAddr,
	protocol: InboundProtocol,
	bridge: Arc<DialerBridge>,
	dial_signals: mpsc::Sender<RotatorSignal>,
}

impl InboundServer {
	pub fn new(listen_addr: SocketAddr, protocol: InboundProtocol, bridge: Arc<DialerBridge>, dial_signals: mpsc::Sender<RotatorSignal>) -> InboundServer {
		InboundServer { listen_addr, protocol, bridge, dial_signals }
	}

	pub fn listen_addr(&self) -> SocketAddr {
		self.listen_addr
	}

	pub async fn run(self, drain: DrainWatcher, mut force_shutdown: watch::Receiver<()>) -> std::io::Result<()> {
		let listener = TcpListener::bind(self.listen_addr).await?;
		info!(addr = %self.listen_addr, protocol = ?self.protocol, "inbound listener bound");

		loop {
			tokio::select! {
				biased;
				_ = force_shutdown.changed() => {
					debug!("inbound accept loop shutting down");
					break;
				}
				accepted = listener.accept() => {
					let Ok((stream, peer)) = accepted else { continue };
					let bridge = self.bridge.clone();
					let dial_signals = self.dial_signals.clone();
					let drain = drain.clone();
					let mut conn_force_shutdown = force_shutdown.clone();
					let protocol = self.protocol;
					tokio::spawn(async move {
						tokio::select! {
							_ = conn_force_shutdown.changed() => {
								debug!(%peer, "connection forcefully terminated");
							}
							_ = handle_connection(stream, peer, protocol, bridge, dial_signals) => {}
						}
						drop(drain);
					});
				}
			}
		}
		Ok(())
	}
}

async fn handle_connection(
	stream: TcpStream,
	peer: SocketAddr,
	protocol: InboundProtocol,
	bridge: Arc<DialerBridge>,
	dial_signals: mpsc::Sender<RotatorSignal>,
) {
	let negotiation = match protocol {
		InboundProtocol::Socks => socks::negotiate(stream).await,
		InboundProtocol::Http => http::negotiate(stream).await,
	};
	let (client_stream, (host, port), prelude) = match negotiation {
		Ok(n) => n,
		Err(e) => {
			debug!(%peer, error = %e, "inbound negotiation failed");
			return;
		}
	};

	let Some(active) = bridge.load() else {
		debug!(%peer, error = %DialError::NoActiveOutbound, "no active outbound available yet");
		return;
	};

	let target_addr = match resolve(&host, port).await {
		Ok(addr) => addr,
		Err(e) => {
			debug!(%peer, host, error = %e, "failed to resolve target");
			return;
		}
	};

	let guard = active.track_connection();
	let dial_result = (active.dialer)(target_addr).await;
	let mut upstream = match dial_result {
		Ok(stream) => stream,
		Err(source) => {
			let error = DialError::Failed { target: target_addr, source };
			warn!(%peer, %error, "dial through active outbound failed");
			let _ = dial_signals.send(RotatorSignal::DialFailed(active.entry.fingerprint)).await;
			drop(guard);
			return;
		}
	};

	if !prelude.is_empty() && upstream.write_all(&prelude).await.is_err() {
		drop(guard);
		return;
	}

	let stats = ConnectionStats::default();
	if let Err(e) = copy_bidirectional(client_stream, upstream, &stats).await {
		debug!(%peer, error = %e, "connection closed");
	}
	drop(guard);
}

async fn resolve(host: &str, port: u16) -> std::io::Result<SocketAddr> {
	if let Ok(ip) = host.parse::<std::net::IpAddr>() {
		return Ok(SocketAddr::new(ip, port));
	}
	let mut addrs = tokio::net::lookup_host((host, port)).await?;
	addrs
		.next()
		.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, format!("no addresses resolved for {host}")))
}
