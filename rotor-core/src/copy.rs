// Originally derived from the teacher's `agent_core::copy`. The teacher splits
// connections into custom resizable-buffer halves to optimize a
// multi-hop HBONE tunnel; we have a single plain byte pump (inbound socket <->
// dialed outbound), so this keeps the error taxonomy and the
// join-not-try_join shutdown behavior but drops the buffer-resizing machinery
// in favor of `tokio::io::copy`.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

#[derive(thiserror::Error, Debug)]
pub enum CopyError {
	#[error("io error: {0}")]
	Io(#[from] io::Error),
	#[error("while closing connection: {0}")]
	Shutdown(Box<CopyError>),
}

/// Byte counters for one proxied connection, read by inflight/metrics code.
#[derive(Default, Debug)]
pub struct ConnectionStats {
	sent: AtomicU64,
	received: AtomicU64,
}

impl ConnectionStats {
	pub fn increment_sent(&self, n: u64) {
		self.sent.fetch_add(n, Ordering::Relaxed);
	}
	pub fn increment_received(&self, n: u64) {
		self.received.fetch_add(n, Ordering::Relaxed);
	}
	pub fn sent(&self) -> u64 {
		self.sent.load(Ordering::Relaxed)
	}
	pub fn received(&self) -> u64 {
		self.received.load(Ordering::Relaxed)
	}
}

/// Pumps bytes in both directions between `downstream` (the accepted inbound
/// client) and `upstream` (the dialed outbound) until both directions have
/// reached EOF or errored. Mirrors the teacher's `join!` (not `try_join!`)
/// discipline: one direction hitting EOF first (e.g. a client that only
/// writes a request then half-closes) does not cut the other direction short.
pub async fn copy_bidirectional<A, B>(downstream: A, upstream: B, stats: &ConnectionStats) -> Result<(), CopyError>
where
	A: AsyncRead + AsyncWrite + Unpin,
	B: AsyncRead + AsyncWrite + Unpin,
{
	let (mut rd, mut wd) = tokio::io::split(downstream);
	let (mut ru, mut wu) = tokio::io::split(upstream);

	let downstream_to_upstream = async {
		let res = ignore_disconnects(io::copy(&mut rd, &mut wu).await);
		if let Ok(n) = res {
			stats.increment_sent(n);
		}
		ignore_disconnects(wu.shutdown().await).map_err(|e| CopyError::Shutdown(Box::new(e.into())))?;
		res
	};
	let upstream_to_downstream = async {
		let res = ignore_disconnects(io::copy(&mut ru, &mut wd).await);
		if let Ok(n) = res {
			stats.increment_received(n);
		}
		ignore_disconnects(wd.shutdown().await).map_err(|e| CopyError::Shutdown(Box::new(e.into())))?;
		res
	};

	let (sent, received) = tokio::join!(downstream_to_upstream, upstream_to_downstream);
	sent?;
	received?;
	Ok(())
}

/// A TCP connection can close at any time; treat the common ungraceful
/// disconnect kinds as a normal end of stream rather than an error so callers
/// don't log every client hangup as a failure.
fn ignore_disconnects<T: Default>(res: io::Result<T>) -> io::Result<T> {
	use io::ErrorKind::*;
	match res {
		Err(e) if matches!(e.kind(), NotConnected | UnexpectedEof | ConnectionReset | BrokenPipe) => {
			Ok(T::default())
		},
		other => other,
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use tokio::io::{AsyncReadExt, AsyncWriteExt as _, duplex};

	#[tokio::test]
	async fn copies_both_directions() {
		let (mut client, server_conn) = duplex(64);
		let (backend_conn, mut backend) = duplex(64);

		let stats = ConnectionStats::default();
		let copy = tokio::spawn(async move { copy_bidirectional(server_conn, backend_conn, &stats).await });

		client.write_all(b"hello").await.unwrap();
		let mut buf = [0u8; 5];
		backend.read_exact(&mut buf).await.unwrap();
		assert_eq!(&buf, b"hello");

		backend.write_all(b"world").await.unwrap();
		let mut buf = [0u8; 5];
		client.read_exact(&mut buf).await.unwrap();
		assert_eq!(&buf, b"world");

		drop(client);
		drop(backend);
		copy.await.unwrap().unwrap();
	}
}
