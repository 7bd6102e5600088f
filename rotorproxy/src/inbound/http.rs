//! HTTP inbound: `CONNECT` tunneling and plaintext forward-proxy requests
//! (§4.F). Only the request line and headers are parsed; bodies are never
//! buffered — forward-proxy requests are replayed byte-for-byte to the
//! upstream once the target is known.

use crate::error::InboundProtocolError;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const MAX_HEADER_BYTES: usize = 16 * 1024;

/// Negotiates one HTTP inbound request, returning the raw stream, the
/// resolved target, and (for forward-proxy requests only) the exact bytes
/// that must be replayed to the upstream before tunneling begins.
pub async fn negotiate(stream: TcpStream) -> Result<(TcpStream, (String, u16), Vec<u8>), InboundProtocolError> {
	let mut reader = BufReader::new(stream);
	let request_line = read_line(&mut reader).await?;
	let mut parts = request_line.split_whitespace();
	let method = parts.next().ok_or(InboundProtocolError::MalformedRequest)?.to_string();
	let target = parts.next().ok_or(InboundProtocolError::MalformedRequest)?.to_string();
	let version = parts.next().unwrap_or("HTTP/1.1").to_string();

	let mut header_lines = Vec::new();
	loop {
		let line = read_line(&mut reader).await?;
		if line.is_empty() {
			break;
		}
		header_lines.push(line);
	}

	if method.eq_ignore_ascii_case("CONNECT") {
		let (host, port) = split_host_port(&target)?;
		let mut stream = reader.into_inner();
		stream.write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n").await?;
		return Ok((stream, (host, port), Vec::new()));
	}

	// Forward proxy: target is an absolute-URI (e.g. `http://host/path`).
	// Rewrite to origin-form the way a real forward proxy strips the scheme
	// and authority before handing the request to the origin server, and
	// replay the reconstructed request as the prelude.
	let url = url::Url::parse(&target).map_err(|_| InboundProtocolError::MalformedRequest)?;
	if url.scheme() != "http" {
		return Err(InboundProtocolError::UnsupportedMethod(format!("{method} {target}")));
	}
	let host = url.host_str().ok_or(InboundProtocolError::MalformedRequest)?.to_string();
	let port = url.port_or_known_default().unwrap_or(80);
	let origin_form = {
		let mut s = url.path().to_string();
		if s.is_empty() {
			s.push('/');
		}
		if let Some(query) = url.query() {
			s.push('?');
			s.push_str(query);
		}
		s
	};

	let mut prelude = format!("{method} {origin_form} {version}\r\n").into_bytes();
	for line in &header_lines {
		if line.to_ascii_lowercase().starts_with("proxy-connection:") {
			continue;
		}
		prelude.extend_from_slice(line.as_bytes());
		prelude.extend_from_slice(b"\r\n");
	}
	prelude.extend_from_slice(b"\r\n");

	let stream = reader.into_inner();
	Ok((stream, (host, port), prelude))
}

fn split_host_port(authority: &str) -> Result<(String, u16), InboundProtocolError> {
	authority
		.rsplit_once(':')
		.and_then(|(host, port)| port.parse().ok().map(|port| (host.to_string(), port)))
		.ok_or(InboundProtocolError::MalformedRequest)
}

async fn read_line(reader: &mut BufReader<TcpStream>) -> Result<String, InboundProtocolError> {
	let mut line = String::new();
	let n = tokio::time::timeout(std::time::Duration::from_secs(30), reader.read_line(&mut line))
		.await
		.map_err(|_| InboundProtocolError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "header read timed out")))??;
	if n == 0 || line.len() > MAX_HEADER_BYTES {
		return Err(InboundProtocolError::MalformedRequest);
	}
	Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
