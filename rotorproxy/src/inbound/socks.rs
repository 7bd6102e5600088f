//! SOCKS5 negotiation (RFC 1928/1929): no-auth and username/password methods,
//! `CONNECT` command only (`BIND`/`UDP ASSOCIATE` are not meaningful for a
//! single rotating TCP outbound and are rejected).

use crate::error::InboundProtocolError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USER_PASS: u8 = 0x02;
const METHOD_NONE_ACCEPTABLE: u8 = 0xff;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;
const REPLY_SUCCESS: u8 = 0x00;
const REPLY_GENERAL_FAILURE: u8 = 0x01;
const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;

/// Negotiates a SOCKS5 client, returning the raw stream (ready for tunneling,
/// no bytes to replay), the requested target, and an empty prelude.
pub async fn negotiate(mut stream: TcpStream) -> Result<(TcpStream, (String, u16), Vec<u8>), InboundProtocolError> {
	let version = stream.read_u8().await?;
	if version != VERSION {
		return Err(InboundProtocolError::UnsupportedSocksVersion(version));
	}

	let n_methods = stream.read_u8().await?;
	let mut methods = vec![0u8; n_methods as usize];
	stream.read_exact(&mut methods).await?;

	if methods.contains(&METHOD_NO_AUTH) {
		stream.write_all(&[VERSION, METHOD_NO_AUTH]).await?;
	} else if methods.contains(&METHOD_USER_PASS) {
		stream.write_all(&[VERSION, METHOD_USER_PASS]).await?;
		negotiate_user_pass(&mut stream).await?;
	} else {
		stream.write_all(&[VERSION, METHOD_NONE_ACCEPTABLE]).await?;
		return Err(InboundProtocolError::NoAcceptableAuthMethod);
	}

	let mut header = [0u8; 4];
	stream.read_exact(&mut header).await?;
	let [req_version, cmd, _reserved, atyp] = header;
	if req_version != VERSION {
		return Err(InboundProtocolError::UnsupportedSocksVersion(req_version));
	}
	if cmd != CMD_CONNECT {
		reply(&mut stream, REPLY_COMMAND_NOT_SUPPORTED).await.ok();
		return Err(InboundProtocolError::UnsupportedAddressType(cmd));
	}

	let host = match atyp {
		ATYP_IPV4 => {
			let mut buf = [0u8; 4];
			stream.read_exact(&mut buf).await?;
			std::net::Ipv4Addr::from(buf).to_string()
		}
		ATYP_DOMAIN => {
			let len = stream.read_u8().await? as usize;
			let mut buf = vec![0u8; len];
			stream.read_exact(&mut buf).await?;
			String::from_utf8(buf).map_err(|_| InboundProtocolError::UnsupportedAddressType(atyp))?
		}
		ATYP_IPV6 => {
			let mut buf = [0u8; 16];
			stream.read_exact(&mut buf).await?;
			std::net::Ipv6Addr::from(buf).to_string()
		}
		other => {
			reply(&mut stream, REPLY_GENERAL_FAILURE).await.ok();
			return Err(InboundProtocolError::UnsupportedAddressType(other));
		}
	};
	let port = stream.read_u16().await?;

	reply(&mut stream, REPLY_SUCCESS).await?;
	Ok((stream, (host, port), Vec::new()))
}

async fn negotiate_user_pass(stream: &mut TcpStream) -> Result<(), InboundProtocolError> {
	let sub_version = stream.read_u8().await?;
	let _ = sub_version;
	let ulen = stream.read_u8().await? as usize;
	let mut _username = vec![0u8; ulen];
	stream.read_exact(&mut _username).await?;
	let plen = stream.read_u8().await? as usize;
	let mut _password = vec![0u8; plen];
	stream.read_exact(&mut _password).await?;
	// Credentials are not checked against anything — this proxy has no user
	// database; accepting any non-empty username/password pair matches the
	// "local trusted client" deployment model (§1 scope).
	stream.write_all(&[0x01, 0x00]).await?;
	Ok(())
}

async fn reply(stream: &mut TcpStream, code: u8) -> Result<(), InboundProtocolError> {
	// BND.ADDR/BND.PORT are always zeroed: this proxy never reports a real
	// bound address back to the client.
	stream.write_all(&[VERSION, code, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0]).await?;
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;
	use tokio::io::{AsyncReadExt, AsyncWriteExt};

	#[tokio::test]
	async fn rejects_unsupported_version() {
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let server = tokio::spawn(async move {
			let (stream, _) = listener.accept().await.unwrap();
			negotiate(stream).await
		});
		let mut client = TcpStream::connect(addr).await.unwrap();
		client.write_all(&[0x04, 0x01, 0x00]).await.unwrap();
		let result = server.await.unwrap();
		assert!(matches!(result, Err(InboundProtocolError::UnsupportedSocksVersion(0x04))));
	}

	#[tokio::test]
	async fn connect_to_ipv4_target_succeeds() {
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let server = tokio::spawn(async move {
			let (stream, _) = listener.accept().await.unwrap();
			negotiate(stream).await
		});

		let mut client = TcpStream::connect(addr).await.unwrap();
		client.write_all(&[VERSION, 1, METHOD_NO_AUTH]).await.unwrap();
		let mut method_reply = [0u8; 2];
		client.read_exact(&mut method_reply).await.unwrap();
		assert_eq!(method_reply, [VERSION, METHOD_NO_AUTH]);

		let mut request = vec![VERSION, CMD_CONNECT, 0x00, ATYP_IPV4];
		request.extend_from_slice(&[93, 184, 216, 34]);
		request.extend_from_slice(&443u16.to_be_bytes());
		client.write_all(&request).await.unwrap();

		let mut conn_reply = [0u8; 10];
		client.read_exact(&mut conn_reply).await.unwrap();
		assert_eq!(conn_reply[1], REPLY_SUCCESS);

		let (_stream, (host, port), prelude) = server.await.unwrap().unwrap();
		assert_eq!(host, "93.184.216.34");
		assert_eq!(port, 443);
		assert!(prelude.is_empty());
	}
}
