//! Configuration: defaults overlaid with environment variables and an
//! optional file (§2, §6). The `parse::<T>("ENV_NAME")?.or(raw.field)`
//! overlay pattern and the `RawConfig`/`Config` split are lifted nearly
//! verbatim from the teacher's `config.rs`.

use serde::Deserialize;
use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("invalid env var {name}={value}: {reason}")]
	InvalidEnv { name: String, value: String, reason: String },
	#[error("failed to read config file {path:?}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("failed to parse config file {path:?}: {source}")]
	Parse {
		path: PathBuf,
		#[source]
		source: serde_yaml::Error,
	},
	#[error("invalid configuration: {0}")]
	Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoreType {
	Xray,
	SingBox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
	Inbound,
	System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboundProtocolConfig {
	Socks,
	Http,
	Vless,
	Vmess,
}

/// What the file/CLI layer actually deserializes; every field optional so
/// env vars and hard-coded defaults can fill the rest (mirrors the teacher's
/// `RawConfig`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
	pub core_type: Option<CoreType>,
	pub mode: Option<Mode>,
	pub listen_addr: Option<IpAddr>,
	pub listen_port: Option<u16>,
	pub inbound_protocol: Option<InboundProtocolConfig>,
	pub inbound_uuid: Option<String>,
	pub rotation_interval_secs: Option<u64>,
	pub maximum_allowed_delay_ms: Option<u64>,
	pub batch_size: Option<usize>,
	pub concurrency: Option<usize>,
	pub health_check_interval_secs: Option<u64>,
	pub drain_timeout_secs: Option<u64>,
	pub blacklist_strikes: Option<u32>,
	pub blacklist_duration_secs: Option<u64>,
	pub verbose: Option<bool>,
	pub insecure_tls: Option<bool>,
	pub test_endpoint: Option<String>,
	pub num_worker_threads: Option<usize>,
	/// Path to the newline-delimited candidate-URI list consumed by
	/// `FileConfigSource` (distinct from the YAML settings file this
	/// `RawConfig` itself was deserialized from).
	pub source_path: Option<PathBuf>,
}

/// The fully-resolved configuration every component is constructed from
/// (§6 "Config options"). No component reads an env var or a file directly;
/// everything flows through this struct (§5 "no global mutable state").
#[derive(Debug, Clone)]
pub struct Config {
	pub core_type: CoreType,
	pub mode: Mode,
	pub listen_addr: IpAddr,
	pub listen_port: u16,
	pub inbound_protocol: InboundProtocolConfig,
	pub inbound_uuid: String,
	pub rotation_interval: Duration,
	pub maximum_allowed_delay: Duration,
	pub batch_size: usize,
	pub concurrency: usize,
	pub health_check_interval: Duration,
	pub drain_timeout: Duration,
	pub blacklist_strikes: u32,
	pub blacklist_duration: Duration,
	pub verbose: bool,
	pub insecure_tls: bool,
	pub test_endpoint: String,
	pub num_worker_threads: usize,
	pub source_path: Option<PathBuf>,
}

impl Config {
	/// Loads `path` (if given) as YAML, then overlays environment variables,
	/// then fills in defaults — the same precedence order as the teacher's
	/// `parse_config`.
	pub fn load(path: Option<&PathBuf>) -> Result<Config, ConfigError> {
		let raw = match path {
			Some(path) => {
				let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.clone(), source })?;
				serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse { path: path.clone(), source })?
			}
			None => RawConfig::default(),
		};
		Self::from_raw(raw)
	}

	pub fn from_raw(raw: RawConfig) -> Result<Config, ConfigError> {
		let listen_addr = parse::<IpAddr>("ROTORPROXY_LISTEN_ADDR")?
			.or(raw.listen_addr)
			.unwrap_or_else(|| IpAddr::from([127, 0, 0, 1]));
		let listen_port = parse::<u16>("ROTORPROXY_LISTEN_PORT")?.or(raw.listen_port).unwrap_or(9999);

		let cfg = Config {
			core_type: raw.core_type.unwrap_or(CoreType::Xray),
			mode: raw.mode.unwrap_or(Mode::Inbound),
			listen_addr,
			listen_port,
			inbound_protocol: raw.inbound_protocol.unwrap_or(InboundProtocolConfig::Socks),
			inbound_uuid: raw.inbound_uuid.filter(|u| u != "random").unwrap_or_else(random_uuid),
			rotation_interval: Duration::from_secs(parse::<u64>("ROTORPROXY_ROTATION_INTERVAL")?.or(raw.rotation_interval_secs).unwrap_or(300)),
			// Floored to 1ms, not rejected like `rotation_interval`: zero would
			// make every probe's `tokio::time::timeout` fire immediately, so
			// every candidate reads back as a timeout and the pool can never
			// reach Serving.
			maximum_allowed_delay: Duration::from_millis(
				parse::<u64>("ROTORPROXY_MAX_DELAY_MS")?.or(raw.maximum_allowed_delay_ms).unwrap_or(3000),
			)
			.max(Duration::from_millis(1)),
			batch_size: parse::<usize>("ROTORPROXY_BATCH_SIZE")?.or(raw.batch_size).unwrap_or(0),
			concurrency: parse::<usize>("ROTORPROXY_CONCURRENCY")?.or(raw.concurrency).unwrap_or(0),
			health_check_interval: Duration::from_secs(
				parse::<u64>("ROTORPROXY_HEALTH_CHECK_INTERVAL")?.or(raw.health_check_interval_secs).unwrap_or(30),
			),
			drain_timeout: Duration::from_secs(parse::<u64>("ROTORPROXY_DRAIN_TIMEOUT")?.or(raw.drain_timeout_secs).unwrap_or(0)),
			blacklist_strikes: parse::<u32>("ROTORPROXY_BLACKLIST_STRIKES")?.or(raw.blacklist_strikes).unwrap_or(3),
			blacklist_duration: Duration::from_secs(
				parse::<u64>("ROTORPROXY_BLACKLIST_DURATION")?.or(raw.blacklist_duration_secs).unwrap_or(600),
			),
			verbose: parse::<bool>("ROTORPROXY_VERBOSE")?.or(raw.verbose).unwrap_or(false),
			insecure_tls: parse::<bool>("ROTORPROXY_INSECURE_TLS")?.or(raw.insecure_tls).unwrap_or(false),
			test_endpoint: parse::<String>("ROTORPROXY_TEST_ENDPOINT")?
				.or(raw.test_endpoint)
				.unwrap_or_else(|| "https://cloudflare.com/cdn-cgi/trace".to_string()),
			num_worker_threads: parse::<usize>("ROTORPROXY_WORKER_THREADS")?.or(raw.num_worker_threads).unwrap_or(2),
			source_path: parse::<PathBuf>("ROTORPROXY_SOURCE_PATH")?.or(raw.source_path),
		};

		if cfg.rotation_interval.is_zero() {
			return Err(ConfigError::Invalid("rotation_interval must be greater than zero".into()));
		}

		Ok(cfg)
	}
}

fn random_uuid() -> String {
	use rand::RngCore;
	let mut bytes = [0u8; 16];
	rand::rng().fill_bytes(&mut bytes);
	bytes[6] = (bytes[6] & 0x0f) | 0x40;
	bytes[8] = (bytes[8] & 0x3f) | 0x80;
	format!(
		"{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
		bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7], bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15]
	)
}

fn parse<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError>
where
	<T as FromStr>::Err: ToString,
{
	match env::var(name) {
		Ok(value) => value
			.parse()
			.map(Some)
			.map_err(|e: <T as FromStr>::Err| ConfigError::InvalidEnv { name: name.to_string(), value, reason: e.to_string() }),
		Err(_) => Ok(None),
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn defaults_applied_when_raw_and_env_absent() {
		let cfg = Config::from_raw(RawConfig::default()).unwrap();
		assert_eq!(cfg.listen_port, 9999);
		assert_eq!(cfg.rotation_interval, Duration::from_secs(300));
		assert_eq!(cfg.blacklist_strikes, 3);
		assert_eq!(cfg.test_endpoint, "https://cloudflare.com/cdn-cgi/trace");
	}

	#[test]
	fn raw_overrides_defaults() {
		let raw = RawConfig { listen_port: Some(1080), blacklist_strikes: Some(0), ..Default::default() };
		let cfg = Config::from_raw(raw).unwrap();
		assert_eq!(cfg.listen_port, 1080);
		assert_eq!(cfg.blacklist_strikes, 0);
	}

	#[test]
	fn zero_rotation_interval_is_rejected() {
		let raw = RawConfig { rotation_interval_secs: Some(0), ..Default::default() };
		assert!(matches!(Config::from_raw(raw), Err(ConfigError::Invalid(_))));
	}

	#[test]
	fn zero_maximum_allowed_delay_is_floored_to_one_ms() {
		let raw = RawConfig { maximum_allowed_delay_ms: Some(0), ..Default::default() };
		let cfg = Config::from_raw(raw).unwrap();
		assert_eq!(cfg.maximum_allowed_delay, Duration::from_millis(1));
	}

	#[test]
	fn random_uuid_is_rfc4122_shaped() {
		let uuid = random_uuid();
		assert_eq!(uuid.len(), 36);
		assert_eq!(uuid.chars().nth(14), Some('4'));
	}
}
