//! Rotating-proxy engine: maintains a pool of candidate outbound proxy
//! configurations, probes them concurrently, and serves a local SOCKS/HTTP
//! inbound whose traffic is tunneled through the current best performer,
//! rotating on a timer, on manual trigger, or on repeated health failure.

pub mod blacklist;
pub mod config;
pub mod dialer;
pub mod entry;
pub mod error;
pub mod inbound;
pub mod prober;
pub mod protocol;
pub mod rotator;
pub mod source;
pub mod supervisor;
pub mod system_proxy;

pub use config::{Config, ConfigError, RawConfig};
pub use entry::{ConfigEntry, Fingerprint, Protocol as ProtocolTag};
pub use error::SupervisorError;
pub use protocol::{NullProtocolCore, ProtocolCore};
pub use source::{ConfigSource, FileConfigSource, SourceError, StaticConfigSource};
pub use supervisor::Supervisor;
pub use system_proxy::{EnvHintSystemProxy, NoopSystemProxy, SystemProxy};
