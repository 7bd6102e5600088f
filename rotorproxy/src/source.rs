//! The `ConfigSource` collaborator contract (§6). Subscription fetching and
//! persistence are peer concerns (§1); this module ships only the two
//! trivial implementations the Supervisor and tests actually need.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::AsyncBufReadExt;

#[derive(Error, Debug)]
pub enum SourceError {
	#[error("failed to read configuration file {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("configuration source returned no entries")]
	Empty,
}

#[async_trait]
pub trait ConfigSource: Send + Sync {
	/// Called once at startup and again whenever the Rotator finds the pool
	/// exhausted (§4.G, §7 `SourceError`).
	async fn fetch(&self) -> Result<Vec<String>, SourceError>;
}

/// Newline-delimited URIs read from a file. Blank lines and `#`-prefixed
/// comment lines are skipped, matching the teacher's tolerant parsing of
/// line-oriented config inputs elsewhere in the codebase.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
	path: PathBuf,
}

impl FileConfigSource {
	pub fn new(path: impl Into<PathBuf>) -> FileConfigSource {
		FileConfigSource { path: path.into() }
	}
}

#[async_trait]
impl ConfigSource for FileConfigSource {
	async fn fetch(&self) -> Result<Vec<String>, SourceError> {
		let file = tokio::fs::File::open(&self.path)
			.await
			.map_err(|source| SourceError::Io { path: self.path.clone(), source })?;
		let mut lines = tokio::io::BufReader::new(file).lines();
		let mut uris = Vec::new();
		loop {
			let next = lines
				.next_line()
				.await
				.map_err(|source| SourceError::Io { path: self.path.clone(), source })?;
			let Some(line) = next else { break };
			let line = line.trim();
			if line.is_empty() || line.starts_with('#') {
				continue;
			}
			uris.push(line.to_string());
		}
		if uris.is_empty() {
			return Err(SourceError::Empty);
		}
		Ok(uris)
	}
}

/// In-memory fixed list, used by tests and by embedders that already hold a
/// resolved URI list in hand.
#[derive(Debug, Clone)]
pub struct StaticConfigSource {
	uris: Vec<String>,
}

impl StaticConfigSource {
	pub fn new(uris: Vec<String>) -> StaticConfigSource {
		StaticConfigSource { uris }
	}
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
	async fn fetch(&self) -> Result<Vec<String>, SourceError> {
		if self.uris.is_empty() {
			return Err(SourceError::Empty);
		}
		Ok(self.uris.clone())
	}
}
