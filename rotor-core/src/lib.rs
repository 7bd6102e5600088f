//! Ambient support crate shared by the rotating-proxy engine: graceful
//! drain/shutdown, process readiness tracking, OS signal handling, a
//! bidirectional byte-pump, logging setup, and build metadata. Modeled on the
//! teacher's `agent-core` crate, trimmed to what a single-binary local proxy
//! needs (no hyper connection wrapping, no OpenTelemetry/JSON log pipeline).

pub mod copy;
pub mod drain;
pub mod prelude;
pub mod readiness;
pub mod signal;
pub mod telemetry;
pub mod version;
