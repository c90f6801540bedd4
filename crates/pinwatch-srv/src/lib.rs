//! pinwatch-srv: continuous TLS pin monitoring for federation servers.
//!
//! Keeps one status row per server published in federation metadata and
//! re-checks each server's certificate against its published pins at a
//! bounded rate.
//!
//! # Architecture
//!
//! - [`metadata`] - where the server list and pins come from
//! - [`scheduler`] - decides what to check next and runs the probes
//! - [`config`] - TOML + environment configuration
//! - [`logging`] - tracing subscriber setup
//! - [`monitor`] - wires the pieces into a running process
//!
//! Priority checks are requested in-process, through
//! [`Scheduler::request_priority`] or [`Monitor::request_recheck`]; the
//! `pinwatch` binary exposes the latter as `run --recheck`.

pub mod config;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod monitor;
pub mod scheduler;

// Re-exports for convenience.
pub use config::{LogFormat, MonitorConfig, SchedulerConfig};
pub use error::SrvError;
pub use metadata::{FileMetadataProvider, MemoryMetadataProvider};
pub use monitor::Monitor;
pub use scheduler::{PriorityRejected, Scheduler};

/// Result type for pinwatch-srv operations.
pub type Result<T> = std::result::Result<T, SrvError>;
