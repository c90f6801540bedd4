//! # pinwatch-probe
//!
//! TLS trust probe for federation servers.
//!
//! Chain validation against a local root store is deliberately absent: a
//! server is trusted when the leaf certificate it presents is current, names
//! the host that was dialled, and hashes to one of the pins its entity
//! published in federation metadata.
//!
//! ## Data Flow
//!
//! ```text
//! base_uri -> parse_base_uri() -> Target { host, port }
//!   -> capture_leaf()         TCP connect + handshake, leaf DER recorded
//!   -> evaluate()             expiry -> hostname -> pin
//!   -> CheckResult
//! ```

mod address;
mod capture;
mod cert;
mod checker;
mod error;
pub mod hash;
pub mod verify;

pub use address::{parse_base_uri, Target, DEFAULT_PORT};
pub use capture::capture_leaf;
pub use cert::LeafCertificate;
pub use checker::{StaticChecker, TlsTrustChecker, DEFAULT_TIMEOUT};
pub use error::{ProbeError, ProbeResult};
pub use verify::{evaluate, Evaluation};
