//! Core types and contracts for federation TLS pin monitoring.
//!
//! This crate provides the foundational pieces shared by the pinwatch crates:
//!
//! - **Types**: server identity, trust anchors, check results and persisted
//!   status rows
//! - **Contracts**: the [`TrustChecker`], [`SelectionStore`] and
//!   [`MetadataProvider`] seams the scheduler is written against
//! - **Errors**: a single [`PinwatchError`] for store and metadata failures
//!
//! # Example
//!
//! ```rust,ignore
//! use pinwatch_core::{CheckResult, ServerKey};
//!
//! fn report(result: &CheckResult) {
//!     match result.reason {
//!         None => println!("{} is healthy", result.key),
//!         Some(reason) => println!("{} failed: {reason}", result.key),
//!     }
//! }
//! ```

mod contract;
mod error;
pub mod types;

pub use contract::{MetadataProvider, SelectionStore, TrustChecker};
pub use error::{PinwatchError, Result};
pub use types::*;
