//! fwadm - host firewall administration helper
//!
//! Validates and applies `iptables` source/port rules, keeps an in-memory
//! view of them synchronized with the live filter, summarizes the socket
//! table, and saves/restores rule sets as versioned JSON snapshots.
//!
//! # Architecture
//!
//! - [`core`] - Rules, store, listing parser, classifier, snapshots, gateway
//! - [`validators`] - Structural validation of user-supplied rule fields
//! - [`audit`] - JSON-lines audit log of every operation
//! - [`elevation`] - run0/sudo/pkexec elevation for `iptables`
//! - [`config`] - Configuration persistence
//! - [`utils`] - XDG directory helpers
//!
//! # Safety Features
//!
//! - Every rule is validated before any privileged call
//! - Arguments are passed as argv vectors, never through a shell
//! - The store is re-synchronized from the live filter after each mutation
//! - SHA-256 snapshot checksums
//! - Atomic file operations with secure permissions

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod elevation;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use core::error::{Error, Result};
pub use core::rule::{Action, Chain, Protocol, Rule, RuleKey};
