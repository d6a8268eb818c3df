//! Core firewall management functionality
//!
//! - [`rule`]: Rule data structures and identity
//! - [`listing`]: Parser for the packet filter's `-S` listing
//! - [`store`]: In-memory rule store kept in sync with the filter
//! - [`traffic`]: Connection listing classifier
//! - [`snapshot`]: Versioned JSON snapshots
//! - [`gateway`]: Packet filter and socket table boundary
//! - [`manager`]: Orchestration of store, gateway and audit log
//! - [`error`]: Error types for all of the above

pub mod error;
pub mod gateway;
pub mod listing;
pub mod manager;
pub mod rule;
pub mod snapshot;
pub mod store;
pub mod traffic;

#[cfg(test)]
pub mod test_helpers;

#[cfg(test)]
mod tests;
