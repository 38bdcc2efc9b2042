//! Host networking tool boundaries
//!
//! Provides:
//! - NetworkManager (`nmcli`) connection table parsing and mutations
//! - Kernel bridge forwarding table (`bridge fdb`) parsing and pruning

pub mod fdb;
pub mod nmcli;

pub use fdb::ForwardingEntry;
pub use nmcli::{ConnectionRow, NmCli};
