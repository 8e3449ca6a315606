//! wafcheck mock service
//!
//! Stands in for the external blocklist feeds and the threat-intelligence
//! network during end-to-end runs, so the firewall under test always sees
//! the same fixed data.

pub mod server;

pub use server::{serve, MockConfig, MockServer, MockStore};
