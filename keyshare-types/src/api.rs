//! API types for client/server communication, grouped by protocol version.

pub mod v1;
