//! Collection of utility functions shared by the nfsess crates

#![warn(missing_docs)]

/// Conversions between exported unsigned IPv4 values and text.
pub mod ipv4;

/// Wrapper for watching a spool directory for newly arrived files.
pub mod spool_watcher;
