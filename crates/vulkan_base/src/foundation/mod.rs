//! Foundation utilities shared by every subsystem

/// Logging setup
pub mod logging;
