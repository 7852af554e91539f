//! Core engine-wide types

/// Application and renderer configuration
pub mod config;
