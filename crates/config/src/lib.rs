//! Configuration management for the tuneforge API
//!
//! This crate provides centralized configuration loading and management
//! for different environments (development, production, etc.).

pub mod environment;
pub mod loader;
pub mod types;

pub use environment::*;
pub use loader::*;
pub use types::*;
