//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the library sync engine:
//! - Logging and tracing infrastructure
//! - Sync preferences and their validation
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that other modules depend on.
//! It establishes the logging conventions, configuration defaults and event
//! broadcasting mechanisms used throughout the system.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
