//! Command-line interface module.
//!
//! This module provides the CLI functionality for:
//! - Serving the Ping service over the configured broker
//! - Calling a Ping service once

pub mod commands;
pub mod handlers;

pub use handlers::{handle_ping, handle_serve};
