//! CLI module
//!
//! Command-line interface over the connection API.
//!
//! # Commands
//!
//! - `execute` - Run one statement in a scoped session and print its rows
//! - `tables` - List tables and views
//! - `check` - Test the connection
//! - `drivers` - List supported drivers

mod commands;
mod runner;

pub use commands::{Cli, Commands, OutputFormat};
pub use runner::Runner;
