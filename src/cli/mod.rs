//! CLI module for the infragraph tool.
//!
//! This module provides the command-line interface for planning and
//! applying infrastructure.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
