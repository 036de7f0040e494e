//! Command-line interface for playdeck.
//!
//! Plays a file headless and manages saved positions and configuration.

mod commands;

pub use commands::{Cli, Commands, ConfigAction, ResumeAction, run_command};
