//! Command-line interface
//!
//! Argument parsing, action scripts and the command handlers behind the
//! `labsim` binary.

pub mod args;
pub mod commands;
pub mod script;
