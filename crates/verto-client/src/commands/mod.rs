//! Subcommand implementations.

pub mod config;
pub mod listen;
pub mod login;
