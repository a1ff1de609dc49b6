//! CLI subcommand implementations.

pub mod common;
pub mod download;
pub mod list;
pub mod remove;
