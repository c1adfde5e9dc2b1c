//! Subcommand handlers. Each returns the process exit code.

pub mod create;
pub mod destroy;
pub mod info;
pub mod list;
