//! CLI subcommand implementations.

pub mod check;
pub mod connect;
pub mod init;
