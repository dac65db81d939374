//! Subcommand implementations

pub mod agent;
pub mod chat;
pub mod serve;
