//! Subcommand implementations

pub mod counters;
pub mod demo;
pub mod info;
