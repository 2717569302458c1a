//! CLI command implementations.

pub mod config;
pub mod edit;
pub mod graph;
pub mod run;
pub mod watch;
