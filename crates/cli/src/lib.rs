//! Process wiring for a single elan node: flag parsing, config loading,
//! tracing initialisation, and startup/shutdown sequencing.

pub mod bootstrap;
pub mod config;

pub use config::Config;
