//! Frontend components
//!
//! The command-line tool and the TOML configuration shared by the CLI and
//! the worker pool.

pub mod cli;
pub mod config;

pub use cli::main as cli_main;
pub use config::{Config, ConfigError, LoggingConfig, RuntimeConfig, WorkersConfig, CONFIG_FILE};
