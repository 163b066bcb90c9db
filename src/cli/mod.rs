//! CLI module for revenant - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands to run the scheduler,
//! preview upcoming operations, inspect the config, and ping a volume.

pub mod commands;

pub use commands::Cli;
