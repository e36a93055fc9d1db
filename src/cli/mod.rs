//! CLI module for selfloom - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
