//! CLI module for bspsync - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
