//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - watch: run the build-and-deploy daemon
//! - check: validate configuration and external tools
//! - next-version: show the version the next save would get

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use bspsync::config::WatchOverrides;

/// bspsync - version, package and deploy Source engine maps as you save them
#[derive(Parser, Debug)]
#[command(name = "bspsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log to stderr instead of the log file
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Command line settings that override the config file
    pub fn overrides(&self) -> WatchOverrides {
        match &self.command {
            Commands::Watch {
                maps,
                watch,
                output,
                pack,
                recursive,
            } => WatchOverrides {
                watch_directory: watch.clone(),
                output_directory: output.clone(),
                tracked_files: maps.clone(),
                enable_packing: *pack,
                recursive: *recursive,
            },
            _ => WatchOverrides::default(),
        }
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch maps and deploy every save
    Watch {
        /// Map files to track (".bsp" is appended when missing)
        maps: Vec<String>,

        /// Directory the compiler writes maps to
        #[arg(short, long)]
        watch: Option<PathBuf>,

        /// Directory versioned maps are moved to
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Pack custom content into each map before compressing
        #[arg(short, long)]
        pack: bool,

        /// Watch subdirectories too
        #[arg(short, long)]
        recursive: bool,
    },

    /// Validate configuration and check external tools
    Check,

    /// Print the version the next save of a map would get
    NextVersion {
        /// Map name, with or without ".bsp"
        map: String,

        /// Directory holding versioned maps (defaults to the output directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
}
