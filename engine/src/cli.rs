//! CLI interface for Loom
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags for driving planning sessions
//! against a memory store.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Loom planning assistant
///
/// A human-in-the-loop planning orchestrator: searches a curated memory of
/// entities, researches the gaps, and routes your goal through a fleet of
/// role-specialised agents with approval gates at the proposal and at every
/// iteration checkpoint.
#[derive(Parser, Debug)]
#[command(name = "loom")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Memory root override (wins over MEMORY_PATH and .memory_path)
    #[arg(long, global = true, value_name = "PATH")]
    pub memory: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a planning session for a goal
    Run {
        /// The goal to plan for
        goal: String,

        /// Comma-separated entity names the session may consult
        #[arg(short, long, value_delimiter = ',')]
        entities: Vec<String>,

        /// Cap on plan/execute/verify iterations
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Approve every gate without prompting
        #[arg(long)]
        auto_approve: bool,
    },

    /// List addressable entities in the memory store
    Entities,

    /// Show recent learning-log entries
    Lessons {
        /// Restrict to one goal domain
        #[arg(short, long)]
        domain: Option<String>,

        /// Number of entries to show (default: 20)
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Run configuration and memory-store diagnostics
    Doctor,
}
