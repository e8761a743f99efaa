//! CLI command definitions and handling
//!
//! Uses `clap` derive API for argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use kiln::ReportFormat;

/// Kiln - build multi-project workspaces and manage their dependencies
#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the root kiln.toml
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress progress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Working directory
    #[arg(long, global = true)]
    pub cwd: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Tasks to run (shorthand for `kiln run <task>...`)
    #[arg(trailing_var_arg = true)]
    pub task: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run tasks; the projects' default tasks when none are named
    Run {
        /// Task names (`build`) or paths (`:core:build`)
        tasks: Vec<String>,

        /// Show execution plan without running
        #[arg(long)]
        dry_run: bool,

        /// Number of tasks run at the same time
        #[arg(short, long)]
        parallel: Option<usize>,

        /// Keep running independent tasks after a failure
        #[arg(long = "continue")]
        continue_on_failure: bool,
    },

    /// List available tasks
    Tasks {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: ListFormat,

        /// Show task dependencies
        #[arg(long)]
        deps: bool,
    },

    /// Show the dependency tree of a configuration
    Dependencies {
        /// Configuration to report (defaults to runtime)
        #[arg(long = "configuration", short = 'C')]
        configuration: Option<String>,

        /// Project path
        #[arg(short, long, default_value = ":")]
        project: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: GraphFormat,

        /// Write the report to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Resolve a configuration and print its files
    Resolve {
        /// Configuration to resolve
        configuration: String,

        /// Project path
        #[arg(short, long, default_value = ":")]
        project: String,

        /// Do not fail on unresolved dependencies
        #[arg(long)]
        lenient: bool,
    },

    /// Publish the artifacts of a configuration
    Publish {
        /// Configuration to publish
        configuration: String,

        /// Project path
        #[arg(short, long, default_value = ":")]
        project: String,
    },

    /// Manage the artifact cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Validate the build's kiln.toml files
    Check,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show cache statistics
    Stats,

    /// Clear the cache
    Clear {
        /// Only evict this module revision (group:name:version)
        module: Option<String>,
    },

    /// Show cache directory location
    Path,
}

#[derive(ValueEnum, Clone, Debug, Default)]
pub enum ListFormat {
    #[default]
    Table,
    Json,
    Plain,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum GraphFormat {
    #[default]
    Text,
    Dot,
    Json,
}

impl From<GraphFormat> for ReportFormat {
    fn from(format: GraphFormat) -> Self {
        match format {
            GraphFormat::Text => ReportFormat::Text,
            GraphFormat::Dot => ReportFormat::Dot,
            GraphFormat::Json => ReportFormat::Json,
        }
    }
}

impl Cli {
    /// Get the effective command, treating bare task names as `run <task>`
    pub fn effective_command(&self) -> EffectiveCommand<'_> {
        if let Some(cmd) = &self.command {
            EffectiveCommand::Subcommand(cmd)
        } else if !self.task.is_empty() {
            EffectiveCommand::RunTasks(&self.task)
        } else {
            EffectiveCommand::None
        }
    }
}

pub enum EffectiveCommand<'a> {
    Subcommand(&'a Commands),
    RunTasks(&'a Vec<String>),
    None,
}
