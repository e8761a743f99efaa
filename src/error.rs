//! Error types for kiln
//!
//! Uses `miette` for pretty error reporting with help text. Every variant
//! carries the coordinate, configuration, task path or cycle needed to act on
//! it without re-running in verbose mode.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for kiln operations
#[derive(Error, Diagnostic, Debug)]
pub enum KilnError {
    #[error("Project file not found")]
    #[diagnostic(
        code(kiln::config::not_found),
        help("Create a kiln.toml in your project root, or specify one with --config")
    )]
    ConfigNotFound { searched: Vec<PathBuf> },

    #[error("Failed to parse {}", path.display())]
    #[diagnostic(code(kiln::config::parse))]
    ConfigParse {
        #[source]
        source: toml::de::Error,
        path: PathBuf,
    },

    #[error("Invalid dependency notation {notation}: {reason}")]
    #[diagnostic(
        code(kiln::dependency::notation),
        help("Use \"group:name:version\", {{ group, name, version }}, {{ project = \":path\" }} or {{ client = \"group:name:version\" }}")
    )]
    InvalidNotation { notation: String, reason: String },

    #[error("Configuration '{name}' not found")]
    #[diagnostic(code(kiln::configuration::unknown))]
    UnknownConfiguration {
        name: String,
        #[help]
        context: Option<String>,
    },

    #[error("Configuration extends cycle: {}", cycle.join(" -> "))]
    #[diagnostic(
        code(kiln::configuration::cycle),
        help("Check the 'extends' field of your configurations")
    )]
    ConfigurationCycle { cycle: Vec<String> },

    #[error("Invalid module descriptor for {module}: {reason}")]
    #[diagnostic(code(kiln::descriptor::invalid))]
    InvalidDescriptor { module: String, reason: String },

    #[error("Project '{path}' is not part of this build")]
    #[diagnostic(
        code(kiln::project::unknown),
        help("Declare the project under [projects] in the root kiln.toml")
    )]
    UnknownProject { path: String },

    #[error("Repository '{resolver}' cannot be reached: {reason}")]
    #[diagnostic(code(kiln::resolve::unreachable))]
    ResolverUnreachable { resolver: String, reason: String },

    #[error("Could not resolve all dependencies for configuration '{configuration}':\n{}", format_unresolved(unresolved))]
    #[diagnostic(
        code(kiln::resolve::unresolved),
        help("Check the declared versions and the configured repositories")
    )]
    UnresolvedDependencies {
        configuration: String,
        unresolved: Vec<(String, String)>,
    },

    #[error("Resolve report is for configuration '{found}', not '{requested}'")]
    #[diagnostic(code(kiln::resolve::configuration_mismatch))]
    ConfigurationNotInReport { requested: String, found: String },

    #[error("Artifact {artifact} of {module} is missing from the cache at {}", path.display())]
    #[diagnostic(
        code(kiln::cache::miss),
        help("Resolve the configuration again to repopulate the cache")
    )]
    CacheMiss {
        module: String,
        artifact: String,
        path: PathBuf,
    },

    #[error("Cache error: {message}")]
    #[diagnostic(code(kiln::cache))]
    Cache { message: String },

    #[error("Failed to publish {module} to '{resolver}': {reason}")]
    #[diagnostic(code(kiln::publish::failed))]
    PublishFailed {
        module: String,
        resolver: String,
        reason: String,
    },

    #[error("Task '{name}' not found")]
    #[diagnostic(
        code(kiln::task::not_found),
        help("Run `kiln tasks` to see available tasks")
    )]
    TaskNotFound { name: String, available: Vec<String> },

    #[error("Circular task dependency detected: {}", cycle.join(" -> "))]
    #[diagnostic(
        code(kiln::task::cycle),
        help("Check the 'depends' field in your task definitions")
    )]
    CyclicDependency { cycle: Vec<String> },

    #[error("Task '{task}' failed: {message}")]
    #[diagnostic(code(kiln::exec::failed))]
    TaskFailed { task: String, message: String },

    #[error("Build failed: {} task(s) failed, {} skipped", failed.len(), skipped.len())]
    #[diagnostic(code(kiln::exec::build_failed))]
    BuildFailed {
        failed: Vec<String>,
        skipped: Vec<String>,
    },

    #[error("Command not found: {command}")]
    #[diagnostic(
        code(kiln::exec::command_not_found),
        help("Ensure the command is installed and in your PATH")
    )]
    CommandNotFound { command: String },

    #[error("Invalid task configuration for '{task}': {reason}")]
    #[diagnostic(code(kiln::config::invalid_task))]
    InvalidTask { task: String, reason: String },

    #[error("I/O error")]
    #[diagnostic(code(kiln::io))]
    Io(#[from] std::io::Error),
}

fn format_unresolved(unresolved: &[(String, String)]) -> String {
    unresolved
        .iter()
        .map(|(module, reason)| format!("  - {}: {}", module, reason))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Result type alias for kiln operations
pub type Result<T> = std::result::Result<T, KilnError>;
