//! Kiln - a multi-project build tool with dependency management
//!
//! This crate provides both a CLI tool and a library for declaring projects,
//! resolving and publishing their dependencies, and running their tasks.
//!
//! # Features
//!
//! - **Configurations** - Named, extensible buckets of dependencies
//! - **Dependency resolution** - Transitive, with version conflict handling
//! - **File-system repositories** - Resolve from and publish to plain directories
//! - **Artifact cache** - Checksummed local copies of resolved artifacts
//! - **Task graph** - Dependency-ordered, optionally parallel task execution
//!
//! # Example
//!
//! ```toml
//! # kiln.toml
//!
//! [project]
//! group = "org.example"
//! version = "1.0"
//!
//! [dependencies]
//! compile = ["org.slf4j:slf4j-api:2.0.9"]
//!
//! [[repositories]]
//! name = "local"
//! path = "~/.kiln/repository"
//!
//! [tasks.classpath]
//! desc = "Print the runtime classpath"
//! resolve = "runtime"
//! ```
//!
//! # Library Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kiln::{Build, BuildRequest, ExecutorConfig, TaskExecutionGraph};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let build = Arc::new(Build::load(None)?);
//!     let tasks = Arc::new(build.tasks()?);
//!
//!     let mut graph = TaskExecutionGraph::new(tasks.clone(), ExecutorConfig::default());
//!     BuildRequest::new(vec!["classpath".into()])
//!         .build_executer()
//!         .select(&build, &tasks, &mut graph)?;
//!     graph.execute().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod action;
pub mod artifacts;
pub mod cache;
pub mod config;
pub mod error;
pub mod executer;
pub mod graph;
pub mod project;
pub mod report;
pub mod task;

// Re-export main types
pub use artifacts::{ResolutionEngine, ResolveInstruction, ResolveReport};
pub use cache::ArtifactCache;
pub use config::Config;
pub use error::{KilnError, Result};
pub use executer::{BuildExecuter, BuildRequest, ProjectDefaultsExecuter, TaskNameResolvingExecuter};
pub use graph::{ExecutorConfig, GraphState, TaskExecutionGraph, TaskOutcome, TaskResult};
pub use project::{Build, Project};
pub use report::{DependencyReport, ReportFormat};
pub use task::{Task, TaskPath, TaskRegistry};
