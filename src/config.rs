//! Configuration parsing for kiln.toml
//!
//! Handles loading and validating project files. The root project's file may
//! declare subprojects under `[projects]`; each subproject directory holds
//! its own `kiln.toml`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::artifacts::descriptor::Artifact;
use crate::artifacts::version::VersionScheme;
use crate::error::{KilnError, Result};
use crate::report::ReportFormat;

/// Default config file names to search for
pub const CONFIG_FILES: &[&str] = &["kiln.toml", "Kiln.toml"];

/// One project file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub project: ProjectSection,

    /// Environment variables for every command of this project
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Dependency configurations; a standard set is used when empty
    #[serde(default)]
    pub configurations: BTreeMap<String, ConfigurationConfig>,

    /// Dependency notations per configuration
    #[serde(default)]
    pub dependencies: BTreeMap<String, Vec<toml::Value>>,

    #[serde(default)]
    pub artifacts: Vec<Artifact>,

    /// Repositories dependencies are resolved from, in order
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,

    #[serde(default)]
    pub publish: PublishConfig,

    /// Task definitions
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskConfig>,

    /// Build-wide settings, read from the root project only
    #[serde(default)]
    pub settings: Settings,

    /// Subprojects: name to directory, relative to this file
    #[serde(default)]
    pub projects: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectSection {
    /// Defaults to the parent project's group
    #[serde(default)]
    pub group: Option<String>,

    /// Defaults to the directory name
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Tasks run when none are named on the command line
    #[serde(default)]
    pub default_tasks: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigurationConfig {
    #[serde(default)]
    pub extends: Vec<String>,

    #[serde(default = "default_true")]
    pub transitive: bool,

    #[serde(default = "default_true")]
    pub visible: bool,

    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    pub name: String,
    /// Repository root directory; `~` and `$VARS` are expanded
    pub path: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PublishConfig {
    /// Names of repositories to publish to
    #[serde(default)]
    pub repositories: Vec<String>,

    /// Replace already published revisions
    #[serde(default)]
    pub overwrite: bool,
}

/// How version conflicts are settled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    /// Newest requested revision wins
    #[default]
    Latest,
    /// Keep every requested revision
    All,
}

/// Global settings for kiln behavior
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Artifact cache directory (defaults to the platform cache dir)
    #[serde(default)]
    pub cache_dir: Option<String>,

    /// Tasks run at the same time
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    #[serde(default)]
    pub continue_on_failure: bool,

    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,

    #[serde(default)]
    pub version_scheme: VersionScheme,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_dir: None,
            parallelism: default_parallelism(),
            continue_on_failure: false,
            conflict_strategy: ConflictStrategy::default(),
            version_scheme: VersionScheme::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_parallelism() -> usize {
    1
}

/// Configuration for a single task
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    /// Human-readable description
    #[serde(default)]
    pub desc: Option<String>,

    /// Commands to run, in order
    #[serde(default)]
    pub run: Vec<String>,

    /// Tasks that must complete before this one; `name` for a task of the
    /// same project, `:path:name` for any other
    #[serde(default)]
    pub depends: Vec<String>,

    /// Resolve this configuration
    #[serde(default)]
    pub resolve: Option<String>,

    /// Tolerate unresolved dependencies when resolving
    #[serde(default)]
    pub lenient: bool,

    /// Publish this configuration
    #[serde(default)]
    pub publish: Option<String>,

    /// Print the dependency tree of this configuration
    #[serde(default)]
    pub report: Option<String>,

    /// Rendering of the report
    #[serde(default)]
    pub format: Option<ReportFormat>,

    /// Write the report to this file, relative to the project directory,
    /// instead of stdout
    #[serde(default)]
    pub output: Option<PathBuf>,

    /// Task-specific environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory, relative to the project directory
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Use shell to execute commands
    #[serde(default)]
    pub shell: bool,
}

impl TaskConfig {
    fn actions(&self) -> usize {
        [
            !self.run.is_empty(),
            self.resolve.is_some(),
            self.publish.is_some(),
            self.report.is_some(),
        ]
        .iter()
        .filter(|&&set| set)
        .count()
    }
}

impl Config {
    /// Load configuration from the specified path or search for it
    pub fn load(path: Option<&Path>) -> Result<(Self, PathBuf)> {
        let config_path = match path {
            Some(p) => {
                if p.exists() {
                    p.to_path_buf()
                } else {
                    return Err(KilnError::ConfigNotFound {
                        searched: vec![p.to_path_buf()],
                    });
                }
            }
            None => Self::find_config()?,
        };

        let config = Self::from_file(&config_path)?;
        Ok((config, config_path))
    }

    /// Parse and validate one project file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content).map_err(|e| KilnError::ConfigParse {
            source: e,
            path: path.to_path_buf(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Search for config file starting from current directory
    fn find_config() -> Result<PathBuf> {
        let mut current = std::env::current_dir()?;
        let mut searched = Vec::new();

        loop {
            for name in CONFIG_FILES {
                let candidate = current.join(name);
                searched.push(candidate.clone());
                if candidate.exists() {
                    return Ok(candidate);
                }
            }

            if !current.pop() {
                break;
            }
        }

        Err(KilnError::ConfigNotFound { searched })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for (name, task) in &self.tasks {
            if name.is_empty() || name.contains(':') {
                return Err(KilnError::InvalidTask {
                    task: name.clone(),
                    reason: "Task names must be non-empty and cannot contain ':'".to_string(),
                });
            }

            match task.actions() {
                0 if task.depends.is_empty() => {
                    return Err(KilnError::InvalidTask {
                        task: name.clone(),
                        reason: "Task must have 'run', 'resolve', 'publish', 'report' or 'depends'".to_string(),
                    });
                }
                0 | 1 => {}
                _ => {
                    return Err(KilnError::InvalidTask {
                        task: name.clone(),
                        reason: "Task can only have one of 'run', 'resolve', 'publish' and 'report'".to_string(),
                    });
                }
            }

            if task.report.is_none() && (task.format.is_some() || task.output.is_some()) {
                return Err(KilnError::InvalidTask {
                    task: name.clone(),
                    reason: "'format' and 'output' only apply to 'report' tasks".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Names of repositories to publish to that are not declared
    pub fn unknown_publish_repositories(&self) -> Vec<&str> {
        self.publish
            .repositories
            .iter()
            .filter(|name| !self.repositories.iter().any(|r| &r.name == *name))
            .map(String::as_str)
            .collect()
    }

    /// Merge environment variables for a task (project + task-specific)
    pub fn task_env(&self, task: &TaskConfig) -> HashMap<String, String> {
        let mut env = self.env.clone();
        env.extend(task.env.clone());
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_project_file() {
        let toml = r#"
            [project]
            group = "org.example"
            version = "1.0"
            default_tasks = ["build"]

            [configurations.compile]
            [configurations.runtime]
            extends = ["compile"]

            [dependencies]
            compile = ["org.slf4j:slf4j-api:2.0.9", { project = ":core" }]

            [[artifacts]]
            name = "app"
            type = "jar"
            file = "build/app.jar"
            configurations = ["runtime"]

            [[repositories]]
            name = "local"
            path = "~/.kiln/repo"

            [publish]
            repositories = ["local"]

            [tasks.build]
            desc = "Build the jar"
            run = ["make jar"]
            depends = ["classpath"]

            [tasks.classpath]
            resolve = "runtime"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.project.group.as_deref(), Some("org.example"));
        assert_eq!(config.configurations["runtime"].extends, vec!["compile"]);
        assert!(config.configurations["compile"].transitive);
        assert_eq!(config.dependencies["compile"].len(), 2);
        assert_eq!(config.artifacts[0].artifact_type, "jar");
        assert_eq!(config.tasks["classpath"].resolve.as_deref(), Some("runtime"));
        assert!(config.unknown_publish_repositories().is_empty());
        assert_eq!(config.settings.parallelism, 1);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let toml = r#"
            [tasks.build]
            run = ["make"]
            cache = true
        "#;
        assert!(toml::from_str::<Config>(toml).is_err());
    }

    #[test]
    fn test_task_needs_exactly_one_action() {
        let empty: Config = toml::from_str("[tasks.nothing]\n").unwrap();
        assert!(matches!(empty.validate(), Err(KilnError::InvalidTask { .. })));

        let both: Config = toml::from_str(
            r#"
            [tasks.both]
            run = ["make"]
            resolve = "runtime"
        "#,
        )
        .unwrap();
        assert!(matches!(both.validate(), Err(KilnError::InvalidTask { .. })));

        let aggregate: Config = toml::from_str(
            r#"
            [tasks.all]
            depends = ["a", "b"]
        "#,
        )
        .unwrap();
        aggregate.validate().unwrap();
    }

    #[test]
    fn test_report_output_options() {
        let config: Config = toml::from_str(
            r#"
            [tasks.graph]
            report = "compile"
            format = "dot"
            output = "build/deps.dot"
        "#,
        )
        .unwrap();
        config.validate().unwrap();
        let task = &config.tasks["graph"];
        assert_eq!(task.format, Some(ReportFormat::Dot));
        assert_eq!(task.output.as_deref(), Some(Path::new("build/deps.dot")));

        let stray: Config = toml::from_str(
            r#"
            [tasks.build]
            run = ["make"]
            output = "out.txt"
        "#,
        )
        .unwrap();
        assert!(matches!(stray.validate(), Err(KilnError::InvalidTask { ref task, .. }) if task == "build"));
    }

    #[test]
    fn test_settings() {
        let config: Config = toml::from_str(
            r#"
            [settings]
            parallelism = 4
            continue_on_failure = true
            conflict_strategy = "all"
            version_scheme = "lexical"
        "#,
        )
        .unwrap();
        assert_eq!(config.settings.parallelism, 4);
        assert_eq!(config.settings.conflict_strategy, ConflictStrategy::All);
        assert_eq!(config.settings.version_scheme, VersionScheme::Lexical);
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Some(Path::new("/nonexistent/kiln.toml")));
        assert!(matches!(result, Err(KilnError::ConfigNotFound { .. })));
    }
}
