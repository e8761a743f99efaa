//! Task actions: external commands and the dependency operations of a build

use std::collections::HashMap;
use std::fmt;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use console::style;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{KilnError, Result};
use crate::project::Build;
use crate::report::DependencyReport;
use crate::task::{Task, TaskAction};

/// Runs commands one after the other in a project directory
#[derive(Debug, Clone)]
pub struct CommandAction {
    commands: Vec<String>,
    cwd: PathBuf,
    env: HashMap<String, String>,
    shell: bool,
}

impl CommandAction {
    pub fn new(commands: Vec<String>, cwd: PathBuf, env: HashMap<String, String>, shell: bool) -> Self {
        Self {
            commands,
            cwd,
            env,
            shell,
        }
    }

    async fn execute_command(&self, task: &Task, cmd: &str) -> Result<()> {
        let parts = parse_command(cmd, self.shell);

        let mut command = if self.shell {
            let shell = if cfg!(windows) { "cmd" } else { "sh" };
            let flag = if cfg!(windows) { "/C" } else { "-c" };
            let mut c = Command::new(shell);
            c.arg(flag).arg(cmd);
            c
        } else {
            let Some(program) = parts.first() else {
                return Ok(());
            };
            if which::which(program).is_err() && !self.cwd.join(program).is_file() {
                return Err(KilnError::CommandNotFound {
                    command: program.clone(),
                });
            }
            let mut c = Command::new(program);
            c.args(&parts[1..]);
            c
        };

        command
            .current_dir(&self.cwd)
            .envs(&self.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(task = %task.path, command = cmd, "running command");
        let output = command.output().await?;

        // one write per command so parallel tasks do not interleave lines
        std::io::stdout().lock().write_all(&output.stdout)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output
                .status
                .code()
                .map_or_else(|| "a signal".to_string(), |c| format!("exit code {}", c));
            let mut message = format!("`{}` failed with {}", cmd, code);
            if !stderr.trim().is_empty() {
                message.push_str(":\n");
                message.push_str(stderr.trim_end());
            }
            return Err(KilnError::TaskFailed {
                task: task.path.to_string(),
                message,
            });
        }

        std::io::stderr().lock().write_all(&output.stderr)?;
        Ok(())
    }
}

impl TaskAction for CommandAction {
    fn execute<'a>(&'a self, task: &'a Task) -> BoxFuture<'a, Result<()>> {
        async move {
            for cmd in &self.commands {
                self.execute_command(task, cmd).await?;
            }
            Ok(())
        }
        .boxed()
    }

    fn describe(&self) -> Vec<String> {
        self.commands.clone()
    }
}

/// Split a command line into program and arguments
fn parse_command(cmd: &str, use_shell: bool) -> Vec<String> {
    if use_shell {
        return vec![cmd.to_string()];
    }

    // Simple shell-like parsing (handles quotes)
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut quote_char = '"';

    for c in cmd.chars() {
        match c {
            '"' | '\'' if !in_quotes => {
                in_quotes = true;
                quote_char = c;
            }
            c if c == quote_char && in_quotes => {
                in_quotes = false;
            }
            ' ' if !in_quotes => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            _ => {
                current.push(c);
            }
        }
    }

    if !current.is_empty() {
        parts.push(current);
    }

    parts
}

/// Run blocking build work off the async runtime
async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| KilnError::Io(std::io::Error::other(e.to_string())))?
}

/// Resolves a configuration and prints its files
#[derive(Debug)]
pub struct ResolveAction {
    build: Arc<Build>,
    project: String,
    configuration: String,
    lenient: bool,
}

impl ResolveAction {
    pub fn new(build: Arc<Build>, project: String, configuration: String, lenient: bool) -> Self {
        Self {
            build,
            project,
            configuration,
            lenient,
        }
    }
}

impl TaskAction for ResolveAction {
    fn execute<'a>(&'a self, _task: &'a Task) -> BoxFuture<'a, Result<()>> {
        let build = Arc::clone(&self.build);
        let project = self.project.clone();
        let conf = self.configuration.clone();
        let lenient = self.lenient;

        async move {
            let files = blocking(move || build.resolve(&project, &conf, lenient)).await?;
            let mut out = String::new();
            for file in &files {
                out.push_str(&file.display().to_string());
                out.push('\n');
            }
            std::io::stdout().lock().write_all(out.as_bytes())?;
            Ok(())
        }
        .boxed()
    }

    fn describe(&self) -> Vec<String> {
        vec![format!("resolve {} of {}", self.configuration, self.project)]
    }
}

/// Publishes a configuration to the project's publish repositories
#[derive(Debug)]
pub struct PublishAction {
    build: Arc<Build>,
    project: String,
    configuration: String,
}

impl PublishAction {
    pub fn new(build: Arc<Build>, project: String, configuration: String) -> Self {
        Self {
            build,
            project,
            configuration,
        }
    }
}

impl TaskAction for PublishAction {
    fn execute<'a>(&'a self, _task: &'a Task) -> BoxFuture<'a, Result<()>> {
        let build = Arc::clone(&self.build);
        let project = self.project.clone();
        let conf = self.configuration.clone();

        async move {
            let module = build.project(&project)?.module().clone();
            blocking(move || build.publish(&project, &conf)).await?;
            info!(module = %module, configuration = %self.configuration, "published");
            println!("{} Published {}", style("✓").green(), style(&module).bold());
            Ok(())
        }
        .boxed()
    }

    fn describe(&self) -> Vec<String> {
        vec![format!("publish {} of {}", self.configuration, self.project)]
    }
}

/// Prints the dependency tree of a configuration
#[derive(Debug)]
pub struct DependencyReportAction {
    build: Arc<Build>,
    project: String,
    report: DependencyReport,
}

impl DependencyReportAction {
    pub fn new(build: Arc<Build>, project: String, report: DependencyReport) -> Self {
        Self { build, project, report }
    }
}

impl TaskAction for DependencyReportAction {
    fn execute<'a>(&'a self, _task: &'a Task) -> BoxFuture<'a, Result<()>> {
        let build = Arc::clone(&self.build);
        let project = self.project.clone();
        let report = self.report.clone();

        async move {
            if let Some(text) = blocking(move || report.generate(&build, &project)).await? {
                std::io::stdout().lock().write_all(text.as_bytes())?;
            }
            Ok(())
        }
        .boxed()
    }

    fn describe(&self) -> Vec<String> {
        let mut step = format!("report {} of {}", self.report.configuration(), self.project);
        if let Some(output) = self.report.output() {
            step.push_str(&format!(" to {}", output.display()));
        }
        vec![step]
    }
}

/// An action backed by a closure
pub struct FnAction<F> {
    f: F,
}

impl<F> FnAction<F>
where
    F: Fn(&Task) -> Result<()> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for FnAction<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnAction").finish_non_exhaustive()
    }
}

impl<F> TaskAction for FnAction<F>
where
    F: Fn(&Task) -> Result<()> + Send + Sync + 'static,
{
    fn execute<'a>(&'a self, task: &'a Task) -> BoxFuture<'a, Result<()>> {
        let result = (self.f)(task);
        async move { result }.boxed()
    }
}
