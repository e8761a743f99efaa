//! Selecting the tasks a build runs
//!
//! A [`BuildExecuter`] fills a [`TaskExecutionGraph`] from the command line or
//! from the projects' default tasks. Custom executers can be plugged in through
//! [`BuildRequest`].

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::graph::TaskExecutionGraph;
use crate::project::Build;
use crate::task::{TaskPath, TaskRegistry, ROOT_PROJECT};

/// Decides which tasks of a build get executed
pub trait BuildExecuter: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Add the selected tasks to `graph`
    fn select(&self, build: &Build, tasks: &TaskRegistry, graph: &mut TaskExecutionGraph) -> Result<()>;
}

/// Runs the tasks named on the command line, one batch per name.
///
/// A name containing `:` is a task path (`:build`, `:core:test`, or
/// `core:test` relative to the root); a plain name selects that task in every
/// project that has it.
#[derive(Debug, Clone)]
pub struct TaskNameResolvingExecuter {
    names: Vec<String>,
}

impl TaskNameResolvingExecuter {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl BuildExecuter for TaskNameResolvingExecuter {
    fn name(&self) -> &str {
        "task names"
    }

    /// Every name is looked up before anything is added, so an unknown name
    /// leaves `graph` untouched
    fn select(&self, _build: &Build, tasks: &TaskRegistry, graph: &mut TaskExecutionGraph) -> Result<()> {
        let mut batches = Vec::with_capacity(self.names.len());
        for name in &self.names {
            let selected = if name.contains(':') {
                let path = if name.starts_with(':') {
                    name.clone()
                } else {
                    format!(":{}", name)
                };
                vec![tasks.find(&path)?]
            } else {
                let found = tasks.named_in_tree(ROOT_PROJECT, name);
                if found.is_empty() {
                    return Err(tasks.not_found(name));
                }
                found
            };
            debug!(name = %name, tasks = selected.len(), "selected tasks");
            batches.push(selected);
        }
        for selected in batches {
            graph.add_tasks(selected)?;
        }
        Ok(())
    }
}

/// Runs the default tasks of every project, root first
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectDefaultsExecuter;

impl BuildExecuter for ProjectDefaultsExecuter {
    fn name(&self) -> &str {
        "project defaults"
    }

    fn select(&self, build: &Build, tasks: &TaskRegistry, graph: &mut TaskExecutionGraph) -> Result<()> {
        let mut selected = Vec::new();
        for project in build.projects() {
            for name in &project.default_tasks {
                let path = if name.starts_with(':') {
                    name.parse()?
                } else {
                    TaskPath::new(project.path.clone(), name.clone())
                };
                let task = tasks
                    .get(&path)
                    .ok_or_else(|| tasks.not_found(&path.to_string()))?;
                selected.push(task);
            }
        }
        if selected.is_empty() {
            debug!("no default tasks declared");
            return Ok(());
        }
        graph.add_tasks(selected)
    }
}

/// What the user asked the build to do
#[derive(Clone, Default)]
pub struct BuildRequest {
    pub task_names: Vec<String>,
    /// Overrides task selection entirely
    pub executer: Option<Arc<dyn BuildExecuter>>,
}

impl fmt::Debug for BuildRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildRequest")
            .field("task_names", &self.task_names)
            .field("executer", &self.executer.as_ref().map(|e| e.name().to_string()))
            .finish()
    }
}

impl BuildRequest {
    pub fn new(task_names: Vec<String>) -> Self {
        Self {
            task_names,
            executer: None,
        }
    }

    pub fn with_executer(mut self, executer: Arc<dyn BuildExecuter>) -> Self {
        self.executer = Some(executer);
        self
    }

    /// The custom executer if one is set, otherwise one selecting the named
    /// tasks, otherwise the projects' default tasks
    pub fn build_executer(&self) -> Arc<dyn BuildExecuter> {
        if let Some(executer) = &self.executer {
            return Arc::clone(executer);
        }
        if self.task_names.is_empty() {
            Arc::new(ProjectDefaultsExecuter)
        } else {
            Arc::new(TaskNameResolvingExecuter::new(self.task_names.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KilnError;
    use crate::graph::ExecutorConfig;

    fn write(dir: &std::path::Path, file: &str, content: &str) {
        let path = dir.join(file);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn build(temp: &tempfile::TempDir) -> (Arc<Build>, TaskRegistry) {
        write(
            temp.path(),
            "kiln.toml",
            r#"
            [project]
            group = "org.example"
            default_tasks = ["build"]

            [tasks.clean]
            run = ["true"]

            [tasks.build]
            depends = ["clean"]

            [projects]
            core = "core"
            api = "api"
        "#,
        );
        write(
            temp.path(),
            "core/kiln.toml",
            r#"
            [project]
            default_tasks = ["test"]

            [tasks.build]
            run = ["true"]

            [tasks.test]
            run = ["true"]
        "#,
        );
        write(temp.path(), "api/kiln.toml", "[tasks.build]\nrun = [\"true\"]\n");

        let build = Arc::new(Build::load(Some(&temp.path().join("kiln.toml"))).unwrap());
        let tasks = build.tasks().unwrap();
        (build, tasks)
    }

    fn graph(tasks: &TaskRegistry) -> TaskExecutionGraph {
        TaskExecutionGraph::new(Arc::new(tasks.clone()), ExecutorConfig::default())
    }

    fn paths(graph: &TaskExecutionGraph) -> Vec<String> {
        graph
            .all_tasks()
            .unwrap()
            .iter()
            .map(|t| t.path.to_string())
            .collect()
    }

    #[test]
    fn test_plain_name_selects_across_projects() {
        let temp = tempfile::tempdir().unwrap();
        let (build, tasks) = build(&temp);
        let mut graph = graph(&tasks);

        BuildRequest::new(vec!["build".into()])
            .build_executer()
            .select(&build, &tasks, &mut graph)
            .unwrap();

        // :clean goes in ahead of the root :build that needs it
        assert_eq!(paths(&graph), vec![":clean", ":build", ":api:build", ":core:build"]);
    }

    #[test]
    fn test_one_batch_per_name() {
        let temp = tempfile::tempdir().unwrap();
        let (build, tasks) = build(&temp);
        let mut graph = graph(&tasks);

        TaskNameResolvingExecuter::new(vec![":core:test".into(), "core:build".into()])
            .select(&build, &tasks, &mut graph)
            .unwrap();

        assert_eq!(paths(&graph), vec![":core:test", ":core:build"]);
    }

    #[test]
    fn test_unknown_name() {
        let temp = tempfile::tempdir().unwrap();
        let (build, tasks) = build(&temp);
        let mut graph = graph(&tasks);

        let result = TaskNameResolvingExecuter::new(vec!["deploy".into()]).select(&build, &tasks, &mut graph);
        match result {
            Err(KilnError::TaskNotFound { name, available }) => {
                assert_eq!(name, "deploy");
                assert!(available.contains(&":core:test".to_string()));
            }
            other => panic!("expected TaskNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_later_name_selects_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let (build, tasks) = build(&temp);
        let mut graph = graph(&tasks);

        let result = TaskNameResolvingExecuter::new(vec!["build".into(), "nope".into()]).select(&build, &tasks, &mut graph);
        assert!(matches!(result, Err(KilnError::TaskNotFound { ref name, .. }) if name == "nope"));
        assert!(graph.is_empty());
        assert_eq!(graph.state(), crate::graph::GraphState::Empty);
    }

    #[test]
    fn test_project_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let (build, tasks) = build(&temp);
        let mut graph = graph(&tasks);

        BuildRequest::default()
            .build_executer()
            .select(&build, &tasks, &mut graph)
            .unwrap();

        assert_eq!(paths(&graph), vec![":clean", ":build", ":core:test"]);
    }

    #[derive(Debug)]
    struct OnlyClean;

    impl BuildExecuter for OnlyClean {
        fn name(&self) -> &str {
            "only clean"
        }

        fn select(&self, _build: &Build, tasks: &TaskRegistry, graph: &mut TaskExecutionGraph) -> Result<()> {
            graph.add_tasks(vec![tasks.find(":clean")?])
        }
    }

    #[test]
    fn test_custom_executer_wins() {
        let temp = tempfile::tempdir().unwrap();
        let (build, tasks) = build(&temp);
        let mut graph = graph(&tasks);

        let request = BuildRequest::new(vec!["build".into()]).with_executer(Arc::new(OnlyClean));
        let executer = request.build_executer();
        assert_eq!(executer.name(), "only clean");
        executer.select(&build, &tasks, &mut graph).unwrap();

        assert_eq!(paths(&graph), vec![":clean"]);
    }
}
