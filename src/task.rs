//! Tasks, task paths and task lookup
//!
//! A task is identified by its path: the path of the project owning it
//! followed by the task name, e.g. `:build` for the root project and
//! `:core:build` for the `core` subproject. Dependencies are declared as
//! paths that may not exist yet; they are looked up when the task is added to
//! an execution graph.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::{KilnError, Result};

/// Path of the root project
pub const ROOT_PROJECT: &str = ":";

/// `<project path>:<task name>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskPath {
    project: String,
    name: String,
}

impl TaskPath {
    pub fn new(project: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            name: name.into(),
        }
    }

    /// Path of the project owning the task
    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve a dependency reference written inside this task's project.
    /// A reference starting with `:` is absolute, anything else names a task
    /// of the same project.
    pub fn resolve(&self, reference: &str) -> Result<TaskPath> {
        if reference.starts_with(':') {
            reference.parse()
        } else {
            Ok(TaskPath::new(self.project.clone(), reference))
        }
    }
}

impl fmt::Display for TaskPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.project == ROOT_PROJECT {
            write!(f, ":{}", self.name)
        } else {
            write!(f, "{}:{}", self.project, self.name)
        }
    }
}

impl FromStr for TaskPath {
    type Err = KilnError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || KilnError::InvalidTask {
            task: s.to_string(),
            reason: "task paths look like ':name' or ':project:name'".to_string(),
        };

        let (project, name) = s.rsplit_once(':').ok_or_else(invalid)?;
        if name.is_empty() || !s.starts_with(':') || (project.len() > 1 && project.ends_with(':')) {
            return Err(invalid());
        }
        let project = if project.is_empty() { ROOT_PROJECT } else { project };
        Ok(Self::new(project, name))
    }
}

/// The work a task performs
pub trait TaskAction: Send + Sync + fmt::Debug {
    fn execute<'a>(&'a self, task: &'a Task) -> BoxFuture<'a, Result<()>>;

    /// One line per step, shown in dry runs
    fn describe(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A unit of build work
#[derive(Debug, Clone)]
pub struct Task {
    pub path: TaskPath,
    pub description: Option<String>,
    /// Dependency references, resolved against `path`
    pub depends_on: Vec<String>,
    pub action: Option<Arc<dyn TaskAction>>,
}

impl Task {
    pub fn new(path: TaskPath) -> Self {
        Self {
            path,
            description: None,
            depends_on: Vec::new(),
            action: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn depending_on<I, S>(mut self, depends_on: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(depends_on.into_iter().map(Into::into));
        self
    }

    pub fn with_action(mut self, action: Arc<dyn TaskAction>) -> Self {
        self.action = Some(action);
        self
    }
}

/// The tasks a task depends on
pub trait TaskDependencyResolver: Send + Sync {
    fn resolve_dependencies(&self, task: &Task) -> Result<Vec<Arc<Task>>>;
}

/// All tasks of a build, in registration order
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: Vec<Arc<Task>>,
    index: HashMap<TaskPath, usize>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task: Task) -> Result<Arc<Task>> {
        if self.index.contains_key(&task.path) {
            return Err(KilnError::InvalidTask {
                task: task.path.to_string(),
                reason: "task is defined twice".to_string(),
            });
        }
        let task = Arc::new(task);
        self.index.insert(task.path.clone(), self.tasks.len());
        self.tasks.push(Arc::clone(&task));
        Ok(task)
    }

    pub fn get(&self, path: &TaskPath) -> Option<Arc<Task>> {
        self.index.get(path).map(|&i| Arc::clone(&self.tasks[i]))
    }

    /// Look a task up by its textual path
    pub fn find(&self, path: &str) -> Result<Arc<Task>> {
        path.parse::<TaskPath>()
            .ok()
            .and_then(|p| self.get(&p))
            .ok_or_else(|| self.not_found(path))
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Arc<Task>> {
        self.tasks.iter()
    }

    /// Tasks named `name` in `project` and the projects below it
    pub fn named_in_tree(&self, project: &str, name: &str) -> Vec<Arc<Task>> {
        self.tasks
            .iter()
            .filter(|t| t.path.name() == name && is_within(t.path.project(), project))
            .cloned()
            .collect()
    }

    pub fn paths(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.path.to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub(crate) fn not_found(&self, name: &str) -> KilnError {
        KilnError::TaskNotFound {
            name: name.to_string(),
            available: self.paths(),
        }
    }
}

/// Whether `project` is `ancestor` or one of its subprojects
fn is_within(project: &str, ancestor: &str) -> bool {
    ancestor == ROOT_PROJECT
        || project == ancestor
        || project
            .strip_prefix(ancestor)
            .is_some_and(|rest| rest.starts_with(':'))
}

impl TaskDependencyResolver for TaskRegistry {
    fn resolve_dependencies(&self, task: &Task) -> Result<Vec<Arc<Task>>> {
        task.depends_on
            .iter()
            .map(|reference| {
                let path = task.path.resolve(reference)?;
                self.get(&path).ok_or_else(|| self.not_found(&path.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_path_parse_and_display() {
        let root: TaskPath = ":build".parse().unwrap();
        assert_eq!(root.project(), ":");
        assert_eq!(root.name(), "build");
        assert_eq!(root.to_string(), ":build");

        let nested: TaskPath = ":libs:core:test".parse().unwrap();
        assert_eq!(nested.project(), ":libs:core");
        assert_eq!(nested.to_string(), ":libs:core:test");

        assert!("build".parse::<TaskPath>().is_err());
        assert!(":core:".parse::<TaskPath>().is_err());
    }

    #[test]
    fn test_relative_and_absolute_references() {
        let path = TaskPath::new(":core", "test");
        assert_eq!(path.resolve("compile").unwrap().to_string(), ":core:compile");
        assert_eq!(path.resolve(":clean").unwrap().to_string(), ":clean");
    }

    #[test]
    fn test_registry_resolves_dependencies() {
        let mut registry = TaskRegistry::new();
        registry.register(Task::new(TaskPath::new(":", "clean"))).unwrap();
        registry
            .register(Task::new(TaskPath::new(":core", "compile")))
            .unwrap();
        let test = registry
            .register(Task::new(TaskPath::new(":core", "test")).depending_on(["compile", ":clean"]))
            .unwrap();

        let deps = registry.resolve_dependencies(&test).unwrap();
        let paths: Vec<_> = deps.iter().map(|t| t.path.to_string()).collect();
        assert_eq!(paths, vec![":core:compile", ":clean"]);
    }

    #[test]
    fn test_unknown_dependency() {
        let mut registry = TaskRegistry::new();
        let task = registry
            .register(Task::new(TaskPath::new(":", "build")).depending_on(["missing"]))
            .unwrap();

        match registry.resolve_dependencies(&task) {
            Err(KilnError::TaskNotFound { name, available }) => {
                assert_eq!(name, ":missing");
                assert_eq!(available, vec![":build"]);
            }
            other => panic!("expected TaskNotFound, got {:?}", other.map(|d| d.len())),
        }
    }

    #[test]
    fn test_named_in_tree() {
        let mut registry = TaskRegistry::new();
        for (project, name) in [(":", "build"), (":core", "build"), (":core-extra", "build"), (":core", "test")] {
            registry.register(Task::new(TaskPath::new(project, name))).unwrap();
        }

        assert_eq!(registry.named_in_tree(":", "build").len(), 3);
        let core: Vec<_> = registry
            .named_in_tree(":core", "build")
            .iter()
            .map(|t| t.path.to_string())
            .collect();
        assert_eq!(core, vec![":core:build"]);
        assert!(matches!(registry.find(":nope"), Err(KilnError::TaskNotFound { .. })));
        assert_eq!(registry.len(), 4);
    }
}
