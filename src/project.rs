//! Projects of a build and their wiring
//!
//! A [`Build`] is loaded from the root `kiln.toml` and every subproject it
//! declares. Each [`Project`] carries its configurations, declared
//! dependencies, artifacts and repositories; the build owns the resolution
//! engine, whose project registry lets projects depend on each other.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::action::{CommandAction, DependencyReportAction, PublishAction, ResolveAction};
use crate::artifacts::configuration::{Configuration, ConfigurationContainer};
use crate::artifacts::dependency::DependencyContainer;
use crate::artifacts::descriptor::{ArtifactContainer, DescriptorScope, ModuleDescriptor};
use crate::artifacts::engine::{ResolutionEngine, ResolveInstruction};
use crate::artifacts::module::ModuleRevisionId;
use crate::artifacts::publish::PublishInstruction;
use crate::artifacts::report::ResolveReport;
use crate::artifacts::resolver::{DependencyResolver, FileSystemResolver, ProjectRegistry};
use crate::artifacts::version::{AllRevisionsConflictManager, ConflictManager, LatestRevisionConflictManager};
use crate::cache::ArtifactCache;
use crate::config::{Config, ConflictStrategy, Settings, TaskConfig};
use crate::error::{KilnError, Result};
use crate::report::DependencyReport;
use crate::task::{Task, TaskPath, TaskRegistry, ROOT_PROJECT};

const UNSPECIFIED_VERSION: &str = "unspecified";

/// Configurations a project gets when it declares none
fn standard_configurations() -> Vec<Configuration> {
    vec![
        Configuration::new("compile"),
        Configuration::new("runtime").extending(["compile"]),
        Configuration::new("testCompile").extending(["compile"]),
        Configuration::new("testRuntime").extending(["runtime", "testCompile"]),
        Configuration::new("default").extending(["runtime"]),
    ]
}

/// One project of a build
#[derive(Debug)]
pub struct Project {
    /// `:` for the root project, `:name` (or `:parent:name`) for subprojects
    pub path: String,
    pub dir: PathBuf,
    pub description: Option<String>,
    pub default_tasks: Vec<String>,
    pub configurations: ConfigurationContainer,
    pub dependencies: DependencyContainer,
    pub artifacts: ArtifactContainer,
    pub repositories: Vec<Arc<dyn DependencyResolver>>,
    pub publish_repositories: Vec<Arc<dyn DependencyResolver>>,
    pub overwrite: bool,
    config: Config,
}

impl Project {
    /// Build a project from its parsed file. `dir` is the directory holding it.
    pub fn from_config(path: &str, dir: &Path, config: Config, parent_group: Option<&str>) -> Result<Self> {
        let section = &config.project;
        let dir_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());
        let module = ModuleRevisionId::new(
            section
                .group
                .clone()
                .or_else(|| parent_group.map(str::to_string))
                .unwrap_or_else(|| dir_name.clone()),
            section.name.clone().unwrap_or(dir_name),
            section
                .version
                .clone()
                .unwrap_or_else(|| UNSPECIFIED_VERSION.to_string()),
        );

        let configurations = if config.configurations.is_empty() {
            ConfigurationContainer::from_configurations(standard_configurations())?
        } else {
            ConfigurationContainer::from_configurations(config.configurations.iter().map(|(name, c)| Configuration {
                name: name.clone(),
                extends: c.extends.clone(),
                transitive: c.transitive,
                visible: c.visible,
                description: c.description.clone(),
            }))?
        };

        let mut dependencies = DependencyContainer::new(module);
        for (conf, notations) in &config.dependencies {
            for notation in notations {
                dependencies.add_notation(conf, notation, &configurations)?;
            }
        }

        let artifacts = config
            .artifacts
            .iter()
            .map(|artifact| match &artifact.file {
                Some(file) => artifact.clone().with_file(dir.join(file)),
                None => artifact.clone(),
            })
            .collect();

        let repositories: Vec<Arc<dyn DependencyResolver>> = config
            .repositories
            .iter()
            .map(|r| {
                let resolver: Arc<dyn DependencyResolver> =
                    Arc::new(FileSystemResolver::new(r.name.clone(), expand_path(&r.path, dir)));
                resolver
            })
            .collect();

        if let Some(name) = config.unknown_publish_repositories().first() {
            return Err(KilnError::PublishFailed {
                module: dependencies.module().to_string(),
                resolver: name.to_string(),
                reason: "repository is not declared under [[repositories]]".to_string(),
            });
        }
        let publish_repositories = config
            .repositories
            .iter()
            .zip(&repositories)
            .filter(|(r, _)| config.publish.repositories.contains(&r.name))
            .map(|(_, resolver)| Arc::clone(resolver))
            .collect();

        Ok(Self {
            path: path.to_string(),
            dir: dir.to_path_buf(),
            description: section.description.clone(),
            default_tasks: section.default_tasks.clone(),
            configurations,
            dependencies,
            artifacts,
            repositories,
            publish_repositories,
            overwrite: config.publish.overwrite,
            config,
        })
    }

    pub fn module(&self) -> &ModuleRevisionId {
        self.dependencies.module()
    }

    pub fn tasks(&self) -> &BTreeMap<String, TaskConfig> {
        &self.config.tasks
    }
}

/// Expand `~` and `$VARS`, then anchor relative paths at `base`
fn expand_path(path: &str, base: &Path) -> PathBuf {
    let expanded = shellexpand::full(path)
        .map(|p| PathBuf::from(p.into_owned()))
        .unwrap_or_else(|_| PathBuf::from(path));
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}

fn child_path(parent: &str, name: &str) -> String {
    if parent == ROOT_PROJECT {
        format!(":{}", name)
    } else {
        format!("{}:{}", parent, name)
    }
}

/// Every project of a build plus the shared resolution state
#[derive(Debug)]
pub struct Build {
    pub root_dir: PathBuf,
    pub settings: Settings,
    pub cache_root: PathBuf,
    projects: Vec<Project>,
    engine: ResolutionEngine,
}

impl Build {
    /// Load the build rooted at the given (or discovered) project file
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let (config, path) = Config::load(config_path)?;
        let root_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::from_config(config, &root_dir)
    }

    /// Assemble a build from the root project's parsed file. Subproject files
    /// are read relative to `root_dir`.
    pub fn from_config(config: Config, root_dir: &Path) -> Result<Self> {
        let settings = config.settings.clone();
        let mut projects = Vec::new();
        Self::load_projects(ROOT_PROJECT, root_dir, config, None, &mut projects)?;

        // project modules first, so project references can be converted
        let mut registry = ProjectRegistry::new();
        for project in &projects {
            let mut descriptor = ModuleDescriptor::new(project.module().clone());
            descriptor.configurations = project.configurations.iter().cloned().collect();
            registry.register(project.path.clone(), descriptor);
        }
        let skeleton = ResolutionEngine::new(registry);
        let mut registry = ProjectRegistry::new();
        for project in &projects {
            let descriptor = skeleton.converter().convert(
                &DescriptorScope::default(),
                &project.configurations,
                &project.dependencies,
                &project.artifacts,
            )?;
            registry.register(project.path.clone(), descriptor);
        }

        let conflict_manager: Arc<dyn ConflictManager> = match settings.conflict_strategy {
            ConflictStrategy::Latest => Arc::new(LatestRevisionConflictManager::new(settings.version_scheme)),
            ConflictStrategy::All => Arc::new(AllRevisionsConflictManager),
        };
        let cache_root = match &settings.cache_dir {
            Some(dir) => expand_path(dir, root_dir),
            None => ArtifactCache::default_dir(),
        };

        debug!(projects = projects.len(), cache = %cache_root.display(), "loaded build");
        Ok(Self {
            root_dir: root_dir.to_path_buf(),
            cache_root,
            engine: ResolutionEngine::new(registry).with_conflict_manager(conflict_manager),
            settings,
            projects,
        })
    }

    fn load_projects(
        path: &str,
        dir: &Path,
        config: Config,
        parent_group: Option<&str>,
        projects: &mut Vec<Project>,
    ) -> Result<()> {
        let children: Vec<(String, PathBuf)> = config
            .projects
            .iter()
            .map(|(name, sub)| (child_path(path, name), dir.join(sub)))
            .collect();

        let project = Project::from_config(path, dir, config, parent_group)?;
        let group = project.module().group().to_string();
        projects.push(project);

        for (child, child_dir) in children {
            let file = find_project_file(&child_dir).ok_or_else(|| KilnError::ConfigNotFound {
                searched: vec![child_dir.join(crate::config::CONFIG_FILES[0])],
            })?;
            let child_config = Config::from_file(&file)?;
            Self::load_projects(&child, &child_dir, child_config, Some(&group), projects)?;
        }
        Ok(())
    }

    /// Projects, root first
    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    pub fn root(&self) -> &Project {
        &self.projects[0]
    }

    pub fn project(&self, path: &str) -> Result<&Project> {
        self.projects
            .iter()
            .find(|p| p.path == path)
            .ok_or_else(|| KilnError::UnknownProject { path: path.to_string() })
    }

    pub fn engine(&self) -> &ResolutionEngine {
        &self.engine
    }

    fn instruction(lenient: bool) -> ResolveInstruction {
        if lenient {
            ResolveInstruction::lenient()
        } else {
            ResolveInstruction::default()
        }
    }

    /// Files of `conf` of the project at `path`
    pub fn resolve(&self, path: &str, conf: &str, lenient: bool) -> Result<Vec<PathBuf>> {
        let project = self.project(path)?;
        self.engine.resolve(
            conf,
            &project.configurations,
            &project.dependencies,
            &project.repositories,
            &Self::instruction(lenient),
            &self.cache_root,
        )
    }

    pub fn resolve_report(&self, path: &str, conf: &str, lenient: bool) -> Result<ResolveReport> {
        let project = self.project(path)?;
        self.engine.resolve_as_report(
            conf,
            &project.configurations,
            &project.dependencies,
            &project.repositories,
            &Self::instruction(lenient),
            &self.cache_root,
        )
    }

    /// Publish `conf` of the project at `path` to its publish repositories
    pub fn publish(&self, path: &str, conf: &str) -> Result<()> {
        let project = self.project(path)?;
        let instruction = PublishInstruction {
            overwrite: project.overwrite,
            ..Default::default()
        };
        self.engine.publish(
            conf,
            &instruction,
            &project.publish_repositories,
            &project.configurations,
            &project.dependencies,
            &project.artifacts,
            &self.cache_root,
        )
    }

    /// Tasks of every project, with their actions bound to this build
    pub fn tasks(self: &Arc<Self>) -> Result<TaskRegistry> {
        let mut registry = TaskRegistry::new();
        for project in &self.projects {
            for (name, config) in project.tasks() {
                let mut task = Task::new(TaskPath::new(project.path.clone(), name.clone()))
                    .depending_on(config.depends.iter().cloned());
                task.description = config.desc.clone();

                if !config.run.is_empty() {
                    let cwd = match &config.cwd {
                        Some(cwd) => project.dir.join(cwd),
                        None => project.dir.clone(),
                    };
                    task = task.with_action(Arc::new(CommandAction::new(
                        config.run.clone(),
                        cwd,
                        project.config.task_env(config),
                        config.shell,
                    )));
                } else if let Some(conf) = &config.resolve {
                    task = task.with_action(Arc::new(ResolveAction::new(
                        Arc::clone(self),
                        project.path.clone(),
                        conf.clone(),
                        config.lenient,
                    )));
                } else if let Some(conf) = &config.publish {
                    task = task.with_action(Arc::new(PublishAction::new(
                        Arc::clone(self),
                        project.path.clone(),
                        conf.clone(),
                    )));
                } else if let Some(conf) = &config.report {
                    let mut report =
                        DependencyReport::new(Some(conf.clone())).with_format(config.format.unwrap_or_default());
                    if let Some(output) = &config.output {
                        report = report.with_output(project.dir.join(output));
                    }
                    task = task.with_action(Arc::new(DependencyReportAction::new(
                        Arc::clone(self),
                        project.path.clone(),
                        report,
                    )));
                }

                registry.register(task)?;
            }
        }
        Ok(registry)
    }
}

fn find_project_file(dir: &Path) -> Option<PathBuf> {
    crate::config::CONFIG_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, file: &str, content: &str) {
        let path = dir.join(file);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_standard_configurations() {
        let temp = tempfile::tempdir().unwrap();
        let config: Config = toml::from_str("[project]\ngroup = \"org.example\"\nversion = \"1.0\"").unwrap();
        let build = Build::from_config(config, temp.path()).unwrap();

        let root = build.root();
        assert_eq!(root.path, ":");
        assert_eq!(root.module().group(), "org.example");
        assert_eq!(
            root.configurations.chain("testRuntime").unwrap(),
            vec!["testRuntime", "runtime", "compile", "testCompile"]
        );
    }

    #[test]
    fn test_subprojects_and_project_references() {
        let temp = tempfile::tempdir().unwrap();
        write(
            temp.path(),
            "kiln.toml",
            r#"
            [project]
            group = "org.example"
            name = "app"
            version = "1.0"

            [dependencies]
            compile = [{ project = ":core" }]

            [projects]
            core = "core"
        "#,
        );
        write(
            temp.path(),
            "core/kiln.toml",
            r#"
            [project]
            version = "2.0"

            [[artifacts]]
            name = "core"
            type = "jar"
            file = "build/core.jar"
        "#,
        );
        write(temp.path(), "core/build/core.jar", "classes");

        let build = Build::load(Some(&temp.path().join("kiln.toml"))).unwrap();
        let core = build.project(":core").unwrap();
        assert_eq!(core.module().to_string(), "org.example:core:2.0");

        let files = build.resolve(":", "runtime", false).unwrap();
        assert_eq!(files, vec![temp.path().join("core/build/core.jar")]);
    }

    #[test]
    fn test_unknown_project_reference() {
        let temp = tempfile::tempdir().unwrap();
        let config: Config = toml::from_str(
            r#"
            [dependencies]
            compile = [{ project = ":missing" }]
        "#,
        )
        .unwrap();
        let result = Build::from_config(config, temp.path());
        assert!(matches!(result, Err(KilnError::UnknownProject { .. })));
    }

    #[test]
    fn test_invalid_notation_rejected_at_load() {
        let temp = tempfile::tempdir().unwrap();
        let config: Config = toml::from_str(
            r#"
            [dependencies]
            compile = ["not-a-coordinate"]
        "#,
        )
        .unwrap();
        let result = Build::from_config(config, temp.path());
        assert!(matches!(result, Err(KilnError::InvalidNotation { .. })));
    }

    #[test]
    fn test_tasks_bound_to_projects() {
        let temp = tempfile::tempdir().unwrap();
        let config: Config = toml::from_str(
            r#"
            [tasks.compile]
            run = ["echo compile"]

            [tasks.classpath]
            resolve = "runtime"
            depends = ["compile"]
        "#,
        )
        .unwrap();
        let build = Arc::new(Build::from_config(config, temp.path()).unwrap());
        let registry = build.tasks().unwrap();

        assert_eq!(registry.paths(), vec![":classpath", ":compile"]);
        let classpath = registry.find(":classpath").unwrap();
        assert!(classpath.action.is_some());
        assert_eq!(classpath.depends_on, vec!["compile"]);
    }
}
