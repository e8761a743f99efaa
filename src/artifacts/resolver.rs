//! Dependency resolvers
//!
//! A resolver answers two questions for the resolution engine: "what does
//! this module revision look like" and "give me this artifact". A resolver
//! that does not know a module says so with `Ok(None)`; a resolver that
//! cannot be asked at all (missing repository, I/O failure) returns an error,
//! which the engine treats as fatal rather than as a missing module.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use super::descriptor::{Artifact, ModuleDescriptor};
use super::module::ModuleRevisionId;

/// Name of the metadata file inside a repository module directory
pub const MODULE_METADATA_FILE: &str = "module.toml";

/// Failures a resolver can report
#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("{0}")]
    Unreachable(String),

    #[error("invalid metadata at {}: {reason}", path.display())]
    InvalidMetadata { path: PathBuf, reason: String },

    #[error("{0}")]
    Rejected(String),

    #[error("resolver does not support publishing")]
    Unsupported,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type ResolverResult<T> = std::result::Result<T, ResolverError>;

/// A source of module metadata and artifacts
pub trait DependencyResolver: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Look a module revision up. `Ok(None)` means "not here".
    fn find_module(&self, revision: &ModuleRevisionId) -> ResolverResult<Option<ModuleDescriptor>>;

    /// Copy an artifact of `revision` to `destination`. `Ok(false)` means the
    /// resolver does not have it.
    fn fetch_artifact(
        &self,
        revision: &ModuleRevisionId,
        artifact: &Artifact,
        destination: &Path,
    ) -> ResolverResult<bool>;

    /// Artifacts of modules found by a local resolver are used where they are
    /// instead of being copied into the cache.
    fn is_local(&self) -> bool {
        false
    }

    fn publish(
        &self,
        _descriptor: &ModuleDescriptor,
        _artifacts: &[(Artifact, PathBuf)],
        _overwrite: bool,
    ) -> ResolverResult<()> {
        Err(ResolverError::Unsupported)
    }
}

/// A repository laid out on disk as `<root>/<group>/<name>/<version>/`
#[derive(Debug, Clone)]
pub struct FileSystemResolver {
    name: String,
    root: PathBuf,
}

impl FileSystemResolver {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn module_dir(&self, revision: &ModuleRevisionId) -> PathBuf {
        self.root
            .join(revision.group())
            .join(revision.name())
            .join(&revision.version)
    }

    fn ensure_reachable(&self) -> ResolverResult<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(ResolverError::Unreachable(format!(
                "repository root {} is not a directory",
                self.root.display()
            )))
        }
    }

    fn artifact_path(&self, revision: &ModuleRevisionId, artifact: &Artifact) -> PathBuf {
        let dir = self.module_dir(revision);
        match &artifact.file {
            Some(file) => dir.join(file),
            None => dir.join(artifact.file_name(&revision.version)),
        }
    }
}

impl DependencyResolver for FileSystemResolver {
    fn name(&self) -> &str {
        &self.name
    }

    fn find_module(&self, revision: &ModuleRevisionId) -> ResolverResult<Option<ModuleDescriptor>> {
        self.ensure_reachable()?;

        let path = self.module_dir(revision).join(MODULE_METADATA_FILE);
        if !path.is_file() {
            debug!(resolver = %self.name, module = %revision, "module not found");
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)?;
        let descriptor: ModuleDescriptor =
            toml::from_str(&content).map_err(|e| ResolverError::InvalidMetadata {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        if descriptor.module != *revision {
            return Err(ResolverError::InvalidMetadata {
                path,
                reason: format!("describes {} instead of {}", descriptor.module, revision),
            });
        }
        descriptor.validate().map_err(|e| ResolverError::InvalidMetadata {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        debug!(resolver = %self.name, module = %revision, "found module");
        Ok(Some(descriptor))
    }

    fn fetch_artifact(
        &self,
        revision: &ModuleRevisionId,
        artifact: &Artifact,
        destination: &Path,
    ) -> ResolverResult<bool> {
        self.ensure_reachable()?;

        let source = self.artifact_path(revision, artifact);
        if !source.is_file() {
            return Ok(false);
        }
        std::fs::copy(&source, destination)?;
        Ok(true)
    }

    fn publish(
        &self,
        descriptor: &ModuleDescriptor,
        artifacts: &[(Artifact, PathBuf)],
        overwrite: bool,
    ) -> ResolverResult<()> {
        let dir = self.module_dir(&descriptor.module);
        let metadata = dir.join(MODULE_METADATA_FILE);
        if metadata.exists() && !overwrite {
            return Err(ResolverError::Rejected(format!(
                "{} is already published to {}",
                descriptor.module,
                self.root.display()
            )));
        }
        std::fs::create_dir_all(&dir)?;

        let mut published = descriptor.clone();
        published.artifacts.clear();
        for (artifact, source) in artifacts {
            if !source.is_file() {
                return Err(ResolverError::Rejected(format!(
                    "artifact file {} does not exist",
                    source.display()
                )));
            }
            let file_name = artifact.file_name(&descriptor.module.version);
            std::fs::copy(source, dir.join(&file_name))?;
            published.artifacts.push(artifact.clone().with_file(file_name));
        }

        let content = toml::to_string_pretty(&published)
            .map_err(|e| ResolverError::Rejected(format!("cannot write metadata: {}", e)))?;
        std::fs::write(&metadata, content)?;

        info!(resolver = %self.name, module = %descriptor.module, "published module");
        Ok(())
    }
}

/// Serves the inline descriptors of client modules
#[derive(Debug, Clone, Default)]
pub struct ClientModuleResolver {
    modules: BTreeMap<ModuleRevisionId, ModuleDescriptor>,
}

impl ClientModuleResolver {
    pub fn new(modules: BTreeMap<ModuleRevisionId, ModuleDescriptor>) -> Self {
        Self { modules }
    }
}

impl DependencyResolver for ClientModuleResolver {
    fn name(&self) -> &str {
        "client-modules"
    }

    fn find_module(&self, revision: &ModuleRevisionId) -> ResolverResult<Option<ModuleDescriptor>> {
        Ok(self.modules.get(revision).cloned())
    }

    fn fetch_artifact(&self, _: &ModuleRevisionId, _: &Artifact, _: &Path) -> ResolverResult<bool> {
        Ok(false)
    }
}

/// Descriptors of the projects taking part in this build, keyed by project path
#[derive(Debug, Clone, Default)]
pub struct ProjectRegistry {
    projects: Arc<BTreeMap<String, ModuleDescriptor>>,
}

impl ProjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a project. Its artifacts' `file` entries point at build outputs.
    pub fn register(&mut self, path: impl Into<String>, descriptor: ModuleDescriptor) {
        Arc::make_mut(&mut self.projects).insert(path.into(), descriptor);
    }

    pub fn get(&self, path: &str) -> Option<&ModuleDescriptor> {
        self.projects.get(path)
    }

    pub fn find_by_revision(&self, revision: &ModuleRevisionId) -> Option<&ModuleDescriptor> {
        self.projects.values().find(|d| d.module == *revision)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.projects.keys().map(String::as_str)
    }
}

/// Resolves project references to the projects of this build
#[derive(Debug, Clone, Default)]
pub struct ProjectResolver {
    registry: ProjectRegistry,
}

impl ProjectResolver {
    pub fn new(registry: ProjectRegistry) -> Self {
        Self { registry }
    }
}

impl DependencyResolver for ProjectResolver {
    fn name(&self) -> &str {
        "build"
    }

    fn find_module(&self, revision: &ModuleRevisionId) -> ResolverResult<Option<ModuleDescriptor>> {
        Ok(self.registry.find_by_revision(revision).cloned())
    }

    fn fetch_artifact(&self, _: &ModuleRevisionId, _: &Artifact, _: &Path) -> ResolverResult<bool> {
        Ok(false)
    }

    fn is_local(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::configuration::Configuration;

    fn descriptor(rev: &ModuleRevisionId) -> ModuleDescriptor {
        let mut descriptor = ModuleDescriptor::new(rev.clone());
        descriptor.configurations.push(Configuration::new("default"));
        descriptor
    }

    #[test]
    fn test_missing_root_is_unreachable() {
        let resolver = FileSystemResolver::new("local", "/nonexistent/kiln/repo");
        let result = resolver.find_module(&ModuleRevisionId::new("g", "n", "1"));
        assert!(matches!(result, Err(ResolverError::Unreachable(_))));
    }

    #[test]
    fn test_missing_module_is_not_found() {
        let temp = tempfile::tempdir().unwrap();
        let resolver = FileSystemResolver::new("local", temp.path());
        let result = resolver.find_module(&ModuleRevisionId::new("g", "n", "1")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_publish_then_find() {
        let temp = tempfile::tempdir().unwrap();
        let repo = temp.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        let jar = temp.path().join("lib.jar");
        std::fs::write(&jar, b"bytes").unwrap();

        let resolver = FileSystemResolver::new("local", &repo);
        let rev = ModuleRevisionId::new("org.example", "lib", "1.0");
        let artifact = Artifact::new("lib", "jar").in_configurations(["default"]);
        resolver
            .publish(&descriptor(&rev), &[(artifact.clone(), jar.clone())], false)
            .unwrap();

        let found = resolver.find_module(&rev).unwrap().unwrap();
        assert_eq!(found.artifacts.len(), 1);
        assert!(repo.join("org.example/lib/1.0/lib-1.0.jar").is_file());

        let dest = temp.path().join("fetched.jar");
        assert!(resolver.fetch_artifact(&rev, &found.artifacts[0], &dest).unwrap());
        assert_eq!(std::fs::read(&dest).unwrap(), b"bytes");

        let again = resolver.publish(&descriptor(&rev), &[(artifact, jar)], false);
        assert!(matches!(again, Err(ResolverError::Rejected(_))));
    }

    #[test]
    fn test_project_registry_lookup() {
        let mut registry = ProjectRegistry::new();
        let rev = ModuleRevisionId::new("org.example", "core", "1.0");
        registry.register(":core", descriptor(&rev));

        let resolver = ProjectResolver::new(registry.clone());
        assert!(resolver.find_module(&rev).unwrap().is_some());
        assert!(resolver.is_local());
        assert_eq!(registry.paths().collect::<Vec<_>>(), vec![":core"]);
    }
}
