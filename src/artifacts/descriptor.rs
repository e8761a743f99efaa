//! Module descriptors and their construction
//!
//! A [`ModuleDescriptor`] is the unit both resolution and publication work on.
//! It is assembled from a module's configurations, declared dependencies and
//! artifacts by [`ModuleDescriptorConverter`], and it is also the metadata
//! format written to file-system repositories (`module.toml`).

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::configuration::{Configuration, ConfigurationContainer, DEFAULT_CONFIGURATION, WILDCARD_CONFIGURATION};
use super::dependency::{ConfigurationMapping, Dependency, DependencyContainer};
use super::module::ModuleRevisionId;
use super::resolver::ProjectRegistry;
use crate::error::{KilnError, Result};

/// A predicate used to scope descriptors, dependencies and artifacts
pub struct Spec<T: ?Sized> {
    predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T: ?Sized> Spec<T> {
    pub fn new(predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// A spec every value satisfies
    pub fn all() -> Self {
        Self::new(|_| true)
    }

    pub fn is_satisfied_by(&self, value: &T) -> bool {
        (self.predicate)(value)
    }
}

impl<T: ?Sized> Clone for Spec<T> {
    fn clone(&self) -> Self {
        Self {
            predicate: Arc::clone(&self.predicate),
        }
    }
}

impl<T: ?Sized> Default for Spec<T> {
    fn default() -> Self {
        Self::all()
    }
}

impl<T: ?Sized> fmt::Debug for Spec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Spec")
    }
}

/// Where a dependency descriptor came from
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum DependencyOrigin {
    #[default]
    External,
    Project(String),
    Client,
}

/// A normalized dependency on a concrete module revision
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyDescriptor {
    #[serde(flatten)]
    pub revision: ModuleRevisionId,

    pub conf: ConfigurationMapping,

    #[serde(default = "default_true")]
    pub transitive: bool,

    #[serde(skip)]
    pub origin: DependencyOrigin,
}

fn default_true() -> bool {
    true
}

impl DependencyDescriptor {
    pub fn new(revision: ModuleRevisionId, conf: ConfigurationMapping) -> Self {
        Self {
            revision,
            conf,
            transitive: true,
            origin: DependencyOrigin::External,
        }
    }
}

/// A file published by a module
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,

    #[serde(rename = "type", default = "default_type")]
    pub artifact_type: String,

    /// Defaults to the type
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub extension: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier: Option<String>,

    /// Configurations the artifact belongs to; empty means all of them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configurations: Vec<String>,

    /// Location of the artifact: relative to the module directory inside a
    /// repository, or a local build output for project artifacts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

fn default_type() -> String {
    "jar".to_string()
}

impl Artifact {
    pub fn new(name: impl Into<String>, artifact_type: impl Into<String>) -> Self {
        let artifact_type = artifact_type.into();
        Self {
            name: name.into(),
            extension: artifact_type.clone(),
            artifact_type,
            classifier: None,
            configurations: Vec::new(),
            file: None,
        }
    }

    pub fn in_configurations<I, S>(mut self, configurations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.configurations = configurations.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn extension(&self) -> &str {
        if self.extension.is_empty() {
            &self.artifact_type
        } else {
            &self.extension
        }
    }

    /// Repository file name: `<name>-<version>[-<classifier>].<extension>`
    pub fn file_name(&self, version: &str) -> String {
        match &self.classifier {
            Some(classifier) => format!("{}-{}-{}.{}", self.name, version, classifier, self.extension()),
            None => format!("{}-{}.{}", self.name, version, self.extension()),
        }
    }

    /// Whether the artifact is part of any of `confs`
    pub fn belongs_to(&self, confs: &[String]) -> bool {
        self.configurations.is_empty()
            || self
                .configurations
                .iter()
                .any(|c| c == WILDCARD_CONFIGURATION || confs.contains(c))
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.classifier {
            Some(classifier) => write!(f, "{}-{}.{}", self.name, classifier, self.extension()),
            None => write!(f, "{}.{}", self.name, self.extension()),
        }
    }
}

/// Artifacts declared by a module
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactContainer {
    artifacts: Vec<Artifact>,
}

impl ArtifactContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, artifact: Artifact) {
        self.artifacts.push(artifact);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

impl FromIterator<Artifact> for ArtifactContainer {
    fn from_iter<I: IntoIterator<Item = Artifact>>(iter: I) -> Self {
        Self {
            artifacts: iter.into_iter().collect(),
        }
    }
}

/// The resolvable and publishable description of a module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub module: ModuleRevisionId,

    #[serde(default)]
    pub configurations: Vec<Configuration>,

    #[serde(default)]
    pub dependencies: Vec<DependencyDescriptor>,

    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

impl ModuleDescriptor {
    pub fn new(module: ModuleRevisionId) -> Self {
        Self {
            module,
            configurations: Vec::new(),
            dependencies: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn configuration_container(&self) -> ConfigurationContainer {
        self.configurations.iter().cloned().collect()
    }

    /// The part of this descriptor visible through `confs`: those
    /// configurations, the dependencies declared from them and their artifacts
    pub fn restricted_to(&self, confs: &[String]) -> Self {
        let mut restricted = Self::new(self.module.clone());

        for configuration in self.configurations.iter().filter(|c| confs.contains(&c.name)) {
            let mut configuration = configuration.clone();
            configuration.extends.retain(|parent| confs.contains(parent));
            restricted.configurations.push(configuration);
        }
        for dependency in &self.dependencies {
            let mut conf = ConfigurationMapping::default();
            for source in dependency.conf.sources() {
                if source == WILDCARD_CONFIGURATION || confs.iter().any(|c| c == source) {
                    conf.add(source, dependency.conf.targets_for(&[source.to_string()]));
                }
            }
            if !conf.is_empty() {
                restricted.dependencies.push(DependencyDescriptor {
                    conf,
                    ..dependency.clone()
                });
            }
        }
        for artifact in self.artifacts.iter().filter(|a| a.belongs_to(confs)) {
            let mut artifact = artifact.clone();
            artifact.configurations.retain(|c| confs.contains(c));
            restricted.artifacts.push(artifact);
        }

        restricted
    }

    /// Check that every configuration referenced by a dependency mapping or an
    /// artifact is declared, and that the extends chains are sound
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| KilnError::InvalidDescriptor {
            module: self.module.to_string(),
            reason,
        };

        let configurations = self.configuration_container();
        configurations
            .validate()
            .map_err(|e| invalid(e.to_string()))?;

        for dependency in &self.dependencies {
            for source in dependency.conf.sources() {
                if source != WILDCARD_CONFIGURATION && !configurations.contains(source) {
                    return Err(invalid(format!(
                        "dependency {} maps from undeclared configuration '{}'",
                        dependency.revision, source
                    )));
                }
            }
        }
        for artifact in &self.artifacts {
            for conf in &artifact.configurations {
                if conf != WILDCARD_CONFIGURATION && !configurations.contains(conf) {
                    return Err(invalid(format!(
                        "artifact {} belongs to undeclared configuration '{}'",
                        artifact, conf
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Converts declared dependencies into normalized descriptors
#[derive(Debug, Clone, Default)]
pub struct DependencyDescriptorFactory {
    projects: ProjectRegistry,
}

impl DependencyDescriptorFactory {
    pub fn new(projects: ProjectRegistry) -> Self {
        Self { projects }
    }

    pub fn create(&self, dependency: &Dependency) -> Result<DependencyDescriptor> {
        match dependency {
            Dependency::ExternalModule {
                module,
                mapping,
                transitive,
            } => Ok(DependencyDescriptor {
                revision: module.clone(),
                conf: mapping.clone(),
                transitive: *transitive,
                origin: DependencyOrigin::External,
            }),
            Dependency::ProjectReference {
                path,
                mapping,
                transitive,
            } => {
                let project = self
                    .projects
                    .get(path)
                    .ok_or_else(|| KilnError::UnknownProject { path: path.clone() })?;
                Ok(DependencyDescriptor {
                    revision: project.module.clone(),
                    conf: mapping.clone(),
                    transitive: *transitive,
                    origin: DependencyOrigin::Project(path.clone()),
                })
            }
            Dependency::ClientModule { module, mapping, .. } => Ok(DependencyDescriptor {
                revision: module.clone(),
                conf: mapping.clone(),
                transitive: true,
                origin: DependencyOrigin::Client,
            }),
        }
    }

    /// Inline descriptors of every client module declared in `dependencies`,
    /// including client modules nested inside other client modules
    pub fn client_modules(
        &self,
        dependencies: &[Dependency],
    ) -> Result<BTreeMap<ModuleRevisionId, ModuleDescriptor>> {
        let mut registry = BTreeMap::new();
        self.collect_client_modules(dependencies, &mut registry)?;
        Ok(registry)
    }

    fn collect_client_modules(
        &self,
        dependencies: &[Dependency],
        registry: &mut BTreeMap<ModuleRevisionId, ModuleDescriptor>,
    ) -> Result<()> {
        for dependency in dependencies {
            if let Dependency::ClientModule {
                module,
                artifact_type,
                dependencies: inner,
                ..
            } = dependency
            {
                let mut descriptor = ModuleDescriptor::new(module.clone());
                descriptor.configurations.push(Configuration::new(DEFAULT_CONFIGURATION));
                descriptor.artifacts.push(
                    Artifact::new(module.name(), artifact_type.as_str()).in_configurations([DEFAULT_CONFIGURATION]),
                );
                for dep in inner {
                    descriptor.dependencies.push(self.create(dep)?);
                }
                registry.insert(module.clone(), descriptor);
                self.collect_client_modules(inner, registry)?;
            }
        }
        Ok(())
    }
}

/// What part of a module a descriptor is built for
#[derive(Debug, Clone, Default)]
pub struct DescriptorScope {
    /// Per-configuration override of the transitive flag
    pub transitive: BTreeMap<String, bool>,
    pub configuration_spec: Spec<Configuration>,
    pub dependency_spec: Spec<DependencyDescriptor>,
    pub artifact_spec: Spec<Artifact>,
}

/// Assembles module descriptors for resolution and publication
#[derive(Debug, Clone, Default)]
pub struct ModuleDescriptorConverter {
    factory: DependencyDescriptorFactory,
}

impl ModuleDescriptorConverter {
    pub fn new(factory: DependencyDescriptorFactory) -> Self {
        Self { factory }
    }

    pub fn factory(&self) -> &DependencyDescriptorFactory {
        &self.factory
    }

    pub fn convert(
        &self,
        scope: &DescriptorScope,
        configurations: &ConfigurationContainer,
        dependencies: &DependencyContainer,
        artifacts: &ArtifactContainer,
    ) -> Result<ModuleDescriptor> {
        let mut full = ModuleDescriptor::new(dependencies.module().clone());
        for configuration in configurations.iter() {
            let mut configuration = configuration.clone();
            if let Some(transitive) = scope.transitive.get(&configuration.name) {
                configuration.transitive = *transitive;
            }
            full.configurations.push(configuration);
        }
        for dependency in dependencies.dependencies() {
            full.dependencies.push(self.factory.create(dependency)?);
        }
        full.artifacts.extend(artifacts.iter().cloned());

        let included: Vec<String> = configurations
            .iter()
            .filter(|c| scope.configuration_spec.is_satisfied_by(c))
            .map(|c| c.name.clone())
            .collect();

        let mut descriptor = full.restricted_to(&included);
        descriptor
            .dependencies
            .retain(|d| scope.dependency_spec.is_satisfied_by(d));
        descriptor
            .artifacts
            .retain(|a| scope.artifact_spec.is_satisfied_by(a));

        descriptor.validate()?;
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(s: &str) -> toml::Value {
        let doc: toml::Table = toml::from_str(&format!("v = {}", s)).unwrap();
        doc["v"].clone()
    }

    fn setup() -> (ConfigurationContainer, DependencyContainer, ArtifactContainer) {
        let configurations = ConfigurationContainer::from_configurations([
            Configuration::new("compile"),
            Configuration::new("runtime").extending(["compile"]),
            Configuration::new("test").extending(["runtime"]),
        ])
        .unwrap();

        let mut dependencies = DependencyContainer::new(ModuleRevisionId::new("org.example", "app", "1.0"));
        dependencies
            .add_notation("compile", &value(r#""g:a:1.0""#), &configurations)
            .unwrap();
        dependencies
            .add_notation("test", &value(r#""junit:junit:4.4""#), &configurations)
            .unwrap();

        let artifacts: ArtifactContainer = [
            Artifact::new("app", "jar").in_configurations(["runtime"]),
            Artifact::new("app-tests", "jar").in_configurations(["test"]),
        ]
        .into_iter()
        .collect();

        (configurations, dependencies, artifacts)
    }

    #[test]
    fn test_convert_everything() {
        let (configurations, dependencies, artifacts) = setup();
        let converter = ModuleDescriptorConverter::default();

        let descriptor = converter
            .convert(&DescriptorScope::default(), &configurations, &dependencies, &artifacts)
            .unwrap();

        assert_eq!(descriptor.module.to_string(), "org.example:app:1.0");
        assert_eq!(descriptor.configurations.len(), 3);
        assert_eq!(descriptor.dependencies.len(), 2);
        assert_eq!(descriptor.artifacts.len(), 2);
    }

    #[test]
    fn test_convert_scoped_by_configuration() {
        let (configurations, dependencies, artifacts) = setup();
        let converter = ModuleDescriptorConverter::default();
        let scope = DescriptorScope {
            configuration_spec: Spec::new(|c: &Configuration| c.name != "test"),
            ..Default::default()
        };

        let descriptor = converter
            .convert(&scope, &configurations, &dependencies, &artifacts)
            .unwrap();

        assert_eq!(descriptor.configurations.len(), 2);
        assert_eq!(descriptor.dependencies.len(), 1);
        assert_eq!(descriptor.dependencies[0].revision.name(), "a");
        assert_eq!(descriptor.artifacts.len(), 1);
        assert_eq!(descriptor.artifacts[0].name, "app");
    }

    #[test]
    fn test_unknown_project_reference() {
        let configurations = ConfigurationContainer::from_configurations([Configuration::new("compile")]).unwrap();
        let mut dependencies = DependencyContainer::new(ModuleRevisionId::new("g", "app", "1"));
        dependencies
            .add_notation("compile", &value(r#"{ project = ":missing" }"#), &configurations)
            .unwrap();

        let result = ModuleDescriptorConverter::default().convert(
            &DescriptorScope::default(),
            &configurations,
            &dependencies,
            &ArtifactContainer::new(),
        );
        assert!(matches!(result, Err(KilnError::UnknownProject { ref path }) if path == ":missing"));
    }

    #[test]
    fn test_validate_rejects_undeclared_configuration() {
        let mut descriptor = ModuleDescriptor::new(ModuleRevisionId::new("g", "m", "1"));
        descriptor.configurations.push(Configuration::new("default"));
        descriptor.artifacts.push(Artifact::new("m", "jar").in_configurations(["sources"]));

        assert!(matches!(descriptor.validate(), Err(KilnError::InvalidDescriptor { .. })));
    }

    #[test]
    fn test_descriptor_toml_round_trip() {
        let (configurations, dependencies, artifacts) = setup();
        let descriptor = ModuleDescriptorConverter::default()
            .convert(&DescriptorScope::default(), &configurations, &dependencies, &artifacts)
            .unwrap();

        let text = toml::to_string(&descriptor).unwrap();
        let parsed: ModuleDescriptor = toml::from_str(&text).unwrap();
        assert_eq!(parsed, descriptor);
    }
}
