//! Declared dependencies and their notations
//!
//! A dependency is declared against one of the owning module's configurations
//! using one of three notations (external module, project reference, client
//! module). Notations are validated when they are declared; an invalid one is
//! rejected there and never reaches resolution.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::configuration::{ConfigurationContainer, DEFAULT_CONFIGURATION, WILDCARD_CONFIGURATION};
use super::module::ModuleRevisionId;
use crate::error::{KilnError, Result};

/// Source configuration to target configuration(s) of the dependency
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConfigurationMapping {
    entries: Vec<(String, Vec<String>)>,
}

impl ConfigurationMapping {
    /// `source -> default`
    pub fn from_source(source: impl Into<String>) -> Self {
        Self::new(source, [DEFAULT_CONFIGURATION])
    }

    pub fn new<I, S>(source: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut mapping = Self::default();
        mapping.add(source, targets);
        mapping
    }

    pub fn add<I, S>(&mut self, source: impl Into<String>, targets: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let source = source.into();
        let targets: Vec<String> = targets.into_iter().map(Into::into).collect();
        match self.entries.iter_mut().find(|(s, _)| *s == source) {
            Some((_, existing)) => {
                for target in targets {
                    if !existing.contains(&target) {
                        existing.push(target);
                    }
                }
            }
            None => self.entries.push((source, targets)),
        }
    }

    /// Parse the `source->target1,target2;other->target` form
    pub fn parse(s: &str) -> Result<Self> {
        let mut mapping = Self::default();
        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (source, targets) = match part.split_once("->") {
                Some((source, targets)) => (source.trim(), targets),
                None => (part, DEFAULT_CONFIGURATION),
            };
            let targets: Vec<&str> = targets.split(',').map(str::trim).filter(|t| !t.is_empty()).collect();
            if source.is_empty() || targets.is_empty() {
                return Err(KilnError::InvalidNotation {
                    notation: format!("\"{}\"", s),
                    reason: "configuration mapping needs a source and at least one target".to_string(),
                });
            }
            mapping.add(source, targets);
        }
        Ok(mapping)
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(s, _)| s.as_str())
    }

    /// Targets mapped from any of `confs` (or from the wildcard source)
    pub fn targets_for(&self, confs: &[String]) -> Vec<String> {
        let mut targets = Vec::new();
        for (source, mapped) in &self.entries {
            if source == WILDCARD_CONFIGURATION || confs.iter().any(|c| c == source) {
                for target in mapped {
                    if !targets.contains(target) {
                        targets.push(target.clone());
                    }
                }
            }
        }
        targets
    }

    /// Every target, whatever the source
    pub fn all_targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = Vec::new();
        for target in self.entries.iter().flat_map(|(_, t)| t) {
            if !targets.contains(target) {
                targets.push(target.clone());
            }
        }
        targets
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TryFrom<String> for ConfigurationMapping {
    type Error = KilnError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<ConfigurationMapping> for String {
    fn from(mapping: ConfigurationMapping) -> Self {
        mapping.to_string()
    }
}

impl fmt::Display for ConfigurationMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .entries
            .iter()
            .map(|(s, t)| format!("{}->{}", s, t.join(",")))
            .collect();
        write!(f, "{}", parts.join(";"))
    }
}

/// One declared dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    ExternalModule {
        module: ModuleRevisionId,
        mapping: ConfigurationMapping,
        transitive: bool,
    },
    ProjectReference {
        path: String,
        mapping: ConfigurationMapping,
        transitive: bool,
    },
    /// A module described inline instead of by repository metadata
    ClientModule {
        module: ModuleRevisionId,
        artifact_type: String,
        dependencies: Vec<Dependency>,
        mapping: ConfigurationMapping,
    },
}

const EXTERNAL_KEYS: &[&str] = &["group", "name", "version", "transitive", "conf"];
const PROJECT_KEYS: &[&str] = &["project", "transitive", "conf"];
const CLIENT_KEYS: &[&str] = &["client", "type", "dependencies", "conf"];

impl Dependency {
    /// Convert a declared notation into a dependency of configuration `source`
    pub fn from_notation(source: &str, notation: &toml::Value) -> Result<Self> {
        let invalid = |reason: String| KilnError::InvalidNotation {
            notation: notation.to_string(),
            reason,
        };

        match notation {
            toml::Value::String(s) => Ok(Self::ExternalModule {
                module: s.parse()?,
                mapping: ConfigurationMapping::from_source(source),
                transitive: true,
            }),
            toml::Value::Table(table) => {
                let allowed = if table.contains_key("project") {
                    PROJECT_KEYS
                } else if table.contains_key("client") {
                    CLIENT_KEYS
                } else {
                    EXTERNAL_KEYS
                };
                if let Some(key) = table.keys().find(|k| !allowed.contains(&k.as_str())) {
                    return Err(invalid(format!("unexpected key '{}'", key)));
                }

                let mapping = match table.get("conf") {
                    None => ConfigurationMapping::from_source(source),
                    Some(toml::Value::String(targets)) => {
                        ConfigurationMapping::new(source, targets.split(',').map(str::trim))
                    }
                    Some(_) => return Err(invalid("'conf' must be a string".to_string())),
                };
                let transitive = match table.get("transitive") {
                    None => true,
                    Some(toml::Value::Boolean(b)) => *b,
                    Some(_) => return Err(invalid("'transitive' must be a boolean".to_string())),
                };
                let string_field = |key: &str| -> Result<String> {
                    match table.get(key) {
                        Some(toml::Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
                        Some(_) => Err(invalid(format!("'{}' must be a non-empty string", key))),
                        None => Err(invalid(format!("missing '{}'", key))),
                    }
                };

                if table.contains_key("project") {
                    let path = string_field("project")?;
                    if !path.starts_with(':') {
                        return Err(invalid("project paths start with ':'".to_string()));
                    }
                    Ok(Self::ProjectReference { path, mapping, transitive })
                } else if table.contains_key("client") {
                    let module = string_field("client")?.parse()?;
                    let artifact_type = match table.get("type") {
                        Some(_) => string_field("type")?,
                        None => "jar".to_string(),
                    };
                    let dependencies = match table.get("dependencies") {
                        None => Vec::new(),
                        Some(toml::Value::Array(items)) => items
                            .iter()
                            .map(|item| Self::from_notation(DEFAULT_CONFIGURATION, item))
                            .collect::<Result<Vec<_>>>()?,
                        Some(_) => return Err(invalid("'dependencies' must be an array".to_string())),
                    };
                    Ok(Self::ClientModule {
                        module,
                        artifact_type,
                        dependencies,
                        mapping,
                    })
                } else {
                    let module = ModuleRevisionId::new(
                        string_field("group")?,
                        string_field("name")?,
                        string_field("version")?,
                    );
                    Ok(Self::ExternalModule { module, mapping, transitive })
                }
            }
            other => Err(invalid(format!("a {} is not a dependency notation", other.type_str()))),
        }
    }

    pub fn mapping(&self) -> &ConfigurationMapping {
        match self {
            Self::ExternalModule { mapping, .. }
            | Self::ProjectReference { mapping, .. }
            | Self::ClientModule { mapping, .. } => mapping,
        }
    }

    pub fn is_transitive(&self) -> bool {
        match self {
            Self::ExternalModule { transitive, .. } | Self::ProjectReference { transitive, .. } => *transitive,
            Self::ClientModule { .. } => true,
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExternalModule { module, .. } => write!(f, "{}", module),
            Self::ProjectReference { path, .. } => write!(f, "project '{}'", path),
            Self::ClientModule { module, .. } => write!(f, "client module {}", module),
        }
    }
}

/// The dependencies declared by one module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyContainer {
    module: ModuleRevisionId,
    dependencies: Vec<Dependency>,
}

impl DependencyContainer {
    pub fn new(module: ModuleRevisionId) -> Self {
        Self {
            module,
            dependencies: Vec::new(),
        }
    }

    /// The module owning these dependencies
    pub fn module(&self) -> &ModuleRevisionId {
        &self.module
    }

    /// Declare a dependency. Every source configuration of its mapping must
    /// exist in `configurations`.
    pub fn add(&mut self, dependency: Dependency, configurations: &ConfigurationContainer) -> Result<()> {
        for source in dependency.mapping().sources() {
            if source != WILDCARD_CONFIGURATION && !configurations.contains(source) {
                return Err(KilnError::UnknownConfiguration {
                    name: source.to_string(),
                    context: Some(format!("declared by dependency {} of {}", dependency, self.module)),
                });
            }
        }
        self.dependencies.push(dependency);
        Ok(())
    }

    /// Parse and declare a notation against configuration `conf`
    pub fn add_notation(
        &mut self,
        conf: &str,
        notation: &toml::Value,
        configurations: &ConfigurationContainer,
    ) -> Result<()> {
        let dependency = Dependency::from_notation(conf, notation)?;
        self.add(dependency, configurations)
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::configuration::Configuration;

    fn value(s: &str) -> toml::Value {
        let doc: toml::Table = toml::from_str(&format!("v = {}", s)).unwrap();
        doc["v"].clone()
    }

    #[test]
    fn test_string_notation() {
        let dep = Dependency::from_notation("compile", &value(r#""junit:junit:4.4""#)).unwrap();
        match dep {
            Dependency::ExternalModule { module, mapping, transitive } => {
                assert_eq!(module, ModuleRevisionId::new("junit", "junit", "4.4"));
                assert_eq!(mapping.to_string(), "compile->default");
                assert!(transitive);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_table_notations() {
        let dep = Dependency::from_notation(
            "runtime",
            &value(r#"{ group = "g", name = "n", version = "1", transitive = false, conf = "master,runtime" }"#),
        )
        .unwrap();
        assert!(!dep.is_transitive());
        assert_eq!(dep.mapping().targets_for(&["runtime".to_string()]), vec!["master", "runtime"]);

        let dep = Dependency::from_notation("compile", &value(r#"{ project = ":core" }"#)).unwrap();
        assert!(matches!(dep, Dependency::ProjectReference { ref path, .. } if path == ":core"));

        let dep = Dependency::from_notation(
            "compile",
            &value(r#"{ client = "g:c:1.0", dependencies = ["g:d:2.0"] }"#),
        )
        .unwrap();
        match dep {
            Dependency::ClientModule { dependencies, artifact_type, .. } => {
                assert_eq!(dependencies.len(), 1);
                assert_eq!(artifact_type, "jar");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_invalid_notations_are_rejected() {
        for bad in [
            "42",
            r#""only:two""#,
            r#"{ group = "g", name = "n" }"#,
            r#"{ group = "g", name = "n", version = "1", color = "red" }"#,
            r#"{ project = "core" }"#,
            r#"["g:n:1"]"#,
        ] {
            let result = Dependency::from_notation("compile", &value(bad));
            assert!(
                matches!(result, Err(KilnError::InvalidNotation { .. })),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_container_checks_source_configuration() {
        let configurations = ConfigurationContainer::from_configurations([Configuration::new("compile")]).unwrap();
        let mut container = DependencyContainer::new(ModuleRevisionId::new("g", "app", "1.0"));

        container
            .add_notation("compile", &value(r#""g:a:1""#), &configurations)
            .unwrap();
        let err = container
            .add_notation("runtime", &value(r#""g:b:1""#), &configurations)
            .unwrap_err();

        assert!(matches!(err, KilnError::UnknownConfiguration { ref name, .. } if name == "runtime"));
        assert_eq!(container.dependencies().len(), 1);
    }

    #[test]
    fn test_parse_mapping() {
        let mapping = ConfigurationMapping::parse("compile->default;runtime->runtime,master").unwrap();
        assert_eq!(mapping.targets_for(&["runtime".to_string()]), vec!["runtime", "master"]);
        assert!(ConfigurationMapping::parse("->x").is_err());
    }
}
