//! Configurations: named, extensible buckets of dependencies

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{KilnError, Result};

/// Conventional configuration used when a dependency mapping names no target.
pub const DEFAULT_CONFIGURATION: &str = "default";

/// Mapping source that matches every configuration of the owning module.
pub const WILDCARD_CONFIGURATION: &str = "*";

/// A named dependency bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Configuration {
    pub name: String,

    /// Configurations whose dependencies and artifacts this one inherits
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extends: Vec<String>,

    /// Whether the dependencies of this configuration are resolved transitively
    #[serde(default = "default_true")]
    pub transitive: bool,

    /// Whether consumers of the module may depend on this configuration
    #[serde(default = "default_true")]
    pub visible: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Configuration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extends: Vec::new(),
            transitive: true,
            visible: true,
            description: None,
        }
    }

    pub fn extending<I, S>(mut self, extends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extends = extends.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_transitive(mut self, transitive: bool) -> Self {
        self.transitive = transitive;
        self
    }
}

/// Ordered set of configurations owned by a module
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigurationContainer {
    configurations: Vec<Configuration>,
}

impl ConfigurationContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a container and check that every extends chain is closed and acyclic
    pub fn from_configurations(configurations: impl IntoIterator<Item = Configuration>) -> Result<Self> {
        let mut container = Self::new();
        for configuration in configurations {
            container.add(configuration);
        }
        container.validate()?;
        Ok(container)
    }

    /// Add or replace a configuration. Extends targets may be added later;
    /// call [`ConfigurationContainer::validate`] once the container is complete.
    pub fn add(&mut self, configuration: Configuration) {
        match self
            .configurations
            .iter_mut()
            .find(|c| c.name == configuration.name)
        {
            Some(existing) => *existing = configuration,
            None => self.configurations.push(configuration),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Configuration> {
        self.configurations.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Configuration> {
        self.configurations.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.configurations.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.configurations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.configurations.len()
    }

    /// Keep only the configurations matching `keep`
    pub fn filtered(&self, keep: impl Fn(&Configuration) -> bool) -> Self {
        Self {
            configurations: self.configurations.iter().filter(|c| keep(c)).cloned().collect(),
        }
    }

    /// Check that all extends targets exist and no chain loops back on itself
    pub fn validate(&self) -> Result<()> {
        for configuration in &self.configurations {
            self.chain(&configuration.name)?;
        }
        Ok(())
    }

    /// The configuration followed by everything it extends, transitively.
    ///
    /// Depth-first in declaration order; each name appears once.
    pub fn chain(&self, name: &str) -> Result<Vec<String>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut path = Vec::new();
        self.walk_chain(name, None, &mut chain, &mut seen, &mut path)?;
        Ok(chain)
    }

    fn walk_chain(
        &self,
        name: &str,
        referrer: Option<&str>,
        chain: &mut Vec<String>,
        seen: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Result<()> {
        if let Some(start) = path.iter().position(|p| p == name) {
            let mut cycle = path[start..].to_vec();
            cycle.push(name.to_string());
            return Err(KilnError::ConfigurationCycle { cycle });
        }
        if !seen.insert(name.to_string()) {
            return Ok(());
        }

        let configuration = self.get(name).ok_or_else(|| KilnError::UnknownConfiguration {
            name: name.to_string(),
            context: referrer.map(|r| format!("extended by configuration '{}'", r)),
        })?;

        chain.push(name.to_string());
        path.push(name.to_string());
        for parent in &configuration.extends {
            self.walk_chain(parent, Some(name), chain, seen, path)?;
        }
        path.pop();

        Ok(())
    }
}

impl FromIterator<Configuration> for ConfigurationContainer {
    fn from_iter<I: IntoIterator<Item = Configuration>>(iter: I) -> Self {
        let mut container = Self::new();
        for configuration in iter {
            container.add(configuration);
        }
        container
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn java_like() -> ConfigurationContainer {
        ConfigurationContainer::from_configurations([
            Configuration::new("compile"),
            Configuration::new("runtime").extending(["compile"]),
            Configuration::new("testCompile").extending(["compile"]),
            Configuration::new("testRuntime").extending(["runtime", "testCompile"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_chain_follows_extends_once() {
        let container = java_like();
        let chain = container.chain("testRuntime").unwrap();
        assert_eq!(chain, vec!["testRuntime", "runtime", "compile", "testCompile"]);
    }

    #[test]
    fn test_unknown_extends_target() {
        let mut container = ConfigurationContainer::new();
        container.add(Configuration::new("runtime").extending(["compile"]));

        let err = container.validate().unwrap_err();
        assert!(matches!(err, KilnError::UnknownConfiguration { ref name, .. } if name == "compile"));
    }

    #[test]
    fn test_extends_cycle_is_reported() {
        let result = ConfigurationContainer::from_configurations([
            Configuration::new("a").extending(["b"]),
            Configuration::new("b").extending(["c"]),
            Configuration::new("c").extending(["a"]),
        ]);

        match result {
            Err(KilnError::ConfigurationCycle { cycle }) => {
                assert_eq!(cycle, vec!["a", "b", "c", "a"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_equality_is_field_based() {
        let a = Configuration::new("compile").extending(["base"]);
        let b = Configuration::new("compile").extending(["base"]);
        assert_eq!(a, b);
        assert_ne!(a, b.with_transitive(false));
    }
}
