//! Publishing module descriptors and artifacts to repositories

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use super::configuration::Configuration;
use super::descriptor::{Artifact, DependencyDescriptor, ModuleDescriptor, Spec};
use super::resolver::DependencyResolver;
use crate::cache::ArtifactCache;
use crate::error::{KilnError, Result};

/// What to publish and how
#[derive(Debug, Clone, Default)]
pub struct PublishInstruction {
    pub configuration_spec: Spec<Configuration>,
    pub dependency_spec: Spec<DependencyDescriptor>,
    pub artifact_spec: Spec<Artifact>,
    /// Replace a revision that is already in the repository
    pub overwrite: bool,
}

/// Writes descriptors and artifact files to publish resolvers
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishEngine;

impl PublishEngine {
    /// Publish the part of `descriptor` visible through `confs` to every
    /// resolver in `resolvers`, in order. The first failing resolver stops the
    /// publication.
    pub fn publish(
        &self,
        confs: &[String],
        instruction: &PublishInstruction,
        resolvers: &[Arc<dyn DependencyResolver>],
        descriptor: &ModuleDescriptor,
        cache: &ArtifactCache,
    ) -> Result<()> {
        let module = descriptor.module.to_string();
        if resolvers.is_empty() {
            return Err(KilnError::PublishFailed {
                module,
                resolver: "<none>".to_string(),
                reason: "no publish repositories configured".to_string(),
            });
        }

        let published = descriptor.restricted_to(confs);
        let files = published
            .artifacts
            .iter()
            .map(|artifact| match &artifact.file {
                Some(file) => Ok((artifact.clone(), file.clone())),
                None => Err(KilnError::PublishFailed {
                    module: module.clone(),
                    resolver: resolvers[0].name().to_string(),
                    reason: format!("artifact {} has no file", artifact),
                }),
            })
            .collect::<Result<Vec<(Artifact, PathBuf)>>>()?;

        for resolver in resolvers {
            resolver
                .publish(&published, &files, instruction.overwrite)
                .map_err(|e| KilnError::PublishFailed {
                    module: module.clone(),
                    resolver: resolver.name().to_string(),
                    reason: e.to_string(),
                })?;
            info!(module = %module, resolver = resolver.name(), artifacts = files.len(), "published");
        }

        // a republished revision must not be served from stale cache entries
        cache.evict(&descriptor.module)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::configuration::ConfigurationContainer;
    use crate::artifacts::dependency::DependencyContainer;
    use crate::artifacts::descriptor::ArtifactContainer;
    use crate::artifacts::engine::{ResolutionEngine, ResolveInstruction};
    use crate::artifacts::module::ModuleRevisionId;
    use crate::artifacts::resolver::FileSystemResolver;

    struct Publisher {
        temp: tempfile::TempDir,
        repo: Arc<dyn DependencyResolver>,
        configurations: ConfigurationContainer,
        dependencies: DependencyContainer,
        artifacts: ArtifactContainer,
    }

    fn publisher() -> Publisher {
        let temp = tempfile::tempdir().unwrap();
        let repo_root = temp.path().join("repo");
        std::fs::create_dir_all(&repo_root).unwrap();
        let libs = temp.path().join("libs");
        std::fs::create_dir_all(&libs).unwrap();
        std::fs::write(libs.join("lib.jar"), b"lib classes").unwrap();
        std::fs::write(libs.join("lib-tests.jar"), b"test classes").unwrap();

        let configurations = ConfigurationContainer::from_configurations([
            Configuration::new("default"),
            Configuration::new("tests").extending(["default"]),
        ])
        .unwrap();
        let dependencies = DependencyContainer::new(ModuleRevisionId::new("org.example", "lib", "1.0"));
        let artifacts: ArtifactContainer = [
            Artifact::new("lib", "jar")
                .in_configurations(["default"])
                .with_file(libs.join("lib.jar")),
            Artifact {
                classifier: Some("tests".to_string()),
                ..Artifact::new("lib", "jar")
                    .in_configurations(["tests"])
                    .with_file(libs.join("lib-tests.jar"))
            },
        ]
        .into_iter()
        .collect();

        Publisher {
            repo: Arc::new(FileSystemResolver::new("local", repo_root)),
            temp,
            configurations,
            dependencies,
            artifacts,
        }
    }

    #[test]
    fn test_publish_then_resolve() {
        let p = publisher();
        let engine = ResolutionEngine::default();
        let cache_root = p.temp.path().join("cache");

        engine
            .publish(
                "default",
                &PublishInstruction::default(),
                std::slice::from_ref(&p.repo),
                &p.configurations,
                &p.dependencies,
                &p.artifacts,
                &cache_root,
            )
            .unwrap();

        let module_dir = p.temp.path().join("repo/org.example/lib/1.0");
        assert!(module_dir.join("module.toml").is_file());
        assert!(module_dir.join("lib-1.0.jar").is_file());
        assert!(!module_dir.join("lib-1.0-tests.jar").exists());

        let consumer_confs = ConfigurationContainer::from_configurations([Configuration::new("compile")]).unwrap();
        let mut consumer = DependencyContainer::new(ModuleRevisionId::new("org.example", "app", "1.0"));
        consumer
            .add_notation("compile", &toml::Value::String("org.example:lib:1.0".into()), &consumer_confs)
            .unwrap();

        let files = engine
            .resolve(
                "compile",
                &consumer_confs,
                &consumer,
                std::slice::from_ref(&p.repo),
                &ResolveInstruction::default(),
                &cache_root,
            )
            .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(std::fs::read(&files[0]).unwrap(), b"lib classes");
    }

    #[test]
    fn test_publish_extended_configuration_includes_parents() {
        let p = publisher();
        let engine = ResolutionEngine::default();

        engine
            .publish(
                "tests",
                &PublishInstruction::default(),
                std::slice::from_ref(&p.repo),
                &p.configurations,
                &p.dependencies,
                &p.artifacts,
                &p.temp.path().join("cache"),
            )
            .unwrap();

        let module_dir = p.temp.path().join("repo/org.example/lib/1.0");
        assert!(module_dir.join("lib-1.0.jar").is_file());
        assert!(module_dir.join("lib-1.0-tests.jar").is_file());
    }

    #[test]
    fn test_publish_twice_requires_overwrite() {
        let p = publisher();
        let engine = ResolutionEngine::default();
        let cache_root = p.temp.path().join("cache");
        let publish = |instruction: &PublishInstruction| {
            engine.publish(
                "default",
                instruction,
                std::slice::from_ref(&p.repo),
                &p.configurations,
                &p.dependencies,
                &p.artifacts,
                &cache_root,
            )
        };

        publish(&PublishInstruction::default()).unwrap();
        assert!(matches!(
            publish(&PublishInstruction::default()),
            Err(KilnError::PublishFailed { ref resolver, .. }) if resolver == "local"
        ));
        publish(&PublishInstruction {
            overwrite: true,
            ..Default::default()
        })
        .unwrap();
    }

    #[test]
    fn test_publish_without_repositories() {
        let p = publisher();
        let result = ResolutionEngine::default().publish(
            "default",
            &PublishInstruction::default(),
            &[],
            &p.configurations,
            &p.dependencies,
            &p.artifacts,
            &p.temp.path().join("cache"),
        );
        assert!(matches!(result, Err(KilnError::PublishFailed { .. })));
    }

    #[test]
    fn test_artifact_without_file_fails() {
        let p = publisher();
        let artifacts: ArtifactContainer = [Artifact::new("lib", "jar")].into_iter().collect();
        let result = ResolutionEngine::default().publish(
            "default",
            &PublishInstruction::default(),
            std::slice::from_ref(&p.repo),
            &p.configurations,
            &p.dependencies,
            &artifacts,
            &p.temp.path().join("cache"),
        );
        assert!(matches!(result, Err(KilnError::PublishFailed { ref reason, .. }) if reason.contains("no file")));
    }
}
