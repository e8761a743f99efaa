//! The dependency resolution engine
//!
//! Resolution of one configuration runs in three steps:
//!
//! 1. **Discovery** walks the declared dependencies breadth-first, looking
//!    every requested revision up in the resolver chain and expanding the
//!    requested configurations of each module found. A `(revision,
//!    configuration)` pair is expanded once, so dependency cycles between
//!    modules simply end the recursion.
//! 2. **Conflict resolution** picks one revision per module with the
//!    configured [`ConflictManager`], then walks the graph again following
//!    only the winners. Winners are re-picked from what that walk still
//!    reaches until they no longer change. Revisions that were requested but
//!    lost are recorded as evicted. If the walk reaches a winner that
//!    discovery never expanded, discovery runs again for it.
//! 3. **Artifact retrieval** copies the artifacts of every resolved module
//!    into the [`ArtifactCache`].
//!
//! Unresolved dependencies never fail `resolve_as_report`; they are recorded
//! in the report and only turn into an error in `resolve_from_report` when
//! the report came from a strict instruction.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use super::configuration::{ConfigurationContainer, DEFAULT_CONFIGURATION};
use super::dependency::DependencyContainer;
use super::descriptor::{
    Artifact, ArtifactContainer, DependencyDescriptor, DependencyDescriptorFactory, DescriptorScope, ModuleDescriptor,
    ModuleDescriptorConverter, Spec,
};
use super::module::{ModuleId, ModuleRevisionId};
use super::publish::{PublishEngine, PublishInstruction};
use super::report::{ConflictRecord, ResolveReport, ResolvedArtifact, ResolvedModule, UnresolvedDependency};
use super::resolver::{ClientModuleResolver, DependencyResolver, ProjectRegistry, ProjectResolver, ResolverError};
use super::version::{ConflictManager, LatestRevisionConflictManager};
use crate::cache::ArtifactCache;
use crate::error::{KilnError, Result};

/// Per-resolution policy
#[derive(Debug, Clone)]
pub struct ResolveInstruction {
    /// Follow the dependencies of resolved modules
    pub transitive: bool,
    /// Turn unresolved dependencies into an error when files are requested
    pub fail_on_unresolved: bool,
    /// Only dependencies satisfying this spec take part
    pub dependency_spec: Spec<DependencyDescriptor>,
}

impl Default for ResolveInstruction {
    fn default() -> Self {
        Self {
            transitive: true,
            fail_on_unresolved: true,
            dependency_spec: Spec::all(),
        }
    }
}

impl ResolveInstruction {
    /// An instruction tolerating unresolved dependencies
    pub fn lenient() -> Self {
        Self {
            fail_on_unresolved: false,
            ..Self::default()
        }
    }

    pub fn with_transitive(mut self, transitive: bool) -> Self {
        self.transitive = transitive;
        self
    }
}

/// Resolves and publishes module descriptors
#[derive(Debug)]
pub struct ResolutionEngine {
    converter: ModuleDescriptorConverter,
    projects: ProjectRegistry,
    conflict_manager: Arc<dyn ConflictManager>,
    publisher: PublishEngine,
    last_report: RwLock<Option<ResolveReport>>,
}

impl Default for ResolutionEngine {
    fn default() -> Self {
        Self::new(ProjectRegistry::new())
    }
}

impl ResolutionEngine {
    /// An engine for a build made of the projects in `projects`
    pub fn new(projects: ProjectRegistry) -> Self {
        Self {
            converter: ModuleDescriptorConverter::new(DependencyDescriptorFactory::new(projects.clone())),
            projects,
            conflict_manager: Arc::new(LatestRevisionConflictManager::default()),
            publisher: PublishEngine,
            last_report: RwLock::new(None),
        }
    }

    pub fn with_conflict_manager(mut self, conflict_manager: Arc<dyn ConflictManager>) -> Self {
        self.conflict_manager = conflict_manager;
        self
    }

    pub fn converter(&self) -> &ModuleDescriptorConverter {
        &self.converter
    }

    /// Resolve `conf` to the local files of its artifacts
    pub fn resolve(
        &self,
        conf: &str,
        configurations: &ConfigurationContainer,
        dependencies: &DependencyContainer,
        resolvers: &[Arc<dyn DependencyResolver>],
        instruction: &ResolveInstruction,
        cache_root: &Path,
    ) -> Result<Vec<PathBuf>> {
        let report = self.resolve_as_report(conf, configurations, dependencies, resolvers, instruction, cache_root)?;
        self.resolve_from_report(conf, &report)
    }

    /// Resolve `conf` and describe the outcome
    pub fn resolve_as_report(
        &self,
        conf: &str,
        configurations: &ConfigurationContainer,
        dependencies: &DependencyContainer,
        resolvers: &[Arc<dyn DependencyResolver>],
        instruction: &ResolveInstruction,
        cache_root: &Path,
    ) -> Result<ResolveReport> {
        info!(module = %dependencies.module(), configuration = conf, "resolving configuration");

        let mut transitive = BTreeMap::new();
        transitive.insert(conf.to_string(), instruction.transitive);
        let scope = DescriptorScope {
            transitive,
            dependency_spec: instruction.dependency_spec.clone(),
            ..Default::default()
        };
        let descriptor = self
            .converter
            .convert(&scope, configurations, dependencies, &ArtifactContainer::new())?;

        let client_modules = self.converter.factory().client_modules(dependencies.dependencies())?;
        let mut chain: Vec<Arc<dyn DependencyResolver>> = vec![
            Arc::new(ClientModuleResolver::new(client_modules)),
            Arc::new(ProjectResolver::new(self.projects.clone())),
        ];
        chain.extend(resolvers.iter().cloned());

        let cache = ArtifactCache::new(cache_root)?;
        let report = Resolution::new(&descriptor, instruction, &chain, self.conflict_manager.as_ref())
            .run(conf, &cache)?;

        if report.has_unresolved() {
            warn!(
                configuration = conf,
                unresolved = report.unresolved.len(),
                "configuration has unresolved dependencies"
            );
        }
        info!(
            configuration = conf,
            modules = report.resolved.len(),
            artifacts = report.artifacts.len(),
            conflicts = report.conflicts.len(),
            "resolved configuration"
        );

        *self.last_report.write().unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
        Ok(report)
    }

    /// Map an already computed report to its artifact files
    pub fn resolve_from_report(&self, conf: &str, report: &ResolveReport) -> Result<Vec<PathBuf>> {
        if report.configuration != conf {
            return Err(KilnError::ConfigurationNotInReport {
                requested: conf.to_string(),
                found: report.configuration.clone(),
            });
        }
        if report.has_unresolved() && !report.lenient {
            return Err(KilnError::UnresolvedDependencies {
                configuration: conf.to_string(),
                unresolved: report
                    .unresolved
                    .iter()
                    .map(|u| (u.revision.to_string(), u.reason.clone()))
                    .collect(),
            });
        }

        let mut files: Vec<PathBuf> = Vec::new();
        for artifact in &report.artifacts {
            if !artifact.file.exists() {
                return Err(KilnError::CacheMiss {
                    module: artifact.revision.to_string(),
                    artifact: artifact.artifact.clone(),
                    path: artifact.file.clone(),
                });
            }
            if !files.contains(&artifact.file) {
                files.push(artifact.file.clone());
            }
        }
        Ok(files)
    }

    /// The report of the most recent resolution run by this engine.
    ///
    /// Concurrent resolutions overwrite each other here; callers needing a
    /// specific report keep the value returned by `resolve_as_report`.
    pub fn last_resolve_report(&self) -> Option<ResolveReport> {
        self.last_report
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Publish the artifacts of `conf` (and what it extends)
    #[allow(clippy::too_many_arguments)]
    pub fn publish(
        &self,
        conf: &str,
        instruction: &PublishInstruction,
        publish_resolvers: &[Arc<dyn DependencyResolver>],
        configurations: &ConfigurationContainer,
        dependencies: &DependencyContainer,
        artifacts: &ArtifactContainer,
        cache_root: &Path,
    ) -> Result<()> {
        let confs = configurations.chain(conf)?;
        let scope = DescriptorScope {
            configuration_spec: instruction.configuration_spec.clone(),
            dependency_spec: instruction.dependency_spec.clone(),
            artifact_spec: instruction.artifact_spec.clone(),
            ..Default::default()
        };
        let descriptor = self.converter.convert(&scope, configurations, dependencies, artifacts)?;
        let cache = ArtifactCache::new(cache_root)?;

        self.publisher
            .publish(&confs, instruction, publish_resolvers, &descriptor, &cache)
    }
}

/// A request for some configurations of a module revision
#[derive(Debug, Clone)]
struct Request {
    revision: ModuleRevisionId,
    confs: Vec<String>,
    transitive: bool,
}

enum Lookup {
    Found {
        descriptor: ModuleDescriptor,
        resolver: usize,
    },
    Missing(String),
}

type ConfKey = (ModuleRevisionId, String);

/// What the winners-only walk reached
#[derive(Default)]
struct Walk {
    order: Vec<ModuleRevisionId>,
    confs: HashMap<ModuleRevisionId, Vec<String>>,
    edges: HashMap<ModuleRevisionId, Vec<ModuleRevisionId>>,
    requested: BTreeMap<ModuleId, Vec<String>>,
    unresolved: Vec<UnresolvedDependency>,
    pending: Vec<Request>,
}

fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) {
    if !items.contains(&item) {
        items.push(item);
    }
}

fn resolver_failure(resolver: &dyn DependencyResolver, error: ResolverError) -> KilnError {
    KilnError::ResolverUnreachable {
        resolver: resolver.name().to_string(),
        reason: error.to_string(),
    }
}

/// State of one resolution run
struct Resolution<'a> {
    root: &'a ModuleDescriptor,
    instruction: &'a ResolveInstruction,
    resolvers: &'a [Arc<dyn DependencyResolver>],
    conflict_manager: &'a dyn ConflictManager,
    lookups: HashMap<ModuleRevisionId, Lookup>,
    /// Whether a visited `(revision, conf)` had its dependencies followed
    expanded: HashMap<ConfKey, bool>,
    children: HashMap<ConfKey, Vec<Request>>,
    conf_errors: HashMap<ConfKey, String>,
}

impl<'a> Resolution<'a> {
    fn new(
        root: &'a ModuleDescriptor,
        instruction: &'a ResolveInstruction,
        resolvers: &'a [Arc<dyn DependencyResolver>],
        conflict_manager: &'a dyn ConflictManager,
    ) -> Self {
        Self {
            root,
            instruction,
            resolvers,
            conflict_manager,
            lookups: HashMap::new(),
            expanded: HashMap::new(),
            children: HashMap::new(),
            conf_errors: HashMap::new(),
        }
    }

    fn run(mut self, conf: &str, cache: &ArtifactCache) -> Result<ResolveReport> {
        let roots = self.root_requests(conf)?;
        let mut queue: VecDeque<Request> = roots.iter().cloned().collect();

        let (winners, walk) = loop {
            self.discover(queue)?;
            let (winners, walk) = self.settle(&roots);
            if walk.pending.is_empty() {
                break (winners, walk);
            }
            queue = walk.pending.into_iter().collect();
        };

        let conflicts: Vec<ConflictRecord> = walk
            .requested
            .iter()
            .filter(|(_, versions)| versions.len() > 1)
            .filter_map(|(module, versions)| {
                let winner = winners.get(module)?;
                Some(ConflictRecord {
                    module: module.clone(),
                    winner: winner.clone(),
                    evicted: versions.iter().filter(|v| *v != winner).cloned().collect(),
                })
            })
            .collect();
        for conflict in &conflicts {
            debug!(
                module = %conflict.module,
                winner = %conflict.winner,
                evicted = ?conflict.evicted,
                "settled version conflict"
            );
        }

        let mut unresolved = walk.unresolved.clone();
        let artifacts = self.fetch_artifacts(&walk, cache, &mut unresolved)?;

        let resolved = walk
            .order
            .iter()
            .filter_map(|revision| match self.lookups.get(revision) {
                Some(Lookup::Found { resolver, .. }) => Some(ResolvedModule {
                    revision: revision.clone(),
                    configurations: walk.confs.get(revision).cloned().unwrap_or_default(),
                    dependencies: walk.edges.get(revision).cloned().unwrap_or_default(),
                    resolver: self.resolvers[*resolver].name().to_string(),
                }),
                _ => None,
            })
            .collect();

        Ok(ResolveReport {
            module: self.root.module.clone(),
            configuration: conf.to_string(),
            lenient: !self.instruction.fail_on_unresolved,
            root_dependencies: roots.iter().map(|r| r.revision.clone()).collect(),
            resolved,
            unresolved,
            conflicts,
            artifacts,
        })
    }

    fn root_requests(&self, conf: &str) -> Result<Vec<Request>> {
        let configurations = self.root.configuration_container();
        let chain = configurations.chain(conf)?;
        let conf_transitive = configurations.get(conf).map(|c| c.transitive).unwrap_or(true);

        Ok(self
            .root
            .dependencies
            .iter()
            .filter(|d| self.instruction.dependency_spec.is_satisfied_by(d))
            .filter_map(|d| {
                let confs = d.conf.targets_for(&chain);
                (!confs.is_empty()).then(|| Request {
                    revision: d.revision.clone(),
                    confs,
                    transitive: conf_transitive && d.transitive,
                })
            })
            .collect())
    }

    fn lookup(&mut self, revision: &ModuleRevisionId) -> Result<()> {
        if self.lookups.contains_key(revision) {
            return Ok(());
        }

        let mut invalid = Vec::new();
        for (index, resolver) in self.resolvers.iter().enumerate() {
            match resolver.find_module(revision) {
                Ok(Some(descriptor)) => {
                    debug!(module = %revision, resolver = resolver.name(), "found module");
                    self.lookups.insert(
                        revision.clone(),
                        Lookup::Found {
                            descriptor,
                            resolver: index,
                        },
                    );
                    return Ok(());
                }
                Ok(None) => {}
                Err(error @ ResolverError::InvalidMetadata { .. }) => {
                    invalid.push(format!("{}: {}", resolver.name(), error));
                }
                Err(error) => return Err(resolver_failure(resolver.as_ref(), error)),
            }
        }

        let reason = if invalid.is_empty() {
            let searched: Vec<&str> = self
                .resolvers
                .iter()
                .map(|r| r.name())
                .filter(|name| !matches!(*name, "client-modules" | "build"))
                .collect();
            format!("not found in any repository (searched: {})", searched.join(", "))
        } else {
            invalid.join("; ")
        };
        debug!(module = %revision, %reason, "module missing");
        self.lookups.insert(revision.clone(), Lookup::Missing(reason));
        Ok(())
    }

    fn discover(&mut self, mut queue: VecDeque<Request>) -> Result<()> {
        while let Some(request) = queue.pop_front() {
            if request.revision.id == self.root.module.id {
                continue;
            }
            self.lookup(&request.revision)?;
            if !matches!(self.lookups.get(&request.revision), Some(Lookup::Found { .. })) {
                continue;
            }

            for conf in &request.confs {
                let key = (request.revision.clone(), conf.clone());
                match self.expanded.get(&key) {
                    Some(true) => continue,
                    Some(false) if !request.transitive => continue,
                    _ => {}
                }
                self.expanded.insert(key.clone(), request.transitive);

                match self.configuration_dependencies(&request.revision, conf) {
                    Ok(children) => {
                        if request.transitive {
                            queue.extend(children.iter().cloned());
                            self.children.insert(key, children);
                        }
                    }
                    Err(reason) => {
                        self.conf_errors.insert(key, reason);
                    }
                }
            }
        }
        Ok(())
    }

    /// Dependencies a found module declares for `conf` and what it extends
    fn configuration_dependencies(
        &self,
        revision: &ModuleRevisionId,
        conf: &str,
    ) -> std::result::Result<Vec<Request>, String> {
        let Some(Lookup::Found { descriptor, .. }) = self.lookups.get(revision) else {
            return Ok(Vec::new());
        };

        // a module without configurations exposes everything through "default"
        let everything = conf == DEFAULT_CONFIGURATION && descriptor.configurations.is_empty();
        let (chain, conf_transitive) = if everything {
            (Vec::new(), true)
        } else {
            let configurations = descriptor.configuration_container();
            let configuration = configurations
                .get(conf)
                .ok_or_else(|| format!("configuration '{}' not found in {}", conf, revision))?;
            let chain = configurations.chain(conf).map_err(|e| e.to_string())?;
            (chain, configuration.transitive)
        };

        Ok(descriptor
            .dependencies
            .iter()
            .filter(|d| self.instruction.dependency_spec.is_satisfied_by(d))
            .filter_map(|d| {
                let confs = if everything {
                    d.conf.all_targets()
                } else {
                    d.conf.targets_for(&chain)
                };
                (!confs.is_empty()).then(|| Request {
                    revision: d.revision.clone(),
                    confs,
                    transitive: conf_transitive && d.transitive,
                })
            })
            .collect())
    }

    /// Pick winners until they no longer change
    fn settle(&self, roots: &[Request]) -> (BTreeMap<ModuleId, String>, Walk) {
        let mut winners = BTreeMap::new();
        for _ in 0..=self.lookups.len() {
            let walk = self.walk(roots, &winners);
            let next = self.choose(&walk.requested);
            if next == winners {
                return (winners, walk);
            }
            winners = next;
        }
        let walk = self.walk(roots, &winners);
        (winners, walk)
    }

    fn choose(&self, requested: &BTreeMap<ModuleId, Vec<String>>) -> BTreeMap<ModuleId, String> {
        requested
            .iter()
            .filter_map(|(module, versions)| {
                let winner = if versions.len() == 1 {
                    Some(versions[0].clone())
                } else {
                    self.conflict_manager.select(module, versions)
                };
                winner.map(|w| (module.clone(), w))
            })
            .collect()
    }

    /// Breadth-first walk from the root following winning revisions only.
    /// Modules without a winner keep every requested revision.
    fn walk(&self, roots: &[Request], winners: &BTreeMap<ModuleId, String>) -> Walk {
        let mut walk = Walk::default();
        let mut seen = HashSet::new();
        let mut followed = HashSet::new();
        let mut queue: VecDeque<Request> = roots.iter().cloned().collect();

        while let Some(request) = queue.pop_front() {
            let id = &request.revision.id;
            if *id == self.root.module.id {
                continue;
            }
            push_unique(
                walk.requested.entry(id.clone()).or_default(),
                request.revision.version.clone(),
            );
            let target = match winners.get(id) {
                Some(version) => id.with_version(version.as_str()),
                None => request.revision.clone(),
            };

            match self.lookups.get(&target) {
                None => {
                    walk.pending.push(Request {
                        revision: target,
                        ..request
                    });
                    continue;
                }
                Some(Lookup::Missing(reason)) => {
                    push_unique(
                        &mut walk.unresolved,
                        UnresolvedDependency {
                            revision: target,
                            reason: reason.clone(),
                        },
                    );
                    continue;
                }
                Some(Lookup::Found { .. }) => {}
            }

            for conf in &request.confs {
                let key = (target.clone(), conf.clone());
                match self.expanded.get(&key) {
                    Some(true) => {}
                    Some(false) if !request.transitive => {}
                    _ => {
                        walk.pending.push(Request {
                            revision: target.clone(),
                            confs: vec![conf.clone()],
                            transitive: request.transitive,
                        });
                        continue;
                    }
                }
                if let Some(reason) = self.conf_errors.get(&key) {
                    push_unique(
                        &mut walk.unresolved,
                        UnresolvedDependency {
                            revision: target.clone(),
                            reason: reason.clone(),
                        },
                    );
                    continue;
                }

                if seen.insert(target.clone()) {
                    walk.order.push(target.clone());
                }
                push_unique(walk.confs.entry(target.clone()).or_default(), conf.clone());

                if request.transitive && followed.insert(key.clone()) {
                    for child in self.children.get(&key).into_iter().flatten() {
                        if child.revision.id != self.root.module.id {
                            push_unique(walk.edges.entry(target.clone()).or_default(), child.revision.clone());
                        }
                        queue.push_back(child.clone());
                    }
                }
            }
        }

        walk
    }

    fn fetch_artifacts(
        &self,
        walk: &Walk,
        cache: &ArtifactCache,
        unresolved: &mut Vec<UnresolvedDependency>,
    ) -> Result<Vec<ResolvedArtifact>> {
        let mut resolved = Vec::new();

        for revision in &walk.order {
            let Some(Lookup::Found { descriptor, resolver }) = self.lookups.get(revision) else {
                continue;
            };
            let owner = &self.resolvers[*resolver];
            let confs = walk.confs.get(revision).cloned().unwrap_or_default();
            let configurations = descriptor.configuration_container();

            let mut artifact_confs = Vec::new();
            let mut everything = configurations.is_empty();
            for conf in &confs {
                match configurations.chain(conf) {
                    Ok(chain) => chain.into_iter().for_each(|c| push_unique(&mut artifact_confs, c)),
                    Err(_) if conf == DEFAULT_CONFIGURATION => everything = true,
                    Err(_) => {}
                }
            }

            for artifact in &descriptor.artifacts {
                if !everything && !artifact.belongs_to(&artifact_confs) {
                    continue;
                }

                let file = if owner.is_local() {
                    artifact.file.clone()
                } else {
                    cache.fetch(revision, artifact, owner.name(), |destination| {
                        self.fetch_from_repositories(*resolver, revision, artifact, destination)
                    })?
                };

                match file {
                    Some(file) => resolved.push(ResolvedArtifact {
                        revision: revision.clone(),
                        artifact: artifact.file_name(&revision.version),
                        file,
                    }),
                    None => push_unique(
                        unresolved,
                        UnresolvedDependency {
                            revision: revision.clone(),
                            reason: format!("artifact {} not found", artifact.file_name(&revision.version)),
                        },
                    ),
                }
            }
        }

        Ok(resolved)
    }

    /// Try the resolver that found the module first, then the other repositories
    fn fetch_from_repositories(
        &self,
        owner: usize,
        revision: &ModuleRevisionId,
        artifact: &Artifact,
        destination: &Path,
    ) -> Result<bool> {
        let others = self
            .resolvers
            .iter()
            .enumerate()
            .filter(|(index, r)| *index != owner && !r.is_local())
            .map(|(_, r)| r);

        for resolver in std::iter::once(&self.resolvers[owner]).chain(others) {
            match resolver.fetch_artifact(revision, artifact, destination) {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(error) => return Err(resolver_failure(resolver.as_ref(), error)),
            }
        }
        Ok(false)
    }
}
