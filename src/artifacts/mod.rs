//! Dependency management: configurations, declared dependencies, module
//! descriptors, resolution and publication

pub mod configuration;
pub mod dependency;
pub mod descriptor;
pub mod engine;
pub mod graph;
pub mod module;
pub mod publish;
pub mod report;
pub mod resolver;
pub mod version;

pub use configuration::{Configuration, ConfigurationContainer};
pub use dependency::{ConfigurationMapping, Dependency, DependencyContainer};
pub use descriptor::{Artifact, ArtifactContainer, ModuleDescriptor, ModuleDescriptorConverter, Spec};
pub use engine::{ResolutionEngine, ResolveInstruction};
pub use graph::{DependencyGraph, DependencyGraphBuilder, DependencyGraphNode};
pub use module::{ModuleId, ModuleRevisionId};
pub use publish::{PublishEngine, PublishInstruction};
pub use report::ResolveReport;
pub use resolver::{DependencyResolver, FileSystemResolver, ProjectRegistry};
