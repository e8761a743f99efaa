//! The outcome of resolving one configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::module::{ModuleId, ModuleRevisionId};

/// A module revision that made it into the resolved set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedModule {
    pub revision: ModuleRevisionId,

    /// Configurations of this module that were requested
    pub configurations: Vec<String>,

    /// Revisions this module asked for, in declaration order. A requested
    /// revision may differ from the one finally resolved for that module.
    pub dependencies: Vec<ModuleRevisionId>,

    /// Name of the resolver the module was found in
    pub resolver: String,
}

/// A dependency that could not be resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedDependency {
    pub revision: ModuleRevisionId,
    pub reason: String,
}

/// A version conflict and how it was settled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub module: ModuleId,
    pub winner: String,
    pub evicted: Vec<String>,
}

/// An artifact of a resolved module and the local file holding it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedArtifact {
    pub revision: ModuleRevisionId,
    pub artifact: String,
    pub file: PathBuf,
}

/// Result of resolving one configuration of a module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveReport {
    /// The module that was resolved
    pub module: ModuleRevisionId,
    pub configuration: String,

    /// Whether the instruction that produced this report tolerated
    /// unresolved dependencies
    pub lenient: bool,

    /// Revisions requested directly by the resolved configuration
    pub root_dependencies: Vec<ModuleRevisionId>,

    pub resolved: Vec<ResolvedModule>,
    pub unresolved: Vec<UnresolvedDependency>,
    pub conflicts: Vec<ConflictRecord>,
    pub artifacts: Vec<ResolvedArtifact>,
}

impl ResolveReport {
    pub fn has_unresolved(&self) -> bool {
        !self.unresolved.is_empty()
    }

    pub fn resolved_module(&self, id: &ModuleId) -> Option<&ResolvedModule> {
        self.resolved.iter().find(|m| m.revision.id == *id)
    }

    pub fn is_resolved(&self, revision: &ModuleRevisionId) -> bool {
        self.resolved.iter().any(|m| m.revision == *revision)
    }

    pub fn unresolved_dependency(&self, revision: &ModuleRevisionId) -> Option<&UnresolvedDependency> {
        self.unresolved.iter().find(|u| u.revision == *revision)
    }

    /// The revision of `module` that lost to the winner, if any
    pub fn conflict(&self, module: &ModuleId) -> Option<&ConflictRecord> {
        self.conflicts.iter().find(|c| c.module == *module)
    }

    pub fn is_evicted(&self, revision: &ModuleRevisionId) -> bool {
        self.conflict(&revision.id)
            .is_some_and(|c| c.evicted.contains(&revision.version))
    }
}
