//! Renderer-independent dependency trees built from resolve reports

use serde::Serialize;

use super::module::ModuleRevisionId;
use super::report::ResolveReport;
use crate::error::{KilnError, Result};

/// One node of a dependency tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyGraphNode {
    /// `group:name`, or the project path for the root
    pub id: String,
    pub version: String,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DependencyGraphNode>,

    /// Version that won over this revision
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evicted: Option<String>,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub unresolved: bool,
}

impl DependencyGraphNode {
    fn leaf(revision: &ModuleRevisionId) -> Self {
        Self {
            id: revision.id.to_string(),
            version: revision.version.clone(),
            children: Vec::new(),
            evicted: None,
            unresolved: false,
        }
    }

    /// Number of nodes below this one
    pub fn descendants(&self) -> usize {
        self.children.iter().map(|c| 1 + c.descendants()).sum()
    }
}

/// The dependency tree of one configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyGraph {
    pub configuration: String,
    pub root: DependencyGraphNode,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyGraphBuilder;

impl DependencyGraphBuilder {
    /// Build the tree of `conf` for the project at `project`.
    ///
    /// A requested revision that lost a conflict becomes an evicted leaf, an
    /// unresolved one an unresolved leaf, and a module already on the path
    /// from the root a plain leaf.
    pub fn build_graph(&self, project: &str, report: &ResolveReport, conf: &str) -> Result<DependencyGraph> {
        if report.configuration != conf {
            return Err(KilnError::ConfigurationNotInReport {
                requested: conf.to_string(),
                found: report.configuration.clone(),
            });
        }

        let mut path = Vec::new();
        let children = report
            .root_dependencies
            .iter()
            .map(|revision| Self::node(report, revision, &mut path))
            .collect();

        Ok(DependencyGraph {
            configuration: conf.to_string(),
            root: DependencyGraphNode {
                id: project.to_string(),
                version: report.module.version.clone(),
                children,
                evicted: None,
                unresolved: false,
            },
        })
    }

    fn node(report: &ResolveReport, revision: &ModuleRevisionId, path: &mut Vec<ModuleRevisionId>) -> DependencyGraphNode {
        let mut node = DependencyGraphNode::leaf(revision);

        let Some(resolved) = report.resolved.iter().find(|m| m.revision == *revision) else {
            match report.resolved_module(&revision.id) {
                Some(winner) => node.evicted = Some(winner.revision.version.clone()),
                None => node.unresolved = true,
            }
            return node;
        };

        if path.iter().any(|p| p.id == revision.id) {
            return node;
        }

        path.push(revision.clone());
        node.children = resolved
            .dependencies
            .iter()
            .map(|child| Self::node(report, child, path))
            .collect();
        path.pop();

        node
    }
}
