//! Dependency reports: resolve a configuration and render its tree

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::artifacts::graph::{DependencyGraph, DependencyGraphBuilder, DependencyGraphNode};
use crate::error::{KilnError, Result};
use crate::project::Build;

/// Configuration reported when none is named
pub const DEFAULT_REPORT_CONFIGURATION: &str = "runtime";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Dot,
    Json,
}

/// Turns a dependency tree into text
pub trait ReportRenderer {
    fn render(&self, graph: &DependencyGraph) -> Result<String>;
}

/// Indented tree, one module per line
#[derive(Debug, Clone, Copy, Default)]
pub struct AsciiReportRenderer;

impl AsciiReportRenderer {
    fn label(node: &DependencyGraphNode) -> String {
        let mut label = format!("{}:{}", node.id, node.version);
        if let Some(winner) = &node.evicted {
            let _ = write!(label, " (evicted by {})", winner);
        }
        if node.unresolved {
            label.push_str(" (unresolved)");
        }
        label
    }

    fn render_children(out: &mut String, node: &DependencyGraphNode, prefix: &str) {
        let count = node.children.len();
        for (i, child) in node.children.iter().enumerate() {
            let last = i + 1 == count;
            let branch = if last { "\\--- " } else { "+--- " };
            let _ = writeln!(out, "{}{}{}", prefix, branch, Self::label(child));
            let nested = format!("{}{}", prefix, if last { "     " } else { "|    " });
            Self::render_children(out, child, &nested);
        }
    }
}

impl ReportRenderer for AsciiReportRenderer {
    fn render(&self, graph: &DependencyGraph) -> Result<String> {
        let mut out = String::new();
        let _ = writeln!(out, "{} - {}", graph.root.id, graph.configuration);
        if graph.root.children.is_empty() {
            out.push_str("No dependencies\n");
        } else {
            Self::render_children(&mut out, &graph.root, "");
        }
        Ok(out)
    }
}

/// Graphviz `digraph` with one edge per parent/child pair
#[derive(Debug, Clone, Copy, Default)]
pub struct DotReportRenderer;

impl DotReportRenderer {
    fn edges(out: &mut String, node: &DependencyGraphNode, from: &str) {
        for child in &node.children {
            let to = format!("{}:{}", child.id, child.version);
            let mut attrs = String::new();
            if child.evicted.is_some() {
                attrs.push_str(" [style=dashed]");
            } else if child.unresolved {
                attrs.push_str(" [color=red]");
            }
            let _ = writeln!(out, "  \"{}\" -> \"{}\"{};", from, to, attrs);
            Self::edges(out, child, &to);
        }
    }
}

impl ReportRenderer for DotReportRenderer {
    fn render(&self, graph: &DependencyGraph) -> Result<String> {
        let mut out = String::new();
        let _ = writeln!(out, "digraph \"{}\" {{", graph.configuration);
        out.push_str("  rankdir=LR;\n");
        out.push_str("  node [shape=box];\n");
        Self::edges(&mut out, &graph.root, &graph.root.id);
        out.push_str("}\n");
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonReportRenderer;

impl ReportRenderer for JsonReportRenderer {
    fn render(&self, graph: &DependencyGraph) -> Result<String> {
        serde_json::to_string_pretty(graph)
            .map(|mut json| {
                json.push('\n');
                json
            })
            .map_err(|e| KilnError::Io(e.into()))
    }
}

/// Dependency tree of one configuration of a project
#[derive(Debug, Clone, Default)]
pub struct DependencyReport {
    configuration: Option<String>,
    format: ReportFormat,
    output: Option<PathBuf>,
}

impl DependencyReport {
    pub fn new(configuration: Option<String>) -> Self {
        Self {
            configuration,
            format: ReportFormat::default(),
            output: None,
        }
    }

    pub fn with_format(mut self, format: ReportFormat) -> Self {
        self.format = format;
        self
    }

    /// Write the rendered report to `path` instead of handing it back
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    pub fn output(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    pub fn configuration(&self) -> &str {
        self.configuration
            .as_deref()
            .unwrap_or(DEFAULT_REPORT_CONFIGURATION)
    }

    fn renderer(&self) -> Box<dyn ReportRenderer> {
        match self.format {
            ReportFormat::Text => Box::new(AsciiReportRenderer),
            ReportFormat::Dot => Box::new(DotReportRenderer),
            ReportFormat::Json => Box::new(JsonReportRenderer),
        }
    }

    /// Resolve leniently and build the tree; unresolved modules show up as
    /// leaves instead of failing the report
    pub fn graph(&self, build: &Build, project: &str) -> Result<DependencyGraph> {
        let conf = self.configuration();
        let report = build.resolve_report(project, conf, true)?;
        DependencyGraphBuilder.build_graph(project, &report, conf)
    }

    pub fn render(&self, build: &Build, project: &str) -> Result<String> {
        let graph = self.graph(build, project)?;
        self.renderer().render(&graph)
    }

    /// Render the report into the output file, or return the text when no
    /// output file is set
    pub fn generate(&self, build: &Build, project: &str) -> Result<Option<String>> {
        let text = self.render(build, project)?;
        let Some(path) = &self.output else {
            return Ok(Some(text));
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, text)?;
        info!(path = %path.display(), configuration = self.configuration(), "wrote dependency report");
        Ok(None)
    }
}
