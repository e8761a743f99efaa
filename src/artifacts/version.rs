//! Version ordering and conflict policies
//!
//! When several paths through the dependency graph ask for different
//! revisions of the same module, a [`ConflictManager`] decides which one wins.
//! The comparison rule is pluggable: semantic ordering (the default) or plain
//! lexicographic ordering of the version strings.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::module::ModuleId;

/// How version strings are ordered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionScheme {
    /// semver where both sides parse, otherwise segment by segment with
    /// numeric segments compared as numbers
    #[default]
    Semantic,
    Lexical,
}

impl VersionScheme {
    pub fn compare(self, a: &str, b: &str) -> Ordering {
        match self {
            Self::Lexical => a.cmp(b),
            Self::Semantic => match (semver::Version::parse(a), semver::Version::parse(b)) {
                (Ok(va), Ok(vb)) => va.cmp(&vb),
                _ => compare_segments(a, b),
            },
        }
    }
}

fn compare_segments(a: &str, b: &str) -> Ordering {
    let split = |s: &str| -> Vec<String> {
        s.split(['.', '-', '_', '+'])
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    };
    let (sa, sb) = (split(a), split(b));

    for (x, y) in sa.iter().zip(sb.iter()) {
        let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
            (Ok(nx), Ok(ny)) => nx.cmp(&ny),
            // a numeric segment sorts after a qualifier such as "beta"
            (Ok(_), Err(_)) => Ordering::Greater,
            (Err(_), Ok(_)) => Ordering::Less,
            (Err(_), Err(_)) => x.cmp(y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }

    // "1.0.1" > "1.0", but "1.0-beta" < "1.0"
    let common = sa.len().min(sb.len());
    match (sa.get(common), sb.get(common)) {
        (Some(extra), None) if extra.parse::<u64>().is_err() => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, Some(extra)) if extra.parse::<u64>().is_err() => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => a.cmp(b),
    }
}

/// Picks the winning revision among conflicting candidates
pub trait ConflictManager: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// The winning version among `candidates` (never empty), or `None` when
    /// every candidate is kept.
    fn select(&self, module: &ModuleId, candidates: &[String]) -> Option<String>;
}

/// The newest revision wins
#[derive(Debug, Clone, Copy, Default)]
pub struct LatestRevisionConflictManager {
    scheme: VersionScheme,
}

impl LatestRevisionConflictManager {
    pub fn new(scheme: VersionScheme) -> Self {
        Self { scheme }
    }
}

impl ConflictManager for LatestRevisionConflictManager {
    fn name(&self) -> &str {
        "latest-revision"
    }

    fn select(&self, _module: &ModuleId, candidates: &[String]) -> Option<String> {
        candidates
            .iter()
            .max_by(|a, b| self.scheme.compare(a, b))
            .cloned()
    }
}

/// Conflict resolution disabled: every requested revision is resolved
#[derive(Debug, Clone, Copy, Default)]
pub struct AllRevisionsConflictManager;

impl ConflictManager for AllRevisionsConflictManager {
    fn name(&self) -> &str {
        "all"
    }

    fn select(&self, _module: &ModuleId, _candidates: &[String]) -> Option<String> {
        None
    }
}
