//! Module coordinates

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::KilnError;

/// A module identity without a version (`group:name`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId {
    pub group: String,
    pub name: String,
}

impl ModuleId {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }

    pub fn with_version(&self, version: impl Into<String>) -> ModuleRevisionId {
        ModuleRevisionId {
            id: self.clone(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.name)
    }
}

/// A concrete module revision (`group:name:version`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleRevisionId {
    #[serde(flatten)]
    pub id: ModuleId,
    pub version: String,
}

impl ModuleRevisionId {
    pub fn new(group: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        ModuleId::new(group, name).with_version(version)
    }

    pub fn group(&self) -> &str {
        &self.id.group
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }
}

impl fmt::Display for ModuleRevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.version)
    }
}

impl FromStr for ModuleRevisionId {
    type Err = KilnError;

    /// Parses `group:name:version`; every part must be non-empty.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let invalid = |reason: &str| KilnError::InvalidNotation {
            notation: format!("\"{}\"", s),
            reason: reason.to_string(),
        };

        if parts.len() != 3 {
            return Err(invalid("expected exactly three ':'-separated parts"));
        }
        if parts.iter().any(|p| p.trim().is_empty()) {
            return Err(invalid("group, name and version must not be empty"));
        }

        Ok(Self::new(parts[0].trim(), parts[1].trim(), parts[2].trim()))
    }
}
