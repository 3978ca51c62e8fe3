//! Run configuration.
//!
//! Built by the caller (usually from a TOML file) and handed to the
//! pipeline. Nothing here is global.
//!
//! ```toml
//! suffix = "_REBASE_OLD"
//! failure_mode = "permissive"
//! use_ai = true
//!
//! [parameters]
//! enabled = true
//! remove_unused = true
//!
//! [[categories]]
//! category = "Furniture"
//! kind = "families"
//! ungroup = true
//!
//! [[categories]]
//! category = "Walls"
//! kind = "system_types"
//! ```

use crate::error::{RebaseError, Result};
use rebase_llm::ResponseSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

pub const DEFAULT_SUFFIX: &str = "_REBASE_OLD";

/// What a catalog entry is for a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogKind {
    /// Loadable families; each family is an entry and its types are sub-entries
    Families,
    /// Types of host-defined families; each type is its own entry
    SystemTypes,
}

impl CatalogKind {
    pub fn response_schema(self) -> ResponseSchema {
        match self {
            CatalogKind::Families => ResponseSchema::FamilyMapping,
            CatalogKind::SystemTypes => ResponseSchema::TypeMapping,
        }
    }
}

/// One parameterized migration pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryDescriptor {
    pub category: String,
    pub kind: CatalogKind,
    /// Dissolve groups holding candidate instances before switching
    #[serde(default)]
    pub ungroup: bool,
    /// Overrides the run-wide suffix for this category
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
}

impl CategoryDescriptor {
    pub fn families(category: &str) -> Self {
        Self {
            category: category.to_string(),
            kind: CatalogKind::Families,
            ungroup: false,
            suffix: None,
        }
    }

    pub fn system_types(category: &str) -> Self {
        Self {
            category: category.to_string(),
            kind: CatalogKind::SystemTypes,
            ungroup: false,
            suffix: None,
        }
    }

    pub fn with_ungroup(mut self) -> Self {
        self.ungroup = true;
        self
    }

    pub fn with_suffix(mut self, suffix: &str) -> Self {
        self.suffix = Some(suffix.to_string());
        self
    }

    pub fn effective_suffix<'a>(&'a self, default: &'a str) -> &'a str {
        self.suffix.as_deref().unwrap_or(default)
    }
}

/// How the failure policy treats host errors at commit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Resolve what can be resolved, roll back only on unresolvable errors
    #[default]
    Permissive,
    /// Roll back on any error
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterSyncConfig {
    pub enabled: bool,
    /// Remove source bindings the template lacks when no element uses them
    pub remove_unused: bool,
}

impl Default for ParameterSyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            remove_unused: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebaseConfig {
    pub suffix: String,
    pub failure_mode: FailureMode,
    pub use_ai: bool,
    /// Only migrate entries with at least one directly placed instance
    pub filter_in_use: bool,
    pub parameters: ParameterSyncConfig,
    pub categories: Vec<CategoryDescriptor>,
}

impl Default for RebaseConfig {
    fn default() -> Self {
        Self {
            suffix: DEFAULT_SUFFIX.to_string(),
            failure_mode: FailureMode::Permissive,
            use_ai: true,
            filter_in_use: false,
            parameters: ParameterSyncConfig::default(),
            categories: vec![
                CategoryDescriptor::families("Furniture").with_ungroup(),
                CategoryDescriptor::families("Casework").with_ungroup(),
                CategoryDescriptor::families("Specialty Equipment"),
                CategoryDescriptor::families("Doors"),
                CategoryDescriptor::families("Windows"),
                CategoryDescriptor::system_types("Walls"),
                CategoryDescriptor::system_types("Floors"),
                CategoryDescriptor::system_types("Ceilings"),
            ],
        }
    }
}

impl RebaseConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: RebaseConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| RebaseError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.suffix.trim().is_empty() {
            return Err(RebaseError::Config("suffix must not be empty".into()));
        }
        let mut seen = BTreeSet::new();
        for descriptor in &self.categories {
            if descriptor.category.trim().is_empty() {
                return Err(RebaseError::Config("category name must not be empty".into()));
            }
            if descriptor
                .suffix
                .as_deref()
                .is_some_and(|s| s.trim().is_empty())
            {
                return Err(RebaseError::Config(format!(
                    "suffix override for '{}' must not be empty",
                    descriptor.category
                )));
            }
            if !seen.insert((descriptor.category.as_str(), descriptor.kind)) {
                return Err(RebaseError::Config(format!(
                    "category '{}' is configured twice",
                    descriptor.category
                )));
            }
        }
        Ok(())
    }

    /// Descriptors in execution order: families first, then system types
    pub fn ordered_categories(&self) -> Vec<&CategoryDescriptor> {
        let mut ordered: Vec<&CategoryDescriptor> = self.categories.iter().collect();
        ordered.sort_by_key(|d| d.kind);
        ordered
    }
}
