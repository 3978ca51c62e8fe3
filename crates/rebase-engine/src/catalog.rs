//! Catalog collection: a normalized, name-keyed view of one category.
//!
//! ```text
//! Families:      Family "Desk-A" ──► CatalogEntry { id: family, subs: [36in, 48in] }
//! SystemTypes:   Type "Generic 200" ──► CatalogEntry { id: type, subs: [Generic 200] }
//! ```
//!
//! A system type is its own single sub-entry, so the identifier map works
//! the same way for both kinds.

use crate::config::{CatalogKind, CategoryDescriptor};
use rebase_document::{DocumentError, DocumentRead, ElementId, FamilyKind, Placement};
use rebase_llm::CatalogSummary;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubEntry {
    pub name: String,
    pub id: ElementId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub id: ElementId,
    pub sub_entries: Vec<SubEntry>,
}

impl CatalogEntry {
    pub fn sub(&self, name: &str) -> Option<&SubEntry> {
        self.sub_entries.iter().find(|s| s.name == name)
    }

    pub fn sub_names(&self) -> impl Iterator<Item = &str> {
        self.sub_entries.iter().map(|s| s.name.as_str())
    }

    pub fn summary(&self) -> CatalogSummary {
        CatalogSummary {
            name: self.name.clone(),
            sub_names: self.sub_names().map(str::to_string).collect(),
        }
    }
}

/// Entries of one category, unique by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl Catalog {
    /// Build from entries; on a duplicate name the first entry is kept.
    pub fn from_entries(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        let mut map = BTreeMap::new();
        for entry in entries {
            map.entry(entry.name.clone()).or_insert(entry);
        }
        Self { entries: map }
    }

    pub fn entry(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn summaries(&self) -> Vec<CatalogSummary> {
        self.entries().map(CatalogEntry::summary).collect()
    }

    pub fn by_id(&self) -> HashMap<ElementId, &CatalogEntry> {
        self.entries().map(|e| (e.id, e)).collect()
    }
}

/// Collect the catalog of one category. Read-only.
pub fn collect<D: DocumentRead + ?Sized>(
    doc: &D,
    descriptor: &CategoryDescriptor,
) -> Result<Catalog, DocumentError> {
    let families: HashMap<ElementId, _> = doc
        .families(&descriptor.category)?
        .into_iter()
        .map(|f| (f.id, f))
        .collect();

    let mut grouped: BTreeMap<String, CatalogEntry> = BTreeMap::new();
    for element_type in doc.element_types(&descriptor.category)? {
        let Some(family) = families.get(&element_type.family_id) else {
            tracing::warn!(
                type_id = %element_type.id,
                family_id = %element_type.family_id,
                "type without a family in this category, skipped"
            );
            continue;
        };

        let sub = SubEntry {
            name: element_type.name.clone(),
            id: element_type.id,
        };
        match (descriptor.kind, family.kind) {
            (CatalogKind::Families, FamilyKind::Loadable) => {
                let entry = grouped
                    .entry(family.name.clone())
                    .or_insert_with(|| CatalogEntry {
                        name: family.name.clone(),
                        id: family.id,
                        sub_entries: Vec::new(),
                    });
                if entry.sub(&sub.name).is_none() {
                    entry.sub_entries.push(sub);
                }
            }
            (CatalogKind::SystemTypes, FamilyKind::System) => {
                if let Some(existing) = grouped.get(&sub.name) {
                    tracing::warn!(
                        name = %sub.name,
                        kept = %existing.id,
                        dropped = %sub.id,
                        "duplicate system type name, keeping the first"
                    );
                    continue;
                }
                grouped.insert(
                    sub.name.clone(),
                    CatalogEntry {
                        name: sub.name.clone(),
                        id: sub.id,
                        sub_entries: vec![sub],
                    },
                );
            }
            _ => {}
        }
    }

    Ok(Catalog { entries: grouped })
}

/// Keep only entries with at least one instance placed directly (not nested
/// inside another instance). An entry whose instances cannot be queried is
/// kept.
pub fn filter_in_use<D: DocumentRead + ?Sized>(doc: &D, catalog: &Catalog) -> Catalog {
    let kept = catalog.entries().filter(|entry| {
        let mut in_use = false;
        for sub in &entry.sub_entries {
            match doc.instances_of_type(sub.id) {
                Ok(instances) => {
                    if instances
                        .iter()
                        .any(|i| !matches!(i.placement, Placement::Nested(_)))
                    {
                        in_use = true;
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        entry = %entry.name,
                        error = %err,
                        "instance query failed, keeping entry"
                    );
                    return true;
                }
            }
        }
        in_use
    });
    Catalog::from_entries(kept.cloned())
}
