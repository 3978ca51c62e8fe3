//! Identifier map: concrete old type id -> new type id.
//!
//! Built from name-level results against both catalogs. A pair is only
//! emitted when both ids resolve, so consumers never see sentinels.

use crate::catalog::Catalog;
use rebase_document::ElementId;
use rebase_llm::MappingResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierMap {
    pairs: BTreeMap<ElementId, ElementId>,
}

impl IdentifierMap {
    pub fn get(&self, old: ElementId) -> Option<ElementId> {
        self.pairs.get(&old).copied()
    }

    pub fn contains(&self, old: ElementId) -> bool {
        self.pairs.contains_key(&old)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ElementId, ElementId)> + '_ {
        self.pairs.iter().map(|(k, v)| (*k, *v))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMapStats {
    pub pairs: usize,
    pub missing_old: usize,
    pub missing_new: usize,
    pub skipped_pairs: usize,
}

/// Resolve `results` against the old and new catalogs.
///
/// Pure: the same inputs always give the same map. When two results claim
/// the same old id the first one wins.
pub fn build_id_map(
    old: &Catalog,
    new: &Catalog,
    results: &[MappingResult],
) -> (IdentifierMap, IdMapStats) {
    let mut map = IdentifierMap::default();
    let mut stats = IdMapStats::default();

    for result in results {
        let Some(target) = result.target() else {
            continue;
        };
        let Some(old_entry) = old.entry(result.old.trim()) else {
            stats.missing_old += 1;
            continue;
        };
        let Some(new_entry) = new.entry(target) else {
            stats.missing_new += 1;
            continue;
        };

        for sub in &result.sub_matches {
            let Some(sub_target) = sub.target() else {
                continue;
            };
            match (old_entry.sub(sub.old.trim()), new_entry.sub(sub_target)) {
                (Some(from), Some(to)) => {
                    map.pairs.entry(from.id).or_insert(to.id);
                }
                _ => {
                    tracing::debug!(
                        entry = %old_entry.name,
                        old = %sub.old,
                        new = %sub_target,
                        "sub-entry pair did not resolve"
                    );
                    stats.skipped_pairs += 1;
                }
            }
        }
    }

    stats.pairs = map.len();
    (map, stats)
}
