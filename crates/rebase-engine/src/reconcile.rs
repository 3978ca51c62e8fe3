//! Name reconciliation between a source and a target catalog.
//!
//! Exact (byte-equal) names resolve immediately. Everything else is residual
//! and may later be resolved by gateway results, which never override an
//! exact match.

use crate::catalog::{Catalog, CatalogEntry};
use crate::mapping::{MappingEntry, MappingSource, MappingStatus, SubEntryMapping, SubStatus};
use rebase_llm::{MappingResult, SubMatch};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub exact_matches: BTreeSet<String>,
    pub residual: Vec<CatalogEntry>,
    /// One entry per source catalog entry, in catalog order
    pub entries: Vec<MappingEntry>,
}

pub fn reconcile(source: &Catalog, target: &Catalog) -> Reconciliation {
    let mut result = Reconciliation::default();
    for entry in source.entries() {
        match target.entry(&entry.name) {
            Some(target_entry) => {
                result.exact_matches.insert(entry.name.clone());
                let subs = pair_sub_entries(entry, target_entry, &[], false);
                result.entries.push(MappingEntry::exact(&entry.name, subs));
            }
            None => {
                result.residual.push(entry.clone());
                result.entries.push(MappingEntry::pending(&entry.name));
            }
        }
    }
    result
}

/// Pair the sub-entries of a gateway-mapped entry with its target's.
///
/// Proposed sub-matches win; anything they do not mention falls back to an
/// identical name, and a lone sub-entry on both sides pairs with its
/// counterpart. Exact-match entries never take the lone-pair fallback: their
/// sub-entries pair by name only.
pub fn map_sub_entries(
    source: &CatalogEntry,
    target: &CatalogEntry,
    proposed: &[SubMatch],
) -> Vec<SubEntryMapping> {
    pair_sub_entries(source, target, proposed, true)
}

fn pair_sub_entries(
    source: &CatalogEntry,
    target: &CatalogEntry,
    proposed: &[SubMatch],
    lone_pair: bool,
) -> Vec<SubEntryMapping> {
    let proposals: HashMap<&str, &SubMatch> = proposed
        .iter()
        .rev()
        .map(|m| (m.old.trim(), m))
        .collect();
    let single_pair =
        lone_pair && source.sub_entries.len() == 1 && target.sub_entries.len() == 1;

    source
        .sub_entries
        .iter()
        .map(|sub| {
            let (target_name, status) = match proposals.get(sub.name.as_str()) {
                Some(proposal) => match proposal.target() {
                    None => (None, SubStatus::NoMatch),
                    Some(name) if target.sub(name).is_some() => {
                        (Some(name.to_string()), SubStatus::Mapped)
                    }
                    Some(name) => (Some(name.to_string()), SubStatus::NotFound),
                },
                None if target.sub(&sub.name).is_some() => {
                    (Some(sub.name.clone()), SubStatus::Mapped)
                }
                None if single_pair => (
                    Some(target.sub_entries[0].name.clone()),
                    SubStatus::Mapped,
                ),
                None => (None, SubStatus::KeptOld),
            };
            SubEntryMapping {
                source: sub.name.clone(),
                target: target_name,
                status,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AiApplyStats {
    pub mapped: usize,
    pub no_match: usize,
    pub unknown_target: usize,
    pub ignored: usize,
}

/// Fold gateway results into the pending entries.
///
/// Results for names that are not pending (unknown or exact matches) are
/// ignored. A target that is not in the target catalog counts as no match.
pub fn apply_ai_results(
    entries: &mut [MappingEntry],
    results: &[MappingResult],
    source: &Catalog,
    target: &Catalog,
) -> AiApplyStats {
    let mut stats = AiApplyStats::default();
    let mut by_old: HashMap<&str, &MappingResult> = HashMap::new();
    for result in results {
        by_old.entry(result.old.trim()).or_insert(result);
    }

    let pending: BTreeSet<&str> = entries
        .iter()
        .filter(|e| e.status == MappingStatus::Pending)
        .map(|e| e.source_name.as_str())
        .collect();
    stats.ignored = by_old.keys().filter(|old| !pending.contains(*old)).count();

    for entry in entries.iter_mut() {
        if entry.status != MappingStatus::Pending {
            continue;
        }
        let Some(result) = by_old.get(entry.source_name.as_str()) else {
            continue;
        };
        let Some(target_name) = result.target() else {
            stats.no_match += 1;
            continue;
        };
        let (Some(source_entry), Some(target_entry)) =
            (source.entry(&entry.source_name), target.entry(target_name))
        else {
            tracing::warn!(
                entry = %entry.source_name,
                proposed = %target_name,
                "proposed target is not in the target catalog"
            );
            stats.unknown_target += 1;
            continue;
        };

        entry.sub_mappings = map_sub_entries(source_entry, target_entry, &result.sub_matches);
        entry.target_name = Some(target_entry.name.clone());
        entry.source = MappingSource::Ai;
        entry.status = MappingStatus::AiMapped;
        stats.mapped += 1;
    }

    if stats.ignored > 0 {
        tracing::debug!(ignored = stats.ignored, "gateway results for unknown or settled entries");
    }
    stats
}
