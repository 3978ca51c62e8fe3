//! Reserved-suffix names for superseded entries.

use crate::config::{CatalogKind, CategoryDescriptor};
use rebase_document::{Document, DocumentError, DocumentRead, ElementId, FamilyKind};
use std::collections::BTreeSet;

/// `base + suffix`, or `base + suffix + n` for the smallest `n >= 1` that is
/// not already taken.
pub fn suffixed_name(base: &str, suffix: &str, taken: &BTreeSet<String>) -> String {
    let candidate = format!("{base}{suffix}");
    if !taken.contains(&candidate) {
        return candidate;
    }
    (1u32..)
        .map(|n| format!("{base}{suffix}{n}"))
        .find(|name| !taken.contains(name))
        .unwrap_or(candidate)
}

/// Whether `name` carries `suffix`, optionally followed by a numeric tail.
pub fn is_suffixed(name: &str, suffix: &str) -> bool {
    let Some(pos) = name.rfind(suffix) else {
        return false;
    };
    if pos == 0 {
        return false;
    }
    name[pos + suffix.len()..].chars().all(|c| c.is_ascii_digit())
}

/// Rename/delete units of a category as `(id, name)`: loadable families,
/// or the types of a system-type category.
pub fn live_units<D: DocumentRead + ?Sized>(
    doc: &D,
    descriptor: &CategoryDescriptor,
) -> Result<Vec<(ElementId, String)>, DocumentError> {
    Ok(match descriptor.kind {
        CatalogKind::Families => doc
            .families(&descriptor.category)?
            .into_iter()
            .filter(|f| f.kind == FamilyKind::Loadable)
            .map(|f| (f.id, f.name))
            .collect(),
        CatalogKind::SystemTypes => doc
            .element_types(&descriptor.category)?
            .into_iter()
            .map(|t| (t.id, t.name))
            .collect(),
    })
}

pub fn existing_names<D: DocumentRead + ?Sized>(
    doc: &D,
    descriptor: &CategoryDescriptor,
) -> Result<BTreeSet<String>, DocumentError> {
    Ok(live_units(doc, descriptor)?
        .into_iter()
        .map(|(_, name)| name)
        .collect())
}

/// Rename one unit: the family for loadable families, the type otherwise.
pub fn rename_unit(
    doc: &mut dyn Document,
    kind: CatalogKind,
    id: ElementId,
    new_name: &str,
) -> Result<(), DocumentError> {
    match kind {
        CatalogKind::Families => doc.rename_family(id, new_name),
        CatalogKind::SystemTypes => doc.rename_type(id, new_name),
    }
}

/// Instances of every type under an entry, whatever their placement.
pub fn live_instance_count<D: DocumentRead + ?Sized>(
    doc: &D,
    descriptor: &CategoryDescriptor,
    entry_id: ElementId,
) -> Result<usize, DocumentError> {
    let type_ids: Vec<ElementId> = match descriptor.kind {
        CatalogKind::Families => doc
            .element_types(&descriptor.category)?
            .into_iter()
            .filter(|t| t.family_id == entry_id)
            .map(|t| t.id)
            .collect(),
        CatalogKind::SystemTypes => vec![entry_id],
    };
    let mut count = 0;
    for type_id in type_ids {
        count += doc.instances_of_type(type_id)?.len();
    }
    Ok(count)
}
