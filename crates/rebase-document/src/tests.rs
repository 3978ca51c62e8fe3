//! Behavioural tests for the in-memory host

use super::*;
use uuid::Uuid;

const DOORS: &str = "Doors";

/// Accepts warnings and applies the first offered resolution to errors
struct AcceptAll;

impl FailuresPreprocessor for AcceptAll {
    fn preprocess(&mut self, failures: &mut dyn FailuresAccessor) -> FailureProcessingResult {
        for failure in failures.failures() {
            match failure.severity {
                FailureSeverity::Warning => failures.dismiss(failure.id).unwrap(),
                FailureSeverity::Error => {
                    let options = failures.untried_resolutions(failure.id).unwrap();
                    match options.first() {
                        Some(kind) => failures.resolve(failure.id, *kind).unwrap(),
                        None => return FailureProcessingResult::ProceedWithRollback,
                    }
                }
            }
        }
        FailureProcessingResult::Continue
    }
}

fn door_document() -> (MemoryDocument, ElementId, ElementId) {
    let mut doc = MemoryDocument::new("project");
    let family = doc.add_family("Single-Flush", DOORS, FamilyKind::Loadable);
    let door_type = doc
        .add_type_with_parameters(
            family,
            "0915 x 2134mm",
            vec![Parameter::new(ElementId::INVALID, "Hardware Set", StorageKind::Text)
                .with_value(ParamValue::Text("HW-1".into()))],
        )
        .unwrap();
    (doc, family, door_type)
}

#[test]
fn test_mutation_requires_transaction() {
    let (mut doc, family, _) = door_document();
    let err = doc.rename_family(family, "Other").unwrap_err();
    assert!(matches!(err, DocumentError::NoTransaction("rename_family")));
}

#[test]
fn test_nested_transactions_rejected() {
    let (mut doc, _, _) = door_document();
    doc.begin_transaction("outer").unwrap();
    assert!(matches!(
        doc.begin_transaction("inner"),
        Err(DocumentError::TransactionAlreadyOpen(name)) if name == "outer"
    ));
}

#[test]
fn test_rollback_restores_state() {
    let (mut doc, family, _) = door_document();
    doc.begin_transaction("rename").unwrap();
    doc.rename_family(family, "Renamed").unwrap();
    doc.rollback_transaction().unwrap();

    assert_eq!(doc.family(family).unwrap().unwrap().name, "Single-Flush");
    assert!(!doc.has_open_transaction());
    assert_eq!(doc.rolled_back_transactions(), 1);
}

#[test]
fn test_rename_collision_is_rejected() {
    let (mut doc, family, _) = door_document();
    let other = doc.add_family("Double-Flush", DOORS, FamilyKind::Loadable);
    doc.begin_transaction("rename").unwrap();
    let err = doc.rename_family(other, "Single-Flush").unwrap_err();
    assert!(matches!(err, DocumentError::DuplicateName { existing, .. } if existing == family));
}

#[test]
fn test_system_family_cannot_be_deleted() {
    let mut doc = MemoryDocument::new("project");
    let walls = doc.add_family("Basic Wall", "Walls", FamilyKind::System);
    doc.begin_transaction("delete").unwrap();
    assert!(matches!(
        doc.delete(&[walls]),
        Err(DocumentError::NotPermitted(_))
    ));
}

#[test]
fn test_delete_family_cascades_to_instances() {
    let (mut doc, family, door_type) = door_document();
    let parent = doc.place_instance(door_type).unwrap();
    let nested = doc.place_nested(door_type, parent).unwrap();

    doc.begin_transaction("delete").unwrap();
    let deleted = doc.delete(&[family]).unwrap();
    doc.commit_transaction(&mut AcceptAll).unwrap();

    for id in [family, door_type, parent, nested] {
        assert!(deleted.contains(&id), "{id} should be deleted");
    }
    assert!(doc.instances(DOORS).unwrap().is_empty());
}

#[test]
fn test_change_type_resets_family_parameters_but_keeps_bindings() {
    let (mut doc, family, door_type) = door_document();
    doc.add_binding(ParameterBinding {
        id: ElementId::INVALID,
        name: "Fire Rating".into(),
        guid: Some(Uuid::new_v4()),
        storage: StorageKind::Text,
        categories: vec![DOORS.into()],
        instance_binding: true,
    })
    .unwrap();
    let other_type = doc
        .add_type_with_parameters(
            family,
            "0813 x 2134mm",
            vec![Parameter::new(ElementId::INVALID, "Hardware Set", StorageKind::Text)],
        )
        .unwrap();
    let door = doc.place_instance(door_type).unwrap();
    doc.preset_parameter(door, "Fire Rating", ParamValue::Text("60 min".into()))
        .unwrap();
    doc.preset_parameter(door, "Comments", ParamValue::Text("keep".into()))
        .unwrap();

    doc.begin_transaction("switch").unwrap();
    doc.change_type_bulk(&[door], other_type).unwrap();
    doc.commit_transaction(&mut AcceptAll).unwrap();

    let door = doc.instance(door).unwrap().unwrap();
    assert_eq!(door.type_id, other_type);
    assert_eq!(
        door.parameter("Fire Rating").unwrap().value,
        Some(ParamValue::Text("60 min".into()))
    );
    assert_eq!(
        door.parameter("Comments").unwrap().value,
        Some(ParamValue::Text("keep".into()))
    );
    assert_eq!(door.parameter("Hardware Set").unwrap().value, None);
}

#[test]
fn test_change_type_rejects_grouped_instances() {
    let (mut doc, _, door_type) = door_document();
    let group = doc.add_group("Suite");
    let grouped = doc.place_in_group(door_type, group).unwrap();

    doc.begin_transaction("switch").unwrap();
    assert!(matches!(
        doc.change_type_bulk(&[grouped], door_type),
        Err(DocumentError::NotTopLevel(id)) if id == grouped
    ));

    let members = doc.ungroup(group).unwrap();
    assert_eq!(members, vec![grouped]);
    doc.change_type_bulk(&[grouped], door_type).unwrap();
}

#[test]
fn test_copy_family_reuses_destination_on_duplicate_names() {
    let (template, template_family, template_type) = door_document();
    let mut project = MemoryDocument::new("project");
    let existing = project.add_family("Single-Flush", DOORS, FamilyKind::Loadable);

    project.begin_transaction("copy").unwrap();
    let copied = project
        .copy_from(&template, &[template_family], DuplicateNamePolicy::UseDestination)
        .unwrap();
    project.commit_transaction(&mut AcceptAll).unwrap();

    assert_eq!(copied[&template_family], existing);
    let new_type = project.element_type(copied[&template_type]).unwrap().unwrap();
    assert_eq!(new_type.family_id, existing);
    assert_eq!(new_type.name, "0915 x 2134mm");
}

#[test]
fn test_copy_abort_policy_leaves_document_untouched() {
    let (template, template_family, _) = door_document();
    let mut project = MemoryDocument::new("project");
    project.add_family("Single-Flush", DOORS, FamilyKind::Loadable);

    project.begin_transaction("copy").unwrap();
    let err = project
        .copy_from(&template, &[template_family], DuplicateNamePolicy::Abort)
        .unwrap_err();
    assert!(matches!(err, DocumentError::DuplicateName { .. }));
    assert!(project.element_types(DOORS).unwrap().is_empty());
}

#[test]
fn test_unresolvable_error_rolls_back() {
    let (mut doc, family, door_type) = door_document();
    let other_type = doc.add_type(family, "Other").unwrap();
    doc.add_failure_rule(FailureRule {
        type_id: other_type,
        severity: FailureSeverity::Error,
        description: "Instance cannot be cut".into(),
        resolutions: vec![],
        fixed_by: None,
    });
    let door = doc.place_instance(door_type).unwrap();

    doc.begin_transaction("switch").unwrap();
    doc.change_type_bulk(&[door], other_type).unwrap();
    let status = doc.commit_transaction(&mut AcceptAll).unwrap();

    assert_eq!(status, TransactionStatus::RolledBack);
    assert_eq!(doc.instance(door).unwrap().unwrap().type_id, door_type);
}

#[test]
fn test_resolution_attempts_are_tracked_across_rounds() {
    let (mut doc, family, door_type) = door_document();
    let other_type = doc.add_type(family, "Other").unwrap();
    doc.add_failure_rule(FailureRule {
        type_id: other_type,
        severity: FailureSeverity::Error,
        description: "Elements overlap".into(),
        resolutions: vec![ResolutionKind::UnjoinElements, ResolutionKind::DetachElements],
        fixed_by: Some(ResolutionKind::DetachElements),
    });
    let door = doc.place_instance(door_type).unwrap();

    doc.begin_transaction("switch").unwrap();
    doc.change_type_bulk(&[door], other_type).unwrap();
    let status = doc.commit_transaction(&mut AcceptAll).unwrap();

    assert_eq!(status, TransactionStatus::Committed);
    assert_eq!(doc.instance(door).unwrap().unwrap().type_id, other_type);
}

#[test]
fn test_json_roundtrip_preserves_id_allocation() {
    let (doc, _, door_type) = door_document();
    let json = doc.to_json_string().unwrap();
    let mut restored = MemoryDocument::from_json_str(&json).unwrap();

    assert_eq!(restored.element_types(DOORS).unwrap().len(), 1);
    let placed = restored.place_instance(door_type).unwrap();
    assert!(placed.0 > door_type.0);
}

#[test]
fn test_save_and_load_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("project.json");
    let (doc, family, _) = door_document();
    doc.save(&path).unwrap();

    let loaded = MemoryDocument::load(&path).unwrap();
    assert_eq!(loaded.title(), "project");
    assert_eq!(loaded.family(family).unwrap().unwrap().name, "Single-Flush");
}

#[test]
fn test_injected_faults_refuse_calls_until_cleared() {
    let (mut doc, family, door_type) = door_document();
    doc.place_instance(door_type).unwrap();
    let template = door_document().0;

    doc.inject_fault(Fault::CategoryInstances(DOORS.to_string()));
    doc.inject_fault(Fault::TypeInstances(door_type));
    doc.inject_fault(Fault::Copy(family));
    assert!(matches!(doc.instances(DOORS), Err(DocumentError::Refused(_))));
    assert!(matches!(doc.instances_of_type(door_type), Err(DocumentError::Refused(_))));
    assert_eq!(doc.all_instances().unwrap().len(), 1);

    doc.begin_transaction("copy").unwrap();
    let err = doc
        .copy_from(&template, &[family], DuplicateNamePolicy::UseDestination)
        .unwrap_err();
    assert!(matches!(err, DocumentError::Refused(_)));
    doc.rollback_transaction().unwrap();

    doc.clear_faults();
    assert_eq!(doc.instances(DOORS).unwrap().len(), 1);
}

#[test]
fn test_commit_fault_leaves_transaction_open() {
    let (mut doc, family, _) = door_document();
    doc.inject_fault(Fault::Commit);

    doc.begin_transaction("rename").unwrap();
    doc.rename_family(family, "Renamed").unwrap();
    assert!(matches!(
        doc.commit_transaction(&mut AcceptAll),
        Err(DocumentError::Refused(_))
    ));
    assert!(doc.has_open_transaction());

    doc.rollback_transaction().unwrap();
    assert_eq!(doc.family(family).unwrap().unwrap().name, "Single-Flush");
}
