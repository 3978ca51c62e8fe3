//! End-to-end pipeline runs against in-memory documents

use rebase_document::{
    Document, DocumentRead, ElementId, FailureRule, FailureSeverity, FamilyKind, Fault,
    MemoryDocument, ParamValue, ParameterBinding, ResolutionKind, StorageKind,
};
use rebase_engine::{
    CancellationToken, CategoryDescriptor, FailureMode, MappingSource, MappingStatus,
    RebaseConfig, RebasePipeline, RunOutcome, SubStatus,
};
use rebase_llm::{LlmMappingGateway, MappingResult, MockProvider, StaticGateway};
use std::cell::RefCell;
use std::sync::Arc;

const FURNITURE: &str = "Furniture";

fn config(categories: Vec<CategoryDescriptor>) -> RebaseConfig {
    RebaseConfig {
        categories,
        ..RebaseConfig::default()
    }
}

fn furniture_config() -> RebaseConfig {
    config(vec![CategoryDescriptor::families(FURNITURE)])
}

fn static_pipeline(config: RebaseConfig, results: Vec<MappingResult>) -> RebasePipeline {
    RebasePipeline::new(config, Arc::new(StaticGateway::new(results)))
}

/// `family name -> [type names]` for a category
fn type_names(doc: &MemoryDocument, category: &str) -> Vec<(String, String)> {
    let families = doc.families(category).unwrap();
    let mut names: Vec<(String, String)> = doc
        .element_types(category)
        .unwrap()
        .into_iter()
        .map(|t| {
            let family = families
                .iter()
                .find(|f| f.id == t.family_id)
                .map(|f| f.name.clone())
                .unwrap_or_default();
            (family, t.name)
        })
        .collect();
    names.sort();
    names
}

fn type_id(doc: &MemoryDocument, category: &str, family: &str, name: &str) -> ElementId {
    let family_id = doc
        .families(category)
        .unwrap()
        .into_iter()
        .find(|f| f.name == family)
        .unwrap()
        .id;
    doc.element_types(category)
        .unwrap()
        .into_iter()
        .find(|t| t.family_id == family_id && t.name == name)
        .unwrap()
        .id
}

fn template_with_desk_a() -> MemoryDocument {
    let mut template = MemoryDocument::new("template");
    let desk = template.add_family("Desk-A", FURNITURE, FamilyKind::Loadable);
    template.add_type(desk, "36in").unwrap();
    template.add_type(desk, "48in").unwrap();
    template.add_type(desk, "60in").unwrap();
    template
}

// ============================================================================
// Reconciliation scenarios
// ============================================================================

#[tokio::test]
async fn test_exact_match_with_target_only_sub_entry() {
    let mut source = MemoryDocument::new("project");
    let desk = source.add_family("Desk-A", FURNITURE, FamilyKind::Loadable);
    let small = source.add_type(desk, "36in").unwrap();
    let large = source.add_type(desk, "48in").unwrap();
    let a = source.place_instance(small).unwrap();
    let b = source.place_instance(large).unwrap();
    let template = template_with_desk_a();

    let run = static_pipeline(furniture_config(), Vec::new())
        .run_full_migration(&mut source, &template, None, None)
        .await;

    assert_eq!(run.outcome, RunOutcome::Completed, "errors: {:?}", run.errors);
    let report = run.category(FURNITURE).unwrap();
    assert_eq!(report.exact_matches, 1);
    assert_eq!(report.switched_instances, 2);
    assert!(report.completed);

    let entry = &report.entries[0];
    assert_eq!(entry.status, MappingStatus::Processed);
    assert_eq!(entry.source, MappingSource::ExactMatch);
    let subs: Vec<_> = entry
        .sub_mappings
        .iter()
        .map(|m| (m.source.as_str(), m.target.as_deref(), m.status))
        .collect();
    assert_eq!(
        subs,
        vec![
            ("36in", Some("36in"), SubStatus::Mapped),
            ("48in", Some("48in"), SubStatus::Mapped),
        ]
    );

    // The superseded family is purged once nothing references it.
    assert_eq!(
        type_names(&source, FURNITURE),
        vec![
            ("Desk-A".to_string(), "36in".to_string()),
            ("Desk-A".to_string(), "48in".to_string()),
            ("Desk-A".to_string(), "60in".to_string()),
        ]
    );
    assert!(source.family(desk).unwrap().is_none());
    assert_eq!(
        source.instance(a).unwrap().unwrap().type_id,
        type_id(&source, FURNITURE, "Desk-A", "36in")
    );
    assert_eq!(
        source.instance(b).unwrap().unwrap().type_id,
        type_id(&source, FURNITURE, "Desk-A", "48in")
    );
}

#[tokio::test]
async fn test_no_match_routes_to_rename_or_delete() {
    let mut source = MemoryDocument::new("project");
    let used = source.add_family("Desk-B", FURNITURE, FamilyKind::Loadable);
    let used_type = source.add_type(used, "Std").unwrap();
    let placed = source.place_instance(used_type).unwrap();
    let unused = source.add_family("Desk-C", FURNITURE, FamilyKind::Loadable);
    source.add_type(unused, "Std").unwrap();
    let template = template_with_desk_a();

    let run = static_pipeline(
        furniture_config(),
        vec![MappingResult::no_match("Desk-B"), MappingResult::no_match("Desk-C")],
    )
    .run_full_migration(&mut source, &template, None, None)
    .await;

    assert_eq!(run.outcome, RunOutcome::Completed, "errors: {:?}", run.errors);
    let report = run.category(FURNITURE).unwrap();
    let status = |name: &str| {
        report
            .entries
            .iter()
            .find(|e| e.source_name == name)
            .map(|e| e.status)
    };
    assert_eq!(status("Desk-B"), Some(MappingStatus::ToRename));
    assert_eq!(status("Desk-C"), Some(MappingStatus::ToDelete));
    assert_eq!(report.switched_instances, 0);

    assert_eq!(source.family(used).unwrap().unwrap().name, "Desk-B_REBASE_OLD");
    assert!(source.family(unused).unwrap().is_none());
    assert_eq!(source.instance(placed).unwrap().unwrap().type_id, used_type);
    // Nothing resolved, so nothing was copied in.
    assert!(source
        .families(FURNITURE)
        .unwrap()
        .iter()
        .all(|f| f.name != "Desk-A"));
}

#[tokio::test]
async fn test_exact_match_takes_precedence_over_gateway() {
    let mut source = MemoryDocument::new("project");
    let desk = source.add_family("Desk-A", FURNITURE, FamilyKind::Loadable);
    let small = source.add_type(desk, "36in").unwrap();
    source.place_instance(small).unwrap();

    let mut template = template_with_desk_a();
    let chair = template.add_family("Chair", FURNITURE, FamilyKind::Loadable);
    template.add_type(chair, "36in").unwrap();

    let run = static_pipeline(
        furniture_config(),
        vec![MappingResult::new("Desk-A", "Chair").with_sub("36in", "36in")],
    )
    .run_full_migration(&mut source, &template, None, None)
    .await;

    let report = run.category(FURNITURE).unwrap();
    assert_eq!(report.ai_mapped, 0);
    let entry = &report.entries[0];
    assert_eq!(entry.source, MappingSource::ExactMatch);
    assert_eq!(entry.target_name.as_deref(), Some("Desk-A"));
    assert_eq!(entry.status, MappingStatus::Processed);
    assert!(source
        .families(FURNITURE)
        .unwrap()
        .iter()
        .all(|f| f.name != "Chair"));
}

#[tokio::test]
async fn test_exact_match_leaves_differently_named_type_alone() {
    let mut source = MemoryDocument::new("project");
    let desk = source.add_family("Desk-A", FURNITURE, FamilyKind::Loadable);
    let small = source.add_type(desk, "36in").unwrap();
    let placed = source.place_instance(small).unwrap();

    let mut template = MemoryDocument::new("template");
    let template_desk = template.add_family("Desk-A", FURNITURE, FamilyKind::Loadable);
    template.add_type(template_desk, "72in").unwrap();

    let run = RebasePipeline::offline(furniture_config())
        .run_full_migration(&mut source, &template, None, None)
        .await;

    assert_eq!(run.outcome, RunOutcome::Completed, "errors: {:?}", run.errors);
    let report = run.category(FURNITURE).unwrap();
    assert_eq!(report.switched_instances, 0);
    assert_eq!(report.entries[0].sub_mappings[0].status, SubStatus::KeptOld);

    let instance = source.instance(placed).unwrap().unwrap();
    assert_eq!(instance.type_id, small);
    assert_eq!(source.element_type(small).unwrap().unwrap().name, "36in");
    // The old family is renamed out of the way and kept alive by its instance.
    assert_eq!(source.family(desk).unwrap().unwrap().name, "Desk-A_REBASE_OLD");
    assert_eq!(
        type_names(&source, FURNITURE),
        vec![
            ("Desk-A".to_string(), "72in".to_string()),
            ("Desk-A_REBASE_OLD".to_string(), "36in".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_ai_mapping_switches_and_conserves_instances() {
    let mut source = MemoryDocument::new("project");
    let old_family = source.add_family("Desk-B", FURNITURE, FamilyKind::Loadable);
    let old_small = source.add_type(old_family, "36 inch").unwrap();
    let old_large = source.add_type(old_family, "48 inch").unwrap();
    for _ in 0..3 {
        source.place_instance(old_small).unwrap();
    }
    let host = source.place_instance(old_large).unwrap();
    source.place_nested(old_small, host).unwrap();
    let template = template_with_desk_a();

    let before = source.instances(FURNITURE).unwrap().len();
    let run = static_pipeline(
        furniture_config(),
        vec![MappingResult::new("Desk-B", "Desk-A")
            .with_sub("36 inch", "36in")
            .with_sub("48 inch", "48in")],
    )
    .run_full_migration(&mut source, &template, None, None)
    .await;
    let after = source.instances(FURNITURE).unwrap();

    assert_eq!(before, after.len());
    let report = run.category(FURNITURE).unwrap();
    assert_eq!(report.ai_mapped, 1);
    assert_eq!(report.switched_instances, 4);
    assert_eq!(report.skipped_nested, 1);
    assert_eq!(report.entries[0].source, MappingSource::Ai);
    assert_eq!(report.entries[0].status, MappingStatus::Processed);

    // The nested instance keeps its old type, so the old family survives
    // under the reserved suffix.
    let new_small = type_id(&source, FURNITURE, "Desk-A", "36in");
    let nested_on_old = after
        .iter()
        .filter(|i| i.type_id == old_small)
        .count();
    assert_eq!(nested_on_old, 1);
    assert_eq!(after.iter().filter(|i| i.type_id == new_small).count(), 3);
    assert_eq!(
        source.family(old_family).unwrap().unwrap().name,
        "Desk-B_REBASE_OLD"
    );
}

#[tokio::test]
async fn test_superseded_ai_entry_is_deleted_when_empty() {
    let mut source = MemoryDocument::new("project");
    let old_family = source.add_family("Desk-B", FURNITURE, FamilyKind::Loadable);
    let old_small = source.add_type(old_family, "36 inch").unwrap();
    source.place_instance(old_small).unwrap();
    let template = template_with_desk_a();

    let run = static_pipeline(
        furniture_config(),
        vec![MappingResult::new("Desk-B", "Desk-A").with_sub("36 inch", "36in")],
    )
    .run_full_migration(&mut source, &template, None, None)
    .await;

    assert_eq!(run.outcome, RunOutcome::Completed, "errors: {:?}", run.errors);
    assert!(source.family(old_family).unwrap().is_none());
    assert_eq!(run.deleted, 1);
}

// ============================================================================
// Parameter preservation
// ============================================================================

const ASSET_TAG_GUID: &str = "5b0c1f0e-6a55-4a6f-9d7e-2f0c3b9a7e11";

/// Old type 501 with two instances; the group pushes the next free id to 776,
/// so the copied family lands on 776 and its 36in type on 777.
fn source_with_type_501() -> MemoryDocument {
    let json = format!(
        r#"{{
  "title": "project",
  "families": [{{"id": 500, "name": "Desk-A", "category": "Furniture", "kind": "loadable"}}],
  "types": [{{
    "id": 501, "name": "36in", "family_id": 500, "category": "Furniture",
    "instance_parameters": [{{"id": 650, "name": "Asset Tag", "guid": "{guid}", "storage": "text"}}]
  }}],
  "instances": [
    {{"id": 700, "type_id": 501, "category": "Furniture", "placement": {{"kind": "top_level"}},
      "parameters": [
        {{"id": -1010106, "name": "Comments", "storage": "text", "value": {{"kind": "text", "value": "by the window"}}}},
        {{"id": 650, "name": "Asset Tag", "guid": "{guid}", "storage": "text", "value": {{"kind": "text", "value": "AT-700"}}}},
        {{"id": 651, "name": "Finish", "storage": "text", "value": {{"kind": "text", "value": "Oak"}}}}
      ]}},
    {{"id": 701, "type_id": 501, "category": "Furniture", "placement": {{"kind": "top_level"}},
      "parameters": [
        {{"id": 650, "name": "Asset Tag", "guid": "{guid}", "storage": "text", "value": {{"kind": "text", "value": "AT-701"}}}}
      ]}}
  ],
  "groups": [{{"id": 775, "name": "Spare", "members": []}}]
}}"#,
        guid = ASSET_TAG_GUID
    );
    MemoryDocument::from_json_str(&json).unwrap()
}

fn template_with_type_11() -> MemoryDocument {
    let json = format!(
        r#"{{
  "title": "template",
  "families": [{{"id": 10, "name": "Desk-A", "category": "Furniture", "kind": "loadable"}}],
  "types": [{{
    "id": 11, "name": "36in", "family_id": 10, "category": "Furniture",
    "instance_parameters": [{{"id": 12, "name": "Asset Tag", "guid": "{guid}", "storage": "text"}}]
  }}]
}}"#,
        guid = ASSET_TAG_GUID
    );
    MemoryDocument::from_json_str(&json).unwrap()
}

fn text_value(doc: &MemoryDocument, instance: i64, name: &str) -> Option<ParamValue> {
    doc.instance(ElementId(instance))
        .unwrap()
        .unwrap()
        .parameter(name)
        .and_then(|p| p.value.clone())
}

#[tokio::test]
async fn test_switch_501_to_777_preserves_shared_parameters() {
    let mut source = source_with_type_501();
    let template = template_with_type_11();

    let run = static_pipeline(furniture_config(), Vec::new())
        .run_full_migration(&mut source, &template, None, None)
        .await;

    assert_eq!(run.outcome, RunOutcome::Completed, "errors: {:?}", run.errors);
    assert_eq!(run.category(FURNITURE).unwrap().id_map.pairs, 1);
    for id in [700, 701] {
        assert_eq!(
            source.instance(ElementId(id)).unwrap().unwrap().type_id,
            ElementId(777)
        );
    }
    assert_eq!(
        text_value(&source, 700, "Asset Tag"),
        Some(ParamValue::Text("AT-700".into()))
    );
    assert_eq!(
        text_value(&source, 701, "Asset Tag"),
        Some(ParamValue::Text("AT-701".into()))
    );
    assert_eq!(
        text_value(&source, 700, "Comments"),
        Some(ParamValue::Text("by the window".into()))
    );
    // Defined only by the old type: nothing to restore it onto.
    assert!(source
        .instance(ElementId(700))
        .unwrap()
        .unwrap()
        .parameter("Finish")
        .is_none());
}

// ============================================================================
// Failure policy
// ============================================================================

fn error_on_777() -> FailureRule {
    FailureRule {
        type_id: ElementId(777),
        severity: FailureSeverity::Error,
        description: "Instance overlaps a wall".into(),
        resolutions: vec![ResolutionKind::DetachElements],
        fixed_by: Some(ResolutionKind::DetachElements),
    }
}

#[tokio::test]
async fn test_permissive_mode_resolves_and_commits() {
    let mut source = source_with_type_501();
    source.add_failure_rule(error_on_777());
    let template = template_with_type_11();

    let run = static_pipeline(furniture_config(), Vec::new())
        .run_full_migration(&mut source, &template, None, None)
        .await;

    assert_eq!(run.outcome, RunOutcome::Completed, "errors: {:?}", run.errors);
    assert_eq!(run.switched_instances, 2);
    assert_eq!(
        source.instance(ElementId(700)).unwrap().unwrap().type_id,
        ElementId(777)
    );
}

#[tokio::test]
async fn test_strict_mode_rolls_back_the_partition() {
    let mut source = source_with_type_501();
    source.add_failure_rule(error_on_777());
    let template = template_with_type_11();

    let strict = RebaseConfig {
        failure_mode: FailureMode::Strict,
        ..furniture_config()
    };
    let run = static_pipeline(strict, Vec::new())
        .run_full_migration(&mut source, &template, None, None)
        .await;

    assert_eq!(run.outcome, RunOutcome::CompletedWithErrors);
    assert_eq!(run.switched_instances, 0);
    let report = run.category(FURNITURE).unwrap();
    assert_eq!(report.entries[0].status, MappingStatus::Failed);
    assert!(report.completed);
    assert_eq!(
        source.instance(ElementId(700)).unwrap().unwrap().type_id,
        ElementId(501)
    );
    // The old family still has instances, so the purge leaves it alone.
    assert_eq!(
        source.family(ElementId(500)).unwrap().unwrap().name,
        "Desk-A_REBASE_OLD"
    );
    assert!(!source.has_open_transaction());
}

// ============================================================================
// Groups, system types, parameters
// ============================================================================

#[tokio::test]
async fn test_ungroup_category_switches_grouped_instances() {
    let mut source = MemoryDocument::new("project");
    let desk = source.add_family("Desk-A", FURNITURE, FamilyKind::Loadable);
    let small = source.add_type(desk, "36in").unwrap();
    let pod = source.add_group("Pod");
    let grouped = source.place_in_group(small, pod).unwrap();
    let template = template_with_desk_a();

    let grouping = config(vec![CategoryDescriptor::families(FURNITURE).with_ungroup()]);
    let run = static_pipeline(grouping, Vec::new())
        .run_full_migration(&mut source, &template, None, None)
        .await;

    assert_eq!(run.switched_instances, 1);
    assert!(source.groups().unwrap().is_empty());
    assert_eq!(
        source.instance(grouped).unwrap().unwrap().type_id,
        type_id(&source, FURNITURE, "Desk-A", "36in")
    );
}

#[tokio::test]
async fn test_grouped_instances_left_when_ungroup_is_off() {
    let mut source = MemoryDocument::new("project");
    let desk = source.add_family("Desk-A", FURNITURE, FamilyKind::Loadable);
    let small = source.add_type(desk, "36in").unwrap();
    let pod = source.add_group("Pod");
    let grouped = source.place_in_group(small, pod).unwrap();
    let template = template_with_desk_a();

    let run = static_pipeline(furniture_config(), Vec::new())
        .run_full_migration(&mut source, &template, None, None)
        .await;

    let report = run.category(FURNITURE).unwrap();
    assert_eq!(report.skipped_grouped, 1);
    assert_eq!(source.instance(grouped).unwrap().unwrap().type_id, small);
    assert_eq!(source.groups().unwrap().len(), 1);
}

#[tokio::test]
async fn test_system_types_are_rebased_per_type() {
    let mut source = MemoryDocument::new("project");
    let wall = source.add_family("Basic Wall", "Walls", FamilyKind::System);
    let generic = source.add_type(wall, "Generic 200").unwrap();
    let placed = source.place_instance(generic).unwrap();

    let mut template = MemoryDocument::new("template");
    let template_wall = template.add_family("Basic Wall", "Walls", FamilyKind::System);
    template.add_type(template_wall, "Generic 200").unwrap();

    let run = static_pipeline(
        config(vec![CategoryDescriptor::system_types("Walls")]),
        Vec::new(),
    )
    .run_full_migration(&mut source, &template, None, None)
    .await;

    assert_eq!(run.outcome, RunOutcome::Completed, "errors: {:?}", run.errors);
    assert_eq!(
        type_names(&source, "Walls"),
        vec![("Basic Wall".to_string(), "Generic 200".to_string())]
    );
    let switched_to = source.instance(placed).unwrap().unwrap().type_id;
    assert_ne!(switched_to, generic);
    assert_eq!(switched_to, type_id(&source, "Walls", "Basic Wall", "Generic 200"));
}

#[tokio::test]
async fn test_parameter_definitions_reconciled_first() {
    let mut source = MemoryDocument::new("project");
    source
        .add_binding(ParameterBinding {
            id: ElementId::INVALID,
            name: "Legacy Code".into(),
            guid: None,
            storage: StorageKind::Text,
            categories: vec![FURNITURE.into()],
            instance_binding: true,
        })
        .unwrap();
    let mut template = MemoryDocument::new("template");
    template
        .add_binding(ParameterBinding {
            id: ElementId::INVALID,
            name: "Asset Tag".into(),
            guid: None,
            storage: StorageKind::Text,
            categories: vec![FURNITURE.into()],
            instance_binding: true,
        })
        .unwrap();

    let run = static_pipeline(furniture_config(), Vec::new())
        .run_full_migration(&mut source, &template, None, None)
        .await;

    assert_eq!(run.parameters_added, 1);
    assert_eq!(run.parameters_removed, 1);
    let names: Vec<_> = source
        .parameter_bindings()
        .unwrap()
        .into_iter()
        .map(|b| b.name)
        .collect();
    assert_eq!(names, vec!["Asset Tag".to_string()]);
}

// ============================================================================
// Gateway failures, cancellation, progress
// ============================================================================

#[tokio::test]
async fn test_gateway_failure_leaves_entries_unresolved() {
    let mut source = MemoryDocument::new("project");
    let old_family = source.add_family("Desk-B", FURNITURE, FamilyKind::Loadable);
    let old_type = source.add_type(old_family, "Std").unwrap();
    source.place_instance(old_type).unwrap();
    let template = template_with_desk_a();

    let gateway = LlmMappingGateway::new(Arc::new(MockProvider::failing("rate limited")));
    let run = RebasePipeline::new(furniture_config(), Arc::new(gateway))
        .run_full_migration(&mut source, &template, None, None)
        .await;

    assert_eq!(run.outcome, RunOutcome::CompletedWithErrors);
    assert!(run.errors.iter().any(|e| e.contains("AI mapping")));
    let report = run.category(FURNITURE).unwrap();
    assert_eq!(report.entries[0].status, MappingStatus::ToRename);
    assert!(report.completed);
}

// ============================================================================
// Failure isolation
// ============================================================================

#[tokio::test]
async fn test_aborted_category_does_not_stop_siblings() {
    let mut source = MemoryDocument::new("project");
    let desk = source.add_family("Desk-A", FURNITURE, FamilyKind::Loadable);
    let small = source.add_type(desk, "36in").unwrap();
    let desk_instance = source.place_instance(small).unwrap();
    let wall = source.add_family("Basic Wall", "Walls", FamilyKind::System);
    let generic = source.add_type(wall, "Generic 200").unwrap();
    let wall_instance = source.place_instance(generic).unwrap();
    source.inject_fault(Fault::CategoryInstances(FURNITURE.to_string()));

    let mut template = template_with_desk_a();
    let template_wall = template.add_family("Basic Wall", "Walls", FamilyKind::System);
    template.add_type(template_wall, "Generic 200").unwrap();

    let run = RebasePipeline::offline(config(vec![
        CategoryDescriptor::families(FURNITURE),
        CategoryDescriptor::system_types("Walls"),
    ]))
    .run_full_migration(&mut source, &template, None, None)
    .await;

    assert_eq!(run.outcome, RunOutcome::CompletedWithErrors);
    let furniture = run.category(FURNITURE).unwrap();
    assert!(!furniture.completed);
    assert!(furniture.errors.iter().any(|e| e.starts_with("category aborted")));
    assert_eq!(furniture.switched_instances, 0);
    assert_eq!(source.instance(desk_instance).unwrap().unwrap().type_id, small);

    let walls = run.category("Walls").unwrap();
    assert!(walls.completed, "errors: {:?}", walls.errors);
    assert_eq!(walls.switched_instances, 1);
    assert_eq!(
        source.instance(wall_instance).unwrap().unwrap().type_id,
        type_id(&source, "Walls", "Basic Wall", "Generic 200")
    );
}

#[tokio::test]
async fn test_copy_failure_skips_only_that_entry() {
    let mut source = MemoryDocument::new("project");
    let desk = source.add_family("Desk-B", FURNITURE, FamilyKind::Loadable);
    let desk_type = source.add_type(desk, "36in").unwrap();
    let desk_instance = source.place_instance(desk_type).unwrap();
    let chair = source.add_family("Chair-B", FURNITURE, FamilyKind::Loadable);
    let chair_type = source.add_type(chair, "Std").unwrap();
    let chair_instance = source.place_instance(chair_type).unwrap();

    let mut template = MemoryDocument::new("template");
    let template_desk = template.add_family("Desk-A", FURNITURE, FamilyKind::Loadable);
    template.add_type(template_desk, "36in").unwrap();
    let template_chair = template.add_family("Chair-A", FURNITURE, FamilyKind::Loadable);
    template.add_type(template_chair, "Std").unwrap();
    source.inject_fault(Fault::Copy(template_desk));

    let run = static_pipeline(
        furniture_config(),
        vec![
            MappingResult::new("Desk-B", "Desk-A").with_sub("36in", "36in"),
            MappingResult::new("Chair-B", "Chair-A").with_sub("Std", "Std"),
        ],
    )
    .run_full_migration(&mut source, &template, None, None)
    .await;

    assert_eq!(run.outcome, RunOutcome::CompletedWithErrors);
    let report = run.category(FURNITURE).unwrap();
    assert!(report.completed);
    assert!(report.errors.iter().any(|e| e.contains("copy 'Desk-A' failed")));
    assert_eq!(report.switched_instances, 1);

    let status = |name: &str| {
        report
            .entries
            .iter()
            .find(|e| e.source_name == name)
            .map(|e| e.status)
    };
    assert_eq!(status("Desk-B"), Some(MappingStatus::Failed));
    assert_eq!(status("Chair-B"), Some(MappingStatus::Processed));

    assert_eq!(source.instance(desk_instance).unwrap().unwrap().type_id, desk_type);
    assert_eq!(
        source.instance(chair_instance).unwrap().unwrap().type_id,
        type_id(&source, FURNITURE, "Chair-A", "Std")
    );
    assert!(source.families(FURNITURE).unwrap().iter().all(|f| f.name != "Desk-A"));
}

#[tokio::test]
async fn test_cancelled_before_start_changes_nothing() {
    let mut source = MemoryDocument::new("project");
    let desk = source.add_family("Desk-A", FURNITURE, FamilyKind::Loadable);
    let small = source.add_type(desk, "36in").unwrap();
    source.place_instance(small).unwrap();
    let template = template_with_desk_a();

    let token = CancellationToken::new();
    token.cancel();
    let run = static_pipeline(furniture_config(), Vec::new())
        .run_full_migration(&mut source, &template, None, Some(&token))
        .await;

    assert_eq!(run.outcome, RunOutcome::Cancelled);
    assert!(run.categories.is_empty());
    assert_eq!(source.committed_transactions(), 0);
    assert_eq!(source.family(desk).unwrap().unwrap().name, "Desk-A");
}

#[tokio::test]
async fn test_cancel_between_stages_keeps_committed_work() {
    let mut source = MemoryDocument::new("project");
    let desk = source.add_family("Desk-A", FURNITURE, FamilyKind::Loadable);
    let small = source.add_type(desk, "36in").unwrap();
    let placed = source.place_instance(small).unwrap();
    let mut template = template_with_desk_a();
    template
        .add_binding(ParameterBinding {
            id: ElementId::INVALID,
            name: "Asset Tag".into(),
            guid: None,
            storage: StorageKind::Text,
            categories: vec![FURNITURE.into()],
            instance_binding: true,
        })
        .unwrap();

    let token = CancellationToken::new();
    let sink = |stage: &str| {
        if stage.starts_with("Reconciling parameter") {
            token.cancel();
        }
    };
    let run = static_pipeline(furniture_config(), Vec::new())
        .run_full_migration(&mut source, &template, Some(&sink), Some(&token))
        .await;

    assert_eq!(run.outcome, RunOutcome::Cancelled);
    assert_eq!(run.parameters_added, 1);
    assert_eq!(source.instance(placed).unwrap().unwrap().type_id, small);
    assert!(!source.has_open_transaction());
}

#[tokio::test]
async fn test_progress_reports_stages_and_items() {
    let mut source = MemoryDocument::new("project");
    let desk = source.add_family("Desk-A", FURNITURE, FamilyKind::Loadable);
    let small = source.add_type(desk, "36in").unwrap();
    source.place_instance(small).unwrap();
    let template = template_with_desk_a();

    let stages = RefCell::new(Vec::new());
    let sink = |stage: &str| stages.borrow_mut().push(stage.to_string());
    static_pipeline(furniture_config(), Vec::new())
        .run_full_migration(&mut source, &template, Some(&sink), None)
        .await;

    let stages = stages.into_inner();
    assert_eq!(stages.first().map(String::as_str), Some("Reconciling Furniture"));
    assert!(stages.contains(&"Loading template entry 1/1: Desk-A".to_string()));
    assert!(stages.contains(&"Switching Furniture".to_string()));
    assert_eq!(stages.last().map(String::as_str), Some("Done"));
}

#[tokio::test]
async fn test_invalid_config_fails_the_run() {
    let mut source = MemoryDocument::new("project");
    let template = MemoryDocument::new("template");
    let bad = RebaseConfig {
        suffix: String::new(),
        ..furniture_config()
    };

    let run = RebasePipeline::offline(bad)
        .run_full_migration(&mut source, &template, None, None)
        .await;

    assert!(matches!(run.outcome, RunOutcome::Failed(_)));
    assert!(!run.is_success());
    assert_eq!(run.errors.len(), 1);
}
