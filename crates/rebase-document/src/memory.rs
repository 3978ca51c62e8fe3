//! In-memory host document.
//!
//! A faithful-enough host for running the rebase engine outside a CAD
//! application: element tables, snapshot-based transactions, cascade deletion,
//! type-change parameter semantics and registrable failure rules.

use crate::failure::FailureMessage;
use crate::{
    Document, DocumentError, DocumentRead, DuplicateNamePolicy, ElementId, ElementType, Family,
    FailureId, FailureProcessingResult, FailureSeverity, FailuresAccessor, FailuresPreprocessor,
    FamilyKind, Group, Instance, ParamValue, Parameter, ParameterBinding, Placement,
    ResolutionKind, StorageKind, TransactionStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

const BUILT_IN_COMMENTS: ElementId = ElementId(-1_010_106);
const BUILT_IN_MARK: ElementId = ElementId(-1_001_203);
const MAX_FAILURE_ROUNDS: usize = 32;

/// Posts a failure whenever instances are switched onto `type_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRule {
    pub type_id: ElementId,
    pub severity: FailureSeverity,
    pub description: String,
    #[serde(default)]
    pub resolutions: Vec<ResolutionKind>,
    /// The resolution that actually clears the failure. Other resolutions are
    /// accepted but the host reports the failure again in the next round.
    #[serde(default)]
    pub fixed_by: Option<ResolutionKind>,
}

/// A host call that fails on demand, for exercising degraded paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// `instances(category)` for this category
    CategoryInstances(String),
    /// `instances_of_type(type_id)` for this type
    TypeInstances(ElementId),
    /// `copy_from` whenever the requested ids include this source element
    Copy(ElementId),
    /// `commit_transaction`; the transaction stays open
    Commit,
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Default)]
struct DocumentState {
    families: BTreeMap<ElementId, Family>,
    types: BTreeMap<ElementId, ElementType>,
    instances: BTreeMap<ElementId, Instance>,
    groups: BTreeMap<ElementId, Group>,
    bindings: Vec<ParameterBinding>,
    next_id: i64,
}

impl DocumentState {
    fn allocate(&mut self) -> ElementId {
        let id = ElementId(self.next_id);
        self.next_id += 1;
        id
    }

    fn family_named(&self, category: &str, name: &str) -> Option<&Family> {
        self.families
            .values()
            .find(|f| f.category == category && f.name == name)
    }

    fn type_named(&self, family_id: ElementId, name: &str) -> Option<&ElementType> {
        self.types
            .values()
            .find(|t| t.family_id == family_id && t.name == name)
    }

    fn bound_names(&self, category: &str) -> BTreeSet<String> {
        self.bindings
            .iter()
            .filter(|b| b.instance_binding && b.categories.iter().any(|c| c == category))
            .map(|b| b.name.clone())
            .collect()
    }

    fn contains(&self, id: ElementId) -> bool {
        self.families.contains_key(&id)
            || self.types.contains_key(&id)
            || self.instances.contains_key(&id)
            || self.groups.contains_key(&id)
    }
}

#[derive(Debug, Clone)]
struct PendingFailure {
    message: FailureMessage,
    resolutions: Vec<ResolutionKind>,
    attempted: BTreeSet<ResolutionKind>,
    fixed_by: Option<ResolutionKind>,
}

#[derive(Debug)]
struct OpenTransaction {
    name: String,
    snapshot: DocumentState,
    failures: Vec<PendingFailure>,
    next_failure: u32,
}

/// On-disk shape of a [`MemoryDocument`].
#[derive(Debug, Default, Serialize, Deserialize)]
struct DocumentSnapshot {
    title: String,
    #[serde(default)]
    families: Vec<Family>,
    #[serde(default)]
    types: Vec<ElementType>,
    #[serde(default)]
    instances: Vec<Instance>,
    #[serde(default)]
    groups: Vec<Group>,
    #[serde(default)]
    bindings: Vec<ParameterBinding>,
    #[serde(default)]
    failure_rules: Vec<FailureRule>,
}

// ============================================================================
// MemoryDocument
// ============================================================================

#[derive(Debug)]
pub struct MemoryDocument {
    title: String,
    state: DocumentState,
    failure_rules: Vec<FailureRule>,
    faults: Vec<Fault>,
    transaction: Option<OpenTransaction>,
    committed: usize,
    rolled_back: usize,
}

impl MemoryDocument {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            state: DocumentState {
                next_id: 1,
                ..DocumentState::default()
            },
            failure_rules: Vec::new(),
            faults: Vec::new(),
            transaction: None,
            committed: 0,
            rolled_back: 0,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, DocumentError> {
        let snapshot: DocumentSnapshot = serde_json::from_str(json)?;
        let mut doc = Self::new(&snapshot.title);

        let mut max_id = 0;
        let mut observe = |id: ElementId| max_id = max_id.max(id.0);
        for f in &snapshot.families {
            observe(f.id);
        }
        for t in &snapshot.types {
            observe(t.id);
            t.instance_parameters.iter().for_each(|p| observe(p.id));
        }
        for i in &snapshot.instances {
            observe(i.id);
            i.parameters.iter().for_each(|p| observe(p.id));
        }
        for g in &snapshot.groups {
            observe(g.id);
        }
        for b in &snapshot.bindings {
            observe(b.id);
        }

        doc.state.next_id = max_id + 1;
        doc.state.families = snapshot.families.into_iter().map(|f| (f.id, f)).collect();
        doc.state.types = snapshot.types.into_iter().map(|t| (t.id, t)).collect();
        doc.state.instances = snapshot.instances.into_iter().map(|i| (i.id, i)).collect();
        doc.state.groups = snapshot.groups.into_iter().map(|g| (g.id, g)).collect();
        doc.state.bindings = snapshot.bindings;
        for binding in doc.state.bindings.iter_mut() {
            if binding.id == ElementId::INVALID {
                binding.id = ElementId(doc.state.next_id);
                doc.state.next_id += 1;
            }
        }
        doc.failure_rules = snapshot.failure_rules;
        Ok(doc)
    }

    pub fn to_json_string(&self) -> Result<String, DocumentError> {
        let snapshot = DocumentSnapshot {
            title: self.title.clone(),
            families: self.state.families.values().cloned().collect(),
            types: self.state.types.values().cloned().collect(),
            instances: self.state.instances.values().cloned().collect(),
            groups: self.state.groups.values().cloned().collect(),
            bindings: self.state.bindings.clone(),
            failure_rules: self.failure_rules.clone(),
        };
        Ok(serde_json::to_string_pretty(&snapshot)?)
    }

    pub fn load(path: &Path) -> Result<Self, DocumentError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn save(&self, path: &Path) -> Result<(), DocumentError> {
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }

    pub fn committed_transactions(&self) -> usize {
        self.committed
    }

    pub fn rolled_back_transactions(&self) -> usize {
        self.rolled_back
    }

    // ========================================================================
    // Setup (outside transactions)
    // ========================================================================

    pub fn add_family(&mut self, name: &str, category: &str, kind: FamilyKind) -> ElementId {
        let id = self.state.allocate();
        self.state.families.insert(
            id,
            Family {
                id,
                name: name.to_string(),
                category: category.to_string(),
                kind,
            },
        );
        id
    }

    pub fn add_type(&mut self, family_id: ElementId, name: &str) -> Result<ElementId, DocumentError> {
        self.add_type_with_parameters(family_id, name, Vec::new())
    }

    /// Parameters whose id is [`ElementId::INVALID`] receive a fresh
    /// document-local id.
    pub fn add_type_with_parameters(
        &mut self,
        family_id: ElementId,
        name: &str,
        instance_parameters: Vec<Parameter>,
    ) -> Result<ElementId, DocumentError> {
        let category = self
            .state
            .families
            .get(&family_id)
            .map(|f| f.category.clone())
            .ok_or(DocumentError::NotFound(family_id))?;
        if let Some(existing) = self.state.type_named(family_id, name) {
            return Err(DocumentError::DuplicateName {
                name: name.to_string(),
                existing: existing.id,
            });
        }
        let id = self.state.allocate();
        let instance_parameters: Vec<Parameter> = instance_parameters
            .into_iter()
            .map(|mut p| {
                if p.id == ElementId::INVALID {
                    p.id = self.state.allocate();
                }
                p
            })
            .collect();
        self.state.types.insert(
            id,
            ElementType {
                id,
                name: name.to_string(),
                family_id,
                category,
                instance_parameters,
            },
        );
        Ok(id)
    }

    pub fn add_group(&mut self, name: &str) -> ElementId {
        let id = self.state.allocate();
        self.state.groups.insert(
            id,
            Group {
                id,
                name: name.to_string(),
                members: Vec::new(),
            },
        );
        id
    }

    pub fn place_instance(&mut self, type_id: ElementId) -> Result<ElementId, DocumentError> {
        self.place(type_id, Placement::TopLevel)
    }

    pub fn place_in_group(
        &mut self,
        type_id: ElementId,
        group_id: ElementId,
    ) -> Result<ElementId, DocumentError> {
        if !self.state.groups.contains_key(&group_id) {
            return Err(DocumentError::NotFound(group_id));
        }
        let id = self.place(type_id, Placement::InGroup(group_id))?;
        if let Some(group) = self.state.groups.get_mut(&group_id) {
            group.members.push(id);
        }
        Ok(id)
    }

    pub fn place_nested(
        &mut self,
        type_id: ElementId,
        parent: ElementId,
    ) -> Result<ElementId, DocumentError> {
        if !self.state.instances.contains_key(&parent) {
            return Err(DocumentError::NotFound(parent));
        }
        self.place(type_id, Placement::Nested(parent))
    }

    fn place(&mut self, type_id: ElementId, placement: Placement) -> Result<ElementId, DocumentError> {
        let element_type = self
            .state
            .types
            .get(&type_id)
            .cloned()
            .ok_or(DocumentError::NotFound(type_id))?;
        let mut parameters = vec![
            Parameter::new(BUILT_IN_COMMENTS, "Comments", StorageKind::Text),
            Parameter::new(BUILT_IN_MARK, "Mark", StorageKind::Text),
        ];
        for binding in &self.state.bindings {
            if binding.instance_binding
                && binding.categories.iter().any(|c| *c == element_type.category)
            {
                parameters.push(binding_parameter(binding));
            }
        }
        parameters.extend(element_type.instance_parameters.iter().cloned());

        let id = self.state.allocate();
        self.state.instances.insert(
            id,
            Instance {
                id,
                type_id,
                category: element_type.category,
                placement,
                parameters,
            },
        );
        Ok(id)
    }

    /// Set a parameter value without a transaction (document setup only).
    pub fn preset_parameter(
        &mut self,
        element: ElementId,
        name: &str,
        value: ParamValue,
    ) -> Result<(), DocumentError> {
        self.write_parameter(element, name, value, true)
    }

    pub fn add_binding(&mut self, binding: ParameterBinding) -> Result<ElementId, DocumentError> {
        self.bind(binding)
    }

    pub fn add_failure_rule(&mut self, rule: FailureRule) {
        self.failure_rules.push(rule);
    }

    /// Make a host call fail until [`MemoryDocument::clear_faults`]. Faults
    /// are not saved with the document.
    pub fn inject_fault(&mut self, fault: Fault) {
        self.faults.push(fault);
    }

    pub fn clear_faults(&mut self) {
        self.faults.clear();
    }

    fn check_fault(&self, hit: impl Fn(&Fault) -> bool, call: &str) -> Result<(), DocumentError> {
        match self.faults.iter().find(|f| hit(f)) {
            Some(fault) => Err(DocumentError::Refused(format!("{call} ({fault:?})"))),
            None => Ok(()),
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn require_transaction(&self, operation: &'static str) -> Result<(), DocumentError> {
        if self.transaction.is_none() {
            return Err(DocumentError::NoTransaction(operation));
        }
        Ok(())
    }

    fn write_parameter(
        &mut self,
        element: ElementId,
        name: &str,
        value: ParamValue,
        allow_read_only: bool,
    ) -> Result<(), DocumentError> {
        let instance = self
            .state
            .instances
            .get_mut(&element)
            .ok_or(DocumentError::NotFound(element))?;
        let parameter = instance
            .parameters
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| DocumentError::ParameterNotFound {
                element,
                name: name.to_string(),
            })?;
        if parameter.read_only && !allow_read_only {
            return Err(DocumentError::ReadOnly {
                element,
                name: name.to_string(),
            });
        }
        if parameter.storage != value.kind() {
            return Err(DocumentError::StorageMismatch {
                name: name.to_string(),
                expected: parameter.storage,
                actual: value.kind(),
            });
        }
        parameter.value = Some(value);
        Ok(())
    }

    fn bind(&mut self, mut binding: ParameterBinding) -> Result<ElementId, DocumentError> {
        if let Some(existing) = self.state.bindings.iter().find(|b| b.name == binding.name) {
            return Err(DocumentError::DuplicateName {
                name: binding.name.clone(),
                existing: existing.id,
            });
        }
        binding.id = self.state.allocate();
        if binding.instance_binding {
            for instance in self.state.instances.values_mut() {
                if binding.categories.iter().any(|c| *c == instance.category)
                    && instance.parameter(&binding.name).is_none()
                {
                    instance.parameters.push(binding_parameter(&binding));
                }
            }
        }
        let id = binding.id;
        self.state.bindings.push(binding);
        Ok(id)
    }

    fn delete_cascade(&mut self, ids: &[ElementId]) -> Vec<ElementId> {
        let mut deleted = Vec::new();
        let mut stack: Vec<ElementId> = ids.to_vec();
        while let Some(id) = stack.pop() {
            if self.state.families.remove(&id).is_some() {
                deleted.push(id);
                stack.extend(
                    self.state
                        .types
                        .values()
                        .filter(|t| t.family_id == id)
                        .map(|t| t.id),
                );
            } else if self.state.types.remove(&id).is_some() {
                deleted.push(id);
                stack.extend(
                    self.state
                        .instances
                        .values()
                        .filter(|i| i.type_id == id)
                        .map(|i| i.id),
                );
            } else if self.state.instances.remove(&id).is_some() {
                deleted.push(id);
                stack.extend(
                    self.state
                        .instances
                        .values()
                        .filter(|i| i.placement == Placement::Nested(id))
                        .map(|i| i.id),
                );
                for group in self.state.groups.values_mut() {
                    group.members.retain(|m| *m != id);
                }
            } else if let Some(group) = self.state.groups.remove(&id) {
                deleted.push(id);
                stack.extend(group.members);
            }
        }
        deleted
    }

    fn copy_all(
        &mut self,
        source: &dyn DocumentRead,
        ids: &[ElementId],
        policy: DuplicateNamePolicy,
        copied: &mut BTreeMap<ElementId, ElementId>,
    ) -> Result<(), DocumentError> {
        for &id in ids {
            if let Some(family) = source.family(id)? {
                self.copy_family(source, &family, policy, copied)?;
            } else if let Some(element_type) = source.element_type(id)? {
                self.copy_type(source, &element_type, policy, copied)?;
            } else {
                return Err(DocumentError::NotFound(id));
            }
        }
        Ok(())
    }

    fn copy_family(
        &mut self,
        source: &dyn DocumentRead,
        family: &Family,
        policy: DuplicateNamePolicy,
        copied: &mut BTreeMap<ElementId, ElementId>,
    ) -> Result<(), DocumentError> {
        let destination = match self.state.family_named(&family.category, &family.name) {
            Some(existing) if policy == DuplicateNamePolicy::Abort => {
                return Err(DocumentError::DuplicateName {
                    name: family.name.clone(),
                    existing: existing.id,
                });
            }
            Some(existing) => existing.id,
            None => self.add_family(&family.name, &family.category, family.kind),
        };
        copied.insert(family.id, destination);

        let types: Vec<ElementType> = source
            .element_types(&family.category)?
            .into_iter()
            .filter(|t| t.family_id == family.id)
            .collect();
        for element_type in &types {
            self.copy_type_into(destination, element_type, policy, copied)?;
        }
        Ok(())
    }

    fn copy_type(
        &mut self,
        source: &dyn DocumentRead,
        element_type: &ElementType,
        policy: DuplicateNamePolicy,
        copied: &mut BTreeMap<ElementId, ElementId>,
    ) -> Result<(), DocumentError> {
        let family = source
            .family(element_type.family_id)?
            .ok_or(DocumentError::NotFound(element_type.family_id))?;
        // Types always land in the same-named family, which may pre-exist.
        let destination = match self.state.family_named(&family.category, &family.name) {
            Some(existing) => existing.id,
            None => self.add_family(&family.name, &family.category, family.kind),
        };
        copied.entry(family.id).or_insert(destination);
        self.copy_type_into(destination, element_type, policy, copied)
    }

    fn copy_type_into(
        &mut self,
        family_id: ElementId,
        element_type: &ElementType,
        policy: DuplicateNamePolicy,
        copied: &mut BTreeMap<ElementId, ElementId>,
    ) -> Result<(), DocumentError> {
        if let Some(existing) = self.state.type_named(family_id, &element_type.name) {
            if policy == DuplicateNamePolicy::Abort {
                return Err(DocumentError::DuplicateName {
                    name: element_type.name.clone(),
                    existing: existing.id,
                });
            }
            copied.insert(element_type.id, existing.id);
            return Ok(());
        }
        let parameters = element_type
            .instance_parameters
            .iter()
            .cloned()
            .map(|mut p| {
                if !p.is_built_in() {
                    p.id = ElementId::INVALID;
                }
                p
            })
            .collect();
        let id = self.add_type_with_parameters(family_id, &element_type.name, parameters)?;
        copied.insert(element_type.id, id);
        Ok(())
    }

    fn retyped_parameters(&self, instance: &Instance, new_type: &ElementType) -> Vec<Parameter> {
        let bound = self.state.bound_names(&instance.category);
        let mut parameters: Vec<Parameter> = instance
            .parameters
            .iter()
            .filter(|p| p.is_built_in() || bound.contains(&p.name))
            .cloned()
            .collect();
        for definition in &new_type.instance_parameters {
            if !parameters.iter().any(|p| p.name == definition.name) {
                parameters.push(definition.clone());
            }
        }
        parameters
    }

    fn post_failures(&mut self, new_type: ElementId, elements: &[ElementId]) {
        let rules: Vec<FailureRule> = self
            .failure_rules
            .iter()
            .filter(|r| r.type_id == new_type)
            .cloned()
            .collect();
        let Some(tx) = self.transaction.as_mut() else {
            return;
        };
        for rule in rules {
            let id = FailureId(tx.next_failure);
            tx.next_failure += 1;
            tx.failures.push(PendingFailure {
                message: FailureMessage {
                    id,
                    severity: rule.severity,
                    description: rule.description,
                    elements: elements.to_vec(),
                },
                resolutions: rule.resolutions,
                attempted: BTreeSet::new(),
                fixed_by: rule.fixed_by,
            });
        }
    }

    fn finish_rollback(&mut self, tx: OpenTransaction) -> TransactionStatus {
        tracing::debug!(transaction = %tx.name, "rolling back");
        self.state = tx.snapshot;
        self.rolled_back += 1;
        TransactionStatus::RolledBack
    }
}

fn binding_parameter(binding: &ParameterBinding) -> Parameter {
    Parameter {
        id: binding.id,
        name: binding.name.clone(),
        guid: binding.guid,
        storage: binding.storage,
        read_only: false,
        value: None,
    }
}

// ============================================================================
// Failure rounds
// ============================================================================

enum Decision {
    Resolve(FailureId, ResolutionKind),
    Dismiss(FailureId),
}

struct RoundAccessor<'a> {
    name: &'a str,
    failures: &'a [PendingFailure],
    decisions: Vec<Decision>,
}

impl RoundAccessor<'_> {
    fn find(&self, id: FailureId) -> Result<&PendingFailure, DocumentError> {
        self.failures
            .iter()
            .find(|f| f.message.id == id)
            .ok_or(DocumentError::UnknownFailure(id.0))
    }
}

impl FailuresAccessor for RoundAccessor<'_> {
    fn transaction_name(&self) -> &str {
        self.name
    }

    fn failures(&self) -> Vec<FailureMessage> {
        self.failures.iter().map(|f| f.message.clone()).collect()
    }

    fn untried_resolutions(&self, id: FailureId) -> Result<Vec<ResolutionKind>, DocumentError> {
        let failure = self.find(id)?;
        Ok(failure
            .resolutions
            .iter()
            .copied()
            .filter(|k| !failure.attempted.contains(k))
            .collect())
    }

    fn resolve(&mut self, id: FailureId, kind: ResolutionKind) -> Result<(), DocumentError> {
        let failure = self.find(id)?;
        if !failure.resolutions.contains(&kind) {
            return Err(DocumentError::NotPermitted(format!(
                "{kind:?} is not a resolution of failure {id}"
            )));
        }
        self.decisions.push(Decision::Resolve(id, kind));
        Ok(())
    }

    fn dismiss(&mut self, id: FailureId) -> Result<(), DocumentError> {
        self.find(id)?;
        self.decisions.push(Decision::Dismiss(id));
        Ok(())
    }
}

// ============================================================================
// Trait implementations
// ============================================================================

impl DocumentRead for MemoryDocument {
    fn title(&self) -> &str {
        &self.title
    }

    fn families(&self, category: &str) -> Result<Vec<Family>, DocumentError> {
        Ok(self
            .state
            .families
            .values()
            .filter(|f| f.category == category)
            .cloned()
            .collect())
    }

    fn family(&self, id: ElementId) -> Result<Option<Family>, DocumentError> {
        Ok(self.state.families.get(&id).cloned())
    }

    fn element_types(&self, category: &str) -> Result<Vec<ElementType>, DocumentError> {
        Ok(self
            .state
            .types
            .values()
            .filter(|t| t.category == category)
            .cloned()
            .collect())
    }

    fn element_type(&self, id: ElementId) -> Result<Option<ElementType>, DocumentError> {
        Ok(self.state.types.get(&id).cloned())
    }

    fn instances(&self, category: &str) -> Result<Vec<Instance>, DocumentError> {
        self.check_fault(
            |f| matches!(f, Fault::CategoryInstances(c) if c == category),
            "instances",
        )?;
        Ok(self
            .state
            .instances
            .values()
            .filter(|i| i.category == category)
            .cloned()
            .collect())
    }

    fn instances_of_type(&self, type_id: ElementId) -> Result<Vec<Instance>, DocumentError> {
        self.check_fault(
            |f| matches!(f, Fault::TypeInstances(t) if *t == type_id),
            "instances_of_type",
        )?;
        Ok(self
            .state
            .instances
            .values()
            .filter(|i| i.type_id == type_id)
            .cloned()
            .collect())
    }

    fn instance(&self, id: ElementId) -> Result<Option<Instance>, DocumentError> {
        Ok(self.state.instances.get(&id).cloned())
    }

    fn all_instances(&self) -> Result<Vec<Instance>, DocumentError> {
        Ok(self.state.instances.values().cloned().collect())
    }

    fn groups(&self) -> Result<Vec<Group>, DocumentError> {
        Ok(self.state.groups.values().cloned().collect())
    }

    fn parameter_bindings(&self) -> Result<Vec<ParameterBinding>, DocumentError> {
        Ok(self.state.bindings.clone())
    }
}

impl Document for MemoryDocument {
    fn begin_transaction(&mut self, name: &str) -> Result<(), DocumentError> {
        if let Some(open) = &self.transaction {
            return Err(DocumentError::TransactionAlreadyOpen(open.name.clone()));
        }
        self.transaction = Some(OpenTransaction {
            name: name.to_string(),
            snapshot: self.state.clone(),
            failures: Vec::new(),
            next_failure: 1,
        });
        Ok(())
    }

    fn commit_transaction(
        &mut self,
        preprocessor: &mut dyn FailuresPreprocessor,
    ) -> Result<TransactionStatus, DocumentError> {
        if self.transaction.is_none() {
            return Err(DocumentError::NoTransaction("commit"));
        }
        self.check_fault(|f| matches!(f, Fault::Commit), "commit")?;
        let mut tx = self
            .transaction
            .take()
            .ok_or(DocumentError::NoTransaction("commit"))?;

        for _ in 0..MAX_FAILURE_ROUNDS {
            if tx.failures.is_empty() {
                self.committed += 1;
                return Ok(TransactionStatus::Committed);
            }

            let (verdict, decisions) = {
                let mut accessor = RoundAccessor {
                    name: &tx.name,
                    failures: &tx.failures,
                    decisions: Vec::new(),
                };
                let verdict = preprocessor.preprocess(&mut accessor);
                (verdict, accessor.decisions)
            };
            if verdict == FailureProcessingResult::ProceedWithRollback {
                return Ok(self.finish_rollback(tx));
            }

            let mut touched = BTreeSet::new();
            let mut progressed = false;
            for decision in decisions {
                match decision {
                    Decision::Dismiss(id) => {
                        touched.insert(id);
                        if let Some(pos) = tx.failures.iter().position(|f| f.message.id == id) {
                            tx.failures.remove(pos);
                            progressed = true;
                        }
                    }
                    Decision::Resolve(id, kind) => {
                        touched.insert(id);
                        let Some(pos) = tx.failures.iter().position(|f| f.message.id == id) else {
                            continue;
                        };
                        progressed = true;
                        if tx.failures[pos].fixed_by == Some(kind) {
                            let fixed = tx.failures.remove(pos);
                            if kind == ResolutionKind::DeleteElements {
                                self.delete_cascade(&fixed.message.elements);
                            }
                        } else {
                            tx.failures[pos].attempted.insert(kind);
                        }
                    }
                }
            }

            // Untouched warnings are accepted as-is; untouched errors block the commit.
            let before = tx.failures.len();
            tx.failures.retain(|f| {
                touched.contains(&f.message.id) || f.message.severity == FailureSeverity::Error
            });
            progressed |= tx.failures.len() != before;

            let blocked = tx.failures.iter().any(|f| {
                f.message.severity == FailureSeverity::Error && !touched.contains(&f.message.id)
            });
            if blocked || !progressed {
                return Ok(self.finish_rollback(tx));
            }
        }

        Ok(self.finish_rollback(tx))
    }

    fn rollback_transaction(&mut self) -> Result<(), DocumentError> {
        let tx = self
            .transaction
            .take()
            .ok_or(DocumentError::NoTransaction("rollback"))?;
        self.finish_rollback(tx);
        Ok(())
    }

    fn has_open_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    fn rename_family(&mut self, id: ElementId, new_name: &str) -> Result<(), DocumentError> {
        self.require_transaction("rename_family")?;
        let family = self
            .state
            .families
            .get(&id)
            .ok_or(DocumentError::NotFound(id))?;
        if family.kind == FamilyKind::System {
            return Err(DocumentError::NotPermitted(format!(
                "system family '{}' cannot be renamed",
                family.name
            )));
        }
        if let Some(existing) = self.state.family_named(&family.category, new_name) {
            if existing.id != id {
                return Err(DocumentError::DuplicateName {
                    name: new_name.to_string(),
                    existing: existing.id,
                });
            }
        }
        if let Some(family) = self.state.families.get_mut(&id) {
            family.name = new_name.to_string();
        }
        Ok(())
    }

    fn rename_type(&mut self, id: ElementId, new_name: &str) -> Result<(), DocumentError> {
        self.require_transaction("rename_type")?;
        let element_type = self.state.types.get(&id).ok_or(DocumentError::NotFound(id))?;
        if let Some(existing) = self.state.type_named(element_type.family_id, new_name) {
            if existing.id != id {
                return Err(DocumentError::DuplicateName {
                    name: new_name.to_string(),
                    existing: existing.id,
                });
            }
        }
        if let Some(element_type) = self.state.types.get_mut(&id) {
            element_type.name = new_name.to_string();
        }
        Ok(())
    }

    fn copy_from(
        &mut self,
        source: &dyn DocumentRead,
        ids: &[ElementId],
        policy: DuplicateNamePolicy,
    ) -> Result<BTreeMap<ElementId, ElementId>, DocumentError> {
        self.require_transaction("copy_from")?;
        self.check_fault(|f| matches!(f, Fault::Copy(id) if ids.contains(id)), "copy_from")?;
        let backup = self.state.clone();
        let mut copied = BTreeMap::new();
        match self.copy_all(source, ids, policy, &mut copied) {
            Ok(()) => Ok(copied),
            Err(err) => {
                self.state = backup;
                Err(err)
            }
        }
    }

    fn change_type_bulk(
        &mut self,
        instance_ids: &[ElementId],
        new_type: ElementId,
    ) -> Result<(), DocumentError> {
        self.require_transaction("change_type_bulk")?;
        let target = self
            .state
            .types
            .get(&new_type)
            .cloned()
            .ok_or(DocumentError::NotFound(new_type))?;

        for &id in instance_ids {
            let instance = self
                .state
                .instances
                .get(&id)
                .ok_or(DocumentError::NotFound(id))?;
            if !instance.placement.is_top_level() {
                return Err(DocumentError::NotTopLevel(id));
            }
            if instance.category != target.category {
                return Err(DocumentError::CategoryMismatch {
                    element: id,
                    expected: target.category.clone(),
                    actual: instance.category.clone(),
                });
            }
        }

        for &id in instance_ids {
            let Some(instance) = self.state.instances.get(&id) else {
                continue;
            };
            let parameters = self.retyped_parameters(instance, &target);
            if let Some(instance) = self.state.instances.get_mut(&id) {
                instance.type_id = new_type;
                instance.parameters = parameters;
            }
        }
        self.post_failures(new_type, instance_ids);
        Ok(())
    }

    fn delete(&mut self, ids: &[ElementId]) -> Result<Vec<ElementId>, DocumentError> {
        self.require_transaction("delete")?;
        for &id in ids {
            if !self.state.contains(id) {
                return Err(DocumentError::NotFound(id));
            }
            if let Some(family) = self.state.families.get(&id) {
                if family.kind == FamilyKind::System {
                    return Err(DocumentError::NotPermitted(format!(
                        "system family '{}' cannot be deleted",
                        family.name
                    )));
                }
            }
        }
        Ok(self.delete_cascade(ids))
    }

    fn ungroup(&mut self, group_id: ElementId) -> Result<Vec<ElementId>, DocumentError> {
        self.require_transaction("ungroup")?;
        let group = self
            .state
            .groups
            .remove(&group_id)
            .ok_or(DocumentError::NotFound(group_id))?;
        for member in &group.members {
            if let Some(instance) = self.state.instances.get_mut(member) {
                instance.placement = Placement::TopLevel;
            }
        }
        Ok(group.members)
    }

    fn set_parameter(
        &mut self,
        element: ElementId,
        name: &str,
        value: ParamValue,
    ) -> Result<(), DocumentError> {
        self.require_transaction("set_parameter")?;
        self.write_parameter(element, name, value, false)
    }

    fn add_parameter_binding(
        &mut self,
        binding: ParameterBinding,
    ) -> Result<ElementId, DocumentError> {
        self.require_transaction("add_parameter_binding")?;
        self.bind(binding)
    }

    fn remove_parameter_binding(&mut self, name: &str) -> Result<(), DocumentError> {
        self.require_transaction("remove_parameter_binding")?;
        let pos = self
            .state
            .bindings
            .iter()
            .position(|b| b.name == name)
            .ok_or_else(|| DocumentError::ParameterNotFound {
                element: ElementId::INVALID,
                name: name.to_string(),
            })?;
        let binding = self.state.bindings.remove(pos);
        for instance in self.state.instances.values_mut() {
            instance.parameters.retain(|p| p.id != binding.id);
        }
        Ok(())
    }
}
