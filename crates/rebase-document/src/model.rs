//! Element model shared by every host implementation.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Host-document-scoped element identifier.
///
/// Positive values are document-local elements, negative values are built-in
/// definitions supplied by the host itself. Identifiers are never portable
/// across documents.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ElementId(pub i64);

impl ElementId {
    pub const INVALID: ElementId = ElementId(-1);

    pub fn value(self) -> i64 {
        self.0
    }

    /// True for document-local elements (as opposed to built-in definitions).
    pub fn is_document_local(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ElementId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

// ============================================================================
// Catalog elements
// ============================================================================

/// Whether a family is loaded from an external definition or built into the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FamilyKind {
    /// User content: can be renamed, copied and deleted as a unit
    Loadable,
    /// Host-defined (walls, floors, ...): only its types are editable
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Family {
    pub id: ElementId,
    pub name: String,
    pub category: String,
    pub kind: FamilyKind,
}

/// A concrete type inside a family. Placed instances reference exactly one type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementType {
    pub id: ElementId,
    pub name: String,
    pub family_id: ElementId,
    pub category: String,
    /// Instance parameters (with defaults) that this type stamps onto its instances
    #[serde(default)]
    pub instance_parameters: Vec<Parameter>,
}

/// Where an instance sits in the document hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "parent")]
pub enum Placement {
    TopLevel,
    InGroup(ElementId),
    /// Nested inside another placed instance
    Nested(ElementId),
}

impl Placement {
    pub fn is_top_level(self) -> bool {
        matches!(self, Placement::TopLevel)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: ElementId,
    pub type_id: ElementId,
    pub category: String,
    pub placement: Placement,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

impl Instance {
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: ElementId,
    pub name: String,
    pub members: Vec<ElementId>,
}

// ============================================================================
// Parameters
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    Real,
    Integer,
    Text,
    Reference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum ParamValue {
    Real(f64),
    Integer(i64),
    Text(String),
    Reference(ElementId),
}

impl ParamValue {
    pub fn kind(&self) -> StorageKind {
        match self {
            ParamValue::Real(_) => StorageKind::Real,
            ParamValue::Integer(_) => StorageKind::Integer,
            ParamValue::Text(_) => StorageKind::Text,
            ParamValue::Reference(_) => StorageKind::Reference,
        }
    }

    /// Whether the value carries user content (empty text and invalid
    /// references count as unset).
    pub fn is_meaningful(&self) -> bool {
        match self {
            ParamValue::Text(s) => !s.is_empty(),
            ParamValue::Reference(id) => *id != ElementId::INVALID,
            ParamValue::Real(_) | ParamValue::Integer(_) => true,
        }
    }
}

/// A parameter as attached to one element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Negative for built-in definitions
    pub id: ElementId,
    pub name: String,
    /// Present for shared (cross-document) definitions
    #[serde(default)]
    pub guid: Option<Uuid>,
    pub storage: StorageKind,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub value: Option<ParamValue>,
}

impl Parameter {
    pub fn new(id: ElementId, name: &str, storage: StorageKind) -> Self {
        Self {
            id,
            name: name.to_string(),
            guid: None,
            storage,
            read_only: false,
            value: None,
        }
    }

    pub fn shared(mut self, guid: Uuid) -> Self {
        self.guid = Some(guid);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn with_value(mut self, value: ParamValue) -> Self {
        self.value = Some(value);
        self
    }

    pub fn is_shared(&self) -> bool {
        self.guid.is_some()
    }

    pub fn is_built_in(&self) -> bool {
        self.id.0 < 0
    }
}

/// A project parameter definition bound to one or more categories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterBinding {
    #[serde(default = "invalid_id")]
    pub id: ElementId,
    pub name: String,
    #[serde(default)]
    pub guid: Option<Uuid>,
    pub storage: StorageKind,
    pub categories: Vec<String>,
    #[serde(default = "default_true")]
    pub instance_binding: bool,
}

fn invalid_id() -> ElementId {
    ElementId::INVALID
}

fn default_true() -> bool {
    true
}

/// How `copy_from` treats incoming names that already exist in the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplicateNamePolicy {
    /// Reuse the destination's element of the same name
    UseDestination,
    /// Fail the copy
    Abort,
}
