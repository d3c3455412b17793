//! Entity data model types
//!
//! These are the resolved, immutable shapes produced by the resolver. Every
//! type name stored here is namespace-qualified with aliases already expanded.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// EDM primitive types
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveType {
    Binary,
    Boolean,
    Byte,
    Date,
    /// `Edm.DateTime`, OData 3.0 only
    DateTime,
    DateTimeOffset,
    Decimal,
    Double,
    /// `Edm.Duration` (V4) or `Edm.Time` (V3)
    Duration,
    Guid,
    Int16,
    Int32,
    Int64,
    SByte,
    Single,
    Stream,
    String,
    TimeOfDay,
    /// Geography/geometry types, carried through without interpretation
    Spatial(String),
}

impl PrimitiveType {
    /// Parse a qualified primitive name such as `Edm.Int32`
    pub fn from_edm_name(name: &str) -> Option<Self> {
        let short = name.strip_prefix("Edm.")?;
        let primitive = match short {
            "Binary" => Self::Binary,
            "Boolean" => Self::Boolean,
            "Byte" => Self::Byte,
            "Date" => Self::Date,
            "DateTime" => Self::DateTime,
            "DateTimeOffset" => Self::DateTimeOffset,
            "Decimal" => Self::Decimal,
            "Double" => Self::Double,
            "Duration" | "Time" => Self::Duration,
            "Guid" => Self::Guid,
            "Int16" => Self::Int16,
            "Int32" => Self::Int32,
            "Int64" => Self::Int64,
            "SByte" => Self::SByte,
            "Single" => Self::Single,
            "Stream" => Self::Stream,
            "String" => Self::String,
            "TimeOfDay" => Self::TimeOfDay,
            s if s.starts_with("Geography") || s.starts_with("Geometry") => {
                Self::Spatial(s.to_string())
            }
            _ => return None,
        };
        Some(primitive)
    }

    /// Name without the `Edm.` prefix
    pub fn short_name(&self) -> &str {
        match self {
            Self::Binary => "Binary",
            Self::Boolean => "Boolean",
            Self::Byte => "Byte",
            Self::Date => "Date",
            Self::DateTime => "DateTime",
            Self::DateTimeOffset => "DateTimeOffset",
            Self::Decimal => "Decimal",
            Self::Double => "Double",
            Self::Duration => "Duration",
            Self::Guid => "Guid",
            Self::Int16 => "Int16",
            Self::Int32 => "Int32",
            Self::Int64 => "Int64",
            Self::SByte => "SByte",
            Self::Single => "Single",
            Self::Stream => "Stream",
            Self::String => "String",
            Self::TimeOfDay => "TimeOfDay",
            Self::Spatial(name) => name,
        }
    }

    pub fn edm_name(&self) -> String {
        format!("Edm.{}", self.short_name())
    }

    /// Whether the type can appear in a key
    pub fn is_key_eligible(&self) -> bool {
        !matches!(self, Self::Stream | Self::Spatial(_) | Self::Double | Self::Single | Self::Binary)
    }
}

/// Resolved reference to any type usable by a property, parameter or return value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeRef {
    Primitive(PrimitiveType),
    Complex(String),
    Enum(String),
    Entity(String),
    Collection(Box<TypeRef>),
}

impl TypeRef {
    pub fn is_collection(&self) -> bool {
        matches!(self, Self::Collection(_))
    }

    /// Element type for collections, the type itself otherwise
    pub fn element(&self) -> &TypeRef {
        match self {
            Self::Collection(inner) => inner.element(),
            other => other,
        }
    }

    /// Qualified name as written in metadata documents
    pub fn type_name(&self) -> String {
        match self {
            Self::Primitive(p) => p.edm_name(),
            Self::Complex(name) | Self::Enum(name) | Self::Entity(name) => name.clone(),
            Self::Collection(inner) => format!("Collection({})", inner.type_name()),
        }
    }
}

/// A structural property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub type_ref: TypeRef,
    pub nullable: bool,
    pub max_length: Option<u32>,
    /// Total digits for decimals, fractional-second digits for temporal types
    pub precision: Option<u32>,
    /// Fractional digits for decimals; `None` also covers `Scale="variable"`
    pub scale: Option<u32>,
    /// Participates in optimistic concurrency (`ConcurrencyMode="Fixed"`)
    pub concurrency_token: bool,
    pub default_value: Option<String>,
}

/// Cardinality of a navigation property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    One,
    Many,
}

/// A relationship to another entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationProperty {
    pub name: String,
    /// Qualified name of the target entity type
    pub target: String,
    pub cardinality: Cardinality,
    pub nullable: bool,
    /// Navigation property on the target pointing back along the same relationship
    pub partner: Option<String>,
    pub contains_target: bool,
}

impl NavigationProperty {
    pub fn is_collection(&self) -> bool {
        self.cardinality == Cardinality::Many
    }
}

/// An entity type with inherited members already flattened in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityType {
    pub name: String,
    pub namespace: String,
    pub base_type: Option<String>,
    pub is_abstract: bool,
    pub is_open: bool,
    pub has_stream: bool,
    /// Base type properties first, then declared ones, in document order
    pub properties: Vec<Property>,
    /// Key property names in declared order
    pub key: Vec<String>,
    pub navigation_properties: Vec<NavigationProperty>,
}

impl EntityType {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn navigation(&self, name: &str) -> Option<&NavigationProperty> {
        self.navigation_properties.iter().find(|n| n.name == name)
    }

    /// Key properties in declared key order
    pub fn key_properties(&self) -> Vec<&Property> {
        self.key
            .iter()
            .filter_map(|name| self.property(name))
            .collect()
    }

    pub fn is_key(&self, name: &str) -> bool {
        self.key.iter().any(|k| k == name)
    }

    pub fn concurrency_properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter().filter(|p| p.concurrency_token)
    }
}

/// A complex (structured, keyless) type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexType {
    pub name: String,
    pub namespace: String,
    pub base_type: Option<String>,
    pub is_abstract: bool,
    pub is_open: bool,
    pub properties: Vec<Property>,
}

impl ComplexType {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumMember {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumType {
    pub name: String,
    pub namespace: String,
    pub underlying: PrimitiveType,
    pub is_flags: bool,
    pub members: Vec<EnumMember>,
}

impl EnumType {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    pub fn member(&self, name: &str) -> Option<&EnumMember> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Accepts a member name, a numeric value, or a comma-separated flags list
    pub fn accepts(&self, text: &str) -> bool {
        let parts: Vec<&str> = text.split(',').map(str::trim).collect();
        if parts.len() > 1 && !self.is_flags {
            return false;
        }
        parts.iter().all(|part| {
            self.member(part).is_some()
                || part
                    .parse::<i64>()
                    .map(|v| self.members.iter().any(|m| m.value == v) || self.is_flags)
                    .unwrap_or(false)
        })
    }
}

/// An entity set bound to an entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySet {
    pub name: String,
    pub entity_type: String,
    pub container: String,
    /// Navigation path -> target entity set or singleton name
    pub navigation_bindings: IndexMap<String, String>,
}

/// A single, container-level entity instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Singleton {
    pub name: String,
    pub entity_type: String,
    pub container: String,
    pub navigation_bindings: IndexMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Side-effect free, invoked with GET
    Function,
    /// May have side effects, invoked with POST
    Action,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub type_ref: TypeRef,
    pub nullable: bool,
}

/// A function or action declared in a schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    pub namespace: String,
    pub kind: OperationKind,
    pub is_bound: bool,
    /// For bound operations the first parameter is the binding parameter
    pub parameters: Vec<Parameter>,
    pub return_type: Option<TypeRef>,
}

impl Operation {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    /// Type the operation is bound to, if any
    pub fn binding_type(&self) -> Option<&TypeRef> {
        if self.is_bound {
            self.parameters.first().map(|p| &p.type_ref)
        } else {
            None
        }
    }
}

/// Container-level entry point for an unbound function or action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationImport {
    pub name: String,
    pub container: String,
    pub kind: OperationKind,
    /// Qualified name of the imported operation (V4); `None` for V3 imports
    pub operation: Option<String>,
    pub parameters: Vec<Parameter>,
    pub return_type: Option<TypeRef>,
    /// Entity set holding returned entities
    pub entity_set: Option<String>,
}

/// Entity container with its sets, singletons and operation imports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityContainer {
    pub name: String,
    pub namespace: String,
    pub is_default: bool,
    pub entity_sets: IndexMap<String, EntitySet>,
    pub singletons: IndexMap<String, Singleton>,
    pub operation_imports: IndexMap<String, OperationImport>,
}

impl EntityContainer {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}

/// Namespace and alias of one schema in the document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub namespace: String,
    pub alias: Option<String>,
}
