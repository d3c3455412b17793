//! Resource paths
//!
//! A [`ResourcePath`] is a list of segments rooted at an entity set,
//! singleton, operation import or batch content id. Resolution walks the
//! segments against the model and yields the rendered path together with
//! what it addresses.

use crate::api::codec::EntityKey;
use crate::api::constants::ODataVersion;
use crate::api::error::RequestError;
use crate::api::metadata::{MetadataModel, OperationKind, Parameter, PrimitiveType, TypeRef};

use super::key::{key_predicate, literal};

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    EntitySet(String),
    Singleton(String),
    /// `$n`, the result of change `n` earlier in the same change set
    ContentId(String),
    OperationImport(String),
    Key(EntityKey),
    Navigation(String),
    Property(String),
    /// Operation bound to the addressed entity or collection
    BoundOperation(String),
    Count,
    RawValue,
    Ref,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResourcePath {
    segments: Vec<Segment>,
}

impl ResourcePath {
    pub fn entity_set(name: impl Into<String>) -> Self {
        Self {
            segments: vec![Segment::EntitySet(name.into())],
        }
    }

    pub fn singleton(name: impl Into<String>) -> Self {
        Self {
            segments: vec![Segment::Singleton(name.into())],
        }
    }

    /// Path rooted at a change-set content id, with or without the `$`
    pub fn content_id(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            segments: vec![Segment::ContentId(id.trim_start_matches('$').to_string())],
        }
    }

    pub fn operation_import(name: impl Into<String>) -> Self {
        Self {
            segments: vec![Segment::OperationImport(name.into())],
        }
    }

    /// Entity of `entity_set` addressed by key
    pub fn entity(entity_set: impl Into<String>, key: EntityKey) -> Self {
        Self::entity_set(entity_set).key(key)
    }

    pub fn key(mut self, key: EntityKey) -> Self {
        self.segments.push(Segment::Key(key));
        self
    }

    pub fn navigate(mut self, navigation: impl Into<String>) -> Self {
        self.segments.push(Segment::Navigation(navigation.into()));
        self
    }

    pub fn property(mut self, name: impl Into<String>) -> Self {
        self.segments.push(Segment::Property(name.into()));
        self
    }

    pub fn operation(mut self, qualified_name: impl Into<String>) -> Self {
        self.segments.push(Segment::BoundOperation(qualified_name.into()));
        self
    }

    pub fn count(mut self) -> Self {
        self.segments.push(Segment::Count);
        self
    }

    pub fn raw_value(mut self) -> Self {
        self.segments.push(Segment::RawValue);
        self
    }

    pub fn reference(mut self) -> Self {
        self.segments.push(Segment::Ref);
        self
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Content id at the root, if any
    pub fn root_content_id(&self) -> Option<&str> {
        match self.segments.first() {
            Some(Segment::ContentId(id)) => Some(id),
            _ => None,
        }
    }

    pub fn resolve(&self, model: &MetadataModel, version: ODataVersion) -> Result<ResolvedPath, RequestError> {
        let mut segments = self.segments.iter();
        let root = segments
            .next()
            .ok_or_else(|| RequestError::InvalidPath("empty resource path".to_string()))?;

        let (mut rendered, mut target) = match root {
            Segment::EntitySet(name) => {
                let set = model
                    .resolve_entity_set(name)
                    .ok_or_else(|| RequestError::UnknownResource(name.clone()))?;
                (
                    set.name.clone(),
                    Target::Collection {
                        entity_type: set.entity_type.clone(),
                        entity_set: Some(set.name.clone()),
                    },
                )
            }
            Segment::Singleton(name) => {
                let singleton = model
                    .resolve_singleton(name)
                    .ok_or_else(|| RequestError::UnknownResource(name.clone()))?;
                (
                    singleton.name.clone(),
                    Target::Entity {
                        entity_type: singleton.entity_type.clone(),
                        entity_set: None,
                    },
                )
            }
            Segment::ContentId(id) => (format!("${}", id), Target::Opaque),
            Segment::OperationImport(name) => {
                let import = model
                    .resolve_operation_import(name)
                    .ok_or_else(|| RequestError::UnknownResource(name.clone()))?;
                (
                    import.name.clone(),
                    Target::Operation {
                        kind: import.kind,
                        parameters: import.parameters.clone(),
                        return_type: import.return_type.clone(),
                        entity_set: import.entity_set.clone(),
                    },
                )
            }
            other => {
                return Err(RequestError::InvalidPath(format!(
                    "{:?} cannot start a resource path",
                    other
                )));
            }
        };

        for segment in segments {
            target = match (segment, target) {
                (Segment::Key(key), Target::Collection { entity_type, entity_set }) => {
                    rendered.push_str(&key_predicate(model, &entity_type, key, version)?);
                    Target::Entity { entity_type, entity_set }
                }
                (Segment::Navigation(name), Target::Entity { entity_type, entity_set }) => {
                    let nav = model
                        .resolve_entity_type(&entity_type)
                        .and_then(|t| t.navigation(name))
                        .ok_or_else(|| RequestError::UnknownNavigation {
                            entity_type: entity_type.clone(),
                            segment: name.clone(),
                        })?;
                    rendered.push('/');
                    rendered.push_str(name);
                    let entity_set = entity_set
                        .as_deref()
                        .and_then(|set| model.navigation_target_set(set, name))
                        .map(|set| set.name.clone());
                    if nav.is_collection() {
                        Target::Collection {
                            entity_type: nav.target.clone(),
                            entity_set,
                        }
                    } else {
                        Target::Entity {
                            entity_type: nav.target.clone(),
                            entity_set,
                        }
                    }
                }
                (Segment::Property(name), Target::Entity { entity_type, .. }) => {
                    let property = model.entity_property(&entity_type, name).ok_or_else(|| {
                        RequestError::InvalidPath(format!(
                            "'{}' is not a property of '{}'",
                            name, entity_type
                        ))
                    })?;
                    rendered.push('/');
                    rendered.push_str(name);
                    Target::Property(property.type_ref.clone())
                }
                (Segment::Property(name), Target::Property(TypeRef::Complex(complex))) => {
                    let property = model
                        .resolve_complex_type(&complex)
                        .and_then(|t| t.property(name))
                        .ok_or_else(|| {
                            RequestError::InvalidPath(format!("'{}' is not a property of '{}'", name, complex))
                        })?;
                    rendered.push('/');
                    rendered.push_str(name);
                    Target::Property(property.type_ref.clone())
                }
                (Segment::BoundOperation(name), Target::Entity { entity_type, .. }) => {
                    bound_operation(model, name, &entity_type, false, &mut rendered)?
                }
                (Segment::BoundOperation(name), Target::Collection { entity_type, .. }) => {
                    bound_operation(model, name, &entity_type, true, &mut rendered)?
                }
                (Segment::Count, Target::Collection { .. })
                | (Segment::Count, Target::Property(TypeRef::Collection(_))) => {
                    rendered.push_str("/$count");
                    Target::Count
                }
                (Segment::RawValue, Target::Property(TypeRef::Primitive(primitive))) => {
                    rendered.push_str("/$value");
                    Target::RawValue(primitive)
                }
                (Segment::RawValue, Target::Property(TypeRef::Enum(_))) => {
                    rendered.push_str("/$value");
                    Target::RawValue(PrimitiveType::String)
                }
                (Segment::RawValue, Target::Entity { entity_type, .. })
                    if model.resolve_entity_type(&entity_type).is_some_and(|t| t.has_stream) =>
                {
                    rendered.push_str("/$value");
                    Target::RawValue(PrimitiveType::Stream)
                }
                (Segment::Ref, Target::Entity { .. } | Target::Collection { .. }) => {
                    rendered = reference_path(&rendered, version);
                    Target::Reference
                }
                (Segment::Ref, Target::Opaque) => {
                    rendered = reference_path(&rendered, version);
                    Target::Opaque
                }
                // Segments after a content id cannot be checked against the model
                (segment, Target::Opaque) => {
                    rendered.push_str(&opaque_segment(segment, version)?);
                    Target::Opaque
                }
                (segment, current) => {
                    return Err(RequestError::InvalidPath(format!(
                        "{:?} cannot follow {}",
                        segment,
                        current.describe()
                    )));
                }
            };
        }

        Ok(ResolvedPath {
            path: rendered,
            target,
        })
    }
}

/// Address of the links behind a navigation path
///
/// V4 appends `$ref`; V3 inserts `$links` before the navigation segment.
pub fn reference_path(path: &str, version: ODataVersion) -> String {
    match version {
        ODataVersion::V4 => format!("{}/$ref", path),
        ODataVersion::V3 => match path.rsplit_once('/') {
            Some((head, navigation)) => format!("{}/$links/{}", head, navigation),
            None => format!("{}/$links", path),
        },
    }
}

fn bound_operation(
    model: &MetadataModel,
    name: &str,
    bound_type: &str,
    is_collection: bool,
    rendered: &mut String,
) -> Result<Target, RequestError> {
    let operation = model
        .operations(name)
        .iter()
        .find(|op| match op.binding_type() {
            Some(TypeRef::Collection(inner)) if is_collection => {
                matches!(inner.as_ref(), TypeRef::Entity(t) if model.is_derived_from(bound_type, t))
            }
            Some(TypeRef::Entity(t)) if !is_collection => model.is_derived_from(bound_type, t),
            _ => false,
        })
        .ok_or_else(|| RequestError::InvalidOperation {
            operation: "bound operation",
            target: format!("{} on {}", name, rendered),
        })?;
    rendered.push('/');
    rendered.push_str(&operation.qualified_name());
    Ok(Target::Operation {
        kind: operation.kind,
        parameters: operation.parameters.iter().skip(1).cloned().collect(),
        return_type: operation.return_type.clone(),
        entity_set: None,
    })
}

fn opaque_segment(segment: &Segment, version: ODataVersion) -> Result<String, RequestError> {
    Ok(match segment {
        Segment::Navigation(name) | Segment::Property(name) | Segment::BoundOperation(name) => {
            format!("/{}", name)
        }
        Segment::Key(key) => {
            let parts = key
                .0
                .iter()
                .map(|(name, value)| {
                    literal(value, version).map(|lit| format!("{}={}", name, lit))
                })
                .collect::<Result<Vec<_>, _>>()?;
            format!("({})", parts.join(","))
        }
        Segment::Count => "/$count".to_string(),
        Segment::RawValue => "/$value".to_string(),
        other => {
            return Err(RequestError::InvalidPath(format!(
                "{:?} cannot follow a content id",
                other
            )));
        }
    })
}

/// What a resolved path addresses
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Collection {
        entity_type: String,
        entity_set: Option<String>,
    },
    Entity {
        entity_type: String,
        entity_set: Option<String>,
    },
    Property(TypeRef),
    Operation {
        kind: OperationKind,
        /// Non-binding parameters
        parameters: Vec<Parameter>,
        return_type: Option<TypeRef>,
        entity_set: Option<String>,
    },
    Count,
    RawValue(PrimitiveType),
    Reference,
    /// Rooted at a content id; type known only to the server
    Opaque,
}

impl Target {
    fn describe(&self) -> String {
        match self {
            Target::Collection { entity_type, .. } => format!("a collection of {}", entity_type),
            Target::Entity { entity_type, .. } => format!("an entity of {}", entity_type),
            Target::Property(t) => format!("a property of type {}", t.type_name()),
            Target::Operation { .. } => "an operation".to_string(),
            Target::Count => "$count".to_string(),
            Target::RawValue(_) => "$value".to_string(),
            Target::Reference => "$ref".to_string(),
            Target::Opaque => "a content id".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPath {
    /// Path relative to the service root, without query
    pub path: String,
    pub target: Target,
}
