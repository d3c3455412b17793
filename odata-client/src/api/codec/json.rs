//! JSON payload format
//!
//! Control information is written as `@odata.*` annotations for OData 4.0
//! and as `odata.*` names for OData 3.0. On read, the unprefixed 4.01 forms
//! (`@type`, `@id`, ...) are accepted as well.

use serde_json::{Map, Value as Json};

use super::entity::{EntityInstance, NavigationValue};
use super::value::{ComplexValue, EnumValue, Value};
use super::{CodecOptions, EntityCollection, Representation, UnknownPropertyPolicy};
use crate::api::constants::ODataVersion;
use crate::api::error::{CodecError, UnknownTypeError};
use crate::api::metadata::{EntityType, MetadataModel, Property, TypeRef};

pub(super) struct JsonCodec<'a> {
    pub model: &'a MetadataModel,
    pub options: &'a CodecOptions,
}

impl<'a> JsonCodec<'a> {
    pub fn new(model: &'a MetadataModel, options: &'a CodecOptions) -> Self {
        Self { model, options }
    }

    fn version(&self) -> ODataVersion {
        self.options.version
    }

    /// Name of an instance annotation as written by this codec
    fn annotation_name(&self, term: &str) -> String {
        match self.version() {
            ODataVersion::V4 => format!("@odata.{}", term),
            ODataVersion::V3 if term == "context" => "odata.metadata".to_string(),
            ODataVersion::V3 => format!("odata.{}", term),
        }
    }

    /// Instance annotation in any accepted spelling
    pub fn annotation<'j>(&self, obj: &'j Map<String, Json>, term: &str) -> Option<&'j Json> {
        let v3_term = if term == "context" { "metadata" } else { term };
        obj.get(&format!("@odata.{}", term))
            .or_else(|| obj.get(&format!("odata.{}", v3_term)))
            .or_else(|| obj.get(&format!("@{}", term)))
    }

    fn type_annotation(&self, qualified: &str) -> Json {
        match self.version() {
            ODataVersion::V4 => Json::String(format!("#{}", qualified)),
            ODataVersion::V3 => Json::String(qualified.to_string()),
        }
    }

    // -- writing ----------------------------------------------------------

    pub fn write_entity(
        &self,
        entity: &EntityInstance,
        representation: Representation,
    ) -> Result<Json, CodecError> {
        let entity_type = self
            .model
            .resolve_entity_type(&entity.type_name)
            .ok_or_else(|| UnknownTypeError::new(&entity.type_name))?;

        let mut obj = Map::new();
        obj.insert(
            self.annotation_name("type"),
            self.type_annotation(&entity_type.qualified_name()),
        );
        if let Some(etag) = &entity.etag {
            obj.insert(self.annotation_name("etag"), Json::String(etag.clone()));
        }
        if let Some(id) = &entity.entity_id {
            obj.insert(self.annotation_name("id"), Json::String(id.clone()));
        }

        let changed = match representation {
            Representation::Changes => entity.changed_properties(),
            Representation::Full => None,
        };

        for (name, value) in &entity.properties {
            if let Some(changed) = changed
                && !changed.contains(name)
            {
                continue;
            }
            match entity_type.property(name) {
                Some(property) => {
                    value.check_facets(property)?;
                    obj.insert(name.clone(), self.write_value(value, Some(&property.type_ref))?);
                }
                None if entity_type.is_open => {
                    obj.insert(name.clone(), self.write_value(value, None)?);
                }
                None => {
                    return Err(CodecError::malformed(format!(
                        "'{}' is not a property of '{}'",
                        name,
                        entity_type.qualified_name()
                    )));
                }
            }
        }

        if entity_type.is_open && representation == Representation::Full {
            for (name, value) in &entity.extras {
                obj.insert(name.clone(), self.write_value(value, None)?);
            }
        }

        for (name, nav) in &entity.navigation {
            let declared = entity_type.navigation(name).ok_or_else(|| {
                CodecError::malformed(format!(
                    "'{}' is not a navigation property of '{}'",
                    name,
                    entity_type.qualified_name()
                ))
            })?;
            match nav {
                NavigationValue::Bind(targets) => {
                    let key = format!("{}@odata.bind", name);
                    let links: Vec<Json> =
                        targets.iter().map(|t| Json::String(t.as_link())).collect();
                    if declared.is_collection() {
                        obj.insert(key, Json::Array(links));
                    } else if let Some(link) = links.into_iter().next_back() {
                        obj.insert(key, link);
                    }
                }
                // Deep insert only makes sense for full representations
                NavigationValue::Entity(Some(child)) if representation == Representation::Full => {
                    obj.insert(name.clone(), self.write_entity(child, Representation::Full)?);
                }
                NavigationValue::Entities(children) if representation == Representation::Full => {
                    let items = children
                        .iter()
                        .map(|c| self.write_entity(c, Representation::Full))
                        .collect::<Result<Vec<_>, _>>()?;
                    obj.insert(name.clone(), Json::Array(items));
                }
                _ => {}
            }
        }

        Ok(Json::Object(obj))
    }

    pub fn write_collection(&self, collection: &EntityCollection) -> Result<Json, CodecError> {
        let mut obj = Map::new();
        if let Some(count) = collection.count {
            obj.insert(self.annotation_name("count"), Json::from(count));
        }
        let items = collection
            .entities
            .iter()
            .map(|e| self.write_entity(e, Representation::Full))
            .collect::<Result<Vec<_>, _>>()?;
        obj.insert("value".to_string(), Json::Array(items));
        if let Some(next) = &collection.next_link {
            obj.insert(self.annotation_name("nextLink"), Json::String(next.clone()));
        }
        if let Some(delta) = &collection.delta_link {
            obj.insert(self.annotation_name("deltaLink"), Json::String(delta.clone()));
        }
        Ok(Json::Object(obj))
    }

    /// Top-level property or operation result
    pub fn write_value_payload(&self, value: &Value) -> Result<Json, CodecError> {
        match value {
            Value::Complex(_) => self.write_value(value, None),
            other => {
                let mut obj = Map::new();
                obj.insert("value".to_string(), self.write_value(other, None)?);
                Ok(Json::Object(obj))
            }
        }
    }

    /// Action parameters as a JSON object
    pub fn write_parameters(&self, parameters: &[(String, Value)]) -> Result<Json, CodecError> {
        let mut obj = Map::new();
        for (name, value) in parameters {
            obj.insert(name.clone(), self.write_value(value, None)?);
        }
        Ok(Json::Object(obj))
    }

    pub fn write_value(&self, value: &Value, declared: Option<&TypeRef>) -> Result<Json, CodecError> {
        match value {
            Value::Collection(items) => {
                let element = declared.map(TypeRef::element);
                items
                    .iter()
                    .map(|item| self.write_value(item, element))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Json::Array)
            }
            Value::Complex(complex) => self.write_complex(complex, declared),
            other => other.primitive_to_json(self.version(), self.options.ieee754_compatible),
        }
    }

    fn write_complex(
        &self,
        complex: &ComplexValue,
        declared: Option<&TypeRef>,
    ) -> Result<Json, CodecError> {
        let complex_type = self
            .model
            .resolve_complex_type(&complex.type_name)
            .ok_or_else(|| UnknownTypeError::new(&complex.type_name))?;
        let qualified = complex_type.qualified_name();

        let mut obj = Map::new();
        let is_declared_type = matches!(declared, Some(TypeRef::Complex(name)) if *name == qualified);
        if !is_declared_type {
            obj.insert(self.annotation_name("type"), self.type_annotation(&qualified));
        }

        for (name, value) in &complex.properties {
            match complex_type.property(name) {
                Some(property) => {
                    value.check_facets(property)?;
                    obj.insert(name.clone(), self.write_value(value, Some(&property.type_ref))?);
                }
                None if complex_type.is_open => {
                    obj.insert(name.clone(), self.write_value(value, None)?);
                }
                None => {
                    return Err(CodecError::malformed(format!(
                        "'{}' is not a property of '{}'",
                        name, qualified
                    )));
                }
            }
        }
        if complex_type.is_open {
            for (name, value) in &complex.extras {
                obj.insert(name.clone(), self.write_value(value, None)?);
            }
        }
        Ok(Json::Object(obj))
    }

    // -- reading ----------------------------------------------------------

    fn is_control(key: &str) -> bool {
        key.starts_with('@') || key.starts_with("odata.")
    }

    fn retains_unknown(&self, is_open: bool) -> bool {
        is_open || self.options.unknown_properties == UnknownPropertyPolicy::Retain
    }

    /// Resolve the runtime type of an entity, honouring a type annotation
    fn runtime_entity_type(
        &self,
        obj: &Map<String, Json>,
        expected: &str,
    ) -> Result<&'a EntityType, CodecError> {
        let type_name = match self.annotation(obj, "type") {
            Some(Json::String(annotated)) => match self.model.resolve_type(annotated)? {
                TypeRef::Entity(name) => name,
                _ => return Err(UnknownTypeError::new(annotated.as_str()).into()),
            },
            Some(other) => {
                return Err(CodecError::malformed(format!(
                    "type annotation must be a string, found {}",
                    other
                )));
            }
            None => self.model.normalize_name(expected),
        };

        if !self.model.is_derived_from(&type_name, expected) {
            return Err(CodecError::malformed(format!(
                "entity of type '{}' where '{}' was expected",
                type_name, expected
            )));
        }

        self.model
            .resolve_entity_type(&type_name)
            .ok_or_else(|| UnknownTypeError::new(type_name).into())
    }

    pub fn read_entity(&self, json: &Json, expected: &str) -> Result<EntityInstance, CodecError> {
        let obj = json
            .as_object()
            .ok_or_else(|| CodecError::malformed(format!("expected an object, found {}", json)))?;
        let entity_type = self.runtime_entity_type(obj, expected)?;

        let mut instance = EntityInstance::unchanged(entity_type.qualified_name());
        instance.etag = self
            .annotation(obj, "etag")
            .and_then(Json::as_str)
            .map(str::to_string);
        instance.entity_id = self
            .annotation(obj, "id")
            .and_then(Json::as_str)
            .map(str::to_string);

        for (key, value) in obj {
            if Self::is_control(key) || key.contains('@') {
                continue;
            }

            if let Some(property) = entity_type.property(key) {
                let type_override = obj
                    .get(&format!("{}@odata.type", key))
                    .or_else(|| obj.get(&format!("{}@type", key)))
                    .and_then(Json::as_str);
                let decoded = self.read_value(value, &property.type_ref, Some(property), key, type_override)?;
                instance.properties.insert(key.clone(), decoded);
            } else if let Some(nav) = entity_type.navigation(key) {
                let decoded = match value {
                    Json::Null => NavigationValue::Entity(None),
                    Json::Array(items) => NavigationValue::Entities(
                        items
                            .iter()
                            .map(|item| self.read_entity(item, &nav.target))
                            .collect::<Result<Vec<_>, _>>()?,
                    ),
                    item => NavigationValue::Entity(Some(Box::new(self.read_entity(item, &nav.target)?))),
                };
                instance.navigation.insert(key.clone(), decoded);
            } else if self.retains_unknown(entity_type.is_open) {
                instance
                    .extras
                    .insert(key.clone(), Value::Untyped(value.clone()));
            } else {
                log::debug!(
                    "Ignoring undeclared property '{}' of {}",
                    key,
                    entity_type.qualified_name()
                );
            }
        }

        Ok(instance)
    }

    pub fn read_collection(&self, json: &Json, expected: &str) -> Result<EntityCollection, CodecError> {
        let obj = json
            .as_object()
            .ok_or_else(|| CodecError::malformed("expected an object wrapping a collection"))?;
        let items = obj
            .get("value")
            .and_then(Json::as_array)
            .ok_or_else(|| CodecError::malformed("collection payload has no 'value' array"))?;

        let entities = items
            .iter()
            .map(|item| self.read_entity(item, expected))
            .collect::<Result<Vec<_>, _>>()?;

        let count = match self.annotation(obj, "count") {
            Some(Json::Number(n)) => n.as_u64(),
            Some(Json::String(s)) => s.parse().ok(),
            _ => None,
        };

        Ok(EntityCollection {
            entities,
            count,
            next_link: self
                .annotation(obj, "nextLink")
                .and_then(Json::as_str)
                .map(str::to_string),
            delta_link: self
                .annotation(obj, "deltaLink")
                .and_then(Json::as_str)
                .map(str::to_string),
        })
    }

    /// Top-level value; primitives and collections are wrapped in `value`
    pub fn read_value_payload(&self, json: &Json, type_ref: &TypeRef) -> Result<Value, CodecError> {
        let inner = match (type_ref, json) {
            (TypeRef::Complex(_), _) => json,
            (_, Json::Object(obj)) if obj.contains_key("value") => &obj["value"],
            _ => json,
        };
        self.read_value(inner, type_ref, None, "value", None)
    }

    pub fn read_value(
        &self,
        json: &Json,
        type_ref: &TypeRef,
        property: Option<&Property>,
        name: &str,
        type_override: Option<&str>,
    ) -> Result<Value, CodecError> {
        if json.is_null() {
            return Ok(Value::Null);
        }

        let invalid = |reason: String| CodecError::InvalidValue {
            property: name.to_string(),
            expected: type_ref.type_name(),
            reason,
        };

        let value = match type_ref {
            TypeRef::Collection(inner) => {
                let items = json
                    .as_array()
                    .ok_or_else(|| invalid(format!("expected an array, found {}", json)))?;
                Value::Collection(
                    items
                        .iter()
                        .map(|item| self.read_value(item, inner, property, name, None))
                        .collect::<Result<Vec<_>, _>>()?,
                )
            }
            TypeRef::Primitive(primitive) => {
                let value = Value::primitive_from_json(json, primitive).map_err(invalid)?;
                if let Some(property) = property {
                    value.check_facets(property)?;
                }
                value
            }
            TypeRef::Enum(enum_name) => {
                let text = match json {
                    Json::String(s) => s.clone(),
                    Json::Number(n) => n.to_string(),
                    other => return Err(invalid(format!("expected a member name, found {}", other))),
                };
                let accepted = self
                    .model
                    .resolve_enum_type(enum_name)
                    .map(|t| t.accepts(&text))
                    .unwrap_or(false);
                if !accepted {
                    return Err(invalid(format!("'{}' is not a member", text)));
                }
                Value::Enum(EnumValue::new(enum_name.clone(), text))
            }
            TypeRef::Complex(complex_name) => {
                let obj = json
                    .as_object()
                    .ok_or_else(|| invalid(format!("expected an object, found {}", json)))?;
                self.read_complex(obj, complex_name, type_override)?
            }
            TypeRef::Entity(_) => {
                return Err(invalid("entity values cannot appear as properties".to_string()));
            }
        };
        Ok(value)
    }

    fn read_complex(
        &self,
        obj: &Map<String, Json>,
        declared: &str,
        type_override: Option<&str>,
    ) -> Result<Value, CodecError> {
        let annotated = self
            .annotation(obj, "type")
            .and_then(Json::as_str)
            .or(type_override);
        let type_name = match annotated {
            Some(name) => match self.model.resolve_type(name)? {
                TypeRef::Complex(resolved) => resolved,
                _ => return Err(UnknownTypeError::new(name).into()),
            },
            None => declared.to_string(),
        };
        if !self.model.is_derived_from(&type_name, declared) {
            return Err(CodecError::malformed(format!(
                "complex value of type '{}' where '{}' was expected",
                type_name, declared
            )));
        }
        let complex_type = self
            .model
            .resolve_complex_type(&type_name)
            .ok_or_else(|| UnknownTypeError::new(type_name.as_str()))?;

        let mut complex = ComplexValue::new(complex_type.qualified_name());
        for (key, value) in obj {
            if Self::is_control(key) || key.contains('@') {
                continue;
            }
            match complex_type.property(key) {
                Some(property) => {
                    let type_override = obj
                        .get(&format!("{}@odata.type", key))
                        .and_then(Json::as_str);
                    let decoded =
                        self.read_value(value, &property.type_ref, Some(property), key, type_override)?;
                    complex.properties.insert(key.clone(), decoded);
                }
                None if self.retains_unknown(complex_type.is_open) => {
                    complex.extras.insert(key.clone(), Value::Untyped(value.clone()));
                }
                None => log::debug!("Ignoring undeclared property '{}' of {}", key, type_name),
            }
        }
        Ok(Value::Complex(complex))
    }
}
