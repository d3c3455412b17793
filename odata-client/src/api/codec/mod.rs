//! Payload codec
//!
//! Converts between wire payloads and [`EntityInstance`] / [`Value`] trees
//! using the metadata model for typing. JSON and Atom are supported for
//! entities, collections and values; delta payloads are JSON only.

mod atom;
pub mod delta;
pub mod entity;
pub mod format;
mod json;
pub mod value;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

pub use delta::{DeletedEntity, Delta, DeltaLink};
pub use entity::{ChangeState, EntityInstance, EntityKey, EntityReference, NavigationValue};
pub use format::{Format, JsonMetadata, MediaType};
pub use value::{ComplexValue, EnumValue, Value};

use crate::api::constants::{ODataVersion, media};
use crate::api::error::{CodecError, UnsupportedFormatError};
use crate::api::metadata::{MetadataModel, PrimitiveType, TypeRef};
use atom::AtomCodec;
use json::JsonCodec;

/// What to do with payload properties the model does not declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownPropertyPolicy {
    /// Ignore them (open types still retain them)
    #[default]
    Drop,
    /// Keep them in the instance's extras bag
    Retain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecOptions {
    pub version: ODataVersion,
    pub unknown_properties: UnknownPropertyPolicy,
    /// Write Int64 and Decimal as JSON strings
    pub ieee754_compatible: bool,
}

impl CodecOptions {
    pub fn new(version: ODataVersion) -> Self {
        Self {
            version,
            unknown_properties: UnknownPropertyPolicy::Drop,
            ieee754_compatible: false,
        }
    }

    pub fn with_unknown_properties(mut self, policy: UnknownPropertyPolicy) -> Self {
        self.unknown_properties = policy;
        self
    }

    pub fn with_ieee754_compatible(mut self, enabled: bool) -> Self {
        self.ieee754_compatible = enabled;
        self
    }
}

/// Which properties of an entity go on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    /// Every present property
    Full,
    /// Only the changed-property set of an updated instance
    Changes,
}

impl Representation {
    /// Representation implied by the instance's change state
    pub fn for_entity(entity: &EntityInstance) -> Self {
        match entity.state {
            ChangeState::Updated(_) => Representation::Changes,
            _ => Representation::Full,
        }
    }
}

/// A feed of entities with paging and count information
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityCollection {
    pub entities: Vec<EntityInstance>,
    pub count: Option<u64>,
    pub next_link: Option<String>,
    pub delta_link: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Entity(EntityInstance),
    Collection(EntityCollection),
    Delta(Delta),
    /// Property value, `$value`, `$count` or operation result
    Value(Value),
}

/// Shape a response body is decoded into
#[derive(Debug, Clone, PartialEq)]
pub enum ExpectedPayload {
    /// A single entity of (or derived from) the named type
    Entity(String),
    Collection(String),
    Delta(String),
    Value(TypeRef),
}

impl ExpectedPayload {
    /// Expected shape of an operation result
    pub fn for_return_type(type_ref: &TypeRef) -> Self {
        match type_ref {
            TypeRef::Entity(name) => ExpectedPayload::Entity(name.clone()),
            TypeRef::Collection(inner) => match inner.as_ref() {
                TypeRef::Entity(name) => ExpectedPayload::Collection(name.clone()),
                _ => ExpectedPayload::Value(type_ref.clone()),
            },
            other => ExpectedPayload::Value(other.clone()),
        }
    }
}

/// Serializes and deserializes payloads against one metadata model
#[derive(Debug, Clone)]
pub struct PayloadCodec {
    model: Arc<MetadataModel>,
    options: CodecOptions,
}

impl PayloadCodec {
    pub fn new(model: Arc<MetadataModel>, options: CodecOptions) -> Self {
        Self { model, options }
    }

    pub fn model(&self) -> &Arc<MetadataModel> {
        &self.model
    }

    pub fn options(&self) -> &CodecOptions {
        &self.options
    }

    fn json(&self) -> JsonCodec<'_> {
        JsonCodec::new(&self.model, &self.options)
    }

    fn atom(&self) -> AtomCodec<'_> {
        AtomCodec::new(&self.model, &self.options)
    }

    /// `Content-Type` / `Accept` value for a format
    pub fn media_type(&self, format: Format) -> String {
        format.media_type(self.options.version, self.options.ieee754_compatible)
    }

    pub fn serialize(&self, payload: &Payload, format: Format) -> Result<Vec<u8>, CodecError> {
        match (payload, format) {
            (Payload::Entity(entity), _) => self.serialize_entity(entity, format),
            (Payload::Collection(collection), Format::Json(_)) => {
                to_bytes(&self.json().write_collection(collection)?)
            }
            (Payload::Collection(collection), Format::Atom) => self.atom().write_collection(collection),
            (Payload::Delta(delta), Format::Json(_)) => to_bytes(&self.json().write_delta(delta)?),
            (Payload::Delta(_), Format::Atom) => {
                Err(UnsupportedFormatError::new(media::APPLICATION_ATOM_XML).into())
            }
            (Payload::Value(value), Format::Json(_)) => to_bytes(&self.json().write_value_payload(value)?),
            (Payload::Value(value), Format::Atom) => self.atom().write_value_payload(value),
        }
    }

    /// Serialize an entity with the representation its change state implies
    pub fn serialize_entity(&self, entity: &EntityInstance, format: Format) -> Result<Vec<u8>, CodecError> {
        self.serialize_entity_as(entity, format, Representation::for_entity(entity))
    }

    pub fn serialize_entity_as(
        &self,
        entity: &EntityInstance,
        format: Format,
        representation: Representation,
    ) -> Result<Vec<u8>, CodecError> {
        match format {
            Format::Json(_) => to_bytes(&self.json().write_entity(entity, representation)?),
            Format::Atom => self.atom().write_entity(entity, representation),
        }
    }

    /// Body of an action invocation; parameters are always sent as JSON
    pub fn serialize_parameters(&self, parameters: &[(String, Value)]) -> Result<Vec<u8>, CodecError> {
        to_bytes(&self.json().write_parameters(parameters)?)
    }

    pub fn deserialize(
        &self,
        body: &[u8],
        content_type: &str,
        expected: &ExpectedPayload,
    ) -> Result<Payload, CodecError> {
        let media = MediaType::parse(content_type)
            .ok_or_else(|| UnsupportedFormatError::new(content_type))?;

        // `$value` and `$count` answer with raw text
        if media.essence == media::TEXT_PLAIN {
            return match expected {
                ExpectedPayload::Value(TypeRef::Primitive(primitive)) => {
                    let text = std::str::from_utf8(body)
                        .map_err(|e| CodecError::malformed(format!("body is not UTF-8: {}", e)))?;
                    Value::parse_text(text.trim(), primitive)
                        .map(Payload::Value)
                        .map_err(|reason| CodecError::InvalidValue {
                            property: "value".to_string(),
                            expected: primitive.edm_name(),
                            reason,
                        })
                }
                _ => Err(UnsupportedFormatError::new(content_type).into()),
            };
        }

        let format = Format::from_content_type(content_type)?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(CodecError::malformed("empty payload"));
        }

        match format {
            Format::Json(_) => {
                let json: Json = serde_json::from_slice(body)
                    .map_err(|e| CodecError::malformed(format!("invalid JSON: {}", e)))?;
                let codec = self.json();
                match expected {
                    ExpectedPayload::Entity(t) => codec.read_entity(&json, t).map(Payload::Entity),
                    ExpectedPayload::Collection(t) => {
                        codec.read_collection(&json, t).map(Payload::Collection)
                    }
                    ExpectedPayload::Delta(t) => codec.read_delta(&json, t).map(Payload::Delta),
                    ExpectedPayload::Value(type_ref) => match ExpectedPayload::for_return_type(type_ref) {
                        ExpectedPayload::Entity(t) => codec.read_entity(&json, &t).map(Payload::Entity),
                        ExpectedPayload::Collection(t) => {
                            codec.read_collection(&json, &t).map(Payload::Collection)
                        }
                        _ => codec.read_value_payload(&json, type_ref).map(Payload::Value),
                    },
                }
            }
            Format::Atom => {
                let text = std::str::from_utf8(body)
                    .map_err(|e| CodecError::malformed(format!("body is not UTF-8: {}", e)))?;
                let codec = self.atom();
                match expected {
                    ExpectedPayload::Entity(t) => codec.read_entity(text, t).map(Payload::Entity),
                    ExpectedPayload::Collection(t) => {
                        codec.read_collection(text, t).map(Payload::Collection)
                    }
                    ExpectedPayload::Delta(_) => Err(UnsupportedFormatError::new(content_type).into()),
                    ExpectedPayload::Value(type_ref) => match ExpectedPayload::for_return_type(type_ref) {
                        ExpectedPayload::Entity(t) => codec.read_entity(text, &t).map(Payload::Entity),
                        ExpectedPayload::Collection(t) => {
                            codec.read_collection(text, &t).map(Payload::Collection)
                        }
                        _ => codec.read_value_payload(text, type_ref).map(Payload::Value),
                    },
                }
            }
        }
    }

    /// Convenience wrapper for a single entity
    pub fn deserialize_entity(
        &self,
        body: &[u8],
        content_type: &str,
        entity_type: &str,
    ) -> Result<EntityInstance, CodecError> {
        match self.deserialize(body, content_type, &ExpectedPayload::Entity(entity_type.to_string()))? {
            Payload::Entity(entity) => Ok(entity),
            _ => Err(CodecError::malformed("expected a single entity")),
        }
    }
}

fn to_bytes(json: &Json) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(json).map_err(|e| CodecError::malformed(format!("cannot encode JSON: {}", e)))
}

/// Extract `(code, message)` from an error response body
pub fn parse_error_message(body: &[u8], content_type: Option<&str>) -> (Option<String>, String) {
    let text = String::from_utf8_lossy(body);
    let is_xml = content_type
        .map(|ct| ct.contains("xml"))
        .unwrap_or_else(|| text.trim_start().starts_with('<'));

    if !is_xml && let Ok(json) = serde_json::from_str::<Json>(&text) {
        let error = json.get("error").or_else(|| json.get("odata.error"));
        if let Some(error) = error {
            let code = error
                .get("code")
                .and_then(Json::as_str)
                .filter(|c| !c.is_empty())
                .map(str::to_string);
            let message = match error.get("message") {
                Some(Json::String(m)) => m.clone(),
                Some(Json::Object(m)) => m
                    .get("value")
                    .and_then(Json::as_str)
                    .unwrap_or_default()
                    .to_string(),
                _ => String::new(),
            };
            return (code, message);
        }
    }

    if is_xml && let Ok(doc) = roxmltree::Document::parse(&text) {
        let find = |name: &str| {
            doc.descendants()
                .find(|n| n.is_element() && n.tag_name().name() == name)
                .and_then(|n| n.text())
                .map(|t| t.trim().to_string())
        };
        if let Some(message) = find("message") {
            return (find("code").filter(|c| !c.is_empty()), message);
        }
    }

    let trimmed = text.trim();
    let message = if trimmed.is_empty() {
        "no error details".to_string()
    } else {
        trimmed.chars().take(200).collect()
    };
    (None, message)
}

/// Primitive type of a `$count` response
pub fn count_type() -> TypeRef {
    TypeRef::Primitive(PrimitiveType::Int64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::metadata::fixtures::{V3_METADATA, V4_METADATA};
    use chrono::DateTime;
    use serde_json::json;

    fn codec() -> PayloadCodec {
        let model = Arc::new(MetadataModel::parse(V4_METADATA).unwrap());
        PayloadCodec::new(model, CodecOptions::new(ODataVersion::V4))
    }

    fn customer() -> EntityInstance {
        EntityInstance::new("Demo.Services.Customer")
            .with("CustomerID", 7)
            .with("Name", "Ann O'Neil")
            .with("Balance", Value::decimal("1234.5678").unwrap())
            .with(
                "Since",
                DateTime::parse_from_rfc3339("2021-06-01T08:30:00.1234567-05:00").unwrap(),
            )
            .with(
                "Address",
                ComplexValue::new("Demo.Services.Address")
                    .with("Street", "1 Main St")
                    .with("City", "Springfield"),
            )
            .with("Emails", vec![Value::from("a@example.com"), Value::from("b@example.com")])
            .with("Tier", EnumValue::new("Demo.Services.Tier", "Gold"))
            .with("Version", Value::Int64(9_007_199_254_740_993))
            .with_etag("W/\"42\"")
    }

    fn roundtrip(codec: &PayloadCodec, format: Format) -> EntityInstance {
        let original = customer();
        let bytes = codec.serialize_entity(&original, format).unwrap();
        let content_type = codec.media_type(format);
        codec
            .deserialize_entity(&bytes, &content_type, "Demo.Services.Customer")
            .unwrap()
    }

    #[test]
    fn test_json_roundtrip_full_instance() {
        let codec = codec();
        let decoded = roundtrip(&codec, Format::json());
        let original = customer();
        assert_eq!(decoded.properties, original.properties);
        assert_eq!(decoded.etag, original.etag);
        assert_eq!(decoded.state, ChangeState::Unchanged);
    }

    #[test]
    fn test_atom_roundtrip_full_instance() {
        let codec = codec();
        let decoded = roundtrip(&codec, Format::Atom);
        let original = customer();
        assert_eq!(decoded.properties, original.properties);
        assert_eq!(decoded.etag, original.etag);
    }

    #[test]
    fn test_partial_update_contains_only_changes() {
        let codec = codec();
        let mut entity = customer();
        entity.accept_changes();
        entity.set_property("Name", "Bea");
        entity.set_property("Tier", Value::Null);

        let bytes = codec.serialize_entity(&entity, Format::json()).unwrap();
        let json: Json = serde_json::from_slice(&bytes).unwrap();
        let keys: Vec<&str> = json
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .filter(|k| !k.starts_with('@'))
            .collect();
        assert_eq!(keys, vec!["Name", "Tier"]);
        assert_eq!(json["Tier"], Json::Null);
        assert_eq!(json["@odata.type"], json!("#Demo.Services.Customer"));
    }

    #[test]
    fn test_absent_null_and_empty_are_distinct() {
        let codec = codec();
        let body = json!({
            "CustomerID": 1,
            "Name": null,
            "Emails": []
        });
        let entity = codec
            .deserialize_entity(body.to_string().as_bytes(), "application/json", "Demo.Customer")
            .unwrap();
        assert_eq!(entity.get("Name"), Some(&Value::Null));
        assert_eq!(entity.get("Emails"), Some(&Value::Collection(vec![])));
        assert_eq!(entity.get("Balance"), None);

        // Same distinction through Atom
        let bytes = codec.serialize_entity(&entity, Format::Atom).unwrap();
        let back = codec
            .deserialize_entity(&bytes, "application/atom+xml", "Demo.Customer")
            .unwrap();
        assert_eq!(back.properties, entity.properties);
    }

    #[test]
    fn test_unknown_properties_dropped_or_retained() {
        let body = json!({"CustomerID": 1, "Loyalty": "high"}).to_string();

        let dropped = codec()
            .deserialize_entity(body.as_bytes(), "application/json", "Demo.Customer")
            .unwrap();
        assert!(dropped.extras.is_empty());

        let model = Arc::new(MetadataModel::parse(V4_METADATA).unwrap());
        let retaining = PayloadCodec::new(
            model,
            CodecOptions::new(ODataVersion::V4).with_unknown_properties(UnknownPropertyPolicy::Retain),
        );
        let retained = retaining
            .deserialize_entity(body.as_bytes(), "application/json", "Demo.Customer")
            .unwrap();
        assert_eq!(retained.extras.get("Loyalty"), Some(&Value::Untyped(json!("high"))));
    }

    #[test]
    fn test_retained_complex_members_stay_out_of_payloads() {
        let model = Arc::new(MetadataModel::parse(V4_METADATA).unwrap());
        let codec = PayloadCodec::new(
            model,
            CodecOptions::new(ODataVersion::V4).with_unknown_properties(UnknownPropertyPolicy::Retain),
        );
        let body = json!({"CustomerID": 1, "Address": {"Street": "1 Main", "Zip": "98052"}}).to_string();
        let mut entity = codec
            .deserialize_entity(body.as_bytes(), "application/json", "Demo.Customer")
            .unwrap();
        let address = entity.get("Address").and_then(Value::as_complex).unwrap().clone();
        assert_eq!(address.get("Zip"), None);
        assert_eq!(address.extras.get("Zip"), Some(&Value::Untyped(json!("98052"))));

        let bytes = codec.serialize_entity(&entity, Format::json()).unwrap();
        let json: Json = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["Address"]["Street"], json!("1 Main"));
        assert!(json["Address"].get("Zip").is_none());

        let atom = codec.serialize_entity(&entity, Format::Atom).unwrap();
        assert!(!String::from_utf8_lossy(&atom).contains("Zip"));
        let back = codec
            .deserialize_entity(&atom, &codec.media_type(Format::Atom), "Demo.Customer")
            .unwrap();
        assert_eq!(
            back.get("Address").and_then(Value::as_complex).and_then(|a| a.get("Street")),
            Some(&Value::from("1 Main"))
        );

        // a partial update touching the complex property
        entity.set_property("Address", address);
        let bytes = codec.serialize_entity(&entity, Format::json()).unwrap();
        let json: Json = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["Address"], json!({"Street": "1 Main"}));
    }

    #[test]
    fn test_unresolvable_type_annotation() {
        let body = json!({"@odata.type": "#Demo.Services.Martian", "CustomerID": 1}).to_string();
        let err = codec()
            .deserialize_entity(body.as_bytes(), "application/json", "Demo.Customer")
            .unwrap_err();
        assert!(matches!(err, CodecError::UnknownType(_)));
    }

    #[test]
    fn test_derived_type_annotation_selects_runtime_type() {
        let body = json!({
            "@odata.type": "#Demo.Services.Employee",
            "PersonID": 3,
            "Tenure": "P2Y",
            "Photo": "AQID"
        })
        .to_string();
        let entity = codec()
            .deserialize_entity(body.as_bytes(), "application/json", "Demo.Person")
            .unwrap();
        assert_eq!(entity.type_name, "Demo.Services.Employee");
        assert_eq!(entity.get("Photo"), Some(&Value::Binary(vec![1, 2, 3])));
    }

    #[test]
    fn test_expanded_navigation_becomes_children() {
        let body = json!({
            "CustomerID": 1,
            "Orders": [
                {"OrderID": 10, "Total": 12.5},
                {"OrderID": 11, "Total": 3}
            ]
        })
        .to_string();
        let entity = codec()
            .deserialize_entity(body.as_bytes(), "application/json", "Demo.Customer")
            .unwrap();
        match entity.navigation.get("Orders") {
            Some(NavigationValue::Entities(orders)) => {
                assert_eq!(orders.len(), 2);
                assert_eq!(orders[0].get("OrderID"), Some(&Value::Int32(10)));
            }
            other => panic!("unexpected navigation value {:?}", other),
        }
    }

    #[test]
    fn test_decimal_scale_violation_rejected_on_read() {
        let body = r#"{"OrderID": 1, "Total": 1.005}"#;
        let err = codec()
            .deserialize_entity(body.as_bytes(), "application/json", "Demo.Order")
            .unwrap_err();
        assert!(matches!(err, CodecError::InvalidValue { .. }));
    }

    #[test]
    fn test_collection_with_count_and_next_link() {
        let body = json!({
            "@odata.context": "$metadata#Orders",
            "@odata.count": 25,
            "value": [{"OrderID": 1}],
            "@odata.nextLink": "Orders?$skip=1"
        })
        .to_string();
        let payload = codec()
            .deserialize(
                body.as_bytes(),
                "application/json",
                &ExpectedPayload::Collection("Demo.Order".into()),
            )
            .unwrap();
        let Payload::Collection(collection) = payload else {
            panic!("expected a collection");
        };
        assert_eq!(collection.count, Some(25));
        assert_eq!(collection.next_link.as_deref(), Some("Orders?$skip=1"));
        assert_eq!(collection.entities.len(), 1);
    }

    #[test]
    fn test_delta_payload() {
        let body = json!({
            "@odata.context": "$metadata#Customers/$delta",
            "value": [
                {"CustomerID": 1, "Name": "Changed"},
                {"@odata.context": "$metadata#Customers/$deletedEntity", "id": "Customers(2)", "reason": "deleted"},
                {"@removed": {"reason": "changed"}, "@id": "Customers(3)"},
                {"@odata.context": "$metadata#Customers/$link", "source": "Customers(1)", "relationship": "Orders", "target": "Orders(5)"},
                {"@odata.context": "$metadata#Customers/$deletedLink", "source": "Customers(1)", "relationship": "Orders", "target": "Orders(6)"}
            ],
            "@odata.deltaLink": "Customers?$deltatoken=abc"
        })
        .to_string();
        let payload = codec()
            .deserialize(
                body.as_bytes(),
                "application/json",
                &ExpectedPayload::Delta("Demo.Customer".into()),
            )
            .unwrap();
        let Payload::Delta(delta) = payload else {
            panic!("expected a delta");
        };
        assert_eq!(delta.changed.len(), 1);
        assert_eq!(delta.deleted.len(), 2);
        assert_eq!(delta.deleted[1].reason.as_deref(), Some("changed"));
        assert_eq!(delta.added_links[0].target, "Orders(5)");
        assert_eq!(delta.deleted_links[0].target, "Orders(6)");
        assert_eq!(delta.delta_link.as_deref(), Some("Customers?$deltatoken=abc"));
    }

    #[test]
    fn test_atom_delta_unsupported() {
        let err = codec()
            .deserialize(
                b"<feed/>",
                "application/atom+xml",
                &ExpectedPayload::Delta("Demo.Customer".into()),
            )
            .unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_unsupported_content_type() {
        let err = codec()
            .deserialize(b"a,b", "text/csv", &ExpectedPayload::Entity("Demo.Customer".into()))
            .unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_bind_annotations_written() {
        let order = EntityInstance::new("Demo.Services.Order")
            .with("OrderID", 5)
            .with_navigation(
                "Customer",
                NavigationValue::Bind(vec![EntityReference::ContentId("1".into())]),
            );
        let bytes = codec().serialize_entity(&order, Format::json()).unwrap();
        let json: Json = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["Customer@odata.bind"], json!("$1"));
    }

    #[test]
    fn test_v3_json_annotations() {
        let model = Arc::new(MetadataModel::parse(V3_METADATA).unwrap());
        let codec = PayloadCodec::new(model, CodecOptions::new(ODataVersion::V3));
        let body = json!({
            "odata.metadata": "$metadata#Products/@Element",
            "odata.etag": "W/\"X'01'\"",
            "ProductID": 4,
            "ProductName": "Chai",
            "UnitPrice": "18.0000",
            "Discontinued": false,
            "Modified": "2012-03-04T12:10:00.123"
        })
        .to_string();
        let product = codec
            .deserialize_entity(body.as_bytes(), "application/json;odata=minimalmetadata", "NorthwindModel.Product")
            .unwrap();
        assert_eq!(product.etag.as_deref(), Some("W/\"X'01'\""));
        assert_eq!(product.get("UnitPrice"), Some(&Value::decimal("18").unwrap()));

        let bytes = codec.serialize_entity(&product, Format::json()).unwrap();
        let json: Json = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["odata.type"], json!("NorthwindModel.Product"));
        assert_eq!(json["UnitPrice"], json!("18.0000"));
    }

    #[test]
    fn test_value_payloads() {
        let codec = codec();
        let payload = codec
            .deserialize(b"42", "text/plain", &ExpectedPayload::Value(count_type()))
            .unwrap();
        assert_eq!(payload, Payload::Value(Value::Int64(42)));

        let body = json!({"value": ["x", "y"]}).to_string();
        let payload = codec
            .deserialize(
                body.as_bytes(),
                "application/json",
                &ExpectedPayload::Value(TypeRef::Collection(Box::new(TypeRef::Primitive(
                    PrimitiveType::String,
                )))),
            )
            .unwrap();
        assert_eq!(
            payload,
            Payload::Value(Value::Collection(vec!["x".into(), "y".into()]))
        );
    }

    #[test]
    fn test_error_message_parsing() {
        let (code, message) = parse_error_message(
            br#"{"error":{"code":"E42","message":"Bad thing"}}"#,
            Some("application/json"),
        );
        assert_eq!(code.as_deref(), Some("E42"));
        assert_eq!(message, "Bad thing");

        let (code, message) = parse_error_message(
            br#"{"odata.error":{"code":"","message":{"lang":"en-US","value":"Nope"}}}"#,
            None,
        );
        assert_eq!(code, None);
        assert_eq!(message, "Nope");

        let xml = br#"<m:error xmlns:m="http://docs.oasis-open.org/odata/ns/metadata"><m:code>1</m:code><m:message>Broken</m:message></m:error>"#;
        let (code, message) = parse_error_message(xml, Some("application/xml"));
        assert_eq!(code.as_deref(), Some("1"));
        assert_eq!(message, "Broken");
    }
}
