//! Atom/XML payload format
//!
//! Entries and feeds are written with `quick-xml` events and read back with
//! `roxmltree`. Structural properties live under `m:properties`, inline
//! expansion under `link/m:inline`, bind references as plain `link` hrefs.

use std::fmt;

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use roxmltree::{Document, Node};

use super::entity::{EntityInstance, NavigationValue};
use super::value::{ComplexValue, EnumValue, Value};
use super::{CodecOptions, EntityCollection, Representation, UnknownPropertyPolicy};
use crate::api::constants::{ODataVersion, media};
use crate::api::error::{CodecError, UnknownTypeError};
use crate::api::metadata::{MetadataModel, PrimitiveType, Property, TypeRef};

const ATOM_NS: &str = "http://www.w3.org/2005/Atom";

fn xml_error(e: impl fmt::Display) -> CodecError {
    CodecError::malformed(format!("XML error: {}", e))
}

pub(super) struct AtomCodec<'a> {
    pub model: &'a MetadataModel,
    pub options: &'a CodecOptions,
}

type XmlWriter = Writer<Vec<u8>>;

impl<'a> AtomCodec<'a> {
    pub fn new(model: &'a MetadataModel, options: &'a CodecOptions) -> Self {
        Self { model, options }
    }

    fn version(&self) -> ODataVersion {
        self.options.version
    }

    fn with_namespaces(&self, mut start: BytesStart<'static>) -> BytesStart<'static> {
        start.push_attribute(("xmlns", ATOM_NS));
        start.push_attribute(("xmlns:m", self.version().metadata_namespace()));
        start.push_attribute(("xmlns:d", self.version().data_namespace()));
        start
    }

    fn document() -> Result<XmlWriter, CodecError> {
        let mut writer = Writer::new(Vec::new());
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(xml_error)?;
        Ok(writer)
    }

    /// Type name as written in `category/@term` and `m:type`
    fn type_label(&self, type_ref: &TypeRef) -> String {
        match (self.version(), type_ref) {
            (ODataVersion::V3, t) => t.type_name(),
            (ODataVersion::V4, TypeRef::Primitive(p)) => p.short_name().to_string(),
            (ODataVersion::V4, TypeRef::Collection(inner)) => {
                format!("#Collection({})", self.type_label(inner).trim_start_matches('#'))
            }
            (ODataVersion::V4, t) => format!("#{}", t.type_name()),
        }
    }

    // -- writing ----------------------------------------------------------

    pub fn write_entity(
        &self,
        entity: &EntityInstance,
        representation: Representation,
    ) -> Result<Vec<u8>, CodecError> {
        let mut writer = Self::document()?;
        self.entry(&mut writer, entity, representation, true)?;
        Ok(writer.into_inner())
    }

    pub fn write_collection(&self, collection: &EntityCollection) -> Result<Vec<u8>, CodecError> {
        let mut writer = Self::document()?;
        writer
            .write_event(Event::Start(self.with_namespaces(BytesStart::new("feed"))))
            .map_err(xml_error)?;
        if let Some(count) = collection.count {
            text_element(&mut writer, "m:count", &count.to_string())?;
        }
        for entity in &collection.entities {
            self.entry(&mut writer, entity, Representation::Full, false)?;
        }
        if let Some(next) = &collection.next_link {
            let mut link = BytesStart::new("link");
            link.push_attribute(("rel", "next"));
            link.push_attribute(("href", next.as_str()));
            writer.write_event(Event::Empty(link)).map_err(xml_error)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("feed")))
            .map_err(xml_error)?;
        Ok(writer.into_inner())
    }

    pub fn write_value_payload(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        let mut writer = Self::document()?;
        self.property(&mut writer, "m:value", value, None, true)?;
        Ok(writer.into_inner())
    }

    fn entry(
        &self,
        writer: &mut XmlWriter,
        entity: &EntityInstance,
        representation: Representation,
        root: bool,
    ) -> Result<(), CodecError> {
        let entity_type = self
            .model
            .resolve_entity_type(&entity.type_name)
            .ok_or_else(|| UnknownTypeError::new(&entity.type_name))?;

        let mut start = BytesStart::new("entry");
        if root {
            start = self.with_namespaces(start);
        }
        if let Some(etag) = &entity.etag {
            start.push_attribute(("m:etag", etag.as_str()));
        }
        writer.write_event(Event::Start(start)).map_err(xml_error)?;

        if let Some(id) = &entity.entity_id {
            text_element(writer, "id", id)?;
        }
        writer
            .write_event(Event::Empty(BytesStart::new("title")))
            .map_err(xml_error)?;

        let mut category = BytesStart::new("category");
        let term = self.type_label(&TypeRef::Entity(entity_type.qualified_name()));
        category.push_attribute(("term", term.as_str()));
        category.push_attribute(("scheme", self.version().scheme_namespace()));
        writer.write_event(Event::Empty(category)).map_err(xml_error)?;

        for (name, nav) in &entity.navigation {
            let declared = entity_type.navigation(name).ok_or_else(|| {
                CodecError::malformed(format!(
                    "'{}' is not a navigation property of '{}'",
                    name,
                    entity_type.qualified_name()
                ))
            })?;
            let rel = format!("{}{}", self.version().related_link_prefix(), name);
            let link_type = if declared.is_collection() {
                "application/atom+xml;type=feed"
            } else {
                "application/atom+xml;type=entry"
            };
            let link = |href: Option<&str>| {
                let mut link = BytesStart::new("link");
                link.push_attribute(("rel", rel.as_str()));
                link.push_attribute(("type", link_type));
                link.push_attribute(("title", name.as_str()));
                if let Some(href) = href {
                    link.push_attribute(("href", href));
                }
                link
            };

            match nav {
                NavigationValue::Bind(targets) => {
                    for target in targets {
                        let href = target.as_link();
                        writer
                            .write_event(Event::Empty(link(Some(href.as_str()))))
                            .map_err(xml_error)?;
                    }
                }
                NavigationValue::Entity(Some(child)) if representation == Representation::Full => {
                    writer.write_event(Event::Start(link(None))).map_err(xml_error)?;
                    start_element(writer, "m:inline")?;
                    self.entry(writer, child, Representation::Full, false)?;
                    end_element(writer, "m:inline")?;
                    end_element(writer, "link")?;
                }
                NavigationValue::Entities(children) if representation == Representation::Full => {
                    writer.write_event(Event::Start(link(None))).map_err(xml_error)?;
                    start_element(writer, "m:inline")?;
                    start_element(writer, "feed")?;
                    for child in children {
                        self.entry(writer, child, Representation::Full, false)?;
                    }
                    end_element(writer, "feed")?;
                    end_element(writer, "m:inline")?;
                    end_element(writer, "link")?;
                }
                _ => {}
            }
        }

        let mut content = BytesStart::new("content");
        content.push_attribute(("type", media::APPLICATION_XML));
        writer.write_event(Event::Start(content)).map_err(xml_error)?;
        start_element(writer, "m:properties")?;

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
            let declared = match entity_type.property(name) {
                Some(property) => {
                    value.check_facets(property)?;
                    Some(&property.type_ref)
                }
                None if entity_type.is_open => None,
                None => {
                    return Err(CodecError::malformed(format!(
                        "'{}' is not a property of '{}'",
                        name,
                        entity_type.qualified_name()
                    )));
                }
            };
            self.property(writer, &format!("d:{}", name), value, declared, false)?;
        }
        if entity_type.is_open && representation == Representation::Full {
            for (name, value) in &entity.extras {
                self.property(writer, &format!("d:{}", name), value, None, false)?;
            }
        }

        end_element(writer, "m:properties")?;
        end_element(writer, "content")?;
        end_element(writer, "entry")
    }

    fn value_type(&self, value: &Value, declared: Option<&TypeRef>) -> Option<TypeRef> {
        if let Some(declared) = declared {
            return Some(declared.clone());
        }
        match value {
            Value::Complex(c) => Some(TypeRef::Complex(self.model.normalize_name(&c.type_name))),
            Value::Enum(e) => Some(TypeRef::Enum(self.model.normalize_name(&e.type_name))),
            Value::Collection(items) => items
                .iter()
                .find(|v| !v.is_null())
                .and_then(|v| self.value_type(v, None))
                .map(|t| TypeRef::Collection(Box::new(t))),
            other => other.primitive_type().map(TypeRef::Primitive),
        }
    }

    fn property(
        &self,
        writer: &mut XmlWriter,
        tag: &str,
        value: &Value,
        declared: Option<&TypeRef>,
        root: bool,
    ) -> Result<(), CodecError> {
        let mut start = BytesStart::new(tag.to_string());
        if root {
            start.push_attribute(("xmlns:m", self.version().metadata_namespace()));
            start.push_attribute(("xmlns:d", self.version().data_namespace()));
        }

        match value {
            Value::Null => {
                start.push_attribute(("m:null", "true"));
                writer.write_event(Event::Empty(start)).map_err(xml_error)?;
            }
            Value::Collection(items) => {
                if let Some(t) = self.value_type(value, declared) {
                    start.push_attribute(("m:type", self.type_label(&t).as_str()));
                }
                if items.is_empty() {
                    writer.write_event(Event::Empty(start)).map_err(xml_error)?;
                    return Ok(());
                }
                writer.write_event(Event::Start(start)).map_err(xml_error)?;
                let element_tag = match self.version() {
                    ODataVersion::V4 => "m:element",
                    ODataVersion::V3 => "d:element",
                };
                let element_type = declared.map(TypeRef::element);
                for item in items {
                    self.property(writer, element_tag, item, element_type, false)?;
                }
                end_element(writer, tag)?;
            }
            Value::Complex(complex) => {
                let complex_type = self
                    .model
                    .resolve_complex_type(&complex.type_name)
                    .ok_or_else(|| UnknownTypeError::new(&complex.type_name))?;
                let actual = TypeRef::Complex(complex_type.qualified_name());
                if declared != Some(&actual) {
                    start.push_attribute(("m:type", self.type_label(&actual).as_str()));
                }
                writer.write_event(Event::Start(start)).map_err(xml_error)?;
                self.complex_members(writer, complex)?;
                end_element(writer, tag)?;
            }
            other => {
                let text = other.to_text(self.version()).unwrap_or_default();
                match self.value_type(other, None) {
                    Some(TypeRef::Primitive(PrimitiveType::String)) | None => {}
                    Some(t) => start.push_attribute(("m:type", self.type_label(&t).as_str())),
                }
                writer.write_event(Event::Start(start)).map_err(xml_error)?;
                writer
                    .write_event(Event::Text(BytesText::new(&text)))
                    .map_err(xml_error)?;
                end_element(writer, tag)?;
            }
        }
        Ok(())
    }

    fn complex_members(&self, writer: &mut XmlWriter, complex: &ComplexValue) -> Result<(), CodecError> {
        let complex_type = self
            .model
            .resolve_complex_type(&complex.type_name)
            .ok_or_else(|| UnknownTypeError::new(&complex.type_name))?;
        for (name, value) in &complex.properties {
            let declared = match complex_type.property(name) {
                Some(property) => {
                    value.check_facets(property)?;
                    Some(&property.type_ref)
                }
                None if complex_type.is_open => None,
                None => {
                    return Err(CodecError::malformed(format!(
                        "'{}' is not a property of '{}'",
                        name,
                        complex_type.qualified_name()
                    )));
                }
            };
            self.property(writer, &format!("d:{}", name), value, declared, false)?;
        }
        if complex_type.is_open {
            for (name, value) in &complex.extras {
                self.property(writer, &format!("d:{}", name), value, None, false)?;
            }
        }
        Ok(())
    }

    // -- reading ----------------------------------------------------------

    fn parse(text: &str) -> Result<Document<'_>, CodecError> {
        Document::parse(text).map_err(xml_error)
    }

    fn metadata_attr<'n>(node: Node<'n, '_>, name: &str) -> Option<&'n str> {
        node.attribute((ODataVersion::V4.metadata_namespace(), name))
            .or_else(|| node.attribute((ODataVersion::V3.metadata_namespace(), name)))
    }

    fn is_metadata(node: &Node, name: &str) -> bool {
        node.is_element()
            && node.tag_name().name() == name
            && matches!(
                node.tag_name().namespace(),
                Some(ns) if ns == ODataVersion::V4.metadata_namespace()
                    || ns == ODataVersion::V3.metadata_namespace()
            )
    }

    fn child<'n, 'i>(node: Node<'n, 'i>, name: &str) -> Option<Node<'n, 'i>> {
        node.children()
            .find(|c| c.is_element() && c.tag_name().name() == name)
    }

    pub fn read_entity(&self, text: &str, expected: &str) -> Result<EntityInstance, CodecError> {
        let doc = Self::parse(text)?;
        let root = doc.root_element();
        if root.tag_name().name() != "entry" {
            return Err(CodecError::malformed(format!(
                "expected <entry>, found <{}>",
                root.tag_name().name()
            )));
        }
        self.entry_node(root, expected)
    }

    pub fn read_collection(&self, text: &str, expected: &str) -> Result<EntityCollection, CodecError> {
        let doc = Self::parse(text)?;
        let root = doc.root_element();
        if root.tag_name().name() != "feed" {
            return Err(CodecError::malformed(format!(
                "expected <feed>, found <{}>",
                root.tag_name().name()
            )));
        }
        self.feed_node(root, expected)
    }

    pub fn read_value_payload(&self, text: &str, type_ref: &TypeRef) -> Result<Value, CodecError> {
        let doc = Self::parse(text)?;
        let root = doc.root_element();
        self.property_node(root, type_ref, None, root.tag_name().name())
    }

    fn feed_node(&self, feed: Node, expected: &str) -> Result<EntityCollection, CodecError> {
        let mut collection = EntityCollection::default();
        for child in feed.children().filter(Node::is_element) {
            match child.tag_name().name() {
                "entry" => collection.entities.push(self.entry_node(child, expected)?),
                "count" if Self::is_metadata(&child, "count") => {
                    collection.count = child.text().and_then(|t| t.trim().parse().ok());
                }
                "link" => match child.attribute("rel") {
                    Some("next") => collection.next_link = child.attribute("href").map(str::to_string),
                    Some(rel) if rel.ends_with("deltaLink") => {
                        collection.delta_link = child.attribute("href").map(str::to_string)
                    }
                    _ => {}
                },
                _ => {}
            }
        }
        Ok(collection)
    }

    fn entry_node(&self, entry: Node, expected: &str) -> Result<EntityInstance, CodecError> {
        let term = entry
            .children()
            .find(|c| c.is_element() && c.tag_name().name() == "category")
            .and_then(|c| c.attribute("term"));
        let type_name = match term {
            Some(term) => match self.model.resolve_type(term)? {
                TypeRef::Entity(name) => name,
                _ => return Err(UnknownTypeError::new(term).into()),
            },
            None => self.model.normalize_name(expected),
        };
        if !self.model.is_derived_from(&type_name, expected) {
            return Err(CodecError::malformed(format!(
                "entity of type '{}' where '{}' was expected",
                type_name, expected
            )));
        }
        let entity_type = self
            .model
            .resolve_entity_type(&type_name)
            .ok_or_else(|| UnknownTypeError::new(type_name.as_str()))?;

        let mut instance = EntityInstance::unchanged(entity_type.qualified_name());
        instance.etag = Self::metadata_attr(entry, "etag").map(str::to_string);
        instance.entity_id = Self::child(entry, "id")
            .and_then(|n| n.text())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        for link in entry
            .children()
            .filter(|c| c.is_element() && c.tag_name().name() == "link")
        {
            let Some(name) = link
                .attribute("rel")
                .and_then(|rel| rel.rsplit_once("/related/"))
                .map(|(_, name)| name)
            else {
                continue;
            };
            let Some(nav) = entity_type.navigation(name) else {
                continue;
            };
            // Deferred links carry no data
            let Some(inline) = link.children().find(|c| Self::is_metadata(c, "inline")) else {
                continue;
            };
            let value = match inline.children().find(Node::is_element) {
                None => NavigationValue::Entity(None),
                Some(child) if child.tag_name().name() == "feed" => {
                    NavigationValue::Entities(self.feed_node(child, &nav.target)?.entities)
                }
                Some(child) => {
                    NavigationValue::Entity(Some(Box::new(self.entry_node(child, &nav.target)?)))
                }
            };
            instance.navigation.insert(name.to_string(), value);
        }

        let properties = Self::child(entry, "content")
            .and_then(|c| c.children().find(|n| Self::is_metadata(n, "properties")))
            .or_else(|| entry.children().find(|n| Self::is_metadata(n, "properties")));

        if let Some(properties) = properties {
            for node in properties.children().filter(Node::is_element) {
                let name = node.tag_name().name();
                match entity_type.property(name) {
                    Some(property) => {
                        let value = self.property_node(node, &property.type_ref, Some(property), name)?;
                        instance.properties.insert(name.to_string(), value);
                    }
                    None if entity_type.is_open
                        || self.options.unknown_properties == UnknownPropertyPolicy::Retain =>
                    {
                        instance.extras.insert(name.to_string(), untyped_node(node));
                    }
                    None => log::debug!(
                        "Ignoring undeclared property '{}' of {}",
                        name,
                        entity_type.qualified_name()
                    ),
                }
            }
        }

        Ok(instance)
    }

    fn property_node(
        &self,
        node: Node,
        type_ref: &TypeRef,
        property: Option<&Property>,
        name: &str,
    ) -> Result<Value, CodecError> {
        if Self::metadata_attr(node, "null") == Some("true") {
            return Ok(Value::Null);
        }

        let invalid = |reason: String| CodecError::InvalidValue {
            property: name.to_string(),
            expected: type_ref.type_name(),
            reason,
        };

        let value = match type_ref {
            TypeRef::Collection(inner) => Value::Collection(
                node.children()
                    .filter(|c| c.is_element() && c.tag_name().name() == "element")
                    .map(|c| self.property_node(c, inner, property, name))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            TypeRef::Primitive(primitive) => {
                let value = Value::parse_text(node.text().unwrap_or(""), primitive).map_err(invalid)?;
                if let Some(property) = property {
                    value.check_facets(property)?;
                }
                value
            }
            TypeRef::Enum(enum_name) => {
                let text = node.text().unwrap_or("").trim().to_string();
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
            TypeRef::Complex(declared) => {
                let type_name = match Self::metadata_attr(node, "type") {
                    Some(annotated) => match self.model.resolve_type(annotated)? {
                        TypeRef::Complex(resolved) => resolved,
                        _ => return Err(UnknownTypeError::new(annotated).into()),
                    },
                    None => declared.clone(),
                };
                if !self.model.is_derived_from(&type_name, declared) {
                    return Err(invalid(format!("'{}' does not derive from '{}'", type_name, declared)));
                }
                let complex_type = self
                    .model
                    .resolve_complex_type(&type_name)
                    .ok_or_else(|| UnknownTypeError::new(type_name.as_str()))?;
                let mut complex = ComplexValue::new(complex_type.qualified_name());
                for member in node.children().filter(Node::is_element) {
                    let member_name = member.tag_name().name();
                    match complex_type.property(member_name) {
                        Some(p) => {
                            let value = self.property_node(member, &p.type_ref, Some(p), member_name)?;
                            complex.properties.insert(member_name.to_string(), value);
                        }
                        None if complex_type.is_open
                            || self.options.unknown_properties == UnknownPropertyPolicy::Retain =>
                        {
                            complex.extras.insert(member_name.to_string(), untyped_node(member));
                        }
                        None => {}
                    }
                }
                Value::Complex(complex)
            }
            TypeRef::Entity(_) => {
                return Err(invalid("entity values cannot appear as properties".to_string()));
            }
        };
        Ok(value)
    }
}

fn untyped_node(node: Node) -> Value {
    Value::Untyped(serde_json::Value::String(
        node.text().unwrap_or_default().to_string(),
    ))
}

fn start_element(writer: &mut XmlWriter, tag: &str) -> Result<(), CodecError> {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .map_err(xml_error)
}

fn end_element(writer: &mut XmlWriter, tag: &str) -> Result<(), CodecError> {
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .map_err(xml_error)
}

fn text_element(writer: &mut XmlWriter, tag: &str, text: &str) -> Result<(), CodecError> {
    start_element(writer, tag)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(xml_error)?;
    end_element(writer, tag)
}
