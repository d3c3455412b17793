//! CSDL/EDMX document reader
//!
//! Reads the XML document into raw declarations without interpreting any
//! cross-reference; name resolution happens in the resolver. Both the V4
//! (OASIS) and V3 (Microsoft) EDMX dialects are accepted.

use roxmltree::{Document, Node};

use crate::api::constants::ODataVersion;
use crate::api::error::MetadataParseError;

#[derive(Debug, Clone)]
pub(crate) struct RawDocument {
    pub version: ODataVersion,
    pub schemas: Vec<RawSchema>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RawSchema {
    pub namespace: String,
    pub alias: Option<String>,
    pub entity_types: Vec<RawEntityType>,
    pub complex_types: Vec<RawComplexType>,
    pub enum_types: Vec<RawEnumType>,
    pub type_definitions: Vec<RawTypeDefinition>,
    pub associations: Vec<RawAssociation>,
    pub operations: Vec<RawOperation>,
    pub containers: Vec<RawContainer>,
}

#[derive(Debug, Clone)]
pub(crate) struct RawProperty {
    pub name: String,
    pub type_name: String,
    pub nullable: Option<bool>,
    pub max_length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub concurrency_token: bool,
    pub default_value: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct RawNavigation {
    pub name: String,
    /// V4 `Type` attribute
    pub type_name: Option<String>,
    pub nullable: Option<bool>,
    pub partner: Option<String>,
    pub contains_target: bool,
    /// V3 association reference
    pub relationship: Option<String>,
    pub from_role: Option<String>,
    pub to_role: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct RawEntityType {
    pub name: String,
    pub base_type: Option<String>,
    pub is_abstract: bool,
    pub is_open: bool,
    pub has_stream: bool,
    pub key: Option<Vec<String>>,
    pub properties: Vec<RawProperty>,
    pub navigations: Vec<RawNavigation>,
}

#[derive(Debug, Clone)]
pub(crate) struct RawComplexType {
    pub name: String,
    pub base_type: Option<String>,
    pub is_abstract: bool,
    pub is_open: bool,
    pub properties: Vec<RawProperty>,
}

#[derive(Debug, Clone)]
pub(crate) struct RawEnumType {
    pub name: String,
    pub underlying: Option<String>,
    pub is_flags: bool,
    pub members: Vec<(String, Option<i64>)>,
}

#[derive(Debug, Clone)]
pub(crate) struct RawTypeDefinition {
    pub name: String,
    pub underlying: String,
}

#[derive(Debug, Clone)]
pub(crate) struct RawAssociationEnd {
    pub role: String,
    pub type_name: String,
    pub multiplicity: String,
}

#[derive(Debug, Clone)]
pub(crate) struct RawAssociation {
    pub name: String,
    pub ends: Vec<RawAssociationEnd>,
}

#[derive(Debug, Clone)]
pub(crate) struct RawParameter {
    pub name: String,
    pub type_name: String,
    pub nullable: Option<bool>,
}

#[derive(Debug, Clone)]
pub(crate) struct RawOperation {
    pub name: String,
    pub is_action: bool,
    pub is_bound: bool,
    pub parameters: Vec<RawParameter>,
    pub return_type: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct RawEntitySet {
    pub name: String,
    pub entity_type: String,
    pub bindings: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub(crate) struct RawAssociationSet {
    pub name: String,
    pub association: String,
    /// (role, entity set)
    pub ends: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub(crate) struct RawImport {
    pub name: String,
    pub is_action: bool,
    /// V4 `Function`/`Action` attribute
    pub operation: Option<String>,
    pub entity_set: Option<String>,
    /// V3 inline signature
    pub return_type: Option<String>,
    pub parameters: Vec<RawParameter>,
}

#[derive(Debug, Clone)]
pub(crate) struct RawContainer {
    pub name: String,
    pub is_default: bool,
    pub entity_sets: Vec<RawEntitySet>,
    pub singletons: Vec<RawEntitySet>,
    pub association_sets: Vec<RawAssociationSet>,
    pub imports: Vec<RawImport>,
}

/// Parse an EDMX document into raw declarations
pub(crate) fn parse_document(text: &str) -> Result<RawDocument, MetadataParseError> {
    let doc = Document::parse(text)
        .map_err(|e| MetadataParseError::new(format!("invalid XML: {}", e)))?;
    let root = doc.root_element();

    if root.tag_name().name() != "Edmx" {
        return Err(MetadataParseError::new(format!(
            "root element is <{}>, expected <Edmx>",
            root.tag_name().name()
        )));
    }

    let version = match root.tag_name().namespace() {
        Some(ns) if ns == ODataVersion::V4.edmx_namespace() => ODataVersion::V4,
        Some(ns) if ns == ODataVersion::V3.edmx_namespace() => ODataVersion::V3,
        other => {
            return Err(MetadataParseError::new(format!(
                "unsupported EDMX namespace '{}'",
                other.unwrap_or("")
            )));
        }
    };

    let data_services = elements(root, "DataServices")
        .next()
        .ok_or_else(|| MetadataParseError::new("missing <DataServices> element"))?;

    let schemas = elements(data_services, "Schema")
        .map(|node| parse_schema(node, version))
        .collect::<Result<Vec<_>, _>>()?;

    if schemas.is_empty() {
        return Err(MetadataParseError::new("document declares no <Schema>"));
    }

    Ok(RawDocument { version, schemas })
}

fn parse_schema(node: Node, version: ODataVersion) -> Result<RawSchema, MetadataParseError> {
    let mut schema = RawSchema {
        namespace: required(node, "Namespace")?,
        alias: node.attribute("Alias").map(str::to_string),
        ..Default::default()
    };

    for child in node.children().filter(Node::is_element) {
        match child.tag_name().name() {
            "EntityType" => schema.entity_types.push(parse_entity_type(child)?),
            "ComplexType" => schema.complex_types.push(parse_complex_type(child)?),
            "EnumType" => schema.enum_types.push(parse_enum_type(child)?),
            "TypeDefinition" => schema.type_definitions.push(RawTypeDefinition {
                name: required(child, "Name")?,
                underlying: required(child, "UnderlyingType")?,
            }),
            "Association" => schema.associations.push(parse_association(child)?),
            "Function" | "Action" => schema.operations.push(parse_operation(child)?),
            "EntityContainer" => schema.containers.push(parse_container(child, version)?),
            // Annotations, terms and V3 "Using" carry nothing the engine interprets
            _ => {}
        }
    }

    Ok(schema)
}

fn parse_entity_type(node: Node) -> Result<RawEntityType, MetadataParseError> {
    let key = match elements(node, "Key").next() {
        Some(key) => Some(
            elements(key, "PropertyRef")
                .map(|r| required(r, "Name"))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        None => None,
    };

    Ok(RawEntityType {
        name: required(node, "Name")?,
        base_type: node.attribute("BaseType").map(str::to_string),
        is_abstract: bool_attr(node, "Abstract")?.unwrap_or(false),
        is_open: bool_attr(node, "OpenType")?.unwrap_or(false),
        has_stream: bool_attr(node, "HasStream")?.unwrap_or(false),
        key,
        properties: parse_properties(node)?,
        navigations: elements(node, "NavigationProperty")
            .map(parse_navigation)
            .collect::<Result<Vec<_>, _>>()?,
    })
}

fn parse_complex_type(node: Node) -> Result<RawComplexType, MetadataParseError> {
    Ok(RawComplexType {
        name: required(node, "Name")?,
        base_type: node.attribute("BaseType").map(str::to_string),
        is_abstract: bool_attr(node, "Abstract")?.unwrap_or(false),
        is_open: bool_attr(node, "OpenType")?.unwrap_or(false),
        properties: parse_properties(node)?,
    })
}

fn parse_properties(node: Node) -> Result<Vec<RawProperty>, MetadataParseError> {
    elements(node, "Property")
        .map(|p| {
            Ok(RawProperty {
                name: required(p, "Name")?,
                type_name: required(p, "Type")?,
                nullable: bool_attr(p, "Nullable")?,
                max_length: facet_attr(p, "MaxLength")?,
                precision: facet_attr(p, "Precision")?,
                scale: facet_attr(p, "Scale")?,
                concurrency_token: p
                    .attribute("ConcurrencyMode")
                    .map(|m| m.eq_ignore_ascii_case("fixed"))
                    .unwrap_or(false),
                default_value: p.attribute("DefaultValue").map(str::to_string),
            })
        })
        .collect()
}

fn parse_navigation(node: Node) -> Result<RawNavigation, MetadataParseError> {
    let navigation = RawNavigation {
        name: required(node, "Name")?,
        type_name: node.attribute("Type").map(str::to_string),
        nullable: bool_attr(node, "Nullable")?,
        partner: node.attribute("Partner").map(str::to_string),
        contains_target: bool_attr(node, "ContainsTarget")?.unwrap_or(false),
        relationship: node.attribute("Relationship").map(str::to_string),
        from_role: node.attribute("FromRole").map(str::to_string),
        to_role: node.attribute("ToRole").map(str::to_string),
    };

    if navigation.type_name.is_none()
        && (navigation.relationship.is_none() || navigation.to_role.is_none())
    {
        return Err(MetadataParseError::new(format!(
            "navigation property '{}' {} declares neither Type nor Relationship/ToRole",
            navigation.name,
            position(node)
        )));
    }

    Ok(navigation)
}

fn parse_enum_type(node: Node) -> Result<RawEnumType, MetadataParseError> {
    let members = elements(node, "Member")
        .map(|m| {
            let value = match m.attribute("Value") {
                Some(v) => Some(v.trim().parse::<i64>().map_err(|_| {
                    MetadataParseError::new(format!(
                        "enum member value '{}' {} is not an integer",
                        v,
                        position(m)
                    ))
                })?),
                None => None,
            };
            Ok((required(m, "Name")?, value))
        })
        .collect::<Result<Vec<_>, MetadataParseError>>()?;

    Ok(RawEnumType {
        name: required(node, "Name")?,
        underlying: node.attribute("UnderlyingType").map(str::to_string),
        is_flags: bool_attr(node, "IsFlags")?.unwrap_or(false),
        members,
    })
}

fn parse_association(node: Node) -> Result<RawAssociation, MetadataParseError> {
    let ends = elements(node, "End")
        .map(|end| {
            Ok(RawAssociationEnd {
                role: required(end, "Role")?,
                type_name: required(end, "Type")?,
                multiplicity: required(end, "Multiplicity")?,
            })
        })
        .collect::<Result<Vec<_>, MetadataParseError>>()?;

    Ok(RawAssociation {
        name: required(node, "Name")?,
        ends,
    })
}

fn parse_parameters(node: Node) -> Result<Vec<RawParameter>, MetadataParseError> {
    elements(node, "Parameter")
        .map(|p| {
            Ok(RawParameter {
                name: required(p, "Name")?,
                type_name: required(p, "Type")?,
                nullable: bool_attr(p, "Nullable")?,
            })
        })
        .collect()
}

fn parse_operation(node: Node) -> Result<RawOperation, MetadataParseError> {
    let return_type = match elements(node, "ReturnType").next() {
        Some(rt) => Some(required(rt, "Type")?),
        None => None,
    };

    Ok(RawOperation {
        name: required(node, "Name")?,
        is_action: node.tag_name().name() == "Action",
        is_bound: bool_attr(node, "IsBound")?.unwrap_or(false),
        parameters: parse_parameters(node)?,
        return_type,
    })
}

fn parse_container(node: Node, version: ODataVersion) -> Result<RawContainer, MetadataParseError> {
    let metadata_ns = ODataVersion::V3.metadata_namespace();
    let is_default = match version {
        ODataVersion::V3 => node
            .attribute((metadata_ns, "IsDefaultEntityContainer"))
            .map(|v| v == "true")
            .unwrap_or(false),
        ODataVersion::V4 => true,
    };

    let mut container = RawContainer {
        name: required(node, "Name")?,
        is_default,
        entity_sets: Vec::new(),
        singletons: Vec::new(),
        association_sets: Vec::new(),
        imports: Vec::new(),
    };

    for child in node.children().filter(Node::is_element) {
        match child.tag_name().name() {
            "EntitySet" => container.entity_sets.push(RawEntitySet {
                name: required(child, "Name")?,
                entity_type: required(child, "EntityType")?,
                bindings: parse_bindings(child)?,
            }),
            "Singleton" => container.singletons.push(RawEntitySet {
                name: required(child, "Name")?,
                entity_type: required(child, "Type")?,
                bindings: parse_bindings(child)?,
            }),
            "AssociationSet" => container.association_sets.push(RawAssociationSet {
                name: required(child, "Name")?,
                association: required(child, "Association")?,
                ends: elements(child, "End")
                    .map(|end| Ok((required(end, "Role")?, required(end, "EntitySet")?)))
                    .collect::<Result<Vec<_>, MetadataParseError>>()?,
            }),
            "FunctionImport" if version == ODataVersion::V3 => {
                let http_method = child.attribute((metadata_ns, "HttpMethod"));
                let is_action = match http_method {
                    Some(method) => method.eq_ignore_ascii_case("POST"),
                    None => bool_attr(child, "IsSideEffecting")?.unwrap_or(true),
                };
                container.imports.push(RawImport {
                    name: required(child, "Name")?,
                    is_action,
                    operation: None,
                    entity_set: child.attribute("EntitySet").map(str::to_string),
                    return_type: child.attribute("ReturnType").map(str::to_string),
                    parameters: parse_parameters(child)?,
                });
            }
            "FunctionImport" => container.imports.push(RawImport {
                name: required(child, "Name")?,
                is_action: false,
                operation: Some(required(child, "Function")?),
                entity_set: child.attribute("EntitySet").map(str::to_string),
                return_type: None,
                parameters: Vec::new(),
            }),
            "ActionImport" => container.imports.push(RawImport {
                name: required(child, "Name")?,
                is_action: true,
                operation: Some(required(child, "Action")?),
                entity_set: child.attribute("EntitySet").map(str::to_string),
                return_type: None,
                parameters: Vec::new(),
            }),
            _ => {}
        }
    }

    Ok(container)
}

fn parse_bindings(node: Node) -> Result<Vec<(String, String)>, MetadataParseError> {
    elements(node, "NavigationPropertyBinding")
        .map(|b| Ok((required(b, "Path")?, required(b, "Target")?)))
        .collect()
}

fn elements<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children()
        .filter(move |n| n.is_element() && n.tag_name().name() == name)
}

fn position(node: Node) -> String {
    let pos = node.document().text_pos_at(node.range().start);
    format!("at line {}, column {}", pos.row, pos.col)
}

fn required(node: Node, attribute: &str) -> Result<String, MetadataParseError> {
    node.attribute(attribute).map(str::to_string).ok_or_else(|| {
        MetadataParseError::new(format!(
            "<{}> {} is missing attribute '{}'",
            node.tag_name().name(),
            position(node),
            attribute
        ))
    })
}

fn bool_attr(node: Node, attribute: &str) -> Result<Option<bool>, MetadataParseError> {
    match node.attribute(attribute) {
        None => Ok(None),
        Some("true") => Ok(Some(true)),
        Some("false") => Ok(Some(false)),
        Some(other) => Err(MetadataParseError::new(format!(
            "attribute '{}' {} must be true or false, found '{}'",
            attribute,
            position(node),
            other
        ))),
    }
}

/// Numeric facet; symbolic values (`max`, `variable`, `floating`) map to `None`
fn facet_attr(node: Node, attribute: &str) -> Result<Option<u32>, MetadataParseError> {
    match node.attribute(attribute) {
        None => Ok(None),
        Some(v) if v.eq_ignore_ascii_case("max")
            || v.eq_ignore_ascii_case("variable")
            || v.eq_ignore_ascii_case("floating") =>
        {
            Ok(None)
        }
        Some(v) => v.trim().parse::<u32>().map(Some).map_err(|_| {
            MetadataParseError::new(format!(
                "facet '{}' {} has invalid value '{}'",
                attribute,
                position(node),
                v
            ))
        }),
    }
}
