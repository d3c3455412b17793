//! Key predicates and URI literals
//!
//! Literal syntax differs between protocol versions: V4 writes most
//! primitives bare (`2024-01-31`, guids, offsets) while V3 wraps them in
//! typed prefixes (`datetime'..'`, `guid'..'`) and suffixes wide numbers
//! (`12L`, `1.5M`).

use std::borrow::Cow;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;

use crate::api::codec::{EntityInstance, EntityKey, EnumValue, Value};
use crate::api::constants::ODataVersion;
use crate::api::error::{IncompleteKeyError, RequestError, UnknownTypeError};
use crate::api::metadata::{MetadataModel, PrimitiveType, TypeRef};

/// Percent-encode literal content, keeping the quote doubling readable
fn encode_content(text: &str) -> String {
    urlencoding::encode(text).replace("%27", "'")
}

/// Quoted string literal with `'` doubled
fn quoted(text: &str) -> String {
    format!("'{}'", encode_content(&text.replace('\'', "''")))
}

/// URI literal for a value
pub fn literal(value: &Value, version: ODataVersion) -> Result<String, RequestError> {
    let text = |v: &Value| v.to_text(version).unwrap_or_default();
    let literal = match (value, version) {
        (Value::Null, _) => "null".to_string(),
        (Value::String(s), _) => quoted(s),
        (Value::Enum(e), ODataVersion::V4) => format!("{}'{}'", e.type_name, encode_content(&e.value)),
        (Value::Enum(e), ODataVersion::V3) => quoted(&e.value),
        (Value::Binary(bytes), ODataVersion::V4) => format!("binary'{}'", URL_SAFE.encode(bytes)),
        (Value::Binary(bytes), ODataVersion::V3) => {
            let hex: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
            format!("X'{}'", hex)
        }
        (Value::Duration(d), ODataVersion::V4) => format!("duration'{}'", d),
        (Value::Duration(d), ODataVersion::V3) => format!("time'{}'", d),
        (Value::DateTimeOffset(_), ODataVersion::V4) => encode_content(&text(value)),
        (Value::DateTimeOffset(_), ODataVersion::V3) => {
            format!("datetimeoffset'{}'", encode_content(&text(value)))
        }
        (Value::DateTime(_), ODataVersion::V3) => format!("datetime'{}'", text(value)),
        (Value::Guid(_), ODataVersion::V3) => format!("guid'{}'", text(value)),
        (Value::Int64(v), ODataVersion::V3) => format!("{}L", v),
        (Value::Decimal(_), ODataVersion::V3) => format!("{}M", text(value)),
        (Value::Double(_), ODataVersion::V3) => format!("{}d", text(value)),
        (Value::Single(_), ODataVersion::V3) => format!("{}f", text(value)),
        (Value::TimeOfDay(_), ODataVersion::V3) => format!("time'{}'", text(value)),
        (Value::Complex(_) | Value::Collection(_) | Value::Untyped(_), _) => {
            return Err(RequestError::InvalidPath(format!(
                "{} cannot be written as a URI literal",
                value
            )));
        }
        (other, _) => text(other),
    };
    Ok(literal)
}

/// Parse a URI literal of the given primitive type
pub fn parse_literal(
    text: &str,
    primitive: &PrimitiveType,
    version: ODataVersion,
) -> Result<Value, String> {
    let decoded: Cow<str> = urlencoding::decode(text).map_err(|e| e.to_string())?;
    let trimmed = decoded.trim();
    if trimmed == "null" {
        return Ok(Value::Null);
    }

    let unwrap_prefixed = |prefixes: &[&str]| -> Option<String> {
        prefixes.iter().find_map(|prefix| {
            let lower = trimmed.to_ascii_lowercase();
            lower
                .starts_with(&format!("{}'", prefix))
                .then(|| trimmed[prefix.len() + 1..].strip_suffix('\''))
                .flatten()
                .map(str::to_string)
        })
    };

    match primitive {
        PrimitiveType::String => {
            let inner = trimmed
                .strip_prefix('\'')
                .and_then(|t| t.strip_suffix('\''))
                .ok_or_else(|| format!("{} is not a quoted string", trimmed))?;
            Ok(Value::String(inner.replace("''", "'")))
        }
        PrimitiveType::Binary => {
            let hex = unwrap_prefixed(&["x"]).or_else(|| {
                unwrap_prefixed(&["binary"]).filter(|_| version == ODataVersion::V3)
            });
            if let Some(hex) = hex {
                return decode_hex(&hex)
                    .map(Value::Binary)
                    .ok_or_else(|| format!("{} is not a hex literal", trimmed));
            }
            let inner = unwrap_prefixed(&["binary"])
                .ok_or_else(|| format!("{} is not a binary literal", trimmed))?;
            Value::parse_text(&inner, primitive)
        }
        PrimitiveType::Guid => {
            let inner = unwrap_prefixed(&["guid"]).unwrap_or_else(|| trimmed.to_string());
            Value::parse_text(&inner, primitive)
        }
        PrimitiveType::DateTime => {
            let inner = unwrap_prefixed(&["datetime"]).unwrap_or_else(|| trimmed.to_string());
            Value::parse_text(&inner, primitive)
        }
        PrimitiveType::DateTimeOffset => {
            let inner = unwrap_prefixed(&["datetimeoffset"]).unwrap_or_else(|| trimmed.to_string());
            Value::parse_text(&inner, primitive)
        }
        PrimitiveType::Duration | PrimitiveType::TimeOfDay => {
            let inner = unwrap_prefixed(&["duration", "time"]).unwrap_or_else(|| trimmed.to_string());
            Value::parse_text(&inner, primitive)
        }
        PrimitiveType::Int64 => Value::parse_text(trimmed.trim_end_matches(['L', 'l']), primitive),
        PrimitiveType::Decimal => Value::parse_text(trimmed.trim_end_matches(['M', 'm']), primitive),
        PrimitiveType::Double => Value::parse_text(trimmed.trim_end_matches(['D', 'd']), primitive),
        PrimitiveType::Single => Value::parse_text(trimmed.trim_end_matches(['F', 'f']), primitive),
        other => Value::parse_text(trimmed, other),
    }
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

/// Key values of an instance in declared key order
pub fn key_of(model: &MetadataModel, entity: &EntityInstance) -> Result<EntityKey, IncompleteKeyError> {
    let key_properties = model.key_properties(&entity.type_name);
    let mut missing = Vec::new();
    let mut key = Vec::with_capacity(key_properties.len());
    for property in key_properties {
        match entity.get(&property.name) {
            Some(value) if !value.is_null() => key.push((property.name.clone(), value.clone())),
            _ => missing.push(property.name.clone()),
        }
    }
    if key.is_empty() && missing.is_empty() {
        missing.push("<key>".to_string());
    }
    if !missing.is_empty() {
        return Err(IncompleteKeyError {
            entity_type: entity.type_name.clone(),
            missing,
        });
    }
    Ok(EntityKey(key))
}

/// `(..)` key predicate for a key of `entity_type`
///
/// Single-part keys use the bare `(value)` form; composite keys are written
/// as `name=value` pairs in declared key order regardless of the order the
/// caller supplied them in.
pub fn key_predicate(
    model: &MetadataModel,
    entity_type: &str,
    key: &EntityKey,
    version: ODataVersion,
) -> Result<String, RequestError> {
    let key_properties = model.key_properties(entity_type);
    if key_properties.is_empty() {
        return Err(UnknownTypeError::new(entity_type).into());
    }

    if let Some((name, _)) = key
        .0
        .iter()
        .find(|(name, _)| !key_properties.iter().any(|p| p.name == *name))
    {
        return Err(RequestError::InvalidPath(format!(
            "'{}' is not a key property of '{}'",
            name, entity_type
        )));
    }

    let missing: Vec<String> = key_properties
        .iter()
        .filter(|p| key.get(&p.name).is_none_or(Value::is_null))
        .map(|p| p.name.clone())
        .collect();
    if !missing.is_empty() {
        return Err(IncompleteKeyError {
            entity_type: model.normalize_name(entity_type),
            missing,
        }
        .into());
    }

    let parts = key_properties
        .iter()
        .map(|p| {
            let value = key.get(&p.name).unwrap_or(&Value::Null);
            literal(value, version).map(|lit| (p.name.as_str(), lit))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(match parts.as_slice() {
        [(_, single)] => format!("({})", single),
        _ => format!(
            "({})",
            parts
                .iter()
                .map(|(name, lit)| format!("{}={}", name, lit))
                .collect::<Vec<_>>()
                .join(",")
        ),
    })
}

/// Split on commas that are not inside a quoted literal
fn split_parts(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '\'' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Inverse of [`key_predicate`]; accepts the text with or without parentheses
pub fn parse_key_predicate(
    model: &MetadataModel,
    entity_type: &str,
    predicate: &str,
) -> Result<EntityKey, RequestError> {
    let key_properties = model.key_properties(entity_type);
    let inner = predicate
        .trim()
        .strip_prefix('(')
        .and_then(|p| p.strip_suffix(')'))
        .unwrap_or(predicate);
    let version = model.version();

    let parse = |text: &str, name: &str| -> Result<Value, RequestError> {
        let property = key_properties
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| {
                RequestError::InvalidPath(format!("'{}' is not a key property of '{}'", name, entity_type))
            })?;
        match &property.type_ref {
            TypeRef::Primitive(primitive) => parse_literal(text, primitive, version)
                .map_err(|reason| RequestError::InvalidPath(format!("key '{}': {}", name, reason))),
            TypeRef::Enum(enum_type) => {
                let member = text
                    .find('\'')
                    .and_then(|start| text[start + 1..].strip_suffix('\''))
                    .unwrap_or(text);
                Ok(Value::Enum(EnumValue::new(enum_type.clone(), member)))
            }
            other => Err(RequestError::InvalidPath(format!(
                "key '{}' has non-primitive type {}",
                name,
                other.type_name()
            ))),
        }
    };

    let parts = split_parts(inner);
    let key = match (parts.as_slice(), key_properties.as_slice()) {
        ([single], [property]) if !single.contains('=') || single.trim_start().starts_with('\'') => {
            vec![(property.name.clone(), parse(single, &property.name)?)]
        }
        _ => parts
            .iter()
            .map(|part| {
                let (name, text) = part.split_once('=').ok_or_else(|| {
                    RequestError::InvalidPath(format!("malformed key predicate '{}'", predicate))
                })?;
                let name = name.trim();
                Ok((name.to_string(), parse(text, name)?))
            })
            .collect::<Result<Vec<_>, RequestError>>()?,
    };

    let missing: Vec<String> = key_properties
        .iter()
        .filter(|p| !key.iter().any(|(n, _)| *n == p.name))
        .map(|p| p.name.clone())
        .collect();
    if !missing.is_empty() {
        return Err(IncompleteKeyError {
            entity_type: model.normalize_name(entity_type),
            missing,
        }
        .into());
    }
    Ok(EntityKey(key))
}

/// Entity set and key named by an entity id or `Location` URI
pub fn parse_entity_id(model: &MetadataModel, uri: &str) -> Result<(String, EntityKey), RequestError> {
    let trimmed = uri.trim().trim_end_matches('/');
    let open = trimmed
        .rfind('(')
        .filter(|_| trimmed.ends_with(')'))
        .ok_or_else(|| RequestError::InvalidPath(format!("'{}' does not end in a key predicate", uri)))?;
    let head = &trimmed[..open];
    let set_name = head.rsplit('/').next().unwrap_or(head);
    let set = model
        .resolve_entity_set(set_name)
        .ok_or_else(|| RequestError::UnknownResource(set_name.to_string()))?;
    let key = parse_key_predicate(model, &set.entity_type, &trimmed[open..])?;
    Ok((set.name.clone(), key))
}
