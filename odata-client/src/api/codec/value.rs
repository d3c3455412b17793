//! Typed property values
//!
//! A [`Value`] carries its own EDM type, so encoding never needs the metadata
//! model except to check declared facets. Text forms follow the payload
//! (not the URL literal) conventions; URL literals live in the request module.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use bigdecimal::BigDecimal;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::api::constants::ODataVersion;
use crate::api::error::CodecError;
use crate::api::metadata::{MetadataModel, PrimitiveType, Property, TypeRef};

static DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^-?P(?:\d+D)?(?:T(?:\d+H)?(?:\d+M)?(?:\d+(?:\.\d+)?S)?)?$")
        .expect("duration pattern is valid")
});

/// Value of an enum-typed property; `value` is a member name or flags list
#[derive(Debug, Clone, PartialEq)]
pub struct EnumValue {
    pub type_name: String,
    pub value: String,
}

impl EnumValue {
    pub fn new(type_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            value: value.into(),
        }
    }
}

/// Value of a complex-typed property
#[derive(Debug, Clone, PartialEq)]
pub struct ComplexValue {
    pub type_name: String,
    pub properties: IndexMap<String, Value>,
    /// Members the model does not declare, retained on request
    pub extras: IndexMap<String, Value>,
}

impl ComplexValue {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            properties: IndexMap::new(),
            extras: IndexMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Byte(u8),
    SByte(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Single(f32),
    Double(f64),
    Decimal(BigDecimal),
    String(String),
    Guid(Uuid),
    Binary(Vec<u8>),
    Date(NaiveDate),
    /// `Edm.DateTime` (OData 3.0), no offset
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
    TimeOfDay(NaiveTime),
    /// ISO 8601 duration text, e.g. `P2DT3H`
    Duration(String),
    Enum(EnumValue),
    Complex(ComplexValue),
    Collection(Vec<Value>),
    /// Spatial, stream and open-type values carried through as received
    Untyped(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Duration(s) => Some(s),
            Value::Enum(e) => Some(&e.value),
            Value::Untyped(serde_json::Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(v) => Some(i64::from(*v)),
            Value::SByte(v) => Some(i64::from(*v)),
            Value::Int16(v) => Some(i64::from(*v)),
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_complex(&self) -> Option<&ComplexValue> {
        match self {
            Value::Complex(c) => Some(c),
            _ => None,
        }
    }

    /// Parse a decimal literal without going through floating point
    pub fn decimal(text: &str) -> Result<Self, CodecError> {
        BigDecimal::from_str(text.trim())
            .map(Value::Decimal)
            .map_err(|e| CodecError::malformed(format!("invalid decimal '{}': {}", text, e)))
    }

    /// Primitive type carried by this value, `None` for structured values and null
    pub fn primitive_type(&self) -> Option<PrimitiveType> {
        let primitive = match self {
            Value::Boolean(_) => PrimitiveType::Boolean,
            Value::Byte(_) => PrimitiveType::Byte,
            Value::SByte(_) => PrimitiveType::SByte,
            Value::Int16(_) => PrimitiveType::Int16,
            Value::Int32(_) => PrimitiveType::Int32,
            Value::Int64(_) => PrimitiveType::Int64,
            Value::Single(_) => PrimitiveType::Single,
            Value::Double(_) => PrimitiveType::Double,
            Value::Decimal(_) => PrimitiveType::Decimal,
            Value::String(_) => PrimitiveType::String,
            Value::Guid(_) => PrimitiveType::Guid,
            Value::Binary(_) => PrimitiveType::Binary,
            Value::Date(_) => PrimitiveType::Date,
            Value::DateTime(_) => PrimitiveType::DateTime,
            Value::DateTimeOffset(_) => PrimitiveType::DateTimeOffset,
            Value::TimeOfDay(_) => PrimitiveType::TimeOfDay,
            Value::Duration(_) => PrimitiveType::Duration,
            Value::Null
            | Value::Enum(_)
            | Value::Complex(_)
            | Value::Collection(_)
            | Value::Untyped(_) => return None,
        };
        Some(primitive)
    }

    /// Payload text form of a primitive or enum value
    pub(crate) fn to_text(&self, version: ODataVersion) -> Option<String> {
        let text = match self {
            Value::Boolean(v) => v.to_string(),
            Value::Byte(v) => v.to_string(),
            Value::SByte(v) => v.to_string(),
            Value::Int16(v) => v.to_string(),
            Value::Int32(v) => v.to_string(),
            Value::Int64(v) => v.to_string(),
            Value::Single(v) => float_text(f64::from(*v), v.to_string()),
            Value::Double(v) => float_text(*v, v.to_string()),
            Value::Decimal(v) => v.to_plain_string(),
            Value::String(v) | Value::Duration(v) => v.clone(),
            Value::Guid(v) => v.hyphenated().to_string(),
            Value::Binary(v) => match version {
                ODataVersion::V4 => URL_SAFE.encode(v),
                ODataVersion::V3 => STANDARD.encode(v),
            },
            Value::Date(v) => v.format("%Y-%m-%d").to_string(),
            Value::DateTime(v) => {
                format!("{}{}", v.format("%Y-%m-%dT%H:%M:%S"), fraction(v.nanosecond()))
            }
            Value::DateTimeOffset(v) => {
                let offset = if v.offset().local_minus_utc() == 0 {
                    "Z".to_string()
                } else {
                    v.format("%:z").to_string()
                };
                format!(
                    "{}{}{}",
                    v.format("%Y-%m-%dT%H:%M:%S"),
                    fraction(v.nanosecond()),
                    offset
                )
            }
            Value::TimeOfDay(v) => {
                format!("{}{}", v.format("%H:%M:%S"), fraction(v.nanosecond()))
            }
            Value::Enum(e) => e.value.clone(),
            Value::Untyped(serde_json::Value::String(s)) => s.clone(),
            Value::Untyped(other) => other.to_string(),
            Value::Null | Value::Complex(_) | Value::Collection(_) => return None,
        };
        Some(text)
    }

    /// Parse the payload text form of a primitive, returning the reason on failure
    pub(crate) fn parse_text(text: &str, primitive: &PrimitiveType) -> Result<Self, String> {
        let invalid = |e: &dyn fmt::Display| format!("'{}' is not a valid {}: {}", text, primitive.edm_name(), e);
        let value = match primitive {
            PrimitiveType::Boolean => match text.trim() {
                "true" => Value::Boolean(true),
                "false" => Value::Boolean(false),
                other => return Err(format!("'{}' is not a boolean", other)),
            },
            PrimitiveType::Byte => Value::Byte(text.trim().parse().map_err(|e| invalid(&e))?),
            PrimitiveType::SByte => Value::SByte(text.trim().parse().map_err(|e| invalid(&e))?),
            PrimitiveType::Int16 => Value::Int16(text.trim().parse().map_err(|e| invalid(&e))?),
            PrimitiveType::Int32 => Value::Int32(text.trim().parse().map_err(|e| invalid(&e))?),
            PrimitiveType::Int64 => Value::Int64(text.trim().parse().map_err(|e| invalid(&e))?),
            PrimitiveType::Single => Value::Single(match special_float(text) {
                Some(v) => v as f32,
                None => text.trim().parse().map_err(|e| invalid(&e))?,
            }),
            PrimitiveType::Double => Value::Double(match special_float(text) {
                Some(v) => v,
                None => text.trim().parse().map_err(|e| invalid(&e))?,
            }),
            PrimitiveType::Decimal => {
                Value::Decimal(BigDecimal::from_str(text.trim()).map_err(|e| invalid(&e))?)
            }
            PrimitiveType::String => Value::String(text.to_string()),
            PrimitiveType::Guid => Value::Guid(Uuid::parse_str(text.trim()).map_err(|e| invalid(&e))?),
            PrimitiveType::Binary => Value::Binary(decode_base64(text.trim()).ok_or_else(|| {
                format!("'{}' is not base64 encoded", text)
            })?),
            PrimitiveType::Date => Value::Date(
                NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").map_err(|e| invalid(&e))?,
            ),
            PrimitiveType::DateTime => {
                let trimmed = text.trim().trim_end_matches('Z');
                let parsed = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
                    .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M"))
                    .map_err(|e| invalid(&e))?;
                Value::DateTime(parsed)
            }
            PrimitiveType::DateTimeOffset => Value::DateTimeOffset(
                DateTime::parse_from_rfc3339(text.trim()).map_err(|e| invalid(&e))?,
            ),
            PrimitiveType::TimeOfDay => {
                let trimmed = text.trim();
                let parsed = NaiveTime::parse_from_str(trimmed, "%H:%M:%S%.f")
                    .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
                    .map_err(|e| invalid(&e))?;
                Value::TimeOfDay(parsed)
            }
            PrimitiveType::Duration => {
                let trimmed = text.trim();
                if !DURATION.is_match(trimmed) || trimmed.ends_with('P') || trimmed.ends_with('T') {
                    return Err(format!("'{}' is not an ISO 8601 duration", text));
                }
                Value::Duration(trimmed.to_string())
            }
            PrimitiveType::Stream | PrimitiveType::Spatial(_) => {
                Value::Untyped(serde_json::Value::String(text.to_string()))
            }
        };
        Ok(value)
    }

    /// JSON form of a primitive or enum value
    ///
    /// Int64 and Decimal are written as strings for OData 3.0 and whenever
    /// IEEE754-compatible output is requested.
    pub(crate) fn primitive_to_json(
        &self,
        version: ODataVersion,
        ieee754_compatible: bool,
    ) -> Result<serde_json::Value, CodecError> {
        use serde_json::Value as Json;

        let quote_wide = ieee754_compatible || version == ODataVersion::V3;
        let number = |text: String| -> Result<Json, CodecError> {
            text.parse::<serde_json::Number>()
                .map(Json::Number)
                .map_err(|e| CodecError::malformed(format!("'{}' is not a JSON number: {}", text, e)))
        };

        let json = match self {
            Value::Null => Json::Null,
            Value::Boolean(v) => Json::Bool(*v),
            Value::Byte(v) => Json::from(*v),
            Value::SByte(v) => Json::from(*v),
            Value::Int16(v) => Json::from(*v),
            Value::Int32(v) => Json::from(*v),
            Value::Int64(v) if quote_wide => Json::String(v.to_string()),
            Value::Int64(v) => Json::from(*v),
            Value::Single(v) if v.is_finite() => number(v.to_string())?,
            Value::Double(v) if v.is_finite() => number(v.to_string())?,
            Value::Decimal(v) if quote_wide => Json::String(v.to_plain_string()),
            Value::Decimal(v) => number(v.to_plain_string())?,
            Value::Untyped(v) => v.clone(),
            Value::Complex(_) | Value::Collection(_) => {
                return Err(CodecError::malformed(
                    "structured value passed where a primitive is expected",
                ));
            }
            other => Json::String(other.to_text(version).unwrap_or_default()),
        };
        Ok(json)
    }

    /// Decode a JSON primitive for the declared type
    pub(crate) fn primitive_from_json(
        json: &serde_json::Value,
        primitive: &PrimitiveType,
    ) -> Result<Self, String> {
        use serde_json::Value as Json;

        match (primitive, json) {
            (_, Json::Null) => Ok(Value::Null),
            (PrimitiveType::Boolean, Json::Bool(b)) => Ok(Value::Boolean(*b)),
            (PrimitiveType::Stream | PrimitiveType::Spatial(_), other) => {
                Ok(Value::Untyped(other.clone()))
            }
            // Exact literal text, so arbitrary precision survives
            (_, Json::Number(n)) => match primitive {
                PrimitiveType::Byte
                | PrimitiveType::SByte
                | PrimitiveType::Int16
                | PrimitiveType::Int32
                | PrimitiveType::Int64
                | PrimitiveType::Single
                | PrimitiveType::Double
                | PrimitiveType::Decimal => Value::parse_text(&n.to_string(), primitive),
                other => Err(format!("number {} is not a valid {}", n, other.edm_name())),
            },
            (PrimitiveType::String, Json::String(s)) => Ok(Value::String(s.clone())),
            (_, Json::String(s)) => match primitive {
                PrimitiveType::Boolean => Err(format!("'{}' is not a boolean", s)),
                _ => Value::parse_text(s, primitive),
            },
            (p, other) => Err(format!("{} is not a valid {}", other, p.edm_name())),
        }
    }

    /// Check declared facets, rejecting values that would lose data
    pub(crate) fn check_facets(&self, property: &Property) -> Result<(), CodecError> {
        let reject = |reason: String| CodecError::InvalidValue {
            property: property.name.clone(),
            expected: property.type_ref.type_name(),
            reason,
        };

        match self {
            Value::Collection(items) => items.iter().try_for_each(|v| v.check_facets(property)),
            Value::Decimal(d) => {
                let normalized = d.normalized();
                let (_, scale) = normalized.as_bigint_and_exponent();
                let digits = normalized.digits() as i64;
                if let Some(max_scale) = property.scale
                    && scale > i64::from(max_scale)
                {
                    return Err(reject(format!(
                        "{} fractional digits exceed scale {}",
                        scale, max_scale
                    )));
                }
                if let Some(precision) = property.precision {
                    let total = (digits - scale).max(0) + scale.max(0);
                    if total > i64::from(precision) {
                        return Err(reject(format!(
                            "{} digits exceed precision {}",
                            total, precision
                        )));
                    }
                }
                Ok(())
            }
            Value::DateTimeOffset(v) => check_fraction(v.nanosecond(), property, reject),
            Value::DateTime(v) => check_fraction(v.nanosecond(), property, reject),
            Value::TimeOfDay(v) => check_fraction(v.nanosecond(), property, reject),
            Value::String(s) => match property.max_length {
                Some(max) if s.chars().count() > max as usize => Err(reject(format!(
                    "{} characters exceed max length {}",
                    s.chars().count(),
                    max
                ))),
                _ => Ok(()),
            },
            Value::Binary(b) => match property.max_length {
                Some(max) if b.len() > max as usize => Err(reject(format!(
                    "{} bytes exceed max length {}",
                    b.len(),
                    max
                ))),
                _ => Ok(()),
            },
            _ => Ok(()),
        }
    }

    /// Whether the value may be assigned to a member of the given type
    ///
    /// Integer widening and Single to Double are accepted; nullability is
    /// the caller's concern.
    pub fn conforms_to(&self, type_ref: &TypeRef, model: &MetadataModel) -> bool {
        match (self, type_ref) {
            (Value::Null, _) => true,
            (Value::Collection(items), TypeRef::Collection(inner)) => {
                items.iter().all(|v| !v.is_null() && v.conforms_to(inner, model))
            }
            (Value::Complex(c), TypeRef::Complex(name)) => {
                let Some(complex) = model.resolve_complex_type(&c.type_name) else {
                    return false;
                };
                model.is_derived_from(&complex.qualified_name(), name)
                    && c.properties.iter().all(|(k, v)| match complex.property(k) {
                        Some(p) => v.conforms_to(&p.type_ref, model),
                        None => complex.is_open,
                    })
            }
            (Value::Enum(e), TypeRef::Enum(name)) => {
                model.normalize_name(&e.type_name) == *name
                    && model
                        .resolve_enum_type(name)
                        .map(|t| t.accepts(&e.value))
                        .unwrap_or(false)
            }
            (Value::Untyped(_), TypeRef::Primitive(PrimitiveType::Stream | PrimitiveType::Spatial(_))) => true,
            (value, TypeRef::Primitive(declared)) => match (value.primitive_type(), declared) {
                (Some(actual), declared) if actual == *declared => true,
                (Some(PrimitiveType::Byte), PrimitiveType::Int16 | PrimitiveType::Int32 | PrimitiveType::Int64) => true,
                (Some(PrimitiveType::SByte), PrimitiveType::Int16 | PrimitiveType::Int32 | PrimitiveType::Int64) => true,
                (Some(PrimitiveType::Int16), PrimitiveType::Int32 | PrimitiveType::Int64) => true,
                (Some(PrimitiveType::Int32), PrimitiveType::Int64) => true,
                (Some(PrimitiveType::Single), PrimitiveType::Double) => true,
                _ => false,
            },
            _ => false,
        }
    }
}

fn float_text(value: f64, text: String) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() && value > 0.0 {
        "INF".to_string()
    } else if value.is_infinite() {
        "-INF".to_string()
    } else {
        text
    }
}

fn special_float(text: &str) -> Option<f64> {
    match text.trim() {
        "NaN" => Some(f64::NAN),
        "INF" => Some(f64::INFINITY),
        "-INF" => Some(f64::NEG_INFINITY),
        _ => None,
    }
}

/// Significant fractional-second digits
fn fraction_digits(nanos: u32) -> u32 {
    if nanos == 0 {
        return 0;
    }
    let mut digits = 9;
    let mut rest = nanos;
    while rest % 10 == 0 {
        rest /= 10;
        digits -= 1;
    }
    digits
}

fn fraction(nanos: u32) -> String {
    let nanos = nanos % 1_000_000_000;
    match fraction_digits(nanos) {
        0 => String::new(),
        digits => {
            let full = format!("{:09}", nanos);
            format!(".{}", &full[..digits as usize])
        }
    }
}

fn check_fraction(
    nanos: u32,
    property: &Property,
    reject: impl Fn(String) -> CodecError,
) -> Result<(), CodecError> {
    match property.precision {
        Some(precision) if fraction_digits(nanos % 1_000_000_000) > precision => Err(reject(format!(
            "{} fractional-second digits exceed precision {}",
            fraction_digits(nanos % 1_000_000_000),
            precision
        ))),
        _ => Ok(()),
    }
}

pub(crate) fn decode_base64(text: &str) -> Option<Vec<u8>> {
    STANDARD
        .decode(text)
        .or_else(|_| URL_SAFE.decode(text))
        .or_else(|_| STANDARD_NO_PAD.decode(text))
        .or_else(|_| URL_SAFE_NO_PAD.decode(text))
        .ok()
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<BigDecimal> for Value {
    fn from(v: BigDecimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Guid(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Value::DateTimeOffset(v)
    }
}

impl From<EnumValue> for Value {
    fn from(v: EnumValue) -> Self {
        Value::Enum(v)
    }
}

impl From<ComplexValue> for Value {
    fn from(v: ComplexValue) -> Self {
        Value::Complex(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Collection(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Complex(c) => write!(f, "{} {{{} properties}}", c.type_name, c.properties.len()),
            Value::Collection(items) => write!(f, "[{} items]", items.len()),
            other => write!(f, "{}", other.to_text(ODataVersion::V4).unwrap_or_default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn property(type_ref: TypeRef, precision: Option<u32>, scale: Option<u32>) -> Property {
        Property {
            name: "P".to_string(),
            type_ref,
            nullable: true,
            max_length: None,
            precision,
            scale,
            concurrency_token: false,
            default_value: None,
        }
    }

    #[test]
    fn test_int64_keeps_full_precision() {
        let json: serde_json::Value = serde_json::from_str("9007199254740993").unwrap();
        let value = Value::primitive_from_json(&json, &PrimitiveType::Int64).unwrap();
        assert_eq!(value, Value::Int64(9_007_199_254_740_993));
    }

    #[test]
    fn test_decimal_reads_exact_literal() {
        let json: serde_json::Value = serde_json::from_str("12345678901234567890.123456789").unwrap();
        let value = Value::primitive_from_json(&json, &PrimitiveType::Decimal).unwrap();
        assert_eq!(
            value.to_text(ODataVersion::V4).unwrap(),
            "12345678901234567890.123456789"
        );
    }

    #[test]
    fn test_wide_numbers_quoted_when_ieee754() {
        let value = Value::Int64(42);
        assert_eq!(value.primitive_to_json(ODataVersion::V4, true).unwrap(), json!("42"));
        assert_eq!(value.primitive_to_json(ODataVersion::V4, false).unwrap(), json!(42));
        assert_eq!(value.primitive_to_json(ODataVersion::V3, false).unwrap(), json!("42"));
    }

    #[test]
    fn test_special_doubles_as_strings() {
        assert_eq!(
            Value::Double(f64::NAN).primitive_to_json(ODataVersion::V4, false).unwrap(),
            json!("NaN")
        );
        assert_eq!(
            Value::Double(f64::NEG_INFINITY)
                .primitive_to_json(ODataVersion::V4, false)
                .unwrap(),
            json!("-INF")
        );
        let parsed = Value::primitive_from_json(&json!("INF"), &PrimitiveType::Double).unwrap();
        assert_eq!(parsed, Value::Double(f64::INFINITY));
    }

    #[test]
    fn test_datetimeoffset_keeps_fraction_and_offset() {
        let value =
            Value::parse_text("2024-03-01T10:15:30.1234567+02:00", &PrimitiveType::DateTimeOffset)
                .unwrap();
        assert_eq!(
            value.to_text(ODataVersion::V4).unwrap(),
            "2024-03-01T10:15:30.1234567+02:00"
        );
    }

    #[test]
    fn test_fraction_beyond_precision_rejected() {
        let value =
            Value::parse_text("2024-03-01T10:15:30.123Z", &PrimitiveType::DateTimeOffset).unwrap();
        let strict = property(TypeRef::Primitive(PrimitiveType::DateTimeOffset), Some(2), None);
        assert!(matches!(
            value.check_facets(&strict),
            Err(CodecError::InvalidValue { .. })
        ));
        let loose = property(TypeRef::Primitive(PrimitiveType::DateTimeOffset), Some(3), None);
        assert!(value.check_facets(&loose).is_ok());
    }

    #[test]
    fn test_decimal_scale_rejected_not_truncated() {
        let scale_two = property(TypeRef::Primitive(PrimitiveType::Decimal), None, Some(2));
        assert!(Value::decimal("1.234").unwrap().check_facets(&scale_two).is_err());
        assert!(Value::decimal("1.230").unwrap().check_facets(&scale_two).is_ok());
        assert!(Value::decimal("100").unwrap().check_facets(&scale_two).is_ok());
    }

    #[test]
    fn test_binary_accepts_both_alphabets() {
        let url = Value::parse_text("_-8", &PrimitiveType::Binary).unwrap();
        let standard = Value::parse_text("/+8=", &PrimitiveType::Binary).unwrap();
        assert_eq!(url, standard);
        assert_eq!(Value::Binary(vec![0xff, 0xef]).to_text(ODataVersion::V3).unwrap(), "/+8=");
    }

    #[test]
    fn test_duration_validation() {
        assert!(Value::parse_text("P1DT2H30M", &PrimitiveType::Duration).is_ok());
        assert!(Value::parse_text("PT0.5S", &PrimitiveType::Duration).is_ok());
        assert!(Value::parse_text("1 day", &PrimitiveType::Duration).is_err());
        assert!(Value::parse_text("P", &PrimitiveType::Duration).is_err());
    }

    #[test]
    fn test_widening_conformance() {
        let model = MetadataModel::parse(crate::api::metadata::fixtures::V4_METADATA).unwrap();
        let int64 = TypeRef::Primitive(PrimitiveType::Int64);
        assert!(Value::Int32(1).conforms_to(&int64, &model));
        assert!(!Value::String("1".into()).conforms_to(&int64, &model));
        let tier = TypeRef::Enum("Demo.Services.Tier".into());
        assert!(Value::Enum(EnumValue::new("Demo.Tier", "Gold")).conforms_to(&tier, &model));
        assert!(!Value::Enum(EnumValue::new("Demo.Tier", "Platinum")).conforms_to(&tier, &model));
    }
}
