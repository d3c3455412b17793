//! Payload formats and media type handling

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::api::constants::{ODataVersion, media};
use crate::api::error::UnsupportedFormatError;

/// Amount of control information requested in JSON payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JsonMetadata {
    None,
    Minimal,
    Full,
}

/// Wire format of a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Format {
    Json(JsonMetadata),
    /// Atom/XML legacy format
    Atom,
}

impl Default for Format {
    fn default() -> Self {
        Format::Json(JsonMetadata::Minimal)
    }
}

impl Format {
    pub fn json() -> Self {
        Format::Json(JsonMetadata::Minimal)
    }

    pub fn is_json(&self) -> bool {
        matches!(self, Format::Json(_))
    }

    /// Media type announced in `Accept` and `Content-Type`
    pub fn media_type(&self, version: ODataVersion, ieee754_compatible: bool) -> String {
        let mut media_type = match (self, version) {
            (Format::Atom, _) => media::APPLICATION_ATOM_XML.to_string(),
            (Format::Json(JsonMetadata::Minimal), v) => v.default_json_media_type().to_string(),
            (Format::Json(JsonMetadata::None), ODataVersion::V4) => {
                "application/json;odata.metadata=none".to_string()
            }
            (Format::Json(JsonMetadata::Full), ODataVersion::V4) => {
                "application/json;odata.metadata=full".to_string()
            }
            (Format::Json(JsonMetadata::None), ODataVersion::V3) => {
                "application/json;odata=nometadata".to_string()
            }
            (Format::Json(JsonMetadata::Full), ODataVersion::V3) => {
                "application/json;odata=fullmetadata".to_string()
            }
        };
        if ieee754_compatible && self.is_json() && version == ODataVersion::V4 {
            media_type.push_str(";IEEE754Compatible=true");
        }
        media_type
    }

    /// Format of a received `Content-Type`
    pub fn from_content_type(content_type: &str) -> Result<Self, UnsupportedFormatError> {
        let parsed = MediaType::parse(content_type)
            .ok_or_else(|| UnsupportedFormatError::new(content_type))?;
        match parsed.essence.as_str() {
            media::APPLICATION_JSON => {
                let level = parsed
                    .param("odata.metadata")
                    .or_else(|| parsed.param("metadata"))
                    .or_else(|| parsed.param("odata").map(|v| v.trim_end_matches("metadata")));
                Ok(Format::Json(match level.map(str::to_ascii_lowercase).as_deref() {
                    Some("none") | Some("no") => JsonMetadata::None,
                    Some("full") => JsonMetadata::Full,
                    _ => JsonMetadata::Minimal,
                }))
            }
            media::APPLICATION_ATOM_XML | media::APPLICATION_XML | "text/xml" => Ok(Format::Atom),
            _ => Err(UnsupportedFormatError::new(content_type)),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Format::Json(JsonMetadata::Minimal) => "json",
            Format::Json(JsonMetadata::None) => "json-none",
            Format::Json(JsonMetadata::Full) => "json-full",
            Format::Atom => "atom",
        };
        f.write_str(name)
    }
}

impl FromStr for Format {
    type Err = UnsupportedFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" | "json-minimal" => Ok(Format::Json(JsonMetadata::Minimal)),
            "json-none" => Ok(Format::Json(JsonMetadata::None)),
            "json-full" => Ok(Format::Json(JsonMetadata::Full)),
            "atom" | "xml" => Ok(Format::Atom),
            other if other.contains('/') => Format::from_content_type(other),
            other => Err(UnsupportedFormatError::new(other)),
        }
    }
}

impl TryFrom<String> for Format {
    type Error = UnsupportedFormatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Format> for String {
    fn from(format: Format) -> Self {
        format.to_string()
    }
}

/// A parsed `type/subtype; name=value` header value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    /// Lower-cased `type/subtype`
    pub essence: String,
    pub params: Vec<(String, String)>,
}

impl MediaType {
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split(';');
        let essence = parts.next()?.trim().to_ascii_lowercase();
        if !essence.contains('/') {
            return None;
        }
        let params = parts
            .filter_map(|p| {
                let (name, value) = p.split_once('=')?;
                Some((
                    name.trim().to_ascii_lowercase(),
                    value.trim().trim_matches('"').to_string(),
                ))
            })
            .collect();
        Some(Self { essence, params })
    }

    /// Parameter value, matched case-insensitively by name
    pub fn param(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.params
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn boundary(&self) -> Option<&str> {
        self.param("boundary")
    }

    pub fn is_multipart(&self) -> bool {
        self.essence.starts_with("multipart/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_per_version() {
        assert_eq!(
            Format::json().media_type(ODataVersion::V4, false),
            "application/json;odata.metadata=minimal"
        );
        assert_eq!(
            Format::json().media_type(ODataVersion::V3, false),
            "application/json;odata=minimalmetadata"
        );
        assert_eq!(
            Format::json().media_type(ODataVersion::V4, true),
            "application/json;odata.metadata=minimal;IEEE754Compatible=true"
        );
        assert_eq!(Format::Atom.media_type(ODataVersion::V4, true), "application/atom+xml");
    }

    #[test]
    fn test_from_content_type() {
        assert_eq!(
            Format::from_content_type("application/json; odata.metadata=full; charset=utf-8").unwrap(),
            Format::Json(JsonMetadata::Full)
        );
        assert_eq!(
            Format::from_content_type("application/json;odata=nometadata").unwrap(),
            Format::Json(JsonMetadata::None)
        );
        assert_eq!(
            Format::from_content_type("application/atom+xml;type=entry").unwrap(),
            Format::Atom
        );
        assert!(Format::from_content_type("text/csv").is_err());
    }

    #[test]
    fn test_boundary_parameter() {
        let media = MediaType::parse("multipart/mixed; boundary=\"batch_abc\"").unwrap();
        assert!(media.is_multipart());
        assert_eq!(media.boundary(), Some("batch_abc"));
    }

    #[test]
    fn test_format_names() {
        assert_eq!("atom".parse::<Format>().unwrap(), Format::Atom);
        assert_eq!(Format::Json(JsonMetadata::Full).to_string(), "json-full");
        assert!("yaml".parse::<Format>().is_err());
    }
}
