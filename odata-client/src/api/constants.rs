//! Protocol constants shared by the request builder, codecs and batch processor
//!
//! Header names and media types are plain protocol identifiers; the only logic
//! here is the version-specific selection of reserved values and a canonical
//! name lookup table built once per process.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// HTTP and OData header names
pub mod headers {
    pub const ACCEPT: &str = "Accept";
    pub const ACCEPT_CHARSET: &str = "Accept-Charset";
    pub const ACCEPT_ENCODING: &str = "Accept-Encoding";
    pub const ACCEPT_LANGUAGE: &str = "Accept-Language";
    pub const ALLOW: &str = "Allow";
    pub const AUTHORIZATION: &str = "Authorization";
    pub const CACHE_CONTROL: &str = "Cache-Control";
    pub const CONTENT_ENCODING: &str = "Content-Encoding";
    pub const CONTENT_LANGUAGE: &str = "Content-Language";
    pub const CONTENT_ID: &str = "Content-ID";
    pub const CONTENT_LENGTH: &str = "Content-Length";
    pub const CONTENT_LOCATION: &str = "Content-Location";
    pub const CONTENT_TRANSFER_ENCODING: &str = "Content-Transfer-Encoding";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const DATE: &str = "Date";
    pub const ETAG: &str = "ETag";
    pub const EXPECT: &str = "Expect";
    pub const EXPIRES: &str = "Expires";
    pub const FROM: &str = "From";
    pub const HOST: &str = "Host";
    pub const IF_MATCH: &str = "If-Match";
    pub const IF_MODIFIED_SINCE: &str = "If-Modified-Since";
    pub const IF_NONE_MATCH: &str = "If-None-Match";
    pub const IF_UNMODIFIED_SINCE: &str = "If-Unmodified-Since";
    pub const LAST_MODIFIED: &str = "Last-Modified";
    pub const LOCATION: &str = "Location";
    pub const LINK: &str = "Link";
    pub const MAX_FORWARDS: &str = "Max-Forwards";
    pub const PREFER: &str = "Prefer";
    pub const PREFERENCE_APPLIED: &str = "Preference-Applied";
    pub const RANGE: &str = "Range";
    pub const RETRY_AFTER: &str = "Retry-After";
    pub const TE: &str = "TE";
    pub const USER_AGENT: &str = "User-Agent";
    pub const VARY: &str = "Vary";
    pub const WWW_AUTHENTICATE: &str = "WWW-Authenticate";
    pub const COOKIE: &str = "Cookie";
    pub const SET_COOKIE: &str = "Set-Cookie";
    pub const X_HTTP_METHOD: &str = "X-HTTP-Method";
    pub const X_HTTP_METHOD_OVERRIDE: &str = "X-HTTP-Method-Override";
    pub const ODATA_VERSION: &str = "OData-Version";
    pub const ODATA_MAX_VERSION: &str = "OData-MaxVersion";
    pub const ODATA_ENTITY_ID: &str = "OData-EntityID";
    pub const DATA_SERVICE_VERSION: &str = "DataServiceVersion";
    pub const MAX_DATA_SERVICE_VERSION: &str = "MaxDataServiceVersion";
    pub const DATA_SERVICE_ID: &str = "DataServiceId";
}

/// Media types understood by the codecs
pub mod media {
    pub const APPLICATION_JSON: &str = "application/json";
    pub const APPLICATION_XML: &str = "application/xml";
    pub const APPLICATION_ATOM_XML: &str = "application/atom+xml";
    pub const APPLICATION_HTTP: &str = "application/http";
    pub const APPLICATION_OCTET_STREAM: &str = "application/octet-stream";
    pub const MULTIPART_MIXED: &str = "multipart/mixed";
    pub const TEXT_PLAIN: &str = "text/plain";
}

/// Well-known resource path segments
pub const METADATA_SEGMENT: &str = "$metadata";
pub const BATCH_SEGMENT: &str = "$batch";

static CANONICAL_HEADERS: Lazy<HashMap<String, &'static str>> = Lazy::new(|| {
    use headers::*;
    [
        ACCEPT, ACCEPT_CHARSET, ACCEPT_ENCODING, ACCEPT_LANGUAGE, ALLOW, AUTHORIZATION,
        CACHE_CONTROL, CONTENT_ENCODING, CONTENT_LANGUAGE, CONTENT_ID, CONTENT_LENGTH,
        CONTENT_LOCATION, CONTENT_TRANSFER_ENCODING, CONTENT_TYPE, DATE, ETAG, EXPECT, EXPIRES,
        FROM, HOST, IF_MATCH, IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_UNMODIFIED_SINCE,
        LAST_MODIFIED, LOCATION, LINK, MAX_FORWARDS, PREFER, PREFERENCE_APPLIED, RANGE,
        RETRY_AFTER, TE, USER_AGENT, VARY, WWW_AUTHENTICATE, COOKIE, SET_COOKIE, X_HTTP_METHOD,
        X_HTTP_METHOD_OVERRIDE, ODATA_VERSION, ODATA_MAX_VERSION, ODATA_ENTITY_ID,
        DATA_SERVICE_VERSION, MAX_DATA_SERVICE_VERSION, DATA_SERVICE_ID,
    ]
    .into_iter()
    .map(|name| (name.to_ascii_lowercase(), name))
    .collect()
});

/// Canonical spelling of a header name
///
/// Registered names keep their protocol spelling (`OData-EntityID`, `ETag`);
/// anything else is title-cased per dash-separated segment.
pub fn canonical_header_name(name: &str) -> String {
    if let Some(known) = CANONICAL_HEADERS.get(&name.to_ascii_lowercase()) {
        return (*known).to_string();
    }

    name.split('-')
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Supported protocol major versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ODataVersion {
    V3,
    V4,
}

impl ODataVersion {
    /// Header carrying the protocol version of a request or response
    pub fn version_header(self) -> &'static str {
        match self {
            Self::V3 => headers::DATA_SERVICE_VERSION,
            Self::V4 => headers::ODATA_VERSION,
        }
    }

    /// Header announcing the highest version the client accepts
    pub fn max_version_header(self) -> &'static str {
        match self {
            Self::V3 => headers::MAX_DATA_SERVICE_VERSION,
            Self::V4 => headers::ODATA_MAX_VERSION,
        }
    }

    /// Header carrying the id of an entity created without a response body
    pub fn entity_id_header(self) -> &'static str {
        match self {
            Self::V3 => headers::DATA_SERVICE_ID,
            Self::V4 => headers::ODATA_ENTITY_ID,
        }
    }

    pub fn header_value(self) -> &'static str {
        match self {
            Self::V3 => "3.0",
            Self::V4 => "4.0",
        }
    }

    /// Default JSON media type for payloads of this version
    pub fn default_json_media_type(self) -> &'static str {
        match self {
            Self::V3 => "application/json;odata=minimalmetadata",
            Self::V4 => "application/json;odata.metadata=minimal",
        }
    }

    pub fn edmx_namespace(self) -> &'static str {
        match self {
            Self::V3 => "http://schemas.microsoft.com/ado/2007/06/edmx",
            Self::V4 => "http://docs.oasis-open.org/odata/ns/edmx",
        }
    }

    /// Namespace of data elements (`d:`) in Atom payloads
    pub fn data_namespace(self) -> &'static str {
        match self {
            Self::V3 => "http://schemas.microsoft.com/ado/2007/08/dataservices",
            Self::V4 => "http://docs.oasis-open.org/odata/ns/data",
        }
    }

    /// Namespace of metadata attributes (`m:`) in Atom payloads and V3 EDMX
    pub fn metadata_namespace(self) -> &'static str {
        match self {
            Self::V3 => "http://schemas.microsoft.com/ado/2007/08/dataservices/metadata",
            Self::V4 => "http://docs.oasis-open.org/odata/ns/metadata",
        }
    }

    /// Scheme used by Atom `category` elements carrying the entity type
    pub fn scheme_namespace(self) -> &'static str {
        match self {
            Self::V3 => "http://schemas.microsoft.com/ado/2007/08/dataservices/scheme",
            Self::V4 => "http://docs.oasis-open.org/odata/ns/scheme",
        }
    }

    /// Prefix of Atom link relations for navigation properties
    pub fn related_link_prefix(self) -> &'static str {
        match self {
            Self::V3 => "http://schemas.microsoft.com/ado/2007/08/dataservices/related/",
            Self::V4 => "http://docs.oasis-open.org/odata/ns/related/",
        }
    }

    /// Version announced by a response header value such as `4.0` or `3.0;`
    pub fn from_header_value(value: &str) -> Option<Self> {
        let major = value.trim().trim_end_matches(';').split('.').next()?;
        match major.trim() {
            "3" => Some(Self::V3),
            "4" => Some(Self::V4),
            _ => None,
        }
    }
}

impl fmt::Display for ODataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OData {}", self.header_value())
    }
}

impl FromStr for ODataVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "3" | "3.0" | "v3" => Ok(Self::V3),
            "4" | "4.0" | "4.01" | "v4" => Ok(Self::V4),
            other => Err(format!("unsupported protocol version '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_registered_names() {
        assert_eq!(canonical_header_name("odata-entityid"), "OData-EntityID");
        assert_eq!(canonical_header_name("ETAG"), "ETag");
        assert_eq!(canonical_header_name("content-id"), "Content-ID");
    }

    #[test]
    fn test_canonical_unknown_names() {
        assert_eq!(canonical_header_name("x-custom-thing"), "X-Custom-Thing");
    }

    #[test]
    fn test_version_headers() {
        assert_eq!(ODataVersion::V4.version_header(), "OData-Version");
        assert_eq!(ODataVersion::V3.version_header(), "DataServiceVersion");
        assert_eq!(ODataVersion::V3.max_version_header(), "MaxDataServiceVersion");
        assert_eq!(ODataVersion::V4.entity_id_header(), "OData-EntityID");
    }

    #[test]
    fn test_version_parsing() {
        assert_eq!("v4".parse::<ODataVersion>().unwrap(), ODataVersion::V4);
        assert_eq!("3.0".parse::<ODataVersion>().unwrap(), ODataVersion::V3);
        assert!("5".parse::<ODataVersion>().is_err());
        assert_eq!(ODataVersion::from_header_value("3.0;"), Some(ODataVersion::V3));
        assert_eq!(ODataVersion::from_header_value("4.01"), Some(ODataVersion::V4));
    }
}
