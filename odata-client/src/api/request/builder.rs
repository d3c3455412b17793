//! Request builder
//!
//! Turns a [`RequestSpec`] into a [`RequestDescriptor`]: method, relative
//! URL with query, protocol headers and serialized body. Nothing here
//! touches the network.

use std::sync::Arc;

use serde_json::{Map, Value as Json};

use super::key::literal;
use super::path::{ResolvedPath, ResourcePath, Target, reference_path};
use super::query::QueryOptions;
use crate::api::codec::{
    CodecOptions, EntityInstance, EntityReference, ExpectedPayload, Format, NavigationValue,
    PayloadCodec, Representation, Value,
};
use crate::api::constants::{ODataVersion, headers, media};
use crate::api::error::{CodecError, RequestError, UnsupportedFormatError};
use crate::api::metadata::{MetadataModel, OperationKind, Parameter, PrimitiveType, TypeRef};
use crate::api::transport::{Headers, HttpRequest, Method};

/// Protocol-level choices applied to every built request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    pub version: ODataVersion,
    pub default_format: Format,
    /// Ask the server to echo created and updated entities
    pub prefer_representation: bool,
    pub ieee754_compatible: bool,
    /// Send PUT/PATCH/MERGE/DELETE as POST with `X-HTTP-Method`
    pub tunnel_methods: bool,
}

impl RequestOptions {
    pub fn new(version: ODataVersion) -> Self {
        Self {
            version,
            default_format: Format::default(),
            prefer_representation: false,
            ieee754_compatible: false,
            tunnel_methods: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    Read,
    Create(EntityInstance),
    /// PUT with every present property
    UpdateFull(EntityInstance),
    /// PATCH (MERGE for V3) with the changed properties
    UpdatePartial(EntityInstance),
    Delete,
    InvokeAction(Vec<(String, Value)>),
    InvokeFunction(Vec<(String, Value)>),
    AddReference(EntityReference),
    /// Target is required for collection-valued navigations
    RemoveReference(Option<EntityReference>),
}

impl RequestKind {
    pub fn name(&self) -> &'static str {
        match self {
            RequestKind::Read => "read",
            RequestKind::Create(_) => "create",
            RequestKind::UpdateFull(_) => "update",
            RequestKind::UpdatePartial(_) => "partial update",
            RequestKind::Delete => "delete",
            RequestKind::InvokeAction(_) => "action invocation",
            RequestKind::InvokeFunction(_) => "function invocation",
            RequestKind::AddReference(_) => "add reference",
            RequestKind::RemoveReference(_) => "remove reference",
        }
    }

    /// Whether the request is a retrieval (allowed outside change sets only)
    pub fn is_retrieval(&self) -> bool {
        matches!(self, RequestKind::Read | RequestKind::InvokeFunction(_))
    }
}

/// Immutable description of one request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    kind: RequestKind,
    path: ResourcePath,
    query: QueryOptions,
    accept: Option<Format>,
    if_match: Option<String>,
    track_changes: bool,
    extra_headers: Vec<(String, String)>,
}

impl RequestSpec {
    fn new(kind: RequestKind, path: ResourcePath) -> Self {
        Self {
            kind,
            path,
            query: QueryOptions::default(),
            accept: None,
            if_match: None,
            track_changes: false,
            extra_headers: Vec::new(),
        }
    }

    pub fn read(path: ResourcePath) -> Self {
        Self::new(RequestKind::Read, path)
    }

    /// POST `entity` to the collection at `path`
    pub fn create(path: ResourcePath, entity: EntityInstance) -> Self {
        Self::new(RequestKind::Create(entity), path)
    }

    pub fn update_full(path: ResourcePath, entity: EntityInstance) -> Self {
        Self::new(RequestKind::UpdateFull(entity), path)
    }

    pub fn update_partial(path: ResourcePath, entity: EntityInstance) -> Self {
        Self::new(RequestKind::UpdatePartial(entity), path)
    }

    pub fn delete(path: ResourcePath) -> Self {
        Self::new(RequestKind::Delete, path)
    }

    pub fn invoke_action(path: ResourcePath, parameters: Vec<(String, Value)>) -> Self {
        Self::new(RequestKind::InvokeAction(parameters), path)
    }

    pub fn invoke_function(path: ResourcePath, parameters: Vec<(String, Value)>) -> Self {
        Self::new(RequestKind::InvokeFunction(parameters), path)
    }

    /// Link the entity at `path` to `target` through the navigation at the end of `path`
    pub fn add_reference(path: ResourcePath, target: EntityReference) -> Self {
        Self::new(RequestKind::AddReference(target), path)
    }

    pub fn remove_reference(path: ResourcePath, target: Option<EntityReference>) -> Self {
        Self::new(RequestKind::RemoveReference(target), path)
    }

    pub fn query(mut self, query: QueryOptions) -> Self {
        self.query = query;
        self
    }

    pub fn accept(mut self, format: Format) -> Self {
        self.accept = Some(format);
        self
    }

    pub fn if_match(mut self, etag: impl Into<String>) -> Self {
        self.if_match = Some(etag.into());
        self
    }

    /// Request a delta link with the results
    pub fn track_changes(mut self) -> Self {
        self.track_changes = true;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    pub fn kind(&self) -> &RequestKind {
        &self.kind
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// Content ids this request refers to, in the path or in bind annotations
    pub fn references(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.path.root_content_id().map(str::to_string).into_iter().collect();
        let mut push = |reference: &EntityReference| {
            if let EntityReference::ContentId(id) = reference
                && !ids.contains(id)
            {
                ids.push(id.clone());
            }
        };
        match &self.kind {
            RequestKind::Create(entity) | RequestKind::UpdateFull(entity) | RequestKind::UpdatePartial(entity) => {
                for (_, nav) in &entity.navigation {
                    if let NavigationValue::Bind(targets) = nav {
                        targets.iter().for_each(&mut push);
                    }
                }
            }
            RequestKind::AddReference(target) | RequestKind::RemoveReference(Some(target)) => push(target),
            _ => {}
        }
        ids
    }
}

/// A fully built request, relative to the service root
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Path and query relative to the service root
    pub url: String,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
    /// How a successful response body decodes, if it has one
    pub expected: Option<ExpectedPayload>,
    pub target: Target,
    pub references: Vec<String>,
}

impl RequestDescriptor {
    pub fn to_http(&self, service_root: &str) -> HttpRequest {
        HttpRequest {
            method: self.method,
            url: join_url(service_root, &self.url),
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}

pub fn join_url(service_root: &str, relative: &str) -> String {
    if relative.starts_with("http://") || relative.starts_with("https://") {
        return relative.to_string();
    }
    format!("{}/{}", service_root.trim_end_matches('/'), relative.trim_start_matches('/'))
}

/// Builds requests against one service model
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    model: Arc<MetadataModel>,
    options: RequestOptions,
    codec: PayloadCodec,
}

impl RequestBuilder {
    pub fn new(model: Arc<MetadataModel>, options: RequestOptions) -> Self {
        let codec_options =
            CodecOptions::new(options.version).with_ieee754_compatible(options.ieee754_compatible);
        let codec = PayloadCodec::new(model.clone(), codec_options);
        Self { model, options, codec }
    }

    pub fn model(&self) -> &Arc<MetadataModel> {
        &self.model
    }

    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    pub fn build(&self, spec: &RequestSpec) -> Result<RequestDescriptor, RequestError> {
        let version = self.options.version;
        let format = spec.accept.unwrap_or(self.options.default_format);
        let resolved = spec.path.resolve(&self.model, version)?;
        let ResolvedPath { mut path, target } = resolved;
        let mut query = spec.query.to_query_string(version);

        if spec.track_changes && !format.is_json() {
            return Err(UnsupportedFormatError::new(self.codec.media_type(format)).into());
        }

        let invalid = |path: &str| RequestError::InvalidOperation {
            operation: spec.kind.name(),
            target: path.to_string(),
        };

        let mut if_match = spec.if_match.clone();
        let mut content_type = None;
        let (method, body, expected) = match &spec.kind {
            RequestKind::Read => {
                if matches!(target, Target::Operation { .. }) {
                    return Err(invalid(&path));
                }
                (Method::Get, None, expected_for(&target, spec.track_changes))
            }
            RequestKind::Create(entity) => {
                match &target {
                    Target::Collection { entity_type, .. }
                        if self.model.is_derived_from(&entity.type_name, entity_type) => {}
                    Target::Opaque => {}
                    _ => return Err(invalid(&path)),
                }
                let body = self.codec.serialize_entity_as(entity, format, Representation::Full)?;
                content_type = Some(self.codec.media_type(format));
                (
                    Method::Post,
                    Some(body),
                    Some(ExpectedPayload::Entity(entity.type_name.clone())),
                )
            }
            RequestKind::UpdateFull(entity) | RequestKind::UpdatePartial(entity) => {
                if !matches!(target, Target::Entity { .. } | Target::Opaque) {
                    return Err(invalid(&path));
                }
                let (method, representation) = match (&spec.kind, version) {
                    (RequestKind::UpdateFull(_), _) => (Method::Put, Representation::Full),
                    (_, ODataVersion::V4) => (Method::Patch, Representation::Changes),
                    (_, ODataVersion::V3) => (Method::Merge, Representation::Changes),
                };
                let body = self.codec.serialize_entity_as(entity, format, representation)?;
                content_type = Some(self.codec.media_type(format));
                if_match = if_match.or_else(|| entity.etag.clone());
                let expected = self
                    .options
                    .prefer_representation
                    .then(|| ExpectedPayload::Entity(entity.type_name.clone()));
                (method, Some(body), expected)
            }
            RequestKind::Delete => {
                if !matches!(target, Target::Entity { .. } | Target::Reference | Target::Opaque) {
                    return Err(invalid(&path));
                }
                (Method::Delete, None, None)
            }
            RequestKind::InvokeAction(arguments) => {
                let return_type = match &target {
                    Target::Operation {
                        kind: OperationKind::Action,
                        parameters,
                        return_type,
                        ..
                    } => {
                        check_arguments(parameters, arguments)?;
                        return_type.clone()
                    }
                    Target::Opaque => None,
                    _ => return Err(invalid(&path)),
                };
                let body = if arguments.is_empty() {
                    None
                } else {
                    content_type = Some(self.codec.media_type(Format::json()));
                    Some(self.codec.serialize_parameters(arguments)?)
                };
                (
                    Method::Post,
                    body,
                    return_type.as_ref().map(ExpectedPayload::for_return_type),
                )
            }
            RequestKind::InvokeFunction(arguments) => {
                let Target::Operation {
                    kind: OperationKind::Function,
                    parameters,
                    return_type,
                    ..
                } = &target
                else {
                    return Err(invalid(&path));
                };
                check_arguments(parameters, arguments)?;
                let rendered = arguments
                    .iter()
                    .map(|(name, value)| literal(value, version).map(|lit| (name.as_str(), lit)))
                    .collect::<Result<Vec<_>, _>>()?;
                match version {
                    ODataVersion::V4 => {
                        let inline: Vec<String> =
                            rendered.iter().map(|(n, lit)| format!("{}={}", n, lit)).collect();
                        path.push_str(&format!("({})", inline.join(",")));
                    }
                    ODataVersion::V3 => {
                        let params: Vec<String> =
                            rendered.iter().map(|(n, lit)| format!("{}={}", n, lit)).collect();
                        query = join_query(&params.join("&"), &query);
                    }
                }
                (
                    Method::Get,
                    None,
                    return_type.as_ref().map(ExpectedPayload::for_return_type),
                )
            }
            RequestKind::AddReference(reference) => {
                let single = match &target {
                    Target::Collection { .. } => false,
                    Target::Entity { .. } => true,
                    Target::Opaque => false,
                    _ => return Err(invalid(&path)),
                };
                path = reference_path(&path, version);
                let mut obj = Map::new();
                let key = match version {
                    ODataVersion::V4 => "@odata.id",
                    ODataVersion::V3 => "url",
                };
                obj.insert(key.to_string(), Json::String(reference.as_link()));
                let body = serde_json::to_vec(&Json::Object(obj))
                    .map_err(|e| CodecError::malformed(e.to_string()))?;
                content_type = Some(self.codec.media_type(Format::json()));
                let method = if single { Method::Put } else { Method::Post };
                (method, Some(body), None)
            }
            RequestKind::RemoveReference(reference) => {
                let is_collection = match &target {
                    Target::Collection { .. } => true,
                    Target::Entity { .. } | Target::Opaque => false,
                    _ => return Err(invalid(&path)),
                };
                match (reference, is_collection, version) {
                    (Some(reference), true, ODataVersion::V4) => {
                        path = reference_path(&path, version);
                        let id = format!("$id={}", urlencoding::encode(&reference.as_link()));
                        query = join_query(&id, &query);
                    }
                    (Some(EntityReference::Uri(uri)), true, ODataVersion::V3) => {
                        // V3 addresses the link itself by the target's key predicate
                        let predicate = uri
                            .rfind('(')
                            .map(|i| &uri[i..])
                            .ok_or_else(|| RequestError::InvalidPath(format!("'{}' has no key", uri)))?;
                        path = reference_path(&path, version);
                        path.push_str(predicate);
                    }
                    (None, true, _) => return Err(invalid(&path)),
                    _ => path = reference_path(&path, version),
                }
                (Method::Delete, None, None)
            }
        };

        let mut request_headers = Headers::new();
        request_headers.insert(version.version_header(), version.header_value());
        request_headers.insert(version.max_version_header(), version.header_value());
        let accept = match &target {
            Target::Count => media::TEXT_PLAIN.to_string(),
            Target::RawValue(_) => "*/*".to_string(),
            Target::Reference => self.codec.media_type(Format::json()),
            _ => self.codec.media_type(format),
        };
        request_headers.insert(headers::ACCEPT, accept);
        if let Some(content_type) = content_type {
            request_headers.insert(headers::CONTENT_TYPE, content_type);
        }
        if let Some(etag) = if_match
            && matches!(method, Method::Put | Method::Patch | Method::Merge | Method::Delete)
        {
            request_headers.insert(headers::IF_MATCH, etag);
        }

        let mut preferences = Vec::new();
        let echoes = matches!(
            spec.kind,
            RequestKind::Create(_) | RequestKind::UpdateFull(_) | RequestKind::UpdatePartial(_)
        );
        if echoes && self.options.prefer_representation {
            preferences.push(match version {
                ODataVersion::V4 => "return=representation",
                ODataVersion::V3 => "return-content",
            });
        }
        if spec.track_changes {
            preferences.push("odata.track-changes");
        }
        if !preferences.is_empty() {
            request_headers.insert(headers::PREFER, preferences.join(", "));
        }

        let method = if self.options.tunnel_methods && method.is_tunnelable() {
            request_headers.insert(headers::X_HTTP_METHOD, method.as_str());
            Method::Post
        } else {
            method
        };

        for (name, value) in &spec.extra_headers {
            request_headers.insert(name, value.clone());
        }

        let url = if query.is_empty() {
            path
        } else {
            format!("{}?{}", path, query)
        };

        Ok(RequestDescriptor {
            method,
            url,
            headers: request_headers,
            body,
            expected,
            target,
            references: spec.references(),
        })
    }
}

fn join_query(first: &str, rest: &str) -> String {
    match (first.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (_, true) => first.to_string(),
        _ => format!("{}&{}", first, rest),
    }
}

fn expected_for(target: &Target, track_changes: bool) -> Option<ExpectedPayload> {
    match target {
        Target::Collection { entity_type, .. } if track_changes => {
            Some(ExpectedPayload::Delta(entity_type.clone()))
        }
        Target::Collection { entity_type, .. } => Some(ExpectedPayload::Collection(entity_type.clone())),
        Target::Entity { entity_type, .. } => Some(ExpectedPayload::Entity(entity_type.clone())),
        Target::Property(type_ref) => Some(ExpectedPayload::Value(type_ref.clone())),
        Target::Count => Some(ExpectedPayload::Value(TypeRef::Primitive(PrimitiveType::Int64))),
        Target::RawValue(primitive) => Some(ExpectedPayload::Value(TypeRef::Primitive(primitive.clone()))),
        Target::Operation { return_type, .. } => return_type.as_ref().map(ExpectedPayload::for_return_type),
        Target::Reference | Target::Opaque => None,
    }
}

fn check_arguments(parameters: &[Parameter], arguments: &[(String, Value)]) -> Result<(), RequestError> {
    if let Some((name, _)) = arguments
        .iter()
        .find(|(name, _)| !parameters.iter().any(|p| p.name == *name))
    {
        return Err(RequestError::InvalidPath(format!("'{}' is not an operation parameter", name)));
    }
    if let Some(missing) = parameters
        .iter()
        .find(|p| !p.nullable && !arguments.iter().any(|(name, _)| *name == p.name))
    {
        return Err(RequestError::InvalidPath(format!(
            "missing required parameter '{}'",
            missing.name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::codec::EntityKey;
    use crate::api::metadata::fixtures::{V3_METADATA, V4_METADATA};

    fn builder(options: RequestOptions) -> RequestBuilder {
        let model = Arc::new(MetadataModel::parse(V4_METADATA).unwrap());
        RequestBuilder::new(model, options)
    }

    fn v4() -> RequestBuilder {
        builder(RequestOptions::new(ODataVersion::V4))
    }

    #[test]
    fn test_read_with_query_and_headers() {
        let spec = RequestSpec::read(ResourcePath::entity_set("Customers"))
            .query(QueryOptions::new().filter("Name eq 'A'").top(5));
        let request = v4().build(&spec).unwrap();
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.url, "Customers?$filter=Name%20eq%20%27A%27&$top=5");
        assert_eq!(request.headers.get("OData-Version"), Some("4.0"));
        assert_eq!(request.headers.get("OData-MaxVersion"), Some("4.0"));
        assert_eq!(
            request.headers.get("Accept"),
            Some("application/json;odata.metadata=minimal")
        );
        assert_eq!(
            request.expected,
            Some(ExpectedPayload::Collection("Demo.Services.Customer".into()))
        );
    }

    #[test]
    fn test_composite_key_url() {
        let key: EntityKey = vec![("Region", "WA"), ("City", "Seattle")].into_iter().collect();
        let spec = RequestSpec::read(ResourcePath::entity("Stores", key));
        let request = v4().build(&spec).unwrap();
        assert_eq!(request.url, "Stores(Region='WA',City='Seattle')");
    }

    #[test]
    fn test_incomplete_key() {
        let spec = RequestSpec::delete(ResourcePath::entity("Stores", EntityKey::single("City", "Seattle")));
        assert!(matches!(v4().build(&spec), Err(RequestError::IncompleteKey(_))));
    }

    #[test]
    fn test_partial_update_body_and_if_match() {
        let mut customer = EntityInstance::unchanged("Demo.Services.Customer")
            .with("CustomerID", 1)
            .with("Name", "Old")
            .with_etag("W/\"3\"");
        customer.set_property("Name", "New");

        let path = ResourcePath::entity("Customers", EntityKey::single("CustomerID", 1));
        let request = v4().build(&RequestSpec::update_partial(path, customer)).unwrap();
        assert_eq!(request.method, Method::Patch);
        assert_eq!(request.headers.get("If-Match"), Some("W/\"3\""));
        let body: Json = serde_json::from_slice(request.body.as_ref().unwrap()).unwrap();
        assert_eq!(body["Name"], Json::String("New".into()));
        assert!(body.get("CustomerID").is_none());
    }

    #[test]
    fn test_prefer_and_tunnelling() {
        let mut options = RequestOptions::new(ODataVersion::V4);
        options.prefer_representation = true;
        options.tunnel_methods = true;
        let builder = builder(options);

        let create = RequestSpec::create(
            ResourcePath::entity_set("Orders"),
            EntityInstance::new("Demo.Services.Order").with("OrderID", 9),
        );
        let request = builder.build(&create).unwrap();
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.headers.get("Prefer"), Some("return=representation"));
        assert!(request.headers.get("X-HTTP-Method").is_none());

        let delete = RequestSpec::delete(ResourcePath::entity("Orders", EntityKey::single("OrderID", 9)))
            .if_match("*");
        let request = builder.build(&delete).unwrap();
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.headers.get("X-HTTP-Method"), Some("DELETE"));
        assert_eq!(request.headers.get("If-Match"), Some("*"));
    }

    #[test]
    fn test_create_rejects_wrong_type_and_target() {
        let wrong_type = RequestSpec::create(
            ResourcePath::entity_set("Orders"),
            EntityInstance::new("Demo.Services.Customer").with("CustomerID", 1),
        );
        assert!(matches!(
            v4().build(&wrong_type),
            Err(RequestError::InvalidOperation { operation: "create", .. })
        ));

        let single = RequestSpec::create(
            ResourcePath::entity("Orders", EntityKey::single("OrderID", 1)),
            EntityInstance::new("Demo.Services.Order"),
        );
        assert!(v4().build(&single).is_err());
    }

    #[test]
    fn test_function_and_action_invocation() {
        let function = RequestSpec::invoke_function(
            ResourcePath::operation_import("TopCustomers"),
            vec![("count".into(), Value::Int32(3))],
        );
        let request = v4().build(&function).unwrap();
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.url, "TopCustomers(count=3)");
        assert_eq!(
            request.expected,
            Some(ExpectedPayload::Collection("Demo.Services.Customer".into()))
        );

        let missing = RequestSpec::invoke_function(ResourcePath::operation_import("TopCustomers"), vec![]);
        assert!(v4().build(&missing).is_err());

        let action = RequestSpec::invoke_action(
            ResourcePath::entity("Orders", EntityKey::single("OrderID", 2)).operation("Demo.Discount"),
            vec![("percent".into(), Value::Int32(10))],
        );
        let request = v4().build(&action).unwrap();
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.url, "Orders(2)/Demo.Services.Discount");
        assert_eq!(request.body.as_deref(), Some(br#"{"percent":10}"#.as_slice()));

        let read_action = RequestSpec::read(ResourcePath::operation_import("ResetBalances"));
        assert!(v4().build(&read_action).is_err());
    }

    #[test]
    fn test_add_reference_body() {
        let spec = RequestSpec::add_reference(
            ResourcePath::entity("Customers", EntityKey::single("CustomerID", 1)).navigate("Orders"),
            EntityReference::Uri("Orders(5)".into()),
        );
        let request = v4().build(&spec).unwrap();
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.url, "Customers(1)/Orders/$ref");
        assert_eq!(request.body.as_deref(), Some(br#"{"@odata.id":"Orders(5)"}"#.as_slice()));

        let remove = RequestSpec::remove_reference(
            ResourcePath::entity("Customers", EntityKey::single("CustomerID", 1)).navigate("Orders"),
            Some(EntityReference::Uri("Orders(5)".into())),
        );
        let request = v4().build(&remove).unwrap();
        assert_eq!(request.method, Method::Delete);
        assert_eq!(request.url, "Customers(1)/Orders/$ref?$id=Orders%285%29");
    }

    #[test]
    fn test_content_id_references_collected() {
        let order = EntityInstance::new("Demo.Services.Order")
            .with("OrderID", 5)
            .with_navigation("Customer", NavigationValue::Bind(vec![EntityReference::ContentId("1".into())]));
        let spec = RequestSpec::create(ResourcePath::entity_set("Orders"), order);
        assert_eq!(spec.references(), vec!["1".to_string()]);

        let spec = RequestSpec::update_partial(
            ResourcePath::content_id("2"),
            EntityInstance::unchanged("Demo.Services.Order"),
        );
        let request = v4().build(&spec).unwrap();
        assert_eq!(request.url, "$2");
        assert_eq!(request.references, vec!["2".to_string()]);
    }

    #[test]
    fn test_delta_requires_json() {
        let spec = RequestSpec::read(ResourcePath::entity_set("Customers")).track_changes();
        let request = v4().build(&spec).unwrap();
        assert_eq!(request.headers.get("Prefer"), Some("odata.track-changes"));
        assert_eq!(
            request.expected,
            Some(ExpectedPayload::Delta("Demo.Services.Customer".into()))
        );

        let atom = RequestSpec::read(ResourcePath::entity_set("Customers"))
            .track_changes()
            .accept(Format::Atom);
        assert!(matches!(v4().build(&atom), Err(RequestError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_v3_headers_merge_and_function_parameters() {
        let model = Arc::new(MetadataModel::parse(V3_METADATA).unwrap());
        let builder = RequestBuilder::new(model, RequestOptions::new(ODataVersion::V3));

        let mut product = EntityInstance::unchanged("NorthwindModel.Product").with("ProductID", 4);
        product.set_property("ProductName", "Chai");
        let path = ResourcePath::entity("Products", EntityKey::single("ProductID", 4));
        let request = builder.build(&RequestSpec::update_partial(path, product)).unwrap();
        assert_eq!(request.method, Method::Merge);
        assert_eq!(request.headers.get("DataServiceVersion"), Some("3.0"));
        assert_eq!(request.headers.get("MaxDataServiceVersion"), Some("3.0"));

        let function = RequestSpec::invoke_function(
            ResourcePath::operation_import("ProductsByName"),
            vec![("name".into(), Value::from("Chai"))],
        )
        .query(QueryOptions::new().top(1));
        let request = builder.build(&function).unwrap();
        assert_eq!(request.url, "ProductsByName?name='Chai'&$top=1");
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://host/svc/", "Customers"), "http://host/svc/Customers");
        assert_eq!(join_url("http://host/svc", "http://other/x"), "http://other/x");
    }
}
