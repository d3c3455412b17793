//! Service client
//!
//! Bootstraps the metadata model from `<root>/$metadata` and ties the
//! request builder, codec and transport together for single requests,
//! batches and entity contexts.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use log::{debug, info, warn};

use crate::api::codec::{EntityCollection, EntityInstance, EntityKey, Payload, PayloadCodec};
use crate::api::constants::{METADATA_SEGMENT, headers, media};
use crate::api::context::{EntityContext, FlushMode};
use crate::api::error::{ClientError, CodecError, OperationError};
use crate::api::metadata::MetadataModel;
use crate::api::operations::response::decode_part;
use crate::api::operations::{Batch, BatchConfig, BatchResponse, OperationSuccess, PartResponse};
use crate::api::request::{QueryOptions, RequestBuilder, RequestSpec, ResourcePath, join_url};
use crate::api::transport::{BasicAuthTransport, Headers, HttpRequest, Method, ReqwestTransport, Transport};
use crate::config::ClientConfig;

/// Client bound to one service and its resolved model
#[derive(Clone)]
pub struct ODataClient {
    config: ClientConfig,
    builder: RequestBuilder,
    codec: PayloadCodec,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for ODataClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ODataClient")
            .field("service_root", &self.config.service_root)
            .field("version", &self.builder.options().version)
            .finish()
    }
}

/// Build the HTTP transport a configuration asks for
pub fn transport_for(config: &ClientConfig) -> Result<Arc<dyn Transport>, ClientError> {
    let http = ReqwestTransport::new(config.timeout)?;
    Ok(match &config.credentials {
        Some(credentials) => Arc::new(BasicAuthTransport::new(
            http,
            &credentials.username,
            &credentials.password,
        )),
        None => Arc::new(http),
    })
}

impl ODataClient {
    /// Fetch `$metadata` and build a client over the configured HTTP transport
    pub async fn from_config(config: ClientConfig) -> Result<Self, ClientError> {
        let transport = transport_for(&config)?;
        Self::connect(config, transport).await
    }

    /// Fetch `$metadata` through `transport` and build a client
    pub async fn connect(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self, ClientError> {
        let mut request_headers = Headers::new();
        request_headers.insert(headers::ACCEPT, media::APPLICATION_XML);
        request_headers.insert(config.version.max_version_header(), config.version.header_value());

        let request = HttpRequest {
            method: Method::Get,
            url: join_url(&config.service_root, METADATA_SEGMENT),
            headers: request_headers,
            body: None,
        };
        debug!("Fetching metadata from {}", request.url);
        let response = transport.send(request).await?;
        if !response.is_success() {
            return Err(status_error(PartResponse::from(response)));
        }

        let model = MetadataModel::parse(&response.text())?;
        info!(
            "Connected to {} ({}, {} entity types)",
            config.service_root,
            model.version(),
            model.entity_types().count()
        );
        Ok(Self::from_model(config, Arc::new(model), transport))
    }

    /// Build a client over an already resolved model
    ///
    /// The document's protocol version wins over the configured one.
    pub fn from_model(mut config: ClientConfig, model: Arc<MetadataModel>, transport: Arc<dyn Transport>) -> Self {
        if model.version() != config.version {
            warn!(
                "Configured {} but the service describes itself as {}, using {}",
                config.version,
                model.version(),
                model.version()
            );
            config.version = model.version();
        }
        let builder = RequestBuilder::new(model.clone(), config.request_options());
        let codec = PayloadCodec::new(model, config.codec_options());
        Self {
            config,
            builder,
            codec,
            transport,
        }
    }

    pub fn model(&self) -> &Arc<MetadataModel> {
        self.builder.model()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn codec(&self) -> &PayloadCodec {
        &self.codec
    }

    pub fn request_builder(&self) -> &RequestBuilder {
        &self.builder
    }

    /// Absolute URL of a resource path
    pub fn uri_for(&self, path: &ResourcePath) -> Result<String, ClientError> {
        let descriptor = self.builder.build(&RequestSpec::read(path.clone()))?;
        Ok(join_url(&self.config.service_root, &descriptor.url))
    }

    /// Build, send and decode one request
    pub async fn execute(&self, spec: &RequestSpec) -> Result<OperationSuccess, ClientError> {
        let descriptor = self.builder.build(spec)?;
        let request = descriptor.to_http(&self.config.service_root);
        debug!("{} {}", request.method, request.url);
        let response = self.transport.send(request).await?;
        let success = decode_part(descriptor.expected.as_ref(), PartResponse::from(response), &self.codec)
            .map_err(into_client_error)?;
        Ok(success.into_decoded()?)
    }

    /// Send independent requests concurrently
    ///
    /// Results come back in the order of `specs`.
    pub async fn execute_all(&self, specs: &[RequestSpec]) -> Vec<Result<OperationSuccess, ClientError>> {
        join_all(specs.iter().map(|spec| self.execute(spec))).await
    }

    pub async fn read_entity(&self, entity_set: &str, key: EntityKey) -> Result<EntityInstance, ClientError> {
        let spec = RequestSpec::read(ResourcePath::entity(entity_set, key));
        match self.execute(&spec).await?.payload {
            Some(Payload::Entity(entity)) => Ok(entity),
            _ => Err(CodecError::malformed("expected a single entity").into()),
        }
    }

    /// One page of an entity set; `next_link` names the following page
    pub async fn read_collection(
        &self,
        entity_set: &str,
        query: QueryOptions,
    ) -> Result<EntityCollection, ClientError> {
        let spec = RequestSpec::read(ResourcePath::entity_set(entity_set)).query(query);
        self.read_collection_spec(&spec).await
    }

    /// Every page of an entity set, following next links
    pub async fn read_all(&self, entity_set: &str, query: QueryOptions) -> Result<EntityCollection, ClientError> {
        let spec = RequestSpec::read(ResourcePath::entity_set(entity_set)).query(query);
        let descriptor = self.builder.build(&spec)?;
        let mut visited = HashSet::from([join_url(&self.config.service_root, &descriptor.url)]);
        let mut page = self.read_collection_spec(&spec).await?;
        let mut all = EntityCollection {
            count: page.count,
            ..Default::default()
        };

        loop {
            all.entities.append(&mut page.entities);
            all.delta_link = page.delta_link.take().or(all.delta_link.take());
            let Some(next) = page.next_link.take() else {
                break;
            };
            let url = join_url(&self.config.service_root, &next);
            if !visited.insert(url.clone()) {
                return Err(ClientError::RepeatedNextLink(next));
            }
            debug!("Following next link {}", next);
            let mut request = descriptor.to_http(&self.config.service_root);
            request.url = url;
            let response = self.transport.send(request).await?;
            page = match decode_part(descriptor.expected.as_ref(), PartResponse::from(response), &self.codec)
                .map_err(into_client_error)?
                .into_decoded()?
                .payload
            {
                Some(Payload::Collection(collection)) => collection,
                _ => return Err(CodecError::malformed("expected a collection page").into()),
            };
        }
        Ok(all)
    }

    async fn read_collection_spec(&self, spec: &RequestSpec) -> Result<EntityCollection, ClientError> {
        match self.execute(spec).await?.payload {
            Some(Payload::Collection(collection)) => Ok(collection),
            None => Ok(EntityCollection::default()),
            _ => Err(CodecError::malformed("expected a collection").into()),
        }
    }

    /// Batch configured with this client's service root and accept format
    pub fn batch(&self) -> Batch {
        let config = BatchConfig::new(self.config.service_root.clone())
            .with_accept(self.config.batch_accept_format.clone());
        Batch::new(self.builder.clone(), config)
    }

    pub async fn send_batch(&self, batch: &Batch) -> Result<BatchResponse, ClientError> {
        Ok(batch.send(self.transport.as_ref(), &self.codec).await?)
    }

    /// Change-tracking context sharing this client's model and transport
    pub fn context(&self, mode: FlushMode) -> EntityContext {
        let config = BatchConfig::new(self.config.service_root.clone())
            .with_accept(self.config.batch_accept_format.clone());
        EntityContext::new(
            self.builder.clone(),
            self.codec.clone(),
            self.transport.clone(),
            config,
            mode,
        )
    }
}

fn status_error(part: PartResponse) -> ClientError {
    let (code, message) =
        crate::api::codec::parse_error_message(&part.body, part.headers.get(headers::CONTENT_TYPE));
    ClientError::Status {
        status: part.status,
        code,
        message,
    }
}

fn into_client_error(error: OperationError) -> ClientError {
    match error {
        OperationError::Server { status, code, message } => ClientError::Status { status, code, message },
        OperationError::Decode(e) => ClientError::Codec(e),
        other => ClientError::Codec(CodecError::malformed(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::codec::{ChangeState, Value};
    use crate::api::metadata::fixtures::{V3_METADATA, V4_METADATA};
    use crate::api::constants::ODataVersion;
    use crate::api::error::TransportError;
    use crate::api::transport::HttpResponse;
    use crate::api::transport::mock::ScriptedTransport;

    const ROOT: &str = "http://host/svc";

    fn metadata_response(document: &str) -> HttpResponse {
        HttpResponse::new(200)
            .with_header("Content-Type", "application/xml")
            .with_body(document)
    }

    fn json(status: u16, body: &str) -> HttpResponse {
        HttpResponse::new(status)
            .with_header("Content-Type", "application/json")
            .with_body(body)
    }

    async fn connected(responses: Vec<HttpResponse>) -> (ODataClient, Arc<ScriptedTransport>) {
        let mut transport = ScriptedTransport::new().respond(metadata_response(V4_METADATA));
        for response in responses {
            transport = transport.respond(response);
        }
        let transport = Arc::new(transport);
        let client = ODataClient::connect(ClientConfig::builder(ROOT).build(), transport.clone())
            .await
            .unwrap();
        (client, transport)
    }

    #[tokio::test]
    async fn test_connect_fetches_metadata() {
        let (client, transport) = connected(Vec::new()).await;
        let requests = transport.requests();
        assert_eq!(requests[0].url, "http://host/svc/$metadata");
        assert_eq!(requests[0].method, Method::Get);
        assert!(client.model().resolve_entity_set("Customers").is_some());
        assert_eq!(
            client.uri_for(&ResourcePath::entity("Customers", EntityKey::single("CustomerID", 5))).unwrap(),
            "http://host/svc/Customers(5)"
        );
    }

    #[tokio::test]
    async fn test_document_version_wins() {
        let transport = Arc::new(ScriptedTransport::new().respond(metadata_response(V3_METADATA)));
        let client = ODataClient::connect(ClientConfig::builder(ROOT).build(), transport)
            .await
            .unwrap();
        assert_eq!(client.config().version, ODataVersion::V3);
        assert_eq!(client.request_builder().options().version, ODataVersion::V3);
    }

    #[tokio::test]
    async fn test_metadata_failures() {
        let transport = Arc::new(ScriptedTransport::new().respond(json(
            401,
            r#"{"error":{"code":"Unauthorized","message":"no access"}}"#,
        )));
        let err = ODataClient::connect(ClientConfig::builder(ROOT).build(), transport)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Status { status: 401, ref message, .. } if message == "no access"));

        let transport = Arc::new(ScriptedTransport::new().fail(TransportError::Timeout));
        let err = ODataClient::connect(ClientConfig::builder(ROOT).build(), transport)
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::Transport(TransportError::Timeout));
    }

    #[tokio::test]
    async fn test_read_entity_and_server_error() {
        let (client, _) = connected(vec![
            json(200, r#"{"CustomerID":5,"Name":"Ann"}"#),
            json(404, r#"{"error":{"code":"NotFound","message":"no such customer"}}"#),
        ])
        .await;

        let customer = client
            .read_entity("Customers", EntityKey::single("CustomerID", 5))
            .await
            .unwrap();
        assert_eq!(customer.get("Name"), Some(&Value::from("Ann")));
        assert_eq!(customer.state, ChangeState::Unchanged);

        let err = client
            .read_entity("Customers", EntityKey::single("CustomerID", 6))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Status { status: 404, code: Some(ref c), .. } if c == "NotFound"));
    }

    #[tokio::test]
    async fn test_read_all_follows_next_links() {
        let (client, transport) = connected(vec![
            json(
                200,
                r#"{"value":[{"CustomerID":1}],"@odata.nextLink":"http://host/svc/Customers?$skiptoken=1"}"#,
            ),
            json(200, r#"{"value":[{"CustomerID":2}]}"#),
        ])
        .await;

        let all = client.read_all("Customers", QueryOptions::new().top(1)).await.unwrap();
        assert_eq!(all.entities.len(), 2);
        assert!(all.next_link.is_none());
        assert_eq!(transport.requests()[2].url, "http://host/svc/Customers?$skiptoken=1");
    }

    #[tokio::test]
    async fn test_read_all_stops_on_repeated_next_link() {
        let page = r#"{"value":[{"CustomerID":1}],"@odata.nextLink":"Customers?$skiptoken=1"}"#;
        let (client, transport) = connected(vec![json(200, page), json(200, page)]).await;

        let err = client.read_all("Customers", QueryOptions::new()).await.unwrap_err();
        assert_eq!(err, ClientError::RepeatedNextLink("Customers?$skiptoken=1".to_string()));
        // metadata, first page, one followed link
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test]
    async fn test_execute_all_keeps_order() {
        let (client, _) = connected(vec![
            json(200, r#"{"CustomerID":1}"#),
            json(200, r#"{"CustomerID":2}"#),
        ])
        .await;
        let specs = [
            RequestSpec::read(ResourcePath::entity("Customers", EntityKey::single("CustomerID", 1))),
            RequestSpec::read(ResourcePath::entity("Customers", EntityKey::single("CustomerID", 2))),
        ];
        let results = client.execute_all(&specs).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn test_unknown_entity_set_is_request_error() {
        let (client, transport) = connected(Vec::new()).await;
        let err = client
            .read_collection("Nowhere", QueryOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Request(_)));
        assert_eq!(transport.request_count(), 1);
    }
}
