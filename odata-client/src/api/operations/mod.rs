//! Batch operations module
//!
//! Retrievals and change sets are collected into a [`Batch`], written as
//! one multipart/mixed request and answered per operation. A change set is
//! atomic: when any member fails, every member is reported as failed.

pub mod batch;
pub mod operation;
pub mod response;
pub mod wire;

pub use batch::{Batch, BatchCanceller, BatchConfig, BatchState, CancelOutcome, CancelPoint};
pub use operation::{BatchOperation, OperationId, OperationResult, OperationSuccess};
pub use response::BatchResponse;
pub use wire::{BatchRequestBuilder, BatchResponseParser, PartResponse, ResponsePart};

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::api::codec::{CodecOptions, EntityInstance, EntityKey, Payload, PayloadCodec, Value};
    use crate::api::constants::ODataVersion;
    use crate::api::error::{BatchError, CodecError, OperationError, TransportError};
    use crate::api::metadata::MetadataModel;
    use crate::api::metadata::fixtures::V4_METADATA;
    use crate::api::request::{RequestBuilder, RequestOptions, RequestSpec, ResourcePath};
    use crate::api::transport::HttpResponse;
    use crate::api::transport::mock::ScriptedTransport;

    const ROOT: &str = "http://host/svc";

    fn setup() -> (Batch, PayloadCodec) {
        let model = Arc::new(MetadataModel::parse(V4_METADATA).unwrap());
        let builder = RequestBuilder::new(model.clone(), RequestOptions::new(ODataVersion::V4));
        let codec = PayloadCodec::new(model, CodecOptions::new(ODataVersion::V4));
        (Batch::new(builder, BatchConfig::new(ROOT)), codec)
    }

    fn customer() -> EntityInstance {
        EntityInstance::new("Demo.Services.Customer")
            .with("CustomerID", 7)
            .with("Name", "Ann")
    }

    fn order() -> EntityInstance {
        EntityInstance::new("Demo.Services.Order").with("OrderID", 70)
    }

    /// A creates a customer, B creates an order under `$1`, C renames the customer
    fn queue_three(batch: &mut Batch) -> Vec<BatchOperation> {
        batch.begin_change_set().unwrap();
        let a = batch
            .add_change(&RequestSpec::create(ResourcePath::entity_set("Customers"), customer()))
            .unwrap();
        let b = batch
            .add_change(&RequestSpec::create(
                ResourcePath::content_id("$1").navigate("Orders"),
                order(),
            ))
            .unwrap();
        let mut rename = EntityInstance::unchanged("Demo.Services.Customer");
        rename.set_property("Name", "Bea");
        let c = batch
            .add_change(&RequestSpec::update_partial(ResourcePath::content_id("$1"), rename))
            .unwrap();
        batch.commit_change_set().unwrap();
        vec![a, b, c]
    }

    fn change_set_response(parts: &[(&str, &str, &str)]) -> HttpResponse {
        let mut body = String::from("--batchresponse_1\r\nContent-Type: multipart/mixed; boundary=changesetresponse_1\r\n\r\n");
        for (content_id, status, payload) in parts {
            body.push_str("--changesetresponse_1\r\nContent-Type: application/http\r\nContent-Transfer-Encoding: binary\r\n");
            body.push_str(&format!("Content-ID: {}\r\n\r\nHTTP/1.1 {}\r\n", content_id, status));
            if !payload.is_empty() {
                body.push_str("Content-Type: application/json\r\n");
            }
            body.push_str(&format!("\r\n{}\r\n", payload));
        }
        body.push_str("--changesetresponse_1--\r\n--batchresponse_1--\r\n");
        HttpResponse::new(200)
            .with_header("Content-Type", "multipart/mixed; boundary=batchresponse_1")
            .with_body(body)
    }

    #[tokio::test]
    async fn test_change_set_order_and_references() {
        let (mut batch, codec) = setup();
        let operations = queue_three(&mut batch);
        assert_eq!(operations[0].content_id.as_deref(), Some("1"));
        assert_eq!(operations[1].reference().as_deref(), Some("$2"));

        let transport = ScriptedTransport::new().respond(change_set_response(&[
            ("1", "201 Created", r#"{"CustomerID":7,"Name":"Ann"}"#),
            ("2", "201 Created", r#"{"OrderID":70}"#),
            ("3", "204 No Content", ""),
        ]));
        let response = batch.send(&transport, &codec).await.unwrap();
        assert_eq!(batch.state(), BatchState::Completed);
        assert!(response.is_success());

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].url, "http://host/svc/$batch");
        let body = String::from_utf8(sent[0].body.clone().unwrap()).unwrap();
        let a = body.find("POST http://host/svc/Customers HTTP/1.1").unwrap();
        let b = body.find("POST $1/Orders HTTP/1.1").unwrap();
        let c = body.find("PATCH $1 HTTP/1.1").unwrap();
        assert!(a < b && b < c);

        match &response.by_content_id("$1").unwrap().success().unwrap().payload {
            Some(Payload::Entity(entity)) => assert_eq!(entity.get("Name"), Some(&Value::from("Ann"))),
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(response.get(OperationId(2)).unwrap().success().unwrap().payload, None);
    }

    #[tokio::test]
    async fn test_failing_member_fails_whole_change_set() {
        let (mut batch, codec) = setup();
        queue_three(&mut batch);
        let transport = ScriptedTransport::new().respond(change_set_response(&[(
            "1",
            "400 Bad Request",
            r#"{"error":{"code":"E1","message":"Name is required"}}"#,
        )]));

        let response = batch.send(&transport, &codec).await.unwrap();
        assert!(!response.is_success());
        assert!(response.results().iter().all(OperationResult::is_error));
        match response.get(OperationId(0)).unwrap().error() {
            Some(OperationError::Server { status, code, message }) => {
                assert_eq!(*status, 400);
                assert_eq!(code.as_deref(), Some("E1"));
                assert_eq!(message, "Name is required");
            }
            other => panic!("unexpected error {:?}", other),
        }
        for id in [1, 2] {
            assert_eq!(
                response.get(OperationId(id)).unwrap().error(),
                Some(&OperationError::ChangeSetAborted {
                    failed: Some(OperationId(0))
                })
            );
        }

        let failures = response.change_set_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].operation_errors.len(), 3);
        assert_eq!(failures[0].root_causes().count(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_member_body_keeps_change_set_applied() {
        let (mut batch, codec) = setup();
        queue_three(&mut batch);
        let transport = ScriptedTransport::new().respond(change_set_response(&[
            ("1", "201 Created", r#"{"CustomerID":7,"Tier":"Platinum"}"#),
            ("2", "201 Created", r#"{"OrderID":70}"#),
            ("3", "204 No Content", ""),
        ]));

        let response = batch.send(&transport, &codec).await.unwrap();
        assert!(response.is_success());
        assert!(response.change_set_failures().is_empty());

        let created = response.get(OperationId(0)).unwrap().success().unwrap();
        assert_eq!(created.status, 201);
        assert_eq!(created.payload, None);
        assert!(matches!(created.decode_error, Some(CodecError::InvalidValue { .. })));
        assert!(created.clone().into_decoded().is_err());
        assert!(response.get(OperationId(1)).unwrap().success().unwrap().decode_error.is_none());
    }

    #[tokio::test]
    async fn test_unreadable_retrieval_body_is_an_error() {
        let (mut batch, codec) = setup();
        let read = batch
            .add_retrieve(&RequestSpec::read(ResourcePath::entity(
                "Customers",
                EntityKey::single("CustomerID", 7),
            )))
            .unwrap();
        let body = "--b\r\nContent-Type: application/http\r\n\r\n\
HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n\
{\"CustomerID\":7,\"Tier\":\"Platinum\"}\r\n--b--\r\n";
        let transport = ScriptedTransport::new().respond(
            HttpResponse::new(200)
                .with_header("Content-Type", "multipart/mixed; boundary=b")
                .with_body(body),
        );
        let response = batch.send(&transport, &codec).await.unwrap();
        assert!(matches!(
            response.get(read).unwrap().error(),
            Some(OperationError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_single_error_for_change_set() {
        let (mut batch, codec) = setup();
        queue_three(&mut batch);
        let body = "--batchresponse_1\r\nContent-Type: application/http\r\n\r\n\
HTTP/1.1 409 Conflict\r\nContent-Type: application/json\r\n\r\n\
{\"error\":{\"code\":\"\",\"message\":\"conflict\"}}\r\n--batchresponse_1--\r\n";
        let transport = ScriptedTransport::new().respond(
            HttpResponse::new(200)
                .with_header("Content-Type", "multipart/mixed; boundary=batchresponse_1")
                .with_body(body),
        );
        let response = batch.send(&transport, &codec).await.unwrap();
        let errors: Vec<_> = response.results().iter().filter_map(OperationResult::error).collect();
        assert_eq!(errors.len(), 3);
        assert!(matches!(errors[0], OperationError::Server { status: 409, .. }));
        assert!(matches!(errors[2], OperationError::ChangeSetAborted { .. }));
    }

    #[tokio::test]
    async fn test_retrievals_and_missing_part() {
        let (mut batch, codec) = setup();
        let first = batch
            .add_retrieve(&RequestSpec::read(ResourcePath::entity(
                "Customers",
                EntityKey::single("CustomerID", 7),
            )))
            .unwrap();
        let second = batch
            .add_retrieve(&RequestSpec::read(ResourcePath::entity_set("Orders")))
            .unwrap();
        let body = "--b\r\nContent-Type: application/http\r\n\r\n\
HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n\
{\"CustomerID\":7,\"Name\":\"Ann\"}\r\n--b--\r\n";
        let transport = ScriptedTransport::new().respond(
            HttpResponse::new(200)
                .with_header("Content-Type", "multipart/mixed; boundary=b")
                .with_body(body),
        );
        let response = batch.send(&transport, &codec).await.unwrap();
        assert!(response.get(first).unwrap().is_success());
        assert_eq!(
            response.get(second).unwrap().error(),
            Some(&OperationError::MissingResponse)
        );
    }

    #[tokio::test]
    async fn test_transport_failure_lists_pending() {
        let (mut batch, codec) = setup();
        queue_three(&mut batch);
        let transport = ScriptedTransport::new().fail(TransportError::Timeout);

        match batch.send(&transport, &codec).await {
            Err(BatchError::Transport(error)) => {
                assert_eq!(error.source, TransportError::Timeout);
                assert_eq!(error.pending, vec![OperationId(0), OperationId(1), OperationId(2)]);
            }
            other => panic!("unexpected result {:?}", other.map(|r| r.results().len())),
        }
        assert_eq!(batch.state(), BatchState::Failed);
    }

    #[tokio::test]
    async fn test_rejected_envelope() {
        let (mut batch, codec) = setup();
        queue_three(&mut batch);
        let transport = ScriptedTransport::new().respond(
            HttpResponse::new(400)
                .with_header("Content-Type", "application/json")
                .with_body(r#"{"error":{"code":"","message":"bad batch"}}"#),
        );
        match batch.send(&transport, &codec).await {
            Err(BatchError::Rejected { status, message, pending }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "bad batch");
                assert_eq!(pending.len(), 3);
            }
            other => panic!("unexpected result {:?}", other.map(|r| r.results().len())),
        }
        assert_eq!(batch.state(), BatchState::Failed);
    }

    #[tokio::test]
    async fn test_cancel_before_dispatch() {
        let (mut batch, codec) = setup();
        queue_three(&mut batch);
        let canceller = batch.canceller();
        assert_eq!(canceller.cancel(), CancelOutcome::BeforeDispatch);

        let transport = ScriptedTransport::new();
        assert_eq!(
            batch.send(&transport, &codec).await.map(|r| r.results().len()),
            Err(BatchError::Cancelled(CancelPoint::BeforeDispatch))
        );
        assert_eq!(transport.request_count(), 0);
        assert_eq!(batch.state(), BatchState::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_after_dispatch() {
        let (mut batch, codec) = setup();
        queue_three(&mut batch);
        let canceller = batch.canceller();
        let transport = ScriptedTransport::new()
            .respond(change_set_response(&[]))
            .with_delay(Duration::from_secs(30));

        let cancel = async {
            while transport.in_flight() == 0 {
                tokio::task::yield_now().await;
            }
            canceller.cancel()
        };
        let (result, outcome) = tokio::join!(batch.send(&transport, &codec), cancel);

        assert_eq!(outcome, CancelOutcome::AfterDispatch);
        assert_eq!(
            result.map(|r| r.results().len()),
            Err(BatchError::Cancelled(CancelPoint::AfterDispatch))
        );
        assert_eq!(batch.state(), BatchState::Failed);
        assert_eq!(canceller.cancel(), CancelOutcome::AlreadyFinished);
    }

    #[tokio::test]
    async fn test_batch_accept_header() {
        let model = Arc::new(MetadataModel::parse(V4_METADATA).unwrap());
        let builder = RequestBuilder::new(model.clone(), RequestOptions::new(ODataVersion::V4));
        let codec = PayloadCodec::new(model, CodecOptions::new(ODataVersion::V4));
        let mut batch = Batch::new(
            builder,
            BatchConfig::new(ROOT).with_accept("application/octet-stream"),
        );
        batch
            .add_retrieve(&RequestSpec::read(ResourcePath::entity_set("Orders")))
            .unwrap();
        let transport = ScriptedTransport::new().fail(TransportError::Connection("down".into()));
        let _ = batch.send(&transport, &codec).await;

        let sent = &transport.requests()[0];
        assert_eq!(sent.headers.get("Accept"), Some("application/octet-stream"));
        assert!(
            sent.headers
                .get("Content-Type")
                .unwrap()
                .starts_with("multipart/mixed; boundary=batch_")
        );
    }

    #[test]
    fn test_collecting_rules() {
        let (mut batch, _) = setup();
        let read = RequestSpec::read(ResourcePath::entity_set("Orders"));
        let create = RequestSpec::create(ResourcePath::entity_set("Customers"), customer());

        assert_eq!(batch.add_change(&create), Err(BatchError::NoOpenChangeSet));
        assert_eq!(batch.commit_change_set(), Err(BatchError::NoOpenChangeSet));
        assert!(matches!(batch.add_retrieve(&create), Err(BatchError::Request(_))));

        batch.begin_change_set().unwrap();
        assert_eq!(batch.begin_change_set(), Err(BatchError::ChangeSetAlreadyOpen));
        assert_eq!(batch.commit_change_set(), Err(BatchError::EmptyChangeSet));
        assert_eq!(batch.add_change(&read), Err(BatchError::RetrievalInChangeSet));
        assert_eq!(batch.add_retrieve(&read), Err(BatchError::ChangeSetStillOpen));

        let dangling = RequestSpec::create(ResourcePath::content_id("$4").navigate("Orders"), order());
        assert_eq!(
            batch.add_change(&dangling),
            Err(BatchError::UnknownContentId("4".into()))
        );
        batch.add_change(&create).unwrap();
        batch.commit_change_set().unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_send_twice_rejected() {
        let (mut batch, codec) = setup();
        batch
            .add_retrieve(&RequestSpec::read(ResourcePath::entity_set("Orders")))
            .unwrap();
        let transport = ScriptedTransport::new().fail(TransportError::Timeout);
        let _ = batch.send(&transport, &codec).await;

        assert_eq!(
            batch.send(&transport, &codec).await.map(|r| r.results().len()),
            Err(BatchError::InvalidState {
                expected: "collecting",
                actual: "failed"
            })
        );
        assert!(matches!(
            batch.add_retrieve(&RequestSpec::read(ResourcePath::entity_set("Orders"))),
            Err(BatchError::InvalidState { .. })
        ));
    }
}
