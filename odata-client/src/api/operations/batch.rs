//! Batch state machine
//!
//! A batch collects retrievals and change sets, is dispatched exactly once
//! and then holds its terminal state. Cancellation is shared through a
//! [`BatchCanceller`] so another task can stop a batch mid-flight.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use super::operation::{BatchOperation, OperationId};
use super::response::{BatchResponse, Submitted, demultiplex};
use super::wire::{BatchRequestBuilder, BatchResponseParser};
use crate::api::codec::{PayloadCodec, parse_error_message};
use crate::api::constants::{BATCH_SEGMENT, headers, media};
use crate::api::error::{BatchError, BatchTransportError, RequestError};
use crate::api::request::{RequestBuilder, RequestSpec, join_url};
use crate::api::transport::{Headers, HttpRequest, Method, Transport};

/// Lifecycle of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BatchState {
    Collecting = 0,
    Sent = 1,
    Completed = 2,
    Failed = 3,
    Cancelled = 4,
}

impl BatchState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => BatchState::Collecting,
            1 => BatchState::Sent,
            2 => BatchState::Completed,
            3 => BatchState::Failed,
            _ => BatchState::Cancelled,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BatchState::Collecting => "collecting",
            BatchState::Sent => "sent",
            BatchState::Completed => "completed",
            BatchState::Failed => "failed",
            BatchState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, BatchState::Collecting | BatchState::Sent)
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Where a cancellation took effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelPoint {
    /// Nothing reached the server
    BeforeDispatch,
    /// The request was sent; its operations may have been applied
    AfterDispatch,
}

impl fmt::Display for CancelPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelPoint::BeforeDispatch => f.write_str("before dispatch"),
            CancelPoint::AfterDispatch => f.write_str("after dispatch, operations may have been applied"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    BeforeDispatch,
    AfterDispatch,
    /// The batch had already reached a terminal state
    AlreadyFinished,
}

#[derive(Debug)]
struct Shared {
    state: AtomicU8,
    token: CancellationToken,
}

impl Shared {
    fn state(&self) -> BatchState {
        BatchState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: BatchState, to: BatchState) -> Result<(), BatchState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(BatchState::from_u8)
    }

    fn set(&self, state: BatchState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn cancel(&self) -> CancelOutcome {
        match self.transition(BatchState::Collecting, BatchState::Cancelled) {
            Ok(()) => CancelOutcome::BeforeDispatch,
            Err(BatchState::Sent) => {
                self.token.cancel();
                CancelOutcome::AfterDispatch
            }
            Err(_) => CancelOutcome::AlreadyFinished,
        }
    }
}

/// Cancels a batch from another task
#[derive(Debug, Clone)]
pub struct BatchCanceller {
    shared: Arc<Shared>,
}

impl BatchCanceller {
    pub fn cancel(&self) -> CancelOutcome {
        self.shared.cancel()
    }

    pub fn state(&self) -> BatchState {
        self.shared.state()
    }
}

/// Envelope settings of a batch request
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    pub service_root: String,
    /// `Accept` of the envelope; some servers expect `application/octet-stream`
    pub accept: String,
}

impl BatchConfig {
    pub fn new(service_root: impl Into<String>) -> Self {
        Self {
            service_root: service_root.into(),
            accept: media::MULTIPART_MIXED.to_string(),
        }
    }

    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = accept.into();
        self
    }
}

/// Ordered retrievals and change sets sent as one multipart request
pub struct Batch {
    builder: RequestBuilder,
    config: BatchConfig,
    submitted: Vec<Submitted>,
    open: Option<Vec<BatchOperation>>,
    next_id: usize,
    next_content_id: usize,
    shared: Arc<Shared>,
}

impl Batch {
    pub fn new(builder: RequestBuilder, config: BatchConfig) -> Self {
        Self {
            builder,
            config,
            submitted: Vec::new(),
            open: None,
            next_id: 0,
            next_content_id: 1,
            shared: Arc::new(Shared {
                state: AtomicU8::new(BatchState::Collecting as u8),
                token: CancellationToken::new(),
            }),
        }
    }

    pub fn state(&self) -> BatchState {
        self.shared.state()
    }

    pub fn canceller(&self) -> BatchCanceller {
        BatchCanceller {
            shared: self.shared.clone(),
        }
    }

    pub fn cancel(&self) -> CancelOutcome {
        self.shared.cancel()
    }

    /// Number of queued operations, including an open change set
    pub fn len(&self) -> usize {
        self.next_id
    }

    pub fn is_empty(&self) -> bool {
        self.next_id == 0
    }

    pub fn has_open_change_set(&self) -> bool {
        self.open.is_some()
    }

    fn ensure_collecting(&self) -> Result<(), BatchError> {
        match self.state() {
            BatchState::Collecting => Ok(()),
            actual => Err(BatchError::InvalidState {
                expected: BatchState::Collecting.label(),
                actual: actual.label(),
            }),
        }
    }

    fn next_operation_id(&mut self) -> OperationId {
        let id = OperationId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Queue a top-level read or function invocation
    pub fn add_retrieve(&mut self, spec: &RequestSpec) -> Result<OperationId, BatchError> {
        self.ensure_collecting()?;
        if self.open.is_some() {
            return Err(BatchError::ChangeSetStillOpen);
        }
        if !spec.kind().is_retrieval() {
            return Err(RequestError::InvalidOperation {
                operation: spec.kind().name(),
                target: "a batch retrieval".to_string(),
            }
            .into());
        }
        if let Some(id) = spec.references().into_iter().next() {
            return Err(BatchError::UnknownContentId(id));
        }
        let request = self.builder.build(spec)?;
        let id = self.next_operation_id();
        self.submitted.push(Submitted::Retrieval(BatchOperation {
            id,
            content_id: None,
            request,
        }));
        Ok(id)
    }

    pub fn begin_change_set(&mut self) -> Result<(), BatchError> {
        self.ensure_collecting()?;
        if self.open.is_some() {
            return Err(BatchError::ChangeSetAlreadyOpen);
        }
        self.open = Some(Vec::new());
        Ok(())
    }

    /// Queue a change in the open change set and return it with its content id
    pub fn add_change(&mut self, spec: &RequestSpec) -> Result<BatchOperation, BatchError> {
        self.ensure_collecting()?;
        let Some(members) = self.open.as_ref() else {
            return Err(BatchError::NoOpenChangeSet);
        };
        if spec.kind().is_retrieval() {
            return Err(BatchError::RetrievalInChangeSet);
        }
        for reference in spec.references() {
            let known = members
                .iter()
                .any(|m| m.content_id.as_deref() == Some(reference.as_str()));
            if !known {
                return Err(BatchError::UnknownContentId(reference));
            }
        }

        let request = self.builder.build(spec)?;
        let id = self.next_operation_id();
        let content_id = self.next_content_id.to_string();
        self.next_content_id += 1;
        let operation = BatchOperation {
            id,
            content_id: Some(content_id),
            request,
        };
        if let Some(members) = self.open.as_mut() {
            members.push(operation.clone());
        }
        Ok(operation)
    }

    pub fn commit_change_set(&mut self) -> Result<(), BatchError> {
        self.ensure_collecting()?;
        match self.open.take() {
            None => Err(BatchError::NoOpenChangeSet),
            Some(members) if members.is_empty() => {
                self.open = Some(members);
                Err(BatchError::EmptyChangeSet)
            }
            Some(members) => {
                self.submitted.push(Submitted::ChangeSet(members));
                Ok(())
            }
        }
    }

    fn pending(&self) -> Vec<OperationId> {
        self.submitted
            .iter()
            .flat_map(|unit| match unit {
                Submitted::Retrieval(op) => vec![op.id],
                Submitted::ChangeSet(members) => members.iter().map(|m| m.id).collect(),
            })
            .collect()
    }

    fn envelope(&self) -> HttpRequest {
        let mut writer = BatchRequestBuilder::new(&self.config.service_root);
        for unit in &self.submitted {
            match unit {
                Submitted::Retrieval(operation) => writer.add_request(operation),
                Submitted::ChangeSet(members) => writer.add_change_set(members),
            }
        }
        let version = self.builder.options().version;
        let mut request_headers = Headers::new();
        request_headers.insert(version.version_header(), version.header_value());
        request_headers.insert(version.max_version_header(), version.header_value());
        request_headers.insert(headers::CONTENT_TYPE, writer.content_type());
        request_headers.insert(headers::ACCEPT, self.config.accept.clone());

        HttpRequest {
            method: Method::Post,
            url: join_url(&self.config.service_root, BATCH_SEGMENT),
            headers: request_headers,
            body: Some(writer.finish()),
        }
    }

    /// Dispatch the batch once and demultiplex the response
    pub async fn send(&self, transport: &dyn Transport, codec: &PayloadCodec) -> Result<BatchResponse, BatchError> {
        if self.open.is_some() {
            return Err(BatchError::ChangeSetStillOpen);
        }
        let request = self.envelope();

        match self.shared.transition(BatchState::Collecting, BatchState::Sent) {
            Ok(()) => {}
            Err(BatchState::Cancelled) => return Err(BatchError::Cancelled(CancelPoint::BeforeDispatch)),
            Err(actual) => {
                return Err(BatchError::InvalidState {
                    expected: BatchState::Collecting.label(),
                    actual: actual.label(),
                });
            }
        }

        let pending = self.pending();
        debug!("Sending batch with {} operation(s) to {}", pending.len(), request.url);

        let response = tokio::select! {
            biased;
            _ = self.shared.token.cancelled() => {
                self.shared.set(BatchState::Failed);
                warn!("Batch cancelled after dispatch; {} operation(s) in unknown state", pending.len());
                return Err(BatchError::Cancelled(CancelPoint::AfterDispatch));
            }
            result = transport.send(request) => result,
        };

        let response = match response {
            Ok(response) => response,
            Err(source) => {
                self.shared.set(BatchState::Failed);
                return Err(BatchTransportError { source, pending }.into());
            }
        };

        if !response.is_success() {
            self.shared.set(BatchState::Failed);
            let (_, message) = parse_error_message(&response.body, response.content_type());
            return Err(BatchError::Rejected {
                status: response.status,
                message,
                pending,
            });
        }

        let parts = match BatchResponseParser::parse(&response.body, response.content_type()) {
            Ok(parts) => parts,
            Err(message) => {
                self.shared.set(BatchState::Failed);
                return Err(BatchError::MalformedResponse(message));
            }
        };
        debug!(
            "Batch response: {} part(s) for {} submitted unit(s)",
            parts.len(),
            self.submitted.len()
        );

        let result = demultiplex(&self.submitted, parts, codec);
        for failure in result.change_set_failures() {
            warn!("{}", failure);
        }
        self.shared.set(BatchState::Completed);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_transitions() {
        let shared = Shared {
            state: AtomicU8::new(BatchState::Collecting as u8),
            token: CancellationToken::new(),
        };
        assert_eq!(shared.cancel(), CancelOutcome::BeforeDispatch);
        assert_eq!(shared.state(), BatchState::Cancelled);
        assert_eq!(shared.cancel(), CancelOutcome::AlreadyFinished);

        shared.set(BatchState::Sent);
        assert_eq!(shared.cancel(), CancelOutcome::AfterDispatch);
        assert!(shared.token.is_cancelled());
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(BatchState::from_u8(BatchState::Failed as u8), BatchState::Failed);
        assert!(BatchState::Completed.is_terminal());
        assert!(!BatchState::Sent.is_terminal());
    }
}
