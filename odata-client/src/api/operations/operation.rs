//! Batch operation types

use std::fmt;

use crate::api::codec::Payload;
use crate::api::error::{CodecError, OperationError};
use crate::api::request::RequestDescriptor;
use crate::api::transport::Headers;

/// Correlation id of an operation within one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub usize);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation #{}", self.0)
    }
}

/// A single request queued in a batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOperation {
    /// Position-based id, unique within the batch
    pub id: OperationId,
    /// Content id for change set members, referenced as `$n` by later members
    pub content_id: Option<String>,
    pub request: RequestDescriptor,
}

impl BatchOperation {
    /// Get the content id reference (`$n`) for this operation, if it has one
    pub fn reference(&self) -> Option<String> {
        self.content_id.as_ref().map(|id| format!("${}", id))
    }
}

/// Successful response of one operation
#[derive(Debug, Clone, PartialEq)]
pub struct OperationSuccess {
    pub status: u16,
    pub headers: Headers,
    /// Decoded body; `None` for 204 and other empty responses
    pub payload: Option<Payload>,
    /// `OData-EntityID` / `DataServiceId` or `Location` of a created entity
    pub entity_id: Option<String>,
    pub etag: Option<String>,
    /// Set when the server answered 2xx but the body could not be decoded
    pub decode_error: Option<CodecError>,
}

impl OperationSuccess {
    /// Fail when the body was present but undecodable
    pub fn into_decoded(mut self) -> Result<Self, CodecError> {
        match self.decode_error.take() {
            Some(error) => Err(error),
            None => Ok(self),
        }
    }
}

/// Result of one operation in a batch response
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    pub operation: OperationId,
    pub content_id: Option<String>,
    pub outcome: Result<OperationSuccess, OperationError>,
}

impl OperationResult {
    /// Check if this result represents a successful operation
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Check if this result represents a failed operation
    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    pub fn error(&self) -> Option<&OperationError> {
        self.outcome.as_ref().err()
    }

    pub fn success(&self) -> Option<&OperationSuccess> {
        self.outcome.as_ref().ok()
    }
}
