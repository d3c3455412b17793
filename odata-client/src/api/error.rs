//! Error types for the protocol engine
//!
//! Each component has its own error enum; the leaf structs carry the names
//! used throughout the documentation (`IncompleteKeyError`, `ChangeSetFailure`, ...).
//! Nothing in the engine retries on error: write operations are not assumed to
//! be idempotent, so every failure is surfaced to the caller.

use thiserror::Error;

use crate::api::context::EntityHandle;
use crate::api::operations::{CancelPoint, OperationId};

/// The metadata document is not well-formed or misses required structure
#[derive(Debug, Clone, PartialEq, Error)]
#[error("malformed metadata document: {message}")]
pub struct MetadataParseError {
    pub message: String,
}

impl MetadataParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The metadata document parsed but describes an inconsistent model
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetadataConsistencyError {
    #[error("{kind} '{name}' referenced by {referenced_by} is not declared")]
    DanglingReference {
        kind: &'static str,
        name: String,
        referenced_by: String,
    },

    #[error("duplicate {kind} '{name}'")]
    DuplicateName { kind: &'static str, name: String },

    #[error("invalid key on entity type '{entity_type}': {reason}")]
    InvalidKey { entity_type: String, reason: String },

    #[error(
        "navigation property '{navigation}' of '{entity_type}' declares partner '{partner}' which does not point back to it"
    )]
    PartnerMismatch {
        entity_type: String,
        navigation: String,
        partner: String,
    },

    #[error("type '{type_name}' has a cyclic base type chain")]
    CyclicInheritance { type_name: String },
}

/// Failure to build a [`MetadataModel`](crate::api::metadata::MetadataModel)
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetadataError {
    #[error(transparent)]
    Parse(#[from] MetadataParseError),

    #[error(transparent)]
    Consistency(#[from] MetadataConsistencyError),
}

/// A payload declares a type the model cannot resolve
#[derive(Debug, Clone, PartialEq, Error)]
#[error("type '{type_name}' cannot be resolved against the metadata model")]
pub struct UnknownTypeError {
    pub type_name: String,
}

impl UnknownTypeError {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
        }
    }
}

/// A payload is structurally invalid for the expected shape
#[derive(Debug, Clone, PartialEq, Error)]
#[error("malformed payload: {message}")]
pub struct MalformedPayloadError {
    pub message: String,
}

impl MalformedPayloadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// No codec handles the requested or received media type
#[derive(Debug, Clone, PartialEq, Error)]
#[error("unsupported payload format '{media_type}'")]
pub struct UnsupportedFormatError {
    pub media_type: String,
}

impl UnsupportedFormatError {
    pub fn new(media_type: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
        }
    }
}

/// Payload codec errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error(transparent)]
    UnknownType(#[from] UnknownTypeError),

    #[error(transparent)]
    Malformed(#[from] MalformedPayloadError),

    #[error(transparent)]
    UnsupportedFormat(#[from] UnsupportedFormatError),

    /// A value cannot be represented with the declared facets without losing data
    #[error("value of '{property}' does not fit {expected}: {reason}")]
    InvalidValue {
        property: String,
        expected: String,
        reason: String,
    },
}

impl CodecError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(MalformedPayloadError::new(message))
    }
}

/// Key properties of an instance are not populated yet
#[derive(Debug, Clone, PartialEq, Error)]
#[error("key of '{entity_type}' is incomplete, missing: {}", missing.join(", "))]
pub struct IncompleteKeyError {
    pub entity_type: String,
    pub missing: Vec<String>,
}

/// Request builder errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    #[error(transparent)]
    IncompleteKey(#[from] IncompleteKeyError),

    #[error(transparent)]
    UnsupportedFormat(#[from] UnsupportedFormatError),

    #[error(transparent)]
    UnknownType(#[from] UnknownTypeError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("unknown entity set, singleton or operation import '{0}'")]
    UnknownResource(String),

    #[error("'{segment}' is not a navigation property of '{entity_type}'")]
    UnknownNavigation { entity_type: String, segment: String },

    #[error("invalid resource path: {0}")]
    InvalidPath(String),

    #[error("{operation} cannot target {target}")]
    InvalidOperation {
        operation: &'static str,
        target: String,
    },
}

/// Failures of the transport collaborator
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request timed out")]
    Timeout,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// No batch response was received; nothing is reported as applied
#[derive(Debug, Clone, PartialEq, Error)]
#[error("batch transport failed with {} pending operation(s): {source}", pending.len())]
pub struct BatchTransportError {
    pub source: TransportError,
    pub pending: Vec<OperationId>,
}

/// Per-operation failure inside a batch response
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OperationError {
    #[error("server returned {status}: {message}")]
    Server {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Member of a change set rolled back because another member failed
    #[error("rolled back because another change set member failed")]
    ChangeSetAborted { failed: Option<OperationId> },

    #[error("no response part was returned for this operation")]
    MissingResponse,

    #[error("response could not be decoded: {0}")]
    Decode(#[from] CodecError),
}

/// One member's outcome in a failed change set
#[derive(Debug, Clone, PartialEq)]
pub struct OperationFailure {
    pub operation: OperationId,
    pub content_id: Option<String>,
    pub error: OperationError,
}

/// A change set was rejected; every member is reported as failed
#[derive(Debug, Clone, PartialEq, Error)]
#[error("change set failed: {} operation(s) not applied", operation_errors.len())]
pub struct ChangeSetFailure {
    pub operation_errors: Vec<OperationFailure>,
}

impl ChangeSetFailure {
    /// Failures reported by the server itself, excluding rolled-back members
    pub fn root_causes(&self) -> impl Iterator<Item = &OperationFailure> {
        self.operation_errors
            .iter()
            .filter(|f| matches!(f.error, OperationError::Server { .. }))
    }
}

/// Batch processor errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BatchError {
    #[error(transparent)]
    Transport(#[from] BatchTransportError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("batch rejected with status {status}: {message}")]
    Rejected {
        status: u16,
        message: String,
        pending: Vec<OperationId>,
    },

    #[error("batch is {actual}, operation requires {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("a change set is already open")]
    ChangeSetAlreadyOpen,

    #[error("no change set is open")]
    NoOpenChangeSet,

    #[error("a change set is still open")]
    ChangeSetStillOpen,

    #[error("change set contains no operations")]
    EmptyChangeSet,

    #[error("retrieval operations cannot be part of a change set")]
    RetrievalInChangeSet,

    #[error("content id '{0}' does not refer to an earlier operation of the open change set")]
    UnknownContentId(String),

    #[error("batch cancelled {0}")]
    Cancelled(CancelPoint),

    #[error("malformed batch response: {0}")]
    MalformedResponse(String),
}

/// Entity context errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContextError {
    #[error("{0} is not tracked by this context")]
    UnknownHandle(EntityHandle),

    #[error("entity {identity} of set '{entity_set}' is already attached")]
    AlreadyAttached { entity_set: String, identity: String },

    #[error("entity set '{entity_set}' does not accept instances of '{entity_type}'")]
    TypeMismatch {
        entity_set: String,
        entity_type: String,
    },

    #[error("'{property}' is not a member of '{entity_type}'")]
    UnknownMember {
        entity_type: String,
        property: String,
    },

    #[error("value for '{property}' does not conform to its declared type")]
    InvalidValue { property: String },

    #[error("key property '{property}' of a persisted entity cannot change")]
    KeyImmutable { property: String },

    #[error("{0} is marked for deletion")]
    Deleted(EntityHandle),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Non-transactional mutation failed; scoped to one instance
    #[error("change of {handle} failed: {error}")]
    Operation {
        handle: EntityHandle,
        error: OperationError,
    },

    #[error("change of {handle} was not delivered: {source}")]
    Transport {
        handle: EntityHandle,
        source: TransportError,
    },

    /// Transactional flush failed; names every pending instance
    #[error("transactional flush of {} entities failed: {failure}", handles.len())]
    ChangeSet {
        handles: Vec<EntityHandle>,
        failure: ChangeSetFailure,
    },

    #[error("transactional flush of {} entities was not applied: {source}", handles.len())]
    Batch {
        handles: Vec<EntityHandle>,
        source: BatchError,
    },
}

/// Errors surfaced by [`ODataClient`](crate::api::client::ODataClient)
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error("server returned {status}: {message}")]
    Status {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// A next link pointed back at a page that was already read
    #[error("next link '{0}' repeats an earlier page")]
    RepeatedNextLink(String),
}
