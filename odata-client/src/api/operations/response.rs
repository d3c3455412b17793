//! Batch response demultiplexing
//!
//! Top-level parts answer operations in submission order. Inside a change
//! set, parts are matched by Content-ID first and by position otherwise.

use std::collections::HashMap;

use log::warn;

use crate::api::codec::{ExpectedPayload, PayloadCodec, parse_error_message};
use crate::api::constants::{headers, media};
use crate::api::error::{ChangeSetFailure, OperationError, OperationFailure};

use super::operation::{BatchOperation, OperationId, OperationResult, OperationSuccess};
use super::wire::{PartResponse, ResponsePart};

/// Submitted shape of a batch, used to attribute response parts
#[derive(Debug, Clone)]
pub(crate) enum Submitted {
    Retrieval(BatchOperation),
    ChangeSet(Vec<BatchOperation>),
}

/// Per-operation results of a dispatched batch
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchResponse {
    results: Vec<OperationResult>,
    change_sets: Vec<Vec<OperationId>>,
}

impl BatchResponse {
    /// Results in submission order
    pub fn results(&self) -> &[OperationResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<OperationResult> {
        self.results
    }

    pub fn get(&self, id: OperationId) -> Option<&OperationResult> {
        self.results.iter().find(|r| r.operation == id)
    }

    pub fn by_content_id(&self, content_id: &str) -> Option<&OperationResult> {
        let content_id = content_id.trim_start_matches('$');
        self.results
            .iter()
            .find(|r| r.content_id.as_deref() == Some(content_id))
    }

    pub fn is_success(&self) -> bool {
        self.results.iter().all(OperationResult::is_success)
    }

    /// One failure per change set that was not applied
    pub fn change_set_failures(&self) -> Vec<ChangeSetFailure> {
        self.change_sets
            .iter()
            .filter_map(|members| {
                let operation_errors: Vec<OperationFailure> = members
                    .iter()
                    .filter_map(|id| self.get(*id))
                    .filter_map(|result| {
                        result.error().map(|error| OperationFailure {
                            operation: result.operation,
                            content_id: result.content_id.clone(),
                            error: error.clone(),
                        })
                    })
                    .collect();
                (!operation_errors.is_empty()).then_some(ChangeSetFailure { operation_errors })
            })
            .collect()
    }
}

pub(crate) fn demultiplex(
    submitted: &[Submitted],
    parts: Vec<ResponsePart>,
    codec: &PayloadCodec,
) -> BatchResponse {
    let mut response = BatchResponse::default();
    let mut parts = parts.into_iter();

    for unit in submitted {
        match unit {
            Submitted::Retrieval(operation) => {
                let outcome = match parts.next() {
                    Some(ResponsePart::Single(part)) => decode(operation, part, codec)
                        .and_then(|success| success.into_decoded().map_err(OperationError::from)),
                    // a change set answer in a retrieval slot means the server lost track
                    Some(ResponsePart::ChangeSet(_)) | None => Err(OperationError::MissingResponse),
                };
                response.results.push(result(operation, outcome));
            }
            Submitted::ChangeSet(members) => {
                let answered = match parts.next() {
                    Some(ResponsePart::ChangeSet(parts)) => parts,
                    // the whole change set was answered with a single error response
                    Some(ResponsePart::Single(part)) => vec![part],
                    None => Vec::new(),
                };
                response
                    .change_sets
                    .push(members.iter().map(|m| m.id).collect());
                response
                    .results
                    .extend(change_set_results(members, answered, codec));
            }
        }
    }
    response
}

fn change_set_results(
    members: &[BatchOperation],
    answered: Vec<PartResponse>,
    codec: &PayloadCodec,
) -> Vec<OperationResult> {
    let matched = match_parts(members, answered);

    let failed = members
        .iter()
        .zip(&matched)
        .find(|(_, part)| part.as_ref().is_some_and(|p| !p.is_success()))
        .map(|(member, _)| member.id);
    let incomplete = matched.iter().any(Option::is_none);

    if failed.is_none() && !incomplete {
        return members
            .iter()
            .zip(matched)
            .map(|(member, part)| {
                let outcome = part
                    .map(|p| decode(member, p, codec))
                    .unwrap_or(Err(OperationError::MissingResponse));
                // applied by the server even when the body is unreadable
                if let Ok(OperationSuccess {
                    decode_error: Some(error),
                    ..
                }) = &outcome
                {
                    warn!("{} was applied but its response body could not be decoded: {}", member.id, error);
                }
                result(member, outcome)
            })
            .collect();
    }

    // atomic: nothing in the set was applied
    members
        .iter()
        .zip(matched)
        .map(|(member, part)| {
            let error = match part {
                Some(part) if !part.is_success() => server_error(&part),
                Some(_) => OperationError::ChangeSetAborted { failed },
                None if failed.is_some() => OperationError::ChangeSetAborted { failed },
                None => OperationError::MissingResponse,
            };
            result(member, Err(error))
        })
        .collect()
}

/// Pair each member with its response part
///
/// A lone error part with no Content-ID answers the first member.
fn match_parts(members: &[BatchOperation], answered: Vec<PartResponse>) -> Vec<Option<PartResponse>> {
    let mut by_id: HashMap<String, PartResponse> = HashMap::new();
    let mut positional = Vec::new();
    for part in answered {
        let known = part
            .content_id
            .as_ref()
            .is_some_and(|id| members.iter().any(|m| m.content_id.as_ref() == Some(id)));
        match (known, part.content_id.clone()) {
            (true, Some(id)) => {
                by_id.insert(id, part);
            }
            _ => positional.push(part),
        }
    }

    let mut positional = positional.into_iter();
    members
        .iter()
        .map(|member| {
            member
                .content_id
                .as_ref()
                .and_then(|id| by_id.remove(id))
                .or_else(|| positional.next())
        })
        .collect()
}

fn decode(operation: &BatchOperation, part: PartResponse, codec: &PayloadCodec) -> Result<OperationSuccess, OperationError> {
    decode_part(operation.request.expected.as_ref(), part, codec)
}

/// Decode one HTTP response, batched or not, into an operation outcome
///
/// Only non-2xx statuses are errors. A 2xx body that fails to decode is kept
/// in [`OperationSuccess::decode_error`], since the server did the work.
pub(crate) fn decode_part(
    expected: Option<&ExpectedPayload>,
    part: PartResponse,
    codec: &PayloadCodec,
) -> Result<OperationSuccess, OperationError> {
    if !part.is_success() {
        return Err(server_error(&part));
    }

    let version = codec.options().version;
    let entity_id = part
        .headers
        .get(version.entity_id_header())
        .or_else(|| part.headers.get(headers::LOCATION))
        .map(str::to_string);
    let etag = part.headers.get(headers::ETAG).map(str::to_string);

    let has_body = part.status != 204 && !part.body.iter().all(u8::is_ascii_whitespace);
    let decoded = match (expected, has_body) {
        (Some(expected), true) => {
            let content_type = part
                .headers
                .get(headers::CONTENT_TYPE)
                .unwrap_or(media::APPLICATION_JSON);
            codec.deserialize(&part.body, content_type, expected).map(Some)
        }
        _ => Ok(None),
    };
    let (payload, decode_error) = match decoded {
        Ok(payload) => (payload, None),
        Err(error) => (None, Some(error)),
    };

    Ok(OperationSuccess {
        status: part.status,
        headers: part.headers,
        payload,
        entity_id,
        etag,
        decode_error,
    })
}

fn server_error(part: &PartResponse) -> OperationError {
    let (code, message) = parse_error_message(&part.body, part.headers.get(headers::CONTENT_TYPE));
    OperationError::Server {
        status: part.status,
        code,
        message,
    }
}

fn result(operation: &BatchOperation, outcome: Result<OperationSuccess, OperationError>) -> OperationResult {
    OperationResult {
        operation: operation.id,
        content_id: operation.content_id.clone(),
        outcome,
    }
}
