//! multipart/mixed batch encoding
//!
//! Each part carries one HTTP request or response as `application/http`;
//! change sets are nested multipart parts with their own boundary. Lines end
//! in CRLF on write; both CRLF and bare LF are accepted on read.

use crate::api::codec::MediaType;
use crate::api::constants::{headers, media};
use crate::api::request::{RequestDescriptor, join_url};
use crate::api::transport::{Headers, HttpResponse};

use super::operation::BatchOperation;

const CRLF: &str = "\r\n";

/// Writes a batch request body
pub struct BatchRequestBuilder {
    boundary: String,
    service_root: String,
    body: Vec<u8>,
}

impl BatchRequestBuilder {
    pub fn new(service_root: &str) -> Self {
        Self::with_boundary(service_root, format!("batch_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn with_boundary(service_root: &str, boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            service_root: service_root.to_string(),
            body: Vec::new(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// `Content-Type` of the whole batch
    pub fn content_type(&self) -> String {
        format!("{}; boundary={}", media::MULTIPART_MIXED, self.boundary)
    }

    fn push(&mut self, text: &str) {
        self.body.extend_from_slice(text.as_bytes());
    }

    /// Append a top-level retrieval
    pub fn add_request(&mut self, operation: &BatchOperation) {
        let delimiter = format!("--{}{}", self.boundary, CRLF);
        self.push(&delimiter);
        self.write_http_part(operation);
    }

    /// Append a change set holding `operations` in order
    pub fn add_change_set(&mut self, operations: &[BatchOperation]) {
        let change_set_boundary = format!("changeset_{}", uuid::Uuid::new_v4().simple());
        let head = format!(
            "--{}{crlf}{}: {}; boundary={}{crlf}{crlf}",
            self.boundary,
            headers::CONTENT_TYPE,
            media::MULTIPART_MIXED,
            change_set_boundary,
            crlf = CRLF
        );
        self.push(&head);
        for operation in operations {
            self.push(&format!("--{}{}", change_set_boundary, CRLF));
            self.write_http_part(operation);
        }
        self.push(&format!("--{}--{}", change_set_boundary, CRLF));
    }

    fn write_http_part(&mut self, operation: &BatchOperation) {
        let mut head = format!(
            "{}: {}{crlf}{}: binary{crlf}",
            headers::CONTENT_TYPE,
            media::APPLICATION_HTTP,
            headers::CONTENT_TRANSFER_ENCODING,
            crlf = CRLF
        );
        if let Some(content_id) = &operation.content_id {
            head.push_str(&format!("{}: {}{}", headers::CONTENT_ID, content_id, CRLF));
        }
        head.push_str(CRLF);
        head.push_str(&self.request_line(&operation.request));
        for (name, value) in operation.request.headers.iter() {
            head.push_str(&format!("{}: {}{}", name, value, CRLF));
        }
        head.push_str(CRLF);
        self.push(&head);
        if let Some(body) = &operation.request.body {
            self.body.extend_from_slice(body);
        }
        self.push(CRLF);
    }

    /// `$n`-rooted URLs stay relative so the server can substitute them
    fn request_line(&self, request: &RequestDescriptor) -> String {
        let url = if request.url.starts_with('$') {
            request.url.clone()
        } else {
            join_url(&self.service_root, &request.url)
        };
        format!("{} {} HTTP/1.1{}", request.method, url, CRLF)
    }

    pub fn finish(mut self) -> Vec<u8> {
        let closing = format!("--{}--{}", self.boundary, CRLF);
        self.push(&closing);
        self.body
    }
}

/// One HTTP response carried in a batch part
#[derive(Debug, Clone, PartialEq)]
pub struct PartResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub content_id: Option<String>,
}

impl PartResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl From<HttpResponse> for PartResponse {
    fn from(response: HttpResponse) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
            content_id: None,
        }
    }
}

/// Top-level part of a batch response
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePart {
    Single(PartResponse),
    ChangeSet(Vec<PartResponse>),
}

/// Parses buffered batch response bodies
pub struct BatchResponseParser;

impl BatchResponseParser {
    pub fn parse(body: &[u8], content_type: Option<&str>) -> Result<Vec<ResponsePart>, String> {
        let boundary = content_type
            .and_then(MediaType::parse)
            .and_then(|m| m.boundary().map(str::to_string))
            .or_else(|| first_delimiter(body))
            .ok_or_else(|| "batch response has no multipart boundary".to_string())?;

        split_parts(body, &boundary)?
            .into_iter()
            .map(|part| {
                let (head, content) = split_head(part);
                let mime = parse_headers(head);
                let is_change_set = mime
                    .get(headers::CONTENT_TYPE)
                    .and_then(MediaType::parse)
                    .filter(MediaType::is_multipart);
                match is_change_set {
                    Some(media_type) => {
                        let inner = media_type
                            .boundary()
                            .map(str::to_string)
                            .or_else(|| first_delimiter(content))
                            .ok_or_else(|| "change set response has no boundary".to_string())?;
                        split_parts(content, &inner)?
                            .into_iter()
                            .map(parse_http_part)
                            .collect::<Result<Vec<_>, _>>()
                            .map(ResponsePart::ChangeSet)
                    }
                    None => Ok(ResponsePart::Single(parse_http_part(part)?)),
                }
            })
            .collect()
    }
}

/// Boundary taken from the first `--` line when the header carries none
fn first_delimiter(body: &[u8]) -> Option<String> {
    String::from_utf8_lossy(body)
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("--") && line.len() > 2)
        .map(|line| line.trim_start_matches("--").trim_end_matches("--").to_string())
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| &haystack[i..i + needle.len()] == needle)
}

fn trim_line_end(bytes: &[u8]) -> &[u8] {
    let bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    bytes.strip_suffix(b"\r").unwrap_or(bytes)
}

fn skip_line_end(bytes: &[u8]) -> &[u8] {
    let bytes = bytes.strip_prefix(b"\r").unwrap_or(bytes);
    bytes.strip_prefix(b"\n").unwrap_or(bytes)
}

/// Bodies between `--boundary` delimiters, stopping at `--boundary--`
fn split_parts<'a>(body: &'a [u8], boundary: &str) -> Result<Vec<&'a [u8]>, String> {
    let delimiter = format!("--{}", boundary);
    let delimiter = delimiter.as_bytes();
    let mut parts = Vec::new();
    let mut position = find(body, delimiter, 0)
        .ok_or_else(|| format!("boundary '{}' not found", boundary))?;

    loop {
        let after = position + delimiter.len();
        if body[after..].starts_with(b"--") {
            return Ok(parts);
        }
        let start = body.len() - skip_line_end(&body[after..]).len();
        let Some(next) = find(body, delimiter, start) else {
            return Err(format!("boundary '{}' is not closed", boundary));
        };
        parts.push(trim_line_end(&body[start..next]));
        position = next;
    }
}

/// Split at the first blank line
fn split_head(part: &[u8]) -> (&str, &[u8]) {
    let crlf = find(part, b"\r\n\r\n", 0).map(|i| (i, i + 4));
    let lf = find(part, b"\n\n", 0).map(|i| (i, i + 2));
    let split = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };
    match split {
        Some((end, body_start)) => (
            std::str::from_utf8(&part[..end]).unwrap_or_default(),
            &part[body_start..],
        ),
        None => (std::str::from_utf8(part).unwrap_or_default(), &[]),
    }
}

fn parse_headers(head: &str) -> Headers {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect()
}

/// MIME headers, status line, HTTP headers and body of one part
fn parse_http_part(part: &[u8]) -> Result<PartResponse, String> {
    let (mime_head, http) = split_head(part);
    let mime = parse_headers(mime_head);
    let (http_head, body) = split_head(http);

    let mut lines = http_head.lines();
    let status_line = lines
        .next()
        .ok_or_else(|| "batch part has no status line".to_string())?;
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| format!("invalid status line '{}'", status_line))?;
    let headers = parse_headers(&lines.collect::<Vec<_>>().join("\n"));

    let content_id = mime
        .get(headers::CONTENT_ID)
        .or_else(|| headers.get(headers::CONTENT_ID))
        .map(str::to_string);

    Ok(PartResponse {
        status,
        headers,
        body: trim_line_end(body).to_vec(),
        content_id,
    })
}
