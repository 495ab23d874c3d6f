//! OData `$batch` codec for `RetrieveTotalRecordCount`.
//!
//! A request is a `multipart/mixed` body with one `application/http` part per
//! entity, each a `GET` of the `RetrieveTotalRecordCount` function. Dataverse
//! answers with one part per request in the same order; with
//! `Prefer: odata.continue-on-error` a failing part carries its own error
//! status and the rest of the batch still executes.

use core::fmt::Write as _;
use core::sync::atomic::{AtomicU64, Ordering};
use serde::Deserialize;
use tally::{CountRequestItem, ItemResponse, TransportError};

const CRLF: &str = "\r\n";

static NEXT_BOUNDARY: AtomicU64 = AtomicU64::new(0);

/// Returns a boundary unique within this process.
pub fn boundary() -> String {
    format!(
        "batch_tally_{:016x}",
        NEXT_BOUNDARY.fetch_add(1, Ordering::Relaxed)
    )
}

/// `Content-Type` header value for a request built with `boundary`.
pub fn content_type(boundary: &str) -> String {
    format!("multipart/mixed; boundary={boundary}")
}

/// Builds the `$batch` body counting every item, in order.
///
/// `service_root` is the absolute Web API root ending in `/`.
pub fn encode_batch(boundary: &str, service_root: &str, items: &[CountRequestItem]) -> String {
    let mut body = String::with_capacity(items.len() * 256);

    for item in items {
        // Writing to a String cannot fail.
        let _ = write!(
            body,
            "--{boundary}{CRLF}\
             Content-Type: application/http{CRLF}\
             Content-Transfer-Encoding: binary{CRLF}\
             {CRLF}\
             GET {service_root}RetrieveTotalRecordCount(EntityNames=['{entity}']) HTTP/1.1{CRLF}\
             Accept: application/json{CRLF}\
             {CRLF}",
            entity = entity_literal(&item.logical_name),
        );
    }
    let _ = write!(body, "--{boundary}--{CRLF}");

    body
}

/// Escapes a name for use inside a quoted OData string literal in a URL.
fn entity_literal(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'\'' => out.push_str("''"),
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => {
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
    out
}

#[derive(Deserialize)]
struct RecordCountBody {
    #[serde(rename = "EntityRecordCountCollection")]
    collection: RecordCountCollection,
}

#[derive(Deserialize)]
struct RecordCountCollection {
    #[serde(rename = "Keys")]
    keys: Vec<String>,
    #[serde(rename = "Values")]
    values: Vec<i64>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Parses a `$batch` response into one [`ItemResponse`] per part, in order.
///
/// # Errors
///
/// Returns [`TransportError::Protocol`] when the body is not a multipart
/// batch response. Individual parts that fail or cannot be decoded become
/// [`ItemResponse::Fault`]s.
pub fn parse_batch_response(
    content_type: &str,
    body: &str,
) -> Result<Vec<ItemResponse>, TransportError> {
    let boundary = boundary_param(content_type).ok_or_else(|| {
        TransportError::Protocol(format!("missing multipart boundary in `{content_type}`"))
    })?;

    let body = body.replace(CRLF, "\n");
    let delimiter = format!("--{boundary}");
    let mut segments = body.split(delimiter.as_str());

    // Anything before the first delimiter is preamble.
    if segments.next().is_none() {
        return Err(TransportError::Protocol("empty batch response".to_owned()));
    }

    let mut responses = Vec::new();
    let mut closed = false;
    for segment in segments {
        if segment.starts_with("--") {
            closed = true;
            break;
        }
        responses.push(parse_part(segment)?);
    }

    if !closed {
        return Err(TransportError::Protocol(
            "batch response is missing its closing delimiter".to_owned(),
        ));
    }
    Ok(responses)
}

fn boundary_param(content_type: &str) -> Option<&str> {
    content_type
        .split(';')
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"'))
        .filter(|value| !value.is_empty())
}

/// Decodes one `application/http` part.
fn parse_part(segment: &str) -> Result<ItemResponse, TransportError> {
    let malformed = || TransportError::Protocol("malformed batch response part".to_owned());

    let segment = segment.trim_start_matches('\n');
    // Part headers, then the embedded HTTP response.
    let (_, http) = segment.split_once("\n\n").ok_or_else(malformed)?;
    let (head, payload) = http.split_once("\n\n").unwrap_or((http, ""));
    let status_line = head.lines().next().ok_or_else(malformed)?;
    let (status, reason) = parse_status_line(status_line).ok_or_else(malformed)?;
    let payload = payload.trim();

    if !(200..300).contains(&status) {
        let message = serde_json::from_str::<ErrorBody>(payload)
            .map(|body| body.error.message)
            .unwrap_or_else(|_| format!("HTTP {status} {reason}").trim_end().to_owned());
        return Ok(ItemResponse::fault(message));
    }

    if payload.is_empty() {
        return Ok(ItemResponse::fault(format!(
            "empty record count response (HTTP {status})"
        )));
    }

    Ok(match serde_json::from_str::<RecordCountBody>(payload) {
        Ok(RecordCountBody { collection }) => {
            match (collection.keys.into_iter().next(), collection.values.first()) {
                (Some(entity), Some(&count)) => match u64::try_from(count) {
                    Ok(count) => ItemResponse::count(entity, count),
                    Err(_) => ItemResponse::fault(format!("negative record count {count}")),
                },
                _ => ItemResponse::fault("empty record count collection"),
            }
        }
        Err(e) => ItemResponse::fault(format!("invalid record count response: {e}")),
    })
}

/// `HTTP/1.1 200 OK` -> `(200, "OK")`.
fn parse_status_line(line: &str) -> Option<(u16, &str)> {
    let mut parts = line.trim().splitn(3, ' ');
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    let status = parts.next()?.parse().ok()?;
    Some((status, parts.next().unwrap_or_default()))
}
