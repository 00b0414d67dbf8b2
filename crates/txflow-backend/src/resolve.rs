//! Field resolution for the construction service's responses.
//!
//! Different networks answer with different shapes, so every value we need is
//! looked up through an ordered list of extractors; the first non-empty hit
//! wins. Supporting a new shape means adding an extractor to a list.

use serde_json::Value;

/// Pulls one candidate value out of a response body.
pub type Extractor = fn(&Value) -> Option<String>;

/// Read a string (or number) at `path`. Empty strings count as missing.
fn text_at(value: &Value, path: &[&str]) -> Option<String> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    match current {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn transaction_id(v: &Value) -> Option<String> {
    text_at(v, &["transactionId"])
}

fn hash(v: &Value) -> Option<String> {
    text_at(v, &["hash"])
}

fn metadata_transaction_id(v: &Value) -> Option<String> {
    text_at(v, &["metadata", "transactionId"])
}

fn metadata_hash(v: &Value) -> Option<String> {
    text_at(v, &["metadata", "hash"])
}

fn status(v: &Value) -> Option<String> {
    text_at(v, &["status"])
}

fn value(v: &Value) -> Option<String> {
    text_at(v, &["value"])
}

fn metadata_status(v: &Value) -> Option<String> {
    text_at(v, &["metadata", "status"])
}

fn execution_value(v: &Value) -> Option<String> {
    text_at(v, &["metadata", "execution", "value"])
}

fn message(v: &Value) -> Option<String> {
    text_at(v, &["message"])
}

fn metadata_message(v: &Value) -> Option<String> {
    text_at(v, &["metadata", "message"])
}

fn execution_description(v: &Value) -> Option<String> {
    text_at(v, &["metadata", "execution", "description"])
}

/// Transaction handle: direct fields before metadata.
pub const HANDLE_EXTRACTORS: &[Extractor] = &[
    transaction_id,
    hash,
    metadata_transaction_id,
    metadata_hash,
];

/// Status reported on creation.
pub const SUBMIT_STATUS_EXTRACTORS: &[Extractor] = &[status, metadata_status, execution_value];

/// Status reported by the status endpoint, which may use `value`.
pub const POLL_STATUS_EXTRACTORS: &[Extractor] =
    &[status, value, metadata_status, execution_value];

pub const MESSAGE_EXTRACTORS: &[Extractor] =
    &[message, metadata_message, execution_description];

/// Status shown when creation succeeded but reported nothing.
pub const DEFAULT_SUBMIT_STATUS: &str = "created";

/// Status shown when a status query succeeded but reported nothing.
pub const DEFAULT_POLL_STATUS: &str = "pending";

/// Apply extractors in order; first hit wins.
pub fn first_match(body: &Value, extractors: &[Extractor]) -> Option<String> {
    extractors.iter().find_map(|extract| extract(body))
}

/// Everything the flow reads from a creation response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSubmission {
    pub handle: Option<String>,
    pub status: String,
    pub message: Option<String>,
}

pub fn resolve_submission(body: &Value) -> ResolvedSubmission {
    ResolvedSubmission {
        handle: first_match(body, HANDLE_EXTRACTORS),
        status: first_match(body, SUBMIT_STATUS_EXTRACTORS)
            .unwrap_or_else(|| DEFAULT_SUBMIT_STATUS.to_string()),
        message: first_match(body, MESSAGE_EXTRACTORS),
    }
}

/// Everything a poll tick reads from a status response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: String,
    /// Set when the network reports a (possibly new) canonical handle.
    pub handle: Option<String>,
}

pub fn resolve_status(body: &Value) -> StatusUpdate {
    StatusUpdate {
        status: first_match(body, POLL_STATUS_EXTRACTORS)
            .unwrap_or_else(|| DEFAULT_POLL_STATUS.to_string()),
        handle: first_match(body, HANDLE_EXTRACTORS),
    }
}
