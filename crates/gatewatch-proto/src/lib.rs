#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Wire protocol types for the gatewatch content-analysis IPC channel.
//!
//! This crate defines the messages exchanged between a connected peer (a
//! browser process) and the agent. Each direction carries a tagged-union
//! envelope with exactly one variant populated per message:
//!
//! - peer → agent: [`PeerToAgent`] — `request`, `ack`, or `cancel`
//! - agent → peer: [`AgentToPeer`] — `response`
//!
//! ## Wire format
//! Messages are JSON, delivered one per frame. Frame demarcation (a 4-byte
//! little-endian length prefix) is owned by the transport layer in
//! `gatewatch-agent`; the helpers here encode and decode the JSON payload
//! only.

use serde::{Deserialize, Serialize};
use std::io;

/// Protocol schema version. Bump when changing message format.
pub const PROTO_SCHEMA_VERSION: u32 = 1;

/// Maximum serialized message size accepted on either side (16 MiB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// The user action that triggered an analysis request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisConnector {
    /// A file attached to a form or message.
    FileAttached,
    /// A file downloaded by the user.
    FileDownloaded,
    /// Text pasted into the page.
    BulkDataEntry,
    /// A page sent to a printer.
    Print,
    /// A file transferred between sites.
    FileTransfer,
}

/// Descriptive payload of an analysis request. All fields are optional;
/// the agent treats absent fields as unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// SHA-256 digest of the content, when the peer computed one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

/// A shared-memory handle describing printable content.
///
/// The handle is an opaque integer owned by the peer; the agent forwards it
/// verbatim to the handler and never maps it itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintData {
    pub handle: u64,
    pub size: u64,
}

/// One content-analysis request as generated by a user action in the peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Unique token identifying this request. Must be non-empty; the agent
    /// rejects requests without one.
    pub request_token: String,
    /// Analysis tags (e.g. `"dlp"`). The first tag seeds the response.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector: Option<AnalysisConnector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_data: Option<RequestData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub print_data: Option<PrintData>,
    /// Deadline hint from the peer, milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_unix_ms: Option<u64>,
}

impl AnalysisRequest {
    /// Create a request with the given token and tags.
    #[must_use]
    pub fn new(request_token: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            request_token: request_token.into(),
            tags,
            ..Self::default()
        }
    }
}

/// Status of one analysis result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    #[default]
    Unknown,
    Success,
    Failure,
}

/// The action a triggered rule asks the peer to take.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    #[default]
    Unspecified,
    ReportOnly,
    Warn,
    Block,
}

/// A rule that matched during analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggeredRule {
    pub action: RuleAction,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rule_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rule_id: String,
}

/// One result within a response. A well-formed response carries exactly one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggered_rules: Vec<TriggeredRule>,
}

/// The agent's verdict for one analysis request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    /// Token copied from the request this response answers.
    pub request_token: String,
    pub results: Vec<AnalysisResult>,
}

impl AnalysisResponse {
    /// Create the default response for a request: a single result with
    /// status [`ResultStatus::Success`], the given tag, and no triggered
    /// rules. An unmodified prefilled response means "allow".
    #[must_use]
    pub fn prefilled(request_token: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            request_token: request_token.into(),
            results: vec![AnalysisResult {
                tag: tag.into(),
                status: ResultStatus::Success,
                triggered_rules: Vec::new(),
            }],
        }
    }

    /// The first result, creating it if the response has none.
    pub fn ensure_result(&mut self) -> &mut AnalysisResult {
        if self.results.is_empty() {
            self.results.push(AnalysisResult::default());
        }
        &mut self.results[0]
    }
}

/// Terminal status reported by the peer in an acknowledgement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    /// The response was received and applied.
    #[default]
    Success,
    /// The response could not be interpreted.
    InvalidResponse,
    /// No verdict arrived before the peer's deadline.
    FailedToGetVerdict,
    /// The verdict arrived after the user action completed.
    TooLate,
}

/// Peer acknowledgement that the agent's response was handled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub request_token: String,
    pub status: AckStatus,
    /// The action the peer ultimately enforced, if it differs from none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_action: Option<RuleAction>,
}

/// Notification that the peer abandons a set of outstanding requests.
///
/// The agent is informed only; in-flight handler work is not interrupted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequests {
    pub request_tokens: Vec<String>,
}

/// Envelope for messages sent by a peer to the agent.
///
/// Exactly one variant is populated per message; anything else fails to
/// decode and is treated as malformed by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerToAgent {
    Request(AnalysisRequest),
    Ack(Acknowledgement),
    Cancel(CancelRequests),
}

/// Envelope for messages sent by the agent to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentToPeer {
    Response(AnalysisResponse),
}

/// Encode a message to its JSON payload bytes (no frame prefix).
///
/// # Errors
/// Returns an error if serialization fails.
pub fn encode_message<T: Serialize>(message: &T) -> io::Result<Vec<u8>> {
    serde_json::to_vec(message).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Decode a message from its JSON payload bytes (no frame prefix).
///
/// # Errors
/// Returns an error if deserialization fails.
pub fn decode_message<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> io::Result<T> {
    serde_json::from_slice(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
