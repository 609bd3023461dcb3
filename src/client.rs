// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The upstream service contract (spec §6) and the error taxonomy §7's
//! retry table is built on. `UpstreamClient` is the seam at which the
//! concrete CloudWatch Logs HTTP/SDK transport — explicitly out of scope
//! for this crate (spec §1) — attaches.

use async_trait::async_trait;
use serde_json::Value;

use crate::target::{StorageClass, Target};

/// One wire-format event as sent to `PutLogEvents`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireEvent {
    pub timestamp_ms: i64,
    pub message: String,
}

/// A fully-built request for one batch (the output of `Batch::build`, spec
/// §4.2).
#[derive(Clone, Debug)]
pub struct PutLogEventsRequest {
    pub target: Target,
    pub events: Vec<WireEvent>,
    pub entity: Option<Value>,
}

/// Optional sentinel indices CloudWatch Logs returns alongside a successful
/// `PutLogEvents` response when some events in the request were rejected
/// for reasons that do not fail the whole call (spec §6).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RejectedLogEventsInfo {
    pub too_old_end_index: Option<usize>,
    pub too_new_start_index: Option<usize>,
    pub expired_end_index: Option<usize>,
}

impl RejectedLogEventsInfo {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.too_old_end_index.is_none()
            && self.too_new_start_index.is_none()
            && self.expired_end_index.is_none()
    }
}

/// Successful `PutLogEvents` response.
#[derive(Clone, Debug, Default)]
pub struct PutLogEventsResponse {
    pub rejected_info: RejectedLogEventsInfo,
}

/// The error taxonomy spec §6/§7 classify against. Every variant maps to
/// exactly one `RetryWaitPolicy` family (or "terminal"/"recoverable") in
/// `sender.rs`.
#[derive(Clone, Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The target log group or stream does not exist. Recoverable via
    /// `TargetManager::init_target`, then retry the same batch.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// The request itself is malformed and will never succeed. Terminal.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The exact same data was already accepted under a previous request.
    /// Terminal (treat as success-adjacent — the data is durably stored).
    #[error("data already accepted: {0}")]
    DataAlreadyAccepted(String),

    /// The log group or stream already exists. Only meaningful as the
    /// result of a create call; treated as success by the caller.
    #[error("resource already exists: {0}")]
    ResourceAlreadyExists(String),

    /// Upstream is unavailable, throttling, or returned a generic 5xx /
    /// timeout. Long-retry family.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("throttled: {0}")]
    Throttling(String),
    #[error("server error ({status}): {0}", status = .1)]
    ServerError(String, u16),
    #[error("request timed out: {0}")]
    RequestTimeout(String),
    #[error("response timed out: {0}")]
    ResponseTimeout(String),
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// Any other recognized, typed AWS API error not covered above.
    /// Short-retry family.
    #[error("upstream api error ({code}): {message}", code = .0, message = .1)]
    OtherApiError(String, String),

    /// An error from below the API layer (DNS, TLS, transport panic, an
    /// error type this crate does not recognize at all). Terminal; §7
    /// "Unknown non-upstream error".
    #[error("unrecognized transport error: {0}")]
    Unknown(String),
}

impl UpstreamError {
    /// Human-readable classification used in log lines (§7's table).
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            UpstreamError::ResourceNotFound(_) => "ResourceNotFound",
            UpstreamError::InvalidParameter(_) => "InvalidParameter",
            UpstreamError::DataAlreadyAccepted(_) => "DataAlreadyAccepted",
            UpstreamError::ResourceAlreadyExists(_) => "ResourceAlreadyExists",
            UpstreamError::ServiceUnavailable(_) => "ServiceUnavailable",
            UpstreamError::Throttling(_) => "Throttling",
            UpstreamError::ServerError(..) => "ServerError",
            UpstreamError::RequestTimeout(_) => "RequestTimeout",
            UpstreamError::ResponseTimeout(_) => "ResponseTimeout",
            UpstreamError::ConnectionError(_) => "ConnectionError",
            UpstreamError::OtherApiError(..) => "OtherApiError",
            UpstreamError::Unknown(_) => "Unknown",
        }
    }

    /// Whether a create-group/create-stream call saw its target already
    /// exist, which spec §6 treats as success.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, UpstreamError::ResourceAlreadyExists(_))
    }
}

/// Current retention, as reported by `DescribeLogGroups`, for one log
/// group.
#[derive(Clone, Debug)]
pub struct LogGroupRetention {
    pub group: String,
    /// `None` means no retention policy is currently set (never expire).
    pub retention_days: Option<i32>,
}

/// The trait boundary standing in for the concrete CloudWatch Logs
/// HTTP/SDK client (spec §1 Non-goals: "does not... authenticate to the
/// upstream service"; spec §6 "Upstream service"). Every method here
/// corresponds 1:1 to an operation the spec names.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn put_log_events(
        &self,
        request: PutLogEventsRequest,
    ) -> Result<PutLogEventsResponse, UpstreamError>;

    async fn create_log_stream(&self, target: &Target) -> Result<(), UpstreamError>;

    async fn create_log_group(
        &self,
        group: &str,
        class: StorageClass,
    ) -> Result<(), UpstreamError>;

    async fn put_retention_policy(
        &self,
        group: &str,
        retention_days: i32,
    ) -> Result<(), UpstreamError>;

    async fn describe_log_groups(
        &self,
        groups: &[String],
    ) -> Result<Vec<LogGroupRetention>, UpstreamError>;
}
