//! Error taxonomy and the non-critical / critical classification table.
//!
//! A handler fans out several fetches. Each failure is classified through an
//! [`ErrorPolicy`]: non-critical errors are accumulated and returned next to
//! the data, a critical error aborts the aggregation.

use std::str::FromStr;
use std::sync::OnceLock;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Reason codes of the orchestration API's status errors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StatusReason {
    Unauthorized,
    Forbidden,
    NotFound,
    AlreadyExists,
    Conflict,
    Gone,
    Invalid,
    ServerTimeout,
    Timeout,
    TooManyRequests,
    BadRequest,
    MethodNotAllowed,
    NotAcceptable,
    RequestEntityTooLarge,
    UnsupportedMediaType,
    InternalError,
    Expired,
    ServiceUnavailable,
    Unknown,
}

impl StatusReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusReason::Unauthorized => "Unauthorized",
            StatusReason::Forbidden => "Forbidden",
            StatusReason::NotFound => "NotFound",
            StatusReason::AlreadyExists => "AlreadyExists",
            StatusReason::Conflict => "Conflict",
            StatusReason::Gone => "Gone",
            StatusReason::Invalid => "Invalid",
            StatusReason::ServerTimeout => "ServerTimeout",
            StatusReason::Timeout => "Timeout",
            StatusReason::TooManyRequests => "TooManyRequests",
            StatusReason::BadRequest => "BadRequest",
            StatusReason::MethodNotAllowed => "MethodNotAllowed",
            StatusReason::NotAcceptable => "NotAcceptable",
            StatusReason::RequestEntityTooLarge => "RequestEntityTooLarge",
            StatusReason::UnsupportedMediaType => "UnsupportedMediaType",
            StatusReason::InternalError => "InternalError",
            StatusReason::Expired => "Expired",
            StatusReason::ServiceUnavailable => "ServiceUnavailable",
            StatusReason::Unknown => "Unknown",
        }
    }

    /// Fallback mapping when the API sent a status code but no usable reason.
    pub fn from_code(code: u16) -> Self {
        match code {
            400 => StatusReason::BadRequest,
            401 => StatusReason::Unauthorized,
            403 => StatusReason::Forbidden,
            404 => StatusReason::NotFound,
            405 => StatusReason::MethodNotAllowed,
            406 => StatusReason::NotAcceptable,
            409 => StatusReason::Conflict,
            410 => StatusReason::Gone,
            413 => StatusReason::RequestEntityTooLarge,
            415 => StatusReason::UnsupportedMediaType,
            422 => StatusReason::Invalid,
            429 => StatusReason::TooManyRequests,
            500 => StatusReason::InternalError,
            503 => StatusReason::ServiceUnavailable,
            504 => StatusReason::Timeout,
            _ => StatusReason::Unknown,
        }
    }

    /// Conventional HTTP status code for this reason.
    pub fn code(&self) -> u16 {
        match self {
            StatusReason::Unauthorized => 401,
            StatusReason::Forbidden => 403,
            StatusReason::NotFound => 404,
            StatusReason::AlreadyExists | StatusReason::Conflict => 409,
            StatusReason::Gone | StatusReason::Expired => 410,
            StatusReason::Invalid => 422,
            StatusReason::ServerTimeout | StatusReason::InternalError | StatusReason::Unknown => 500,
            StatusReason::Timeout => 504,
            StatusReason::TooManyRequests => 429,
            StatusReason::BadRequest => 400,
            StatusReason::MethodNotAllowed => 405,
            StatusReason::NotAcceptable => 406,
            StatusReason::RequestEntityTooLarge => 413,
            StatusReason::UnsupportedMediaType => 415,
            StatusReason::ServiceUnavailable => 503,
        }
    }
}

impl FromStr for StatusReason {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let r = match s.trim() {
            "Unauthorized" => StatusReason::Unauthorized,
            "Forbidden" => StatusReason::Forbidden,
            "NotFound" => StatusReason::NotFound,
            "AlreadyExists" => StatusReason::AlreadyExists,
            "Conflict" => StatusReason::Conflict,
            "Gone" => StatusReason::Gone,
            "Invalid" => StatusReason::Invalid,
            "ServerTimeout" => StatusReason::ServerTimeout,
            "Timeout" => StatusReason::Timeout,
            "TooManyRequests" => StatusReason::TooManyRequests,
            "BadRequest" => StatusReason::BadRequest,
            "MethodNotAllowed" => StatusReason::MethodNotAllowed,
            "NotAcceptable" => StatusReason::NotAcceptable,
            "RequestEntityTooLarge" => StatusReason::RequestEntityTooLarge,
            "UnsupportedMediaType" => StatusReason::UnsupportedMediaType,
            "InternalError" => StatusReason::InternalError,
            "Expired" => StatusReason::Expired,
            "ServiceUnavailable" => StatusReason::ServiceUnavailable,
            "Unknown" => StatusReason::Unknown,
            other => return Err(DataError::Internal(format!("unknown status reason: {}", other))),
        };
        Ok(r)
    }
}

impl std::fmt::Display for StatusReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

/// Errors surfaced by fetches, metric downloads and object conversion.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum DataError {
    #[error("{reason} ({code}): {message}")]
    Api { reason: StatusReason, code: u16, message: String },
    #[error("transport: {0}")]
    Transport(String),
    #[error("decode: {0}")]
    Decode(String),
    #[error("metric: {0}")]
    Metric(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl DataError {
    pub fn api(reason: StatusReason, message: impl Into<String>) -> Self {
        DataError::Api { reason, code: reason.code(), message: message.into() }
    }

    pub fn reason(&self) -> Option<StatusReason> {
        match self {
            DataError::Api { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    NonCritical,
    Critical,
}

/// Central classification table keyed on [`StatusReason`].
///
/// Transport, decode and internal errors are always critical.
#[derive(Debug, Clone)]
pub struct ErrorPolicy {
    reasons: FxHashMap<StatusReason, Severity>,
    /// Severity of API reasons missing from the table.
    other: Severity,
    metric: Severity,
}

/// Reasons that only degrade a response by default.
pub const DEFAULT_NON_CRITICAL: [StatusReason; 6] = [
    StatusReason::Forbidden,
    StatusReason::NotFound,
    StatusReason::MethodNotAllowed,
    StatusReason::ServiceUnavailable,
    StatusReason::TooManyRequests,
    StatusReason::Gone,
];

impl Default for ErrorPolicy {
    fn default() -> Self { Self::with_non_critical(DEFAULT_NON_CRITICAL) }
}

impl ErrorPolicy {
    /// Table where exactly `reasons` are non-critical.
    pub fn with_non_critical(reasons: impl IntoIterator<Item = StatusReason>) -> Self {
        let reasons = reasons.into_iter().map(|r| (r, Severity::NonCritical)).collect();
        Self { reasons, other: Severity::Critical, metric: Severity::NonCritical }
    }

    /// Every error is critical. Used for fetches whose failure must always abort.
    pub fn strict() -> Self {
        Self { reasons: FxHashMap::default(), other: Severity::Critical, metric: Severity::Critical }
    }

    /// Default table, replaced by `VISTA_NONCRITICAL_REASONS` (comma list) when set.
    pub fn from_env() -> Self {
        match std::env::var("VISTA_NONCRITICAL_REASONS") {
            Ok(list) => Self::parse_list(&list),
            Err(_) => Self::default(),
        }
    }

    fn parse_list(list: &str) -> Self {
        let mut reasons = Vec::new();
        for tok in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match tok.parse::<StatusReason>() {
                Ok(r) => reasons.push(r),
                Err(e) => warn!(error = %e, "ignoring entry in VISTA_NONCRITICAL_REASONS"),
            }
        }
        Self::with_non_critical(reasons)
    }

    /// Override one entry.
    pub fn set(mut self, reason: StatusReason, severity: Severity) -> Self {
        self.reasons.insert(reason, severity);
        self
    }

    pub fn classify(&self, err: &DataError) -> Severity {
        match err {
            DataError::Api { reason, .. } => self.reasons.get(reason).copied().unwrap_or(self.other),
            DataError::Metric(_) => self.metric,
            DataError::Transport(_) | DataError::Decode(_) | DataError::Internal(_) => Severity::Critical,
        }
    }

    /// Split an optional error into `(non_critical, critical)`.
    pub fn extract_errors(&self, err: Option<DataError>) -> (Vec<DataError>, Option<DataError>) {
        match err {
            None => (Vec::new(), None),
            Some(e) => match self.classify(&e) {
                Severity::NonCritical => (vec![e], None),
                Severity::Critical => (Vec::new(), Some(e)),
            },
        }
    }

    /// Append a non-critical error to `acc`, or return the critical one.
    ///
    /// On `Err` the accumulator is dropped; the caller must stop draining.
    pub fn append_error(&self, err: Option<DataError>, mut acc: Vec<DataError>) -> Result<Vec<DataError>, DataError> {
        let (mut non_critical, critical) = self.extract_errors(err);
        if let Some(e) = critical { return Err(e); }
        acc.append(&mut non_critical);
        Ok(acc)
    }
}

fn default_policy() -> &'static ErrorPolicy {
    static POLICY: OnceLock<ErrorPolicy> = OnceLock::new();
    POLICY.get_or_init(ErrorPolicy::default)
}

/// [`ErrorPolicy::extract_errors`] with the default table.
pub fn extract_errors(err: Option<DataError>) -> (Vec<DataError>, Option<DataError>) {
    default_policy().extract_errors(err)
}

/// [`ErrorPolicy::append_error`] with the default table.
pub fn append_error(err: Option<DataError>, acc: Vec<DataError>) -> Result<Vec<DataError>, DataError> {
    default_policy().append_error(err, acc)
}
