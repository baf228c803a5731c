//! Error taxonomy for the generation client.
//!
//! Every error here travels inside an `anyhow::Error`; callers recover the
//! concrete kind with `downcast_ref`.

use reqwest::StatusCode;
use serde_json::Value;
use std::fmt;

use crate::api::TaskHandle;

/// What went wrong while talking to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connection could not be established (refused, DNS, TLS, ...)
    Connect,
    /// The request did not complete within the configured timeout
    Timeout,
    /// HTTP 404, e.g. an unknown task id
    NotFound,
    /// Any other 4xx response
    ClientError,
    /// 5xx response
    ServerError,
    /// The body was not a valid envelope or payload
    Decode,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportErrorKind::Connect => "connection failed",
            TransportErrorKind::Timeout => "request timed out",
            TransportErrorKind::NotFound => "not found",
            TransportErrorKind::ClientError => "request rejected",
            TransportErrorKind::ServerError => "server error",
            TransportErrorKind::Decode => "malformed response",
        };
        f.write_str(s)
    }
}

/// The exchange could not be completed, or the service answered with a
/// non-success HTTP status or an undecodable body.
#[derive(Debug, Clone)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    /// Builds an error for a non-success HTTP status.
    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            kind: classify_status(status),
            status: Some(status.as_u16()),
            message: message.into(),
        }
    }

    /// Maps a reqwest send/read failure onto a transport error.
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return Self::from_status(status, error.to_string());
        }
        let kind = if error.is_timeout() {
            TransportErrorKind::Timeout
        } else if error.is_decode() || error.is_body() {
            TransportErrorKind::Decode
        } else {
            TransportErrorKind::Connect
        };
        Self::new(kind, error.to_string())
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "Transport error ({}, HTTP {}): {}", self.kind, status, self.message),
            None => write!(f, "Transport error ({}): {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for TransportError {}

/// Classifies a non-success HTTP status.
pub fn classify_status(status: StatusCode) -> TransportErrorKind {
    match status {
        StatusCode::NOT_FOUND => TransportErrorKind::NotFound,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => TransportErrorKind::Timeout,
        s if s.is_client_error() => TransportErrorKind::ClientError,
        s if s.is_server_error() => TransportErrorKind::ServerError,
        // 1xx/3xx that reqwest did not resolve on its own
        _ => TransportErrorKind::Decode,
    }
}

/// The service was reached and answered `success: false`.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainFailure {
    /// Error detail exactly as the service sent it.
    pub detail: Value,
}

impl DomainFailure {
    pub fn new(detail: Value) -> Self {
        Self { detail }
    }

    /// Best-effort human readable message from the detail.
    pub fn message(&self) -> String {
        match &self.detail {
            Value::String(s) => s.clone(),
            Value::Object(map) => match map.get("message").and_then(Value::as_str) {
                Some(message) => message.to_string(),
                None => self.detail.to_string(),
            },
            Value::Null => "no error detail provided".to_string(),
            other => other.to_string(),
        }
    }

    /// Service error code, e.g. `VALIDATION_ERROR`.
    pub fn code(&self) -> Option<&str> {
        self.detail.get("code").and_then(Value::as_str)
    }
}

impl fmt::Display for DomainFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code() {
            Some(code) => write!(f, "Service reported failure [{}]: {}", code, self.message()),
            None => write!(f, "Service reported failure: {}", self.message()),
        }
    }
}

impl std::error::Error for DomainFailure {}

/// The task reached the terminal `failed` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailed {
    pub task: TaskHandle,
}

impl fmt::Display for TaskFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task {} failed", self.task)
    }
}

impl std::error::Error for TaskFailed {}

/// The polling budget ran out before the task reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTimeout {
    pub task: TaskHandle,
    pub attempts: u32,
}

impl fmt::Display for TaskTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Task {} did not finish after {} status queries",
            self.task, self.attempts
        )
    }
}

impl std::error::Error for TaskTimeout {}

/// The caller cancelled the wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cancelled {
    pub task: TaskHandle,
    pub attempts: u32,
}

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Waiting for task {} was cancelled after {} status queries",
            self.task, self.attempts
        )
    }
}

impl std::error::Error for Cancelled {}
