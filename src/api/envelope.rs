use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DomainFailure, TransportError, TransportErrorKind};

/// Uniform `{success, data, error}` wrapper around every response.
///
/// `data` stays as raw JSON until the caller has checked `success`; use
/// [`ApiEnvelope::payload`] to get at typed data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    pub error: Option<Value>,
    pub timestamp: Option<String>,
}

impl ApiEnvelope {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
            timestamp: None,
        }
    }

    pub fn failure(error: Value) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error),
            timestamp: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Error detail of a failed envelope, as sent.
    ///
    /// The service normally uses `error`, but some deployments put the
    /// detail in `data` instead.
    pub fn error_detail(&self) -> Option<&Value> {
        if self.success {
            return None;
        }
        match &self.error {
            Some(error) if !error.is_null() => Some(error),
            _ => Some(&self.data),
        }
    }

    /// Raw `data.status` string, if present.
    pub fn status_str(&self) -> Option<&str> {
        self.data.get("status").and_then(Value::as_str)
    }

    /// Decodes `data` into `T`.
    ///
    /// Fails with [`DomainFailure`] when `success` is false and with a
    /// [`TransportError`] of kind `Decode` when the data has the wrong shape.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        if let Some(detail) = self.error_detail() {
            return Err(DomainFailure::new(detail.clone()).into());
        }
        serde_json::from_value(self.data.clone()).map_err(|e| {
            TransportError::new(
                TransportErrorKind::Decode,
                format!("unexpected response data: {}", e),
            )
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{GenerationResult, TaskAccepted};
    use serde_json::json;

    #[test]
    fn test_success_payload() {
        let envelope: ApiEnvelope = serde_json::from_value(json!({
            "success": true,
            "data": {"task_id": "abc123", "status": "queued"},
            "timestamp": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        assert!(envelope.is_success());
        assert_eq!(envelope.status_str(), Some("queued"));
        let accepted: TaskAccepted = envelope.payload().unwrap();
        assert_eq!(accepted.task_id.as_str(), "abc123");
    }

    #[test]
    fn test_failed_envelope_never_yields_payload() {
        let envelope: ApiEnvelope = serde_json::from_value(json!({
            "success": false,
            "error": {"code": "NOT_FOUND", "message": "API endpoint not found"},
            "timestamp": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        let err = envelope.payload::<Value>().unwrap_err();
        let failure = err.downcast_ref::<DomainFailure>().unwrap();
        assert_eq!(failure.code(), Some("NOT_FOUND"));
        assert_eq!(failure.message(), "API endpoint not found");
    }

    #[test]
    fn test_error_detail_in_data() {
        let envelope: ApiEnvelope = serde_json::from_value(json!({
            "success": false,
            "data": "upstream unavailable"
        }))
        .unwrap();
        assert_eq!(envelope.error_detail(), Some(&json!("upstream unavailable")));
        let err = envelope.payload::<GenerationResult>().unwrap_err();
        assert_eq!(
            err.downcast_ref::<DomainFailure>().map(|f| f.message()),
            Some("upstream unavailable".to_string())
        );
    }

    #[test]
    fn test_wrong_shape_is_decode_error() {
        let envelope = ApiEnvelope::ok(json!({"status": "queued"}));
        let err = envelope.payload::<TaskAccepted>().unwrap_err();
        let transport = err.downcast_ref::<TransportError>().unwrap();
        assert_eq!(transport.kind, TransportErrorKind::Decode);
    }

    #[test]
    fn test_missing_data_defaults_to_null() {
        let envelope: ApiEnvelope = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert_eq!(envelope.data, Value::Null);
        assert_eq!(envelope.status_str(), None);
    }
}
