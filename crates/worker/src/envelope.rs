use serde::Serialize;
use serde_json::Value;
use std::{fmt, time::Duration};

/// Why a request could not be answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The payload is not a JSON object.
    InvalidJson,
    /// A required field is missing or has the wrong type; the message is sent to the caller.
    Validation(String),
    /// Processing failed; details stay in the server log.
    Internal,
}

impl ErrorKind {
    /// The value of the `error` field in the reply.
    pub fn tag(&self) -> &str {
        match self {
            ErrorKind::InvalidJson => "invalid_json",
            ErrorKind::Validation(message) => message,
            ErrorKind::Internal => "internal_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A per-message failure carried as a value up to the reply layer.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {detail}")]
pub struct ReplyError {
    pub kind: ErrorKind,
    /// Server-side detail for the log.
    pub detail: String,
}

impl ReplyError {
    pub fn invalid_json(detail: impl fmt::Display) -> Self {
        Self {
            kind: ErrorKind::InvalidJson,
            detail: detail.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: ErrorKind::Validation(message.clone()),
            detail: message,
        }
    }

    pub fn internal(detail: impl fmt::Display) -> Self {
        Self {
            kind: ErrorKind::Internal,
            detail: detail.to_string(),
        }
    }
}

/// The reply published to the request's reply subject.
///
/// A success never carries `error` and a failure carries nothing else.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply<T> {
    Success {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<Value>,
        latency_sec: f64,
        #[serde(flatten)]
        body: T,
    },
    Failure {
        error: String,
    },
}

impl<T> Reply<T> {
    pub fn success(request_id: Option<Value>, latency: Duration, body: T) -> Self {
        Reply::Success {
            request_id,
            latency_sec: round_millis(latency),
            body,
        }
    }

    pub fn failure(error: &ReplyError) -> Self {
        Reply::Failure {
            error: error.kind.tag().to_string(),
        }
    }
}

/// Seconds rounded to three decimals.
fn round_millis(latency: Duration) -> f64 {
    (latency.as_secs_f64() * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Body {
        notification_text: String,
    }

    #[test]
    fn test_success_serialization() {
        let reply = Reply::success(
            Some(json!("r1")),
            Duration::from_millis(1234),
            Body {
                notification_text: "Dinner tomorrow".to_string(),
            },
        );
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"request_id": "r1", "latency_sec": 1.234, "notification_text": "Dinner tomorrow"})
        );
    }

    #[test]
    fn test_success_without_request_id() {
        let reply = Reply::success(None, Duration::from_micros(1600), json!({"result": {}}));
        let value = serde_json::to_value(&reply).unwrap();
        assert!(value.get("request_id").is_none());
        assert_eq!(value["latency_sec"], 0.002);
    }

    #[test]
    fn test_failure_serialization_is_only_error() {
        let tags = [
            (ReplyError::invalid_json("expected value"), "invalid_json"),
            (ReplyError::validation("missing_required_fields"), "missing_required_fields"),
            (ReplyError::internal("backend down"), "internal_error"),
        ];
        for (err, tag) in tags {
            let reply: Reply<Body> = Reply::failure(&err);
            assert_eq!(serde_json::to_value(&reply).unwrap(), json!({"error": tag}));
        }
    }

    #[test]
    fn test_internal_detail_not_in_tag() {
        let err = ReplyError::internal("connection refused at 10.0.0.3");
        assert_eq!(err.kind.tag(), "internal_error");
        assert!(err.to_string().contains("10.0.0.3"));
    }
}
