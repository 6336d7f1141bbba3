//! Server error envelope.
//!
//! On 4xx responses the server returns a JSON document describing the
//! failure. The envelope wraps a top-level `error` object with a status
//! code, a human-readable message, and a list of sub-errors.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Top-level wrapper of the server's JSON error body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ApiError,
}

/// The error object inside the envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorDetail>,
}

/// One sub-error entry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub location: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub location_type: String,
}

impl ApiError {
    /// Decodes an error envelope from a response body.
    ///
    /// Returns `None` if the body is not a well-formed envelope, in which
    /// case the caller falls back to the raw status code.
    pub fn decode(body: &[u8]) -> Option<ApiError> {
        serde_json::from_slice::<ErrorEnvelope>(body)
            .ok()
            .map(|env| env.error)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.first() {
            Some(first) => write!(
                f,
                "Message[{}] Location[{} - {}] Reason[{}] Domain[{}]",
                first.message, first.location, first.location_type, first.reason, first.domain
            ),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}
