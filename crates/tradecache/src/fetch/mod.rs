//! Talking to the upstream dashboard API.
//!
//! This layer does exactly one thing per call: attach the caller's bearer
//! credential, perform the request, and unpack the response envelope. It
//! never retries and it never caches; both of those concerns live with its
//! callers.

use std::error::Error;
use std::fmt;

use serde::Deserialize;

use crate::caching::{CacheContents, CacheError};

mod http;

pub use http::ApiClient;

/// User agent carried on every upstream request.
pub const USER_AGENT: &str = concat!("tradecache/", env!("CARGO_PKG_VERSION"));

/// A bearer credential for the upstream API.
#[derive(Clone)]
pub struct Credentials {
    pub token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // keep tokens out of logs
        f.debug_struct("Credentials").field("token", &"***").finish()
    }
}

/// Supplies the current credential, if any.
///
/// The fetch layer treats an absent credential as
/// [`CacheError::NotAuthenticated`] and fails fast without touching the
/// network. Authorization policy itself is out of scope here; the credential
/// is only forwarded.
pub trait CredentialProvider: Send + Sync {
    fn credentials(&self) -> Option<Credentials>;
}

/// The response envelope used by all history endpoints.
///
/// The server signals logical failures in-band: `success: false` is an
/// error even when the HTTP status is 200.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
}

impl<T> ApiEnvelope<T> {
    /// Unpacks the envelope, mapping in-band failures to
    /// [`CacheError::Logical`].
    pub fn into_contents(self) -> CacheContents<T> {
        if !self.success {
            let message = self
                .error
                .unwrap_or_else(|| "upstream signaled failure".into());
            return Err(CacheError::Logical(message));
        }
        self.data
            .ok_or_else(|| CacheError::Logical("upstream response is missing data".into()))
    }
}

impl CacheError {
    /// Reduces a transport error to its root cause message.
    fn network_error(mut error: &dyn Error) -> Self {
        while let Some(source) = error.source() {
            error = source;
        }
        Self::Network(error.to_string())
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(error: reqwest::Error) -> Self {
        Self::network_error(&error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_success() {
        let envelope: ApiEnvelope<Vec<u32>> =
            serde_json::from_str(r#"{"success": true, "data": [1, 2, 3]}"#).unwrap();
        assert_eq!(envelope.into_contents(), Ok(vec![1, 2, 3]));
    }

    #[test]
    fn test_envelope_failure_is_logical() {
        let envelope: ApiEnvelope<Vec<u32>> =
            serde_json::from_str(r#"{"success": false, "error": "rate limited"}"#).unwrap();
        assert_eq!(
            envelope.into_contents(),
            Err(CacheError::Logical("rate limited".into()))
        );
    }

    #[test]
    fn test_envelope_failure_without_message() {
        let envelope: ApiEnvelope<Vec<u32>> =
            serde_json::from_str(r#"{"success": false}"#).unwrap();
        assert_eq!(
            envelope.into_contents(),
            Err(CacheError::Logical("upstream signaled failure".into()))
        );
    }

    #[test]
    fn test_envelope_success_without_data() {
        let envelope: ApiEnvelope<Vec<u32>> =
            serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(matches!(
            envelope.into_contents(),
            Err(CacheError::Logical(_))
        ));
    }
}
