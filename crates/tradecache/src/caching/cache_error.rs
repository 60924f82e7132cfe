use thiserror::Error;

/// An error that happens while fetching history data from the upstream API.
///
/// Errors are delivered verbatim to every caller attached to the same
/// in-flight fetch. They are never written to the cache store, so the next
/// call for the same key retries instead of replaying the failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// No credential was available.
    ///
    /// This is detected before the network is touched; the fetch layer does
    /// not even build a request in this case.
    #[error("not authenticated")]
    NotAuthenticated,
    /// The upstream API could not be reached, or answered outside its
    /// protocol (connection loss, DNS, non-2xx status, undecodable body).
    ///
    /// The attached string contains the root cause.
    #[error("network failure: {0}")]
    Network(String),
    /// The upstream API responded but signaled failure in its envelope.
    ///
    /// The server reports this in-band, so it can occur on an HTTP 200.
    /// The attached string contains the server's message.
    #[error("upstream error: {0}")]
    Logical(String),
}

/// The outcome of a cache lookup or upstream fetch, either a payload or the
/// reason it could not be produced.
pub type CacheContents<T = ()> = Result<T, CacheError>;
