use thiserror::Error;

/// Failure modes the engine distinguishes beyond plain transport errors.
/// Transient remote failures travel as `anyhow::Error` until the retry
/// executor gives up on them.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The webhook signature header was absent or could not be decoded.
    /// Distinct from a mismatched signature, which is a clean boolean no.
    #[error("webhook signature header missing or not decodable")]
    MalformedSignatureHeader,

    /// The serialized column set would blow the workspace's schema ceiling.
    /// Raised before any network call is made.
    #[error("serialized schema is {size} bytes, over the 50 KB workspace limit")]
    SchemaTooLarge { size: usize },

    /// A retried remote mutation failed on every attempt.
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
}
