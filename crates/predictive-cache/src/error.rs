use thiserror::Error;

/// Failures of the compression codec.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to serialize payload to JSON: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to deflate payload: {0}")]
    Compress(#[source] std::io::Error),

    #[error("compressed payload is corrupt ({len} bytes): {source}")]
    Corrupt {
        len: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("decompressed payload is not valid JSON for the requested type: {0}")]
    Deserialize(#[source] serde_json::Error),
}

/// Errors surfaced by cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("payload is not serializable: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("entry for {url} is {size} bytes, larger than the {budget} byte budget")]
    EntryTooLarge {
        url: String,
        size: usize,
        budget: usize,
    },
}

/// Error returned by a strategy predictor. Collapsed to a score of 0.
#[derive(Debug, Error)]
#[error("predictor failed: {0}")]
pub struct PredictError(pub String);

/// Error returned by a prefetch port. Logged, never propagated.
#[derive(Debug, Error)]
pub enum PrefetchError {
    #[error("prefetch channel closed")]
    Closed,

    #[error("prefetch of {url} failed: {reason}")]
    Failed { url: String, reason: String },
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;
