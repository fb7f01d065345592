use thiserror::Error;

/// Errors reported by the Replicate predictions API
#[derive(Debug, Error)]
pub enum ReplicateError {
    #[error("Prediction request error ({status}): {body}")]
    Create { status: u16, body: String },

    #[error("Prediction {status}: {message}")]
    PredictionFailed { status: String, message: String },

    #[error("Prediction did not finish within {secs}s")]
    TimedOut { secs: u64 },

    #[error("Missing prediction get URL in: {response}")]
    MissingGetUrl { response: String },

    #[error("Prediction succeeded without an output image")]
    NoOutput,

    #[error("Download failed: {status}")]
    Download { status: u16 },
}
