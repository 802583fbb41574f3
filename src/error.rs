use thiserror::Error;

/// Failures that abort a streamed exchange with the model provider
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("no API key configured (set `api_key` in the config file or the {env_var} environment variable)")]
    MissingApiKey { env_var: String },

    #[error("request to provider failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("provider error {code}: {message}")]
    Provider { code: u16, message: String },

    #[error("malformed provider response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Failures reading or writing the durable session record
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("session record could not be encoded: {0}")]
    Serialize(#[from] serde_json::Error),
}
