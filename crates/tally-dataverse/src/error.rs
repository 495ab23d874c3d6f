use tally::TransportError;

pub type Result<T, E = DataverseError> = core::result::Result<T, E>;

/// Errors from the Dataverse transport outside of a counting run.
#[derive(Debug, thiserror::Error)]
pub enum DataverseError {
    #[error("Invalid Dataverse configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Dataverse returned a non-2xx status code.
    #[error("Dataverse returned {status}: {body}")]
    Status { status: u16, body: String },

    /// A response body did not have the expected shape.
    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error(
        "Organization version {version} does not support fast record counting (9.0 or later required)"
    )]
    UnsupportedVersion { version: String },
}

impl From<DataverseError> for TransportError {
    fn from(err: DataverseError) -> Self {
        match err {
            DataverseError::Request(e) => TransportError::Request(e.to_string()),
            DataverseError::Status { status, body } => TransportError::Status { status, body },
            other => TransportError::Protocol(other.to_string()),
        }
    }
}
