//! Error types for the gateway client.

use thiserror::Error;

/// Errors that can occur when talking to the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No live connection to send the request on.
    #[error("Not connected to gateway")]
    NotConnected,

    /// The call did not complete within its timeout.
    #[error("Timeout waiting for response to '{method}'")]
    Timeout { method: String },

    /// The gateway answered with `ok: false`.
    #[error("Gateway error {code}: {message}")]
    Rpc { code: String, message: String },

    /// The connection dropped while the call was in flight.
    #[error("Connection closed before response arrived")]
    ConnectionClosed,

    /// The gateway URL could not be used.
    #[error("Invalid gateway URL: {0}")]
    InvalidUrl(String),

    /// WebSocket transport failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for GatewayError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error;
        match e {
            Error::Url(url) => Self::InvalidUrl(url.to_string()),
            other => Self::Transport(other.to_string()),
        }
    }
}
