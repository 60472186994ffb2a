use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway transport is not connected")]
    NotConnected,
    #[error("gateway connect failed: {0}")]
    Connect(#[source] tokio_tungstenite::tungstenite::Error),
    #[error("gateway send failed: {0}")]
    Send(#[source] tokio_tungstenite::tungstenite::Error),
    #[error("malformed gateway frame: {0}")]
    Decode(#[from] serde_json::Error),
}
