use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("webhook http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook store error: {0}")]
    Store(#[from] apigate_core::StoreError),

    #[error("webhook payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("webhook signing failed: {0}")]
    Signing(#[from] apigate_crypto::CryptoError),
}
