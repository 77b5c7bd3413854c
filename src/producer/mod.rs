//! Output producer collaborator
//!
//! One light curve per identity is handed to a [`LightCurveProducer`] after the
//! batch has been persisted.

pub mod channel;
pub mod jsonl;

use crate::types::LightCurveMessage;
use async_trait::async_trait;

pub use channel::ChannelProducer;
pub use jsonl::JsonlProducer;

#[derive(Debug)]
pub enum ProducerError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    ChannelClosed,
}

impl From<std::io::Error> for ProducerError {
    fn from(err: std::io::Error) -> Self {
        ProducerError::Io(err)
    }
}

impl From<serde_json::Error> for ProducerError {
    fn from(err: serde_json::Error) -> Self {
        ProducerError::Serialization(err)
    }
}

impl std::fmt::Display for ProducerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProducerError::Io(e) => write!(f, "IO error: {}", e),
            ProducerError::Serialization(e) => write!(f, "Serialization error: {}", e),
            ProducerError::ChannelClosed => write!(f, "Output channel closed"),
        }
    }
}

impl std::error::Error for ProducerError {}

#[async_trait]
pub trait LightCurveProducer: Send + Sync {
    /// Publish one light curve under `key` (the identity)
    async fn produce(
        &mut self,
        key: &str,
        message: &LightCurveMessage,
    ) -> Result<(), ProducerError>;

    /// Flush pending messages
    async fn flush(&mut self) -> Result<(), ProducerError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}
