use super::{LightCurveProducer, ProducerError};
use crate::types::LightCurveMessage;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Forwards `(key, message)` pairs to an in-process consumer
pub struct ChannelProducer {
    tx: mpsc::Sender<(String, LightCurveMessage)>,
}

impl ChannelProducer {
    pub fn new(tx: mpsc::Sender<(String, LightCurveMessage)>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl LightCurveProducer for ChannelProducer {
    async fn produce(
        &mut self,
        key: &str,
        message: &LightCurveMessage,
    ) -> Result<(), ProducerError> {
        self.tx
            .send((key.to_string(), message.clone()))
            .await
            .map_err(|_| ProducerError::ChannelClosed)
    }

    async fn flush(&mut self) -> Result<(), ProducerError> {
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "Channel"
    }
}
