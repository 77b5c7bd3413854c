use super::{LightCurveProducer, ProducerError};
use crate::types::LightCurveMessage;
use async_trait::async_trait;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Appends `{"key": ..., "value": ...}` lines to a file
pub struct JsonlProducer {
    file: BufWriter<File>,
    written: u64,
}

#[derive(Serialize)]
struct KeyedMessage<'a> {
    key: &'a str,
    value: &'a LightCurveMessage,
}

impl JsonlProducer {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ProducerError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            file: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

#[async_trait]
impl LightCurveProducer for JsonlProducer {
    async fn produce(
        &mut self,
        key: &str,
        message: &LightCurveMessage,
    ) -> Result<(), ProducerError> {
        let json = serde_json::to_string(&KeyedMessage { key, value: message })?;
        writeln!(self.file, "{}", json)?;
        self.written += 1;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ProducerError> {
        self.file.flush()?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "JSONL"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tempfile::tempdir;

    fn message(aid: &str) -> LightCurveMessage {
        LightCurveMessage {
            aid: aid.to_string(),
            oid: "ZTF1".to_string(),
            candid: 42,
            detections: Vec::new(),
            non_detections: Vec::new(),
            meanra: 10.0,
            meandec: 20.0,
            e_ra: 0.0001,
            e_dec: 0.0001,
            firstmjd: 59000.0,
            lastmjd: 59001.0,
            ndet: 2,
        }
    }

    #[tokio::test]
    async fn test_writes_one_keyed_line_per_message() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("lightcurves.jsonl");

        let mut producer = JsonlProducer::new(&path).unwrap();
        producer.produce("A1", &message("A1")).await.unwrap();
        producer.produce("A2", &message("A2")).await.unwrap();
        producer.flush().await.unwrap();
        assert_eq!(producer.written(), 2);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["key"], "A1");
        assert_eq!(lines[1]["value"]["aid"], "A2");
        assert_eq!(lines[1]["value"]["ndet"], 2);
    }
}
