//! JSON-lines file DeliveryStream.
//!
//! Appends every record to `<dir>/<stream_name>.jsonl`. Used for local runs
//! where no managed delivery stream is available.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::traits::{BatchPutOutcome, DeliveryStream, Record};

pub struct JsonlDeliveryStream {
    dir: PathBuf,
    /// Serializes appends so records never interleave
    write_lock: Mutex<()>,
}

impl JsonlDeliveryStream {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// File receiving records for `stream_name`
    pub fn path_for(&self, stream_name: &str) -> PathBuf {
        self.dir.join(format!("{stream_name}.jsonl"))
    }

    async fn append(&self, path: &Path, records: &[Record]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        let mut buffer = Vec::new();
        for record in records {
            buffer.extend_from_slice(&record.data);
        }
        file.write_all(&buffer).await?;
        file.flush().await?;
        debug!(path = %path.display(), count = records.len(), "Appended records");
        Ok(())
    }
}

#[async_trait]
impl DeliveryStream for JsonlDeliveryStream {
    async fn put_record_batch(
        &self,
        stream_name: &str,
        records: &[Record],
    ) -> Result<BatchPutOutcome> {
        self.append(&self.path_for(stream_name), records).await?;
        Ok(BatchPutOutcome::all_ok(records.len()))
    }

    async fn put_record(&self, stream_name: &str, record: &Record) -> Result<()> {
        self.append(&self.path_for(stream_name), std::slice::from_ref(record))
            .await
    }
}
