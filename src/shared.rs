//! Shared catalog handle for async callers
//!
//! `CatalogIndex` is synchronous and not reentrant. `SharedCatalog` wraps it
//! in `Arc<Mutex<_>>` and runs every call on the blocking pool, so several
//! tasks can share one index.

use crate::index::{
    CatalogIndex, ChannelMetadata, Complex32, ContinuousBlock, IndexError, IndexResult, MetadataFile,
    ReloadScope,
};
use crate::storage::SampleBuffer;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Cloneable async handle to one `CatalogIndex`
#[derive(Clone)]
pub struct SharedCatalog {
    inner: Arc<Mutex<CatalogIndex>>,
}

impl SharedCatalog {
    pub fn new(catalog: CatalogIndex) -> Self {
        Self {
            inner: Arc::new(Mutex::new(catalog)),
        }
    }

    async fn run<T, F>(&self, f: F) -> IndexResult<T>
    where
        F: FnOnce(&mut CatalogIndex) -> IndexResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut catalog = inner.blocking_lock();
            f(&mut catalog)
        })
        .await
        .map_err(|e| IndexError::Task(format!("catalog task join error: {}", e)))?
    }

    pub async fn reload(&self, scope: Option<ReloadScope>) -> IndexResult<()> {
        self.run(move |catalog| catalog.reload(scope)).await
    }

    pub async fn channels(&self) -> Vec<String> {
        self.inner.lock().await.get_channels()
    }

    pub async fn bounds(&self, channel: &str) -> IndexResult<(u64, u64)> {
        self.inner.lock().await.get_bounds(channel)
    }

    pub async fn metadata(&self, channel: &str) -> IndexResult<ChannelMetadata> {
        self.inner.lock().await.get_channel_metadata(channel)
    }

    pub async fn metadata_file(&self, channel: &str, timestamp: Option<i64>) -> IndexResult<MetadataFile> {
        let channel = channel.to_string();
        self.run(move |catalog| catalog.get_metadata(&channel, timestamp))
            .await
    }

    pub async fn continuous_blocks(
        &self,
        start: u64,
        stop: u64,
        channel: &str,
    ) -> IndexResult<Vec<ContinuousBlock>> {
        let channel = channel.to_string();
        self.run(move |catalog| catalog.get_continuous_blocks(start, stop, &channel))
            .await
    }

    pub async fn read_vector(&self, start: u64, length: u64, channel: &str) -> IndexResult<SampleBuffer> {
        let channel = channel.to_string();
        self.run(move |catalog| catalog.read_vector(start, length, &channel))
            .await
    }

    pub async fn read_vector_typed(
        &self,
        start: u64,
        length: u64,
        channel: &str,
        subchannel: u32,
    ) -> IndexResult<Vec<Complex32>> {
        let channel = channel.to_string();
        self.run(move |catalog| catalog.read_vector_typed(start, length, &channel, subchannel))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::StorageRoot;
    use crate::storage::{ChannelWriter, SampleFormat, ScalarType, WriterConfig};
    use std::path::Path;
    use tempfile::tempdir;

    const START: u64 = 1_700_000_000 * 100;

    fn write(root: &Path, count: u64) {
        let config = WriterConfig {
            samples_per_file: 40,
            files_per_subdirectory: 10,
            start_sample: START,
            sample_rate: 100.0,
            uuid: Some("shared-test".to_string()),
            format: SampleFormat::real(ScalarType::F32),
            subdirectory_cadence_secs: None,
            max_subdirectories: None,
        };
        let mut writer = ChannelWriter::create(root, "ch", config).unwrap();
        let data: Vec<f32> = (0..count).map(|i| i as f32 * 0.5).collect();
        writer.write(&data, None).unwrap();
        writer.close().unwrap();
    }

    #[tokio::test]
    async fn test_shared_reads() {
        let dir = tempdir().unwrap();
        write(dir.path(), 1000);
        let catalog = CatalogIndex::open(vec![StorageRoot::local(dir.path())]).unwrap();
        let shared = SharedCatalog::new(catalog);

        assert_eq!(shared.channels().await, vec!["ch"]);
        assert_eq!(shared.bounds("ch").await.unwrap(), (START, START + 1000));
        assert_eq!(shared.metadata("ch").await.unwrap().uuid, "shared-test");
        assert!(matches!(
            shared.metadata_file("ch", None).await,
            Err(IndexError::MissingMetadata(_))
        ));

        let buffer = shared.read_vector(START + 500, 4, "ch").await.unwrap();
        assert_eq!(buffer.subchannel_values(0).unwrap(), vec![250.0, 250.5, 251.0, 251.5]);

        let blocks = shared.continuous_blocks(START, START + 2000, "ch").await.unwrap();
        assert_eq!(blocks, vec![ContinuousBlock::new(START, 1000)]);
    }

    #[tokio::test]
    async fn test_concurrent_tasks_share_index() {
        let dir = tempdir().unwrap();
        write(dir.path(), 1000);
        let catalog = CatalogIndex::open(vec![StorageRoot::local(dir.path())]).unwrap();
        let shared = SharedCatalog::new(catalog);

        let mut handles = Vec::new();
        for i in 0..8u64 {
            let shared = shared.clone();
            handles.push(tokio::spawn(async move {
                shared.read_vector(START + i * 100, 100, "ch").await
            }));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            let buffer = handle.await.unwrap().unwrap();
            assert_eq!(buffer.start_sample, START + i as u64 * 100);
            assert_eq!(buffer.len(), 100);
        }
    }

    #[tokio::test]
    async fn test_typed_read_errors_propagate() {
        let dir = tempdir().unwrap();
        write(dir.path(), 100);
        let catalog = CatalogIndex::open(vec![StorageRoot::local(dir.path())]).unwrap();
        let shared = SharedCatalog::new(catalog);

        let result = shared.read_vector_typed(START, 10, "ch", 0).await;
        assert!(matches!(result, Err(IndexError::InvalidInput(_))));
        shared.reload(None).await.unwrap();
    }
}
