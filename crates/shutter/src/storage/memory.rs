//! In-memory stream repository
//!
//! Elapsed times are supplied explicitly per frame, so tests can pin the
//! exact timing a stream has without going through any on-disk mapping.

use std::collections::{BTreeMap, HashSet};

use bytes::Bytes;
use tokio::sync::RwLock;

use super::{DeleteReport, StreamRepository};
use crate::{validate_frames, ArchiveError, FrameRecord, Result, StreamId};

struct StoredStream {
    frames: Vec<FrameRecord>,
    payloads: Vec<Bytes>,
}

/// Stream repository held entirely in memory
#[derive(Default)]
pub struct MemoryRepository {
    streams: RwLock<BTreeMap<StreamId, StoredStream>>,
    faults: RwLock<HashSet<(StreamId, u32)>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a stream from `(elapsed_us, payload)` pairs, replacing any
    /// stream with the same id. Fails if elapsed times go backwards.
    pub async fn insert_stream(
        &self,
        stream: StreamId,
        frames: impl IntoIterator<Item = (u64, Bytes)>,
    ) -> Result<()> {
        let (records, payloads): (Vec<_>, Vec<_>) = frames
            .into_iter()
            .enumerate()
            .map(|(i, (elapsed_us, payload))| -> Result<(FrameRecord, Bytes)> {
                let index = u32::try_from(i)
                    .map_err(|_| ArchiveError::corrupt(stream, "too many frames"))?;
                Ok((
                    FrameRecord::new(index, elapsed_us, payload.len() as u64),
                    payload,
                ))
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .unzip();
        validate_frames(stream, &records)?;

        self.streams.write().await.insert(
            stream,
            StoredStream {
                frames: records,
                payloads,
            },
        );
        Ok(())
    }

    /// Make every later read of this payload fail with `Corrupt`
    pub async fn fail_payload(&self, stream: StreamId, index: u32) {
        self.faults.write().await.insert((stream, index));
    }

    /// Number of stored streams
    pub async fn len(&self) -> usize {
        self.streams.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.streams.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl StreamRepository for MemoryRepository {
    async fn exists(&self, stream: StreamId) -> Result<bool> {
        Ok(self.streams.read().await.contains_key(&stream))
    }

    async fn list_streams(&self) -> Result<Vec<StreamId>> {
        Ok(self.streams.read().await.keys().copied().collect())
    }

    async fn list_frames(&self, stream: StreamId) -> Result<Vec<FrameRecord>> {
        self.streams
            .read()
            .await
            .get(&stream)
            .map(|s| s.frames.clone())
            .ok_or(ArchiveError::StreamNotFound(stream))
    }

    async fn read_payload(&self, stream: StreamId, index: u32) -> Result<Bytes> {
        if self.faults.read().await.contains(&(stream, index)) {
            return Err(ArchiveError::corrupt(
                stream,
                format!("injected read failure at frame {}", index),
            ));
        }
        let streams = self.streams.read().await;
        let stored = streams
            .get(&stream)
            .ok_or(ArchiveError::StreamNotFound(stream))?;
        stored
            .payloads
            .get(index as usize)
            .cloned()
            .ok_or(ArchiveError::FrameNotFound { stream, index })
    }

    async fn delete(&self, stream: StreamId) -> Result<()> {
        self.streams
            .write()
            .await
            .remove(&stream)
            .map(|_| ())
            .ok_or(ArchiveError::StreamNotFound(stream))
    }

    async fn delete_all(&self) -> DeleteReport {
        let mut streams = self.streams.write().await;
        let deleted = streams.len();
        streams.clear();
        DeleteReport { deleted, failed: 0 }
    }
}
