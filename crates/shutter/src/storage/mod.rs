//! Storage backends for recorded streams
//!
//! The recorder writes each stream once; this side only reads and deletes.
//! - Local filesystem storage (one directory per stream)
//! - In-memory storage for tests and embedding

pub mod local;
pub mod memory;

use bytes::Bytes;

use crate::{FrameRecord, Result, StreamId};

/// Outcome of a bulk deletion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteReport {
    /// Streams removed
    pub deleted: usize,
    /// Streams (or leftovers) that could not be removed
    pub failed: usize,
}

/// Stream repository trait
#[async_trait::async_trait]
pub trait StreamRepository: Send + Sync {
    /// Whether a stream with this id is stored
    async fn exists(&self, stream: StreamId) -> Result<bool>;

    /// All stored stream ids, ascending
    async fn list_streams(&self) -> Result<Vec<StreamId>>;

    /// Frame metadata ordered by index; `StreamNotFound` if absent
    async fn list_frames(&self, stream: StreamId) -> Result<Vec<FrameRecord>>;

    /// Raw payload of one frame
    async fn read_payload(&self, stream: StreamId, index: u32) -> Result<Bytes>;

    /// Remove a stream and all of its frames; `StreamNotFound` if absent
    async fn delete(&self, stream: StreamId) -> Result<()>;

    /// Remove every stream, continuing past individual failures
    async fn delete_all(&self) -> DeleteReport;
}

pub use local::{ElapsedTimeMapping, LocalRepository, LocalRepositoryConfig};
pub use memory::MemoryRepository;
