//! Archive service: the operations the HTTP layer exposes, without HTTP
//!
//! Coordinates the repository, the selector and the archive encoder, and
//! serializes reads against deletion of the same stream.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::archive::{ArchiveStream, DEFAULT_PREFETCH};
use crate::locks::{DeleteLease, StreamLocks};
use crate::storage::{DeleteReport, StreamRepository};
use crate::{select, ArchiveError, Result, SelectionCriterion, StreamId, StreamSummary};

/// How long a delete waits for in-flight reads of its stream by default
pub const DEFAULT_DELETE_WAIT: Duration = Duration::from_secs(5);

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Payload reads kept in flight per archive
    pub prefetch: usize,
    /// Longest a delete waits for readers of the same stream before it
    /// proceeds without them; those readers then fail with `StreamNotFound`
    pub delete_wait: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            prefetch: DEFAULT_PREFETCH,
            delete_wait: DEFAULT_DELETE_WAIT,
        }
    }
}

/// Serves archives from, and deletes streams in, one repository
pub struct ArchiveService {
    repo: Arc<dyn StreamRepository>,
    locks: StreamLocks,
    config: ServiceConfig,
}

impl ArchiveService {
    pub fn new(repo: Arc<dyn StreamRepository>, config: ServiceConfig) -> Self {
        Self {
            repo,
            locks: StreamLocks::new(),
            config,
        }
    }

    /// Open the archive of `stream` selected by `criterion`.
    ///
    /// Fails with `StreamNotFound` before any payload is read if the stream
    /// is absent. The returned body holds a read lease on the stream, so a
    /// concurrent delete waits until it has been fully produced or dropped.
    pub async fn open_archive(
        &self,
        stream: StreamId,
        criterion: &SelectionCriterion,
    ) -> Result<ArchiveStream> {
        let lease = self.locks.read(stream).await;
        let frames = self.repo.list_frames(stream).await?;
        let selected = select(&frames, criterion);
        debug!(
            stream = %stream,
            total = frames.len(),
            selected = selected.len(),
            "Opening archive"
        );

        let archive = ArchiveStream::new(
            Arc::clone(&self.repo),
            stream,
            selected,
            self.config.prefetch,
        )?;
        Ok(archive.with_lease(lease))
    }

    /// Exclusive lease on `stream`, or None once `delete_wait` has passed
    /// with readers still holding it
    async fn delete_lease(&self, stream: StreamId) -> Option<DeleteLease> {
        let wait = self.config.delete_wait;
        match tokio::time::timeout(wait, self.locks.delete(stream)).await {
            Ok(lease) => Some(lease),
            Err(_) => {
                warn!(stream = %stream, "Readers still active after {:?}, deleting anyway", wait);
                None
            }
        }
    }

    /// Delete one stream; waits (up to `delete_wait`) for in-flight reads of
    /// it to finish
    pub async fn delete_stream(&self, stream: StreamId) -> Result<()> {
        let _lease = self.delete_lease(stream).await;
        self.repo.delete(stream).await?;
        info!(stream = %stream, "Stream deleted");
        Ok(())
    }

    /// Delete every stream, best-effort.
    ///
    /// Streams are deleted one at a time, each under its own lease, so a slow
    /// reader only holds up its own stream. Always completes; failures on
    /// individual streams are logged and counted in the report.
    pub async fn delete_all(&self) -> DeleteReport {
        let streams = match self.repo.list_streams().await {
            Ok(streams) => streams,
            Err(e) => {
                warn!(error = %e, "Failed to list streams before bulk deletion");
                Vec::new()
            }
        };

        let mut report = DeleteReport::default();
        for stream in streams {
            let _lease = self.delete_lease(stream).await;
            match self.repo.delete(stream).await {
                Ok(()) => report.deleted += 1,
                Err(ArchiveError::StreamNotFound(_)) => {}
                Err(e) => {
                    warn!(stream = %stream, error = %e, "Failed to delete stream");
                    report.failed += 1;
                }
            }
        }

        // Leftovers: incomplete streams and tombstones
        let rest = self.repo.delete_all().await;
        report.deleted += rest.deleted;
        report.failed += rest.failed;

        if report.failed > 0 {
            warn!(
                "Deleted {} streams, {} could not be removed",
                report.deleted, report.failed
            );
        } else {
            info!("Deleted {} streams", report.deleted);
        }
        report
    }

    /// Summaries of all stored streams, ascending by id.
    ///
    /// Streams deleted between listing and summarizing are skipped.
    pub async fn list_streams(&self) -> Result<Vec<StreamSummary>> {
        let mut summaries = Vec::new();
        for stream in self.repo.list_streams().await? {
            let _lease = self.locks.read(stream).await;
            match self.repo.list_frames(stream).await {
                Ok(frames) => summaries.push(StreamSummary::from_frames(stream, &frames)),
                Err(ArchiveError::StreamNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(summaries)
    }
}
