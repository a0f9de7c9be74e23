//! Local filesystem stream repository
//!
//! Reads streams in the layout the recorder writes them:
//!
//! ```text
//! <root>/<stream_id>/index.csv     "<start_us>,<end_us>\n" per frame, in index order
//! <root>/<stream_id>/<index>.jpeg  raw payload of each frame
//! ```
//!
//! A stream counts as stored once its `index.csv` exists. Deletion renames the
//! stream directory to a hidden tombstone in one step and only then removes
//! it recursively, so a stream is either fully visible or not visible at all.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::{DeleteReport, StreamRepository};
use crate::{validate_frames, ArchiveError, FrameRecord, Result, StreamId};

/// Per-stream timing index written by the recorder
const INDEX_FILE: &str = "index.csv";
/// Prefix of directories that are being removed
const TOMBSTONE_PREFIX: &str = ".deleting-";

/// How a frame's elapsed time is derived from the recorder's timestamps.
///
/// The index stores absolute capture times; selection works on elapsed
/// times, so the mapping between the two must be chosen explicitly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ElapsedTimeMapping {
    /// Microseconds since the first frame's capture request
    #[default]
    RelativeToFirstFrame,
    /// The capture-request timestamp itself, in microseconds
    Absolute,
}

impl ElapsedTimeMapping {
    /// Elapsed time for a frame requested at `start_us`, given the first
    /// frame's `base_us`. None if the result would be negative.
    fn elapsed(&self, start_us: i64, base_us: i64) -> Option<u64> {
        let value = match self {
            ElapsedTimeMapping::RelativeToFirstFrame => start_us.checked_sub(base_us)?,
            ElapsedTimeMapping::Absolute => start_us,
        };
        u64::try_from(value).ok()
    }
}

impl std::str::FromStr for ElapsedTimeMapping {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "relative" => Ok(Self::RelativeToFirstFrame),
            "absolute" => Ok(Self::Absolute),
            other => Err(format!(
                "unknown elapsed time mapping {:?} (expected \"relative\" or \"absolute\")",
                other
            )),
        }
    }
}

/// Configuration for local storage
#[derive(Debug, Clone)]
pub struct LocalRepositoryConfig {
    /// Directory holding one subdirectory per stream
    pub root_path: PathBuf,
    /// Mapping from recorded timestamps to elapsed times
    pub elapsed_time: ElapsedTimeMapping,
}

impl Default for LocalRepositoryConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("/var/lib/shutter/streams"),
            elapsed_time: ElapsedTimeMapping::default(),
        }
    }
}

struct Inner {
    config: LocalRepositoryConfig,
    tombstone_seq: AtomicU64,
}

/// Local filesystem stream repository
#[derive(Clone)]
pub struct LocalRepository {
    inner: Arc<Inner>,
}

impl LocalRepository {
    /// Open the repository, creating the root directory if needed and
    /// removing tombstones left behind by an interrupted deletion.
    pub fn new(config: LocalRepositoryConfig) -> Result<Self> {
        fs::create_dir_all(&config.root_path)?;
        info!("Opening stream storage: {:?}", config.root_path);

        let swept = sweep_tombstones(&config.root_path);
        if swept.deleted > 0 || swept.failed > 0 {
            info!(
                "Removed {} leftover tombstones ({} failed)",
                swept.deleted, swept.failed
            );
        }

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                tombstone_seq: AtomicU64::new(0),
            }),
        })
    }

    /// Root directory of the repository
    pub fn root_path(&self) -> &Path {
        &self.inner.config.root_path
    }

    fn stream_dir(&self, stream: StreamId) -> PathBuf {
        self.root_path().join(stream.to_string())
    }

    fn frame_path(&self, stream: StreamId, index: u32) -> PathBuf {
        self.stream_dir(stream).join(format!("{}.jpeg", index))
    }

    fn is_stored(&self, stream: StreamId) -> bool {
        self.stream_dir(stream).join(INDEX_FILE).is_file()
    }

    /// Read `index.csv` and stat every frame file
    fn read_frames_sync(&self, stream: StreamId) -> Result<Vec<FrameRecord>> {
        let dir = self.stream_dir(stream);
        let raw = match fs::read(dir.join(INDEX_FILE)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ArchiveError::StreamNotFound(stream))
            }
            Err(e) => return Err(e.into()),
        };
        let starts = parse_index(stream, &raw)?;
        let base_us = starts.first().copied().unwrap_or(0);

        let mut frames = Vec::with_capacity(starts.len());
        for (i, start_us) in starts.into_iter().enumerate() {
            let index = u32::try_from(i)
                .map_err(|_| ArchiveError::corrupt(stream, "index lists too many frames"))?;
            let elapsed_us = self
                .inner
                .config
                .elapsed_time
                .elapsed(start_us, base_us)
                .ok_or_else(|| {
                    ArchiveError::corrupt(
                        stream,
                        format!("frame {} has negative elapsed time", index),
                    )
                })?;
            let size = match fs::metadata(dir.join(format!("{}.jpeg", index))) {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(ArchiveError::corrupt(
                        stream,
                        format!("frame {} is listed in the index but has no payload", index),
                    ))
                }
                Err(e) => return Err(e.into()),
            };
            frames.push(FrameRecord::new(index, elapsed_us, size));
        }

        validate_frames(stream, &frames)?;
        Ok(frames)
    }

    fn list_streams_sync(&self) -> Result<Vec<StreamId>> {
        let mut streams: Vec<StreamId> = fs::read_dir(self.root_path())?
            .flatten()
            .filter_map(|entry| entry.file_name().to_str()?.parse::<StreamId>().ok())
            .filter(|&id| self.is_stored(id))
            .collect();
        streams.sort();
        Ok(streams)
    }

    fn delete_sync(&self, stream: StreamId) -> Result<()> {
        if !self.is_stored(stream) {
            return Err(ArchiveError::StreamNotFound(stream));
        }
        self.remove_stream_dir(stream)
    }

    /// Atomically hide the stream directory, then remove it
    fn remove_stream_dir(&self, stream: StreamId) -> Result<()> {
        let seq = self.inner.tombstone_seq.fetch_add(1, Ordering::Relaxed);
        let tombstone = self.root_path().join(format!(
            "{}{}-{}-{}",
            TOMBSTONE_PREFIX,
            stream,
            std::process::id(),
            seq
        ));

        match fs::rename(self.stream_dir(stream), &tombstone) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ArchiveError::StreamNotFound(stream))
            }
            Err(e) => return Err(e.into()),
        }

        // The stream is already invisible; a failed cleanup is swept later.
        if let Err(e) = fs::remove_dir_all(&tombstone) {
            warn!(stream = %stream, error = %e, "Failed to remove tombstone {:?}", tombstone);
        }
        debug!(stream = %stream, "Deleted stream");
        Ok(())
    }

    fn delete_all_sync(&self) -> DeleteReport {
        let mut report = DeleteReport::default();

        let entries = match fs::read_dir(self.root_path()) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Failed to list stream storage for deletion");
                report.failed += 1;
                return report;
            }
        };

        for entry in entries.flatten() {
            let Some(stream) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<StreamId>().ok())
            else {
                continue;
            };
            if !entry.path().is_dir() {
                continue;
            }
            match self.remove_stream_dir(stream) {
                Ok(()) => report.deleted += 1,
                // Raced with another deletion; the end state is the same
                Err(ArchiveError::StreamNotFound(_)) => {}
                Err(e) => {
                    warn!(stream = %stream, error = %e, "Failed to delete stream");
                    report.failed += 1;
                }
            }
        }

        report.failed += sweep_tombstones(self.root_path()).failed;
        report
    }
}

/// Run blocking filesystem work on tokio's blocking pool
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(io::Error::other)?
}

#[async_trait::async_trait]
impl StreamRepository for LocalRepository {
    async fn exists(&self, stream: StreamId) -> Result<bool> {
        let this = self.clone();
        blocking(move || Ok(this.is_stored(stream))).await
    }

    async fn list_streams(&self) -> Result<Vec<StreamId>> {
        let this = self.clone();
        blocking(move || this.list_streams_sync()).await
    }

    async fn list_frames(&self, stream: StreamId) -> Result<Vec<FrameRecord>> {
        let this = self.clone();
        blocking(move || this.read_frames_sync(stream)).await
    }

    async fn read_payload(&self, stream: StreamId, index: u32) -> Result<Bytes> {
        match tokio::fs::read(self.frame_path(stream, index)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if self.exists(stream).await? {
                    Err(ArchiveError::FrameNotFound { stream, index })
                } else {
                    Err(ArchiveError::StreamNotFound(stream))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, stream: StreamId) -> Result<()> {
        let this = self.clone();
        blocking(move || this.delete_sync(stream)).await
    }

    async fn delete_all(&self) -> DeleteReport {
        let this = self.clone();
        match tokio::task::spawn_blocking(move || this.delete_all_sync()).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Bulk deletion task failed");
                DeleteReport {
                    deleted: 0,
                    failed: 1,
                }
            }
        }
    }
}

/// Parse the recorder's index into per-frame capture-request times
fn parse_index(stream: StreamId, raw: &[u8]) -> Result<Vec<i64>> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| ArchiveError::corrupt(stream, "index is not valid UTF-8"))?;

    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            parse_index_line(line).ok_or_else(|| {
                ArchiveError::corrupt(stream, format!("malformed index line {}: {:?}", n + 1, line))
            })
        })
        .collect()
}

/// `"<start_us>,<end_us>"`; only the start time is used
fn parse_index_line(line: &str) -> Option<i64> {
    let (start, end) = line.trim().split_once(',')?;
    let start: i64 = start.trim().parse().ok()?;
    let _end: i64 = end.trim().parse().ok()?;
    Some(start)
}

/// Remove tombstone directories under `root`
fn sweep_tombstones(root: &Path) -> DeleteReport {
    let mut report = DeleteReport::default();
    let Ok(entries) = fs::read_dir(root) else {
        return report;
    };
    for entry in entries.flatten() {
        let is_tombstone = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(TOMBSTONE_PREFIX));
        if !is_tombstone {
            continue;
        }
        match fs::remove_dir_all(entry.path()) {
            Ok(()) => report.deleted += 1,
            Err(e) => {
                warn!(error = %e, "Failed to remove tombstone {:?}", entry.path());
                report.failed += 1;
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const BASE_US: i64 = 1_529_488_204_473_095;

    /// Write a stream the way the recorder does: one jpeg per frame plus index
    fn write_stream(root: &Path, id: u64, starts: &[i64], payload_len: usize) {
        let dir = root.join(id.to_string());
        fs::create_dir_all(&dir).unwrap();
        let mut index = String::new();
        for (i, start) in starts.iter().enumerate() {
            index.push_str(&format!("{},{}\n", start, start + 139_000));
            fs::write(dir.join(format!("{}.jpeg", i)), vec![i as u8; payload_len]).unwrap();
        }
        fs::write(dir.join(INDEX_FILE), index).unwrap();
    }

    fn test_config(dir: &Path) -> LocalRepositoryConfig {
        LocalRepositoryConfig {
            root_path: dir.to_path_buf(),
            elapsed_time: ElapsedTimeMapping::RelativeToFirstFrame,
        }
    }

    fn starts(n: i64) -> Vec<i64> {
        (0..n).map(|i| BASE_US + i * 40_000).collect()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lists_frames_with_relative_elapsed_times() {
        let dir = tempdir().unwrap();
        write_stream(dir.path(), 1529488179409, &starts(30), 64);
        let repo = LocalRepository::new(test_config(dir.path())).unwrap();
        let id = StreamId::new(1529488179409);

        assert!(repo.exists(id).await.unwrap());
        let frames = repo.list_frames(id).await.unwrap();
        assert_eq!(frames.len(), 30);
        assert_eq!(frames[0], FrameRecord::new(0, 0, 64));
        assert_eq!(frames[29], FrameRecord::new(29, 29 * 40_000, 64));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn absolute_mapping_keeps_capture_times() {
        let dir = tempdir().unwrap();
        write_stream(dir.path(), 7, &starts(3), 1);
        let config = LocalRepositoryConfig {
            elapsed_time: ElapsedTimeMapping::Absolute,
            ..test_config(dir.path())
        };
        let repo = LocalRepository::new(config).unwrap();

        let frames = repo.list_frames(StreamId::new(7)).await.unwrap();
        assert_eq!(frames[0].elapsed_us, BASE_US as u64);
        assert_eq!(frames[2].elapsed_us, (BASE_US + 80_000) as u64);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reads_payload_bytes() {
        let dir = tempdir().unwrap();
        write_stream(dir.path(), 7, &starts(3), 10);
        let repo = LocalRepository::new(test_config(dir.path())).unwrap();

        let payload = repo.read_payload(StreamId::new(7), 2).await.unwrap();
        assert_eq!(payload, Bytes::from(vec![2u8; 10]));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_index_is_an_empty_stream() {
        let dir = tempdir().unwrap();
        write_stream(dir.path(), 4, &[], 0);
        let repo = LocalRepository::new(test_config(dir.path())).unwrap();

        assert!(repo.list_frames(StreamId::new(4)).await.unwrap().is_empty());
    }

    // ========== Missing and corrupt data ==========

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_stream_is_not_found() {
        let dir = tempdir().unwrap();
        let repo = LocalRepository::new(test_config(dir.path())).unwrap();
        let id = StreamId::new(99);

        assert!(!repo.exists(id).await.unwrap());
        assert!(repo.list_frames(id).await.unwrap_err().is_stream_not_found());
        assert!(repo.read_payload(id, 0).await.unwrap_err().is_stream_not_found());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stream_without_index_is_not_stored() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("12")).unwrap();
        fs::write(dir.path().join("12").join("0.jpeg"), b"x").unwrap();
        let repo = LocalRepository::new(test_config(dir.path())).unwrap();
        let id = StreamId::new(12);

        assert!(!repo.exists(id).await.unwrap());
        assert!(repo.list_frames(id).await.unwrap_err().is_stream_not_found());
        assert!(repo.list_streams().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_frame_file() {
        let dir = tempdir().unwrap();
        write_stream(dir.path(), 5, &starts(3), 4);
        fs::remove_file(dir.path().join("5").join("1.jpeg")).unwrap();
        let repo = LocalRepository::new(test_config(dir.path())).unwrap();
        let id = StreamId::new(5);

        assert!(matches!(
            repo.list_frames(id).await.unwrap_err(),
            ArchiveError::Corrupt { .. }
        ));
        assert!(matches!(
            repo.read_payload(id, 1).await.unwrap_err(),
            ArchiveError::FrameNotFound { index: 1, .. }
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_index_is_corrupt() {
        let dir = tempdir().unwrap();
        write_stream(dir.path(), 5, &starts(2), 4);
        fs::write(dir.path().join("5").join(INDEX_FILE), "1,2\nnot-a-number\n").unwrap();
        let repo = LocalRepository::new(test_config(dir.path())).unwrap();

        assert!(matches!(
            repo.list_frames(StreamId::new(5)).await.unwrap_err(),
            ArchiveError::Corrupt { .. }
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn backwards_timestamps_are_corrupt() {
        let dir = tempdir().unwrap();
        write_stream(dir.path(), 5, &[BASE_US, BASE_US + 100, BASE_US + 50], 4);
        let repo = LocalRepository::new(test_config(dir.path())).unwrap();

        assert!(matches!(
            repo.list_frames(StreamId::new(5)).await.unwrap_err(),
            ArchiveError::Corrupt { .. }
        ));
    }

    #[test]
    fn index_line_parsing() {
        assert_eq!(parse_index_line("1529488204473095,1529488205138216"), Some(1529488204473095));
        assert_eq!(parse_index_line(" 5 , 6 "), Some(5));
        assert_eq!(parse_index_line("5"), None);
        assert_eq!(parse_index_line("5,x"), None);
        assert_eq!(parse_index_line("a,6"), None);
    }

    #[test]
    fn mapping_from_str() {
        assert_eq!(
            "relative".parse::<ElapsedTimeMapping>().unwrap(),
            ElapsedTimeMapping::RelativeToFirstFrame
        );
        assert_eq!(
            "ABSOLUTE".parse::<ElapsedTimeMapping>().unwrap(),
            ElapsedTimeMapping::Absolute
        );
        assert!("wallclock".parse::<ElapsedTimeMapping>().is_err());
    }

    #[test]
    fn absolute_mapping_rejects_negative_times() {
        assert_eq!(ElapsedTimeMapping::Absolute.elapsed(-1, 0), None);
        assert_eq!(ElapsedTimeMapping::RelativeToFirstFrame.elapsed(5, 10), None);
        assert_eq!(ElapsedTimeMapping::RelativeToFirstFrame.elapsed(15, 10), Some(5));
    }

    // ========== Listing ==========

    #[tokio::test(flavor = "multi_thread")]
    async fn list_streams_sorted_and_filtered() {
        let dir = tempdir().unwrap();
        write_stream(dir.path(), 30, &starts(1), 1);
        write_stream(dir.path(), 4, &starts(1), 1);
        write_stream(dir.path(), 100, &starts(1), 1);
        fs::create_dir_all(dir.path().join("not-a-stream")).unwrap();
        fs::write(dir.path().join("17"), b"a file, not a stream").unwrap();
        let repo = LocalRepository::new(test_config(dir.path())).unwrap();

        assert_eq!(
            repo.list_streams().await.unwrap(),
            vec![StreamId::new(4), StreamId::new(30), StreamId::new(100)]
        );
    }

    // ========== Deletion ==========

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_removes_stream_directory() {
        let dir = tempdir().unwrap();
        write_stream(dir.path(), 8, &starts(5), 16);
        let repo = LocalRepository::new(test_config(dir.path())).unwrap();
        let id = StreamId::new(8);

        repo.delete(id).await.unwrap();
        assert!(!repo.exists(id).await.unwrap());
        assert!(!dir.path().join("8").exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        assert!(repo.delete(id).await.unwrap_err().is_stream_not_found());
        assert!(repo.list_frames(id).await.unwrap_err().is_stream_not_found());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_leaves_other_streams() {
        let dir = tempdir().unwrap();
        write_stream(dir.path(), 1, &starts(2), 1);
        write_stream(dir.path(), 2, &starts(2), 1);
        let repo = LocalRepository::new(test_config(dir.path())).unwrap();

        repo.delete(StreamId::new(1)).await.unwrap();
        assert_eq!(repo.list_streams().await.unwrap(), vec![StreamId::new(2)]);
        assert_eq!(repo.list_frames(StreamId::new(2)).await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_all_clears_streams_and_leftovers() {
        let dir = tempdir().unwrap();
        write_stream(dir.path(), 1, &starts(3), 8);
        write_stream(dir.path(), 2, &starts(3), 8);
        // Incomplete recording and a tombstone from an interrupted delete
        fs::create_dir_all(dir.path().join("3")).unwrap();
        let repo = LocalRepository::new(test_config(dir.path())).unwrap();
        fs::create_dir_all(dir.path().join(".deleting-9-1-0").join("inner")).unwrap();

        let report = repo.delete_all().await;
        assert_eq!(report, DeleteReport { deleted: 3, failed: 0 });
        assert!(repo.list_streams().await.unwrap().is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        let report = repo.delete_all().await;
        assert_eq!(report, DeleteReport::default());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_all_on_empty_storage() {
        let dir = tempdir().unwrap();
        let repo = LocalRepository::new(test_config(dir.path())).unwrap();

        assert_eq!(repo.delete_all().await, DeleteReport::default());
    }

    #[test]
    fn open_sweeps_tombstones() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".deleting-5-100-0").join("x")).unwrap();
        write_stream(dir.path(), 5, &starts(1), 1);

        let _repo = LocalRepository::new(test_config(dir.path())).unwrap();
        assert!(!dir.path().join(".deleting-5-100-0").exists());
        assert!(dir.path().join("5").join(INDEX_FILE).exists());
    }

    #[test]
    fn creates_missing_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("nested").join("streams");
        let repo = LocalRepository::new(test_config(&root)).unwrap();
        assert!(root.is_dir());
        assert_eq!(repo.root_path(), root.as_path());
    }
}
