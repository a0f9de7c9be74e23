//! Async archive body: header, then entry header + payload per frame
//!
//! Payloads are fetched with bounded read-ahead but emitted strictly in
//! selection order. The first failure is yielded once and ends the stream, so
//! a consumer never mistakes a broken archive for a complete one.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::future;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::encode::{encode_entry_header, encode_header, encoded_len};
use crate::locks::ReadLease;
use crate::storage::StreamRepository;
use crate::{ArchiveError, FrameRecord, Result, StreamId};

/// Payload reads kept in flight per archive
pub const DEFAULT_PREFETCH: usize = 4;

/// Chunked archive body for one selection
pub struct ArchiveStream {
    inner: BoxStream<'static, Result<Bytes>>,
    count: u32,
    len: u64,
    lease: Option<ReadLease>,
}

impl ArchiveStream {
    /// Build the archive body for `frames` of `stream`.
    ///
    /// `prefetch` bounds how many payloads are read ahead of the consumer
    /// (minimum 1). Nothing is read until the stream is polled.
    pub fn new(
        repo: Arc<dyn StreamRepository>,
        stream_id: StreamId,
        frames: Vec<FrameRecord>,
        prefetch: usize,
    ) -> Result<Self> {
        let count = u32::try_from(frames.len())
            .map_err(|_| ArchiveError::corrupt(stream_id, "too many frames for one archive"))?;
        let len = encoded_len(&frames);

        let header = Bytes::copy_from_slice(&encode_header(count));
        let entries = stream::iter(frames)
            .map(move |frame| {
                let repo = Arc::clone(&repo);
                async move {
                    let payload = repo.read_payload(stream_id, frame.index).await?;
                    if payload.len() as u64 != frame.size {
                        return Err(ArchiveError::corrupt(
                            stream_id,
                            format!(
                                "frame {} payload is {} bytes, index says {}",
                                frame.index,
                                payload.len(),
                                frame.size
                            ),
                        ));
                    }
                    Ok::<_, ArchiveError>((frame, payload))
                }
            })
            .buffered(prefetch.max(1))
            .flat_map(|entry| {
                let chunks = match entry {
                    Ok((frame, payload)) => vec![Ok(encode_entry_header(&frame)), Ok(payload)],
                    Err(e) => vec![Err(e)],
                };
                stream::iter(chunks)
            });

        let inner = stream::once(future::ready(Ok(header)))
            .chain(entries)
            .scan(false, |failed, chunk: Result<Bytes>| {
                if *failed {
                    return future::ready(None);
                }
                *failed = chunk.is_err();
                future::ready(Some(chunk))
            })
            .boxed();

        Ok(Self {
            inner,
            count,
            len,
            lease: None,
        })
    }

    /// Keep `lease` until the last chunk has been produced
    pub fn with_lease(mut self, lease: ReadLease) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Number of entries declared in the header
    pub fn frame_count(&self) -> u32 {
        self.count
    }

    /// Exact size of the complete archive in bytes
    pub fn encoded_len(&self) -> u64 {
        self.len
    }

    /// Write the whole archive to `writer`, returning the bytes written.
    ///
    /// On error the writer holds a partial archive that must be discarded.
    pub async fn write_to<W>(mut self, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut written = 0u64;
        while let Some(chunk) = self.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        Ok(written)
    }

    /// Collect the whole archive into memory
    pub async fn collect_bytes(self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.len.min(64 * 1024 * 1024) as usize);
        self.write_to(&mut out).await?;
        Ok(out)
    }
}

impl Stream for ArchiveStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let next = this.inner.poll_next_unpin(cx);
        if let Poll::Ready(None) = next {
            this.lease = None;
        }
        next
    }
}

impl std::fmt::Debug for ArchiveStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveStream")
            .field("count", &self.count)
            .field("len", &self.len)
            .field("leased", &self.lease.is_some())
            .finish()
    }
}
