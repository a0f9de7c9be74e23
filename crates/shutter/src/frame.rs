//! Stream and frame metadata types

use serde::{Deserialize, Serialize};

use crate::{ArchiveError, Result};

/// Identifies a recorded stream.
///
/// Assigned by the recorder when the stream is created and used verbatim
/// (in decimal) as the stream's storage key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(pub u64);

impl StreamId {
    /// Create a new StreamId from its numeric value
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for StreamId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Metadata for one stored frame.
///
/// The payload itself stays in storage until the archive encoder asks for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRecord {
    /// Position within the stream, contiguous from 0
    pub index: u32,
    /// Time offset used for time-based selection (microseconds)
    pub elapsed_us: u64,
    /// Payload length in bytes
    pub size: u64,
}

impl FrameRecord {
    pub fn new(index: u32, elapsed_us: u64, size: u64) -> Self {
        Self {
            index,
            elapsed_us,
            size,
        }
    }

    /// File name of the frame, as stored and as written into archives
    pub fn file_name(&self) -> String {
        format!("{}.jpeg", self.index)
    }
}

/// Summary of a stored stream for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    #[serde(rename = "stream_time")]
    pub id: StreamId,
    #[serde(rename = "frames")]
    pub frame_count: usize,
    #[serde(rename = "bytes")]
    pub total_bytes: u64,
}

impl StreamSummary {
    pub fn from_frames(id: StreamId, frames: &[FrameRecord]) -> Self {
        Self {
            id,
            frame_count: frames.len(),
            total_bytes: frames.iter().map(|f| f.size).sum(),
        }
    }
}

/// Check the stream invariants: indexes contiguous from 0, elapsed time
/// non-decreasing.
pub fn validate_frames(stream: StreamId, frames: &[FrameRecord]) -> Result<()> {
    let mut prev_elapsed = 0u64;
    for (position, frame) in frames.iter().enumerate() {
        if frame.index as usize != position {
            return Err(ArchiveError::corrupt(
                stream,
                format!("frame at position {} has index {}", position, frame.index),
            ));
        }
        if frame.elapsed_us < prev_elapsed {
            return Err(ArchiveError::corrupt(
                stream,
                format!(
                    "elapsed time goes backwards at frame {} ({} < {})",
                    frame.index, frame.elapsed_us, prev_elapsed
                ),
            ));
        }
        prev_elapsed = frame.elapsed_us;
    }
    Ok(())
}
