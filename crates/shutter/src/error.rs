//! Error types shared by the repository, encoder and service layers

use crate::StreamId;

/// Failures raised by storage, selection and archive encoding.
///
/// Transport-agnostic: only the web layer maps these onto status codes.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The referenced stream does not exist
    #[error("stream {0} not found")]
    StreamNotFound(StreamId),

    /// A frame listed in the stream index has no payload
    #[error("frame {index} of stream {stream} not found")]
    FrameNotFound { stream: StreamId, index: u32 },

    /// Stored metadata or payload is unreadable or inconsistent
    #[error("stream {stream} is corrupt: {reason}")]
    Corrupt { stream: StreamId, reason: String },

    /// Underlying I/O failure
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    pub(crate) fn corrupt(stream: StreamId, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            stream,
            reason: reason.into(),
        }
    }

    /// True when the stream itself is absent (as opposed to a storage failure)
    pub fn is_stream_not_found(&self) -> bool {
        matches!(self, Self::StreamNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
