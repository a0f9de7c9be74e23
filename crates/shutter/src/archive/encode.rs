//! Archive encoding: byte-exact building blocks and a blocking writer

use std::io::{self, Write};

use bytes::{BufMut, Bytes, BytesMut};

use crate::{FrameRecord, Result};

/// Size of the frame count header
pub const HEADER_SIZE: usize = 4;
/// Size of the per-entry payload length field
pub const SIZE_FIELD_SIZE: usize = 8;
/// Suffix appended to the decimal frame index in entry names
pub const NAME_SUFFIX: &str = ".jpeg";

/// Encode the archive header for `count` entries
pub fn encode_header(count: u32) -> [u8; HEADER_SIZE] {
    count.to_le_bytes()
}

/// Encoded length of the name + NUL + size fields for a frame index
pub fn entry_header_len(index: u32) -> usize {
    decimal_digits(index) + NAME_SUFFIX.len() + 1 + SIZE_FIELD_SIZE
}

/// Encode everything that precedes a frame's payload: `"<index>.jpeg\0"`
/// followed by the payload size.
pub fn encode_entry_header(frame: &FrameRecord) -> Bytes {
    let mut buf = BytesMut::with_capacity(entry_header_len(frame.index));
    buf.put_slice(frame.file_name().as_bytes());
    buf.put_u8(0);
    buf.put_u64_le(frame.size);
    buf.freeze()
}

/// Exact length in bytes of the archive holding `frames`
pub fn encoded_len(frames: &[FrameRecord]) -> u64 {
    frames.iter().fold(HEADER_SIZE as u64, |acc, f| {
        acc + entry_header_len(f.index) as u64 + f.size
    })
}

fn decimal_digits(mut n: u32) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

/// Incremental archive writer for blocking I/O.
///
/// Writes the header on creation, then one entry per `write_entry` call.
/// Refuses to write more entries than declared and `finish` fails if fewer
/// were written, so a caller can never produce an archive whose header
/// disagrees with its body.
pub struct ArchiveWriter<W: Write> {
    inner: W,
    declared: u32,
    written: u32,
}

impl<W: Write> ArchiveWriter<W> {
    /// Start an archive of `count` entries
    pub fn new(mut inner: W, count: u32) -> io::Result<Self> {
        inner.write_all(&encode_header(count))?;
        Ok(Self {
            inner,
            declared: count,
            written: 0,
        })
    }

    /// Append one frame; `payload` must be exactly `frame.size` bytes
    pub fn write_entry(&mut self, frame: &FrameRecord, payload: &[u8]) -> io::Result<()> {
        if self.written == self.declared {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("archive already holds {} declared entries", self.declared),
            ));
        }
        if payload.len() as u64 != frame.size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "frame {} payload is {} bytes, expected {}",
                    frame.index,
                    payload.len(),
                    frame.size
                ),
            ));
        }
        self.inner.write_all(&encode_entry_header(frame))?;
        self.inner.write_all(payload)?;
        self.written += 1;
        Ok(())
    }

    /// Number of entries written so far
    pub fn entries_written(&self) -> u32 {
        self.written
    }

    /// Flush and return the underlying writer
    pub fn finish(mut self) -> io::Result<W> {
        if self.written != self.declared {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "archive declared {} entries but only {} were written",
                    self.declared, self.written
                ),
            ));
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Write a complete archive of `frames` to a blocking writer, fetching each
/// payload through `read_payload` just before it is written.
///
/// Stops at the first failed read; the partial output must then be
/// discarded by the caller (the transport connection aborted).
pub fn write_archive<W, F>(writer: W, frames: &[FrameRecord], mut read_payload: F) -> Result<W>
where
    W: Write,
    F: FnMut(&FrameRecord) -> Result<Bytes>,
{
    let count = u32::try_from(frames.len()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "too many frames for one archive")
    })?;
    let mut archive = ArchiveWriter::new(writer, count)?;
    for frame in frames {
        let payload = read_payload(frame)?;
        archive.write_entry(frame, &payload)?;
    }
    Ok(archive.finish()?)
}
