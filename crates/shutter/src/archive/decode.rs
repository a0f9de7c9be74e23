//! Archive decoding, for clients and for checking what the encoder produced

use bytes::{Buf, Bytes};

use super::encode::{HEADER_SIZE, NAME_SUFFIX, SIZE_FIELD_SIZE};

/// Longest valid name field: `u32::MAX` in decimal plus suffix and NUL
const MAX_NAME_FIELD: usize = 10 + NAME_SUFFIX.len() + 1;

/// One decoded archive entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub index: u32,
    pub payload: Bytes,
}

/// Archive decoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("archive truncated: needed {needed} more bytes, {available} available")]
    Truncated { needed: u64, available: usize },

    #[error("entry {entry} name is not NUL-terminated")]
    MissingNul { entry: u32 },

    #[error("entry {entry} has invalid name {name:?}")]
    BadName { entry: u32, name: String },

    #[error("{0} trailing bytes after the last entry")]
    TrailingBytes(usize),
}

/// Decode a complete archive.
pub fn decode_archive(mut buf: Bytes) -> Result<Vec<ArchiveEntry>, DecodeError> {
    ensure(&buf, HEADER_SIZE as u64)?;
    let count = buf.get_u32_le();

    let mut entries = Vec::with_capacity(count.min(1024) as usize);
    for entry in 0..count {
        let window = &buf[..buf.len().min(MAX_NAME_FIELD)];
        let nul = match window.iter().position(|&b| b == 0) {
            Some(pos) => pos,
            None if buf.len() < MAX_NAME_FIELD => {
                return Err(DecodeError::Truncated {
                    needed: 1,
                    available: buf.len(),
                })
            }
            None => return Err(DecodeError::MissingNul { entry }),
        };
        let name = buf.split_to(nul);
        buf.advance(1);
        let index = parse_name(&name).ok_or_else(|| DecodeError::BadName {
            entry,
            name: String::from_utf8_lossy(&name).into_owned(),
        })?;

        ensure(&buf, SIZE_FIELD_SIZE as u64)?;
        let size = buf.get_u64_le();
        ensure(&buf, size)?;
        let payload = buf.split_to(size as usize);

        entries.push(ArchiveEntry { index, payload });
    }

    if buf.has_remaining() {
        return Err(DecodeError::TrailingBytes(buf.remaining()));
    }
    Ok(entries)
}

fn ensure(buf: &Bytes, needed: u64) -> Result<(), DecodeError> {
    if (buf.len() as u64) < needed {
        return Err(DecodeError::Truncated {
            needed: needed - buf.len() as u64,
            available: buf.len(),
        });
    }
    Ok(())
}

/// Parse `"<digits>.jpeg"` into the frame index
fn parse_name(name: &[u8]) -> Option<u32> {
    let name = std::str::from_utf8(name).ok()?;
    let digits = name.strip_suffix(NAME_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
