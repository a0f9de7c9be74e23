//! Binary archive format for a selection of frames
//!
//! Layout (all integers little-endian, no padding):
//! ```text
//! ┌──────────────┬────────────────────────────┬──────────────┬─────────────┐
//! │    count     │  name "<index>.jpeg" + NUL │     size     │   payload   │ ... × count
//! │   (4 bytes)  │   (digits + 6 bytes)       │   (8 bytes)  │ (size bytes)│
//! └──────────────┴────────────────────────────┴──────────────┴─────────────┘
//! ```
//!
//! The name field is not length-prefixed; readers scan for the NUL.

pub mod decode;
pub mod encode;
pub mod stream;

pub use decode::{decode_archive, ArchiveEntry, DecodeError};
pub use encode::{
    encode_entry_header, encode_header, encoded_len, entry_header_len, write_archive,
    ArchiveWriter, HEADER_SIZE, NAME_SUFFIX, SIZE_FIELD_SIZE,
};
pub use stream::{ArchiveStream, DEFAULT_PREFETCH};
