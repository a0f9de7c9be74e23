//! Shutter - archive service for recorded camera streams
//!
//! Streams are recorded elsewhere as one JPEG per frame plus a timing index.
//! This crate reads them back, picks frames by time-based criteria and
//! serves the selection as a single binary archive. Feature flags control
//! which modules are compiled:
//!
//! - **Core** (always available): frame types, errors, selection, archive codec,
//!   storage backends and the archive service
//! - **`web`**: axum HTTP coordinator exposing `/stream` and `/streams`

// Core modules (always compiled)
mod error;
mod frame;
mod selection;

pub mod archive;
pub mod locks;
pub mod service;
pub mod storage;

pub use error::{ArchiveError, Result};
pub use frame::{validate_frames, FrameRecord, StreamId, StreamSummary};
pub use selection::{select, SelectionCriterion};
pub use service::{ArchiveService, ServiceConfig};

// Web: axum HTTP server translating query strings and status codes
#[cfg(feature = "web")]
pub mod web;
