//! Query-string validation for the `/stream` endpoints.
//!
//! Turns raw `key=value` pairs into a stream id and a selection criterion.
//! Every rejection carries the fixed message the endpoint answers with.

use crate::{SelectionCriterion, StreamId};

pub const STREAM_TIME: &str = "stream_time";
pub const OFFSET: &str = "offset";
pub const FRAME_TIME: &str = "frame_time";

/// A query parameter was missing, malformed, negative or conflicting
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid stream_time GET parameter")]
    StreamTime,
    #[error("invalid offset GET parameter")]
    Offset,
    #[error("invalid frame_time GET parameter")]
    FrameTime,
    #[error("offset and frame_time GET parameters are mutually exclusive")]
    OffsetWithFrameTime,
}

/// Validated `GET /stream` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamQuery {
    pub stream: StreamId,
    pub criterion: SelectionCriterion,
}

impl StreamQuery {
    /// Validate the parameters of `GET /stream`. Unknown keys are ignored.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut stream = None;
        let mut offset = None;
        let mut frame_times = None::<Vec<u64>>;

        for (key, value) in pairs {
            match key {
                STREAM_TIME => {
                    let id = parse_stream_id(value)?;
                    if stream.replace(id).is_some() {
                        return Err(ValidationError::StreamTime);
                    }
                }
                OFFSET => {
                    // Past the end of any stream either way
                    let n = match parse_digits(value).ok_or(ValidationError::Offset)? {
                        Digits::Fits(n) => n,
                        Digits::Overflows => u64::MAX,
                    };
                    if offset.replace(n).is_some() {
                        return Err(ValidationError::Offset);
                    }
                }
                FRAME_TIME => {
                    let parsed = parse_digits(value).ok_or(ValidationError::FrameTime)?;
                    let times = frame_times.get_or_insert_with(Vec::new);
                    // An overflowing time matches no frame
                    if let Digits::Fits(t) = parsed {
                        times.push(t);
                    }
                }
                _ => {}
            }
        }

        let stream = stream.ok_or(ValidationError::StreamTime)?;
        let criterion = match (offset, frame_times) {
            (Some(_), Some(_)) => return Err(ValidationError::OffsetWithFrameTime),
            (Some(n), None) => SelectionCriterion::Offset(n),
            (None, Some(times)) => SelectionCriterion::elapsed_times(times),
            (None, None) => SelectionCriterion::Full,
        };
        Ok(Self { stream, criterion })
    }
}

/// Validate the `stream_time` parameter of `DELETE /stream`
pub fn stream_id_from_pairs<'a, I>(pairs: I) -> Result<StreamId, ValidationError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut stream = None;
    for (key, value) in pairs {
        if key == STREAM_TIME {
            let id = parse_stream_id(value)?;
            if stream.replace(id).is_some() {
                return Err(ValidationError::StreamTime);
            }
        }
    }
    stream.ok_or(ValidationError::StreamTime)
}

/// A well-formed non-negative decimal value
enum Digits {
    Fits(u64),
    Overflows,
}

/// Plain decimal digits only: no sign, no whitespace, not empty
fn parse_digits(value: &str) -> Option<Digits> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // All digits, so parsing can only fail on overflow
    Some(value.parse().map_or(Digits::Overflows, Digits::Fits))
}

/// Stream ids are u64; anything larger cannot name a stream
fn parse_stream_id(value: &str) -> Result<StreamId, ValidationError> {
    match parse_digits(value) {
        Some(Digits::Fits(id)) => Ok(StreamId::new(id)),
        _ => Err(ValidationError::StreamTime),
    }
}
