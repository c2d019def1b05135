// Error types for the piano-roll codec and score I/O.

use crate::score::{Beats, TimeSignature};
use thiserror::Error;

/// Hard failures of a single encode or decode call. Each one aborts only the
/// cut being processed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("tensor {axis} mismatch: expected {expected}, got {actual}")]
    Shape {
        axis: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("time signature {time_signature} is not a whole number of steps at {granularity}")]
    Granularity {
        time_signature: TimeSignature,
        granularity: u32,
    },
    #[error("granularity must be positive")]
    InvalidGranularity,
    #[error("cut has {actual} measures, expected {expected}")]
    MeasureCount { expected: usize, actual: usize },
    #[error("measure {measure} is in {found}, cut is in {expected}")]
    TimeSignatureMismatch {
        measure: u32,
        expected: TimeSignature,
        found: TimeSignature,
    },
    #[error("measure {measure}: duration {duration} at offset {offset} is off the step grid")]
    IndivisibleDuration {
        measure: u32,
        offset: Beats,
        duration: Beats,
    },
    #[error("measure {measure}: pitch {pitch} repeated within one chord")]
    DuplicatePitch { measure: u32, pitch: u8 },
}

/// Failures loading or writing Standard MIDI Files.
#[derive(Debug, Error)]
pub enum MidiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("MIDI parse error: {0}")]
    Parse(#[from] midly::Error),
    #[error("SMPTE timecode timing is not supported")]
    UnsupportedTiming,
}

/// A time signature string that is not of the form "N/D".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid time signature '{0}'")]
pub struct ParseSignatureError(pub String);
