// Apollo piano-roll codec
//
// Converts measures of a parsed musical score into fixed-size piano-roll
// tensors and back. A roll has one row per grid step and one column per
// piano key (MIDI 21 through 108). Cells are either binary presence flags or
// one-hot `[off, onset, sustain]` states, so a re-struck note stays distinct
// from a held one. All score times are exact rationals; nothing about grid
// alignment is decided in floating point.
//
// Architecture:
// - pitch.rs: Piano range constants, pitch <-> column mapping, pitch names
// - score.rs: Score/part/measure/event model, time and key signatures
// - roll.rs: The `PianoRoll` tensor, cell states, text summary + stats
// - codec.rs: `PianoRollCodec` encode/decode, policies, per-call stats
// - midi.rs: Standard MIDI File loading (scores) and writing (decoded cuts)
// - error.rs: Codec and MIDI error types
//
// The corpus tooling (cutting, augmentation, pruning, dataset output) lives in
// the `apollo_corpus` crate and builds on these types.

pub mod codec;
pub mod error;
pub mod midi;
pub mod pitch;
pub mod roll;
pub mod score;

pub use codec::{CodecConfig, DuplicatePolicy, EncodeStats, IndivisiblePolicy, PianoRollCodec};
pub use error::{CodecError, MidiError};
pub use roll::{CellState, PianoRoll, Representation};
pub use score::{Beats, EventKind, KeySignature, Measure, Part, Score, TimeSignature, TimedEvent};
