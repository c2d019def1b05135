// Parsed score representation consumed by the codec.
//
// A score is a set of parts, each an ordered list of measures; a measure is
// an ordered list of timed events (note, chord or rest) whose offsets are
// relative to the start of the measure. All times are exact rationals in
// quarter-note lengths, so grid alignment can be decided without floating
// point error.
//
// The codec never sees a whole score: the cutter (apollo_corpus) flattens the
// parts and slices fixed-length runs of measures sharing one time signature.
//
// See also: `midi.rs` which builds scores from Standard MIDI Files, and
// `codec.rs` which turns measure runs into piano rolls and back.

use crate::error::ParseSignatureError;
use crate::pitch;
use num_rational::Ratio;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A length or position in quarter notes.
pub type Beats = Ratio<u64>;

/// Shorthand for an exact quarter-note quantity. `denom` must be nonzero.
pub fn beats(numer: u64, denom: u64) -> Beats {
    Ratio::new(numer, denom)
}

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

/// Meter of a measure, e.g. 3/4. Deserializing checks the same rules as
/// parsing, so a stored meter always has a nonzero power-of-two beat unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawTimeSignature")]
pub struct TimeSignature {
    /// Beats per measure.
    pub numerator: u8,
    /// Beat unit as a note value (4 = quarter, 8 = eighth).
    pub denominator: u8,
}

impl TimeSignature {
    pub const COMMON: TimeSignature = TimeSignature {
        numerator: 4,
        denominator: 4,
    };

    pub fn new(numerator: u8, denominator: u8) -> Self {
        TimeSignature {
            numerator,
            denominator,
        }
    }

    /// At least one beat, and a beat unit that is a power of two.
    pub fn is_valid(self) -> bool {
        self.numerator > 0 && self.denominator.is_power_of_two()
    }

    /// Length of one beat unit in quarter notes (an eighth is 1/2).
    /// The denominator must be nonzero; see `is_valid`.
    pub fn beat_unit_length(self) -> Beats {
        beats(4, self.denominator as u64)
    }

    /// Length of a full measure in quarter notes.
    pub fn measure_length(self) -> Beats {
        beats(4 * self.numerator as u64, self.denominator as u64)
    }

    /// Number of grid steps a measure spans at the given granularity, where a
    /// step lasts `4 / granularity` quarter notes. None if the measure does
    /// not divide into whole steps or the signature is not valid.
    pub fn steps_per_measure(self, granularity: u32) -> Option<usize> {
        if !self.is_valid() {
            return None;
        }
        let steps = Ratio::from_integer(granularity as u64) * self.measure_length() / 4;
        (steps.is_integer() && *steps.numer() > 0).then(|| steps.to_integer() as usize)
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        TimeSignature::COMMON
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

impl FromStr for TimeSignature {
    type Err = ParseSignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseSignatureError(s.to_string());
        let (num, den) = s.trim().split_once('/').ok_or_else(invalid)?;
        let numerator: u8 = num.trim().parse().map_err(|_| invalid())?;
        let denominator: u8 = den.trim().parse().map_err(|_| invalid())?;
        let ts = TimeSignature::new(numerator, denominator);
        if !ts.is_valid() {
            return Err(invalid());
        }
        Ok(ts)
    }
}

/// Unchecked wire form of `TimeSignature`.
#[derive(Deserialize)]
struct RawTimeSignature {
    numerator: u8,
    denominator: u8,
}

impl TryFrom<RawTimeSignature> for TimeSignature {
    type Error = ParseSignatureError;

    fn try_from(raw: RawTimeSignature) -> Result<Self, Self::Error> {
        let ts = TimeSignature::new(raw.numerator, raw.denominator);
        if ts.is_valid() {
            Ok(ts)
        } else {
            Err(ParseSignatureError(ts.to_string()))
        }
    }
}

/// Key signature as a position on the circle of fifths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeySignature {
    /// Positive for sharps, negative for flats.
    pub sharps: i8,
    pub minor: bool,
}

impl KeySignature {
    /// Name of the major scale sharing this signature, e.g. "B- major".
    pub fn major_name(self) -> String {
        const SHARP_KEYS: [&str; 8] = ["C", "G", "D", "A", "E", "B", "F#", "C#"];
        const FLAT_KEYS: [&str; 8] = ["C", "F", "B-", "E-", "A-", "D-", "G-", "C-"];
        let tonic = if self.sharps >= 0 {
            SHARP_KEYS.get(self.sharps as usize)
        } else {
            FLAT_KEYS.get(self.sharps.unsigned_abs() as usize)
        };
        format!("{} major", tonic.copied().unwrap_or("?"))
    }
}

// ---------------------------------------------------------------------------
// Events and measures
// ---------------------------------------------------------------------------

/// What sounds during a timed event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Note(u8),
    Chord(Vec<u8>),
    Rest,
}

/// A note, chord or rest positioned inside its measure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimedEvent {
    /// Start, in quarter notes from the beginning of the measure.
    pub offset: Beats,
    /// Length in quarter notes. Zero for grace notes.
    pub duration: Beats,
    pub kind: EventKind,
}

impl TimedEvent {
    pub fn note(offset: Beats, duration: Beats, pitch: u8) -> Self {
        TimedEvent {
            offset,
            duration,
            kind: EventKind::Note(pitch),
        }
    }

    pub fn chord(offset: Beats, duration: Beats, pitches: Vec<u8>) -> Self {
        TimedEvent {
            offset,
            duration,
            kind: EventKind::Chord(pitches),
        }
    }

    pub fn rest(offset: Beats, duration: Beats) -> Self {
        TimedEvent {
            offset,
            duration,
            kind: EventKind::Rest,
        }
    }

    /// Build the narrowest event for a pitch set: a rest when empty, a note
    /// for one pitch, a chord otherwise.
    pub fn from_pitches(offset: Beats, duration: Beats, mut pitches: Vec<u8>) -> Self {
        match pitches.len() {
            0 => TimedEvent::rest(offset, duration),
            1 => TimedEvent::note(offset, duration, pitches[0]),
            _ => {
                pitches.sort_unstable();
                TimedEvent::chord(offset, duration, pitches)
            }
        }
    }

    /// Pitches sounded by this event. Empty for rests.
    pub fn pitches(&self) -> &[u8] {
        match &self.kind {
            EventKind::Note(pitch) => std::slice::from_ref(pitch),
            EventKind::Chord(pitches) => pitches,
            EventKind::Rest => &[],
        }
    }

    pub fn is_rest(&self) -> bool {
        matches!(self.kind, EventKind::Rest)
    }

    pub fn end(&self) -> Beats {
        self.offset + self.duration
    }

    /// Copy of this event shifted by `semitones`. Pitches pushed outside the
    /// MIDI range are dropped; a chord that loses all its pitches becomes a rest.
    pub fn transposed(&self, semitones: i8) -> Self {
        let kind = match &self.kind {
            EventKind::Rest => EventKind::Rest,
            EventKind::Note(p) => match pitch::transpose(*p, semitones) {
                Some(shifted) => EventKind::Note(shifted),
                None => EventKind::Rest,
            },
            EventKind::Chord(pitches) => {
                let shifted: Vec<u8> = pitches
                    .iter()
                    .filter_map(|&p| pitch::transpose(p, semitones))
                    .collect();
                if shifted.is_empty() {
                    EventKind::Rest
                } else {
                    EventKind::Chord(shifted)
                }
            }
        };
        TimedEvent {
            offset: self.offset,
            duration: self.duration,
            kind,
        }
    }
}

/// One sounding pitch with its timing, flattened out of notes and chords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SoundingNote {
    pub offset: Beats,
    pub duration: Beats,
    pub pitch: u8,
}

/// An ordered run of events under one time signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measure {
    /// 1-based position in the score; 0 marks a pickup measure.
    pub number: u32,
    pub time_signature: TimeSignature,
    pub key_signature: Option<KeySignature>,
    pub events: Vec<TimedEvent>,
}

impl Measure {
    pub fn new(number: u32, time_signature: TimeSignature) -> Self {
        Measure {
            number,
            time_signature,
            key_signature: None,
            events: Vec::new(),
        }
    }

    /// Builder-style append.
    pub fn with(mut self, event: TimedEvent) -> Self {
        self.events.push(event);
        self
    }

    /// Nominal length from the time signature.
    pub fn length(&self) -> Beats {
        self.time_signature.measure_length()
    }

    /// Every sounding pitch in the measure, sorted by (offset, duration, pitch).
    pub fn sounding_notes(&self) -> Vec<SoundingNote> {
        let mut notes: Vec<SoundingNote> = self
            .events
            .iter()
            .flat_map(|event| {
                event.pitches().iter().map(|&pitch| SoundingNote {
                    offset: event.offset,
                    duration: event.duration,
                    pitch,
                })
            })
            .collect();
        notes.sort();
        notes
    }

    pub fn transposed(&self, semitones: i8) -> Self {
        Measure {
            number: self.number,
            time_signature: self.time_signature,
            key_signature: self.key_signature,
            events: self.events.iter().map(|e| e.transposed(semitones)).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Parts and scores
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub name: String,
    pub measures: Vec<Measure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub name: String,
    pub parts: Vec<Part>,
}

impl Score {
    /// Number of measures in the first part (parts are expected to agree).
    pub fn num_measures(&self) -> usize {
        self.parts.first().map_or(0, |p| p.measures.len())
    }

    /// A score opening with a measure numbered 0 starts with a pickup.
    pub fn has_pickup(&self) -> bool {
        self.parts
            .first()
            .and_then(|p| p.measures.first())
            .is_some_and(|m| m.number == 0)
    }

    pub fn time_signatures(&self) -> BTreeSet<TimeSignature> {
        self.measures().map(|m| m.time_signature).collect()
    }

    pub fn key_signatures(&self) -> BTreeSet<String> {
        self.measures()
            .filter_map(|m| m.key_signature)
            .map(KeySignature::major_name)
            .collect()
    }

    /// All measures of all parts.
    pub fn measures(&self) -> impl Iterator<Item = &Measure> {
        self.parts.iter().flat_map(|p| p.measures.iter())
    }

    /// Merge all parts measure by measure into a single measure sequence.
    /// Measure numbers and signatures come from the first part that has the
    /// measure; events from every part are interleaved by offset.
    pub fn flatten(&self) -> Vec<Measure> {
        let count = self.parts.iter().map(|p| p.measures.len()).max().unwrap_or(0);
        (0..count)
            .filter_map(|i| {
                let mut sources = self.parts.iter().filter_map(|p| p.measures.get(i));
                let first = sources.next()?;
                let mut merged = first.clone();
                for other in sources {
                    merged.events.extend(other.events.iter().cloned());
                }
                merged.events.sort_by_key(|e| e.offset);
                Some(merged)
            })
            .collect()
    }

    pub fn transposed(&self, semitones: i8) -> Self {
        Score {
            name: self.name.clone(),
            parts: self
                .parts
                .iter()
                .map(|p| Part {
                    name: p.name.clone(),
                    measures: p.measures.iter().map(|m| m.transposed(semitones)).collect(),
                })
                .collect(),
        }
    }
}
