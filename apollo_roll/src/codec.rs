// Piano-roll encode/decode.
//
// `PianoRollCodec` turns a cut (a fixed number of consecutive measures under
// one time signature) into a `PianoRoll`, and a roll back into measures.
// Both directions are pure functions of their inputs and the codec config;
// the codec holds no mutable state and can be shared across worker threads.
//
// Grid: a step lasts `4 / granularity` quarter notes, so granularity 16 is a
// sixteenth-note grid. A measure spans
// `granularity * numerator / denominator` steps and must come out whole.
//
// Encoding, per non-rest event:
//   start = measure_index * steps_per_measure + floor(offset / step)
//   len   = duration / step  (must be whole, see IndivisiblePolicy)
// The first frame is struck, the rest are held. Frames past the end of the
// cut are clipped. Soft problems (out-of-range pitches, off-grid durations,
// clipping) are tallied in `EncodeStats` instead of failing the call.
//
// Decoding walks each measure's rows. Binary rolls yield one event per step.
// Onset/sustain rolls coalesce an onset and its following sustain frames into
// one note, group notes that share start and length into chords, and merge
// silent runs into single rests. Coalescing stops at the bar line.

use crate::error::CodecError;
use crate::pitch::{self, NOTE_RANGE};
use crate::roll::{CellState, PianoRoll, Representation};
use crate::score::{Beats, EventKind, Measure, TimeSignature, TimedEvent};
use num_rational::Ratio;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// What to do with an event whose duration is not a whole number of steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IndivisiblePolicy {
    /// Leave the event out of the roll.
    #[default]
    Drop,
    /// Round the duration down to the grid; drop it if nothing is left.
    Truncate,
    /// Fail the whole cut.
    Reject,
}

/// What to do with a chord that lists the same pitch more than once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DuplicatePolicy {
    /// Keep one copy.
    #[default]
    Collapse,
    /// Fail the whole cut.
    Reject,
}

/// Codec parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Grid subdivisions of a whole note (16 = sixteenth notes).
    pub granularity: u32,
    pub representation: Representation,
    pub indivisible: IndivisiblePolicy,
    pub duplicate_pitches: DuplicatePolicy,
}

impl Default for CodecConfig {
    fn default() -> Self {
        CodecConfig {
            granularity: 16,
            representation: Representation::OnsetSustain,
            indivisible: IndivisiblePolicy::Drop,
            duplicate_pitches: DuplicatePolicy::Collapse,
        }
    }
}

/// Tallies from encoding, for corpus-quality reporting. Merge per-cut
/// instances to aggregate over a corpus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeStats {
    /// Events seen, rests included.
    pub events: u64,
    pub rests: u64,
    /// Pitches written into the roll.
    pub notes_written: u64,
    /// Pitches outside A0..C8.
    pub out_of_range: u64,
    /// Events whose duration is off the grid.
    pub indivisible: u64,
    /// Indivisible events written with a shortened duration.
    pub truncated: u64,
    /// Zero-length events.
    pub grace_notes: u64,
    /// Frames cut off at the end of the cut.
    pub clipped_frames: u64,
    /// Events starting past the end of the cut.
    pub out_of_bounds: u64,
    /// Repeated chord pitches folded into one.
    pub collapsed_duplicates: u64,
}

impl EncodeStats {
    pub fn merge(&mut self, other: &EncodeStats) {
        self.events += other.events;
        self.rests += other.rests;
        self.notes_written += other.notes_written;
        self.out_of_range += other.out_of_range;
        self.indivisible += other.indivisible;
        self.truncated += other.truncated;
        self.grace_notes += other.grace_notes;
        self.clipped_frames += other.clipped_frames;
        self.out_of_bounds += other.out_of_bounds;
        self.collapsed_duplicates += other.collapsed_duplicates;
    }

    /// Fraction of events that were off the grid.
    pub fn indivisible_ratio(&self) -> f64 {
        if self.events == 0 {
            0.0
        } else {
            self.indivisible as f64 / self.events as f64
        }
    }
}

/// Converts between measure sequences and piano rolls.
#[derive(Debug, Clone)]
pub struct PianoRollCodec {
    config: CodecConfig,
}

impl PianoRollCodec {
    pub fn new(config: CodecConfig) -> Result<Self, CodecError> {
        if config.granularity == 0 {
            return Err(CodecError::InvalidGranularity);
        }
        Ok(PianoRollCodec { config })
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Length of one grid step in quarter notes.
    pub fn step_length(&self) -> Beats {
        Ratio::new(4, self.config.granularity as u64)
    }

    pub fn steps_per_measure(&self, time_signature: TimeSignature) -> Result<usize, CodecError> {
        time_signature
            .steps_per_measure(self.config.granularity)
            .ok_or(CodecError::Granularity {
                time_signature,
                granularity: self.config.granularity,
            })
    }

    /// First-axis length of a roll for this cut shape.
    pub fn steps_per_cut(
        &self,
        time_signature: TimeSignature,
        measures_per_cut: usize,
    ) -> Result<usize, CodecError> {
        Ok(self.steps_per_measure(time_signature)? * measures_per_cut)
    }

    /// Encode a cut, discarding the statistics.
    pub fn encode(
        &self,
        measures: &[Measure],
        time_signature: TimeSignature,
        measures_per_cut: usize,
    ) -> Result<PianoRoll, CodecError> {
        let mut stats = EncodeStats::default();
        self.encode_with_stats(measures, time_signature, measures_per_cut, &mut stats)
    }

    /// Encode a cut and add its tallies to `stats`. Nothing is added when the
    /// call fails.
    pub fn encode_with_stats(
        &self,
        measures: &[Measure],
        time_signature: TimeSignature,
        measures_per_cut: usize,
        stats: &mut EncodeStats,
    ) -> Result<PianoRoll, CodecError> {
        if measures_per_cut == 0 || measures.len() != measures_per_cut {
            return Err(CodecError::MeasureCount {
                expected: measures_per_cut,
                actual: measures.len(),
            });
        }
        let steps_per_measure = self.steps_per_measure(time_signature)?;
        let total_steps = steps_per_measure * measures_per_cut;
        if let Some(m) = measures.iter().find(|m| m.time_signature != time_signature) {
            return Err(CodecError::TimeSignatureMismatch {
                measure: m.number,
                expected: time_signature,
                found: m.time_signature,
            });
        }

        let mut local = EncodeStats::default();
        let mut roll = PianoRoll::zeros(self.config.representation, total_steps);
        for (index, measure) in measures.iter().enumerate() {
            let measure_start = index * steps_per_measure;
            for event in &measure.events {
                local.events += 1;
                let pitches = match &event.kind {
                    EventKind::Rest => {
                        local.rests += 1;
                        continue;
                    }
                    EventKind::Note(p) => vec![*p],
                    EventKind::Chord(ps) => self.chord_pitches(ps, measure.number, &mut local)?,
                };
                let Some(length) = self.frame_count(event, measure.number, &mut local)? else {
                    continue;
                };
                let start = measure_start + self.to_steps(event.offset).to_integer() as usize;
                if start >= total_steps {
                    local.out_of_bounds += 1;
                    trace!(
                        measure = measure.number,
                        offset = %event.offset,
                        "event starts past end of cut"
                    );
                    continue;
                }
                let end = start + length;
                let kept_end = end.min(total_steps);
                for &p in &pitches {
                    let Some(column) = pitch::pitch_column(p) else {
                        local.out_of_range += 1;
                        continue;
                    };
                    roll.strike(start, column);
                    for step in start + 1..kept_end {
                        roll.hold(step, column);
                    }
                    local.clipped_frames += (end - kept_end) as u64;
                    local.notes_written += 1;
                }
            }
        }

        debug!(
            time_signature = %time_signature,
            steps = total_steps,
            written = local.notes_written,
            indivisible = local.indivisible,
            out_of_range = local.out_of_range,
            "encoded cut"
        );
        stats.merge(&local);
        Ok(roll)
    }

    /// Decode a roll back into `measures_per_cut` measures.
    pub fn decode(
        &self,
        roll: &PianoRoll,
        time_signature: TimeSignature,
        measures_per_cut: usize,
    ) -> Result<Vec<Measure>, CodecError> {
        if measures_per_cut == 0 {
            return Err(CodecError::MeasureCount {
                expected: 1,
                actual: 0,
            });
        }
        let steps_per_measure = self.steps_per_measure(time_signature)?;
        let expected = steps_per_measure * measures_per_cut;
        if roll.steps() != expected {
            return Err(CodecError::Shape {
                axis: "step",
                expected,
                actual: roll.steps(),
            });
        }
        roll.validate()?;

        let measures = (0..measures_per_cut)
            .map(|index| {
                let first = index * steps_per_measure;
                let events = match roll.representation() {
                    Representation::Binary => self.decode_steps(roll, first, steps_per_measure),
                    Representation::OnsetSustain => {
                        self.decode_held(roll, first, steps_per_measure)
                    }
                };
                Measure {
                    number: index as u32 + 1,
                    time_signature,
                    key_signature: None,
                    events,
                }
            })
            .collect();
        Ok(measures)
    }

    /// One event per step: the sounding pitch set, or a rest.
    fn decode_steps(&self, roll: &PianoRoll, first: usize, count: usize) -> Vec<TimedEvent> {
        let step = self.step_length();
        (0..count)
            .map(|i| TimedEvent::from_pitches(self.at_step(i), step, roll.sounding(first + i)))
            .collect()
    }

    /// Coalesce onset + sustain frames into notes, chords and rests.
    fn decode_held(&self, roll: &PianoRoll, first: usize, count: usize) -> Vec<TimedEvent> {
        // (start step, length) -> pitches
        let mut spans: BTreeMap<(usize, usize), Vec<u8>> = BTreeMap::new();
        let mut silent = vec![true; count];
        for column in 0..NOTE_RANGE {
            let Some(pitch) = pitch::column_pitch(column) else {
                continue;
            };
            let mut i = 0;
            while i < count {
                if !roll.state(first + i, column).is_sounding() {
                    i += 1;
                    continue;
                }
                let begin = i;
                i += 1;
                while i < count && roll.state(first + i, column) == CellState::Sustain {
                    i += 1;
                }
                silent[begin..i].fill(false);
                spans.entry((begin, i - begin)).or_default().push(pitch);
            }
        }

        let mut i = 0;
        while i < count {
            if !silent[i] {
                i += 1;
                continue;
            }
            let begin = i;
            while i < count && silent[i] {
                i += 1;
            }
            spans.insert((begin, i - begin), Vec::new());
        }

        spans
            .into_iter()
            .map(|((begin, len), pitches)| {
                TimedEvent::from_pitches(self.at_step(begin), self.at_step(len), pitches)
            })
            .collect()
    }

    /// Deduplicate chord pitches according to policy.
    fn chord_pitches(
        &self,
        pitches: &[u8],
        measure: u32,
        stats: &mut EncodeStats,
    ) -> Result<Vec<u8>, CodecError> {
        let mut unique = pitches.to_vec();
        unique.sort_unstable();
        unique.dedup();
        let repeats = pitches.len() - unique.len();
        if repeats > 0 {
            if self.config.duplicate_pitches == DuplicatePolicy::Reject {
                let pitch = repeated_pitch(pitches).unwrap_or_default();
                return Err(CodecError::DuplicatePitch { measure, pitch });
            }
            stats.collapsed_duplicates += repeats as u64;
        }
        Ok(unique)
    }

    /// Number of frames an event covers, or None if it writes nothing.
    fn frame_count(
        &self,
        event: &TimedEvent,
        measure: u32,
        stats: &mut EncodeStats,
    ) -> Result<Option<usize>, CodecError> {
        let frames = self.to_steps(event.duration);
        let whole = if frames.is_integer() {
            frames.to_integer()
        } else {
            stats.indivisible += 1;
            match self.config.indivisible {
                IndivisiblePolicy::Drop => return Ok(None),
                IndivisiblePolicy::Reject => {
                    return Err(CodecError::IndivisibleDuration {
                        measure,
                        offset: event.offset,
                        duration: event.duration,
                    });
                }
                IndivisiblePolicy::Truncate => {
                    let floored = frames.to_integer();
                    if floored > 0 {
                        stats.truncated += 1;
                    }
                    floored
                }
            }
        };
        if whole == 0 {
            if event.duration == Ratio::from_integer(0) {
                stats.grace_notes += 1;
            }
            return Ok(None);
        }
        Ok(Some(whole as usize))
    }

    /// Quarter-note quantity expressed in (possibly fractional) steps.
    fn to_steps(&self, quantity: Beats) -> Ratio<u64> {
        quantity * self.config.granularity as u64 / 4
    }

    /// Quarter-note position of a step index.
    fn at_step(&self, step: usize) -> Beats {
        self.step_length() * step as u64
    }
}

fn repeated_pitch(pitches: &[u8]) -> Option<u8> {
    pitches
        .iter()
        .enumerate()
        .find(|&(i, p)| pitches[..i].contains(p))
        .map(|(_, &p)| p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::beats;

    fn codec(representation: Representation) -> PianoRollCodec {
        PianoRollCodec::new(CodecConfig {
            representation,
            ..CodecConfig::default()
        })
        .unwrap()
    }

    fn common_cut(first: Measure) -> Vec<Measure> {
        vec![first, Measure::new(2, TimeSignature::COMMON)]
    }

    #[test]
    fn test_quarter_note_onset_sustain() {
        let codec = codec(Representation::OnsetSustain);
        let measures = common_cut(
            Measure::new(1, TimeSignature::COMMON)
                .with(TimedEvent::note(beats(0, 1), beats(1, 1), 60)),
        );
        let roll = codec.encode(&measures, TimeSignature::COMMON, 2).unwrap();
        assert_eq!(roll.shape(), &[32, 88, 3]);
        let column = 60 - 21;
        assert_eq!(roll.state(0, column), CellState::Onset);
        for step in 1..4 {
            assert_eq!(roll.state(step, column), CellState::Sustain);
        }
        for step in 4..32 {
            assert_eq!(roll.state(step, column), CellState::Off);
        }
    }

    #[test]
    fn test_quarter_note_binary() {
        let codec = codec(Representation::Binary);
        let measures = common_cut(
            Measure::new(1, TimeSignature::COMMON)
                .with(TimedEvent::note(beats(0, 1), beats(1, 1), 60)),
        );
        let roll = codec.encode(&measures, TimeSignature::COMMON, 2).unwrap();
        assert_eq!(roll.shape(), &[32, 88]);
        let PianoRoll::Binary(data) = &roll else {
            panic!("expected a binary roll");
        };
        for step in 0..32 {
            assert_eq!(data[[step, 39]], u8::from(step < 4));
        }
    }

    #[test]
    fn test_chord_columns() {
        let codec = codec(Representation::Binary);
        let measures = common_cut(
            Measure::new(1, TimeSignature::COMMON)
                .with(TimedEvent::chord(beats(0, 1), beats(1, 1), vec![60, 64, 67])),
        );
        let roll = codec.encode(&measures, TimeSignature::COMMON, 2).unwrap();
        for step in 0..4 {
            assert_eq!(roll.sounding(step), vec![60, 64, 67]);
            assert!(roll.is_on(step, 39) && roll.is_on(step, 43) && roll.is_on(step, 46));
        }
        assert!(roll.sounding(4).is_empty());
    }

    #[test]
    fn test_boundary_pitches_and_out_of_range() {
        let codec = codec(Representation::OnsetSustain);
        let measure = Measure::new(1, TimeSignature::COMMON)
            .with(TimedEvent::note(beats(0, 1), beats(1, 1), 21))
            .with(TimedEvent::note(beats(0, 1), beats(1, 1), 108))
            .with(TimedEvent::note(beats(1, 1), beats(1, 1), 20))
            .with(TimedEvent::chord(beats(2, 1), beats(1, 1), vec![109, 60]));
        let mut stats = EncodeStats::default();
        let roll = codec
            .encode_with_stats(&[measure], TimeSignature::COMMON, 1, &mut stats)
            .unwrap();
        assert_eq!(roll.state(0, 0), CellState::Onset);
        assert_eq!(roll.state(0, 87), CellState::Onset);
        assert_eq!(roll.sounding(8), vec![60]);
        assert!(roll.sounding(4).is_empty());
        assert_eq!(stats.out_of_range, 2);
        assert_eq!(stats.notes_written, 3);
    }

    #[test]
    fn test_indivisible_dropped_and_counted() {
        let codec = codec(Representation::OnsetSustain);
        let measure = Measure::new(1, TimeSignature::COMMON)
            .with(TimedEvent::note(beats(0, 1), beats(1, 10), 60))
            .with(TimedEvent::note(beats(1, 1), beats(1, 1), 62));
        let mut stats = EncodeStats::default();
        let roll = codec
            .encode_with_stats(&[measure], TimeSignature::COMMON, 1, &mut stats)
            .unwrap();
        assert!(!(0..16).any(|step| roll.is_on(step, 39)));
        assert_eq!(stats.indivisible, 1);
        assert_eq!(stats.notes_written, 1);
        assert_eq!(stats.truncated, 0);
    }

    #[test]
    fn test_indivisible_truncate_and_reject() {
        let measure = Measure::new(1, TimeSignature::COMMON)
            .with(TimedEvent::note(beats(0, 1), beats(3, 5), 60));

        let truncating = PianoRollCodec::new(CodecConfig {
            indivisible: IndivisiblePolicy::Truncate,
            ..CodecConfig::default()
        })
        .unwrap();
        let mut stats = EncodeStats::default();
        let roll = truncating
            .encode_with_stats(std::slice::from_ref(&measure), TimeSignature::COMMON, 1, &mut stats)
            .unwrap();
        // 3/5 of a quarter is 2.4 sixteenths: two frames survive.
        assert_eq!(roll.state(0, 39), CellState::Onset);
        assert_eq!(roll.state(1, 39), CellState::Sustain);
        assert_eq!(roll.state(2, 39), CellState::Off);
        assert_eq!((stats.indivisible, stats.truncated), (1, 1));

        let rejecting = PianoRollCodec::new(CodecConfig {
            indivisible: IndivisiblePolicy::Reject,
            ..CodecConfig::default()
        })
        .unwrap();
        let mut stats = EncodeStats::default();
        let err = rejecting
            .encode_with_stats(&[measure], TimeSignature::COMMON, 1, &mut stats)
            .unwrap_err();
        assert!(matches!(err, CodecError::IndivisibleDuration { measure: 1, .. }));
        assert_eq!(stats, EncodeStats::default());
    }

    #[test]
    fn test_duplicate_policy() {
        let measure = Measure::new(1, TimeSignature::COMMON)
            .with(TimedEvent::chord(beats(0, 1), beats(1, 1), vec![60, 64, 60]));
        let mut stats = EncodeStats::default();
        let roll = codec(Representation::OnsetSustain)
            .encode_with_stats(std::slice::from_ref(&measure), TimeSignature::COMMON, 1, &mut stats)
            .unwrap();
        assert_eq!(roll.sounding(0), vec![60, 64]);
        assert_eq!(stats.collapsed_duplicates, 1);

        let strict = PianoRollCodec::new(CodecConfig {
            duplicate_pitches: DuplicatePolicy::Reject,
            ..CodecConfig::default()
        })
        .unwrap();
        assert_eq!(
            strict.encode(&[measure], TimeSignature::COMMON, 1),
            Err(CodecError::DuplicatePitch {
                measure: 1,
                pitch: 60,
            })
        );
    }

    #[test]
    fn test_granularity_error() {
        let codec = PianoRollCodec::new(CodecConfig {
            granularity: 4,
            ..CodecConfig::default()
        })
        .unwrap();
        let ts = TimeSignature::new(7, 8);
        let err = codec.encode(&[Measure::new(1, ts)], ts, 1).unwrap_err();
        assert_eq!(
            err,
            CodecError::Granularity {
                time_signature: ts,
                granularity: 4,
            }
        );
        assert_eq!(
            PianoRollCodec::new(CodecConfig {
                granularity: 0,
                ..CodecConfig::default()
            })
            .unwrap_err(),
            CodecError::InvalidGranularity
        );
    }

    #[test]
    fn test_zero_denominator_is_granularity_error() {
        let codec = codec(Representation::OnsetSustain);
        let broken = TimeSignature::new(3, 0);
        let err = codec.encode(&[Measure::new(1, broken)], broken, 1).unwrap_err();
        assert_eq!(
            err,
            CodecError::Granularity {
                time_signature: broken,
                granularity: 16,
            }
        );

        let broken = TimeSignature::new(4, 0);
        let roll = PianoRoll::zeros(Representation::OnsetSustain, 16);
        let err = codec.decode(&roll, broken, 1).unwrap_err();
        assert_eq!(
            err,
            CodecError::Granularity {
                time_signature: broken,
                granularity: 16,
            }
        );
    }

    #[test]
    fn test_measure_count_and_signature_checks() {
        let codec = codec(Representation::OnsetSustain);
        let one = vec![Measure::new(1, TimeSignature::COMMON)];
        assert!(matches!(
            codec.encode(&one, TimeSignature::COMMON, 2),
            Err(CodecError::MeasureCount {
                expected: 2,
                actual: 1,
            })
        ));
        let waltz = TimeSignature::new(3, 4);
        assert!(matches!(
            codec.encode(&one, waltz, 1),
            Err(CodecError::TimeSignatureMismatch { measure: 1, .. })
        ));
    }

    #[test]
    fn test_spill_and_clip_at_cut_end() {
        let codec = codec(Representation::OnsetSustain);
        let measures = vec![
            Measure::new(1, TimeSignature::COMMON)
                .with(TimedEvent::note(beats(3, 1), beats(2, 1), 60)),
            Measure::new(2, TimeSignature::COMMON)
                .with(TimedEvent::note(beats(3, 1), beats(2, 1), 62)),
        ];
        let mut stats = EncodeStats::default();
        let roll = codec
            .encode_with_stats(&measures, TimeSignature::COMMON, 2, &mut stats)
            .unwrap();
        // The first note rings into measure two.
        assert_eq!(roll.state(12, 39), CellState::Onset);
        assert_eq!(roll.state(19, 39), CellState::Sustain);
        assert_eq!(roll.state(20, 39), CellState::Off);
        // The second loses its last four frames.
        assert_eq!(roll.state(31, 41), CellState::Sustain);
        assert_eq!(stats.clipped_frames, 4);
    }

    #[test]
    fn test_restrike_keeps_onset() {
        let codec = codec(Representation::OnsetSustain);
        let measure = Measure::new(1, TimeSignature::COMMON)
            .with(TimedEvent::note(beats(0, 1), beats(2, 1), 60))
            .with(TimedEvent::note(beats(1, 1), beats(1, 1), 60));
        let roll = codec.encode(&[measure], TimeSignature::COMMON, 1).unwrap();
        assert_eq!(roll.state(4, 39), CellState::Onset);
        assert_eq!(roll.state(5, 39), CellState::Sustain);
    }

    #[test]
    fn test_grace_notes_write_nothing() {
        let measure = Measure::new(1, TimeSignature::COMMON)
            .with(TimedEvent::note(beats(0, 1), beats(0, 1), 60));
        let mut stats = EncodeStats::default();
        let roll = codec(Representation::OnsetSustain)
            .encode_with_stats(&[measure], TimeSignature::COMMON, 1, &mut stats)
            .unwrap();
        assert_eq!(roll.stats().sounding_cells, 0);
        assert_eq!(stats.grace_notes, 1);
    }

    #[test]
    fn test_encode_is_deterministic() {
        let codec = codec(Representation::OnsetSustain);
        let measure = Measure::new(1, TimeSignature::new(3, 4))
            .with(TimedEvent::chord(beats(0, 1), beats(3, 2), vec![55, 59, 62]))
            .with(TimedEvent::note(beats(3, 2), beats(3, 2), 67));
        let a = codec.encode(std::slice::from_ref(&measure), TimeSignature::new(3, 4), 1).unwrap();
        let b = codec.encode(&[measure], TimeSignature::new(3, 4), 1).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_round_trip_onset_sustain() {
        let codec = codec(Representation::OnsetSustain);
        let ts = TimeSignature::new(3, 4);
        let measures = vec![
            Measure::new(1, ts)
                .with(TimedEvent::chord(beats(0, 1), beats(1, 1), vec![48, 52, 55]))
                .with(TimedEvent::note(beats(0, 1), beats(1, 2), 72))
                .with(TimedEvent::note(beats(1, 2), beats(1, 2), 72))
                .with(TimedEvent::rest(beats(1, 1), beats(1, 1)))
                .with(TimedEvent::note(beats(2, 1), beats(1, 1), 71)),
            Measure::new(2, ts)
                .with(TimedEvent::note(beats(0, 1), beats(3, 1), 60))
                .with(TimedEvent::note(beats(1, 4), beats(1, 4), 76)),
        ];
        let roll = codec.encode(&measures, ts, 2).unwrap();
        let decoded = codec.decode(&roll, ts, 2).unwrap();
        assert_eq!(decoded.len(), 2);
        for (original, restored) in measures.iter().zip(&decoded) {
            assert_eq!(original.sounding_notes(), restored.sounding_notes());
            assert_eq!(restored.time_signature, ts);
        }
        // The repeated 72 comes back as two attacks, not one long note.
        let first = &decoded[0];
        let sevens: Vec<_> = first.sounding_notes().into_iter().filter(|n| n.pitch == 72).collect();
        assert_eq!(sevens.len(), 2);
        // The silent beat comes back as one rest.
        assert!(first.events.contains(&TimedEvent::rest(beats(1, 1), beats(1, 1))));
        // Shared onset and length regroup into a chord; a lone pitch stays a note.
        let triad = TimedEvent::chord(beats(0, 1), beats(1, 1), vec![48, 52, 55]);
        assert!(first.events.contains(&triad));
        assert!(first.events.contains(&TimedEvent::note(beats(0, 1), beats(1, 2), 72)));
        assert!(first.events.contains(&TimedEvent::note(beats(2, 1), beats(1, 1), 71)));
        let second = &decoded[1];
        assert_eq!(second.events.len(), 2);
        assert!(second.events.iter().all(|e| matches!(e.kind, EventKind::Note(_))));
    }

    #[test]
    fn test_binary_decode_is_per_step() {
        let codec = codec(Representation::Binary);
        let measure = Measure::new(1, TimeSignature::COMMON)
            .with(TimedEvent::note(beats(0, 1), beats(1, 2), 60))
            .with(TimedEvent::note(beats(1, 2), beats(1, 2), 60));
        let roll = codec.encode(&[measure], TimeSignature::COMMON, 1).unwrap();
        let decoded = codec.decode(&roll, TimeSignature::COMMON, 1).unwrap();
        let events = &decoded[0].events;
        assert_eq!(events.len(), 16);
        assert!(events.iter().all(|e| e.duration == beats(1, 4)));
        // Re-attack is lost: four identical sixteenths of 60.
        assert!(events[..4].iter().all(|e| e.kind == EventKind::Note(60)));
        assert!(events[4..].iter().all(TimedEvent::is_rest));
    }

    #[test]
    fn test_rest_only_cut() {
        let codec = codec(Representation::OnsetSustain);
        let measures = vec![
            Measure::new(1, TimeSignature::COMMON).with(TimedEvent::rest(beats(0, 1), beats(4, 1))),
            Measure::new(2, TimeSignature::COMMON).with(TimedEvent::rest(beats(0, 1), beats(4, 1))),
        ];
        let mut stats = EncodeStats::default();
        let roll = codec
            .encode_with_stats(&measures, TimeSignature::COMMON, 2, &mut stats)
            .unwrap();
        assert_eq!(stats.rests, 2);
        assert!((0..32).all(|step| roll.sounding(step).is_empty()));
        let decoded = codec.decode(&roll, TimeSignature::COMMON, 2).unwrap();
        for measure in &decoded {
            assert_eq!(measure.events, vec![TimedEvent::rest(beats(0, 1), beats(4, 1))]);
        }
    }

    #[test]
    fn test_decode_shape_mismatch() {
        let codec = codec(Representation::OnsetSustain);
        let roll = PianoRoll::zeros(Representation::OnsetSustain, 30);
        assert_eq!(
            codec.decode(&roll, TimeSignature::COMMON, 2),
            Err(CodecError::Shape {
                axis: "step",
                expected: 32,
                actual: 30,
            })
        );
    }

    #[test]
    fn test_orphan_sustain_starts_new_event_at_bar() {
        let codec = codec(Representation::OnsetSustain);
        let mut roll = PianoRoll::zeros(Representation::OnsetSustain, 32);
        roll.strike(14, 39);
        roll.hold(15, 39);
        roll.hold(16, 39);
        roll.hold(17, 39);
        let decoded = codec.decode(&roll, TimeSignature::COMMON, 2).unwrap();
        assert_eq!(
            decoded[0].sounding_notes().last().map(|n| (n.offset, n.duration)),
            Some((beats(7, 2), beats(1, 2)))
        );
        assert_eq!(
            decoded[1].sounding_notes().first().map(|n| (n.offset, n.duration)),
            Some((beats(0, 1), beats(1, 2)))
        );
    }

    #[test]
    fn test_stats_merge() {
        let mut a = EncodeStats {
            events: 4,
            indivisible: 1,
            ..EncodeStats::default()
        };
        let b = EncodeStats {
            events: 6,
            indivisible: 1,
            rests: 2,
            ..EncodeStats::default()
        };
        a.merge(&b);
        assert_eq!(a.events, 10);
        assert_eq!(a.rests, 2);
        assert!((a.indivisible_ratio() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_config_json_defaults() {
        let config: CodecConfig = serde_json::from_str(r#"{ "indivisible": "Truncate" }"#).unwrap();
        assert_eq!(config.granularity, 16);
        assert_eq!(config.representation, Representation::OnsetSustain);
        assert_eq!(config.indivisible, IndivisiblePolicy::Truncate);
        assert_eq!(config.duplicate_pitches, DuplicatePolicy::Collapse);
        let broken = CodecConfig {
            granularity: 0,
            ..config
        };
        assert!(PianoRollCodec::new(broken).is_err());
    }
}
