// The piano roll: a fixed grid of time steps by pitch columns.
//
// Rows are grid steps (each `4 / granularity` quarter notes long), columns are
// the 88 piano pitches from pitch.rs. Two representations share one type:
//
// - Binary: a 2-D `(steps, 88)` array of 0/1 presence flags. Cheap, but a
//   re-struck note is indistinguishable from a held one.
// - OnsetSustain: a 3-D `(steps, 88, 3)` array with one-hot channels
//   `[off, onset, sustain]`, separating a fresh attack from a continuation.
//
// Cells are written through `strike` (attack) and `hold` (continuation) so the
// precedence rules live in one place: an onset always wins, a continuation
// never overwrites an onset. Reading classifies each cell independently; for
// binary rolls an "on" cell counts as an onset when the step before it is
// silent.

use crate::error::CodecError;
use crate::pitch::{self, NOTE_RANGE};
use ndarray::{Array2, Array3, ArrayD, Ix2, Ix3, s};
use serde::{Deserialize, Serialize};

/// Number of one-hot state channels in an onset/sustain roll.
pub const STATE_CHANNELS: usize = 3;

/// How note state is stored per (step, pitch) cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Representation {
    Binary,
    #[default]
    OnsetSustain,
}

/// State of a single (step, pitch) cell. The discriminant is the channel
/// index in an onset/sustain roll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellState {
    Off = 0,
    Onset = 1,
    Sustain = 2,
}

impl CellState {
    pub fn channel(self) -> usize {
        self as usize
    }

    pub fn is_sounding(self) -> bool {
        self != CellState::Off
    }
}

/// An encoded score cut.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PianoRoll {
    Binary(Array2<u8>),
    OnsetSustain(Array3<u8>),
}

impl PianoRoll {
    /// A silent roll with `steps` rows.
    pub fn zeros(representation: Representation, steps: usize) -> Self {
        match representation {
            Representation::Binary => PianoRoll::Binary(Array2::zeros((steps, NOTE_RANGE))),
            Representation::OnsetSustain => {
                let mut data = Array3::zeros((steps, NOTE_RANGE, STATE_CHANNELS));
                data.slice_mut(s![.., .., CellState::Off.channel()]).fill(1);
                PianoRoll::OnsetSustain(data)
            }
        }
    }

    /// Wrap a dynamically shaped array (e.g. loaded from disk). Two axes make
    /// a binary roll, three axes an onset/sustain roll.
    pub fn from_dyn(data: ArrayD<u8>) -> Result<Self, CodecError> {
        let roll = match data.ndim() {
            2 => PianoRoll::Binary(data.into_dimensionality::<Ix2>().map_err(|_| rank_error(2))?),
            3 => PianoRoll::OnsetSustain(
                data.into_dimensionality::<Ix3>().map_err(|_| rank_error(3))?,
            ),
            other => return Err(rank_error(other)),
        };
        roll.validate()?;
        Ok(roll)
    }

    pub fn representation(&self) -> Representation {
        match self {
            PianoRoll::Binary(_) => Representation::Binary,
            PianoRoll::OnsetSustain(_) => Representation::OnsetSustain,
        }
    }

    /// Number of time steps (first axis).
    pub fn steps(&self) -> usize {
        self.shape()[0]
    }

    /// Number of pitch columns (second axis).
    pub fn pitch_columns(&self) -> usize {
        self.shape()[1]
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            PianoRoll::Binary(data) => data.shape(),
            PianoRoll::OnsetSustain(data) => data.shape(),
        }
    }

    /// Check the pitch and channel axes.
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.pitch_columns() != NOTE_RANGE {
            return Err(CodecError::Shape {
                axis: "pitch",
                expected: NOTE_RANGE,
                actual: self.pitch_columns(),
            });
        }
        if let PianoRoll::OnsetSustain(data) = self {
            let channels = data.shape()[2];
            if channels != STATE_CHANNELS {
                return Err(CodecError::Shape {
                    axis: "channel",
                    expected: STATE_CHANNELS,
                    actual: channels,
                });
            }
        }
        Ok(())
    }

    /// Classify a cell. Onset/sustain rolls take the strongest channel (ties
    /// go to the lower channel, so an all-zero cell reads as off).
    pub fn state(&self, step: usize, column: usize) -> CellState {
        match self {
            PianoRoll::Binary(data) => {
                if data[[step, column]] == 0 {
                    CellState::Off
                } else if step > 0 && data[[step - 1, column]] != 0 {
                    CellState::Sustain
                } else {
                    CellState::Onset
                }
            }
            PianoRoll::OnsetSustain(data) => {
                let off = data[[step, column, CellState::Off.channel()]];
                let onset = data[[step, column, CellState::Onset.channel()]];
                let sustain = data[[step, column, CellState::Sustain.channel()]];
                if onset > off && onset >= sustain {
                    CellState::Onset
                } else if sustain > off && sustain > onset {
                    CellState::Sustain
                } else {
                    CellState::Off
                }
            }
        }
    }

    /// True if anything sounds in the cell.
    pub fn is_on(&self, step: usize, column: usize) -> bool {
        match self {
            PianoRoll::Binary(data) => data[[step, column]] != 0,
            PianoRoll::OnsetSustain(_) => self.state(step, column).is_sounding(),
        }
    }

    /// Mark an attack. Always overrides whatever the cell held.
    pub fn strike(&mut self, step: usize, column: usize) {
        self.write(step, column, CellState::Onset);
    }

    /// Mark a continuation, unless the cell already holds an attack.
    pub fn hold(&mut self, step: usize, column: usize) {
        if !self.is_on(step, column) {
            self.write(step, column, CellState::Sustain);
        }
    }

    fn write(&mut self, step: usize, column: usize, state: CellState) {
        match self {
            PianoRoll::Binary(data) => data[[step, column]] = u8::from(state.is_sounding()),
            PianoRoll::OnsetSustain(data) => {
                let mut cell = data.slice_mut(s![step, column, ..]);
                cell.fill(0);
                cell[state.channel()] = 1;
            }
        }
    }

    /// MIDI pitches sounding at a step, ascending.
    pub fn sounding(&self, step: usize) -> Vec<u8> {
        (0..self.pitch_columns())
            .filter(|&column| self.is_on(step, column))
            .filter_map(pitch::column_pitch)
            .collect()
    }

    /// Cell counts over the whole roll.
    pub fn stats(&self) -> RollStats {
        let mut stats = RollStats {
            steps: self.steps(),
            ..RollStats::default()
        };
        for step in 0..self.steps() {
            let mut any = false;
            for column in 0..self.pitch_columns() {
                match self.state(step, column) {
                    CellState::Off => {}
                    CellState::Onset => {
                        stats.onsets += 1;
                        stats.sounding_cells += 1;
                        any = true;
                    }
                    CellState::Sustain => {
                        stats.sounding_cells += 1;
                        any = true;
                    }
                }
            }
            if !any {
                stats.silent_steps += 1;
            }
        }
        stats
    }

    /// Compact text rendering for debugging: one line per pitch that sounds
    /// anywhere, highest first. `o` = onset, `-` = sustain, `.` = off, with a
    /// bar line every `steps_per_bar` steps.
    pub fn summary(&self, steps_per_bar: usize) -> String {
        let mut out = String::new();
        for column in (0..self.pitch_columns()).rev() {
            if !(0..self.steps()).any(|step| self.is_on(step, column)) {
                continue;
            }
            let name =
                pitch::column_pitch(column).map_or_else(|| "??".to_string(), pitch::pitch_name);
            out.push_str(&format!("{name:>4} "));
            for step in 0..self.steps() {
                if step > 0 && steps_per_bar > 0 && step % steps_per_bar == 0 {
                    out.push('|');
                }
                out.push(match self.state(step, column) {
                    CellState::Off => '.',
                    CellState::Onset => 'o',
                    CellState::Sustain => '-',
                });
            }
            out.push('\n');
        }
        out
    }
}

fn rank_error(actual: usize) -> CodecError {
    CodecError::Shape {
        axis: "rank",
        expected: 3,
        actual,
    }
}

/// Counts describing a roll's contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollStats {
    pub steps: usize,
    pub onsets: usize,
    pub sounding_cells: usize,
    pub silent_steps: usize,
}
