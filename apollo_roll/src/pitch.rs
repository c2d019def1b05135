// Pitch vocabulary of the piano roll.
//
// The roll covers the 88 keys of a piano, A0 (MIDI 21) through C8 (MIDI 108).
// Every pitch in that range owns exactly one column of the tensor; anything
// outside has no column and is dropped by the encoder (see codec.rs).

/// Lowest encodable pitch (A0).
pub const MIN_PITCH: u8 = 21;

/// Highest encodable pitch (C8).
pub const MAX_PITCH: u8 = 108;

/// Number of pitch columns in a piano roll.
pub const NOTE_RANGE: usize = (MAX_PITCH - MIN_PITCH) as usize + 1;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// True if the pitch has a column in the roll.
pub fn in_range(pitch: u8) -> bool {
    (MIN_PITCH..=MAX_PITCH).contains(&pitch)
}

/// Column index for a MIDI pitch, or None if it is out of vocabulary.
pub fn pitch_column(pitch: u8) -> Option<usize> {
    in_range(pitch).then(|| (pitch - MIN_PITCH) as usize)
}

/// MIDI pitch for a column index, or None past the last column.
pub fn column_pitch(column: usize) -> Option<u8> {
    (column < NOTE_RANGE).then(|| MIN_PITCH + column as u8)
}

/// Shift a pitch by a signed number of semitones.
/// Returns None if the result leaves the MIDI range 0-127.
pub fn transpose(pitch: u8, semitones: i8) -> Option<u8> {
    let shifted = pitch as i16 + semitones as i16;
    (0..=127).contains(&shifted).then_some(shifted as u8)
}

/// Scientific pitch name with sharps, e.g. 60 -> "C4", 21 -> "A0".
pub fn pitch_name(pitch: u8) -> String {
    let octave = pitch as i16 / 12 - 1;
    format!("{}{}", NOTE_NAMES[(pitch % 12) as usize], octave)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_bounds() {
        assert_eq!(NOTE_RANGE, 88);
        assert_eq!(pitch_column(21), Some(0));
        assert_eq!(pitch_column(108), Some(87));
        assert_eq!(pitch_column(20), None);
        assert_eq!(pitch_column(109), None);
    }

    #[test]
    fn test_column_pitch_inverse() {
        for pitch in MIN_PITCH..=MAX_PITCH {
            let column = pitch_column(pitch).unwrap();
            assert_eq!(column_pitch(column), Some(pitch));
        }
        assert_eq!(column_pitch(NOTE_RANGE), None);
    }

    #[test]
    fn test_pitch_names() {
        assert_eq!(pitch_name(21), "A0");
        assert_eq!(pitch_name(60), "C4");
        assert_eq!(pitch_name(61), "C#4");
        assert_eq!(pitch_name(108), "C8");
    }

    #[test]
    fn test_transpose_limits() {
        assert_eq!(transpose(60, 5), Some(65));
        assert_eq!(transpose(60, -5), Some(55));
        assert_eq!(transpose(2, -5), None);
        assert_eq!(transpose(125, 5), None);
    }
}
