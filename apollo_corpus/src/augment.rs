// Key-transposition augmentation.
//
// Every cut is expanded into variants shifted by whole semitones: variant 0
// is the untouched cut, then +1, -1, +2, -2, ... up to `max_semitones`. The
// default of 5 gives 11 variants per cut. Pitches pushed out of the MIDI
// range are dropped by the transposition; pitches that leave the piano range
// are later counted as out-of-range by the encoder.

use apollo_roll::Measure;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentConfig {
    /// Largest shift in either direction. 0 disables augmentation.
    pub max_semitones: u8,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        AugmentConfig { max_semitones: 5 }
    }
}

impl AugmentConfig {
    /// Semitone shift for each variant index, original first.
    pub fn shifts(&self) -> Vec<i8> {
        let max = self.max_semitones.min(i8::MAX as u8) as i8;
        std::iter::once(0)
            .chain((1..=max).flat_map(|k| [k, -k]))
            .collect()
    }

    pub fn variant_count(&self) -> usize {
        1 + 2 * self.max_semitones.min(i8::MAX as u8) as usize
    }
}

/// One transposed copy of a cut.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub index: usize,
    pub semitones: i8,
    pub measures: Vec<Measure>,
}

pub fn augment(measures: &[Measure], config: &AugmentConfig) -> Vec<Variant> {
    config
        .shifts()
        .into_iter()
        .enumerate()
        .map(|(index, semitones)| Variant {
            index,
            semitones,
            measures: if semitones == 0 {
                measures.to_vec()
            } else {
                measures.iter().map(|m| m.transposed(semitones)).collect()
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use apollo_roll::{TimeSignature, TimedEvent, score::beats};

    #[test]
    fn test_default_shift_order() {
        let config = AugmentConfig::default();
        assert_eq!(config.shifts(), vec![0, 1, -1, 2, -2, 3, -3, 4, -4, 5, -5]);
        assert_eq!(config.variant_count(), 11);
        assert_eq!(AugmentConfig { max_semitones: 0 }.shifts(), vec![0]);
    }

    #[test]
    fn test_augment_transposes_pitches() {
        let measures = vec![
            Measure::new(1, TimeSignature::COMMON)
                .with(TimedEvent::chord(beats(0, 1), beats(1, 1), vec![60, 64]))
                .with(TimedEvent::rest(beats(1, 1), beats(3, 1))),
        ];
        let variants = augment(&measures, &AugmentConfig { max_semitones: 2 });
        assert_eq!(variants.len(), 5);
        assert_eq!(variants[0].measures, measures);
        assert_eq!(variants[3].semitones, 2);
        assert_eq!(variants[3].measures[0].events[0].pitches(), &[62, 66]);
        assert_eq!(variants[4].measures[0].events[0].pitches(), &[58, 62]);
        assert!(variants[4].measures[0].events[1].is_rest());
    }
}
