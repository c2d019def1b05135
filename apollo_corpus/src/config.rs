// Pipeline configuration.
//
// `PipelineConfig` gathers every tunable of a corpus build: the composer
// list (whose order fixes the class labels), the codec grid and policies,
// how scores are cut, how far cuts are transposed, and the pruning rules.
// It is loaded from JSON; missing fields fall back to the defaults below,
// which reproduce the classic dataset setup (sixteenth-note grid, 192-step
// cuts, +/-5 semitone augmentation, piano range, 1-4 parts, at most 1%
// off-grid events).
//
// See also: `pipeline.rs` which consumes the config, `main.rs` which loads
// it and prints the defaults for `show-config`.

use crate::augment::AugmentConfig;
use crate::cut::CutMode;
use crate::error::CorpusError;
use crate::prune::PruneRules;
use apollo_roll::CodecConfig;
use apollo_roll::midi::MIN_TEMPO_BPM;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Largest transposition accepted by `validate`.
const MAX_AUGMENT_SEMITONES: u8 = 12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Composer directory names. The label of a score is its composer's index.
    pub composers: Vec<String>,
    pub codec: CodecConfig,
    pub cut: CutMode,
    pub augment: AugmentConfig,
    pub prune: PruneRules,
    /// Tempo of MIDI files written when decoding rolls.
    pub tempo_bpm: u16,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            composers: vec!["bach".to_string(), "beethoven".to_string()],
            codec: CodecConfig::default(),
            cut: CutMode::default(),
            augment: AugmentConfig::default(),
            prune: PruneRules::default(),
            tempo_bpm: 120,
        }
    }
}

impl PipelineConfig {
    /// Reject settings that would make every cut fail or labels ambiguous.
    pub fn validate(&self) -> Result<(), CorpusError> {
        let invalid = |msg: String| Err(CorpusError::Config(msg));

        if self.composers.is_empty() {
            return invalid("composer list is empty".into());
        }
        let unique: BTreeSet<&String> = self.composers.iter().collect();
        if unique.len() != self.composers.len() {
            return invalid("composer list has duplicates".into());
        }
        if self.codec.granularity == 0 {
            return invalid("granularity must be positive".into());
        }
        match self.cut {
            CutMode::Measures(0) | CutMode::Steps(0) => {
                return invalid("cut length must be positive".into());
            }
            _ => {}
        }
        if self.augment.max_semitones > MAX_AUGMENT_SEMITONES {
            return invalid(format!(
                "augmentation of {} semitones exceeds {}",
                self.augment.max_semitones, MAX_AUGMENT_SEMITONES
            ));
        }
        match self.prune.note_range {
            Some((low, high)) if low > high => {
                return invalid(format!("note range {low}..={high} is empty"));
            }
            _ => {}
        }
        match self.prune.max_indivisible_ratio {
            Some(ratio) if !(0.0..=1.0).contains(&ratio) => {
                return invalid(format!("max_indivisible_ratio {ratio} is outside [0, 1]"));
            }
            _ => {}
        }
        check_tempo(self.tempo_bpm)
    }

    /// Tempo for MIDI written by `decode`: an explicit request wins over
    /// `tempo_bpm`.
    pub fn export_tempo(&self, requested: Option<u16>) -> Result<u16, CorpusError> {
        let bpm = requested.unwrap_or(self.tempo_bpm);
        check_tempo(bpm)?;
        Ok(bpm)
    }

    /// Class label of a composer.
    pub fn label_of(&self, composer: &str) -> Option<usize> {
        self.composers.iter().position(|c| c == composer)
    }
}

fn check_tempo(bpm: u16) -> Result<(), CorpusError> {
    if bpm < MIN_TEMPO_BPM {
        return Err(CorpusError::Config(format!(
            "tempo {bpm} bpm is below the minimum of {MIN_TEMPO_BPM}"
        )));
    }
    Ok(())
}

/// Load and validate a JSON config file.
pub fn load_config(path: &Path) -> Result<PipelineConfig, CorpusError> {
    let text = std::fs::read_to_string(path)?;
    let config: PipelineConfig = serde_json::from_str(&text)?;
    config.validate()?;
    Ok(config)
}
