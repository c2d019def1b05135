// Score cutter: slices a score into fixed-length runs of measures.
//
// All parts are flattened into one measure sequence first (a roll covers the
// whole ensemble). The sequence is split wherever the time signature changes,
// and each segment is chopped into consecutive cuts of `measures_per_cut`
// measures. A trailing partial cut is dropped. The cut length either comes
// straight from the config (`CutMode::Measures`) or is derived per segment
// from a fixed roll height (`CutMode::Steps`), in which case a segment whose
// measure size does not divide the step count yields no cuts.

use apollo_roll::{Measure, Score, TimeSignature};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Roll height used by the default cut mode (48 beats of 4/4 at sixteenths).
pub const STEPS_PER_CUT: usize = 192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CutMode {
    /// Fixed number of measures per cut regardless of meter.
    Measures(usize),
    /// Fixed number of grid steps per cut; measures per cut follow from the
    /// segment's time signature.
    Steps(usize),
}

impl Default for CutMode {
    fn default() -> Self {
        CutMode::Steps(STEPS_PER_CUT)
    }
}

impl CutMode {
    /// Measures per cut for a segment in `time_signature`, or None if the
    /// segment cannot be cut under this mode.
    pub fn measures_per_cut(
        self,
        time_signature: TimeSignature,
        granularity: u32,
    ) -> Option<usize> {
        let steps_per_measure = time_signature.steps_per_measure(granularity)?;
        match self {
            CutMode::Measures(0) | CutMode::Steps(0) => None,
            CutMode::Measures(n) => Some(n),
            CutMode::Steps(n) => (n % steps_per_measure == 0).then_some(n / steps_per_measure),
        }
    }
}

/// A run of consecutive measures under one time signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreCut {
    /// Position of the cut within its score, counted across segments.
    pub index: usize,
    pub time_signature: TimeSignature,
    pub measures_per_cut: usize,
    pub measures: Vec<Measure>,
}

/// Cut a score into encodable runs. See the module header for the rules.
pub fn cut_score(score: &Score, mode: CutMode, granularity: u32) -> Vec<ScoreCut> {
    let measures = score.flatten();
    let mut cuts = Vec::new();

    for segment in measures.chunk_by(|a, b| a.time_signature == b.time_signature) {
        let time_signature = segment[0].time_signature;
        let Some(measures_per_cut) = mode.measures_per_cut(time_signature, granularity) else {
            warn!(
                score = %score.name,
                %time_signature,
                granularity,
                "skipping segment that does not fit the cut grid"
            );
            continue;
        };
        for chunk in segment.chunks_exact(measures_per_cut) {
            cuts.push(ScoreCut {
                index: cuts.len(),
                time_signature,
                measures_per_cut,
                measures: chunk.to_vec(),
            });
        }
    }

    debug!(score = %score.name, measures = measures.len(), cuts = cuts.len(), "cut score");
    cuts
}
