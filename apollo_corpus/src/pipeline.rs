// Parallel corpus pipeline.
//
// `discover` lists the MIDI files of each configured composer; `build_corpus`
// then runs every file through load -> stats -> prune -> cut -> augment ->
// encode on the rayon pool. Each file produces its own `CorpusBuild` and the
// partial builds are reduced with `CorpusBuild::merge`, so no accumulator is
// shared between workers. Failures stay local: an unparseable file or a cut
// the codec rejects is logged, recorded in the pruning ledger, and skipped.
//
// Naming: a score is identified as "{composer}/{stem}" and an encoded roll as
// "{composer}/{stem}-{cut}-{variant}". Output rolls are sorted by key, so a
// build is deterministic regardless of scheduling.

use crate::augment::augment;
use crate::config::PipelineConfig;
use crate::cut::cut_score;
use crate::error::CorpusError;
use crate::prune::{DiscardReason, PruningStats};
use crate::stats::{CorpusStats, ScoreStats};
use apollo_roll::midi::load_midi;
use apollo_roll::{EncodeStats, PianoRoll, PianoRollCodec, Score, TimeSignature};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One input file and the composer it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusEntry {
    pub composer: String,
    pub label: usize,
    pub path: PathBuf,
}

/// An encoded, labelled roll ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedCut {
    pub key: String,
    pub label: usize,
    pub time_signature: TimeSignature,
    pub measures_per_cut: usize,
    pub semitones: i8,
    pub roll: PianoRoll,
}

/// Everything a build produces. Partial builds from workers merge into one.
#[derive(Debug, Clone, Default)]
pub struct CorpusBuild {
    pub cuts: Vec<EncodedCut>,
    /// Keyed by "{composer}/{stem}".
    pub score_stats: BTreeMap<String, ScoreStats>,
    pub corpus_stats: CorpusStats,
    pub pruning: PruningStats,
    pub encode_stats: EncodeStats,
    pub scores_seen: usize,
    pub scores_kept: usize,
}

impl CorpusBuild {
    pub fn merge(mut self, other: CorpusBuild) -> CorpusBuild {
        self.cuts.extend(other.cuts);
        self.score_stats.extend(other.score_stats);
        self.corpus_stats.merge(other.corpus_stats);
        self.pruning.merge(other.pruning);
        self.encode_stats.merge(&other.encode_stats);
        self.scores_seen += other.scores_seen;
        self.scores_kept += other.scores_kept;
        self
    }
}

/// Find `{corpus_dir}/{composer}/*.mid` and `*.midi` for every composer.
/// Labels follow the order of `composers`. Scores are named by file stem, so
/// when `x.mid` and `x.midi` both exist only `x.mid` is kept.
pub fn discover(
    corpus_dir: &Path,
    composers: &[String],
) -> Result<Vec<CorpusEntry>, CorpusError> {
    let mut entries = Vec::new();
    for (label, composer) in composers.iter().enumerate() {
        let mut paths = Vec::new();
        for extension in ["mid", "midi"] {
            let pattern = corpus_dir.join(composer).join(format!("*.{extension}"));
            for found in glob::glob(&pattern.to_string_lossy())? {
                match found {
                    Ok(path) => paths.push(path),
                    Err(err) => warn!(%err, "unreadable corpus path"),
                }
            }
        }
        paths.sort();
        let mut stems = BTreeSet::new();
        paths.retain(|path| {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let fresh = stems.insert(stem);
            if !fresh {
                warn!(path = %path.display(), "skipping file with a duplicate score name");
            }
            fresh
        });
        debug!(composer = %composer, files = paths.len(), "discovered scores");
        entries.extend(paths.into_iter().map(|path| CorpusEntry {
            composer: composer.clone(),
            label,
            path,
        }));
    }
    Ok(entries)
}

/// Run the whole pipeline over `entries` in parallel.
pub fn build_corpus(
    config: &PipelineConfig,
    entries: &[CorpusEntry],
) -> Result<CorpusBuild, CorpusError> {
    config.validate()?;
    let codec = PianoRollCodec::new(config.codec.clone())?;

    let mut build = entries
        .par_iter()
        .map(|entry| process_entry(config, &codec, entry))
        .reduce(CorpusBuild::default, CorpusBuild::merge);
    build.cuts.sort_by(|a, b| a.key.cmp(&b.key));

    info!(
        scores = build.scores_seen,
        kept = build.scores_kept,
        rolls = build.cuts.len(),
        indivisible_ratio = build.encode_stats.indivisible_ratio(),
        "corpus built"
    );
    Ok(build)
}

fn process_entry(
    config: &PipelineConfig,
    codec: &PianoRollCodec,
    entry: &CorpusEntry,
) -> CorpusBuild {
    match load_midi(&entry.path) {
        Ok(score) => process_score(config, codec, &entry.composer, entry.label, &score),
        Err(err) => {
            let stem = entry
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let id = format!("{}/{}", entry.composer, stem);
            warn!(score = %id, %err, "skipping unparseable score");
            let mut build = CorpusBuild {
                scores_seen: 1,
                ..CorpusBuild::default()
            };
            build.pruning.record(DiscardReason::ParseError, &id);
            build
        }
    }
}

/// Stats, prune, cut, augment and encode one parsed score.
pub fn process_score(
    config: &PipelineConfig,
    codec: &PianoRollCodec,
    composer: &str,
    label: usize,
    score: &Score,
) -> CorpusBuild {
    let granularity = codec.config().granularity;
    let id = format!("{}/{}", composer, score.name);
    let mut build = CorpusBuild {
        scores_seen: 1,
        ..CorpusBuild::default()
    };

    let stats = ScoreStats::collect(&score.name, composer, score, granularity);
    build.corpus_stats.record(&stats);
    let keep = config.prune.evaluate(&id, &stats, &mut build.pruning);
    build.score_stats.insert(id.clone(), stats);
    if !keep {
        debug!(score = %id, "pruned");
        return build;
    }
    build.scores_kept = 1;

    for cut in cut_score(score, config.cut, granularity) {
        let cut_id = format!("{}-{}", id, cut.index);
        let steps = match codec.steps_per_cut(cut.time_signature, cut.measures_per_cut) {
            Ok(steps) => steps,
            Err(err) => {
                warn!(cut = %cut_id, %err, "skipping cut");
                build.pruning.record(DiscardReason::EncodeError, &cut_id);
                continue;
            }
        };
        if !config.prune.accepts_cut(&cut_id, steps, &mut build.pruning) {
            continue;
        }
        for variant in augment(&cut.measures, &config.augment) {
            let key = format!("{}-{}", cut_id, variant.index);
            match codec.encode_with_stats(
                &variant.measures,
                cut.time_signature,
                cut.measures_per_cut,
                &mut build.encode_stats,
            ) {
                Ok(roll) => build.cuts.push(EncodedCut {
                    key,
                    label,
                    time_signature: cut.time_signature,
                    measures_per_cut: cut.measures_per_cut,
                    semitones: variant.semitones,
                    roll,
                }),
                Err(err) => {
                    warn!(key = %key, %err, "skipping cut");
                    build.pruning.record(DiscardReason::EncodeError, &key);
                }
            }
        }
    }
    build
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::augment::AugmentConfig;
    use crate::cut::CutMode;
    use apollo_roll::{IndivisiblePolicy, Measure, Part, TimedEvent, score::beats};

    fn scale_score(name: &str, measures: usize) -> Score {
        let measures = (0..measures)
            .map(|i| {
                Measure::new(i as u32 + 1, TimeSignature::COMMON)
                    .with(TimedEvent::note(beats(0, 1), beats(2, 1), 60 + (i % 12) as u8))
                    .with(TimedEvent::chord(beats(2, 1), beats(2, 1), vec![48, 55]))
            })
            .collect();
        Score {
            name: name.into(),
            parts: vec![Part {
                name: "piano".into(),
                measures,
            }],
        }
    }

    fn codec(config: &PipelineConfig) -> PianoRollCodec {
        PianoRollCodec::new(config.codec.clone()).unwrap()
    }

    #[test]
    fn test_process_score_keys_and_labels() {
        let config = PipelineConfig::default();
        // 12 measures of 4/4 is exactly one 192-step cut.
        let build = process_score(&config, &codec(&config), "bach", 0, &scale_score("prelude", 13));
        assert_eq!(build.cuts.len(), 11);
        assert_eq!(build.scores_kept, 1);
        assert!(build.cuts.iter().all(|c| c.label == 0 && c.roll.steps() == 192));
        assert_eq!(build.cuts[0].key, "bach/prelude-0-0");
        assert_eq!(build.cuts[10].key, "bach/prelude-0-10");
        assert_eq!(build.cuts[10].semitones, -5);
        assert!(build.score_stats.contains_key("bach/prelude"));
    }

    #[test]
    fn test_pruned_score_produces_no_rolls() {
        let mut config = PipelineConfig::default();
        config.prune.min_measures = Some(100);
        let build = process_score(&config, &codec(&config), "bach", 0, &scale_score("short", 12));
        assert!(build.cuts.is_empty());
        assert_eq!(build.scores_kept, 0);
        assert!(build.pruning.contains(DiscardReason::NumMeasures, "bach/short"));
    }

    #[test]
    fn test_encode_failure_isolated_to_cut() {
        let mut config = PipelineConfig::default();
        config.codec.indivisible = IndivisiblePolicy::Reject;
        config.prune.max_indivisible_ratio = None;
        config.augment.max_semitones = 1;
        config.cut = CutMode::Measures(2);

        let mut score = scale_score("fugue", 4);
        score.parts[0].measures[2].events.push(TimedEvent::note(beats(1, 1), beats(1, 10), 72));

        let build = process_score(&config, &codec(&config), "bach", 0, &score);
        let keys: Vec<_> = build.cuts.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["bach/fugue-0-0", "bach/fugue-0-1", "bach/fugue-0-2"]);
        assert_eq!(build.pruning.count(DiscardReason::EncodeError), 3);
    }

    #[test]
    fn test_merge_sums_partials() {
        let config = PipelineConfig {
            augment: AugmentConfig { max_semitones: 0 },
            ..PipelineConfig::default()
        };
        let codec = codec(&config);
        let a = process_score(&config, &codec, "bach", 0, &scale_score("a", 12));
        let b = process_score(&config, &codec, "beethoven", 1, &scale_score("b", 24));
        let merged = a.merge(b);
        assert_eq!(merged.scores_seen, 2);
        assert_eq!(merged.cuts.len(), 3);
        assert_eq!(merged.score_stats.len(), 2);
        assert_eq!(merged.corpus_stats.histogram("composer").len(), 2);
    }
}
