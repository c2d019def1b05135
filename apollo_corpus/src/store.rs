// Dataset persistence.
//
// A dataset directory holds:
// - rolls.npz: one u8 array per encoded roll, named by its key, plus the
//   label vector under `__labels__` (labels follow manifest order)
// - manifest.json: grid settings and, per roll, key, label, meter, measures
//   per cut and transposition, which is everything `decode` needs
// - score_stats.json: the metadata record of every score seen
// - summary.json: corpus histograms, pruning ledger and encode tallies
//
// Uses `ndarray-npy` for the archive and `serde_json` for the rest.

use crate::config::PipelineConfig;
use crate::error::CorpusError;
use crate::pipeline::CorpusBuild;
use crate::prune::PruningStats;
use crate::stats::{CorpusStats, ScoreStats};
use apollo_roll::{EncodeStats, PianoRoll, Representation, TimeSignature};
use ndarray::{Array1, ArrayD};
use ndarray_npy::{NpzReader, NpzWriter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::info;

pub const ROLLS_FILE: &str = "rolls.npz";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const SCORE_STATS_FILE: &str = "score_stats.json";
pub const SUMMARY_FILE: &str = "summary.json";
pub const LABELS_KEY: &str = "__labels__";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub granularity: u32,
    pub representation: Representation,
    pub composers: Vec<String>,
    pub rolls: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub key: String,
    pub label: usize,
    pub time_signature: TimeSignature,
    pub measures_per_cut: usize,
    pub semitones: i8,
}

impl Manifest {
    pub fn entry(&self, key: &str) -> Option<&ManifestEntry> {
        self.rolls.iter().find(|e| e.key == key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub scores_seen: usize,
    pub scores_kept: usize,
    pub rolls: usize,
    pub corpus_stats: CorpusStats,
    pub pruning: PruningStats,
    pub encode_stats: EncodeStats,
}

/// Write a finished build to `dir`, creating it if needed.
pub fn write_dataset(
    dir: &Path,
    config: &PipelineConfig,
    build: &CorpusBuild,
) -> Result<Manifest, CorpusError> {
    std::fs::create_dir_all(dir)?;

    let mut npz = NpzWriter::new_compressed(File::create(dir.join(ROLLS_FILE))?);
    for cut in &build.cuts {
        match &cut.roll {
            PianoRoll::Binary(data) => npz.add_array(cut.key.as_str(), data)?,
            PianoRoll::OnsetSustain(data) => npz.add_array(cut.key.as_str(), data)?,
        }
    }
    let labels: Array1<u64> = build.cuts.iter().map(|c| c.label as u64).collect();
    npz.add_array(LABELS_KEY, &labels)?;
    npz.finish()?;

    let manifest = Manifest {
        granularity: config.codec.granularity,
        representation: config.codec.representation,
        composers: config.composers.clone(),
        rolls: build
            .cuts
            .iter()
            .map(|c| ManifestEntry {
                key: c.key.clone(),
                label: c.label,
                time_signature: c.time_signature,
                measures_per_cut: c.measures_per_cut,
                semitones: c.semitones,
            })
            .collect(),
    };
    write_json(&dir.join(MANIFEST_FILE), &manifest)?;
    write_json(&dir.join(SCORE_STATS_FILE), &build.score_stats)?;
    write_json(
        &dir.join(SUMMARY_FILE),
        &Summary {
            scores_seen: build.scores_seen,
            scores_kept: build.scores_kept,
            rolls: build.cuts.len(),
            corpus_stats: build.corpus_stats.clone(),
            pruning: build.pruning.clone(),
            encode_stats: build.encode_stats,
        },
    )?;

    info!(dir = %dir.display(), rolls = manifest.rolls.len(), "dataset written");
    Ok(manifest)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CorpusError> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

pub fn read_manifest(dir: &Path) -> Result<Manifest, CorpusError> {
    let reader = BufReader::new(File::open(dir.join(MANIFEST_FILE))?);
    Ok(serde_json::from_reader(reader)?)
}

pub fn read_score_stats(dir: &Path) -> Result<BTreeMap<String, ScoreStats>, CorpusError> {
    let reader = BufReader::new(File::open(dir.join(SCORE_STATS_FILE))?);
    Ok(serde_json::from_reader(reader)?)
}

/// Load one roll back from the archive.
pub fn read_roll(dir: &Path, key: &str) -> Result<PianoRoll, CorpusError> {
    let mut npz = NpzReader::new(File::open(dir.join(ROLLS_FILE))?)?;
    // Archive entries may carry a ".npy" suffix depending on the writer.
    let name = npz
        .names()?
        .into_iter()
        .find(|n| n == key || n.strip_suffix(".npy") == Some(key))
        .ok_or_else(|| CorpusError::MissingRoll(key.to_string()))?;
    let data: ArrayD<u8> = npz.by_name(&name)?;
    Ok(PianoRoll::from_dyn(data)?)
}
