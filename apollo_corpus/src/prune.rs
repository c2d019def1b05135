// Pruning filter over per-score metadata.
//
// `PruneRules` is a pure predicate evaluator over a `ScoreStats` record.
// Every criterion is optional; an unset criterion accepts everything. A
// score is evaluated against all criteria and each failed one is recorded in
// `PruningStats`, so the corpus summary shows every reason a score was
// dropped and not just the first. Parse and encode failures from the
// pipeline land in the same ledger.

use crate::stats::ScoreStats;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PruneRules {
    /// Allowed time signatures, e.g. "3/4". Every signature used must be listed.
    pub time_signatures: Option<BTreeSet<String>>,
    /// Allowed key signatures by major-scale name, e.g. "B- major".
    pub key_signatures: Option<BTreeSet<String>>,
    pub parts: Option<BTreeSet<usize>>,
    /// Inclusive MIDI pitch range every note must fall in.
    pub note_range: Option<(u8, u8)>,
    pub min_measures: Option<usize>,
    /// Finest note value allowed, e.g. 16 for sixteenths.
    pub max_granularity: Option<u32>,
    pub reject_pickups: bool,
    pub require_consistent_measures: bool,
    pub require_consistent_time: bool,
    pub require_consistent_key: bool,
    /// Largest accepted share of off-grid events.
    pub max_indivisible_ratio: Option<f64>,
    /// Exact roll height every cut must have.
    pub num_steps: Option<usize>,
}

impl Default for PruneRules {
    fn default() -> Self {
        PruneRules {
            time_signatures: None,
            key_signatures: None,
            parts: Some((1..=4).collect()),
            note_range: Some((apollo_roll::pitch::MIN_PITCH, apollo_roll::pitch::MAX_PITCH)),
            min_measures: None,
            max_granularity: None,
            reject_pickups: false,
            require_consistent_measures: false,
            require_consistent_time: false,
            require_consistent_key: false,
            max_indivisible_ratio: Some(0.01),
            num_steps: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    NumParts,
    TimeSignature,
    KeySignature,
    HasPickup,
    NumMeasures,
    NoteRange,
    ConsistentMeasures,
    Granularity,
    Indivisible,
    ConsistentTime,
    ConsistentKey,
    NumSteps,
    ParseError,
    EncodeError,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiscardReason::NumParts => "num_parts",
            DiscardReason::TimeSignature => "time_signature",
            DiscardReason::KeySignature => "key_signature",
            DiscardReason::HasPickup => "has_pickup",
            DiscardReason::NumMeasures => "num_measures",
            DiscardReason::NoteRange => "note_range",
            DiscardReason::ConsistentMeasures => "consistent_measures",
            DiscardReason::Granularity => "granularity",
            DiscardReason::Indivisible => "indivisible",
            DiscardReason::ConsistentTime => "consistent_time",
            DiscardReason::ConsistentKey => "consistent_key",
            DiscardReason::NumSteps => "num_steps",
            DiscardReason::ParseError => "parse_error",
            DiscardReason::EncodeError => "encode_error",
        };
        f.write_str(name)
    }
}

/// Discard reason -> names of the scores (or cuts) discarded for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruningStats {
    pub discarded: BTreeMap<DiscardReason, BTreeSet<String>>,
}

impl PruningStats {
    pub fn record(&mut self, reason: DiscardReason, name: &str) {
        self.discarded.entry(reason).or_default().insert(name.to_string());
    }

    pub fn merge(&mut self, other: PruningStats) {
        for (reason, names) in other.discarded {
            self.discarded.entry(reason).or_default().extend(names);
        }
    }

    pub fn count(&self, reason: DiscardReason) -> usize {
        self.discarded.get(&reason).map_or(0, BTreeSet::len)
    }

    pub fn contains(&self, reason: DiscardReason, name: &str) -> bool {
        self.discarded.get(&reason).is_some_and(|names| names.contains(name))
    }
}

impl PruneRules {
    /// Check a score against every criterion. Returns true when it is kept;
    /// each failed criterion is recorded under the score's name.
    pub fn evaluate(&self, name: &str, stats: &ScoreStats, pruning: &mut PruningStats) -> bool {
        let mut failed = Vec::new();

        if self.parts.as_ref().is_some_and(|parts| !parts.contains(&stats.num_parts)) {
            failed.push(DiscardReason::NumParts);
        }
        if !subset_of(&stats.time_signatures, self.time_signatures.as_ref()) {
            failed.push(DiscardReason::TimeSignature);
        }
        if !subset_of(&stats.key_signatures, self.key_signatures.as_ref()) {
            failed.push(DiscardReason::KeySignature);
        }
        if self.reject_pickups && stats.has_pickup {
            failed.push(DiscardReason::HasPickup);
        }
        if self.min_measures.is_some_and(|min| stats.num_measures < min) {
            failed.push(DiscardReason::NumMeasures);
        }
        if let Some((low, high)) = self.note_range {
            let below = stats.min_note.is_some_and(|n| n < low);
            let above = stats.max_note.is_some_and(|n| n > high);
            if below || above {
                failed.push(DiscardReason::NoteRange);
            }
        }
        if self.require_consistent_measures && !stats.consistent_measures {
            failed.push(DiscardReason::ConsistentMeasures);
        }
        let too_fine = match (self.max_granularity, stats.granularity) {
            (Some(max), Some(finest)) => finest > max as f64,
            _ => false,
        };
        if too_fine {
            failed.push(DiscardReason::Granularity);
        }
        if self
            .max_indivisible_ratio
            .is_some_and(|max| stats.indivisible_ratio > max)
        {
            failed.push(DiscardReason::Indivisible);
        }
        if self.require_consistent_time && !stats.consistent_time {
            failed.push(DiscardReason::ConsistentTime);
        }
        if self.require_consistent_key && !stats.consistent_key {
            failed.push(DiscardReason::ConsistentKey);
        }

        for &reason in &failed {
            pruning.record(reason, name);
        }
        failed.is_empty()
    }

    /// Check a cut's roll height against `num_steps`.
    pub fn accepts_cut(&self, key: &str, steps: usize, pruning: &mut PruningStats) -> bool {
        match self.num_steps {
            Some(expected) if expected != steps => {
                pruning.record(DiscardReason::NumSteps, key);
                false
            }
            _ => true,
        }
    }
}

/// True when no allow-list is set or every value is on it.
fn subset_of(values: &[String], allowed: Option<&BTreeSet<String>>) -> bool {
    allowed.is_none_or(|allowed| values.iter().all(|v| allowed.contains(v)))
}
