// Per-score metadata and corpus-wide tallies.
//
// `ScoreStats` is the fixed metadata record the pruning filter evaluates:
// part and measure counts, pitch extremes, the finest note value present,
// grid divisibility, and the signature sets. `CorpusStats` groups score names
// by the value each statistic took (statistic -> value -> scores), which is
// what the corpus summary prints. Both are built per worker and merged.

use apollo_roll::{Beats, Score};
use num_rational::Ratio;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreStats {
    pub name: String,
    pub composer: String,
    pub num_parts: usize,
    pub has_pickup: bool,
    pub num_measures: usize,
    /// Every measure of the first part (the last excepted) has the same length.
    pub consistent_measures: bool,
    pub min_note: Option<u8>,
    pub max_note: Option<u8>,
    /// Finest note value present as a fraction of a whole note (16.0 for a
    /// sixteenth). None when the score has no timed events.
    pub granularity: Option<f64>,
    /// Every non-zero duration lies on the grid.
    pub divisible_notes: bool,
    /// Off-grid events over all events, rests included.
    pub indivisible_ratio: f64,
    pub time_signatures: Vec<String>,
    pub key_signatures: Vec<String>,
    pub consistent_time: bool,
    pub consistent_key: bool,
}

impl ScoreStats {
    /// Gather the record for one score. `granularity` is the codec grid used
    /// to judge divisibility.
    pub fn collect(name: &str, composer: &str, score: &Score, granularity: u32) -> Self {
        let step: Option<Beats> = (granularity > 0).then(|| Ratio::new(4, granularity as u64));

        let mut min_note: Option<u8> = None;
        let mut max_note: Option<u8> = None;
        let mut shortest: Option<Beats> = None;
        let mut total = 0usize;
        let mut indivisible = 0usize;

        for event in score.measures().flat_map(|m| m.events.iter()) {
            total += 1;
            for &pitch in event.pitches() {
                min_note = Some(min_note.map_or(pitch, |n| n.min(pitch)));
                max_note = Some(max_note.map_or(pitch, |n| n.max(pitch)));
            }
            if *event.duration.numer() == 0 {
                continue;
            }
            shortest = Some(shortest.map_or(event.duration, |s| s.min(event.duration)));
            let on_grid = step.is_some_and(|step| (event.duration / step).is_integer());
            if !on_grid {
                indivisible += 1;
            }
        }

        let consistent_measures = score.parts.first().is_none_or(|part| {
            let lengths: Vec<Beats> = part.measures.iter().map(|m| m.length()).collect();
            let body = &lengths[..lengths.len().saturating_sub(1)];
            body.windows(2).all(|w| w[0] == w[1])
        });

        let time_signatures: Vec<String> =
            score.time_signatures().iter().map(ToString::to_string).collect();
        let key_signatures: Vec<String> = score.key_signatures().into_iter().collect();

        ScoreStats {
            name: name.to_string(),
            composer: composer.to_string(),
            num_parts: score.parts.len(),
            has_pickup: score.has_pickup(),
            num_measures: score.num_measures(),
            consistent_measures,
            min_note,
            max_note,
            granularity: shortest.map(|d| ratio_to_f64(Ratio::new(4, 1) / d)),
            divisible_notes: indivisible == 0,
            indivisible_ratio: if total == 0 { 0.0 } else { indivisible as f64 / total as f64 },
            consistent_time: time_signatures.len() == 1,
            consistent_key: key_signatures.len() == 1,
            time_signatures,
            key_signatures,
        }
    }

    /// (statistic, value) pairs used to group scores in `CorpusStats`.
    fn fields(&self) -> Vec<(&'static str, String)> {
        let opt = |v: Option<u8>| v.map_or_else(|| "none".to_string(), |n| n.to_string());
        vec![
            ("composer", self.composer.clone()),
            ("num_parts", self.num_parts.to_string()),
            ("has_pickup", self.has_pickup.to_string()),
            ("num_measures", self.num_measures.to_string()),
            ("consistent_measures", self.consistent_measures.to_string()),
            ("min_note", opt(self.min_note)),
            ("max_note", opt(self.max_note)),
            ("granularity", self.granularity.map_or_else(|| "none".to_string(), |g| g.to_string())),
            ("divisible_notes", self.divisible_notes.to_string()),
            ("time_signatures", self.time_signatures.join(",")),
            ("key_signatures", self.key_signatures.join(",")),
            ("consistent_time", self.consistent_time.to_string()),
            ("consistent_key", self.consistent_key.to_string()),
        ]
    }
}

fn ratio_to_f64(r: Beats) -> f64 {
    *r.numer() as f64 / *r.denom() as f64
}

/// statistic -> value -> names of the scores that had it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusStats {
    pub by_stat: BTreeMap<String, BTreeMap<String, BTreeSet<String>>>,
}

impl CorpusStats {
    pub fn record(&mut self, stats: &ScoreStats) {
        for (stat, value) in stats.fields() {
            self.by_stat
                .entry(stat.to_string())
                .or_default()
                .entry(value)
                .or_default()
                .insert(stats.name.clone());
        }
    }

    pub fn merge(&mut self, other: CorpusStats) {
        for (stat, values) in other.by_stat {
            let mine = self.by_stat.entry(stat).or_default();
            for (value, names) in values {
                mine.entry(value).or_default().extend(names);
            }
        }
    }

    /// Number of scores per value of one statistic.
    pub fn histogram(&self, stat: &str) -> BTreeMap<String, usize> {
        self.by_stat
            .get(stat)
            .map(|values| values.iter().map(|(v, names)| (v.clone(), names.len())).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apollo_roll::{KeySignature, Measure, Part, TimeSignature, TimedEvent, score::beats};

    fn sample_score() -> Score {
        let ts = TimeSignature::new(3, 4);
        let key = Some(KeySignature {
            sharps: -2,
            minor: false,
        });
        let mut first = Measure::new(1, ts)
            .with(TimedEvent::chord(beats(0, 1), beats(1, 1), vec![48, 72]))
            .with(TimedEvent::note(beats(1, 1), beats(1, 2), 65))
            .with(TimedEvent::note(beats(3, 2), beats(1, 10), 67))
            .with(TimedEvent::rest(beats(8, 5), beats(7, 5)));
        first.key_signature = key;
        let mut second = Measure::new(2, ts).with(TimedEvent::note(beats(0, 1), beats(3, 1), 60));
        second.key_signature = key;
        Score {
            name: "minuet".into(),
            parts: vec![Part {
                name: "piano".into(),
                measures: vec![first, second],
            }],
        }
    }

    #[test]
    fn test_collect_score_stats() {
        let stats = ScoreStats::collect("minuet", "bach", &sample_score(), 16);
        assert_eq!(stats.num_parts, 1);
        assert!(!stats.has_pickup);
        assert_eq!(stats.num_measures, 2);
        assert!(stats.consistent_measures);
        assert_eq!((stats.min_note, stats.max_note), (Some(48), Some(72)));
        // The 1/10 quarter note is the finest value: 4 / 0.1 = 40.
        assert_eq!(stats.granularity, Some(40.0));
        assert!(!stats.divisible_notes);
        // 1/10 and 7/5 are off the sixteenth grid, out of five events.
        assert!((stats.indivisible_ratio - 0.4).abs() < 1e-9);
        assert_eq!(stats.time_signatures, vec!["3/4".to_string()]);
        assert_eq!(stats.key_signatures, vec!["B- major".to_string()]);
        assert!(stats.consistent_time);
        assert!(stats.consistent_key);
    }

    #[test]
    fn test_empty_score_stats() {
        let score = Score {
            name: "empty".into(),
            parts: vec![],
        };
        let stats = ScoreStats::collect("empty", "bach", &score, 16);
        assert_eq!(stats.min_note, None);
        assert_eq!(stats.granularity, None);
        assert!(stats.divisible_notes);
        assert_eq!(stats.indivisible_ratio, 0.0);
        assert!(!stats.consistent_key);
    }

    #[test]
    fn test_corpus_stats_record_and_merge() {
        let a = ScoreStats::collect("a", "bach", &sample_score(), 16);
        let mut b = a.clone();
        b.name = "b".into();
        b.composer = "beethoven".into();

        let mut left = CorpusStats::default();
        left.record(&a);
        let mut right = CorpusStats::default();
        right.record(&b);
        left.merge(right);

        let composers = left.histogram("composer");
        assert_eq!(composers.get("bach"), Some(&1));
        assert_eq!(composers.get("beethoven"), Some(&1));
        assert_eq!(left.histogram("time_signatures").get("3/4"), Some(&2));
        assert!(left.histogram("no_such_stat").is_empty());
    }
}
