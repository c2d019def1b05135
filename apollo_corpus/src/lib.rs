// Apollo corpus tooling
//
// Turns a directory of MIDI scores, grouped by composer, into a labelled
// piano-roll dataset using the `apollo_roll` codec, and reads datasets back.
//
// Architecture:
// - config.rs: `PipelineConfig` (JSON, serde defaults) + validation
// - cut.rs: Score cutter (split at meter changes, fixed-length cuts)
// - augment.rs: Key-transposition variants of each cut
// - stats.rs: Per-score metadata record + corpus-wide value histograms
// - prune.rs: Pruning rules over the metadata record, discard ledger
// - pipeline.rs: File discovery and the parallel (rayon) corpus build
// - store.rs: Dataset directory layout (NPZ rolls, JSON manifest/stats)
// - error.rs: `CorpusError`
//
// The `apollo` binary (main.rs) wires these into `build`, `decode`,
// `inspect` and `show-config` subcommands.

pub mod augment;
pub mod config;
pub mod cut;
pub mod error;
pub mod pipeline;
pub mod prune;
pub mod stats;
pub mod store;

pub use config::{PipelineConfig, load_config};
pub use error::CorpusError;
pub use pipeline::{CorpusBuild, CorpusEntry, EncodedCut, build_corpus, discover};
