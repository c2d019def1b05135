// Error type for the corpus pipeline and dataset storage.
//
// Per-file and per-cut failures inside `build_corpus` are logged and counted
// rather than returned; `CorpusError` covers what aborts a whole run (bad
// config, unreadable corpus directory, dataset I/O) plus the single-file
// entry points used by the CLI.

use apollo_roll::{CodecError, MidiError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Midi(#[from] MidiError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("failed to write NPZ archive: {0}")]
    WriteNpz(#[from] ndarray_npy::WriteNpzError),
    #[error("failed to read NPZ archive: {0}")]
    ReadNpz(#[from] ndarray_npy::ReadNpzError),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("no roll named '{0}' in dataset")]
    MissingRoll(String),
}
