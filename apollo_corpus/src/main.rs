// Apollo command-line entry point.
//
// Subcommands:
//   apollo build --corpus DIR --out DIR [--config FILE] [--jobs N]
//   apollo decode --dataset DIR --key KEY --out FILE.mid [--config FILE] [--tempo BPM] [--show]
//   apollo inspect FILE.mid [--composer NAME] [--config FILE]
//   apollo show-config
//
// Logging goes to stderr through tracing-subscriber; RUST_LOG overrides the
// default level (`info`, or `debug` with -v).

use anyhow::{Context, bail};
use apollo_corpus::cut::cut_score;
use apollo_corpus::prune::PruningStats;
use apollo_corpus::stats::ScoreStats;
use apollo_corpus::store::{read_manifest, read_roll, write_dataset};
use apollo_corpus::{PipelineConfig, build_corpus, discover, load_config};
use apollo_roll::midi::{load_midi, write_midi};
use apollo_roll::{CodecConfig, PianoRollCodec};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Piano-roll dataset builder for symbolic music
#[derive(Parser)]
#[command(name = "apollo")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a MIDI corpus into a piano-roll dataset
    Build {
        /// Corpus root containing one directory per composer
        #[arg(long)]
        corpus: PathBuf,

        /// Output dataset directory
        #[arg(long)]
        out: PathBuf,

        /// Pipeline configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Worker threads (defaults to one per core)
        #[arg(short, long)]
        jobs: Option<usize>,
    },
    /// Decode one roll of a dataset back to MIDI
    Decode {
        /// Dataset directory written by `build`
        #[arg(long)]
        dataset: PathBuf,

        /// Roll key, e.g. "bach/prelude-0-0"
        #[arg(long)]
        key: String,

        /// Output MIDI file
        #[arg(long)]
        out: PathBuf,

        /// Pipeline configuration (JSON); supplies the default tempo
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Tempo of the written file (defaults to the config's tempo_bpm)
        #[arg(long)]
        tempo: Option<u16>,

        /// Print a text rendering of the roll
        #[arg(long)]
        show: bool,
    },
    /// Print the metadata record of a MIDI file as JSON
    Inspect {
        /// Input MIDI file
        input: PathBuf,

        /// Composer to attribute the score to
        #[arg(long, default_value = "unknown")]
        composer: String,

        /// Pipeline configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the default configuration as JSON
    ShowConfig,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Build { corpus, out, config, jobs } => {
            let config = resolve_config(config.as_deref())?;
            if let Some(jobs) = jobs {
                if jobs == 0 {
                    bail!("--jobs must be at least 1");
                }
                rayon::ThreadPoolBuilder::new()
                    .num_threads(jobs)
                    .build_global()
                    .context("failed to start worker pool")?;
            }
            run_build(&corpus, &out, &config)
        }
        Commands::Decode { dataset, key, out, config, tempo, show } => {
            let config = resolve_config(config.as_deref())?;
            let tempo = config.export_tempo(tempo)?;
            run_decode(&dataset, &key, &out, tempo, show)
        }
        Commands::Inspect { input, composer, config } => {
            let config = resolve_config(config.as_deref())?;
            run_inspect(&input, &composer, &config)
        }
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&PipelineConfig::default())?);
            Ok(())
        }
    }
}

fn resolve_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    match path {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn run_build(corpus: &Path, out: &Path, config: &PipelineConfig) -> anyhow::Result<()> {
    if !corpus.is_dir() {
        bail!("corpus directory {} does not exist", corpus.display());
    }
    let entries = discover(corpus, &config.composers)?;
    if entries.is_empty() {
        bail!("no MIDI files found under {}", corpus.display());
    }
    info!(files = entries.len(), "building corpus");

    let build = build_corpus(config, &entries)?;
    let manifest = write_dataset(out, config, &build)?;

    println!("Scores: {} seen, {} kept", build.scores_seen, build.scores_kept);
    println!("Rolls: {}", manifest.rolls.len());
    for (reason, names) in &build.pruning.discarded {
        println!("  discarded {}: {}", reason, names.len());
    }
    let stats = &build.encode_stats;
    println!(
        "Events: {} ({} indivisible, {} out of range, {} clipped frames)",
        stats.events, stats.indivisible, stats.out_of_range, stats.clipped_frames
    );
    Ok(())
}

fn run_decode(
    dataset: &Path,
    key: &str,
    out: &Path,
    tempo: u16,
    show: bool,
) -> anyhow::Result<()> {
    let manifest = read_manifest(dataset)?;
    let Some(entry) = manifest.entry(key) else {
        bail!("no roll named '{}' in {}", key, dataset.display());
    };
    let roll = read_roll(dataset, key)?;
    let codec = PianoRollCodec::new(CodecConfig {
        granularity: manifest.granularity,
        representation: manifest.representation,
        ..CodecConfig::default()
    })?;
    let measures = codec.decode(&roll, entry.time_signature, entry.measures_per_cut)?;

    if show {
        let steps_per_bar = codec.steps_per_measure(entry.time_signature)?;
        println!("{}", roll.summary(steps_per_bar));
    }
    write_midi(&measures, tempo, out)
        .with_context(|| format!("failed to write {}", out.display()))?;
    println!("Wrote {} measures to {}", measures.len(), out.display());
    Ok(())
}

fn run_inspect(input: &Path, composer: &str, config: &PipelineConfig) -> anyhow::Result<()> {
    let score = load_midi(input).with_context(|| format!("failed to read {}", input.display()))?;
    let granularity = config.codec.granularity;
    let stats = ScoreStats::collect(&score.name, composer, &score, granularity);
    println!("{}", serde_json::to_string_pretty(&stats)?);

    let cuts = cut_score(&score, config.cut, granularity);
    let mut pruning = PruningStats::default();
    let kept = config.prune.evaluate(&score.name, &stats, &mut pruning);
    let reasons: Vec<String> = pruning.discarded.keys().map(ToString::to_string).collect();
    let label = config.label_of(composer);
    if label.is_none() {
        warn!(composer, "composer is not in the configured list");
    }
    info!(
        score = %score.name,
        label = ?label,
        cuts = cuts.len(),
        kept,
        reasons = %reasons.join(","),
        "inspected"
    );
    Ok(())
}
