// EDM Forge CLI entry point.
//
// Builds one track with the procedural collaborators and writes it as MIDI.
// The pipeline: validate -> rhythm + melody (in parallel) -> assemble ->
// export. The output directory comes from --output-dir, then the OUTPUT_DIR
// environment variable, then the current directory.
//
// Usage:
//   edm-forge [--bars N] [--temperature T] [--seed N] [--output-dir DIR]
//     [--config FILE] [--sequential]
//
// Logging goes through tracing; set RUST_LOG (e.g. RUST_LOG=debug) to see
// per-stage detail.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use edm_forge::config::TrackConfig;
use edm_forge::export::read_midi_summary;
use edm_forge::procedural::{LatentMelodyDecoder, PatternDrumGenerator};
use edm_forge::{TrackRequest, build_track};

#[derive(Parser, Debug)]
#[command(name = "edm-forge", about = "Generate a tempo-locked EDM track as a MIDI file")]
struct Args {
    /// Number of bars to generate.
    #[arg(long, default_value_t = 8)]
    bars: u32,

    /// Sampling temperature for the drum pattern (> 0).
    #[arg(long, default_value_t = 1.0)]
    temperature: f64,

    /// Seed for the procedural generators. Random if omitted.
    #[arg(long)]
    seed: Option<u64>,

    /// Directory the MIDI file is written to.
    #[arg(long, env = "OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    /// JSON file overriding TrackConfig fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run the rhythm and melody builders one after the other.
    #[arg(long)]
    sequential: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TrackConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => TrackConfig::default(),
    };
    if args.sequential {
        config.parallel_builders = false;
    }

    let seed = args.seed.unwrap_or_else(clock_seed);
    tracing::info!(seed, "seeding procedural generators");

    println!("=== EDM Forge ===");
    println!("Bars: {}", args.bars);
    println!("Tempo: {} qpm", config.tempo_qpm);
    println!("Temperature: {}", args.temperature);
    println!("Seed: {}", seed);
    println!();

    // Independent streams for the two collaborators.
    let drums = PatternDrumGenerator::new(seed);
    let lead = LatentMelodyDecoder::new(
        seed ^ 0x5bd1_e995,
        config.tempo_qpm,
        config.beats_per_bar,
    );

    let request = TrackRequest {
        num_bars: args.bars,
        temperature: args.temperature,
    };
    let path = build_track(&drums, &lead, &config, &request, &args.output_dir)
        .context("track generation failed")?;

    let summary = read_midi_summary(&path).context("reading back the written file")?;
    println!("Generated EDM track saved as {}", path.display());
    println!(
        "  {} notes ({} drum hits), {:.2}s of music",
        summary.note_ons,
        summary.percussion_note_ons,
        summary.duration_seconds()
    );
    println!();
    println!("Play with: timidity {} (or any MIDI player)", path.display());

    Ok(())
}

/// Seed from the wall clock when none is given.
fn clock_seed() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
