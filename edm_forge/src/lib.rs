// EDM Forge: track assembly pipeline.
//
// Turns two independently generated note streams, a percussion pattern and a
// melodic fragment, into one tempo-locked, sixteenth-note-quantized timeline
// and writes it to a Standard MIDI File.
//
// Architecture:
// - timeline.rs: NoteEvent / NoteTimeline, the representation every stage shares
// - generator.rs: Collaborator traits (RhythmGenerator, MelodicDecoder) and the
//   GenerationRequest / LatentBatch types passed across them
// - rhythm.rs: Rhythm track builder (generated pattern + per-bar kick overlay)
// - melody.rs: Melodic tension builder (decoded fragment + velocity buildup)
// - assemble.rs: Merge, tempo stamp and grid quantization
// - export.rs: MIDI encoding (via midly) with an atomic write to disk
// - pipeline.rs: build_track, the validated end-to-end entry point
// - config.rs: TrackConfig, the tunable constants, loadable from JSON
// - error.rs: Error taxonomy (validation, generation, export, config)
// - procedural.rs: Seeded stand-ins for the external models so the CLI can
//   produce a real file without any inference backend
//
// Every transform returns a new timeline; nothing mutates a caller's data.

pub mod assemble;
pub mod config;
pub mod error;
pub mod export;
pub mod generator;
pub mod melody;
pub mod pipeline;
pub mod procedural;
pub mod rhythm;
pub mod timeline;

pub use config::TrackConfig;
pub use error::{ExportError, GeneratorError, Stage, TrackError, ValidationError};
pub use generator::{GenerationRequest, LatentBatch, MelodicDecoder, RhythmGenerator};
pub use pipeline::{TrackRequest, build_timeline, build_track};
pub use timeline::{NoteEvent, NoteTimeline};
