// Contracts for the external generative collaborators.
//
// The pipeline never knows how notes are produced. It talks to two narrow
// traits:
// - RhythmGenerator: one call, request in, percussion timeline out.
// - MelodicDecoder: sample latent vectors, then decode them into melodic
//   timelines of a requested length in bars.
//
// Implementations take `&self` and must be Send + Sync so the two builders
// can run on separate threads. A collaborator with mutable inference state
// serializes access to it internally (see procedural.rs for an example).

use serde::{Deserialize, Serialize};

use crate::error::GeneratorError;
use crate::timeline::NoteTimeline;

/// A bar-aligned, half-open section `[start_bar, end_bar)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRange {
    pub start_bar: u32,
    pub end_bar: u32,
}

impl SectionRange {
    /// The first `num_bars` bars of the track.
    pub fn bars(num_bars: u32) -> Self {
        SectionRange {
            start_bar: 0,
            end_bar: num_bars,
        }
    }

    /// Number of bars covered.
    pub fn len(&self) -> u32 {
        self.end_bar.saturating_sub(self.start_bar)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parameters for one rhythm generation call. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub section: SectionRange,
    /// Sampling variance. Must be > 0; 1.0 samples the model as trained.
    pub temperature: f64,
    /// Model/style selector, e.g. "drum_kit".
    pub style: String,
    /// Tempo the generator should lay bars out at.
    pub qpm: f64,
    /// Beats in one bar of the section.
    pub beats_per_bar: u32,
}

impl GenerationRequest {
    /// Section start in seconds at the request tempo.
    pub fn start_seconds(&self) -> f64 {
        f64::from(self.section.start_bar) * self.bar_seconds()
    }

    /// Section end in seconds at the request tempo.
    pub fn end_seconds(&self) -> f64 {
        f64::from(self.section.end_bar) * self.bar_seconds()
    }

    /// Length of one bar in seconds at the request tempo.
    pub fn bar_seconds(&self) -> f64 {
        60.0 / self.qpm * f64::from(self.beats_per_bar)
    }
}

/// Latent vectors drawn from a decoder's representation space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatentBatch {
    pub vectors: Vec<Vec<f64>>,
}

impl LatentBatch {
    /// Number of latent vectors in the batch.
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

/// Produces percussion patterns for a bar range.
pub trait RhythmGenerator: Send + Sync {
    fn generate(&self, request: &GenerationRequest) -> Result<NoteTimeline, GeneratorError>;
}

/// Samples latent vectors and decodes them into melodic fragments.
pub trait MelodicDecoder: Send + Sync {
    fn sample(&self, count: usize) -> Result<LatentBatch, GeneratorError>;

    /// Decode every vector in `batch` into a timeline `length_in_bars` long.
    fn decode(
        &self,
        batch: &LatentBatch,
        length_in_bars: u32,
    ) -> Result<Vec<NoteTimeline>, GeneratorError>;
}
