// Procedural stand-ins for the external generative models.
//
// The pipeline is written against the RhythmGenerator and MelodicDecoder
// traits; a deployment plugs its inference backends in there. These two
// implementations need no model files, so the CLI and the integration tests
// can produce real tracks anywhere:
//
// - PatternDrumGenerator: walks the section one sixteenth step at a time and
//   picks a drum voice (or a rest) from per-step weight tables. The tables
//   favour kicks on even beats, snare/clap on the backbeat and open hats on
//   the offbeat. Temperature is applied to the weights, so cold runs keep
//   to the strongest choice and hot runs fill in the gaps.
// - LatentMelodyDecoder: sample() draws Gaussian latent vectors; decode()
//   turns each vector into a minor-key lead line. Decoding seeds its own
//   PRNG from the vector's bits, so a given latent always decodes to the same
//   melody. Latent components steer register and rest density per two-bar
//   phrase.
//
// Both hold their PRNG behind a Mutex so they satisfy the Send + Sync bound
// and can serve the two builders running in parallel.

use std::sync::Mutex;

use edm_forge_prng::SeededRng;

use crate::error::GeneratorError;
use crate::generator::{GenerationRequest, LatentBatch, MelodicDecoder, RhythmGenerator};
use crate::timeline::{NoteEvent, NoteTimeline};

/// Sixteenth-note steps per quarter note used by both stand-ins.
const STEPS_PER_BEAT: u32 = 4;

/// The only style the drum stand-in knows.
pub const DRUM_KIT_STYLE: &str = "drum_kit";

/// Sixteenth steps in `bars` bars of `beats_per_bar` beats, or an error if
/// the count does not fit in a u32.
fn section_steps(bars: u32, beats_per_bar: u32) -> Result<u32, GeneratorError> {
    beats_per_bar
        .checked_mul(STEPS_PER_BEAT)
        .and_then(|per_bar| per_bar.checked_mul(bars))
        .ok_or_else(|| {
            GeneratorError::InvalidRequest(format!(
                "{bars} bars of {beats_per_bar} beats is too long to generate"
            ))
        })
}

fn lock_rng(rng: &Mutex<SeededRng>) -> Result<std::sync::MutexGuard<'_, SeededRng>, GeneratorError> {
    rng.lock()
        .map_err(|_| GeneratorError::Unavailable("random state poisoned".into()))
}

// ---------------------------------------------------------------------------
// Drums
// ---------------------------------------------------------------------------

/// A drum voice: General MIDI pitch and base velocity.
#[derive(Debug, Clone, Copy)]
struct DrumVoice {
    pitch: u8,
    velocity: u8,
}

const KICK: DrumVoice = DrumVoice { pitch: 36, velocity: 110 };
const SNARE: DrumVoice = DrumVoice { pitch: 38, velocity: 100 };
const CLAP: DrumVoice = DrumVoice { pitch: 39, velocity: 95 };
const CLOSED_HAT: DrumVoice = DrumVoice { pitch: 42, velocity: 70 };
const OPEN_HAT: DrumVoice = DrumVoice { pitch: 46, velocity: 80 };

/// Choices at every step; index 0 is a rest.
const VOICES: [Option<DrumVoice>; 6] = [
    None,
    Some(KICK),
    Some(SNARE),
    Some(CLAP),
    Some(CLOSED_HAT),
    Some(OPEN_HAT),
];

/// Unnormalized weights for `VOICES` at a position in the bar.
fn step_weights(step_in_bar: u32) -> [f64; 6] {
    let beat = step_in_bar / STEPS_PER_BEAT;
    let backbeat = beat % 2 == 1;
    match step_in_bar % STEPS_PER_BEAT {
        // On the beat
        0 if backbeat => [0.5, 1.0, 4.0, 1.5, 1.0, 0.0],
        0 => [0.5, 4.0, 0.5, 0.0, 1.0, 0.0],
        // Offbeat eighth
        2 => [1.0, 0.5, 0.0, 0.0, 2.0, 4.0],
        // Sixteenths in between
        _ => [3.0, 0.3, 0.3, 0.0, 2.0, 0.0],
    }
}

/// Seeded drum-pattern generator.
pub struct PatternDrumGenerator {
    rng: Mutex<SeededRng>,
}

impl PatternDrumGenerator {
    /// Generator whose patterns are fixed by `seed`.
    pub fn new(seed: u64) -> Self {
        PatternDrumGenerator {
            rng: Mutex::new(SeededRng::new(seed)),
        }
    }
}

impl RhythmGenerator for PatternDrumGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<NoteTimeline, GeneratorError> {
        if request.style != DRUM_KIT_STYLE {
            return Err(GeneratorError::UnknownStyle(request.style.clone()));
        }
        if !(request.temperature.is_finite() && request.temperature > 0.0) {
            return Err(GeneratorError::InvalidRequest(format!(
                "temperature must be positive, got {}",
                request.temperature
            )));
        }
        if request.section.is_empty() || request.beats_per_bar == 0 {
            return Err(GeneratorError::InvalidRequest(
                "section must span at least one bar".into(),
            ));
        }
        if !(request.qpm.is_finite() && request.qpm > 0.0) {
            return Err(GeneratorError::InvalidRequest(format!(
                "tempo must be positive, got {}",
                request.qpm
            )));
        }

        let step = 60.0 / request.qpm / f64::from(STEPS_PER_BEAT);
        let steps_per_bar = section_steps(1, request.beats_per_bar)?;
        let total_steps = section_steps(request.section.len(), request.beats_per_bar)?;
        let origin = request.start_seconds();

        let mut rng = lock_rng(&self.rng)?;
        let mut notes = Vec::new();
        for s in 0..total_steps {
            let weights = step_weights(s % steps_per_bar);
            let choice = rng
                .sample_tempered(&weights, request.temperature)
                .unwrap_or(0);
            let Some(voice) = VOICES[choice] else {
                continue;
            };
            // +/- 12 velocity humanization.
            let jitter = rng.range_usize(0, 25) as i16 - 12;
            let velocity = (i16::from(voice.velocity) + jitter).clamp(1, 127) as u8;
            let start = origin + f64::from(s) * step;
            notes.push(NoteEvent::percussion(voice.pitch, start, start + step, velocity));
        }

        Ok(NoteTimeline::from_notes(notes))
    }
}

// ---------------------------------------------------------------------------
// Melody
// ---------------------------------------------------------------------------

/// Dimension of the latent space the decoder samples from.
pub const LATENT_DIM: usize = 16;

/// A natural minor, as semitone offsets from the tonic.
const MINOR_SCALE: [u8; 7] = [0, 2, 3, 5, 7, 8, 10];

/// Tonic of the lowest octave the lead may use (A3).
const LEAD_TONIC: u8 = 57;

/// Scale-degree range the lead moves in (two octaves from A3).
const DEGREE_SPAN: i32 = 14;

/// Velocity of every decoded note, before the buildup transform.
const DECODED_VELOCITY: u8 = 80;

/// Bars covered by one latent-driven phrase.
const PHRASE_BARS: u32 = 2;

/// Relative likelihood of each melodic move in scale degrees. Stepwise
/// motion dominates, leaps are rare.
const DEGREE_MOVES: [(i32, f64); 9] = [
    (0, 2.0),
    (1, 6.0),
    (-1, 6.0),
    (2, 3.0),
    (-2, 3.0),
    (3, 1.0),
    (-3, 1.0),
    (4, 0.5),
    (-4, 0.5),
];

/// Note lengths in sixteenth steps.
const LENGTHS: [u32; 3] = [1, 2, 4];

fn degree_to_pitch(degree: i32) -> u8 {
    let degree = degree.clamp(0, DEGREE_SPAN);
    let octave = (degree / 7) as u8;
    LEAD_TONIC + 12 * octave + MINOR_SCALE[(degree % 7) as usize]
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Fold a latent vector's bit pattern into a PRNG seed.
fn latent_seed(vector: &[f64]) -> u64 {
    vector.iter().fold(0x6a09_e667_f3bc_c909, |acc, v| {
        (acc ^ v.to_bits()).rotate_left(29).wrapping_mul(0x9e37_79b9_7f4a_7c15)
    })
}

/// Seeded latent sampler and deterministic melody decoder.
pub struct LatentMelodyDecoder {
    rng: Mutex<SeededRng>,
    qpm: f64,
    beats_per_bar: u32,
    instrument: u8,
    program: u8,
}

impl LatentMelodyDecoder {
    /// Decoder laying melodies out at `qpm` with `beats_per_bar` beats to the
    /// bar, on channel 0 with the square-lead program (GM "Lead 1",
    /// zero-based 80). Give it the same tempo and meter as the rhythm side or
    /// the two streams will cover different lengths.
    pub fn new(seed: u64, qpm: f64, beats_per_bar: u32) -> Self {
        LatentMelodyDecoder {
            rng: Mutex::new(SeededRng::new(seed)),
            qpm,
            beats_per_bar,
            instrument: 0,
            program: 80,
        }
    }

    /// Decode one latent vector into a melody `bars` long.
    fn decode_one(&self, latent: &[f64], bars: u32) -> Result<NoteTimeline, GeneratorError> {
        let mut rng = SeededRng::new(latent_seed(latent));
        let step = 60.0 / self.qpm / f64::from(STEPS_PER_BEAT);
        let steps_per_phrase = section_steps(PHRASE_BARS, self.beats_per_bar)?;
        let total_steps = section_steps(bars, self.beats_per_bar)?;
        let move_weights: Vec<f64> = DEGREE_MOVES.iter().map(|&(_, w)| w).collect();

        let mut notes = Vec::new();
        let mut degree = 7;
        let mut s = 0u32;
        while s < total_steps {
            let phrase = (s / steps_per_phrase) as usize;
            let register = latent[(2 * phrase) % LATENT_DIM];
            let density = latent[(2 * phrase + 1) % LATENT_DIM];

            // Positive density components mean fewer rests.
            if rng.random_bool(0.35 * sigmoid(-density)) {
                s += 1;
                continue;
            }

            let length_weights = [1.0 + density.max(0.0), 2.0, 1.0 + (-density).max(0.0)];
            let length = LENGTHS[rng.sample_tempered(&length_weights, 1.0).unwrap_or(1)];
            let length = length.min(total_steps - s);

            let target = 7 + (register * 3.0).round() as i32;
            let drift = (target - degree).signum();
            let step_move = rng
                .sample_tempered(&move_weights, 1.0)
                .map(|i| DEGREE_MOVES[i].0)
                .unwrap_or(0);
            degree = (degree + step_move + drift).clamp(0, DEGREE_SPAN);

            let start = f64::from(s) * step;
            notes.push(NoteEvent::melodic(
                degree_to_pitch(degree),
                start,
                start + f64::from(length) * step,
                DECODED_VELOCITY,
                self.instrument,
                self.program,
            ));
            s += length;
        }

        Ok(NoteTimeline::from_notes(notes))
    }
}

impl MelodicDecoder for LatentMelodyDecoder {
    fn sample(&self, count: usize) -> Result<LatentBatch, GeneratorError> {
        if count == 0 {
            return Err(GeneratorError::InvalidRequest(
                "must sample at least one latent vector".into(),
            ));
        }
        let mut rng = lock_rng(&self.rng)?;
        let vectors = (0..count)
            .map(|_| (0..LATENT_DIM).map(|_| rng.next_gaussian()).collect())
            .collect();
        Ok(LatentBatch { vectors })
    }

    fn decode(
        &self,
        batch: &LatentBatch,
        length_in_bars: u32,
    ) -> Result<Vec<NoteTimeline>, GeneratorError> {
        if length_in_bars == 0 {
            return Err(GeneratorError::InvalidRequest(
                "decode length must be at least one bar".into(),
            ));
        }
        if !(self.qpm.is_finite() && self.qpm > 0.0) {
            return Err(GeneratorError::Unavailable(format!(
                "decoder configured with invalid tempo {}",
                self.qpm
            )));
        }
        if self.beats_per_bar == 0 {
            return Err(GeneratorError::Unavailable(
                "decoder configured with zero beats per bar".into(),
            ));
        }
        if let Some(bad) = batch.vectors.iter().find(|v| v.len() != LATENT_DIM) {
            return Err(GeneratorError::InvalidRequest(format!(
                "latent vector has {} dimensions, expected {LATENT_DIM}",
                bad.len()
            )));
        }
        batch
            .vectors
            .iter()
            .map(|v| self.decode_one(v, length_in_bars))
            .collect()
    }
}
