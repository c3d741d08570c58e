// Deterministic, portable pseudo-random number generator for the procedural
// collaborators.
//
// xoshiro256++ (Blackman & Vigna, 2019) seeded through SplitMix64, plus the
// handful of sampling helpers the stand-in drum generator and latent melody
// decoder need: uniform integers and floats, Bernoulli draws, standard normal
// draws (for latent vectors), and temperature-scaled weighted choice (for
// drum hits and melodic steps).
//
// The core generator is integer-only so the raw stream is identical across
// platforms. The float helpers are built on top of it and are reproducible
// for a given seed on IEEE 754 targets.

use serde::{Deserialize, Serialize};

/// Xoshiro256++ state. Each collaborator owns one, seeded explicitly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeededRng {
    s: [u64; 4],
}

impl SeededRng {
    /// Expand a `u64` seed into the 256-bit state via SplitMix64.
    pub fn new(seed: u64) -> Self {
        let mut sm = seed;
        Self {
            s: [
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
            ],
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let result = (self.s[0].wrapping_add(self.s[3]))
            .rotate_left(23)
            .wrapping_add(self.s[0]);

        let t = self.s[1] << 17;

        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];

        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);

        result
    }

    /// Uniform `f64` in [0, 1) from the upper 53 bits.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform integer in `[low, high)`, rejection-sampled to avoid modulo bias.
    ///
    /// Panics if `low >= high`.
    pub fn range_u64(&mut self, low: u64, high: u64) -> u64 {
        assert!(low < high, "range_u64: low must be less than high");
        let range = high - low;
        if range.is_power_of_two() {
            return low + (self.next_u64() & (range - 1));
        }
        let threshold = range.wrapping_neg() % range;
        loop {
            let r = self.next_u64();
            if r >= threshold {
                return low + (r % range);
            }
        }
    }

    pub fn range_usize(&mut self, low: usize, high: usize) -> usize {
        self.range_u64(low as u64, high as u64) as usize
    }

    /// `true` with probability `p`. `p <= 0` never fires, `p >= 1` always does.
    pub fn random_bool(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    /// Standard normal draw (Box-Muller, one value per call).
    pub fn next_gaussian(&mut self) -> f64 {
        // 1 - u keeps the log argument in (0, 1].
        let u1 = 1.0 - self.next_f64();
        let u2 = self.next_f64();
        (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
    }

    /// Pick an index from non-negative `weights` after raising each weight to
    /// the power `1 / temperature`.
    ///
    /// Temperature 1.0 samples the weights as given; lower temperatures sharpen
    /// the distribution toward the heaviest weight and higher ones flatten it.
    /// Zero weights are never chosen. Returns `None` when every weight is zero
    /// or `temperature` is not a positive finite number.
    pub fn sample_tempered(&mut self, weights: &[f64], temperature: f64) -> Option<usize> {
        if !(temperature.is_finite() && temperature > 0.0) {
            return None;
        }
        let max = weights.iter().copied().fold(0.0_f64, f64::max);
        if max <= 0.0 {
            return None;
        }
        // Normalise by the max first so large exponents cannot overflow.
        let scaled: Vec<f64> = weights
            .iter()
            .map(|&w| if w > 0.0 { (w / max).powf(1.0 / temperature) } else { 0.0 })
            .collect();
        let total: f64 = scaled.iter().sum();
        if total <= 0.0 {
            return None;
        }
        let mut target = self.next_f64() * total;
        let mut last_nonzero = None;
        for (i, &w) in scaled.iter().enumerate() {
            if w <= 0.0 {
                continue;
            }
            if target < w {
                return Some(i);
            }
            target -= w;
            last_nonzero = Some(i);
        }
        // Float residue at the very end of the cumulative sum.
        last_nonzero
    }
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = SeededRng::new(42);
        let mut b = SeededRng::new(42);
        for _ in 0..1000 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let mut a = SeededRng::new(42);
        let mut b = SeededRng::new(43);
        assert_ne!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn f64_in_unit_range() {
        let mut rng = SeededRng::new(12345);
        for _ in 0..10_000 {
            let v = rng.next_f64();
            assert!((0.0..1.0).contains(&v), "f64 out of range: {v}");
        }
    }

    #[test]
    fn range_usize_within_bounds() {
        let mut rng = SeededRng::new(555);
        for _ in 0..10_000 {
            let v = rng.range_usize(5, 15);
            assert!((5..15).contains(&v), "range_usize out of range: {v}");
        }
    }

    #[test]
    fn random_bool_extremes() {
        let mut rng = SeededRng::new(42);
        for _ in 0..100 {
            assert!(!rng.random_bool(0.0));
            assert!(rng.random_bool(1.0));
        }
    }

    #[test]
    fn gaussian_moments_are_plausible() {
        let mut rng = SeededRng::new(7);
        let n = 20_000;
        let samples: Vec<f64> = (0..n).map(|_| rng.next_gaussian()).collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.05, "mean too far from 0: {mean}");
        assert!((var - 1.0).abs() < 0.1, "variance too far from 1: {var}");
        assert!(samples.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn tempered_sampling_skips_zero_weights() {
        let mut rng = SeededRng::new(99);
        let weights = [0.0, 3.0, 0.0, 1.0];
        for _ in 0..5_000 {
            let i = rng.sample_tempered(&weights, 1.5).unwrap();
            assert!(i == 1 || i == 3, "picked a zero weight: {i}");
        }
    }

    #[test]
    fn tempered_sampling_rejects_degenerate_input() {
        let mut rng = SeededRng::new(1);
        assert_eq!(rng.sample_tempered(&[0.0, 0.0], 1.0), None);
        assert_eq!(rng.sample_tempered(&[], 1.0), None);
        assert_eq!(rng.sample_tempered(&[1.0], 0.0), None);
        assert_eq!(rng.sample_tempered(&[1.0], f64::NAN), None);
    }

    #[test]
    fn low_temperature_sharpens_toward_heaviest_weight() {
        let weights = [1.0, 2.0];
        let count_heavy = |temperature: f64| {
            let mut rng = SeededRng::new(2024);
            (0..10_000)
                .filter(|_| rng.sample_tempered(&weights, temperature) == Some(1))
                .count()
        };
        let cold = count_heavy(0.25);
        let warm = count_heavy(1.0);
        let hot = count_heavy(4.0);
        assert!(cold > warm, "cold {cold} should exceed warm {warm}");
        assert!(warm > hot, "warm {warm} should exceed hot {hot}");
    }

    #[test]
    fn serialization_roundtrip_continues_stream() {
        let mut rng = SeededRng::new(42);
        for _ in 0..100 {
            rng.next_u64();
        }
        let json = serde_json::to_string(&rng).unwrap();
        let mut restored: SeededRng = serde_json::from_str(&json).unwrap();
        for _ in 0..100 {
            assert_eq!(rng.next_u64(), restored.next_u64());
        }
    }
}
