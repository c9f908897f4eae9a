//! Logit post-processing for the generation loop.
//!
//! The chain runs in a fixed order (repetition penalty, temperature, top-k,
//! top-p, softmax, draw) and that order is part of the output contract:
//! reordering the stages changes the sampling distribution.

use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Draws tokens from a post-processed probability distribution.
///
/// One sampler lives on each engine instance; reseeding with a nonzero seed
/// makes the token stream reproducible.
pub struct Sampler {
    rng: StdRng,
}

impl Sampler {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Inverse-CDF draw: walk the distribution accumulating probability and
    /// return the first index whose cumulative sum reaches the uniform draw.
    /// Falls back to the last index when rounding keeps the sum below the
    /// draw.
    pub fn sample(&mut self, probs: &[f32]) -> i64 {
        let r: f32 = self.rng.gen_range(0.0..1.0);
        let mut cumulative = 0.0f32;
        for (i, &p) in probs.iter().enumerate() {
            cumulative += p;
            if r <= cumulative {
                return i as i64;
            }
        }
        probs.len() as i64 - 1
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Suppress tokens that already appear in the generated sequence: negative
/// logits are multiplied by the penalty, non-negative ones divided. No-op at
/// a penalty of exactly 1.0.
pub fn apply_repetition_penalty(logits: &mut [f32], generated: &[i64], penalty: f32) {
    if penalty == 1.0 {
        return;
    }
    for &token in generated {
        if token >= 0 && (token as usize) < logits.len() {
            let idx = token as usize;
            if logits[idx] < 0.0 {
                logits[idx] *= penalty;
            } else {
                logits[idx] /= penalty;
            }
        }
    }
}

/// Scale every logit by the inverse temperature. No-op at 1.0.
pub fn apply_temperature(logits: &mut [f32], temperature: f32) {
    if temperature == 1.0 {
        return;
    }
    for logit in logits.iter_mut() {
        *logit /= temperature;
    }
}

/// Keep only the k largest logits, setting the rest to -inf. No-op when k is
/// 0 or covers the whole vocabulary. Ties at the k-th value are kept.
pub fn apply_top_k(logits: &mut [f32], k: usize) {
    if k == 0 || k >= logits.len() {
        return;
    }

    // Partial selection: only the k-th largest value is needed, not a sort.
    let mut indices: Vec<usize> = (0..logits.len()).collect();
    indices.select_nth_unstable_by(k - 1, |&a, &b| {
        logits[b].partial_cmp(&logits[a]).unwrap_or(Ordering::Equal)
    });
    let threshold = logits[indices[k - 1]];

    for logit in logits.iter_mut() {
        if *logit < threshold {
            *logit = f32::NEG_INFINITY;
        }
    }
}

/// Nucleus filtering: sort tokens by descending logit, accumulate softmax
/// probability, and -inf everything past the token whose cumulative
/// probability first exceeds `p`. The crossing token itself stays in the
/// nucleus. No-op at p >= 1.0.
pub fn apply_top_p(logits: &mut [f32], p: f32) {
    if p >= 1.0 {
        return;
    }

    let vocab = logits.len();
    let mut indices: Vec<usize> = (0..vocab).collect();
    indices.sort_unstable_by(|&a, &b| {
        logits[b].partial_cmp(&logits[a]).unwrap_or(Ordering::Equal)
    });

    let max_logit = logits[indices[0]];
    let sum: f32 = indices.iter().map(|&i| (logits[i] - max_logit).exp()).sum();
    let inv_sum = 1.0 / sum;

    let mut cumulative = 0.0f32;
    let mut cutoff = vocab;
    for (rank, &i) in indices.iter().enumerate() {
        cumulative += (logits[i] - max_logit).exp() * inv_sum;
        if cumulative > p {
            cutoff = rank + 1;
            break;
        }
    }

    for &i in &indices[cutoff..] {
        logits[i] = f32::NEG_INFINITY;
    }
}

/// Numerically stable in-place softmax. When every logit is non-finite
/// (everything filtered to -inf) the whole mass lands on index 0 instead of
/// propagating NaN.
pub fn softmax(logits: &mut [f32]) {
    if logits.is_empty() {
        return;
    }

    let mut max = logits[0];
    for &logit in logits[1..].iter() {
        if logit > max {
            max = logit;
        }
    }

    if !max.is_finite() {
        log::warn!("softmax: all logits are non-finite, falling back to index 0");
        logits[0] = 1.0;
        for logit in logits[1..].iter_mut() {
            *logit = 0.0;
        }
        return;
    }

    let mut sum = 0.0f32;
    for logit in logits.iter_mut() {
        let v = (*logit - max).exp();
        *logit = v;
        sum += v;
    }

    if sum > 0.0 {
        let inv = 1.0 / sum;
        for logit in logits.iter_mut() {
            *logit *= inv;
        }
    }
}
