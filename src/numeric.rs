use crate::error::SamplerError;

use rand::distr::weighted::WeightedIndex;
use rand::prelude::*;

/// Probability given to any candidate whose weight is negligible next to the largest.
pub const FLOOR_PROBABILITY: f64 = 1e-20;

/// Turns unnormalized log weights into probabilities via the log-sum-exp trick.
///
/// Weights more than `ln(1e-20) - ln(len)` below the maximum are floored at
/// [`FLOOR_PROBABILITY`] instead of underflowing to zero, so every candidate keeps a
/// positive probability.
pub fn normalize(log_weights: &[f64]) -> Result<Vec<f64>, SamplerError> {
    let n = log_weights.len();
    let max = log_weights
        .iter()
        .copied()
        .filter(|x| !x.is_nan())
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return Err(SamplerError::DegenerateWeights { n });
    }
    let threshold = FLOOR_PROBABILITY.ln() - (n as f64).ln();
    let mut probs: Vec<f64> = log_weights
        .iter()
        .map(|w| {
            let shifted = w - max;
            // NaN compares false, so it lands on the floor.
            if shifted > threshold {
                shifted.exp()
            } else {
                FLOOR_PROBABILITY
            }
        })
        .collect();
    let sum: f64 = probs.iter().sum();
    for p in &mut probs {
        *p /= sum;
    }
    Ok(probs)
}

/// Draws one index from the categorical distribution with the given probabilities.
pub fn draw_categorical<R: Rng>(probs: &[f64], rng: &mut R) -> Result<usize, SamplerError> {
    let dist = WeightedIndex::new(probs)?;
    Ok(dist.sample(rng))
}

/// [`normalize`] followed by [`draw_categorical`]; returns the index and its probability.
pub fn draw_from_log_weights<R: Rng>(
    log_weights: &[f64],
    rng: &mut R,
) -> Result<(usize, f64), SamplerError> {
    let probs = normalize(log_weights)?;
    let index = draw_categorical(&probs, rng)?;
    Ok((index, probs[index]))
}
