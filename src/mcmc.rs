use crate::clust::{ActiveLabels, Clustering};
use crate::data::{AtRisk, CountMatrix, LogRates};
use crate::error::SamplerError;
use crate::marginal::LogMarginalMatrix;
use crate::numeric::draw_from_log_weights;
use crate::prelude::Mass;

use rand::prelude::*;

/// Gibbs update of every label given the log-rates, with `candidates` as the only
/// allowed destinations.
///
/// The weight of candidate `k` for item `i` is `log(n_{k,-i} + θ)` plus the log
/// marginal of `i` under row `k`. The log-rates do not change during the sweep, so the
/// marginals are computed once up front.
pub fn update_labels<R: Rng>(
    data: &CountMatrix,
    at_risk: &AtRisk,
    log_rates: &LogRates,
    mut clustering: Clustering,
    candidates: &ActiveLabels,
    mass: Mass,
    rng: &mut R,
) -> Result<Clustering, SamplerError> {
    let log_marginals = LogMarginalMatrix::new(data, at_risk, log_rates, candidates);
    let mut log_weights = vec![0.0; candidates.len()];
    for i in 0..clustering.n_items() {
        for (kk, (&label, w)) in candidates.labels().iter().zip(&mut log_weights).enumerate() {
            *w = (clustering.size_of_without(label, i) as f64 + mass).ln() + log_marginals.get(i, kk);
        }
        let (kk, _) = draw_from_log_weights(&log_weights, rng)?;
        clustering.reassign(i, candidates.label(kk));
    }
    Ok(clustering)
}

/// Reallocation restricted to the clusters active at the start of the sweep.
pub fn update_active<R: Rng>(
    data: &CountMatrix,
    at_risk: &AtRisk,
    log_rates: &LogRates,
    clustering: Clustering,
    mass: Mass,
    rng: &mut R,
) -> Result<Clustering, SamplerError> {
    let candidates = ActiveLabels::new(&clustering);
    update_labels(data, at_risk, log_rates, clustering, &candidates, mass, rng)
}

/// Reallocation over every label of the truncation, empty ones included.
pub fn update_truncated<R: Rng>(
    data: &CountMatrix,
    at_risk: &AtRisk,
    log_rates: &LogRates,
    clustering: Clustering,
    mass: Mass,
    rng: &mut R,
) -> Result<Clustering, SamplerError> {
    let candidates = ActiveLabels::all(clustering.k_max());
    update_labels(data, at_risk, log_rates, clustering, &candidates, mass, rng)
}
