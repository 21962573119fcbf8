use crate::clust::Clustering;
use crate::data::{AtRisk, CountMatrix, LogRates};
use crate::error::ConfigError;
use crate::hyper::Hyperparameters;
use crate::marginal::log_marginal_sum;
use crate::prelude::Variance;

use rand::prelude::*;
use rand::seq::index;
use statrs::distribution::Continuous;

/// Outcome of the log-rate update for one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateMove {
    Accepted,
    Rejected,
    /// Not touched because the component was empty.
    Inactive,
    /// Empty component redrawn from the prior.
    Refreshed,
}

fn normal_error(name: &'static str, value: f64) -> ConfigError {
    ConfigError::Constraint {
        name,
        value,
        message: "does not define a normal distribution",
    }
}

/// Independent `N(μ, s²)` prior on every log-rate coordinate, plus the Gaussian
/// random-walk proposal used to update active components.
#[derive(Debug, Clone)]
pub struct LogRateKernel {
    density: statrs::distribution::Normal,
    prior: rand_distr::Normal<f64>,
    step: rand_distr::Normal<f64>,
}

impl LogRateKernel {
    pub fn new(mean: f64, variance: Variance, proposal_variance: Variance) -> Result<Self, ConfigError> {
        let sd = variance.sqrt();
        let step_sd = proposal_variance.sqrt();
        Ok(Self {
            density: statrs::distribution::Normal::new(mean, sd)
                .map_err(|_| normal_error("log-rate prior", sd))?,
            prior: rand_distr::Normal::new(mean, sd).map_err(|_| normal_error("log-rate prior", sd))?,
            step: rand_distr::Normal::new(0.0, step_sd)
                .map_err(|_| normal_error("random-walk step", step_sd))?,
        })
    }

    pub fn from_hyperparameters(hyper: &Hyperparameters) -> Result<Self, ConfigError> {
        Self::new(hyper.prior_mean, hyper.prior_variance, hyper.proposal_variance)
    }

    pub fn log_prior(&self, log_rates: &[f64]) -> f64 {
        log_rates.iter().map(|&b| self.density.ln_pdf(b)).sum()
    }

    pub fn sample_prior<R: Rng>(&self, rng: &mut R) -> f64 {
        self.prior.sample(rng)
    }

    /// Random-walk Metropolis update of the log-rates of every active component.
    ///
    /// Rows of empty components are left as they are.
    pub fn update<R: Rng>(
        &self,
        data: &CountMatrix,
        at_risk: &AtRisk,
        clustering: &Clustering,
        log_rates: &mut LogRates,
        rng: &mut R,
    ) -> Vec<RateMove> {
        let mut moves = vec![RateMove::Inactive; clustering.k_max()];
        for k in clustering.active_labels() {
            let members = clustering.items_of(k);
            let current = log_rates.row(k);
            let proposed: Vec<f64> = current.iter().map(|b| b + self.step.sample(rng)).collect();
            let log_ratio = self.log_prior(&proposed)
                + log_marginal_sum(data, at_risk, &proposed, &members)
                - self.log_prior(current)
                - log_marginal_sum(data, at_risk, current, &members);
            moves[k] = if rng.random::<f64>().ln() < log_ratio {
                log_rates.row_mut(k).copy_from_slice(&proposed);
                RateMove::Accepted
            } else {
                RateMove::Rejected
            };
        }
        moves
    }

    /// Redraws the row of every empty component from the prior.
    pub fn refresh_inactive<R: Rng>(
        &self,
        clustering: &Clustering,
        log_rates: &mut LogRates,
        moves: &mut [RateMove],
        rng: &mut R,
    ) {
        for k in clustering.inactive_labels() {
            for b in log_rates.row_mut(k) {
                *b = self.sample_prior(rng);
            }
            moves[k] = RateMove::Refreshed;
        }
    }

    /// Seeds row `to` for a component opened by a split: a copy of row `from` with
    /// `n_coordinates` randomly chosen coordinates redrawn from the prior.
    ///
    /// Returns the prior log density of the new row.
    pub fn split_row<R: Rng>(
        &self,
        log_rates: &mut LogRates,
        from: usize,
        to: usize,
        n_coordinates: usize,
        rng: &mut R,
    ) -> f64 {
        let source = log_rates.row(from).to_vec();
        let n_categories = source.len();
        let row = log_rates.row_mut(to);
        row.copy_from_slice(&source);
        for j in index::sample(rng, n_categories, n_coordinates.min(n_categories)) {
            row[j] = self.prior.sample(rng);
        }
        self.log_prior(log_rates.row(to))
    }
}
