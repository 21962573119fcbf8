//! Sampler for the zero-inflated Dirichlet-multinomial mixture with explicit log-rates.
//!
//! One sweep runs, in order, the at-risk update, the random-walk update of the
//! log-rates, the reallocation of labels, and one split-merge step. Each step is
//! switched on or off by the [`SweepSchedule`](crate::hyper::SweepSchedule).

use crate::atrisk::update_at_risk;
use crate::clust::Clustering;
use crate::data::{AtRisk, CountMatrix, LogRates};
use crate::error::{ConfigError, SamplerError};
use crate::hyper::{Hyperparameters, Reallocation};
use crate::marginal::{exp_rates, log_compound_with_rates, log_marginal_item};
use crate::mcmc;
use crate::rates::{LogRateKernel, RateMove};
use crate::sm::{self, Allocation, MoveKind, SplitMergeModel, SplitMergeOutcome, SplitMergeSettings, TwoWay};

use log::{debug, info};
use rand::Rng;

/// Everything a sweep reads and writes.
#[derive(Debug, Clone)]
pub struct ZidmState<'a> {
    data: &'a CountMatrix,
    at_risk: AtRisk,
    clustering: Clustering,
    log_rates: LogRates,
}

/// Diagnostics of one sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepReport {
    pub n_at_risk_flips: usize,
    pub rate_moves: Vec<RateMove>,
    pub split_merge: SplitMergeOutcome,
}

impl SweepReport {
    pub fn n_rates_accepted(&self) -> usize {
        self.rate_moves
            .iter()
            .filter(|&&m| m == RateMove::Accepted)
            .count()
    }
}

impl<'a> ZidmState<'a> {
    pub fn new(
        data: &'a CountMatrix,
        at_risk: AtRisk,
        clustering: Clustering,
        log_rates: LogRates,
    ) -> Result<Self, ConfigError> {
        at_risk.validate(data)?;
        if clustering.n_items() != data.n_items() {
            return Err(ConfigError::DimensionMismatch {
                what: "label vector",
                expected: data.n_items(),
                found: clustering.n_items(),
            });
        }
        if log_rates.n_clusters() != clustering.k_max() {
            return Err(ConfigError::DimensionMismatch {
                what: "log-rate rows",
                expected: clustering.k_max(),
                found: log_rates.n_clusters(),
            });
        }
        if log_rates.n_categories() != data.n_categories() {
            return Err(ConfigError::DimensionMismatch {
                what: "log-rate columns",
                expected: data.n_categories(),
                found: log_rates.n_categories(),
            });
        }
        sm::check_shape(&clustering)?;
        Ok(Self {
            data,
            at_risk,
            clustering,
            log_rates,
        })
    }

    pub fn data(&self) -> &CountMatrix {
        self.data
    }

    pub fn at_risk(&self) -> &AtRisk {
        &self.at_risk
    }

    pub fn clustering(&self) -> &Clustering {
        &self.clustering
    }

    pub fn log_rates(&self) -> &LogRates {
        &self.log_rates
    }

    pub fn sweep<R: Rng>(
        &mut self,
        hyper: &Hyperparameters,
        kernel: &LogRateKernel,
        rng: &mut R,
    ) -> Result<SweepReport, SamplerError> {
        let schedule = hyper.schedule;
        let n_at_risk_flips = if schedule.update_at_risk {
            update_at_risk(
                self.data,
                &mut self.at_risk,
                &self.clustering,
                &self.log_rates,
                hyper.at_risk_shapes,
                rng,
            )
        } else {
            0
        };

        let mut rate_moves = if schedule.update_rates {
            kernel.update(self.data, &self.at_risk, &self.clustering, &mut self.log_rates, rng)
        } else {
            vec![RateMove::Inactive; self.clustering.k_max()]
        };

        match schedule.reallocation {
            Reallocation::Active => {
                self.clustering = mcmc::update_active(
                    self.data,
                    &self.at_risk,
                    &self.log_rates,
                    self.clustering.clone(),
                    hyper.mass,
                    rng,
                )?;
            }
            Reallocation::Truncated => {
                kernel.refresh_inactive(&self.clustering, &mut self.log_rates, &mut rate_moves, rng);
                self.clustering = mcmc::update_truncated(
                    self.data,
                    &self.at_risk,
                    &self.log_rates,
                    self.clustering.clone(),
                    hyper.mass,
                    rng,
                )?;
            }
            Reallocation::Off => {}
        }

        let split_merge = if schedule.split_merge {
            let mut model = ExplicitMove::new(self, kernel, hyper.n_split_coordinates);
            sm::attempt(&mut model, &SplitMergeSettings::from(hyper), rng)?
        } else {
            SplitMergeOutcome::skipped()
        };

        Ok(SweepReport {
            n_at_risk_flips,
            rate_moves,
            split_merge,
        })
    }
}

/// Split-merge view of the state. A move is evaluated under a launch copy of the
/// log-rates, in which a split seeds the row of the new label.
struct ExplicitMove<'s, 'a> {
    state: &'s mut ZidmState<'a>,
    kernel: &'s LogRateKernel,
    n_split_coordinates: usize,
    launch: LogRates,
    launch_rates: [Vec<f64>; 2],
}

impl<'s, 'a> ExplicitMove<'s, 'a> {
    fn new(state: &'s mut ZidmState<'a>, kernel: &'s LogRateKernel, n_split_coordinates: usize) -> Self {
        let launch = state.log_rates.clone();
        Self {
            state,
            kernel,
            n_split_coordinates,
            launch,
            launch_rates: [Vec::new(), Vec::new()],
        }
    }

    fn set_launch_rates(&mut self, labels: [usize; 2]) {
        self.launch_rates = labels.map(|label| exp_rates(self.launch.row(label)));
    }
}

impl SplitMergeModel for ExplicitMove<'_, '_> {
    fn data(&self) -> &CountMatrix {
        self.state.data
    }

    fn clustering(&self) -> &Clustering {
        &self.state.clustering
    }

    fn prepare<R: Rng>(&mut self, kind: MoveKind, labels: [usize; 2], rng: &mut R) -> f64 {
        self.launch.clone_from(&self.state.log_rates);
        let log_prior = match kind {
            MoveKind::Split => self.kernel.split_row(
                &mut self.launch,
                labels[1],
                labels[0],
                self.n_split_coordinates,
                rng,
            ),
            MoveKind::Merge => self.kernel.log_prior(self.launch.row(labels[0])),
        };
        self.set_launch_rates(labels);
        log_prior
    }

    fn log_predictive(&self, item: usize, slot: usize, _pair: &TwoWay) -> f64 {
        let data = self.state.data;
        data.log_multinomial(item)
            + log_compound_with_rates(data.row(item), self.state.at_risk.row(item), &self.launch_rates[slot])
    }

    fn log_likelihood(&self, pair: &TwoWay, allocation: &Allocation, proposed: bool) -> f64 {
        let log_rates = if proposed {
            &self.launch
        } else {
            &self.state.log_rates
        };
        allocation
            .iter()
            .map(|(item, slot)| {
                log_marginal_item(
                    self.state.data,
                    &self.state.at_risk,
                    item,
                    log_rates.row(pair.labels[slot]),
                )
            })
            .sum()
    }

    fn commit(&mut self, clustering: Clustering, pair: &TwoWay) {
        self.state.clustering = clustering;
        for label in pair.labels {
            self.state
                .log_rates
                .row_mut(label)
                .copy_from_slice(self.launch.row(label));
        }
    }
}

/// Thinned trajectory and per-sweep diagnostics of a run.
#[derive(Debug, Clone)]
pub struct ZidmOutput {
    /// Labels after every `thin`-th sweep.
    pub labels: Vec<Vec<usize>>,
    /// Log-rates after every `thin`-th sweep.
    pub rates: Vec<LogRates>,
    pub moves: Vec<SplitMergeOutcome>,
    pub at_risk_flips: Vec<usize>,
    pub rates_accepted: Vec<usize>,
    /// At-risk mask after the last sweep.
    pub at_risk: AtRisk,
}

impl ZidmOutput {
    pub fn n_splits_accepted(&self) -> usize {
        self.moves.iter().filter(|m| m.is_split() && m.accepted).count()
    }

    pub fn n_merges_accepted(&self) -> usize {
        self.moves.iter().filter(|m| m.is_merge() && m.accepted).count()
    }
}

/// Runs `hyper.n_iterations` sweeps from the given initial state.
pub fn run<R: Rng>(
    data: &CountMatrix,
    at_risk: AtRisk,
    clustering: Clustering,
    log_rates: LogRates,
    hyper: &Hyperparameters,
    rng: &mut R,
) -> Result<ZidmOutput, SamplerError> {
    hyper.validate(data.n_items(), data.n_categories())?;
    if clustering.k_max() != hyper.k_max {
        return Err(ConfigError::DimensionMismatch {
            what: "clustering truncation",
            expected: hyper.k_max,
            found: clustering.k_max(),
        }
        .into());
    }
    let kernel = LogRateKernel::from_hyperparameters(hyper)?;
    let mut state = ZidmState::new(data, at_risk, clustering, log_rates)?;

    let n_recorded = hyper.n_recorded();
    info!(
        "running {} sweeps over {} items, thin {}, recording {} samples",
        hyper.n_iterations,
        data.n_items(),
        hyper.thin,
        n_recorded
    );
    let n_sweeps = hyper.n_iterations as usize;
    let mut labels = Vec::with_capacity(n_recorded);
    let mut rates = Vec::with_capacity(n_recorded);
    let mut moves = Vec::with_capacity(n_sweeps);
    let mut at_risk_flips = Vec::with_capacity(n_sweeps);
    let mut rates_accepted = Vec::with_capacity(n_sweeps);
    for iteration in 1..=hyper.n_iterations {
        let report = state.sweep(hyper, &kernel, rng)?;
        rates_accepted.push(report.n_rates_accepted());
        at_risk_flips.push(report.n_at_risk_flips);
        moves.push(report.split_merge);
        if iteration % hyper.thin == 0 {
            debug!(
                "sweep {}: {} active clusters, sizes {:?}",
                iteration,
                state.clustering.n_active(),
                state.clustering.sizes()
            );
            labels.push(state.clustering.labels().to_vec());
            rates.push(state.log_rates.clone());
        }
    }

    let output = ZidmOutput {
        labels,
        rates,
        moves,
        at_risk_flips,
        rates_accepted,
        at_risk: state.at_risk,
    };
    info!(
        "split-merge accepted {} of {} splits and {} of {} merges",
        output.n_splits_accepted(),
        output.moves.iter().filter(|m| m.is_split()).count(),
        output.n_merges_accepted(),
        output.moves.iter().filter(|m| m.is_merge()).count()
    );
    Ok(output)
}
