use crate::error::ConfigError;
use crate::prelude::*;

/// How labels are resampled in the reallocation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reallocation {
    /// Only the clusters active at the start of the sweep are candidates. Births happen
    /// only through split-merge.
    Active,
    /// Every label in `[0, k_max)` is a candidate; inactive log-rates are redrawn from
    /// the prior first so empty components can be born directly.
    Truncated,
    /// Labels stay fixed, for runs that only update the rates and the at-risk mask.
    Off,
}

/// Which steps make up one sweep of the explicit-rate sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSchedule {
    pub update_at_risk: bool,
    pub update_rates: bool,
    pub reallocation: Reallocation,
    pub split_merge: bool,
}

impl Default for SweepSchedule {
    fn default() -> Self {
        Self {
            update_at_risk: true,
            update_rates: true,
            reallocation: Reallocation::Active,
            split_merge: true,
        }
    }
}

/// Everything that stays fixed over a run.
#[derive(Debug, Clone)]
pub struct Hyperparameters {
    pub k_max: usize,
    /// θ
    pub mass: Mass,
    /// μ, prior mean of every log-rate coordinate
    pub prior_mean: f64,
    /// s²
    pub prior_variance: Variance,
    /// s²_MH, random-walk variance for log-rate updates
    pub proposal_variance: Variance,
    /// (r0g, r1g)
    pub at_risk_shapes: (Shape, Shape),
    /// (r0c, r1c)
    pub split_odds: (Odds, Odds),
    pub launch_iter: u32,
    /// Number of log-rate coordinates redrawn from the prior when a split opens a cluster.
    pub n_split_coordinates: usize,
    pub n_iterations: u32,
    pub thin: u32,
    pub schedule: SweepSchedule,
}

impl Hyperparameters {
    /// Defaults for everything but the truncation.
    pub fn new(k_max: usize) -> Self {
        let one = 1.0;
        Self {
            k_max,
            mass: Mass(one),
            prior_mean: 0.0,
            prior_variance: Variance(one),
            proposal_variance: Variance(0.01),
            at_risk_shapes: (Shape(one), Shape(one)),
            split_odds: (Odds(one), Odds(one)),
            launch_iter: 10,
            n_split_coordinates: 1,
            n_iterations: 1000,
            thin: 1,
            schedule: SweepSchedule::default(),
        }
    }

    pub fn with_mass(mut self, mass: Mass) -> Self {
        self.mass = mass;
        self
    }

    pub fn with_prior(mut self, mean: f64, variance: Variance) -> Self {
        self.prior_mean = mean;
        self.prior_variance = variance;
        self
    }

    pub fn with_proposal_variance(mut self, variance: Variance) -> Self {
        self.proposal_variance = variance;
        self
    }

    pub fn with_at_risk_shapes(mut self, r0g: Shape, r1g: Shape) -> Self {
        self.at_risk_shapes = (r0g, r1g);
        self
    }

    pub fn with_split_odds(mut self, r0c: Odds, r1c: Odds) -> Self {
        self.split_odds = (r0c, r1c);
        self
    }

    pub fn with_launch_iter(mut self, launch_iter: u32) -> Self {
        self.launch_iter = launch_iter;
        self
    }

    pub fn with_split_coordinates(mut self, n: usize) -> Self {
        self.n_split_coordinates = n;
        self
    }

    pub fn with_iterations(mut self, n_iterations: u32, thin: u32) -> Self {
        self.n_iterations = n_iterations;
        self.thin = thin;
        self
    }

    pub fn with_schedule(mut self, schedule: SweepSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Number of thinned samples a run records.
    pub fn n_recorded(&self) -> usize {
        if self.thin == 0 {
            0
        } else {
            (self.n_iterations / self.thin) as usize
        }
    }

    /// Rejects configurations that cannot be run against data of the given shape.
    pub fn validate(&self, n_items: usize, n_categories: usize) -> Result<(), ConfigError> {
        if !self.prior_mean.is_finite() {
            return Err(ConfigError::Constraint {
                name: "prior mean",
                value: self.prior_mean,
                message: "must be finite",
            });
        }
        if self.k_max < 2 {
            return Err(ConfigError::TruncationTooSmall { k_max: self.k_max });
        }
        if n_items < 2 {
            return Err(ConfigError::TooFewItems { n_items });
        }
        if self.n_split_coordinates > n_categories {
            return Err(ConfigError::SplitCoordinates {
                n_split: self.n_split_coordinates,
                n_categories,
            });
        }
        if self.thin == 0 {
            return Err(ConfigError::ZeroThin);
        }
        Ok(())
    }
}
