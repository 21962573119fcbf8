//! Mixture sampler with the rates integrated out against fixed pseudo-counts.
//!
//! Clusters are summarized by the column sums of their members, kept in step with the
//! labels. There is no at-risk layer: every coordinate is at risk. The pseudo-counts
//! are either shared by all clusters or given per cluster.

use crate::clust::{ActiveLabels, Clustering};
use crate::data::{CountMatrix, LogRates};
use crate::error::{ConfigError, SamplerError};
use crate::hyper::{Hyperparameters, Reallocation};
use crate::marginal::{log_cluster_compound, log_predictive_collapsed};
use crate::numeric::draw_from_log_weights;
use crate::prelude::Mass;
use crate::sm::{self, Allocation, MoveKind, SplitMergeModel, SplitMergeOutcome, SplitMergeSettings, TwoWay};

use log::{debug, info};
use rand::Rng;

/// Column sums of the counts of every cluster, `k_max × D`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSums {
    n_categories: usize,
    data: Vec<u64>,
}

impl ClusterSums {
    pub fn from_labels(data: &CountMatrix, clustering: &Clustering) -> Self {
        let n_categories = data.n_categories();
        let mut sums = Self {
            n_categories,
            data: vec![0; clustering.k_max() * n_categories],
        };
        for item in 0..clustering.n_items() {
            sums.add(clustering[item], data.row(item));
        }
        sums
    }

    pub fn row(&self, label: usize) -> &[u64] {
        let d = self.n_categories;
        &self.data[label * d..(label + 1) * d]
    }

    fn row_mut(&mut self, label: usize) -> &mut [u64] {
        let d = self.n_categories;
        &mut self.data[label * d..(label + 1) * d]
    }

    fn add(&mut self, label: usize, counts: &[u32]) {
        for (s, &c) in self.row_mut(label).iter_mut().zip(counts) {
            *s += u64::from(c);
        }
    }

    fn subtract(&mut self, label: usize, counts: &[u32]) {
        for (s, &c) in self.row_mut(label).iter_mut().zip(counts) {
            *s -= u64::from(c);
        }
    }
}

/// Dirichlet pseudo-counts of the cluster rates: one row shared by every label, or
/// one row per label.
#[derive(Debug, Clone, PartialEq)]
pub struct PseudoCounts {
    n_categories: usize,
    data: Vec<f64>,
}

impl PseudoCounts {
    pub fn shared(pseudo_counts: Vec<f64>) -> Result<Self, ConfigError> {
        Self::check(&pseudo_counts)?;
        Ok(Self {
            n_categories: pseudo_counts.len(),
            data: pseudo_counts,
        })
    }

    /// Per-cluster pseudo-counts `exp(log_pseudo_counts[k])`.
    pub fn per_cluster(log_pseudo_counts: &LogRates) -> Result<Self, ConfigError> {
        let n_categories = log_pseudo_counts.n_categories();
        let data: Vec<f64> = (0..log_pseudo_counts.n_clusters())
            .flat_map(move |k| log_pseudo_counts.row(k).iter().map(|x| x.exp()))
            .collect();
        Self::check(&data)?;
        Ok(Self { n_categories, data })
    }

    fn check(values: &[f64]) -> Result<(), ConfigError> {
        match values.iter().find(|&&a| !(a > 0.0 && a.is_finite())) {
            Some(&value) => Err(ConfigError::Constraint {
                name: "pseudo-count",
                value,
                message: "must be finite and greater than zero",
            }),
            None => Ok(()),
        }
    }

    pub fn n_categories(&self) -> usize {
        self.n_categories
    }

    /// Number of rows: 1 when shared.
    pub fn n_rows(&self) -> usize {
        self.data.len() / self.n_categories.max(1)
    }

    pub fn row(&self, label: usize) -> &[f64] {
        let d = self.n_categories;
        if self.data.len() == d {
            &self.data
        } else {
            &self.data[label * d..(label + 1) * d]
        }
    }
}

#[derive(Debug, Clone)]
pub struct CollapsedState<'a> {
    data: &'a CountMatrix,
    pseudo_counts: PseudoCounts,
    clustering: Clustering,
    sums: ClusterSums,
}

impl<'a> CollapsedState<'a> {
    pub fn new(
        data: &'a CountMatrix,
        pseudo_counts: PseudoCounts,
        clustering: Clustering,
    ) -> Result<Self, ConfigError> {
        if pseudo_counts.n_categories() != data.n_categories() {
            return Err(ConfigError::DimensionMismatch {
                what: "pseudo-counts",
                expected: data.n_categories(),
                found: pseudo_counts.n_categories(),
            });
        }
        if pseudo_counts.n_rows() != 1 && pseudo_counts.n_rows() != clustering.k_max() {
            return Err(ConfigError::DimensionMismatch {
                what: "pseudo-count rows",
                expected: clustering.k_max(),
                found: pseudo_counts.n_rows(),
            });
        }
        if clustering.n_items() != data.n_items() {
            return Err(ConfigError::DimensionMismatch {
                what: "label vector",
                expected: data.n_items(),
                found: clustering.n_items(),
            });
        }
        sm::check_shape(&clustering)?;
        let sums = ClusterSums::from_labels(data, &clustering);
        Ok(Self {
            data,
            pseudo_counts,
            clustering,
            sums,
        })
    }

    pub fn clustering(&self) -> &Clustering {
        &self.clustering
    }

    pub fn sums(&self) -> &ClusterSums {
        &self.sums
    }

    /// Log marginal likelihood of all the data given the labels.
    pub fn log_marginal_likelihood(&self) -> f64 {
        let coefficients: f64 = (0..self.data.n_items()).map(|i| self.data.log_multinomial(i)).sum();
        self.clustering
            .active_labels()
            .into_iter()
            .fold(coefficients, |sum, label| {
                sum + log_cluster_compound(self.sums.row(label), self.pseudo_counts.row(label))
            })
    }

    /// Gibbs update of every label against the leave-one-out sums of the candidates.
    pub fn reallocate<R: Rng>(
        &mut self,
        candidates: &ActiveLabels,
        mass: Mass,
        rng: &mut R,
    ) -> Result<(), SamplerError> {
        let data = self.data;
        let mut log_weights = vec![0.0; candidates.len()];
        for i in 0..data.n_items() {
            let counts = data.row(i);
            self.sums.subtract(self.clustering[i], counts);
            for (&label, w) in candidates.labels().iter().zip(&mut log_weights) {
                *w = (self.clustering.size_of_without(label, i) as f64 + mass).ln()
                    + log_predictive_collapsed(data, i, self.sums.row(label), self.pseudo_counts.row(label));
            }
            let (kk, _) = draw_from_log_weights(&log_weights, rng)?;
            let label = candidates.label(kk);
            self.sums.add(label, counts);
            self.clustering.reassign(i, label);
        }
        Ok(())
    }

    /// Reallocation as selected by the schedule, then one split-merge step if enabled.
    pub fn sweep<R: Rng>(
        &mut self,
        hyper: &Hyperparameters,
        rng: &mut R,
    ) -> Result<SplitMergeOutcome, SamplerError> {
        match hyper.schedule.reallocation {
            Reallocation::Active => {
                let candidates = ActiveLabels::new(&self.clustering);
                self.reallocate(&candidates, hyper.mass, rng)?;
            }
            Reallocation::Truncated => {
                let candidates = ActiveLabels::all(self.clustering.k_max());
                self.reallocate(&candidates, hyper.mass, rng)?;
            }
            Reallocation::Off => {}
        }
        if hyper.schedule.split_merge {
            sm::attempt(self, &SplitMergeSettings::from(hyper), rng)
        } else {
            Ok(SplitMergeOutcome::skipped())
        }
    }
}

impl SplitMergeModel for CollapsedState<'_> {
    fn data(&self) -> &CountMatrix {
        self.data
    }

    fn clustering(&self) -> &Clustering {
        &self.clustering
    }

    fn prepare<R: Rng>(&mut self, _kind: MoveKind, _labels: [usize; 2], _rng: &mut R) -> f64 {
        0.0
    }

    fn log_predictive(&self, item: usize, slot: usize, pair: &TwoWay) -> f64 {
        let alpha = self.pseudo_counts.row(pair.labels[slot]);
        log_predictive_collapsed(self.data, item, &pair.sums[slot], alpha)
    }

    fn log_likelihood(&self, pair: &TwoWay, allocation: &Allocation, _proposed: bool) -> f64 {
        let coefficients: f64 = allocation
            .iter()
            .map(|(item, _)| self.data.log_multinomial(item))
            .sum();
        coefficients
            + pair
                .labels
                .iter()
                .zip(&pair.sums)
                .map(|(&label, s)| log_cluster_compound(s, self.pseudo_counts.row(label)))
                .sum::<f64>()
    }

    fn commit(&mut self, clustering: Clustering, pair: &TwoWay) {
        self.clustering = clustering;
        for (&label, sums) in pair.labels.iter().zip(&pair.sums) {
            self.sums.row_mut(label).copy_from_slice(sums);
        }
    }
}

#[derive(Debug, Clone)]
pub struct CollapsedOutput {
    /// Labels after every `thin`-th sweep.
    pub labels: Vec<Vec<usize>>,
    pub moves: Vec<SplitMergeOutcome>,
    /// Log marginal likelihood after every `thin`-th sweep.
    pub log_likelihood: Vec<f64>,
}

/// Runs `hyper.n_iterations` sweeps of the collapsed sampler. Only the mass, the
/// split odds, the launch length, the schedule and the run length of `hyper` apply.
pub fn run<R: Rng>(
    data: &CountMatrix,
    pseudo_counts: PseudoCounts,
    clustering: Clustering,
    hyper: &Hyperparameters,
    rng: &mut R,
) -> Result<CollapsedOutput, SamplerError> {
    hyper.validate(data.n_items(), data.n_categories())?;
    if clustering.k_max() != hyper.k_max {
        return Err(ConfigError::DimensionMismatch {
            what: "clustering truncation",
            expected: hyper.k_max,
            found: clustering.k_max(),
        }
        .into());
    }
    let mut state = CollapsedState::new(data, pseudo_counts, clustering)?;
    let n_recorded = hyper.n_recorded();
    info!(
        "running {} collapsed sweeps over {} items, thin {}, recording {} samples",
        hyper.n_iterations,
        data.n_items(),
        hyper.thin,
        n_recorded
    );
    let mut output = CollapsedOutput {
        labels: Vec::with_capacity(n_recorded),
        moves: Vec::with_capacity(hyper.n_iterations as usize),
        log_likelihood: Vec::with_capacity(n_recorded),
    };
    for iteration in 1..=hyper.n_iterations {
        output.moves.push(state.sweep(hyper, rng)?);
        if iteration % hyper.thin == 0 {
            let log_likelihood = state.log_marginal_likelihood();
            debug!(
                "sweep {}: {} active clusters, log likelihood {:.3}",
                iteration,
                state.clustering.n_active(),
                log_likelihood
            );
            output.labels.push(state.clustering.labels().to_vec());
            output.log_likelihood.push(log_likelihood);
        }
    }
    let count = |f: fn(&SplitMergeOutcome) -> bool| {
        let attempted = output.moves.iter().filter(|m| f(m)).count();
        let accepted = output.moves.iter().filter(|m| f(m) && m.accepted).count();
        (accepted, attempted)
    };
    let (splits, merges) = (count(SplitMergeOutcome::is_split), count(SplitMergeOutcome::is_merge));
    info!(
        "split-merge accepted {} of {} splits and {} of {} merges",
        splits.0, splits.1, merges.0, merges.1
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hyper::SweepSchedule;
    use crate::prelude::*;
    use crate::sm::{working_set, Launch, Proposal, TargetOrRandom};
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    fn shared(pseudo_counts: &[f64]) -> PseudoCounts {
        PseudoCounts::shared(pseudo_counts.to_vec()).unwrap()
    }

    fn separated() -> CountMatrix {
        CountMatrix::from_rows(&[
            vec![40, 1, 0],
            vec![35, 0, 2],
            vec![0, 30, 1],
            vec![1, 44, 0],
            vec![38, 2, 1],
            vec![0, 41, 3],
        ])
        .unwrap()
    }

    #[test]
    fn test_sums_follow_labels() {
        let data = separated();
        let hyper = Hyperparameters::new(4).with_schedule(SweepSchedule {
            reallocation: Reallocation::Truncated,
            ..SweepSchedule::default()
        });
        let mut state =
            CollapsedState::new(&data, shared(&[0.5, 1.0, 2.0]), Clustering::one_cluster(6, 4).unwrap()).unwrap();
        let mut rng = Pcg64Mcg::seed_from_u64(12);
        for _ in 0..100 {
            state.sweep(&hyper, &mut rng).unwrap();
            assert_eq!(state.clustering().sizes().iter().sum::<usize>(), 6);
            assert_eq!(state.sums(), &ClusterSums::from_labels(&data, state.clustering()));
            assert!(state.log_marginal_likelihood().is_finite());
        }
    }

    #[test]
    fn test_split_merge_separates_groups() {
        let data = separated();
        let hyper = Hyperparameters::new(4).with_iterations(200, 1).with_launch_iter(3);
        let mut rng = Pcg64Mcg::seed_from_u64(3);
        let output = run(
            &data,
            shared(&[1.0; 3]),
            Clustering::one_cluster(6, 4).unwrap(),
            &hyper,
            &mut rng,
        )
        .unwrap();
        assert_eq!(output.labels.len(), 200);
        assert!(output.moves.iter().any(|m| m.is_split() && m.accepted));
        let last = &output.labels[199];
        for &a in &[0, 1, 4] {
            for &b in &[2, 3, 5] {
                assert_ne!(last[a], last[b]);
            }
        }
    }

    #[test]
    fn test_merge_and_split_ratios_cancel() {
        let data = separated();
        let pseudo = PseudoCounts::per_cluster(
            &LogRates::from_rows(&[
                vec![0.5_f64.ln(), 0.0, 2.0_f64.ln()],
                vec![0.0; 3],
                vec![2.0_f64.ln(), 0.0, 0.5_f64.ln()],
            ])
            .unwrap(),
        )
        .unwrap();
        let settings = SplitMergeSettings {
            mass: Mass::new(1.3).unwrap(),
            split_odds: (Odds::new(1.0).unwrap(), Odds::new(4.0).unwrap()),
            launch_iter: 0,
        };
        let split_labels = Clustering::from_slice(&[2, 2, 0, 0, 2, 0], 3).unwrap();
        let merged_labels = Clustering::from_slice(&[0; 6], 3).unwrap();
        let split = CollapsedState::new(&data, pseudo.clone(), split_labels.clone()).unwrap();
        let merged = CollapsedState::new(&data, pseudo, merged_labels.clone()).unwrap();
        let anchors = [1, 5];
        let labels = [2, 0];
        let members = working_set(&split_labels, anchors);
        assert_eq!(members, vec![0, 2, 3, 4]);
        let current: Vec<usize> = members.iter().map(|&i| usize::from(split_labels[i] == 0)).collect();
        let launch = Launch::from_slots(&data, labels, anchors, members, vec![0, 0, 1, 1]);
        let mut rng = Pcg64Mcg::seed_from_u64(4);
        let merge = Proposal::evaluate(
            &split,
            MoveKind::Merge,
            &launch,
            &current,
            0.0,
            &settings,
            TargetOrRandom::Random(&mut rng),
        )
        .unwrap();
        let split_move = Proposal::evaluate(
            &merged,
            MoveKind::Split,
            &launch,
            &[1, 1, 1, 1],
            0.0,
            &settings,
            TargetOrRandom::<Pcg64Mcg>::Target(&current),
        )
        .unwrap();
        assert_eq!(merge.apply(&split_labels, &launch), merged_labels);
        assert_eq!(split_move.apply(&merged_labels, &launch), split_labels);
        let (m, s) = (merge.log_ratio, split_move.log_ratio);
        assert!(((m.total() - m.odds) + (s.total() - s.odds)).abs() < 1e-9);
        assert!((s.odds + 4.0_f64.ln()).abs() < 1e-12);
        assert_eq!(m.parameters, 0.0);
        // Mixing the two groups costs far more than the partition prior can repay.
        assert!(m.likelihood < -50.0);
    }

    #[test]
    fn test_per_cluster_pseudo_counts() {
        let data = separated();
        let rows = [vec![0.0; 3], vec![1.0, -1.0, 0.5]];
        let pseudo = PseudoCounts::per_cluster(&LogRates::from_rows(&rows).unwrap()).unwrap();
        assert_eq!(pseudo.n_rows(), 2);
        assert_eq!(pseudo.row(0), &[1.0; 3]);
        assert!((pseudo.row(1)[1] - (-1.0_f64).exp()).abs() < 1e-15);
        assert_eq!(shared(&[0.5, 2.0]).row(7), &[0.5, 2.0]);

        let clustering = Clustering::from_slice(&[1; 6], 2).unwrap();
        let state = CollapsedState::new(&data, pseudo.clone(), clustering.clone()).unwrap();
        let coefficients: f64 = (0..6).map(|i| data.log_multinomial(i)).sum();
        let expected = coefficients + log_cluster_compound(state.sums().row(1), pseudo.row(1));
        assert!((state.log_marginal_likelihood() - expected).abs() < 1e-9);
        let same_everywhere = CollapsedState::new(&data, shared(&[1.0; 3]), clustering).unwrap();
        assert!((state.log_marginal_likelihood() - same_everywhere.log_marginal_likelihood()).abs() > 1e-6);
    }

    #[test]
    fn test_split_then_merge_restores_labels() {
        let data = separated();
        let settings = SplitMergeSettings {
            mass: Mass::new(1.0).unwrap(),
            split_odds: (Odds::new(1.0).unwrap(), Odds::new(1.0).unwrap()),
            launch_iter: 0,
        };
        let start = Clustering::from_slice(&[1; 6], 3).unwrap();
        let mut state = CollapsedState::new(&data, shared(&[1.0, 0.5, 2.0]), start.clone()).unwrap();
        let anchors = [0, 3];
        let labels = [2, 1];
        let mut rng = Pcg64Mcg::seed_from_u64(41);

        let members = working_set(&start, anchors);
        let launch = Launch::new(&state, labels, anchors, members.clone(), 0, &mut rng).unwrap();
        let split = Proposal::evaluate(
            &state,
            MoveKind::Split,
            &launch,
            &vec![1; members.len()],
            0.0,
            &settings,
            TargetOrRandom::Random(&mut rng),
        )
        .unwrap();
        let clustering = split.apply(&start, &launch);
        state.commit(clustering, &split.pair);
        assert_eq!(state.clustering()[anchors[0]], 2);
        assert_eq!(state.clustering()[anchors[1]], 1);
        assert_eq!(state.sums(), &ClusterSums::from_labels(&data, state.clustering()));

        let split_labels = state.clustering().clone();
        let members = working_set(&split_labels, anchors);
        let current: Vec<usize> = members.iter().map(|&i| usize::from(split_labels[i] == 1)).collect();
        let launch = Launch::new(&state, labels, anchors, members, 0, &mut rng).unwrap();
        let merge = Proposal::evaluate(
            &state,
            MoveKind::Merge,
            &launch,
            &current,
            0.0,
            &settings,
            TargetOrRandom::Random(&mut rng),
        )
        .unwrap();
        state.commit(merge.apply(&split_labels, &launch), &merge.pair);
        assert_eq!(state.clustering(), &start);
        assert_eq!(state.sums(), &ClusterSums::from_labels(&data, &start));
    }

    #[test]
    fn test_rejects_bad_pseudo_counts() {
        let data = separated();
        let clustering = Clustering::one_cluster(6, 2).unwrap();
        assert!(matches!(
            CollapsedState::new(&data, shared(&[1.0, 1.0]), clustering.clone()),
            Err(ConfigError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            PseudoCounts::shared(vec![1.0, 0.0, 1.0]),
            Err(ConfigError::Constraint { value, .. }) if value == 0.0
        ));
        let three_rows = PseudoCounts::per_cluster(&LogRates::constant(3, 3, 0.0)).unwrap();
        assert!(matches!(
            CollapsedState::new(&data, three_rows, clustering),
            Err(ConfigError::DimensionMismatch { what: "pseudo-count rows", expected: 2, found: 3 })
        ));
    }

    #[test]
    fn test_state_rejects_unusable_shapes() {
        let single = CountMatrix::from_rows(&[vec![3, 1, 0]]).unwrap();
        assert!(matches!(
            CollapsedState::new(&single, shared(&[1.0; 3]), Clustering::one_cluster(1, 3).unwrap()),
            Err(ConfigError::TooFewItems { n_items: 1 })
        ));
        assert!(matches!(
            CollapsedState::new(&separated(), shared(&[1.0; 3]), Clustering::one_cluster(6, 1).unwrap()),
            Err(ConfigError::TruncationTooSmall { k_max: 1 })
        ));
    }
}
