//! Jain–Neal split-merge moves shared by the explicit-rate and collapsed samplers.
//!
//! Every move works on a pair of labels. Slot 0 holds the cluster of the first anchor
//! and slot 1 the cluster of the second. A split opens a free label in slot 0 and a
//! merge sends everything to the label in slot 1. Models plug in through
//! [`SplitMergeModel`], which supplies the predictive and likelihood terms and commits
//! an accepted move.

use crate::clust::Clustering;
use crate::data::CountMatrix;
use crate::error::{ConfigError, SamplerError};
use crate::hyper::Hyperparameters;
use crate::numeric::{draw_categorical, normalize};
use crate::prelude::{Mass, Odds};

use log::trace;
use rand::prelude::*;
use rand::seq::index;
use statrs::function::gamma::ln_gamma;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKind {
    Split,
    Merge,
}

/// What one split-merge step did. `kind` is `None` when no move was attempted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitMergeOutcome {
    pub kind: Option<MoveKind>,
    pub accepted: bool,
    pub log_ratio: f64,
}

impl SplitMergeOutcome {
    pub fn skipped() -> Self {
        Self {
            kind: None,
            accepted: false,
            log_ratio: 0.0,
        }
    }

    pub fn is_split(&self) -> bool {
        self.kind == Some(MoveKind::Split)
    }

    pub fn is_merge(&self) -> bool {
        self.kind == Some(MoveKind::Merge)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SplitMergeSettings {
    pub mass: Mass,
    pub split_odds: (Odds, Odds),
    pub launch_iter: u32,
}

impl From<&Hyperparameters> for SplitMergeSettings {
    fn from(hyper: &Hyperparameters) -> Self {
        Self {
            mass: hyper.mass,
            split_odds: hyper.split_odds,
            launch_iter: hyper.launch_iter,
        }
    }
}

/// Occupancy and aggregated counts of the two slots of a move.
///
/// Restricted sweeps take it by value and hand it back, so the two counts always
/// describe the assignment they were returned with.
#[derive(Debug, Clone, PartialEq)]
pub struct TwoWay {
    pub labels: [usize; 2],
    pub counts: [usize; 2],
    pub sums: [Vec<u64>; 2],
}

impl TwoWay {
    pub fn empty(labels: [usize; 2], n_categories: usize) -> Self {
        Self {
            labels,
            counts: [0, 0],
            sums: [vec![0; n_categories], vec![0; n_categories]],
        }
    }

    /// Counts and sums of `allocation`.
    pub fn tally(data: &CountMatrix, labels: [usize; 2], allocation: &Allocation) -> Self {
        let mut pair = Self::empty(labels, data.n_categories());
        for (item, slot) in allocation.iter() {
            pair.insert(data, item, slot);
        }
        pair
    }

    pub fn insert(&mut self, data: &CountMatrix, item: usize, slot: usize) {
        self.counts[slot] += 1;
        for (s, &c) in self.sums[slot].iter_mut().zip(data.row(item)) {
            *s += u64::from(c);
        }
    }

    pub fn remove(&mut self, data: &CountMatrix, item: usize, slot: usize) {
        self.counts[slot] -= 1;
        for (s, &c) in self.sums[slot].iter_mut().zip(data.row(item)) {
            *s -= u64::from(c);
        }
    }
}

/// Slot assignment of the anchors and of the working set.
#[derive(Debug, Clone, Copy)]
pub struct Allocation<'a> {
    pub anchors: [usize; 2],
    pub anchor_slots: [usize; 2],
    pub members: &'a [usize],
    pub slots: &'a [usize],
}

impl<'a> Allocation<'a> {
    /// `(item, slot)` for both anchors and then every member.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + 'a {
        let anchors = self.anchors.into_iter().zip(self.anchor_slots);
        anchors.chain(self.members.iter().copied().zip(self.slots.iter().copied()))
    }
}

/// The model-specific half of a split-merge move.
pub trait SplitMergeModel {
    fn data(&self) -> &CountMatrix;

    fn clustering(&self) -> &Clustering;

    /// Sets up the parameters the move is evaluated under.
    ///
    /// Returns the prior log density of the parameters of the cluster that a split
    /// creates, or that a merge removes (the cluster in slot 0).
    fn prepare<R: Rng>(&mut self, kind: MoveKind, labels: [usize; 2], rng: &mut R) -> f64;

    /// Log predictive of `item` joining `slot` given the rest of `pair`, from which
    /// `item` has already been removed.
    fn log_predictive(&self, item: usize, slot: usize, pair: &TwoWay) -> f64;

    /// Log likelihood of the items in `allocation`, under the parameters set up by
    /// [`SplitMergeModel::prepare`] if `proposed` and under the current ones otherwise.
    fn log_likelihood(&self, pair: &TwoWay, allocation: &Allocation, proposed: bool) -> f64;

    /// Replaces the state with an accepted proposal.
    fn commit(&mut self, clustering: Clustering, pair: &TwoWay);
}

pub enum TargetOrRandom<'a, R: Rng> {
    Target(&'a [usize]),
    Random(&'a mut R),
}

/// One restricted Gibbs pass over `members`, moving each between the two slots.
///
/// The weight of a slot is `log n_{slot,-s}` plus the model's predictive. With a
/// target the pass follows the given slots instead of sampling, so the same call
/// evaluates the probability of a known transition. Returns the updated pair and the
/// log probability of the transition.
pub fn restricted_sweep<M: SplitMergeModel, R: Rng>(
    model: &M,
    members: &[usize],
    slots: &mut [usize],
    mut pair: TwoWay,
    mut target_or_rng: TargetOrRandom<R>,
) -> Result<(TwoWay, f64), SamplerError> {
    let data = model.data();
    let mut log_probability = 0.0;
    for (t, &item) in members.iter().enumerate() {
        pair.remove(data, item, slots[t]);
        let log_weights: Vec<f64> = (0..2)
            .map(|slot| (pair.counts[slot] as f64).ln() + model.log_predictive(item, slot, &pair))
            .collect();
        let probs = normalize(&log_weights)?;
        let slot = match &mut target_or_rng {
            TargetOrRandom::Random(rng) => draw_categorical(&probs, &mut **rng)?,
            TargetOrRandom::Target(t_slots) => t_slots[t],
        };
        log_probability += probs[slot].ln();
        slots[t] = slot;
        pair.insert(data, item, slot);
    }
    Ok((pair, log_probability))
}

/// Rejects clusterings on which no move can be drawn: anchors need two items, and a
/// truncation of one label leaves nowhere to split to.
pub fn check_shape(clustering: &Clustering) -> Result<(), ConfigError> {
    if clustering.k_max() < 2 {
        return Err(ConfigError::TruncationTooSmall {
            k_max: clustering.k_max(),
        });
    }
    if clustering.n_items() < 2 {
        return Err(ConfigError::TooFewItems {
            n_items: clustering.n_items(),
        });
    }
    Ok(())
}

/// Two distinct items drawn uniformly. While every label is in use, pairs from the
/// same cluster are redrawn, since a split would have nowhere to go.
pub fn draw_anchors<R: Rng>(clustering: &Clustering, rng: &mut R) -> [usize; 2] {
    let saturated = clustering.n_active() == clustering.k_max();
    loop {
        let pair = index::sample(rng, clustering.n_items(), 2);
        let anchors = [pair.index(0), pair.index(1)];
        if !saturated || clustering[anchors[0]] != clustering[anchors[1]] {
            return anchors;
        }
    }
}

/// Members of either anchor's cluster other than the anchors, in ascending order.
pub fn working_set(clustering: &Clustering, anchors: [usize; 2]) -> Vec<usize> {
    let (l0, l1) = (clustering[anchors[0]], clustering[anchors[1]]);
    (0..clustering.n_items())
        .filter(|&i| i != anchors[0] && i != anchors[1])
        .filter(|&i| clustering[i] == l0 || clustering[i] == l1)
        .collect()
}

/// Log prior of an occupancy vector under the symmetric Dirichlet on the weights,
/// with `E` the number of empty components:
/// `lnΓ(θE) − E lnΓ(θ) + Σ_occ lnΓ(θ + n_k) − lnΓ(Σ_occ (θ + n_k))`.
pub fn log_partition_prior(sizes: &[usize], mass: Mass) -> f64 {
    let n_empty = sizes.iter().filter(|&&n| n == 0).count();
    let mut result = if n_empty > 0 {
        ln_gamma(mass * n_empty as f64) - n_empty as f64 * ln_gamma(mass.get())
    } else {
        0.0
    };
    let mut total = 0.0;
    for &n in sizes.iter().filter(|&&n| n > 0) {
        let w = mass + n as f64;
        result += ln_gamma(w);
        total += w;
    }
    result - ln_gamma(total)
}

/// The launch state: anchors, working set and its slots after the restricted sweeps.
#[derive(Debug, Clone)]
pub struct Launch {
    pub anchors: [usize; 2],
    pub members: Vec<usize>,
    pub slots: Vec<usize>,
    pub pair: TwoWay,
}

impl Launch {
    pub fn from_slots(
        data: &CountMatrix,
        labels: [usize; 2],
        anchors: [usize; 2],
        members: Vec<usize>,
        slots: Vec<usize>,
    ) -> Self {
        let pair = TwoWay::tally(data, labels, &Allocation {
            anchors,
            anchor_slots: [0, 1],
            members: &members,
            slots: &slots,
        });
        Self {
            anchors,
            members,
            slots,
            pair,
        }
    }

    /// Fair coin for every member, then `launch_iter` restricted sweeps.
    pub fn new<M: SplitMergeModel, R: Rng>(
        model: &M,
        labels: [usize; 2],
        anchors: [usize; 2],
        members: Vec<usize>,
        launch_iter: u32,
        rng: &mut R,
    ) -> Result<Self, SamplerError> {
        let slots = members.iter().map(|_| usize::from(rng.random_bool(0.5))).collect();
        let mut launch = Self::from_slots(model.data(), labels, anchors, members, slots);
        for _ in 0..launch_iter {
            let pair = launch.pair.clone();
            let (pair, _) = restricted_sweep(
                model,
                &launch.members,
                &mut launch.slots,
                pair,
                TargetOrRandom::Random(&mut *rng),
            )?;
            launch.pair = pair;
        }
        Ok(launch)
    }

    fn allocation<'a>(&'a self, anchor_slots: [usize; 2], slots: &'a [usize]) -> Allocation<'a> {
        Allocation {
            anchors: self.anchors,
            anchor_slots,
            members: &self.members,
            slots,
        }
    }
}

/// Terms of the Metropolis–Hastings log ratio of a move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogRatio {
    pub likelihood: f64,
    pub partition: f64,
    /// `±(ln r0c − ln r1c)`
    pub odds: f64,
    /// Prior density of the parameters of the cluster born or removed.
    pub parameters: f64,
    pub proposal: f64,
}

impl LogRatio {
    pub fn total(&self) -> f64 {
        self.likelihood + self.partition + self.odds + self.parameters + self.proposal
    }
}

#[derive(Debug, Clone)]
pub struct Proposal {
    pub kind: MoveKind,
    pub slots: Vec<usize>,
    pub pair: TwoWay,
    pub log_ratio: LogRatio,
}

impl Proposal {
    /// Builds the proposed state from `launch` and scores it against the current state,
    /// where `current` holds the current slots of the working set.
    ///
    /// A split draws its final assignment with one more restricted sweep (or follows
    /// `target_or_rng` when it is a target). A merge replays the sweep from the launch
    /// to the current assignment to obtain the reverse proposal probability.
    pub fn evaluate<M: SplitMergeModel, R: Rng>(
        model: &M,
        kind: MoveKind,
        launch: &Launch,
        current: &[usize],
        log_prior_parameters: f64,
        settings: &SplitMergeSettings,
        target_or_rng: TargetOrRandom<R>,
    ) -> Result<Self, SamplerError> {
        let data = model.data();
        let labels = launch.pair.labels;
        let (current_anchor_slots, proposed_anchor_slots, sign) = match kind {
            MoveKind::Split => ([1, 1], [0, 1], 1.0),
            MoveKind::Merge => ([0, 1], [1, 1], -1.0),
        };
        let mut slots = launch.slots.clone();
        let (pair, proposal) = match kind {
            MoveKind::Split => {
                let (pair, log_q) = restricted_sweep(
                    model,
                    &launch.members,
                    &mut slots,
                    launch.pair.clone(),
                    target_or_rng,
                )?;
                (pair, -log_q)
            }
            MoveKind::Merge => {
                let (_, log_q) = restricted_sweep(
                    model,
                    &launch.members,
                    &mut slots,
                    launch.pair.clone(),
                    TargetOrRandom::<R>::Target(current),
                )?;
                slots.fill(1);
                let pair = TwoWay::tally(data, labels, &launch.allocation(proposed_anchor_slots, &slots));
                (pair, log_q)
            }
        };

        let current_allocation = launch.allocation(current_anchor_slots, current);
        let current_pair = TwoWay::tally(data, labels, &current_allocation);
        let proposed_allocation = launch.allocation(proposed_anchor_slots, &slots);
        let likelihood = model.log_likelihood(&pair, &proposed_allocation, true)
            - model.log_likelihood(&current_pair, &current_allocation, false);

        let sizes = model.clustering().sizes();
        let mut proposed_sizes = sizes.to_vec();
        for slot in 0..2 {
            proposed_sizes[labels[slot]] = pair.counts[slot];
        }
        let partition =
            log_partition_prior(&proposed_sizes, settings.mass) - log_partition_prior(sizes, settings.mass);

        let (r0c, r1c) = settings.split_odds;
        let log_ratio = LogRatio {
            likelihood,
            partition,
            odds: sign * (r0c.ln() - r1c.ln()),
            parameters: sign * log_prior_parameters,
            proposal,
        };
        Ok(Self {
            kind,
            slots,
            pair,
            log_ratio,
        })
    }

    /// The clustering after the move.
    pub fn apply(&self, clustering: &Clustering, launch: &Launch) -> Clustering {
        let mut result = clustering.clone();
        let labels = self.pair.labels;
        let anchor_slots = match self.kind {
            MoveKind::Split => [0, 1],
            MoveKind::Merge => [1, 1],
        };
        for (item, slot) in launch.allocation(anchor_slots, &self.slots).iter() {
            result.reassign(item, labels[slot]);
        }
        result
    }
}

/// One split-merge step: anchors, launch, proposal and Metropolis–Hastings decision.
pub fn attempt<M: SplitMergeModel, R: Rng>(
    model: &mut M,
    settings: &SplitMergeSettings,
    rng: &mut R,
) -> Result<SplitMergeOutcome, SamplerError> {
    let clustering = model.clustering();
    check_shape(clustering)?;
    let anchors = draw_anchors(clustering, rng);
    let (kind, labels) = if clustering[anchors[0]] == clustering[anchors[1]] {
        // Non-empty: anchors share a cluster only when some label is free.
        let inactive = clustering.inactive_labels();
        let new_label = inactive[rng.random_range(0..inactive.len())];
        (MoveKind::Split, [new_label, clustering[anchors[1]]])
    } else {
        (MoveKind::Merge, [clustering[anchors[0]], clustering[anchors[1]]])
    };
    let members = working_set(clustering, anchors);
    let current: Vec<usize> = members
        .iter()
        .map(|&i| usize::from(clustering[i] != labels[0]))
        .collect();

    let log_prior_parameters = model.prepare(kind, labels, rng);
    let launch = Launch::new(&*model, labels, anchors, members, settings.launch_iter, rng)?;
    let proposal = Proposal::evaluate(
        &*model,
        kind,
        &launch,
        &current,
        log_prior_parameters,
        settings,
        TargetOrRandom::Random(&mut *rng),
    )?;
    let log_ratio = proposal.log_ratio.total();
    let accepted = rng.random::<f64>().ln() < log_ratio;
    trace!(
        "{:?} of labels {:?} with {} items: log ratio {:.4}, accepted {}",
        kind,
        labels,
        launch.members.len() + 2,
        log_ratio,
        accepted
    );
    if accepted {
        let clustering = proposal.apply(model.clustering(), &launch);
        model.commit(clustering, &proposal.pair);
    }
    Ok(SplitMergeOutcome {
        kind: Some(kind),
        accepted,
        log_ratio,
    })
}
