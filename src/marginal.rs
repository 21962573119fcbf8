//! Dirichlet-multinomial marginal likelihoods.
//!
//! For counts `c` and rates `α = exp(β)`, the compound term is
//! `lnΓ(Σα) − Σ lnΓ(α) + Σ lnΓ(c + α) − lnΓ(Σ(c + α))`, restricted to the at-risk
//! coordinates. The multinomial coefficient `lnΓ(Σc + 1) − Σ lnΓ(c + 1)` always runs
//! over every coordinate. Coordinates with a zero count contribute exactly zero to the
//! compound term, so they are skipped, and an empty at-risk set gives exactly zero.

use crate::clust::ActiveLabels;
use crate::data::{log_multinomial_coefficient, AtRisk, CountMatrix, LogRates};
use statrs::function::gamma::ln_gamma;

pub(crate) fn log_compound_with_rates(counts: &[u32], at_risk: &[bool], rates: &[f64]) -> f64 {
    let mut sum_rates = 0.0;
    let mut total = 0_u64;
    let mut result = 0.0;
    for ((&c, &a), &alpha) in counts.iter().zip(at_risk).zip(rates) {
        if !a {
            continue;
        }
        sum_rates += alpha;
        if c > 0 {
            total += u64::from(c);
            result += ln_gamma(f64::from(c) + alpha) - ln_gamma(alpha);
        }
    }
    if total == 0 {
        return 0.0;
    }
    result + ln_gamma(sum_rates) - ln_gamma(sum_rates + total as f64)
}

pub(crate) fn exp_rates(log_rates: &[f64]) -> Vec<f64> {
    log_rates.iter().map(|b| b.exp()).collect()
}

/// Compound term of one count vector under log-rates, over at-risk coordinates only.
pub fn log_compound(counts: &[u32], at_risk: &[bool], log_rates: &[f64]) -> f64 {
    log_compound_with_rates(counts, at_risk, &exp_rates(log_rates))
}

/// Log marginal probability of one observation under one cluster's log-rates.
pub fn log_marginal(counts: &[u32], at_risk: &[bool], log_rates: &[f64]) -> f64 {
    log_multinomial_coefficient(counts) + log_compound(counts, at_risk, log_rates)
}

/// [`log_marginal`] for row `item` of the data, reusing its cached coefficient.
pub fn log_marginal_item(
    data: &CountMatrix,
    at_risk: &AtRisk,
    item: usize,
    log_rates: &[f64],
) -> f64 {
    data.log_multinomial(item) + log_compound(data.row(item), at_risk.row(item), log_rates)
}

/// Log marginal of every observation under a single cluster's log-rates.
pub fn log_marginal_column(data: &CountMatrix, at_risk: &AtRisk, log_rates: &[f64]) -> Vec<f64> {
    let rates = exp_rates(log_rates);
    (0..data.n_items())
        .map(|i| {
            data.log_multinomial(i) + log_compound_with_rates(data.row(i), at_risk.row(i), &rates)
        })
        .collect()
}

/// Sum of the log marginals of `items` under a single cluster's log-rates.
pub fn log_marginal_sum(
    data: &CountMatrix,
    at_risk: &AtRisk,
    log_rates: &[f64],
    items: &[usize],
) -> f64 {
    let rates = exp_rates(log_rates);
    items.iter().fold(0.0, |sum, &i| {
        sum + data.log_multinomial(i) + log_compound_with_rates(data.row(i), at_risk.row(i), &rates)
    })
}

/// Log marginal of every observation under every cluster in `candidates`.
#[derive(Debug, Clone)]
pub struct LogMarginalMatrix {
    n_clusters: usize,
    data: Vec<f64>,
}

impl LogMarginalMatrix {
    pub fn new(
        data: &CountMatrix,
        at_risk: &AtRisk,
        log_rates: &LogRates,
        candidates: &ActiveLabels,
    ) -> Self {
        let n_clusters = candidates.len();
        let rates: Vec<Vec<f64>> = candidates
            .labels()
            .iter()
            .map(|&label| exp_rates(log_rates.row(label)))
            .collect();
        let mut values = Vec::with_capacity(data.n_items() * n_clusters);
        for i in 0..data.n_items() {
            let coefficient = data.log_multinomial(i);
            for r in &rates {
                values.push(coefficient + log_compound_with_rates(data.row(i), at_risk.row(i), r));
            }
        }
        Self {
            n_clusters,
            data: values,
        }
    }

    pub fn get(&self, item: usize, kk: usize) -> f64 {
        self.data[item * self.n_clusters + kk]
    }

    pub fn row(&self, item: usize) -> &[f64] {
        &self.data[item * self.n_clusters..(item + 1) * self.n_clusters]
    }
}

/// Compound term of the aggregated counts of a whole cluster under pseudo-counts.
pub fn log_cluster_compound(sums: &[u64], pseudo_counts: &[f64]) -> f64 {
    let mut sum_pseudo = 0.0;
    let mut total = 0_u64;
    let mut result = 0.0;
    for (&s, &alpha) in sums.iter().zip(pseudo_counts) {
        sum_pseudo += alpha;
        if s > 0 {
            total += s;
            result += ln_gamma(s as f64 + alpha) - ln_gamma(alpha);
        }
    }
    if total == 0 {
        return 0.0;
    }
    result + ln_gamma(sum_pseudo) - ln_gamma(sum_pseudo + total as f64)
}

/// Predictive log probability of row `item` joining a cluster whose other members
/// aggregate to `sums`, with the rates integrated out.
pub fn log_predictive_collapsed(
    data: &CountMatrix,
    item: usize,
    sums: &[u64],
    pseudo_counts: &[f64],
) -> f64 {
    let mut sum_posterior = 0.0;
    let mut total = 0_u64;
    let mut result = 0.0;
    for ((&c, &s), &alpha) in data.row(item).iter().zip(sums).zip(pseudo_counts) {
        let posterior = alpha + s as f64;
        sum_posterior += posterior;
        if c > 0 {
            total += u64::from(c);
            result += ln_gamma(f64::from(c) + posterior) - ln_gamma(posterior);
        }
    }
    if total == 0 {
        return data.log_multinomial(item);
    }
    data.log_multinomial(item) + result + ln_gamma(sum_posterior)
        - ln_gamma(sum_posterior + total as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clust::Clustering;

    fn compositions(total: u32, parts: usize) -> Vec<Vec<u32>> {
        if parts == 1 {
            return vec![vec![total]];
        }
        let mut result = Vec::new();
        for first in 0..=total {
            for mut rest in compositions(total - first, parts - 1) {
                rest.insert(0, first);
                result.push(rest);
            }
        }
        result
    }

    #[test]
    fn test_uniform_dirichlet() {
        // Under Dirichlet(1, 1) every split of two counts has probability 1/3.
        let at_risk = [true, true];
        for counts in [[1, 1], [2, 0], [0, 2]] {
            let lm = log_marginal(&counts, &at_risk, &[0.0, 0.0]);
            assert!((lm - (1.0_f64 / 3.0).ln()).abs() < 1e-10);
        }
    }

    #[test]
    fn test_pmf_sums_to_one() {
        let log_rates = [0.3, -1.2, 0.8];
        let at_risk = [true, true, true];
        let sum: f64 = compositions(4, 3)
            .iter()
            .map(|c| log_marginal(c, &at_risk, &log_rates).exp())
            .sum();
        assert!((sum - 1.0).abs() < 1e-9, "{}", sum);
        // With one category structurally absent the rest still form a distribution.
        let at_risk = [true, false, true];
        let sum: f64 = compositions(4, 3)
            .iter()
            .filter(|c| c[1] == 0)
            .map(|c| log_marginal(c, &at_risk, &log_rates).exp())
            .sum();
        assert!((sum - 1.0).abs() < 1e-9, "{}", sum);
    }

    #[test]
    fn test_zero_counts_are_exactly_zero() {
        let log_rates = [1.5, -0.5, 3.0];
        assert_eq!(log_marginal(&[0, 0, 0], &[true, true, true], &log_rates), 0.0);
        assert_eq!(log_marginal(&[0, 0, 0], &[false, false, false], &log_rates), 0.0);
    }

    #[test]
    fn test_empty_at_risk_set() {
        assert_eq!(log_compound(&[0, 0], &[false, false], &[0.0, 0.0]), 0.0);
        let lm = log_marginal(&[2, 0], &[true, false], &[0.7, 0.1]);
        assert!(lm.abs() < 1e-12);
    }

    #[test]
    fn test_vectorized_variants_agree() {
        let data = CountMatrix::from_rows(&[vec![3, 0, 1], vec![0, 0, 0], vec![1, 4, 0]]).unwrap();
        let at_risk =
            AtRisk::from_rows(&[vec![true, false, true], vec![true, true, true], vec![true, true, false]])
                .unwrap();
        let rates = LogRates::from_rows(&[vec![0.1, 0.2, 0.3], vec![-1.0, 2.0, 0.5]]).unwrap();
        let column = log_marginal_column(&data, &at_risk, rates.row(1));
        for i in 0..3 {
            let single = log_marginal(data.row(i), at_risk.row(i), rates.row(1));
            assert!((column[i] - single).abs() < 1e-12);
            assert!((log_marginal_item(&data, &at_risk, i, rates.row(1)) - single).abs() < 1e-12);
        }
        let sum = log_marginal_sum(&data, &at_risk, rates.row(1), &[0, 2]);
        assert!((sum - column[0] - column[2]).abs() < 1e-12);
        let clustering = Clustering::from_slice(&[0, 1, 1], 2).unwrap();
        let matrix = LogMarginalMatrix::new(&data, &at_risk, &rates, &ActiveLabels::new(&clustering));
        assert!((matrix.get(0, 1) - column[0]).abs() < 1e-12);
        assert_eq!(matrix.row(2).len(), 2);
    }

    #[test]
    fn test_collapsed_chain_rule() {
        let data = CountMatrix::from_rows(&[vec![2, 1, 0], vec![0, 3, 1]]).unwrap();
        let pseudo = [0.5, 1.0, 2.0];
        let first = log_predictive_collapsed(&data, 0, &[0, 0, 0], &pseudo);
        let second = log_predictive_collapsed(&data, 1, &[2, 1, 0], &pseudo);
        let joint = data.log_multinomial(0)
            + data.log_multinomial(1)
            + log_cluster_compound(&[2, 4, 1], &pseudo);
        assert!((first + second - joint).abs() < 1e-10);
        assert_eq!(log_cluster_compound(&[0, 0, 0], &pseudo), 0.0);
    }
}
