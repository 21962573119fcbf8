use crate::clust::Clustering;
use crate::data::{AtRisk, CountMatrix, LogRates};
use crate::marginal::{exp_rates, log_compound_with_rates};
use crate::prelude::Shape;

use rand::Rng;
use statrs::function::gamma::ln_gamma;

/// Prior contribution of one zero cell's at-risk bit once the at-risk probability is
/// integrated out against Beta(r0g, r1g).
pub fn log_at_risk_prior(at_risk: bool, shapes: (Shape, Shape)) -> f64 {
    let (r0g, r1g) = (shapes.0.get(), shapes.1.get());
    let a = if at_risk { 1.0 } else { 0.0 };
    ln_gamma(a + r0g) + ln_gamma(1.0 - a + r1g) - ln_gamma(r0g + r1g + 1.0)
}

/// One Metropolis pass over every zero cell of the data, flipping its at-risk bit.
///
/// Cells are visited item by item, category by category. Each item is scored under
/// the log-rates of its current cluster. Returns the number of accepted flips.
pub fn update_at_risk<R: Rng>(
    data: &CountMatrix,
    at_risk: &mut AtRisk,
    clustering: &Clustering,
    log_rates: &LogRates,
    shapes: (Shape, Shape),
    rng: &mut R,
) -> usize {
    let mut n_accepted = 0;
    for i in 0..data.n_items() {
        let counts = data.row(i);
        let rates = exp_rates(log_rates.row(clustering[i]));
        let mut current = log_compound_with_rates(counts, at_risk.row(i), &rates);
        for j in 0..counts.len() {
            if counts[j] != 0 {
                continue;
            }
            let old = at_risk.row(i)[j];
            at_risk.row_mut(i)[j] = !old;
            let proposed = log_compound_with_rates(counts, at_risk.row(i), &rates);
            let log_ratio = proposed - current + log_at_risk_prior(!old, shapes)
                - log_at_risk_prior(old, shapes);
            if rng.random::<f64>().ln() < log_ratio {
                current = proposed;
                n_accepted += 1;
            } else {
                at_risk.row_mut(i)[j] = old;
            }
        }
    }
    n_accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    #[test]
    fn test_positive_counts_stay_at_risk() {
        let data = CountMatrix::from_rows(&[vec![5, 0, 0, 1], vec![0, 2, 0, 0], vec![0, 0, 0, 0]])
            .unwrap();
        let mut at_risk = AtRisk::all_at_risk(3, 4);
        let clustering = Clustering::from_slice(&[0, 1, 1], 2).unwrap();
        let rates = LogRates::from_rows(&[vec![0.0, 1.0, -1.0, 0.5], vec![2.0, 0.0, 0.0, -2.0]])
            .unwrap();
        let shapes = (Shape::new(1.0).unwrap(), Shape::new(1.0).unwrap());
        let mut rng = Pcg64Mcg::seed_from_u64(11);
        let mut total = 0;
        for _ in 0..200 {
            total += update_at_risk(&data, &mut at_risk, &clustering, &rates, shapes, &mut rng);
            assert!(at_risk.validate(&data).is_ok());
        }
        assert!(total > 0);
    }

    #[test]
    fn test_all_zero_row_follows_prior() {
        // An all-zero row has no likelihood information, so each bit is Bernoulli with
        // probability r0g / (r0g + r1g) of being at risk.
        let data = CountMatrix::from_rows(&[vec![0, 0], vec![1, 1]]).unwrap();
        let mut at_risk = AtRisk::all_at_risk(2, 2);
        let clustering = Clustering::one_cluster(2, 2).unwrap();
        let rates = LogRates::constant(2, 2, 0.0);
        let shapes = (Shape::new(3.0).unwrap(), Shape::new(1.0).unwrap());
        let mut rng = Pcg64Mcg::seed_from_u64(5);
        let n_sweeps = 20000;
        let mut hits = 0;
        for _ in 0..n_sweeps {
            update_at_risk(&data, &mut at_risk, &clustering, &rates, shapes, &mut rng);
            hits += at_risk.row(0).iter().filter(|&&a| a).count();
        }
        let freq = hits as f64 / (2 * n_sweeps) as f64;
        assert!((freq - 0.75).abs() < 0.02, "{}", freq);
    }

    #[test]
    fn test_prior_odds() {
        let shapes = (Shape::new(2.0).unwrap(), Shape::new(5.0).unwrap());
        let log_odds = log_at_risk_prior(true, shapes) - log_at_risk_prior(false, shapes);
        assert!((log_odds - (2.0_f64 / 5.0).ln()).abs() < 1e-10);
    }
}
