use statrs::distribution::{ChiSquared, ContinuousCDF};

/// Chi-square goodness-of-fit of observed category counts against probabilities.
/// Cells with an expected count below five are pooled with their neighbors.
pub fn assert_goodness_of_fit(observed: &[usize], probs: &[f64], alpha: f64) {
    assert_eq!(observed.len(), probs.len());
    let n: usize = observed.iter().sum();
    let ns = n as f64;
    let threshold = 5.0;
    let mut chisq = 0.0;
    let mut df = 0;
    let mut pooled_observed = 0;
    let mut pooled_expected = 0.0;
    for (o, p) in observed.iter().zip(probs) {
        pooled_observed += *o;
        pooled_expected += ns * p;
        if pooled_expected >= threshold {
            let o = pooled_observed as f64;
            chisq += (o - pooled_expected) * (o - pooled_expected) / pooled_expected;
            df += 1;
            pooled_observed = 0;
            pooled_expected = 0.0;
        }
    }
    assert!(df > 1, "Too few cells for a goodness of fit test.");
    let distr = ChiSquared::new((df - 1) as f64).unwrap();
    let p_value = 1.0 - distr.cdf(chisq);
    assert!(
        p_value > alpha,
        "Rejected goodness of fit test... p-value: {:.8}, chisq: {:.2}, df: {}",
        p_value,
        chisq,
        df
    );
}
