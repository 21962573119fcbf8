//! Row-major containers for the count matrix `Z`, the at-risk mask `A`, and the
//! cluster log-rate matrix `B`.

use crate::error::ConfigError;
use statrs::function::gamma::ln_gamma;

fn flatten<T: Copy>(rows: &[Vec<T>]) -> Result<(usize, Vec<T>), ConfigError> {
    let n_cols = rows.first().map_or(0, |r| r.len());
    let mut data = Vec::with_capacity(rows.len() * n_cols);
    for (row, r) in rows.iter().enumerate() {
        if r.len() != n_cols {
            return Err(ConfigError::RaggedRows {
                row,
                expected: n_cols,
                found: r.len(),
            });
        }
        data.extend_from_slice(r);
    }
    Ok((n_cols, data))
}

/// Observed counts, one row per item and one column per category. Immutable.
#[derive(Debug, Clone)]
pub struct CountMatrix {
    n_items: usize,
    n_categories: usize,
    data: Vec<u32>,
    log_multinomial: Vec<f64>,
}

impl CountMatrix {
    pub fn new(n_items: usize, n_categories: usize, data: Vec<u32>) -> Result<Self, ConfigError> {
        if n_categories == 0 {
            return Err(ConfigError::NoCategories);
        }
        if data.len() != n_items * n_categories {
            return Err(ConfigError::DimensionMismatch {
                what: "count data",
                expected: n_items * n_categories,
                found: data.len(),
            });
        }
        let log_multinomial = data
            .chunks(n_categories)
            .map(log_multinomial_coefficient)
            .collect();
        Ok(Self {
            n_items,
            n_categories,
            data,
            log_multinomial,
        })
    }

    pub fn from_rows(rows: &[Vec<u32>]) -> Result<Self, ConfigError> {
        let (n_categories, data) = flatten(rows)?;
        Self::new(rows.len(), n_categories, data)
    }

    pub fn n_items(&self) -> usize {
        self.n_items
    }

    pub fn n_categories(&self) -> usize {
        self.n_categories
    }

    pub fn row(&self, item: usize) -> &[u32] {
        let d = self.n_categories;
        &self.data[item * d..(item + 1) * d]
    }

    /// `lnΓ(Σz + 1) − Σ lnΓ(z + 1)` for the item's row.
    pub fn log_multinomial(&self, item: usize) -> f64 {
        self.log_multinomial[item]
    }
}

pub fn log_multinomial_coefficient(counts: &[u32]) -> f64 {
    let total: u64 = counts.iter().map(|&c| u64::from(c)).sum();
    if total == 0 {
        return 0.0;
    }
    counts
        .iter()
        .filter(|&&c| c > 1)
        .fold(ln_gamma(total as f64 + 1.0), |sum, &c| {
            sum - ln_gamma(f64::from(c) + 1.0)
        })
}

/// Latent zero-inflation mask. `false` marks a structural zero.
#[derive(Debug, Clone, PartialEq)]
pub struct AtRisk {
    n_categories: usize,
    data: Vec<bool>,
}

impl AtRisk {
    pub fn all_at_risk(n_items: usize, n_categories: usize) -> Self {
        Self {
            n_categories,
            data: vec![true; n_items * n_categories],
        }
    }

    pub fn from_rows(rows: &[Vec<bool>]) -> Result<Self, ConfigError> {
        let (n_categories, data) = flatten(rows)?;
        Ok(Self { n_categories, data })
    }

    pub fn n_items(&self) -> usize {
        if self.n_categories == 0 {
            0
        } else {
            self.data.len() / self.n_categories
        }
    }

    pub fn n_categories(&self) -> usize {
        self.n_categories
    }

    pub fn row(&self, item: usize) -> &[bool] {
        let d = self.n_categories;
        &self.data[item * d..(item + 1) * d]
    }

    pub fn row_mut(&mut self, item: usize) -> &mut [bool] {
        let d = self.n_categories;
        &mut self.data[item * d..(item + 1) * d]
    }

    /// Checks the shape against `counts` and that every positive count is at risk.
    pub fn validate(&self, counts: &CountMatrix) -> Result<(), ConfigError> {
        if self.n_categories != counts.n_categories() || self.n_items() != counts.n_items() {
            return Err(ConfigError::DimensionMismatch {
                what: "at-risk mask",
                expected: counts.n_items() * counts.n_categories(),
                found: self.data.len(),
            });
        }
        for item in 0..counts.n_items() {
            for (category, (&z, &a)) in counts.row(item).iter().zip(self.row(item)).enumerate() {
                if z > 0 && !a {
                    return Err(ConfigError::StructuralZeroWithCount { item, category });
                }
            }
        }
        Ok(())
    }
}

/// Log-rates of the Dirichlet-multinomial emission, one row per component.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRates {
    n_clusters: usize,
    n_categories: usize,
    data: Vec<f64>,
}

impl LogRates {
    pub fn constant(n_clusters: usize, n_categories: usize, value: f64) -> Self {
        Self {
            n_clusters,
            n_categories,
            data: vec![value; n_clusters * n_categories],
        }
    }

    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, ConfigError> {
        let (n_categories, data) = flatten(rows)?;
        Ok(Self {
            n_clusters: rows.len(),
            n_categories,
            data,
        })
    }

    pub fn n_clusters(&self) -> usize {
        self.n_clusters
    }

    pub fn n_categories(&self) -> usize {
        self.n_categories
    }

    pub fn row(&self, label: usize) -> &[f64] {
        let d = self.n_categories;
        &self.data[label * d..(label + 1) * d]
    }

    pub fn row_mut(&mut self, label: usize) -> &mut [f64] {
        let d = self.n_categories;
        &mut self.data[label * d..(label + 1) * d]
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.data.chunks(self.n_categories).map(|r| r.to_vec()).collect()
    }
}
