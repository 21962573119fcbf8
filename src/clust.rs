use crate::error::ConfigError;
use std::ops::Index;

/// Cluster labels together with the occupancy count of every label in `[0, k_max)`.
///
/// Labels and sizes only change together through [`Clustering::reassign`], so the sizes
/// are always exact.
#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    labels: Vec<usize>,
    sizes: Vec<usize>,
}

impl Index<usize> for Clustering {
    type Output = usize;
    fn index(&self, item: usize) -> &Self::Output {
        &self.labels[item]
    }
}

impl Clustering {
    pub fn one_cluster(n_items: usize, k_max: usize) -> Result<Self, ConfigError> {
        Self::from_vector(vec![0; n_items], k_max)
    }

    pub fn singletons(n_items: usize, k_max: usize) -> Result<Self, ConfigError> {
        Self::from_vector((0..n_items).collect(), k_max)
    }

    pub fn from_vector(labels: Vec<usize>, k_max: usize) -> Result<Self, ConfigError> {
        let mut sizes = vec![0; k_max];
        for (item, &label) in labels.iter().enumerate() {
            if label >= k_max {
                return Err(ConfigError::LabelOutOfRange { item, label, k_max });
            }
            sizes[label] += 1;
        }
        Ok(Self { labels, sizes })
    }

    pub fn from_slice(labels: &[usize], k_max: usize) -> Result<Self, ConfigError> {
        Self::from_vector(labels.to_vec(), k_max)
    }

    pub fn n_items(&self) -> usize {
        self.labels.len()
    }

    pub fn k_max(&self) -> usize {
        self.sizes.len()
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn size_of(&self, label: usize) -> usize {
        self.sizes[label]
    }

    /// Size of `label` as if `item` were not allocated.
    pub fn size_of_without(&self, label: usize, item: usize) -> usize {
        if self.labels[item] == label {
            self.sizes[label] - 1
        } else {
            self.sizes[label]
        }
    }

    pub fn n_active(&self) -> usize {
        self.sizes.iter().filter(|&&s| s > 0).count()
    }

    pub fn active_labels(&self) -> Vec<usize> {
        self.labels_where(|s| s > 0)
    }

    pub fn inactive_labels(&self) -> Vec<usize> {
        self.labels_where(|s| s == 0)
    }

    fn labels_where(&self, f: impl Fn(usize) -> bool) -> Vec<usize> {
        self.sizes
            .iter()
            .enumerate()
            .filter(|&(_, &s)| f(s))
            .map(|(label, _)| label)
            .collect()
    }

    pub fn items_of(&self, label: usize) -> Vec<usize> {
        let size = self.sizes[label];
        let mut items = Vec::with_capacity(size);
        let mut i = 0;
        while items.len() != size {
            if self.labels[i] == label {
                items.push(i);
            }
            i += 1;
        }
        items
    }

    /// Moves `item` to `label`, decrementing and incrementing the two sizes in one step.
    pub fn reassign(&mut self, item: usize, label: usize) {
        let old_label = self.labels[item];
        if old_label == label {
            return;
        }
        self.sizes[old_label] -= 1;
        self.sizes[label] += 1;
        self.labels[item] = label;
    }

    pub fn into_labels(self) -> Vec<usize> {
        self.labels
    }
}

/// The candidate labels of a reallocation sweep in ascending order.
///
/// Built once per sweep and never edited, so a position among the candidates stays
/// valid even when clusters empty out during the sweep.
#[derive(Debug, Clone)]
pub struct ActiveLabels {
    labels: Vec<usize>,
}

impl ActiveLabels {
    pub fn new(clustering: &Clustering) -> Self {
        Self {
            labels: clustering.active_labels(),
        }
    }

    /// Every label in `[0, k_max)`, used when reallocation may open new clusters.
    pub fn all(k_max: usize) -> Self {
        Self {
            labels: (0..k_max).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn label(&self, kk: usize) -> usize {
        self.labels[kk]
    }
}
