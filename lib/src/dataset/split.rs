//! Train/test partitioning and k-fold cross-validation splits.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{NutriError, Result};

/// Row indices of a single train/test partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffle `0..n_samples` with a fixed seed and cut off a test fraction.
///
/// The test set holds `ceil(test_size * n_samples)` rows. The same seed always
/// produces the same partition, which is what makes one leaderboard run a fair
/// comparison between candidates.
pub fn train_test_split(n_samples: usize, test_size: f64, seed: u64) -> Result<SplitIndices> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(NutriError::InvalidParameter(format!(
            "test_size must be in (0, 1), got {}",
            test_size
        )));
    }
    let n_test = (test_size * n_samples as f64).ceil() as usize;
    if n_samples < 2 || n_test == 0 || n_test >= n_samples {
        return Err(NutriError::EmptyData(format!(
            "cannot split {} samples with test_size {}",
            n_samples, test_size
        )));
    }

    let mut indices: Vec<usize> = (0..n_samples).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let test = indices[..n_test].to_vec();
    let train = indices[n_test..].to_vec();
    Ok(SplitIndices { train, test })
}

/// Contiguous (unshuffled) k-fold splitter.
///
/// The first `n_samples % n_splits` folds are one sample larger than the rest.
#[derive(Debug, Clone, Copy)]
pub struct KFold {
    n_splits: usize,
}

impl KFold {
    pub fn new(n_splits: usize) -> Result<Self> {
        if n_splits < 2 {
            return Err(NutriError::InvalidParameter(format!(
                "k-fold needs at least 2 splits, got {}",
                n_splits
            )));
        }
        Ok(Self { n_splits })
    }

    pub fn n_splits(&self) -> usize {
        self.n_splits
    }

    pub fn split(&self, n_samples: usize) -> Result<Vec<SplitIndices>> {
        if n_samples < self.n_splits {
            return Err(NutriError::EmptyData(format!(
                "cannot make {} folds from {} samples",
                self.n_splits, n_samples
            )));
        }
        let base = n_samples / self.n_splits;
        let extra = n_samples % self.n_splits;

        let mut folds = Vec::with_capacity(self.n_splits);
        let mut start = 0;
        for fold in 0..self.n_splits {
            let size = base + usize::from(fold < extra);
            let end = start + size;
            let test: Vec<usize> = (start..end).collect();
            let train: Vec<usize> = (0..start).chain(end..n_samples).collect();
            folds.push(SplitIndices { train, test });
            start = end;
        }
        Ok(folds)
    }
}

pub fn select_rows(x: ArrayView2<'_, f64>, rows: &[usize]) -> Array2<f64> {
    x.select(Axis(0), rows)
}

pub fn select_values(y: ArrayView1<'_, f64>, rows: &[usize]) -> Array1<f64> {
    y.select(Axis(0), rows)
}
