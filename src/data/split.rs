//! Training / validation / test splitting

use crate::error::{FeatureflowError, Result};
use polars::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

/// The three splits of a dataset
#[derive(Debug, Clone)]
pub struct DatasetSplits {
    pub training: DataFrame,
    pub validation: DataFrame,
    pub test: DataFrame,
}

impl DatasetSplits {
    pub fn sizes(&self) -> (usize, usize, usize) {
        (
            self.training.height(),
            self.validation.height(),
            self.test.height(),
        )
    }
}

/// Shuffle rows with `seed` and cut them by `probabilities`.
///
/// The training split always keeps at least one row; rounding leftovers go
/// to training.
pub fn split_dataset(df: &DataFrame, probabilities: [f64; 3], seed: u64) -> Result<DatasetSplits> {
    let n = df.height();
    if n == 0 {
        return Err(FeatureflowError::DataError(
            "cannot split an empty dataset".to_string(),
        ));
    }

    let mut indices: Vec<IdxSize> = (0..n as IdxSize).collect();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let mut n_val = (n as f64 * probabilities[1]).floor() as usize;
    let mut n_test = (n as f64 * probabilities[2]).floor() as usize;
    if n_val + n_test >= n {
        // tiny datasets: everything goes to training
        n_val = 0;
        n_test = 0;
    }
    let n_train = n - n_val - n_test;

    let take = |range: std::ops::Range<usize>| -> Result<DataFrame> {
        let idx = IdxCa::from_vec("idx".into(), indices[range].to_vec());
        Ok(df.take(&idx)?)
    };

    Ok(DatasetSplits {
        training: take(0..n_train)?,
        validation: take(n_train..n_train + n_val)?,
        test: take(n_train + n_val..n)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: usize) -> DataFrame {
        let values: Vec<i64> = (0..n as i64).collect();
        df!("x" => &values).unwrap()
    }

    #[test]
    fn test_default_split_sizes() {
        let splits = split_dataset(&frame(100), [0.7, 0.1, 0.2], 42).unwrap();
        assert_eq!(splits.sizes(), (70, 10, 20));
    }

    #[test]
    fn test_split_is_deterministic() {
        let a = split_dataset(&frame(50), [0.6, 0.2, 0.2], 7).unwrap();
        let b = split_dataset(&frame(50), [0.6, 0.2, 0.2], 7).unwrap();
        assert!(a.training.equals(&b.training));
        assert!(a.test.equals(&b.test));
    }

    #[test]
    fn test_split_covers_all_rows_once() {
        let splits = split_dataset(&frame(31), [0.7, 0.1, 0.2], 3).unwrap();
        let mut all: Vec<i64> = Vec::new();
        for df in [&splits.training, &splits.validation, &splits.test] {
            all.extend(df.column("x").unwrap().i64().unwrap().into_no_null_iter());
        }
        all.sort();
        assert_eq!(all, (0..31).collect::<Vec<i64>>());
    }

    #[test]
    fn test_tiny_dataset_trains_on_everything() {
        let splits = split_dataset(&frame(2), [0.4, 0.3, 0.3], 1).unwrap();
        assert_eq!(splits.sizes(), (2, 0, 0));
    }

    #[test]
    fn test_empty_dataset_rejected() {
        assert!(split_dataset(&frame(0), [0.7, 0.1, 0.2], 1).is_err());
    }
}
