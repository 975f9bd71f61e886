//! Inverse-frequency class weights for the segmentation loss.

use crate::palette::decode_mask_image;
use crate::types::{DatasetResult, SampleIndex, VocError};
use rayon::prelude::*;

/// Labeled pixel count per class over the given samples' masks (ignore label excluded).
pub fn pixel_counts(indices: &[SampleIndex], num_classes: usize) -> DatasetResult<Vec<u64>> {
    indices
        .par_iter()
        .map(|idx| {
            let raw = image::open(&idx.mask_path).map_err(|e| VocError::Image {
                path: idx.mask_path.clone(),
                source: e,
            })?;
            let mut counts = vec![0u64; num_classes];
            for &v in decode_mask_image(&raw).as_raw() {
                if let Some(slot) = counts.get_mut(v as usize) {
                    *slot += 1;
                }
            }
            Ok(counts)
        })
        .try_reduce(
            || vec![0u64; num_classes],
            |mut acc, counts| {
                for (a, c) in acc.iter_mut().zip(counts) {
                    *a += c;
                }
                Ok(acc)
            },
        )
}

/// `w_c = total / (num_classes * count_c)`; classes never observed get 1.0.
pub fn weights_from_counts(counts: &[u64]) -> Vec<f32> {
    let total: u64 = counts.iter().sum();
    if total == 0 {
        return vec![1.0; counts.len()];
    }
    let n = counts.len() as f64;
    counts
        .iter()
        .map(|&c| {
            if c == 0 {
                1.0
            } else {
                (total as f64 / (n * c as f64)) as f32
            }
        })
        .collect()
}

pub fn class_weights(indices: &[SampleIndex], num_classes: usize) -> DatasetResult<Vec<f32>> {
    let counts = pixel_counts(indices, num_classes)?;
    let weights = weights_from_counts(&counts);
    tracing::debug!(?counts, ?weights, "computed class weights");
    Ok(weights)
}

#[cfg(test)]
mod weight_tests {
    use super::weights_from_counts;

    #[test]
    fn inverse_frequency_balances_classes() {
        let w = weights_from_counts(&[300, 100, 0]);
        // total 400 over 3 classes
        assert!((w[0] - 400.0 / 900.0).abs() < 1e-6);
        assert!((w[1] - 400.0 / 300.0).abs() < 1e-6);
        assert_eq!(w[2], 1.0);
    }

    #[test]
    fn empty_counts_give_uniform_weights() {
        assert_eq!(weights_from_counts(&[0, 0]), vec![1.0, 1.0]);
    }
}
