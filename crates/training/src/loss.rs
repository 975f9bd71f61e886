use burn::tensor::activation::log_softmax;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};

/// Pixel-wise cross-entropy over `[B, C, H, W]` logits and `[B, H, W]` class targets.
///
/// Targets outside `0..C` (the VOC ignore label 255 in practice) contribute nothing.
/// With class weights the reduction is `sum(w_t * nll) / sum(w_t)` over labeled
/// pixels; without, a plain mean. A batch with no labeled pixels yields 0.
pub fn cross_entropy<B: Backend>(
    logits: Tensor<B, 4>,
    targets: Tensor<B, 3, Int>,
    class_weights: Option<Tensor<B, 1>>,
) -> Tensor<B, 1> {
    let [batch, classes, height, width] = logits.dims();
    let n = batch * height * width;
    let log_probs = log_softmax(logits.permute([0, 2, 3, 1]).reshape([n, classes]), 1);

    let targets = targets.reshape([n]);
    let ignored = targets.clone().greater_equal_elem(classes as i64);
    let safe_targets = targets.mask_fill(ignored.clone(), 0);

    let nll = log_probs
        .gather(1, safe_targets.clone().reshape([n, 1]))
        .reshape([n])
        .neg();
    let valid = ignored.bool_not().float();
    let pixel_weights = match class_weights {
        Some(w) => w.select(0, safe_targets) * valid,
        None => valid,
    };
    let denom = pixel_weights.clone().sum().clamp_min(1e-12);
    (nll * pixel_weights).sum() / denom
}

pub fn class_weight_tensor<B: Backend>(weights: &[f32], device: &B::Device) -> Tensor<B, 1> {
    Tensor::from_data(TensorData::new(weights.to_vec(), [weights.len()]), device)
}

/// First element of a (scalar) tensor on the host.
pub fn scalar<B: Backend, const D: usize>(t: Tensor<B, D>) -> f32 {
    t.into_data()
        .to_vec::<f32>()
        .unwrap_or_default()
        .first()
        .copied()
        .unwrap_or(0.0)
}

#[cfg(test)]
mod loss_tests {
    use super::*;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    fn logits(device: &<B as Backend>::Device) -> Tensor<B, 4> {
        // 1 image, 3 classes, 1x2 pixels.
        Tensor::from_data(
            TensorData::new(vec![2.0f32, 0.0, 0.5, 1.0, -1.0, 0.0], [1, 3, 1, 2]),
            device,
        )
    }

    fn targets(values: Vec<i64>, device: &<B as Backend>::Device) -> Tensor<B, 3, Int> {
        Tensor::from_data(TensorData::new(values, [1, 1, 2]), device)
    }

    fn manual_nll(column: [f32; 3], target: usize) -> f32 {
        let max = column.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let lse = column.iter().map(|v| (v - max).exp()).sum::<f32>().ln() + max;
        lse - column[target]
    }

    #[test]
    fn unit_weights_match_plain_mean() {
        let device = Default::default();
        let plain = scalar(cross_entropy(logits(&device), targets(vec![0, 2], &device), None));
        let ones = class_weight_tensor::<B>(&[1.0, 1.0, 1.0], &device);
        let weighted = scalar(cross_entropy(
            logits(&device),
            targets(vec![0, 2], &device),
            Some(ones),
        ));
        let expected = (manual_nll([2.0, 0.5, -1.0], 0) + manual_nll([0.0, 1.0, 0.0], 2)) / 2.0;
        assert!((plain - expected).abs() < 1e-5);
        assert!((weighted - plain).abs() < 1e-6);
    }

    #[test]
    fn ignored_pixels_do_not_contribute() {
        let device = Default::default();
        let loss = scalar(cross_entropy(
            logits(&device),
            targets(vec![1, 255], &device),
            None,
        ));
        assert!((loss - manual_nll([2.0, 0.5, -1.0], 1)).abs() < 1e-5);

        let all_ignored = scalar(cross_entropy(
            logits(&device),
            targets(vec![255, 255], &device),
            None,
        ));
        assert_eq!(all_ignored, 0.0);
    }

    #[test]
    fn class_weights_rescale_pixels() {
        let device = Default::default();
        let w = class_weight_tensor::<B>(&[3.0, 1.0, 1.0], &device);
        let loss = scalar(cross_entropy(
            logits(&device),
            targets(vec![0, 2], &device),
            Some(w),
        ));
        let a = manual_nll([2.0, 0.5, -1.0], 0);
        let b = manual_nll([0.0, 1.0, 0.0], 2);
        assert!((loss - (3.0 * a + b) / 4.0).abs() < 1e-5);
    }
}
