//! Segmentation metrics on host-side label maps.
//!
//! Predictions and targets are flat row-major class indices of equal length.
//! Target pixels outside `0..num_classes` (the ignore label) are skipped.

use serde::{Deserialize, Serialize};

/// `counts[target * C + pred]` pixel tallies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    num_classes: usize,
    counts: Vec<u64>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            counts: vec![0; num_classes * num_classes],
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn update(&mut self, pred: &[i64], target: &[i64]) {
        let c = self.num_classes;
        for (&p, &t) in pred.iter().zip(target) {
            if !is_labeled(t, c) || !is_labeled(p, c) {
                continue;
            }
            self.counts[t as usize * c + p as usize] += 1;
        }
    }

    pub fn merge(&mut self, other: &ConfusionMatrix) {
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b;
        }
    }

    pub fn get(&self, target: usize, pred: usize) -> u64 {
        self.counts[target * self.num_classes + pred]
    }

    pub fn labeled(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn correct(&self) -> u64 {
        (0..self.num_classes).map(|k| self.get(k, k)).sum()
    }

    /// IoU per class; `None` where the class appears in neither prediction nor target.
    pub fn class_iou(&self) -> Vec<Option<f64>> {
        (0..self.num_classes)
            .map(|k| {
                let tp = self.get(k, k);
                let target_total: u64 = (0..self.num_classes).map(|p| self.get(k, p)).sum();
                let pred_total: u64 = (0..self.num_classes).map(|t| self.get(t, k)).sum();
                let union = target_total + pred_total - tp;
                (union > 0).then(|| tp as f64 / union as f64)
            })
            .collect()
    }

    /// Mean over classes with a non-empty union; 0 when there are none.
    pub fn mean_iou(&self) -> f64 {
        let present: Vec<f64> = self.class_iou().into_iter().flatten().collect();
        if present.is_empty() {
            0.0
        } else {
            present.iter().sum::<f64>() / present.len() as f64
        }
    }

    pub fn pixel_acc(&self) -> f64 {
        match self.labeled() {
            0 => 0.0,
            n => self.correct() as f64 / n as f64,
        }
    }
}

/// Whether a target pixel counts: inside `0..num_classes`, so never the ignore label.
fn is_labeled(label: i64, num_classes: usize) -> bool {
    (0..num_classes as i64).contains(&label)
}

/// Mean IoU of a single prediction/target pair.
pub fn iou(pred: &[i64], target: &[i64], num_classes: usize) -> f64 {
    let mut cm = ConfusionMatrix::new(num_classes);
    cm.update(pred, target);
    cm.mean_iou()
}

/// Correct / labeled pixels; targets outside `0..num_classes` are skipped.
pub fn pixel_acc(pred: &[i64], target: &[i64], num_classes: usize) -> f64 {
    let (mut correct, mut labeled) = (0u64, 0u64);
    for (&p, &t) in pred.iter().zip(target) {
        if !is_labeled(t, num_classes) {
            continue;
        }
        labeled += 1;
        if p == t {
            correct += 1;
        }
    }
    if labeled == 0 {
        0.0
    } else {
        correct as f64 / labeled as f64
    }
}

/// Running mean of per-batch scalars.
#[derive(Debug, Clone, Default)]
pub struct Mean {
    sum: f64,
    count: usize,
}

impl Mean {
    pub fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn value(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

#[cfg(test)]
mod metric_tests {
    use super::*;

    const I: i64 = voc_dataset::IGNORE_LABEL;

    #[test]
    fn iou_matches_hand_count() {
        // class 0: tp 1, union 3; class 1: tp 2, union 4; class 2 only on an ignored pixel
        let target = [0, 0, 1, 1, 1, I];
        let pred = [0, 1, 1, 1, 0, 2];
        let score = iou(&pred, &target, 3);
        assert!((score - (1.0 / 3.0 + 2.0 / 4.0) / 2.0).abs() < 1e-9);
    }

    #[test]
    fn ignored_pixels_are_excluded() {
        let target = [1, I, I];
        let pred = [1, 0, 0];
        assert_eq!(iou(&pred, &target, 2), 1.0);
        assert_eq!(pixel_acc(&pred, &target, 2), 1.0);
    }

    #[test]
    fn nothing_labeled_scores_zero() {
        assert_eq!(iou(&[0, 1], &[I, I], 2), 0.0);
        assert_eq!(pixel_acc(&[0, 1], &[I, I], 2), 0.0);
    }

    #[test]
    fn pixel_acc_counts_correct_over_labeled() {
        assert_eq!(pixel_acc(&[0, 1, 2, 2], &[0, 1, 1, I], 3), 2.0 / 3.0);
    }

    #[test]
    fn confusion_matrix_accumulates_across_batches() {
        let mut cm = ConfusionMatrix::new(2);
        cm.update(&[0, 1], &[0, 1]);
        let mut other = ConfusionMatrix::new(2);
        other.update(&[1, 1], &[0, 1]);
        cm.merge(&other);
        assert_eq!(cm.labeled(), 4);
        assert_eq!(cm.correct(), 3);
        assert_eq!(cm.get(0, 1), 1);
        // class 0: 1/2, class 1: 2/3
        assert!((cm.mean_iou() - (0.5 + 2.0 / 3.0) / 2.0).abs() < 1e-9);
        assert_eq!(cm.pixel_acc(), 0.75);
    }

    #[test]
    fn single_batch_matrix_agrees_with_iou() {
        let target = [2, 2, 0, 1, I, 1];
        let pred = [2, 0, 0, 1, 1, 2];
        let mut cm = ConfusionMatrix::new(3);
        cm.update(&pred, &target);
        assert_eq!(cm.mean_iou(), iou(&pred, &target, 3));
        assert_eq!(cm.pixel_acc(), pixel_acc(&pred, &target, 3));
    }

    #[test]
    fn labels_past_num_classes_are_ignored_everywhere() {
        // 3 and 7 are not ignore-label 255 but still fall outside 0..3
        let target = [0, 1, 3, 7, I, 2];
        let pred = [0, 1, 3, 0, 0, 1];
        let mut cm = ConfusionMatrix::new(3);
        cm.update(&pred, &target);
        assert_eq!(cm.labeled(), 3);
        assert_eq!(pixel_acc(&pred, &target, 3), 2.0 / 3.0);
        assert_eq!(cm.pixel_acc(), pixel_acc(&pred, &target, 3));
        assert_eq!(cm.mean_iou(), iou(&pred, &target, 3));
    }
}
