use ndarray::{Array1, ArrayD};

use crate::error::{FractureError, Result};

/// Applies softmax to a 1D array (slice) and returns a new Array1<f32>.
pub fn softmax(slice: &Array1<f32>) -> Array1<f32> {
    let max_val = slice.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exp_vals: Array1<f32> = slice.mapv(|x| (x - max_val).exp());
    let sum_exp: f32 = exp_vals.sum();
    exp_vals.mapv(|v| v / sum_exp)
}

/// Index and value of the largest entry. Ties resolve to the lowest index.
pub fn argmax_and_max(softmaxed: &Array1<f32>) -> (usize, f32) {
    softmaxed
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(max_idx, max_val), (i, &val)| {
            if val > max_val { (i, val) } else { (max_idx, max_val) }
        })
}

fn is_distribution(values: &Array1<f32>) -> bool {
    values.iter().all(|v| (0.0..=1.0).contains(v)) && (values.sum() - 1.0).abs() < 1e-3
}

/// Flattens a batch-of-one classifier output into a probability vector.
///
/// Graphs exported with a softmax head are passed through untouched; raw
/// logits get a softmax applied.
pub fn to_probabilities(output: &ArrayD<f32>) -> Result<Array1<f32>> {
    let batch = output.shape().first().copied().unwrap_or(0);
    if output.ndim() == 0 || batch != 1 || output.len() == 0 {
        return Err(FractureError::Inference(format!(
            "expected a batch-of-one output, got shape {:?}",
            output.shape()
        )));
    }
    let flat: Array1<f32> = output.iter().copied().collect();
    if flat.iter().any(|v| !v.is_finite()) {
        return Err(FractureError::Inference("non-finite classifier output".into()));
    }
    if is_distribution(&flat) {
        Ok(flat)
    } else {
        Ok(softmax(&flat))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn softmax_sums_to_one() {
        let p = softmax(&arr1(&[1.0, 2.0, 3.0]));
        assert!((p.sum() - 1.0).abs() < 1e-6);
        assert_eq!(argmax_and_max(&p).0, 2);
    }

    #[test]
    fn argmax_prefers_first_on_tie() {
        assert_eq!(argmax_and_max(&arr1(&[0.5, 0.5])).0, 0);
    }

    #[test]
    fn probabilities_pass_through() {
        let out = arr2(&[[0.2, 0.8]]).into_dyn();
        let p = to_probabilities(&out).unwrap();
        assert_eq!(p, arr1(&[0.2, 0.8]));
    }

    #[test]
    fn logits_are_softmaxed() {
        let out = arr2(&[[2.0, -1.0, 0.5]]).into_dyn();
        let p = to_probabilities(&out).unwrap();
        assert!((p.sum() - 1.0).abs() < 1e-6);
        assert_eq!(argmax_and_max(&p).0, 0);
    }

    #[test]
    fn rejects_batched_output() {
        let out = arr2(&[[0.2, 0.8], [0.5, 0.5]]).into_dyn();
        assert!(to_probabilities(&out).is_err());
    }
}
