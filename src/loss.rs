use ndarray::{arr0, Array2, ArrayD, Axis, Ix2, Zip};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::autograd::Tensor;
use crate::error::{Error, Result};

/// Training objectives. Both reduce to a scalar mean over the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Loss {
    /// Mean squared error.
    L2,
    /// Softmax over the last axis followed by cross entropy. Labels are either
    /// one-hot rows shaped like the logits or one class index per row.
    #[default]
    SoftmaxCrossEntropy,
}

impl Loss {
    pub fn name(self) -> &'static str {
        match self {
            Loss::L2 => "l2",
            Loss::SoftmaxCrossEntropy => "softmax_cross_entropy",
        }
    }

    pub fn apply(self, prediction: &Tensor, label: &Tensor) -> Result<Tensor> {
        match self {
            Loss::L2 => mse(prediction, label),
            Loss::SoftmaxCrossEntropy => softmax_cross_entropy(prediction, label),
        }
    }
}

fn mse(output: &Tensor, target: &Tensor) -> Result<Tensor> {
    let out = output.data();
    let tar = {
        let t = target.data_ref();
        if t.len() != out.len() {
            return Err(Error::shape_mismatch("l2 label", out.shape(), t.shape()));
        }
        t.iter().copied().collect::<Vec<f32>>()
    };
    let tar = ArrayD::from_shape_vec(out.raw_dim(), tar)?;

    let n = out.len().max(1) as f32;
    let sum_sq: f32 = Zip::from(&out)
        .and(&tar)
        .par_map_collect(|&o, &t| (o - t).powi(2))
        .sum();

    let output_clone = output.clone();
    Ok(Tensor::from_op(
        arr0(sum_sq / n).into_dyn(),
        vec![output.clone()],
        move |grad_output| {
            let factor = 2.0 / n * grad_output.sum();
            // dL/dx = 2/N * (x - y) * g
            let grad = Zip::from(&out)
                .and(&tar)
                .par_map_collect(|&o, &t| (o - t) * factor);
            output_clone.add_grad(grad)
        },
    ))
}

/// Dense `(batch, classes)` targets from one-hot rows or class indices.
fn dense_targets(label: &ArrayD<f32>, batch: usize, classes: usize) -> Result<Array2<f32>> {
    if label.shape() == [batch, classes] {
        return Ok(label.view().into_dimensionality::<Ix2>()?.to_owned());
    }
    if label.len() != batch {
        return Err(Error::shape_mismatch(
            "softmax cross entropy label",
            format!("[{batch}, {classes}] or {batch} class indices"),
            label.shape(),
        ));
    }
    let mut dense = Array2::zeros((batch, classes));
    for (mut row, &class) in dense.outer_iter_mut().zip(label.iter()) {
        if class < 0.0 || class.fract() != 0.0 || class as usize >= classes {
            return Err(Error::invalid_argument(format!(
                "class index {class} outside 0..{classes}"
            )));
        }
        row[class as usize] = 1.0;
    }
    Ok(dense)
}

fn softmax_cross_entropy(input_logits: &Tensor, label: &Tensor) -> Result<Tensor> {
    let logits = input_logits.data();
    let shape = logits.shape().to_vec();
    let Some((&classes, lead)) = shape.split_last() else {
        return Err(Error::shape_mismatch("softmax cross entropy logits", "rank >= 1", "rank 0"));
    };
    let batch: usize = lead.iter().product();
    let logits_2d = Array2::from_shape_vec((batch, classes), logits.iter().copied().collect())?;
    let targets = dense_targets(&label.data_ref(), batch, classes)?;

    // Row-wise softmax kept for backward; loss uses log-sum-exp.
    let mut softmax = Array2::<f32>::zeros((batch, classes));
    let total_loss: f32 = Zip::from(softmax.outer_iter_mut())
        .and(logits_2d.outer_iter())
        .and(targets.outer_iter())
        .into_par_iter()
        .map(|(mut sm_row, l_row, t_row)| {
            let max_val = l_row.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
            let mut sum_exp = 0.0f32;
            for (s, &l) in sm_row.iter_mut().zip(l_row.iter()) {
                let e = (l - max_val).exp();
                *s = e;
                sum_exp += e;
            }
            sm_row.mapv_inplace(|s| s / sum_exp);
            let log_norm = max_val + sum_exp.ln();
            l_row
                .iter()
                .zip(t_row.iter())
                .filter(|(_, t)| **t != 0.0)
                .map(|(&l, &t)| t * (log_norm - l))
                .sum::<f32>()
        })
        .sum();

    let batch_f = batch.max(1) as f32;
    let input_clone = input_logits.clone();
    Ok(Tensor::from_op(
        arr0(total_loss / batch_f).into_dyn(),
        vec![input_logits.clone()],
        move |grad_output| {
            let factor = grad_output.sum() / batch_f;
            // (softmax * sum(t) - t) / N * g
            let mut grad = softmax.clone();
            Zip::from(grad.outer_iter_mut())
                .and(targets.outer_iter())
                .par_for_each(|mut g_row, t_row| {
                    let mass = t_row.sum();
                    Zip::from(&mut g_row)
                        .and(&t_row)
                        .for_each(|g, &t| *g = (*g * mass - t) * factor);
                });
            input_clone.add_grad(grad.into_shape_with_order(shape.clone())?)
        },
    ))
}

/// Fraction of rows whose arg-max matches the label.
///
/// Labels follow the same one-hot / class-index convention as
/// [`Loss::SoftmaxCrossEntropy`].
pub fn accuracy(prediction: &Tensor, label: &Tensor) -> Result<f32> {
    let logits = prediction.data();
    let classes = logits.shape().last().copied().unwrap_or(1);
    let batch = logits.len() / classes.max(1);
    let logits = Array2::from_shape_vec((batch, classes), logits.iter().copied().collect())?;
    let targets = dense_targets(&label.data_ref(), batch, classes)?;
    let argmax = |row: ndarray::ArrayView1<f32>| {
        row.iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
            .0
    };
    let correct = logits
        .axis_iter(Axis(0))
        .zip(targets.axis_iter(Axis(0)))
        .filter(|(p, t)| argmax(p.view()) == argmax(t.view()))
        .count();
    Ok(correct as f32 / batch.max(1) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn l2_is_mean_squared_error() {
        let p = Tensor::parameter(ArrayD::from_shape_vec(vec![2, 1], vec![1.0, 3.0]).unwrap());
        let y = Tensor::from_vec(&[2], vec![0.0, 1.0]).unwrap();
        let loss = Loss::L2.apply(&p, &y).unwrap();
        assert_abs_diff_eq!(loss.to_vec()[0], 2.5);
        loss.backward().unwrap();
        assert_eq!(p.grad().unwrap().iter().copied().collect::<Vec<_>>(), vec![1.0, 2.0]);
    }

    #[test]
    fn cross_entropy_accepts_indices_and_one_hot() {
        let logits = || Tensor::from_vec(&[2, 3], vec![1.0, 2.0, 3.0, 1.0, 1.0, 1.0]).unwrap();
        let by_index = Loss::SoftmaxCrossEntropy
            .apply(&logits(), &Tensor::from_vec(&[2], vec![2.0, 0.0]).unwrap())
            .unwrap();
        let one_hot = Loss::SoftmaxCrossEntropy
            .apply(
                &logits(),
                &Tensor::from_vec(&[2, 3], vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0]).unwrap(),
            )
            .unwrap();
        let lse = (1f32.exp() + 2f32.exp() + 3f32.exp()).ln();
        let expected = ((lse - 3.0) + 3f32.ln()) / 2.0;
        assert_abs_diff_eq!(by_index.to_vec()[0], expected, epsilon = 1e-5);
        assert_abs_diff_eq!(one_hot.to_vec()[0], expected, epsilon = 1e-5);
    }

    #[test]
    fn cross_entropy_gradient_is_softmax_minus_target() {
        let x = Tensor::parameter(ArrayD::from_shape_vec(vec![1, 2], vec![0.0, 0.0]).unwrap());
        let loss = Loss::SoftmaxCrossEntropy
            .apply(&x, &Tensor::from_vec(&[1], vec![1.0]).unwrap())
            .unwrap();
        loss.backward().unwrap();
        let g = x.grad().unwrap();
        assert_abs_diff_eq!(g[[0, 0]], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(g[[0, 1]], -0.5, epsilon = 1e-6);
    }

    #[test]
    fn bad_class_index_is_rejected() {
        let x = Tensor::from_vec(&[1, 2], vec![0.0, 0.0]).unwrap();
        let err = Loss::SoftmaxCrossEntropy
            .apply(&x, &Tensor::from_vec(&[1], vec![2.0]).unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn accuracy_counts_argmax_hits() {
        let x = Tensor::from_vec(&[3, 2], vec![0.9, 0.1, 0.2, 0.8, 0.6, 0.4]).unwrap();
        let y = Tensor::from_vec(&[3], vec![0.0, 1.0, 1.0]).unwrap();
        assert_abs_diff_eq!(accuracy(&x, &y).unwrap(), 2.0 / 3.0, epsilon = 1e-6);
    }
}
