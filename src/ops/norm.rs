use crate::autograd::Tensor;
use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayD, Axis, IxDyn, Zip};

/// Batch statistics and how they are applied.
#[derive(Debug, Clone, Copy)]
pub struct BatchNormSettings {
    pub axis: usize,
    pub epsilon: f32,
    pub momentum: f32,
    pub training: bool,
}

// Moves `axis` last and flattens the rest: [M, C].
fn to_rows(data: &ArrayD<f32>, axis: usize) -> Result<(Array2<f32>, Vec<usize>)> {
    let last = data.ndim() - 1;
    let mut view = data.view();
    view.swap_axes(axis, last);
    let swapped = view.shape().to_vec();
    let c = swapped[last];
    let m = if c == 0 { 0 } else { view.len() / c };
    let rows = view.as_standard_layout().into_owned().into_shape_with_order((m, c))?;
    Ok((rows, swapped))
}

fn from_rows(rows: Array2<f32>, swapped: &[usize], axis: usize) -> Result<ArrayD<f32>> {
    let mut data = rows.into_shape_with_order(IxDyn(swapped))?;
    let last = data.ndim() - 1;
    data.swap_axes(axis, last);
    Ok(data.as_standard_layout().into_owned())
}

fn vector(t: &Tensor, len: usize, what: &str) -> Result<Array1<f32>> {
    let shape = t.shape();
    if shape != [len] {
        return Err(Error::shape_mismatch(format!("batch norm {what}"), [len], shape));
    }
    Ok(t.data_ref().iter().copied().collect())
}

/// Normalizes `input` per channel along `settings.axis`.
///
/// In training mode the batch statistics are used and folded into
/// `running_mean`/`running_var` with `momentum`; otherwise the running
/// statistics are used as is.
pub fn batch_norm(
    input: &Tensor,
    gamma: &Tensor,
    beta: &Tensor,
    running_mean: &Tensor,
    running_var: &Tensor,
    settings: BatchNormSettings,
) -> Result<Tensor> {
    let shape = input.shape();
    let axis = settings.axis;
    if axis >= shape.len() {
        return Err(Error::invalid_argument(format!(
            "batch norm axis {axis} out of range for rank {}",
            shape.len()
        )));
    }
    let channels = shape[axis];
    let g = vector(gamma, channels, "gamma")?;
    let b = vector(beta, channels, "beta")?;
    let stored_mean = vector(running_mean, channels, "running mean")?;
    let stored_var = vector(running_var, channels, "running variance")?;

    let (x, swapped) = to_rows(&input.data_ref(), axis)?;
    let m = x.nrows().max(1) as f32;

    let (mean, var) = if settings.training {
        let mean = x.sum_axis(Axis(0)) / m;
        let var = (&x - &mean).mapv(|v| v * v).sum_axis(Axis(0)) / m;
        let mom = settings.momentum;
        let blend = |stored: &Array1<f32>, batch: &Array1<f32>| {
            Zip::from(stored)
                .and(batch)
                .map_collect(|&r, &v| mom * r + (1.0 - mom) * v)
                .into_dyn()
        };
        *running_mean.data_mut() = blend(&stored_mean, &mean);
        *running_var.data_mut() = blend(&stored_var, &var);
        (mean, var)
    } else {
        (stored_mean, stored_var)
    };

    let inv_std = var.mapv(|v| 1.0 / (v + settings.epsilon).sqrt());
    let x_hat = (&x - &mean) * &inv_std;
    let y = &x_hat * &g + &b;
    let data = from_rows(y, &swapped, axis)?;

    let (x_t, g_t, b_t) = (input.clone(), gamma.clone(), beta.clone());
    let training = settings.training;
    Ok(Tensor::from_op(
        data,
        vec![input.clone(), gamma.clone(), beta.clone()],
        move |grad| {
            let (dy, _) = to_rows(grad, axis)?;
            let d_gamma = (&dy * &x_hat).sum_axis(Axis(0));
            let d_beta = dy.sum_axis(Axis(0));

            if x_t.requires_grad() {
                let dx_hat = &dy * &g;
                let dx = if training {
                    // (1/M) inv_std (M dx_hat - sum(dx_hat) - x_hat sum(dx_hat x_hat))
                    let sum_dx_hat = dx_hat.sum_axis(Axis(0));
                    let sum_dx_hat_x_hat = (&dx_hat * &x_hat).sum_axis(Axis(0));
                    (&dx_hat * m - &sum_dx_hat - &x_hat * &sum_dx_hat_x_hat) * &inv_std / m
                } else {
                    dx_hat * &inv_std
                };
                x_t.add_grad(from_rows(dx, &swapped, axis)?)?;
            }
            g_t.add_grad(d_gamma.into_dyn())?;
            b_t.add_grad(d_beta.into_dyn())
        },
    ))
}
