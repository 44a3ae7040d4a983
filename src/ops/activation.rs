use crate::autograd::Tensor;
use crate::error::{Error, Result};
use ndarray::{ArrayD, Axis, Zip};

pub fn relu(input: &Tensor) -> Tensor {
    let data = Zip::from(&*input.data_ref()).par_map_collect(|&x| x.max(0.0));

    let x = input.clone();
    Tensor::from_op(data, vec![input.clone()], move |grad| {
        let mut grad_input = grad.clone();
        Zip::from(&mut grad_input)
            .and(&*x.data_ref())
            .par_for_each(|g, &v| {
                if v <= 0.0 {
                    *g = 0.0;
                }
            });
        x.add_grad(grad_input)
    })
}

pub fn sigmoid(input: &Tensor) -> Tensor {
    let data = Zip::from(&*input.data_ref()).par_map_collect(|&x| 1.0 / (1.0 + (-x).exp()));

    let output = data.clone();
    let x = input.clone();
    Tensor::from_op(data, vec![input.clone()], move |grad| {
        // grad * y * (1 - y)
        let grad_input = Zip::from(grad)
            .and(&output)
            .par_map_collect(|&g, &y| g * y * (1.0 - y));
        x.add_grad(grad_input)
    })
}

pub fn tanh(input: &Tensor) -> Tensor {
    let data = Zip::from(&*input.data_ref()).par_map_collect(|&x| x.tanh());

    let output = data.clone();
    let x = input.clone();
    Tensor::from_op(data, vec![input.clone()], move |grad| {
        // grad * (1 - y^2)
        let grad_input = Zip::from(grad)
            .and(&output)
            .par_map_collect(|&g, &y| g * (1.0 - y * y));
        x.add_grad(grad_input)
    })
}

/// Log-softmax over the last axis.
pub fn log_softmax(input: &Tensor) -> Result<Tensor> {
    let shape = input.shape();
    let Some(&classes) = shape.last() else {
        return Err(Error::invalid_argument("log_softmax: rank-0 tensor"));
    };
    let rows = if classes == 0 { 0 } else { shape.iter().product::<usize>() / classes };

    let mut out = input.data_ref().to_shape((rows, classes))?.into_owned();
    Zip::from(out.axis_iter_mut(Axis(0))).par_for_each(|mut row| {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        let log_sum = row.iter().map(|&v| (v - max).exp()).sum::<f32>().ln() + max;
        row.mapv_inplace(|v| v - log_sum);
    });

    let softmax = out.mapv(f32::exp);
    let data: ArrayD<f32> = out.into_shape_with_order(shape.clone())?;

    let x = input.clone();
    Ok(Tensor::from_op(data, vec![input.clone()], move |grad| {
        // dx = g - softmax * sum(g)
        let g2 = grad.to_shape((rows, classes))?;
        let mut dx = g2.to_owned();
        Zip::from(dx.axis_iter_mut(Axis(0)))
            .and(softmax.axis_iter(Axis(0)))
            .par_for_each(|mut row, p| {
                let total = row.sum();
                Zip::from(&mut row).and(&p).for_each(|d, &p| *d -= p * total);
            });
        x.add_grad(dx.into_shape_with_order(shape.clone())?)
    }))
}
