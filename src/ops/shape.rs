use crate::autograd::Tensor;
use crate::error::{Error, Result};
use ndarray::{ArrayD, Axis, IxDyn, Slice};

fn check_axis(shape: &[usize], axis: usize, op: &str) -> Result<()> {
    if axis < shape.len() {
        Ok(())
    } else {
        Err(Error::invalid_argument(format!(
            "{op}: axis {axis} out of range for rank {}",
            shape.len()
        )))
    }
}

pub fn reshape(input: &Tensor, shape: &[usize]) -> Result<Tensor> {
    let old_shape = input.shape();
    let reshaped = input
        .data_ref()
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order(IxDyn(shape))?;

    let x = input.clone();
    Ok(Tensor::from_op(reshaped, vec![input.clone()], move |grad| {
        let g = grad
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order(IxDyn(&old_shape))?;
        x.add_grad(g)
    }))
}

pub fn permute(input: &Tensor, axes: &[usize]) -> Result<Tensor> {
    let rank = input.shape().len();
    let mut seen = vec![false; rank];
    for &ax in axes {
        if ax >= rank || std::mem::replace(&mut seen[ax], true) {
            return Err(Error::invalid_argument(format!(
                "permute: {axes:?} is not a permutation of rank {rank}"
            )));
        }
    }
    if axes.len() != rank {
        return Err(Error::invalid_argument(format!(
            "permute: {axes:?} is not a permutation of rank {rank}"
        )));
    }

    let permuted = input
        .data_ref()
        .view()
        .permuted_axes(IxDyn(axes))
        .as_standard_layout()
        .into_owned();

    let mut rev_axes = vec![0; rank];
    for (i, &ax) in axes.iter().enumerate() {
        rev_axes[ax] = i;
    }
    let x = input.clone();
    Ok(Tensor::from_op(permuted, vec![input.clone()], move |grad| {
        x.add_grad(grad.view().permuted_axes(IxDyn(&rev_axes)).to_owned())
    }))
}

/// Concatenates along an existing axis.
pub fn cat(tensors: &[Tensor], axis: usize) -> Result<Tensor> {
    let Some(first) = tensors.first() else {
        return Err(Error::invalid_argument("cat: no tensors given"));
    };
    check_axis(&first.shape(), axis, "cat")?;

    let arrays: Vec<ArrayD<f32>> = tensors.iter().map(Tensor::data).collect();
    let views: Vec<_> = arrays.iter().map(|a| a.view()).collect();
    let result = ndarray::concatenate(Axis(axis), &views)?;

    let lengths: Vec<usize> = arrays.iter().map(|a| a.shape()[axis]).collect();
    let parts = tensors.to_vec();
    Ok(Tensor::from_op(result, tensors.to_vec(), move |grad| {
        let mut start = 0;
        for (t, &len) in parts.iter().zip(&lengths) {
            let sub = grad.slice_axis(Axis(axis), Slice::from(start..start + len));
            t.add_grad(sub.to_owned())?;
            start += len;
        }
        Ok(())
    }))
}

/// Joins equally shaped tensors along a new axis.
pub fn stack(tensors: &[Tensor], axis: usize) -> Result<Tensor> {
    let expanded = tensors
        .iter()
        .map(|t| {
            let mut shape = t.shape();
            if axis > shape.len() {
                return Err(Error::invalid_argument(format!(
                    "stack: axis {axis} out of range for rank {}",
                    shape.len()
                )));
            }
            shape.insert(axis, 1);
            reshape(t, &shape)
        })
        .collect::<Result<Vec<_>>>()?;
    cat(&expanded, axis)
}

/// Picks index `index` of `axis`, dropping that axis.
pub fn select(input: &Tensor, axis: usize, index: usize) -> Result<Tensor> {
    let full_shape = input.shape();
    check_axis(&full_shape, axis, "select")?;
    if index >= full_shape[axis] {
        return Err(Error::invalid_argument(format!(
            "select: index {index} out of range for axis {axis} of {full_shape:?}"
        )));
    }
    let picked = input.data_ref().index_axis(Axis(axis), index).to_owned();

    let x = input.clone();
    Ok(Tensor::from_op(picked, vec![input.clone()], move |grad| {
        let mut full = ArrayD::zeros(IxDyn(&full_shape));
        full.index_axis_mut(Axis(axis), index).assign(grad);
        x.add_grad(full)
    }))
}

pub fn slice_last_dim(input: &Tensor, start: usize, end: usize) -> Result<Tensor> {
    let full_shape = input.shape();
    let Some(&last) = full_shape.last() else {
        return Err(Error::invalid_argument("slice_last_dim: rank-0 tensor"));
    };
    if start > end || end > last {
        return Err(Error::invalid_argument(format!(
            "slice_last_dim: {start}..{end} out of range for {last}"
        )));
    }
    let axis = Axis(full_shape.len() - 1);
    let sliced = input
        .data_ref()
        .slice_axis(axis, Slice::from(start..end))
        .to_owned();

    let x = input.clone();
    Ok(Tensor::from_op(sliced, vec![input.clone()], move |grad| {
        let mut full = ArrayD::zeros(IxDyn(&full_shape));
        full.slice_axis_mut(axis, Slice::from(start..end)).assign(grad);
        x.add_grad(full)
    }))
}
