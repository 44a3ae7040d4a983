use crate::autograd::Tensor;
use crate::error::{Error, Result};
use ndarray::{ArrayD, Axis, Zip};

/// Shape produced by broadcasting `a` against `b`, numpy style.
pub(crate) fn broadcast_shape(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(out)
}

fn check_broadcast(a: &Tensor, b: &Tensor, op: &str) -> Result<()> {
    let (sa, sb) = (a.shape(), b.shape());
    broadcast_shape(&sa, &sb)
        .map(|_| ())
        .ok_or_else(|| Error::shape_mismatch(format!("{op} operands"), sa, sb))
}

/// Sums a broadcast gradient back down to `target_shape`.
pub(crate) fn reduce_gradient(grad: &ArrayD<f32>, target_shape: &[usize]) -> Result<ArrayD<f32>> {
    if grad.shape() == target_shape {
        return Ok(grad.clone());
    }

    let mut res = grad.clone();
    while res.ndim() > target_shape.len() {
        res = res.sum_axis(Axis(0));
    }

    for (i, &target) in target_shape.iter().enumerate() {
        if target == 1 && res.shape()[i] > 1 {
            res = res.sum_axis(Axis(i)).insert_axis(Axis(i));
        } else if target != res.shape()[i] {
            return Err(Error::shape_mismatch(
                "gradient reduction",
                target_shape,
                grad.shape(),
            ));
        }
    }
    Ok(res)
}

pub fn add(lhs: &Tensor, rhs: &Tensor) -> Result<Tensor> {
    check_broadcast(lhs, rhs, "add")?;
    let data = &*lhs.data_ref() + &*rhs.data_ref();

    let (l, r) = (lhs.clone(), rhs.clone());
    Ok(Tensor::from_op(data, vec![lhs.clone(), rhs.clone()], move |grad| {
        l.add_grad(reduce_gradient(grad, &l.shape())?)?;
        r.add_grad(reduce_gradient(grad, &r.shape())?)
    }))
}

pub fn sub(lhs: &Tensor, rhs: &Tensor) -> Result<Tensor> {
    check_broadcast(lhs, rhs, "sub")?;
    let data = &*lhs.data_ref() - &*rhs.data_ref();

    let (l, r) = (lhs.clone(), rhs.clone());
    Ok(Tensor::from_op(data, vec![lhs.clone(), rhs.clone()], move |grad| {
        l.add_grad(reduce_gradient(grad, &l.shape())?)?;
        let neg = grad.mapv(|g| -g);
        r.add_grad(reduce_gradient(&neg, &r.shape())?)
    }))
}

pub fn mul(lhs: &Tensor, rhs: &Tensor) -> Result<Tensor> {
    check_broadcast(lhs, rhs, "mul")?;
    let data = &*lhs.data_ref() * &*rhs.data_ref();

    let (l, r) = (lhs.clone(), rhs.clone());
    Ok(Tensor::from_op(data, vec![lhs.clone(), rhs.clone()], move |grad| {
        let a = l.data_ref();
        let b = r.data_ref();
        let (g_lhs, g_rhs) = if grad.shape() == a.shape() && grad.shape() == b.shape() {
            (
                Zip::from(grad).and(&*b).par_map_collect(|&g, &b| g * b),
                Zip::from(grad).and(&*a).par_map_collect(|&g, &a| g * a),
            )
        } else {
            (grad * &*b, grad * &*a)
        };
        let (l_shape, r_shape) = (a.shape().to_vec(), b.shape().to_vec());
        drop((a, b));
        l.add_grad(reduce_gradient(&g_lhs, &l_shape)?)?;
        r.add_grad(reduce_gradient(&g_rhs, &r_shape)?)
    }))
}

pub fn mul_scalar(input: &Tensor, factor: f32) -> Tensor {
    let data = input.data_ref().mapv(|x| x * factor);
    let x = input.clone();
    Tensor::from_op(data, vec![input.clone()], move |grad| {
        x.add_grad(grad.mapv(|g| g * factor))
    })
}

/// Sum of all elements as a rank-0 tensor.
pub fn sum(input: &Tensor) -> Tensor {
    let total = input.data_ref().sum();
    let x = input.clone();
    Tensor::from_op(ndarray::arr0(total).into_dyn(), vec![input.clone()], move |grad| {
        let g = grad.first().copied().unwrap_or(0.0);
        x.add_grad(ArrayD::from_elem(x.shape(), g))
    })
}

/// Mean of all elements as a rank-0 tensor.
pub fn mean(input: &Tensor) -> Tensor {
    let n = input.data_ref().len().max(1) as f32;
    mul_scalar(&sum(input), 1.0 / n)
}
