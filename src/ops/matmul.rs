use crate::autograd::Tensor;
use crate::error::{Error, Result};
use ndarray::linalg::general_mat_mul;
use ndarray::{Array2, ArrayD, Ix2};

fn as_matrix(data: &ArrayD<f32>, rows: usize, cols: usize) -> Result<Array2<f32>> {
    Ok(data
        .to_shape((rows, cols))?
        .into_owned())
}

// A[..., K] @ B^T, where B is [N(out), K(in)]
// output: [..., N]
pub fn matmul(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let (a_shape, b_shape) = (a.shape(), b.shape());

    if b_shape.len() != 2 {
        return Err(Error::shape_mismatch("matmul rhs", "[N, K]", b_shape));
    }
    let Some(&k_dim) = a_shape.last() else {
        return Err(Error::shape_mismatch("matmul lhs", "[..., K]", a_shape));
    };
    let (n_dim, k_dim_b) = (b_shape[0], b_shape[1]);
    if k_dim != k_dim_b {
        return Err(Error::shape_mismatch(
            "matmul contraction",
            format!("K = {k_dim_b}"),
            a_shape,
        ));
    }
    let m_dim = if k_dim == 0 {
        0
    } else {
        a_shape.iter().product::<usize>() / k_dim
    };

    let a_2d = as_matrix(&a.data_ref(), m_dim, k_dim)?;
    let b_2d = b.data_ref().view().into_dimensionality::<Ix2>()?.to_owned();

    let mut res = Array2::<f32>::zeros((m_dim, n_dim));
    general_mat_mul(1.0, &a_2d, &b_2d.t(), 0.0, &mut res);

    let mut out_shape = a_shape.clone();
    let last = out_shape.len() - 1;
    out_shape[last] = n_dim;
    let result = res.into_shape_with_order(out_shape)?.into_dyn();

    let (a_clone, b_clone) = (a.clone(), b.clone());
    Ok(Tensor::from_op(result, vec![a.clone(), b.clone()], move |grad| {
        let grad_2d = as_matrix(grad, m_dim, n_dim)?;

        if a_clone.requires_grad() {
            // dA = dY @ B -> [M, K]
            let mut da = Array2::<f32>::zeros((m_dim, k_dim));
            general_mat_mul(1.0, &grad_2d, &b_2d, 0.0, &mut da);
            a_clone.add_grad(da.into_shape_with_order(a_shape.clone())?.into_dyn())?;
        }

        if b_clone.requires_grad() {
            // dB = dY^T @ A -> [N, K]
            let mut db = Array2::<f32>::zeros((n_dim, k_dim));
            general_mat_mul(1.0, &grad_2d.t(), &a_2d, 0.0, &mut db);
            b_clone.add_grad(db.into_dyn())?;
        }
        Ok(())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::sum;

    #[test]
    fn contracts_last_dimension() {
        // [[1,2],[3,4]] @ ones(3,2)^T
        let x = Tensor::from_vec(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let w = Tensor::new(ArrayD::ones(vec![3, 2]));
        let y = matmul(&x, &w).unwrap();
        assert_eq!(y.shape(), vec![2, 3]);
        assert_eq!(y.to_vec(), vec![3.0, 3.0, 3.0, 7.0, 7.0, 7.0]);
    }

    #[test]
    fn keeps_leading_dimensions() {
        let x = Tensor::new(ArrayD::ones(vec![2, 5, 4]));
        let w = Tensor::new(ArrayD::ones(vec![6, 4]));
        assert_eq!(matmul(&x, &w).unwrap().shape(), vec![2, 5, 6]);
    }

    #[test]
    fn rejects_mismatched_inner_dimension() {
        let x = Tensor::new(ArrayD::ones(vec![2, 3]));
        let w = Tensor::new(ArrayD::ones(vec![4, 2]));
        assert!(matches!(matmul(&x, &w), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn gradients_flow_to_both_sides() {
        let x = Tensor::parameter(ndarray::arr2(&[[1.0f32, 2.0]]).into_dyn());
        let w = Tensor::parameter(ndarray::arr2(&[[3.0f32, 4.0], [5.0, 6.0]]).into_dyn());
        sum(&matmul(&x, &w).unwrap()).backward().unwrap();
        // dX = ones(1,2) @ W = [8, 10]; dW = ones(2,1) @ X = [[1,2],[1,2]]
        assert_eq!(x.grad().unwrap().iter().copied().collect::<Vec<_>>(), vec![8.0, 10.0]);
        assert_eq!(
            w.grad().unwrap().iter().copied().collect::<Vec<_>>(),
            vec![1.0, 2.0, 1.0, 2.0]
        );
    }
}
