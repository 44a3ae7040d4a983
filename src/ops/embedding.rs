use crate::autograd::Tensor;
use crate::error::{Error, Result};
use ndarray::{Array2, ArrayD, Axis, Ix2, Zip};

/// Looks up rows of `weight` (`[V, D]`) for every id in `indices`.
///
/// Ids are stored as `f32` and must be whole numbers in `0..V`. Output shape is
/// `indices.shape() + [D]`.
pub fn embedding(indices: &Tensor, weight: &Tensor) -> Result<Tensor> {
    let w_shape = weight.shape();
    if w_shape.len() != 2 {
        return Err(Error::shape_mismatch("embedding weight", "[V, D]", w_shape));
    }
    let (vocab, dim) = (w_shape[0], w_shape[1]);

    let ids = indices
        .data_ref()
        .iter()
        .map(|&v| {
            if v >= 0.0 && v.fract() == 0.0 && (v as usize) < vocab {
                Ok(v as usize)
            } else {
                Err(Error::invalid_argument(format!(
                    "embedding id {v} outside vocabulary of {vocab}"
                )))
            }
        })
        .collect::<Result<Vec<usize>>>()?;

    let w = weight.data_ref().view().into_dimensionality::<Ix2>()?.to_owned();
    let mut out = Array2::<f32>::zeros((ids.len(), dim));
    Zip::from(out.outer_iter_mut())
        .and(&ndarray::aview1(&ids))
        .par_for_each(|mut row, &id| row.assign(&w.row(id)));

    let mut out_shape = indices.shape();
    out_shape.push(dim);
    let data: ArrayD<f32> = out.into_shape_with_order(out_shape)?;

    let w_t = weight.clone();
    Ok(Tensor::from_op(data, vec![weight.clone()], move |grad| {
        let g = grad.to_shape((ids.len(), dim))?;
        let mut d_w = Array2::<f32>::zeros((vocab, dim));
        for (i, &id) in ids.iter().enumerate() {
            let mut row = d_w.row_mut(id);
            row += &g.index_axis(Axis(0), i);
        }
        w_t.add_grad(d_w.into_dyn())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::sum;

    #[test]
    fn gathers_rows() {
        let w = Tensor::from_vec(&[3, 2], vec![0.0, 1.0, 10.0, 11.0, 20.0, 21.0]).unwrap();
        let ids = Tensor::from_vec(&[2, 2], vec![2.0, 0.0, 1.0, 1.0]).unwrap();
        let y = embedding(&ids, &w).unwrap();
        assert_eq!(y.shape(), vec![2, 2, 2]);
        assert_eq!(y.to_vec(), vec![20.0, 21.0, 0.0, 1.0, 10.0, 11.0, 10.0, 11.0]);
    }

    #[test]
    fn rejects_out_of_range_ids() {
        let w = Tensor::zeros(&[3, 2]);
        let ids = Tensor::from_vec(&[1], vec![3.0]).unwrap();
        assert!(matches!(embedding(&ids, &w), Err(Error::InvalidArgument(_))));
        let ids = Tensor::from_vec(&[1], vec![0.5]).unwrap();
        assert!(embedding(&ids, &w).is_err());
    }

    #[test]
    fn repeated_ids_accumulate_gradient() {
        let w = Tensor::parameter(ArrayD::zeros(vec![3, 2]));
        let ids = Tensor::from_vec(&[3], vec![1.0, 1.0, 2.0]).unwrap();
        sum(&embedding(&ids, &w).unwrap()).backward().unwrap();
        assert_eq!(
            w.grad().unwrap().iter().copied().collect::<Vec<_>>(),
            vec![0.0, 0.0, 2.0, 2.0, 1.0, 1.0]
        );
    }
}
