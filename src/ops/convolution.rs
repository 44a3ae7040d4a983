use crate::autograd::Tensor;
use crate::error::{Error, Result};
use ndarray::{Array2, Array3, Axis, Zip};
use rayon::prelude::*;

/// Output extent of one spatial axis, `None` if the kernel does not fit.
pub fn conv_output_size(input: usize, kernel: usize, stride: usize, padding: usize) -> Option<usize> {
    let padded = input + 2 * padding;
    if stride == 0 || kernel == 0 || padded < kernel {
        return None;
    }
    Some((padded - kernel) / stride + 1)
}

fn unravel(mut flat: usize, dims: &[usize]) -> Vec<usize> {
    let mut idx = vec![0; dims.len()];
    for (i, &d) in dims.iter().enumerate().rev() {
        idx[i] = flat % d;
        flat /= d;
    }
    idx
}

struct ConvGeometry {
    batch: usize,
    channels: usize,
    filters: usize,
    in_spatial: Vec<usize>,
    kernel: Vec<usize>,
    stride: Vec<usize>,
    padding: Vec<usize>,
    out_spatial: Vec<usize>,
}

impl ConvGeometry {
    fn new(x: &[usize], w: &[usize], stride: &[usize], padding: &[usize]) -> Result<Self> {
        let dims = x.len().saturating_sub(2);
        if dims == 0 || w.len() != x.len() {
            return Err(Error::shape_mismatch("conv weight", "[F, C, K...] matching input rank", w));
        }
        if stride.len() != dims || padding.len() != dims {
            return Err(Error::invalid_argument(format!(
                "conv: stride {stride:?} and padding {padding:?} need {dims} entries"
            )));
        }
        if x[1] != w[1] {
            return Err(Error::shape_mismatch("conv input channels", w[1], x[1]));
        }

        let in_spatial = x[2..].to_vec();
        let kernel = w[2..].to_vec();
        let out_spatial = (0..dims)
            .map(|i| {
                conv_output_size(in_spatial[i], kernel[i], stride[i], padding[i]).ok_or_else(|| {
                    Error::shape_mismatch(
                        "conv spatial extent",
                        format!("at least kernel {kernel:?}"),
                        x,
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            batch: x[0],
            channels: x[1],
            filters: w[0],
            in_spatial,
            kernel,
            stride: stride.to_vec(),
            padding: padding.to_vec(),
            out_spatial,
        })
    }

    fn rows(&self) -> usize {
        self.channels * self.kernel.iter().product::<usize>()
    }

    fn cols(&self) -> usize {
        self.out_spatial.iter().product()
    }

    fn sample_len(&self) -> usize {
        self.channels * self.in_spatial.iter().product::<usize>()
    }

    // table[row * cols + col] = offset into one input sample, None inside the padding
    fn index_table(&self) -> Vec<Option<usize>> {
        let (rows, cols) = (self.rows(), self.cols());
        let k_len: usize = self.kernel.iter().product();
        let s_len: usize = self.in_spatial.iter().product();
        let out_idx: Vec<Vec<usize>> = (0..cols).map(|c| unravel(c, &self.out_spatial)).collect();

        let mut table = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            let (channel, k_flat) = (row / k_len, row % k_len);
            let k_idx = unravel(k_flat, &self.kernel);
            for o_idx in &out_idx {
                let mut offset = 0;
                let mut inside = true;
                for d in 0..k_idx.len() {
                    let pos = (o_idx[d] * self.stride[d] + k_idx[d]) as isize - self.padding[d] as isize;
                    if pos < 0 || pos as usize >= self.in_spatial[d] {
                        inside = false;
                        break;
                    }
                    offset = offset * self.in_spatial[d] + pos as usize;
                }
                table.push(inside.then_some(channel * s_len + offset));
            }
        }
        table
    }
}

fn im2col(sample: &[f32], table: &[Option<usize>], rows: usize, cols: usize) -> Array2<f32> {
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        table[r * cols + c].map_or(0.0, |i| sample[i])
    })
}

/// N-d cross-correlation over `[N, C, S...]` with weight `[F, C, K...]`.
pub fn conv_nd(
    input: &Tensor,
    weight: &Tensor,
    bias: Option<&Tensor>,
    stride: &[usize],
    padding: &[usize],
) -> Result<Tensor> {
    let (x_shape, w_shape) = (input.shape(), weight.shape());
    let geo = ConvGeometry::new(&x_shape, &w_shape, stride, padding)?;
    let (rows, cols, len) = (geo.rows(), geo.cols(), geo.sample_len());
    let (batch, filters) = (geo.batch, geo.filters);

    if let Some(b) = bias {
        if b.shape() != [filters] {
            return Err(Error::shape_mismatch("conv bias", [filters], b.shape()));
        }
    }

    let table = geo.index_table();
    let x_flat: Vec<f32> = input.data_ref().iter().copied().collect();
    let w_col = weight.data_ref().to_shape((filters, rows))?.into_owned();

    let mut output = Array3::<f32>::zeros((batch, filters, cols));
    Zip::indexed(output.outer_iter_mut()).par_for_each(|i, mut out_sample| {
        let col = im2col(&x_flat[i * len..(i + 1) * len], &table, rows, cols);
        out_sample.assign(&w_col.dot(&col));
    });

    if let Some(b) = bias {
        let b = b.data_ref().to_shape((filters, 1))?.into_owned();
        output += &b;
    }

    let mut out_shape = vec![batch, filters];
    out_shape.extend_from_slice(&geo.out_spatial);
    let data = output.into_shape_with_order(out_shape)?;

    let mut parents = vec![input.clone(), weight.clone()];
    parents.extend(bias.cloned());
    let (x, w, b) = (input.clone(), weight.clone(), bias.cloned());
    Ok(Tensor::from_op(data, parents, move |grad| {
        let g3 = grad.to_shape((batch, filters, cols))?;

        if x.requires_grad() {
            // dX_col = W^T @ dY, scattered back through the index table
            let w_t = w_col.t();
            let mut dx = Array2::<f32>::zeros((batch, len));
            Zip::from(dx.outer_iter_mut())
                .and(g3.outer_iter())
                .par_for_each(|mut dx_sample, g_sample| {
                    let d_col = w_t.dot(&g_sample);
                    for (k, entry) in table.iter().enumerate() {
                        if let Some(i) = entry {
                            dx_sample[*i] += d_col[[k / cols, k % cols]];
                        }
                    }
                });
            x.add_grad(dx.into_shape_with_order(x_shape.clone())?)?;
        }

        if w.requires_grad() {
            // dW = sum_n dY_n @ X_col_n^T
            let dw = (0..batch)
                .into_par_iter()
                .map(|i| {
                    let col = im2col(&x_flat[i * len..(i + 1) * len], &table, rows, cols);
                    g3.index_axis(Axis(0), i).dot(&col.t())
                })
                .reduce(|| Array2::zeros((filters, rows)), |a, b| a + b);
            w.add_grad(dw.into_shape_with_order(w_shape.clone())?)?;
        }

        if let Some(b) = &b {
            b.add_grad(g3.sum_axis(Axis(2)).sum_axis(Axis(0)).into_dyn())?;
        }
        Ok(())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::sum;
    use ndarray::ArrayD;

    const INPUT: [f32; 16] = [9., 8., 3., 6., 1., 4., 9., 7., 5., 11., 2., 5., 13., 10., 8., 4.];

    #[test]
    fn output_size_formula() {
        assert_eq!(conv_output_size(4, 2, 1, 0), Some(3));
        assert_eq!(conv_output_size(5, 3, 2, 1), Some(3));
        assert_eq!(conv_output_size(1, 3, 1, 0), None);
        assert_eq!(conv_output_size(4, 2, 0, 0), None);
    }

    #[test]
    fn conv1d_sums_channels() {
        let x = Tensor::from_vec(&[1, 4, 4], INPUT.to_vec()).unwrap();
        let w = Tensor::new(ArrayD::ones(vec![1, 4, 2]));
        let y = conv_nd(&x, &w, None, &[1], &[0]).unwrap();
        assert_eq!(y.shape(), vec![1, 1, 3]);
        assert_eq!(y.to_vec(), vec![61.0, 55.0, 44.0]);
    }

    #[test]
    fn conv2d_window_sums() {
        let x = Tensor::from_vec(&[1, 1, 4, 4], INPUT.to_vec()).unwrap();
        let w = Tensor::new(ArrayD::ones(vec![1, 1, 2, 2]));
        let y = conv_nd(&x, &w, None, &[1, 1], &[0, 0]).unwrap();
        assert_eq!(y.shape(), vec![1, 1, 3, 3]);
        assert_eq!(
            y.to_vec(),
            vec![22.0, 24.0, 25.0, 21.0, 26.0, 23.0, 39.0, 31.0, 19.0]
        );
    }

    #[test]
    fn padding_and_stride() {
        let x = Tensor::from_vec(&[1, 1, 3], vec![1.0, 2.0, 3.0]).unwrap();
        let w = Tensor::new(ArrayD::ones(vec![1, 1, 3]));
        let y = conv_nd(&x, &w, None, &[2], &[1]).unwrap();
        // windows [0,1,2] and [2,3,0]
        assert_eq!(y.to_vec(), vec![3.0, 5.0]);
    }

    #[test]
    fn bias_is_added_per_filter() {
        let x = Tensor::from_vec(&[1, 1, 2], vec![1.0, 2.0]).unwrap();
        let w = Tensor::new(ArrayD::ones(vec![2, 1, 1]));
        let b = Tensor::from_vec(&[2], vec![10.0, 20.0]).unwrap();
        let y = conv_nd(&x, &w, Some(&b), &[1], &[0]).unwrap();
        assert_eq!(y.to_vec(), vec![11.0, 12.0, 21.0, 22.0]);
    }

    #[test]
    fn rejects_channel_mismatch() {
        let x = Tensor::zeros(&[1, 3, 4]);
        let w = Tensor::new(ArrayD::ones(vec![1, 2, 2]));
        assert!(matches!(
            conv_nd(&x, &w, None, &[1], &[0]),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn gradients_match_window_counts() {
        let x = Tensor::parameter(ArrayD::ones(vec![1, 1, 3]));
        let w = Tensor::parameter(ArrayD::ones(vec![1, 1, 2]));
        let b = Tensor::parameter(ArrayD::zeros(vec![1]));
        sum(&conv_nd(&x, &w, Some(&b), &[1], &[0]).unwrap()).backward().unwrap();
        // middle input appears in both windows
        assert_eq!(x.grad().unwrap().iter().copied().collect::<Vec<_>>(), vec![1.0, 2.0, 1.0]);
        assert_eq!(w.grad().unwrap().iter().copied().collect::<Vec<_>>(), vec![2.0, 2.0]);
        assert_eq!(b.grad().unwrap().iter().copied().collect::<Vec<_>>(), vec![2.0]);
    }
}
