use crate::autograd::Tensor;
use crate::error::Result;
use crate::ops::{add, mul, sigmoid, slice_last_dim, sub, tanh};

use super::{recurrent_block, CellKind, CellState, Recurrent};

/// Gated recurrent unit.
///
/// Gate rows are laid out reset, update, new. The reset gate scales the
/// hidden projection of the new gate, including its bias:
/// `n = tanh(x·W_n + b_in + r⊙(h·U_n + b_hn))`, `h' = (1 - z)⊙n + z⊙h`.
pub struct GRU {
    inner: Recurrent,
}

#[derive(Debug, Clone)]
pub struct GruBuilder {
    state_size: usize,
    num_layers: usize,
    return_state: bool,
}

impl GruBuilder {
    pub fn state_size(mut self, state_size: usize) -> Self {
        self.state_size = state_size;
        self
    }

    pub fn num_layers(mut self, num_layers: usize) -> Self {
        self.num_layers = num_layers;
        self
    }

    pub fn return_state(mut self, return_state: bool) -> Self {
        self.return_state = return_state;
        self
    }

    pub fn build(self) -> Result<GRU> {
        let mut inner = Recurrent::new(CellKind::Gru, self.state_size, self.num_layers)?;
        inner.set_return_state(self.return_state);
        Ok(GRU { inner })
    }
}

impl GRU {
    pub fn builder() -> GruBuilder {
        GruBuilder {
            state_size: 0,
            num_layers: 1,
            return_state: false,
        }
    }

    pub fn state_size(&self) -> usize {
        self.inner.state_size()
    }

    pub fn num_layers(&self) -> usize {
        self.inner.num_layers()
    }

    fn step(&self, i2h: &Tensor, h2h: &Tensor, state: &CellState) -> Result<CellState> {
        let h = self.state_size();
        let gate = |start: usize| -> Result<Tensor> {
            Ok(sigmoid(&add(
                &slice_last_dim(i2h, start, start + h)?,
                &slice_last_dim(h2h, start, start + h)?,
            )?))
        };
        let reset = gate(0)?;
        let update = gate(h)?;
        let new = tanh(&add(
            &slice_last_dim(i2h, 2 * h, 3 * h)?,
            &mul(&reset, &slice_last_dim(h2h, 2 * h, 3 * h)?)?,
        )?);
        // (1 - z)⊙n + z⊙h  ==  n + z⊙(h - n)
        let next = add(&new, &mul(&update, &sub(&state.h, &new)?)?)?;
        Ok(CellState { h: next, c: None })
    }
}

recurrent_block!(GRU);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::context::Context;
    use crate::init::Initializer;
    use crate::shape::Shape;
    use approx::assert_abs_diff_eq;

    fn sigmoid(x: f32) -> f32 {
        1.0 / (1.0 + (-x).exp())
    }

    #[test]
    fn ones_weights_match_closed_form() {
        let mut ctx = Context::seeded(0);
        let gru = GRU::builder().state_size(3).return_state(true).build().unwrap();
        gru.initialize(&mut ctx, &Initializer::Ones, &[Shape::new(&[1, 2, 2])])
            .unwrap();
        assert_eq!(gru.parameters().values()[0].shape(), Some(vec![9, 2]));

        let x = Tensor::from_vec(&[1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let out = gru.forward(&mut ctx, &[x]).unwrap();

        let z1 = sigmoid(3.0);
        let h1 = (1.0 - z1) * 3.0f32.tanh();
        let r2 = sigmoid(7.0 + 3.0 * h1);
        let n2 = (7.0 + r2 * 3.0 * h1).tanh();
        let h2 = (1.0 - r2) * n2 + r2 * h1;

        let seq = out[0].to_vec();
        for v in &seq[..3] {
            assert_abs_diff_eq!(*v, h1, epsilon = 1e-5);
        }
        for v in &seq[3..] {
            assert_abs_diff_eq!(*v, h2, epsilon = 1e-5);
        }
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].shape(), vec![1, 1, 3]);
    }

    #[test]
    fn rejects_rank_two_input() {
        let gru = GRU::builder().state_size(2).build().unwrap();
        assert!(gru.output_shapes(&[Shape::new(&[4, 3])]).is_err());
    }
}
