use crate::autograd::Tensor;
use crate::error::{Error, Result};
use crate::ops::{add, mul, sigmoid, slice_last_dim, tanh};

use super::{recurrent_block, CellKind, CellState, Recurrent};

/// Long short-term memory network.
///
/// Gate rows are laid out input, forget, cell, output:
/// `c' = f⊙c + i⊙g`, `h' = o⊙tanh(c')`. With `return_state` the block also
/// outputs the final hidden and cell states, each `(layers, N, H)`.
pub struct LSTM {
    inner: Recurrent,
}

#[derive(Debug, Clone)]
pub struct LstmBuilder {
    state_size: usize,
    num_layers: usize,
    return_state: bool,
}

impl LstmBuilder {
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

    pub fn build(self) -> Result<LSTM> {
        let mut inner = Recurrent::new(CellKind::Lstm, self.state_size, self.num_layers)?;
        inner.set_return_state(self.return_state);
        Ok(LSTM { inner })
    }
}

impl LSTM {
    pub fn builder() -> LstmBuilder {
        LstmBuilder {
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
        let gates = add(i2h, h2h)?;
        let input = sigmoid(&slice_last_dim(&gates, 0, h)?);
        let forget = sigmoid(&slice_last_dim(&gates, h, 2 * h)?);
        let candidate = tanh(&slice_last_dim(&gates, 2 * h, 3 * h)?);
        let output = sigmoid(&slice_last_dim(&gates, 3 * h, 4 * h)?);

        let c = state
            .c
            .as_ref()
            .ok_or_else(|| Error::uninitialized("lstm cell state"))?;
        let c = add(&mul(&forget, c)?, &mul(&input, &candidate)?)?;
        Ok(CellState {
            h: mul(&output, &tanh(&c))?,
            c: Some(c),
        })
    }
}

recurrent_block!(LSTM);
