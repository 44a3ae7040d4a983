use crate::autograd::Tensor;
use crate::error::Result;
use crate::layers::activation::ActivationKind;
use crate::ops::add;

use super::{recurrent_block, CellKind, CellState, Recurrent};

/// Elman recurrent network: `h' = act(x·W_i + b_i + h·W_h + b_h)`.
pub struct RNN {
    inner: Recurrent,
    activation: ActivationKind,
}

#[derive(Debug, Clone)]
pub struct RnnBuilder {
    state_size: usize,
    num_layers: usize,
    activation: ActivationKind,
    return_state: bool,
}

impl RnnBuilder {
    pub fn state_size(mut self, state_size: usize) -> Self {
        self.state_size = state_size;
        self
    }

    pub fn num_layers(mut self, num_layers: usize) -> Self {
        self.num_layers = num_layers;
        self
    }

    /// `Tanh` by default.
    pub fn activation(mut self, activation: ActivationKind) -> Self {
        self.activation = activation;
        self
    }

    /// Also output the final hidden state of every layer as `(layers, N, H)`.
    pub fn return_state(mut self, return_state: bool) -> Self {
        self.return_state = return_state;
        self
    }

    pub fn build(self) -> Result<RNN> {
        let mut inner = Recurrent::new(CellKind::Rnn(self.activation), self.state_size, self.num_layers)?;
        inner.set_return_state(self.return_state);
        Ok(RNN {
            inner,
            activation: self.activation,
        })
    }
}

impl RNN {
    pub fn builder() -> RnnBuilder {
        RnnBuilder {
            state_size: 0,
            num_layers: 1,
            activation: ActivationKind::Tanh,
            return_state: false,
        }
    }

    pub fn state_size(&self) -> usize {
        self.inner.state_size()
    }

    pub fn num_layers(&self) -> usize {
        self.inner.num_layers()
    }

    pub fn activation(&self) -> ActivationKind {
        self.activation
    }

    fn step(&self, i2h: &Tensor, h2h: &Tensor, _state: &CellState) -> Result<CellState> {
        Ok(CellState {
            h: self.activation.apply(&add(i2h, h2h)?),
            c: None,
        })
    }
}

recurrent_block!(RNN);
