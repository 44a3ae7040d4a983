//! Recurrent layers over `(batch, time, features)` input.
//!
//! Every stacked layer `l` owns `l{l}_i2h_weight` `[G*H, C]`, `l{l}_i2h_bias`
//! `[G*H]`, `l{l}_h2h_weight` `[G*H, H]` and `l{l}_h2h_bias` `[G*H]`, where `H`
//! is the state size, `C` the layer's input width and `G` the number of gates
//! (1 for RNN, 4 for LSTM, 3 for GRU).

pub mod gru;
pub mod lstm;
pub mod rnn;

pub use gru::GRU;
pub use lstm::LSTM;
pub use rnn::RNN;

use crate::autograd::Tensor;
use crate::block::{single_input, single_shape, BlockCore};
use crate::error::{Error, Result};
use crate::layers::activation::ActivationKind;
use crate::ops::{add, matmul, select, stack};
use crate::parameter::{Parameter, ParameterKind};
use crate::shape::Shape;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CellKind {
    Rnn(ActivationKind),
    Lstm,
    Gru,
}

impl CellKind {
    fn gates(self) -> usize {
        match self {
            CellKind::Rnn(_) => 1,
            CellKind::Lstm => 4,
            CellKind::Gru => 3,
        }
    }

    fn name(self) -> &'static str {
        match self {
            CellKind::Rnn(_) => "rnn",
            CellKind::Lstm => "lstm",
            CellKind::Gru => "gru",
        }
    }
}

struct LayerParameters {
    i2h_weight: Parameter,
    i2h_bias: Parameter,
    h2h_weight: Parameter,
    h2h_bias: Parameter,
}

/// Per-step state carried through time.
pub(crate) struct CellState {
    pub h: Tensor,
    pub c: Option<Tensor>,
}

/// Shared implementation behind [`RNN`], [`LSTM`] and [`GRU`].
pub(crate) struct Recurrent {
    pub(crate) core: BlockCore,
    kind: CellKind,
    state_size: usize,
    num_layers: usize,
    return_state: bool,
    layers: Vec<LayerParameters>,
}

impl Recurrent {
    pub(crate) fn new(kind: CellKind, state_size: usize, num_layers: usize) -> Result<Self> {
        if state_size == 0 || num_layers == 0 {
            return Err(Error::invalid_config(format!(
                "{} needs a positive state size and layer count",
                kind.name()
            )));
        }
        let mut core = BlockCore::new(kind.name());
        let layers = (0..num_layers)
            .map(|l| LayerParameters {
                i2h_weight: core.add_parameter(&format!("l{l}_i2h_weight"), ParameterKind::Weight),
                i2h_bias: core.add_parameter(&format!("l{l}_i2h_bias"), ParameterKind::Bias),
                h2h_weight: core.add_parameter(&format!("l{l}_h2h_weight"), ParameterKind::Weight),
                h2h_bias: core.add_parameter(&format!("l{l}_h2h_bias"), ParameterKind::Bias),
            })
            .collect();
        Ok(Self {
            core,
            kind,
            state_size,
            num_layers,
            return_state: false,
            layers,
        })
    }

    pub(crate) fn set_return_state(&mut self, return_state: bool) {
        self.return_state = return_state;
    }

    pub(crate) fn state_size(&self) -> usize {
        self.state_size
    }

    pub(crate) fn num_layers(&self) -> usize {
        self.num_layers
    }

    fn input_features(&self, inputs: &[Shape]) -> Result<usize> {
        let shape = single_shape(inputs, self.kind.name())?;
        shape.expect_rank(3, "recurrent input (batch, time, features)")?;
        shape.require_dim(2, self.kind.name())
    }

    pub(crate) fn output_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>> {
        self.input_features(inputs)?;
        let shape = &inputs[0];
        let time = shape.require_dim(1, self.kind.name())?;
        let mut out = vec![shape.with_tail(&[time, self.state_size])];
        if self.return_state {
            let batch = shape.batch().ok_or_else(|| {
                Error::invalid_argument(format!(
                    "{} state shapes need a concrete batch size",
                    self.kind.name()
                ))
            })?;
            let state = Shape::new(&[self.num_layers, batch, self.state_size]);
            out.push(state.clone());
            if self.kind == CellKind::Lstm {
                out.push(state);
            }
        }
        Ok(out)
    }

    pub(crate) fn parameter_shape(&self, name: &str, inputs: &[Shape]) -> Result<Vec<usize>> {
        let unknown = || Error::invalid_argument(format!("{} has no parameter `{name}`", self.kind.name()));
        let (layer, field) = name
            .strip_prefix('l')
            .and_then(|rest| rest.split_once('_'))
            .ok_or_else(unknown)?;
        let layer: usize = layer.parse().map_err(|_| unknown())?;
        if layer >= self.num_layers {
            return Err(unknown());
        }

        let rows = self.kind.gates() * self.state_size;
        let width = if layer == 0 {
            self.input_features(inputs)?
        } else {
            self.state_size
        };
        match field {
            "i2h_weight" => Ok(vec![rows, width]),
            "h2h_weight" => Ok(vec![rows, self.state_size]),
            "i2h_bias" | "h2h_bias" => Ok(vec![rows]),
            _ => Err(unknown()),
        }
    }

    pub(crate) fn forward(
        &self,
        inputs: &[Tensor],
        step: impl Fn(&Tensor, &Tensor, &CellState) -> Result<CellState>,
    ) -> Result<Vec<Tensor>> {
        let x = single_input(inputs, self.kind.name())?;
        let shape = x.shape();
        if shape.len() != 3 {
            return Err(Error::shape_mismatch(
                "recurrent input",
                "(batch, time, features)",
                shape,
            ));
        }
        let (batch, time) = (shape[0], shape[1]);

        let mut sequence = x.clone();
        let mut final_h = Vec::with_capacity(self.num_layers);
        let mut final_c = Vec::with_capacity(self.num_layers);
        for layer in &self.layers {
            let i2h_all = add(
                &matmul(&sequence, &layer.i2h_weight.tensor()?)?,
                &layer.i2h_bias.tensor()?,
            )?;
            let (h2h_weight, h2h_bias) = (layer.h2h_weight.tensor()?, layer.h2h_bias.tensor()?);

            let mut state = CellState {
                h: Tensor::zeros(&[batch, self.state_size]),
                c: (self.kind == CellKind::Lstm).then(|| Tensor::zeros(&[batch, self.state_size])),
            };
            let mut hs = Vec::with_capacity(time);
            for t in 0..time {
                let i2h = select(&i2h_all, 1, t)?;
                let h2h = add(&matmul(&state.h, &h2h_weight)?, &h2h_bias)?;
                state = step(&i2h, &h2h, &state)?;
                hs.push(state.h.clone());
            }

            sequence = if hs.is_empty() {
                Tensor::zeros(&[batch, 0, self.state_size])
            } else {
                stack(&hs, 1)?
            };
            final_h.push(state.h);
            final_c.extend(state.c);
        }

        let mut outputs = vec![sequence];
        if self.return_state {
            outputs.push(stack(&final_h, 0)?);
            if self.kind == CellKind::Lstm {
                outputs.push(stack(&final_c, 0)?);
            }
        }
        Ok(outputs)
    }
}

/// Implements [`Block`](crate::block::Block) for a wrapper holding a
/// `Recurrent` in `self.inner` and a `step` method.
macro_rules! recurrent_block {
    ($ty:ty) => {
        impl $crate::block::Block for $ty {
            fn core(&self) -> &$crate::block::BlockCore {
                &self.inner.core
            }

            fn core_mut(&mut self) -> &mut $crate::block::BlockCore {
                &mut self.inner.core
            }

            fn forward(
                &self,
                _ctx: &mut $crate::context::Context,
                inputs: &[$crate::autograd::Tensor],
            ) -> $crate::error::Result<Vec<$crate::autograd::Tensor>> {
                self.inner
                    .forward(inputs, |i2h, h2h, state| self.step(i2h, h2h, state))
            }

            fn output_shapes(
                &self,
                inputs: &[$crate::shape::Shape],
            ) -> $crate::error::Result<Vec<$crate::shape::Shape>> {
                self.inner.output_shapes(inputs)
            }

            fn parameter_shape(
                &self,
                name: &str,
                inputs: &[$crate::shape::Shape],
            ) -> $crate::error::Result<Vec<usize>> {
                self.inner.parameter_shape(name, inputs)
            }
        }
    };
}

pub(crate) use recurrent_block;
