use serde::{Deserialize, Serialize};

use crate::autograd::Tensor;
use crate::block::{single_input, single_shape, Block, BlockCore};
use crate::context::Context;
use crate::error::Result;
use crate::ops;
use crate::shape::Shape;

/// Element-wise nonlinearity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationKind {
    Relu,
    Sigmoid,
    Tanh,
}

impl ActivationKind {
    pub fn name(self) -> &'static str {
        match self {
            ActivationKind::Relu => "relu",
            ActivationKind::Sigmoid => "sigmoid",
            ActivationKind::Tanh => "tanh",
        }
    }

    pub fn apply(self, x: &Tensor) -> Tensor {
        match self {
            ActivationKind::Relu => ops::relu(x),
            ActivationKind::Sigmoid => ops::sigmoid(x),
            ActivationKind::Tanh => ops::tanh(x),
        }
    }
}

/// Parameterless block applying an [`ActivationKind`].
pub struct Activation {
    core: BlockCore,
    kind: ActivationKind,
}

impl Activation {
    pub fn new(kind: ActivationKind) -> Self {
        Self {
            core: BlockCore::new(kind.name()),
            kind,
        }
    }

    pub fn relu() -> Self {
        Self::new(ActivationKind::Relu)
    }

    pub fn sigmoid() -> Self {
        Self::new(ActivationKind::Sigmoid)
    }

    pub fn tanh() -> Self {
        Self::new(ActivationKind::Tanh)
    }

    pub fn kind(&self) -> ActivationKind {
        self.kind
    }
}

impl Block for Activation {
    fn core(&self) -> &BlockCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BlockCore {
        &mut self.core
    }

    fn forward(&self, _ctx: &mut Context, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let x = single_input(inputs, self.kind.name())?;
        Ok(vec![self.kind.apply(x)])
    }

    fn output_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>> {
        Ok(vec![single_shape(inputs, self.kind.name())?.clone()])
    }
}
