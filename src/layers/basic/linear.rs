use crate::autograd::Tensor;
use crate::block::{single_input, single_shape, Block, BlockCore};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::ops::{add, matmul};
use crate::parameter::{Parameter, ParameterKind};
use crate::shape::Shape;

/// Fully connected layer over the last axis: `y = x · Wᵀ + b`.
///
/// `weight` is `[units, in]` and `bias` is `[units]`.
pub struct Linear {
    core: BlockCore,
    units: usize,
    weight: Parameter,
    bias: Option<Parameter>,
}

impl Linear {
    pub fn new(units: usize) -> Self {
        let mut core = BlockCore::new("linear");
        let weight = core.add_parameter("weight", ParameterKind::Weight);
        let bias = Some(core.add_parameter("bias", ParameterKind::Bias));
        Self {
            core,
            units,
            weight,
            bias,
        }
    }

    pub fn without_bias(self) -> Self {
        let mut core = BlockCore::new("linear");
        core.push_parameter(self.weight.clone());
        Self {
            core,
            bias: None,
            ..self
        }
    }

    pub fn units(&self) -> usize {
        self.units
    }

    pub fn has_bias(&self) -> bool {
        self.bias.is_some()
    }

    fn in_features(inputs: &[Shape]) -> Result<usize> {
        let shape = single_shape(inputs, "linear")?;
        if shape.rank() < 2 {
            return Err(Error::shape_mismatch("linear input", "(batch, ..., in)", shape.to_string()));
        }
        shape.require_dim(shape.rank() - 1, "linear input")
    }
}

impl Block for Linear {
    fn core(&self) -> &BlockCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BlockCore {
        &mut self.core
    }

    fn forward(&self, _ctx: &mut Context, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let x = single_input(inputs, "linear")?;
        let y = matmul(x, &self.weight.tensor()?)?;
        let y = match &self.bias {
            Some(b) => add(&y, &b.tensor()?)?,
            None => y,
        };
        Ok(vec![y])
    }

    fn output_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>> {
        Self::in_features(inputs)?;
        let shape = &inputs[0];
        let mut tail = shape.tail().to_vec();
        if let Some(last) = tail.last_mut() {
            *last = self.units;
        }
        Ok(vec![shape.with_tail(&tail)])
    }

    fn parameter_shape(&self, name: &str, inputs: &[Shape]) -> Result<Vec<usize>> {
        match name {
            "weight" => Ok(vec![self.units, Self::in_features(inputs)?]),
            "bias" => Ok(vec![self.units]),
            _ => Err(Error::invalid_argument(format!("linear has no parameter `{name}`"))),
        }
    }
}
