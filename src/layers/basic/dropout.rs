use crate::autograd::Tensor;
use crate::block::{single_input, single_shape, Block, BlockCore};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::ops;
use crate::shape::Shape;

/// Randomly zeroes activations in training mode; identity otherwise.
pub struct Dropout {
    core: BlockCore,
    probability: f32,
}

impl Dropout {
    pub fn new(probability: f32) -> Result<Self> {
        if !(0.0..1.0).contains(&probability) {
            return Err(Error::invalid_config(format!(
                "dropout probability {probability} outside [0, 1)"
            )));
        }
        Ok(Self {
            core: BlockCore::new("dropout"),
            probability,
        })
    }

    pub fn probability(&self) -> f32 {
        self.probability
    }
}

impl Block for Dropout {
    fn core(&self) -> &BlockCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BlockCore {
        &mut self.core
    }

    fn forward(&self, ctx: &mut Context, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let x = single_input(inputs, "dropout")?;
        if self.is_training() {
            Ok(vec![ops::dropout(x, self.probability, ctx.rng_mut())?])
        } else {
            Ok(vec![x.clone()])
        }
    }

    fn output_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>> {
        Ok(vec![single_shape(inputs, "dropout")?.clone()])
    }
}
