use crate::autograd::Tensor;
use crate::block::{single_input, single_shape, Block, BlockCore};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::ops::{batch_norm, BatchNormSettings};
use crate::parameter::{Parameter, ParameterKind};
use crate::shape::Shape;

/// Batch normalization along one channel axis.
///
/// Training mode normalizes with batch statistics and folds them into the
/// running mean/variance; inference uses the running statistics.
pub struct BatchNorm {
    core: BlockCore,
    axis: usize,
    epsilon: f32,
    momentum: f32,
    gamma: Parameter,
    beta: Parameter,
    running_mean: Parameter,
    running_var: Parameter,
}

impl Default for BatchNorm {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchNorm {
    /// Axis 1, epsilon 1e-5, momentum 0.9.
    pub fn new() -> Self {
        let mut core = BlockCore::new("batch_norm");
        let gamma = core.add_parameter("gamma", ParameterKind::Gamma);
        let beta = core.add_parameter("beta", ParameterKind::Beta);
        let running_mean = core.add_parameter("running_mean", ParameterKind::RunningMean);
        let running_var = core.add_parameter("running_var", ParameterKind::RunningVar);
        Self {
            core,
            axis: 1,
            epsilon: 1e-5,
            momentum: 0.9,
            gamma,
            beta,
            running_mean,
            running_var,
        }
    }

    pub fn with_axis(mut self, axis: usize) -> Self {
        self.axis = axis;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn axis(&self) -> usize {
        self.axis
    }

    fn channels(&self, inputs: &[Shape]) -> Result<usize> {
        let shape = single_shape(inputs, "batch_norm")?;
        if self.axis == 0 || self.axis >= shape.rank() {
            return Err(Error::invalid_argument(format!(
                "batch_norm axis {} must be a non-batch axis of {shape}",
                self.axis
            )));
        }
        shape.require_dim(self.axis, "batch_norm")
    }
}

impl Block for BatchNorm {
    fn core(&self) -> &BlockCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BlockCore {
        &mut self.core
    }

    fn forward(&self, _ctx: &mut Context, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let x = single_input(inputs, "batch_norm")?;
        let settings = BatchNormSettings {
            axis: self.axis,
            epsilon: self.epsilon,
            momentum: self.momentum,
            training: self.is_training(),
        };
        let y = batch_norm(
            x,
            &self.gamma.tensor()?,
            &self.beta.tensor()?,
            &self.running_mean.tensor()?,
            &self.running_var.tensor()?,
            settings,
        )?;
        Ok(vec![y])
    }

    fn output_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>> {
        self.channels(inputs)?;
        Ok(vec![inputs[0].clone()])
    }

    fn parameter_shape(&self, name: &str, inputs: &[Shape]) -> Result<Vec<usize>> {
        match name {
            "gamma" | "beta" | "running_mean" | "running_var" => Ok(vec![self.channels(inputs)?]),
            _ => Err(Error::invalid_argument(format!("batch_norm has no parameter `{name}`"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init::Initializer;

    #[test]
    fn parameter_order_and_defaults() {
        let mut ctx = Context::seeded(0);
        let bn = BatchNorm::new();
        bn.initialize(&mut ctx, &Initializer::Constant { value: 7.0 }, &[Shape::new(&[2, 3])])
            .unwrap();
        let params = bn.parameters();
        assert_eq!(params.keys(), &["gamma", "beta", "running_mean", "running_var"]);
        let firsts: Vec<f32> = params.values().iter().map(|p| p.array().unwrap()[[0]]).collect();
        assert_eq!(firsts, vec![1.0, 0.0, 0.0, 1.0]);
        assert!(!params.values()[2].is_trainable());
    }

    #[test]
    fn batch_axis_is_rejected() {
        let bn = BatchNorm::new().with_axis(0);
        assert!(bn.output_shapes(&[Shape::new(&[2, 2])]).is_err());
    }
}
