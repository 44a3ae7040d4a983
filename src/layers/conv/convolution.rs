use crate::autograd::Tensor;
use crate::block::{single_input, single_shape, Block, BlockCore};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::ops::{conv_nd, conv_output_size};
use crate::parameter::{Parameter, ParameterKind};
use crate::shape::Shape;

/// Convolution over 1, 2 or 3 spatial axes.
///
/// Input is `(N, C, spatial...)`, weight is `[filters, C, kernel...]`, bias is
/// `[filters]`. Each spatial output extent is `(in + 2 * pad - k) / stride + 1`.
pub struct Conv {
    core: BlockCore,
    kernel: Vec<usize>,
    filters: usize,
    stride: Vec<usize>,
    padding: Vec<usize>,
    weight: Parameter,
    bias: Option<Parameter>,
}

/// Settings for a [`Conv`]; start from [`Conv::conv1d`], [`Conv::conv2d`] or
/// [`Conv::conv3d`].
#[derive(Debug, Clone)]
pub struct ConvBuilder {
    dims: usize,
    kernel: Vec<usize>,
    filters: usize,
    stride: Option<Vec<usize>>,
    padding: Option<Vec<usize>>,
    bias: bool,
}

impl ConvBuilder {
    fn new(dims: usize) -> Self {
        Self {
            dims,
            kernel: Vec::new(),
            filters: 0,
            stride: None,
            padding: None,
            bias: true,
        }
    }

    pub fn kernel(mut self, kernel: &[usize]) -> Self {
        self.kernel = kernel.to_vec();
        self
    }

    pub fn filters(mut self, filters: usize) -> Self {
        self.filters = filters;
        self
    }

    /// Defaults to 1 on every axis.
    pub fn stride(mut self, stride: &[usize]) -> Self {
        self.stride = Some(stride.to_vec());
        self
    }

    /// Zero padding on both sides of each axis; defaults to 0.
    pub fn padding(mut self, padding: &[usize]) -> Self {
        self.padding = Some(padding.to_vec());
        self
    }

    pub fn bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    pub fn build(self) -> Result<Conv> {
        let d = self.dims;
        let stride = self.stride.unwrap_or_else(|| vec![1; d]);
        let padding = self.padding.unwrap_or_else(|| vec![0; d]);
        if self.kernel.len() != d || stride.len() != d || padding.len() != d {
            return Err(Error::invalid_config(format!(
                "conv{d}d needs {d} kernel/stride/padding entries, got {:?}/{stride:?}/{padding:?}",
                self.kernel
            )));
        }
        if self.kernel.contains(&0) || stride.contains(&0) {
            return Err(Error::invalid_config("conv kernel and stride must be positive"));
        }
        if self.filters == 0 {
            return Err(Error::invalid_config("conv needs at least one filter"));
        }

        let mut core = BlockCore::new(format!("conv{d}d"));
        let weight = core.add_parameter("weight", ParameterKind::Weight);
        let bias = self
            .bias
            .then(|| core.add_parameter("bias", ParameterKind::Bias));
        Ok(Conv {
            core,
            kernel: self.kernel,
            filters: self.filters,
            stride,
            padding,
            weight,
            bias,
        })
    }
}

impl Conv {
    pub fn conv1d() -> ConvBuilder {
        ConvBuilder::new(1)
    }

    pub fn conv2d() -> ConvBuilder {
        ConvBuilder::new(2)
    }

    pub fn conv3d() -> ConvBuilder {
        ConvBuilder::new(3)
    }

    pub fn kernel(&self) -> &[usize] {
        &self.kernel
    }

    pub fn filters(&self) -> usize {
        self.filters
    }

    fn checked_input<'a>(&self, inputs: &'a [Shape]) -> Result<&'a Shape> {
        let shape = single_shape(inputs, self.name())?;
        shape.expect_rank(self.kernel.len() + 2, self.name())?;
        Ok(shape)
    }
}

impl Block for Conv {
    fn core(&self) -> &BlockCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BlockCore {
        &mut self.core
    }

    fn forward(&self, _ctx: &mut Context, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let x = single_input(inputs, self.name())?;
        let bias = self.bias.as_ref().map(Parameter::tensor).transpose()?;
        let y = conv_nd(
            x,
            &self.weight.tensor()?,
            bias.as_ref(),
            &self.stride,
            &self.padding,
        )?;
        Ok(vec![y])
    }

    fn output_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>> {
        let shape = self.checked_input(inputs)?;
        let mut tail = vec![self.filters];
        for (i, &k) in self.kernel.iter().enumerate() {
            let extent = shape.require_dim(i + 2, self.name())?;
            let out = conv_output_size(extent, k, self.stride[i], self.padding[i]).ok_or_else(|| {
                Error::shape_mismatch(
                    format!("{} spatial axis {i}", self.name()),
                    format!("at least {k} after padding"),
                    extent,
                )
            })?;
            tail.push(out);
        }
        Ok(vec![shape.with_tail(&tail)])
    }

    fn parameter_shape(&self, name: &str, inputs: &[Shape]) -> Result<Vec<usize>> {
        match name {
            "weight" => {
                let shape = self.checked_input(inputs)?;
                let mut dims = vec![self.filters, shape.require_dim(1, self.name())?];
                dims.extend_from_slice(&self.kernel);
                Ok(dims)
            }
            "bias" => Ok(vec![self.filters]),
            _ => Err(Error::invalid_argument(format!(
                "{} has no parameter `{name}`",
                self.name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init::Initializer;

    #[test]
    fn builder_validates_rank() {
        assert!(Conv::conv2d().kernel(&[2]).filters(1).build().is_err());
        assert!(Conv::conv1d().kernel(&[2]).filters(0).build().is_err());
        assert!(Conv::conv1d().kernel(&[2]).filters(1).stride(&[0]).build().is_err());
    }

    #[test]
    fn weight_shape_uses_input_channels() {
        let mut ctx = Context::seeded(0);
        let c = Conv::conv2d().kernel(&[3, 2]).filters(5).build().unwrap();
        let out = c
            .initialize(&mut ctx, &Initializer::Ones, &[Shape::new(&[1, 3, 6, 6])])
            .unwrap();
        assert_eq!(out, vec![Shape::new(&[1, 5, 4, 5])]);
        assert_eq!(c.parameters().values()[0].shape(), Some(vec![5, 3, 3, 2]));
        assert_eq!(c.parameters().values()[1].shape(), Some(vec![5]));
    }

    #[test]
    fn stride_and_padding_shape() {
        let c = Conv::conv1d()
            .kernel(&[3])
            .filters(2)
            .stride(&[2])
            .padding(&[1])
            .bias(false)
            .build()
            .unwrap();
        let out = c.output_shapes(&[Shape::with_unknown_batch(&[4, 7])]).unwrap();
        assert_eq!(out, vec![Shape::with_unknown_batch(&[2, 4])]);
        assert_eq!(c.parameters().len(), 1);
    }

    #[test]
    fn rejects_wrong_rank_input() {
        let c = Conv::conv1d().kernel(&[2]).filters(1).build().unwrap();
        assert!(c.output_shapes(&[Shape::new(&[1, 1, 4, 4])]).is_err());
    }
}
