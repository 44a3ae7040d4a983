use crate::autograd::Tensor;
use crate::block::{single_input, single_shape, Block, BlockCore};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::ops;
use crate::parameter::{Parameter, ParameterKind};
use crate::shape::Shape;

/// Lookup table mapping integer ids to dense vectors.
///
/// Input holds ids of any shape as `f32`, exact only below 2^24; output
/// appends an axis of `embedding_size`. `weight` is
/// `[num_embeddings, embedding_size]`. Clones share the weight.
#[derive(Clone)]
pub struct Embedding {
    core: BlockCore,
    num_embeddings: usize,
    embedding_size: usize,
    weight: Parameter,
}

impl Embedding {
    pub fn new(num_embeddings: usize, embedding_size: usize) -> Self {
        let mut core = BlockCore::new("embedding");
        let weight = core.add_parameter("weight", ParameterKind::Weight);
        Self {
            core,
            num_embeddings,
            embedding_size,
            weight,
        }
    }

    pub fn num_embeddings(&self) -> usize {
        self.num_embeddings
    }

    pub fn embedding_size(&self) -> usize {
        self.embedding_size
    }

    pub fn weight(&self) -> &Parameter {
        &self.weight
    }

    /// Vector for each id, without recording gradients against the input.
    pub fn embed(&self, ids: &Tensor) -> Result<Tensor> {
        ops::embedding(ids, &self.weight.tensor()?)
    }
}

impl Block for Embedding {
    fn core(&self) -> &BlockCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BlockCore {
        &mut self.core
    }

    fn forward(&self, _ctx: &mut Context, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        Ok(vec![self.embed(single_input(inputs, "embedding")?)?])
    }

    fn output_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>> {
        let shape = single_shape(inputs, "embedding")?;
        if shape.rank() == 0 {
            return Ok(vec![Shape::new(&[self.embedding_size])]);
        }
        let mut tail = shape.tail().to_vec();
        tail.push(self.embedding_size);
        Ok(vec![shape.with_tail(&tail)])
    }

    fn parameter_shape(&self, name: &str, _inputs: &[Shape]) -> Result<Vec<usize>> {
        match name {
            "weight" => Ok(vec![self.num_embeddings, self.embedding_size]),
            _ => Err(Error::invalid_argument(format!("embedding has no parameter `{name}`"))),
        }
    }
}
