//! Composable computation units with owned parameters.

use std::io::{Read, Write};

use tracing::debug;

use crate::autograd::Tensor;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::init::Initializer;
use crate::pair_list::PairList;
use crate::parameter::{Parameter, ParameterKind};
use crate::serialization;
use crate::shape::Shape;

/// State shared by every block: its name, its own parameters in declaration
/// order, and whether it runs in training mode.
#[derive(Debug, Clone)]
pub struct BlockCore {
    name: String,
    parameters: PairList<String, Parameter>,
    training: bool,
}

impl BlockCore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: PairList::new(),
            training: false,
        }
    }

    /// Declares a parameter. Declaration order is persistence order.
    pub fn add_parameter(&mut self, name: &str, kind: ParameterKind) -> Parameter {
        self.push_parameter(Parameter::new(name, kind))
    }

    pub fn push_parameter(&mut self, parameter: Parameter) -> Parameter {
        self.parameters
            .add(parameter.name().to_string(), parameter.clone());
        parameter
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &PairList<String, Parameter> {
        &self.parameters
    }

    pub fn is_training(&self) -> bool {
        self.training
    }
}

/// A neural network layer or a composition of layers.
///
/// Parameters are declared at construction with deferred shapes; shapes are
/// resolved by [`Block::initialize`] from the input shapes. Initializing again
/// with inputs that resolve to the same shapes is a no-op; any other shape or
/// data type is rejected and nothing is modified.
pub trait Block {
    fn core(&self) -> &BlockCore;
    fn core_mut(&mut self) -> &mut BlockCore;

    /// Runs the block. Parameters must be initialized.
    fn forward(&self, ctx: &mut Context, inputs: &[Tensor]) -> Result<Vec<Tensor>>;

    /// Shapes `forward` would produce, without computing anything.
    fn output_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>>;

    /// Resolved shape of own parameter `name` for the given inputs.
    fn parameter_shape(&self, name: &str, _inputs: &[Shape]) -> Result<Vec<usize>> {
        Err(Error::invalid_argument(format!(
            "{} declares no parameter `{name}`",
            self.name()
        )))
    }

    /// Direct children, named, in execution order.
    fn children(&self) -> Vec<(String, &dyn Block)> {
        Vec::new()
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Block> {
        Vec::new()
    }

    /// Input shapes seen by each child, in `children()` order.
    fn child_input_shapes(&self, _inputs: &[Shape]) -> Result<Vec<Vec<Shape>>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        self.core().name()
    }

    /// Every parameter of this block and its descendants paired with the
    /// shape it resolves to.
    fn resolved_parameter_shapes(&self, inputs: &[Shape]) -> Result<Vec<(Parameter, Vec<usize>)>> {
        let mut plan = Vec::new();
        for (name, param) in self.core().parameters().iter() {
            plan.push((param.clone(), self.parameter_shape(name, inputs)?));
        }
        let child_inputs = self.child_input_shapes(inputs)?;
        for ((_, child), shapes) in self.children().into_iter().zip(child_inputs) {
            plan.extend(child.resolved_parameter_shapes(&shapes)?);
        }
        Ok(plan)
    }

    /// Resolves and materializes all parameters, returning the output shapes.
    ///
    /// Every parameter is checked before any is materialized, so a failing
    /// call leaves the block as it was.
    fn initialize(
        &self,
        ctx: &mut Context,
        initializer: &Initializer,
        inputs: &[Shape],
    ) -> Result<Vec<Shape>> {
        let data_type = ctx.data_type();
        let mut pending = Vec::new();
        for (param, shape) in self.resolved_parameter_shapes(inputs)? {
            if !param.check_compatible(&shape, data_type)? {
                pending.push((param, shape));
            }
        }
        if !pending.is_empty() {
            debug!(
                block = self.name(),
                count = pending.len(),
                "initializing parameters"
            );
        }
        for (param, shape) in pending {
            param.initialize(ctx, initializer, &shape)?;
        }
        self.output_shapes(inputs)
    }

    /// Own parameters first, then each child's (recursively) keyed
    /// `"{child}_{parameter}"`.
    fn parameters(&self) -> PairList<String, Parameter> {
        let mut list = self.core().parameters().clone();
        for (child_name, child) in self.children() {
            for (key, param) in child.parameters() {
                list.add(format!("{child_name}_{key}"), param);
            }
        }
        list
    }

    fn is_initialized(&self) -> bool {
        self.parameters().values().iter().all(Parameter::is_initialized)
    }

    fn set_training(&mut self, training: bool) {
        self.core_mut().training = training;
        for child in self.children_mut() {
            child.set_training(training);
        }
    }

    fn train_mode(&mut self) {
        self.set_training(true);
    }

    fn eval_mode(&mut self) {
        self.set_training(false);
    }

    fn is_training(&self) -> bool {
        self.core().is_training()
    }

    /// Writes every parameter as one record, in [`Block::parameters`] order.
    fn save_parameters(&self, sink: &mut dyn Write) -> Result<()> {
        serialization::save_parameters(&self.parameters(), sink)
    }

    /// Reads records written by [`Block::save_parameters`] into this block.
    fn load_parameters(&self, source: &mut dyn Read) -> Result<()> {
        serialization::load_parameters(&self.parameters(), source)
    }
}

/// The single input of a one-input block.
pub(crate) fn single_input<'a>(inputs: &'a [Tensor], block: &str) -> Result<&'a Tensor> {
    match inputs {
        [x] => Ok(x),
        _ => Err(Error::invalid_argument(format!(
            "{block} expects 1 input, got {}",
            inputs.len()
        ))),
    }
}

pub(crate) fn single_shape<'a>(inputs: &'a [Shape], block: &str) -> Result<&'a Shape> {
    match inputs {
        [s] => Ok(s),
        _ => Err(Error::invalid_argument(format!(
            "{block} expects 1 input shape, got {}",
            inputs.len()
        ))),
    }
}

/// Runs children one after another, each consuming the previous outputs.
pub struct Sequential {
    core: BlockCore,
    blocks: Vec<Box<dyn Block>>,
}

impl Default for Sequential {
    fn default() -> Self {
        Self::new()
    }
}

impl Sequential {
    pub fn new() -> Self {
        Self {
            core: BlockCore::new("sequential"),
            blocks: Vec::new(),
        }
    }

    pub fn add(mut self, block: impl Block + 'static) -> Self {
        self.push(Box::new(block));
        self
    }

    pub fn push(&mut self, block: Box<dyn Block>) {
        self.blocks.push(block);
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl Block for Sequential {
    fn core(&self) -> &BlockCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BlockCore {
        &mut self.core
    }

    fn forward(&self, ctx: &mut Context, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let mut current = inputs.to_vec();
        for block in &self.blocks {
            current = block.forward(ctx, &current)?;
        }
        Ok(current)
    }

    fn output_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>> {
        let mut current = inputs.to_vec();
        for block in &self.blocks {
            current = block.output_shapes(&current)?;
        }
        Ok(current)
    }

    fn children(&self) -> Vec<(String, &dyn Block)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (format!("{:02}{}", i + 1, b.name()), b.as_ref()))
            .collect()
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Block> {
        let mut out: Vec<&mut dyn Block> = Vec::with_capacity(self.blocks.len());
        for block in &mut self.blocks {
            out.push(block.as_mut());
        }
        out
    }

    fn child_input_shapes(&self, inputs: &[Shape]) -> Result<Vec<Vec<Shape>>> {
        let mut per_child = Vec::with_capacity(self.blocks.len());
        let mut current = inputs.to_vec();
        for block in &self.blocks {
            let next = block.output_shapes(&current)?;
            per_child.push(std::mem::replace(&mut current, next));
        }
        Ok(per_child)
    }
}

#[macro_export]
macro_rules! sequential {
    ($($block:expr),* $(,)?) => {{
        let mut seq = $crate::block::Sequential::new();
        $(seq.push(Box::new($block));)*
        seq
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{Activation, Linear};

    #[test]
    fn sequential_names_children_in_order() {
        let seq = sequential![Linear::new(4), Activation::relu(), Linear::new(2)];
        let names: Vec<String> = seq.children().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["01linear", "02relu", "03linear"]);
    }

    #[test]
    fn parameters_are_prefixed_depth_first() {
        let seq = sequential![Linear::new(4), Linear::new(2).without_bias()];
        assert_eq!(
            seq.parameters().keys(),
            &["01linear_weight", "01linear_bias", "02linear_weight"]
        );
    }

    #[test]
    fn initialize_propagates_shapes() {
        let mut ctx = Context::seeded(0);
        let seq = sequential![Linear::new(4), Linear::new(2)];
        let out = seq
            .initialize(&mut ctx, &Initializer::Ones, &[Shape::with_unknown_batch(&[3])])
            .unwrap();
        assert_eq!(out, vec![Shape::with_unknown_batch(&[2])]);
        let shapes: Vec<_> = seq.parameters().values().iter().map(|p| p.shape()).collect();
        assert_eq!(
            shapes,
            vec![Some(vec![4, 3]), Some(vec![4]), Some(vec![2, 4]), Some(vec![2])]
        );
        assert!(seq.is_initialized());
    }

    #[test]
    fn failed_reinitialize_changes_nothing() {
        let mut ctx = Context::seeded(0);
        let seq = sequential![Linear::new(4), Linear::new(2)];
        seq.initialize(&mut ctx, &Initializer::Ones, &[Shape::new(&[1, 3])])
            .unwrap();
        let err = seq
            .initialize(&mut ctx, &Initializer::Ones, &[Shape::new(&[1, 5])])
            .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
        assert_eq!(seq.parameters().values()[0].shape(), Some(vec![4, 3]));
    }

    #[test]
    fn training_mode_reaches_children() {
        let mut seq = sequential![Linear::new(1)];
        assert!(!seq.is_training());
        seq.train_mode();
        assert!(seq.children().iter().all(|(_, c)| c.is_training()));
        seq.eval_mode();
        assert!(!seq.children()[0].1.is_training());
    }
}
