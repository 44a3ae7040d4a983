//! Named, owned tensors learned during training.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::autograd::Tensor;
use crate::context::Context;
use crate::dtype::DataType;
use crate::error::{Error, Result};
use crate::init::Initializer;

/// Role of a parameter inside its block; decides the default initializer
/// and whether the optimizer touches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    Weight,
    Bias,
    Gamma,
    Beta,
    RunningMean,
    RunningVar,
}

impl ParameterKind {
    /// Initializer used when the parameter has no override. `None` defers to
    /// the training configuration.
    pub fn default_initializer(self) -> Option<Initializer> {
        match self {
            ParameterKind::Weight => None,
            ParameterKind::Bias | ParameterKind::Beta | ParameterKind::RunningMean => {
                Some(Initializer::Zeros)
            }
            ParameterKind::Gamma | ParameterKind::RunningVar => Some(Initializer::Ones),
        }
    }

    pub fn is_trainable(self) -> bool {
        !matches!(self, ParameterKind::RunningMean | ParameterKind::RunningVar)
    }
}

/// Shape-deferred or materialized.
#[derive(Debug)]
pub enum ParameterState {
    Unresolved {
        initializer: Option<Initializer>,
    },
    Resolved {
        data_type: DataType,
        tensor: Tensor,
    },
}

struct Inner {
    state: ParameterState,
    trainable: bool,
}

/// Handle to a parameter slot. Clones share the same slot.
#[derive(Clone)]
pub struct Parameter {
    name: Rc<str>,
    kind: ParameterKind,
    inner: Rc<RefCell<Inner>>,
}

impl Parameter {
    pub fn new(name: &str, kind: ParameterKind) -> Self {
        Self {
            name: Rc::from(name),
            kind,
            inner: Rc::new(RefCell::new(Inner {
                state: ParameterState::Unresolved { initializer: None },
                trainable: kind.is_trainable(),
            })),
        }
    }

    /// Overrides both the kind default and the configured initializer.
    pub fn with_initializer(self, initializer: Initializer) -> Self {
        if let ParameterState::Unresolved { initializer: slot } = &mut self.inner.borrow_mut().state {
            *slot = Some(initializer);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ParameterKind {
        self.kind
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.inner.borrow().state, ParameterState::Resolved { .. })
    }

    pub fn shape(&self) -> Option<Vec<usize>> {
        match &self.inner.borrow().state {
            ParameterState::Resolved { tensor, .. } => Some(tensor.shape()),
            ParameterState::Unresolved { .. } => None,
        }
    }

    pub fn data_type(&self) -> Option<DataType> {
        match &self.inner.borrow().state {
            ParameterState::Resolved { data_type, .. } => Some(*data_type),
            ParameterState::Unresolved { .. } => None,
        }
    }

    /// The materialized tensor; gradients accumulate on it.
    pub fn tensor(&self) -> Result<Tensor> {
        match &self.inner.borrow().state {
            ParameterState::Resolved { tensor, .. } => Ok(tensor.clone()),
            ParameterState::Unresolved { .. } => Err(Error::uninitialized(format!(
                "parameter `{}` has no shape yet",
                self.name
            ))),
        }
    }

    pub fn array(&self) -> Result<ArrayD<f32>> {
        Ok(self.tensor()?.data())
    }

    pub fn is_trainable(&self) -> bool {
        self.inner.borrow().trainable
    }

    /// Frozen parameters keep their values and receive no gradients.
    pub fn set_trainable(&self, trainable: bool) {
        let mut inner = self.inner.borrow_mut();
        inner.trainable = trainable;
        if let ParameterState::Resolved { tensor, .. } = &inner.state {
            tensor.set_requires_grad(trainable);
            if !trainable {
                tensor.zero_grad();
            }
        }
    }

    /// `Ok(true)` if already materialized with exactly `shape` and
    /// `data_type`, `Ok(false)` if still unresolved, an error otherwise.
    pub fn check_compatible(&self, shape: &[usize], data_type: DataType) -> Result<bool> {
        match &self.inner.borrow().state {
            ParameterState::Unresolved { .. } => Ok(false),
            ParameterState::Resolved {
                data_type: current,
                tensor,
            } => {
                let current_shape = tensor.shape();
                if current_shape != shape {
                    Err(Error::shape_mismatch(
                        format!("parameter `{}`", self.name),
                        current_shape,
                        shape,
                    ))
                } else if *current != data_type {
                    Err(Error::data_type_mismatch(
                        format!("parameter `{}`", self.name),
                        *current,
                        data_type,
                    ))
                } else {
                    Ok(true)
                }
            }
        }
    }

    /// Materializes the parameter with `shape`. A no-op when already resolved
    /// to the same shape and the context's data type.
    pub fn initialize(
        &self,
        ctx: &mut Context,
        fallback: &Initializer,
        shape: &[usize],
    ) -> Result<()> {
        let data_type = ctx.data_type();
        if self.check_compatible(shape, data_type)? {
            return Ok(());
        }

        let initializer = match &self.inner.borrow().state {
            ParameterState::Unresolved {
                initializer: Some(over),
            } => over.clone(),
            _ => self
                .kind
                .default_initializer()
                .unwrap_or_else(|| fallback.clone()),
        };
        let data = initializer.generate(shape, ctx.rng_mut())?;
        debug!(
            parameter = %self.name,
            ?shape,
            ?data_type,
            ?initializer,
            "materialized parameter"
        );
        self.resolve(data_type, data);
        Ok(())
    }

    fn resolve(&self, data_type: DataType, data: ArrayD<f32>) {
        let mut inner = self.inner.borrow_mut();
        let tensor = Tensor::leaf(data.mapv(|v| data_type.quantize(v)), inner.trainable);
        inner.state = ParameterState::Resolved { data_type, tensor };
    }

    /// Replaces the stored values. An unresolved parameter takes on `data`'s
    /// shape and `data_type`; a resolved one must already match both.
    pub fn set_array(&self, data_type: DataType, data: ArrayD<f32>) -> Result<()> {
        if !self.check_compatible(data.shape(), data_type)? {
            self.resolve(data_type, data);
            return Ok(());
        }
        let tensor = self.tensor()?;
        *tensor.data_mut() = data.mapv(|v| data_type.quantize(v));
        tensor.zero_grad();
        Ok(())
    }

    /// Rounds the current values back onto the declared data type.
    pub fn requantize(&self) {
        if let ParameterState::Resolved { data_type, tensor } = &self.inner.borrow().state {
            if *data_type != DataType::Float32 {
                tensor.data_mut().mapv_inplace(|v| data_type.quantize(v));
            }
        }
    }

    /// True if both handles refer to the same slot.
    pub fn same_as(&self, other: &Parameter) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("shape", &self.shape())
            .field("data_type", &self.data_type())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_has_no_tensor() {
        let p = Parameter::new("weight", ParameterKind::Weight);
        assert!(!p.is_initialized());
        assert_eq!(p.shape(), None);
        assert!(matches!(p.tensor(), Err(Error::Uninitialized(_))));
    }

    #[test]
    fn kind_default_beats_fallback() {
        let mut ctx = Context::seeded(0);
        let bias = Parameter::new("bias", ParameterKind::Bias);
        bias.initialize(&mut ctx, &Initializer::Ones, &[3]).unwrap();
        assert!(bias.array().unwrap().iter().all(|&v| v == 0.0));

        let weight = Parameter::new("weight", ParameterKind::Weight);
        weight.initialize(&mut ctx, &Initializer::Ones, &[2, 2]).unwrap();
        assert!(weight.array().unwrap().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn override_beats_kind_default() {
        let mut ctx = Context::seeded(0);
        let gamma = Parameter::new("gamma", ParameterKind::Gamma)
            .with_initializer(Initializer::Constant { value: 3.0 });
        gamma.initialize(&mut ctx, &Initializer::Zeros, &[2]).unwrap();
        assert!(gamma.array().unwrap().iter().all(|&v| v == 3.0));
    }

    #[test]
    fn reinitialize_same_shape_is_noop() {
        let mut ctx = Context::seeded(0);
        let p = Parameter::new("weight", ParameterKind::Weight);
        p.initialize(&mut ctx, &Initializer::XavierUniform, &[2, 3]).unwrap();
        let before = p.array().unwrap();
        p.initialize(&mut ctx, &Initializer::XavierUniform, &[2, 3]).unwrap();
        assert_eq!(p.array().unwrap(), before);
    }

    #[test]
    fn reinitialize_other_shape_fails() {
        let mut ctx = Context::seeded(0);
        let p = Parameter::new("weight", ParameterKind::Weight);
        p.initialize(&mut ctx, &Initializer::Ones, &[2, 3]).unwrap();
        let err = p.initialize(&mut ctx, &Initializer::Ones, &[3, 3]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
        assert_eq!(p.shape(), Some(vec![2, 3]));
    }

    #[test]
    fn reinitialize_other_dtype_fails() {
        let mut ctx = Context::seeded(0);
        let p = Parameter::new("weight", ParameterKind::Weight);
        p.initialize(&mut ctx, &Initializer::Ones, &[2]).unwrap();
        ctx.set_data_type(DataType::Int32);
        let err = p.initialize(&mut ctx, &Initializer::Ones, &[2]).unwrap_err();
        assert!(matches!(err, Error::DataTypeMismatch { .. }));
    }

    #[test]
    fn values_are_quantized_to_data_type() {
        let mut ctx = Context::seeded(0);
        ctx.set_data_type(DataType::Int8);
        let p = Parameter::new("w", ParameterKind::Weight);
        p.initialize(&mut ctx, &Initializer::Constant { value: 2.7 }, &[2]).unwrap();
        assert_eq!(p.array().unwrap().as_slice().unwrap(), &[3.0, 3.0]);
    }

    #[test]
    fn running_stats_are_frozen() {
        let mut ctx = Context::seeded(0);
        let p = Parameter::new("running_mean", ParameterKind::RunningMean);
        p.initialize(&mut ctx, &Initializer::Ones, &[2]).unwrap();
        assert!(!p.is_trainable());
        assert!(!p.tensor().unwrap().requires_grad());
    }

    #[test]
    fn set_array_checks_shape() {
        let mut ctx = Context::seeded(0);
        let p = Parameter::new("w", ParameterKind::Weight);
        p.initialize(&mut ctx, &Initializer::Ones, &[2]).unwrap();
        let t = p.tensor().unwrap();
        p.set_array(DataType::Float32, ndarray::arr1(&[4.0f32, 5.0]).into_dyn())
            .unwrap();
        assert_eq!(t.to_vec(), vec![4.0, 5.0]);
        assert!(p
            .set_array(DataType::Float32, ndarray::arr1(&[1.0f32]).into_dyn())
            .is_err());
    }
}
