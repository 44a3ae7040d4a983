use ndarray::{ArrayD, IxDyn};
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};

thread_local! {
    static NO_GRAD_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Suspends graph recording on this thread while alive.
pub struct NoGradGuard {
    _priv: (),
}

impl NoGradGuard {
    pub fn enter() -> Self {
        NO_GRAD_DEPTH.with(|d| d.set(d.get() + 1));
        Self { _priv: () }
    }
}

impl Drop for NoGradGuard {
    fn drop(&mut self) {
        NO_GRAD_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

#[inline]
pub fn is_no_grad() -> bool {
    NO_GRAD_DEPTH.with(Cell::get) > 0
}

/// Runs `f` without recording a graph.
pub fn no_grad<R>(f: impl FnOnce() -> R) -> R {
    let _g = NoGradGuard::enter();
    f()
}

pub type BackwardOp = Box<dyn Fn(&ArrayD<f32>) -> Result<()>>;

pub struct TensorData {
    pub data: ArrayD<f32>,
    pub grad: Option<ArrayD<f32>>,
    pub parents: Vec<Tensor>,
    pub backward_op: Option<BackwardOp>,
    pub requires_grad: bool,
}

/// Shared handle to an `f32` array plus its place in the autograd graph.
#[derive(Clone)]
pub struct Tensor(pub(crate) Rc<RefCell<TensorData>>);

impl Tensor {
    /// Constant leaf: never receives gradients.
    pub fn new(data: ArrayD<f32>) -> Self {
        Tensor::leaf(data, false)
    }

    /// Trainable leaf: accumulates gradients during `backward`.
    pub fn parameter(data: ArrayD<f32>) -> Self {
        Tensor::leaf(data, true)
    }

    pub fn leaf(data: ArrayD<f32>, requires_grad: bool) -> Self {
        Tensor(Rc::new(RefCell::new(TensorData {
            data,
            grad: None,
            parents: Vec::new(),
            backward_op: None,
            requires_grad,
        })))
    }

    pub fn from_vec(shape: &[usize], values: Vec<f32>) -> Result<Self> {
        Ok(Tensor::new(ArrayD::from_shape_vec(IxDyn(shape), values)?))
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Tensor::new(ArrayD::zeros(IxDyn(shape)))
    }

    pub fn scalar(value: f32) -> Self {
        Tensor::new(ndarray::arr0(value).into_dyn())
    }

    /// Result of an op. Records `backward` only when a parent needs gradients
    /// and recording is enabled.
    pub(crate) fn from_op(
        data: ArrayD<f32>,
        parents: Vec<Tensor>,
        backward: impl Fn(&ArrayD<f32>) -> Result<()> + 'static,
    ) -> Tensor {
        if is_no_grad() || !parents.iter().any(Tensor::requires_grad) {
            return Tensor::new(data);
        }
        Tensor(Rc::new(RefCell::new(TensorData {
            data,
            grad: None,
            parents,
            backward_op: Some(Box::new(backward)),
            requires_grad: true,
        })))
    }

    pub fn data_ref(&self) -> Ref<'_, ArrayD<f32>> {
        Ref::map(self.0.borrow(), |t| &t.data)
    }

    pub fn data_mut(&self) -> RefMut<'_, ArrayD<f32>> {
        RefMut::map(self.0.borrow_mut(), |t| &mut t.data)
    }

    pub fn grad_ref(&self) -> Ref<'_, Option<ArrayD<f32>>> {
        Ref::map(self.0.borrow(), |t| &t.grad)
    }

    pub fn data(&self) -> ArrayD<f32> {
        self.0.borrow().data.clone()
    }

    pub fn grad(&self) -> Option<ArrayD<f32>> {
        self.0.borrow().grad.clone()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.0.borrow().data.shape().to_vec()
    }

    /// Values in row-major order.
    pub fn to_vec(&self) -> Vec<f32> {
        self.0.borrow().data.iter().copied().collect()
    }

    #[inline]
    pub fn requires_grad(&self) -> bool {
        self.0.borrow().requires_grad
    }

    pub fn set_requires_grad(&self, requires_grad: bool) {
        self.0.borrow_mut().requires_grad = requires_grad;
    }

    pub fn zero_grad(&self) {
        self.0.borrow_mut().grad = None;
    }

    pub fn same_as(&self, other: &Tensor) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn add_grad(&self, grad: ArrayD<f32>) -> Result<()> {
        let mut inner = self.0.borrow_mut();
        if !inner.requires_grad {
            return Ok(());
        }
        if inner.data.shape() != grad.shape() {
            return Err(Error::shape_mismatch(
                "gradient accumulation",
                inner.data.shape(),
                grad.shape(),
            ));
        }
        match inner.grad.as_mut() {
            Some(existing) => *existing += &grad,
            None => inner.grad = Some(grad),
        }
        Ok(())
    }

    /// Back-propagates from this tensor, seeding its gradient with ones.
    pub fn backward(&self) -> Result<()> {
        let mut topo = Vec::new();
        let mut visited = HashSet::new();

        fn build_topo(
            node: &Tensor,
            topo: &mut Vec<Tensor>,
            visited: &mut HashSet<*const RefCell<TensorData>>,
        ) {
            if !visited.insert(Rc::as_ptr(&node.0)) {
                return;
            }
            for parent in &node.0.borrow().parents {
                build_topo(parent, topo, visited);
            }
            topo.push(node.clone());
        }

        build_topo(self, &mut topo, &mut visited);

        let seed = ArrayD::ones(self.shape());
        self.add_grad(seed)?;

        for node in topo.iter().rev() {
            let inner = node.0.borrow();
            if let (Some(grad), Some(op)) = (&inner.grad, &inner.backward_op) {
                op(grad)?;
            }
        }
        Ok(())
    }

    /// Copy of the values with no graph attached.
    pub fn detach(&self) -> Tensor {
        Tensor::new(self.data())
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.0.borrow();
        f.debug_struct("Tensor")
            .field("shape", &inner.data.shape())
            .field("requires_grad", &inner.requires_grad)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops;

    #[test]
    fn constants_do_not_record() {
        let a = Tensor::from_vec(&[2], vec![1.0, 2.0]).unwrap();
        let b = Tensor::from_vec(&[2], vec![3.0, 4.0]).unwrap();
        let c = ops::mul(&a, &b).unwrap();
        assert!(!c.requires_grad());
        assert!(c.0.borrow().backward_op.is_none());
    }

    #[test]
    fn backward_accumulates_shared_inputs() {
        // d/dx sum(x * x) = 2x
        let x = Tensor::parameter(ndarray::arr1(&[1.0f32, -2.0, 3.0]).into_dyn());
        let y = ops::sum(&ops::mul(&x, &x).unwrap());
        y.backward().unwrap();
        assert_eq!(x.grad().unwrap().iter().copied().collect::<Vec<_>>(), vec![2.0, -4.0, 6.0]);
    }

    #[test]
    fn no_grad_suspends_recording() {
        let x = Tensor::parameter(ndarray::arr1(&[1.0f32]).into_dyn());
        let y = no_grad(|| ops::mul_scalar(&x, 2.0));
        assert!(!y.requires_grad());
        assert!(!is_no_grad());
    }

    #[test]
    fn frozen_tensor_ignores_gradients() {
        let x = Tensor::new(ndarray::arr1(&[1.0f32]).into_dyn());
        x.add_grad(ndarray::arr1(&[5.0f32]).into_dyn()).unwrap();
        assert!(x.grad().is_none());
    }
}
