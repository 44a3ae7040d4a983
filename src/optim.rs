use ndarray::prelude::*;
use ndarray::Zip;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::parameter::Parameter;

/// Updates parameters from their accumulated gradients.
///
/// Frozen parameters and parameters without a gradient are skipped. After an
/// update, values are rounded back onto each parameter's declared data type.
pub trait Optimizer {
    fn step(&mut self) -> Result<()>;

    fn params(&self) -> &[Parameter];

    fn zero_grad(&self) -> Result<()> {
        for param in self.params() {
            param.tensor()?.zero_grad();
        }
        Ok(())
    }
}

/// Optimizer settings as they appear in a training configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptimizerConfig {
    Sgd {
        learning_rate: f32,
        #[serde(default)]
        momentum: f32,
    },
    Adam {
        learning_rate: f32,
        #[serde(default = "default_beta1")]
        beta1: f32,
        #[serde(default = "default_beta2")]
        beta2: f32,
        #[serde(default = "default_epsilon")]
        epsilon: f32,
    },
}

fn default_beta1() -> f32 {
    0.9
}

fn default_beta2() -> f32 {
    0.999
}

fn default_epsilon() -> f32 {
    1e-8
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig::Sgd {
            learning_rate: 0.01,
            momentum: 0.0,
        }
    }
}

impl OptimizerConfig {
    pub fn adam(learning_rate: f32) -> Self {
        OptimizerConfig::Adam {
            learning_rate,
            beta1: default_beta1(),
            beta2: default_beta2(),
            epsilon: default_epsilon(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let ok = match *self {
            OptimizerConfig::Sgd { learning_rate, momentum } => {
                learning_rate > 0.0 && (0.0..1.0).contains(&momentum)
            }
            OptimizerConfig::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => {
                learning_rate > 0.0
                    && (0.0..1.0).contains(&beta1)
                    && (0.0..1.0).contains(&beta2)
                    && epsilon > 0.0
            }
        };
        if ok {
            Ok(())
        } else {
            Err(Error::invalid_config(format!("optimizer settings out of range: {self:?}")))
        }
    }

    pub fn build(&self, params: Vec<Parameter>) -> Result<Box<dyn Optimizer>> {
        self.validate()?;
        Ok(match *self {
            OptimizerConfig::Sgd { learning_rate, momentum } => {
                Box::new(Sgd::new(params, learning_rate).with_momentum(momentum))
            }
            OptimizerConfig::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => Box::new(Adam::new(params, learning_rate).with_betas(beta1, beta2).with_epsilon(epsilon)),
        })
    }
}

/// Gradient descent with optional momentum: `v = m*v + g; w -= lr*v`.
pub struct Sgd {
    params: Vec<Parameter>,
    lr: f32,
    momentum: f32,
    velocities: Vec<Option<ArrayD<f32>>>,
}

impl Sgd {
    pub fn new(params: Vec<Parameter>, lr: f32) -> Self {
        let len = params.len();
        Sgd {
            params,
            lr,
            momentum: 0.0,
            velocities: vec![None; len],
        }
    }

    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }
}

impl Optimizer for Sgd {
    fn params(&self) -> &[Parameter] {
        &self.params
    }

    fn step(&mut self) -> Result<()> {
        let lr = self.lr;
        for (param, velocity) in self.params.iter().zip(self.velocities.iter_mut()) {
            if !param.is_trainable() {
                continue;
            }
            let tensor = param.tensor()?;
            let Some(grad) = tensor.grad() else {
                continue;
            };

            {
                let mut data = tensor.data_mut();
                if self.momentum == 0.0 {
                    Zip::from(&mut *data).and(&grad).for_each(|w, &g| *w -= lr * g);
                } else {
                    let m = self.momentum;
                    let v_buf = velocity.get_or_insert_with(|| ArrayD::zeros(grad.raw_dim()));
                    Zip::from(&mut *data)
                        .and(v_buf)
                        .and(&grad)
                        .for_each(|w, v, &g| {
                            *v = m * *v + g;
                            *w -= lr * *v;
                        });
                }
            }
            param.requantize();
        }
        Ok(())
    }
}

/// Adam with bias-corrected first and second moments.
pub struct Adam {
    params: Vec<Parameter>,
    lr: f32,
    betas: (f32, f32),
    eps: f32,

    step_count: i32,
    exp_avg: Vec<Option<ArrayD<f32>>>,
    exp_avg_sq: Vec<Option<ArrayD<f32>>>,
}

impl Adam {
    pub fn new(params: Vec<Parameter>, lr: f32) -> Self {
        let len = params.len();
        Adam {
            params,
            lr,
            betas: (0.9, 0.999),
            eps: 1e-8,
            step_count: 0,
            exp_avg: vec![None; len],
            exp_avg_sq: vec![None; len],
        }
    }

    pub fn with_betas(mut self, beta1: f32, beta2: f32) -> Self {
        self.betas = (beta1, beta2);
        self
    }

    pub fn with_epsilon(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }
}

impl Optimizer for Adam {
    fn params(&self) -> &[Parameter] {
        &self.params
    }

    fn step(&mut self) -> Result<()> {
        self.step_count += 1;
        let (beta1, beta2) = self.betas;
        let bias_correction1 = 1.0 - beta1.powi(self.step_count);
        let bias_correction2 = 1.0 - beta2.powi(self.step_count);
        let (lr, eps) = (self.lr, self.eps);

        for (i, param) in self.params.iter().enumerate() {
            if !param.is_trainable() {
                continue;
            }
            let tensor = param.tensor()?;
            let Some(grad) = tensor.grad() else {
                continue;
            };

            {
                let m_buf = self.exp_avg[i].get_or_insert_with(|| ArrayD::zeros(grad.raw_dim()));
                let v_buf = self.exp_avg_sq[i].get_or_insert_with(|| ArrayD::zeros(grad.raw_dim()));
                let mut data = tensor.data_mut();

                // m = b1*m + (1-b1)*g; v = b2*v + (1-b2)*g^2
                // w -= lr * (m/bc1) / (sqrt(v/bc2) + eps)
                Zip::from(&mut *data)
                    .and(m_buf)
                    .and(v_buf)
                    .and(&grad)
                    .for_each(|w, m, v, &g| {
                        *m = beta1 * *m + (1.0 - beta1) * g;
                        *v = beta2 * *v + (1.0 - beta2) * g * g;
                        let m_hat = *m / bias_correction1;
                        let v_hat = *v / bias_correction2;
                        *w -= lr * (m_hat / (v_hat.sqrt() + eps));
                    });
            }
            param.requantize();
        }
        Ok(())
    }
}
