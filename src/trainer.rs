//! Training configuration and the loop that drives a [`Model`].

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::autograd::{no_grad, Tensor};
use crate::dataset::{ArrayDataset, Batch};
use crate::error::{Error, Result};
use crate::init::Initializer;
use crate::loss::{accuracy, Loss};
use crate::metrics::{EpochMetrics, Mean, TrainingHistory};
use crate::model::Model;
use crate::optim::{Optimizer, OptimizerConfig};
use crate::shape::Shape;

/// Everything a [`Trainer`] needs besides the model and the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub initializer: Initializer,
    pub optimizer: OptimizerConfig,
    pub loss: Loss,
    pub epochs: usize,
    /// Reseeds the model's context when the trainer is created.
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            initializer: Initializer::default(),
            optimizer: OptimizerConfig::default(),
            loss: Loss::default(),
            epochs: 1,
            seed: None,
        }
    }
}

impl TrainingConfig {
    pub fn new(initializer: Initializer) -> Self {
        Self {
            initializer,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_loss(mut self, loss: Loss) -> Self {
        self.loss = loss;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.initializer.validate()?;
        self.optimizer.validate()
    }
}

/// Runs initialization, forward passes and optimization for one model.
///
/// Holding the model mutably keeps a single writer on its context for the
/// trainer's whole lifetime.
pub struct Trainer<'m> {
    model: &'m mut Model,
    config: TrainingConfig,
    optimizer: Option<Box<dyn Optimizer>>,
}

impl<'m> Trainer<'m> {
    pub fn new(model: &'m mut Model, config: TrainingConfig) -> Result<Self> {
        config.validate()?;
        if let Some(seed) = config.seed {
            model.context_mut().reseed(seed);
        }
        Ok(Self {
            model,
            config,
            optimizer: None,
        })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn model(&self) -> &Model {
        &*self.model
    }

    /// Materializes parameters for `inputs` and prepares the optimizer.
    pub fn initialize(&mut self, inputs: &[Shape]) -> Result<Vec<Shape>> {
        let (block, ctx) = self.model.parts_mut();
        let outputs = block.initialize(ctx, &self.config.initializer, inputs)?;
        let params = block.parameters().values().to_vec();
        debug!(model = self.model.name(), parameters = params.len(), "trainer initialized");
        self.optimizer = Some(self.config.optimizer.build(params)?);
        Ok(outputs)
    }

    fn ensure_initialized(&mut self, inputs: &[Tensor]) -> Result<()> {
        if self.optimizer.is_some() && self.model.block().is_initialized() {
            return Ok(());
        }
        let shapes: Vec<Shape> = inputs.iter().map(|t| Shape::new(&t.shape())).collect();
        self.initialize(&shapes).map(|_| ())
    }

    /// Inference: evaluation mode, no graph recorded.
    pub fn forward(&mut self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        self.ensure_initialized(inputs)?;
        let (block, ctx) = self.model.parts_mut();
        block.eval_mode();
        no_grad(|| block.forward(ctx, inputs))
    }

    /// One optimization step; returns the batch loss.
    pub fn train_batch(&mut self, batch: &Batch) -> Result<f32> {
        let inputs = [batch.data.clone()];
        self.ensure_initialized(&inputs)?;
        let optimizer = self
            .optimizer
            .as_mut()
            .ok_or_else(|| Error::uninitialized("trainer optimizer"))?;
        let (block, ctx) = self.model.parts_mut();

        block.train_mode();
        optimizer.zero_grad()?;
        let outputs = block.forward(ctx, &inputs)?;
        let prediction = outputs
            .first()
            .ok_or_else(|| Error::invalid_argument("model produced no outputs"))?;
        let loss = self.config.loss.apply(prediction, &batch.labels)?;
        loss.backward()?;
        optimizer.step()?;
        Ok(loss.to_vec()[0])
    }

    /// Loss and, for classification, accuracy on one batch without updating.
    pub fn evaluate_batch(&mut self, batch: &Batch) -> Result<(f32, Option<f32>)> {
        let outputs = self.forward(std::slice::from_ref(&batch.data))?;
        let prediction = outputs
            .first()
            .ok_or_else(|| Error::invalid_argument("model produced no outputs"))?;
        let loss = self.config.loss.apply(prediction, &batch.labels)?.to_vec()[0];
        let acc = match self.config.loss {
            Loss::SoftmaxCrossEntropy => Some(accuracy(prediction, &batch.labels)?),
            Loss::L2 => None,
        };
        Ok((loss, acc))
    }

    fn evaluate(&mut self, dataset: &ArrayDataset) -> Result<(Option<f32>, Option<f32>)> {
        let (mut loss, mut acc) = (Mean::default(), Mean::default());
        for batch in dataset.batches_with(dataset.batch_size(), None, 0) {
            let (l, a) = self.evaluate_batch(&batch)?;
            loss.add(l, batch.size());
            if let Some(a) = a {
                acc.add(a, batch.size());
            }
        }
        Ok((loss.value(), acc.value()))
    }

    /// Trains for the configured number of epochs. Batch size and shuffling
    /// come from each dataset; evaluation never shuffles.
    pub fn fit(
        &mut self,
        train: &ArrayDataset,
        validation: Option<&ArrayDataset>,
    ) -> Result<TrainingHistory> {
        let mut history = TrainingHistory::new();
        for epoch in 0..self.config.epochs {
            let mut train_loss = Mean::default();
            for batch in train.batches(epoch) {
                let loss = self.train_batch(&batch)?;
                train_loss.add(loss, batch.size());
            }

            let mut metrics = EpochMetrics {
                epoch,
                train_loss: train_loss.value().unwrap_or(0.0),
                ..EpochMetrics::default()
            };
            if self.config.loss == Loss::SoftmaxCrossEntropy {
                metrics.train_accuracy = self.evaluate(train)?.1;
            }
            if let Some(validation) = validation {
                let (loss, acc) = self.evaluate(validation)?;
                metrics.validation_loss = loss;
                metrics.validation_accuracy = acc;
            }

            info!(
                model = self.model.name(),
                epoch,
                train_loss = metrics.train_loss,
                train_accuracy = ?metrics.train_accuracy,
                validation_loss = ?metrics.validation_loss,
                validation_accuracy = ?metrics.validation_accuracy,
                "epoch finished"
            );
            history.push(metrics);
        }
        Ok(history)
    }
}
