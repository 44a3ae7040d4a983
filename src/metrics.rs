use serde::{Deserialize, Serialize};

/// Loss (and accuracy, for classification) averaged over one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f32,
    pub train_accuracy: Option<f32>,
    pub validation_loss: Option<f32>,
    pub validation_accuracy: Option<f32>,
}

/// Per-epoch metrics in training order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    epochs: Vec<EpochMetrics>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, metrics: EpochMetrics) {
        self.epochs.push(metrics);
    }

    pub fn epochs(&self) -> &[EpochMetrics] {
        &self.epochs
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    /// Epoch with the lowest validation loss, or training loss when no
    /// validation set was used.
    pub fn best(&self) -> Option<&EpochMetrics> {
        self.epochs.iter().min_by(|a, b| {
            let key = |m: &EpochMetrics| m.validation_loss.unwrap_or(m.train_loss);
            key(a).total_cmp(&key(b))
        })
    }
}

/// Running mean of per-batch values weighted by batch size.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Mean {
    total: f64,
    count: usize,
}

impl Mean {
    pub fn add(&mut self, value: f32, weight: usize) {
        self.total += f64::from(value) * weight as f64;
        self.count += weight;
    }

    pub fn value(&self) -> Option<f32> {
        (self.count > 0).then(|| (self.total / self.count as f64) as f32)
    }
}
