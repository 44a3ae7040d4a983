use ndarray::{Array1, Array2};
use ndblocks::layers::Linear;
use ndblocks::{
    sequential, ArrayDataset, Initializer, Loss, Model, OptimizerConfig, Shape, Tensor, Trainer,
    TrainingConfig,
};

fn regression_data() -> ArrayDataset {
    let xs: Vec<[f32; 2]> = (0..16)
        .map(|i| {
            let a = (i % 4) as f32 / 2.0 - 0.75;
            let b = (i / 4) as f32 / 2.0 - 0.75;
            [a, b]
        })
        .collect();
    let data = Array2::from_shape_fn((xs.len(), 2), |(i, j)| xs[i][j]);
    let labels = Array2::from_shape_fn((xs.len(), 1), |(i, _)| 2.0 * xs[i][0] - xs[i][1] + 0.5);
    ArrayDataset::new(data.into_dyn(), labels.into_dyn(), 16).unwrap()
}

#[test]
fn sgd_fits_a_linear_function() {
    let mut model = Model::new("regression", Linear::new(1));
    let config = TrainingConfig::new(Initializer::Zeros)
        .with_optimizer(OptimizerConfig::Sgd {
            learning_rate: 0.1,
            momentum: 0.0,
        })
        .with_loss(Loss::L2)
        .with_epochs(300);
    let mut trainer = Trainer::new(&mut model, config).unwrap();
    let history = trainer.fit(&regression_data(), None).unwrap();

    assert_eq!(history.epochs().len(), 300);
    let first = history.epochs()[0].train_loss;
    let last = history.last().unwrap().train_loss;
    assert!(last < first);
    assert!(last < 1e-2, "loss {last}");

    let out = trainer
        .forward(&[Tensor::from_vec(&[1, 2], vec![0.5, 0.25]).unwrap()])
        .unwrap();
    assert!((out[0].to_vec()[0] - 1.25).abs() < 0.1);
}

#[test]
fn adam_separates_two_clusters() {
    let xs = [-2.0f32, -1.5, -1.0, -0.5, 0.5, 1.0, 1.5, 2.0];
    let data = Array2::from_shape_fn((8, 2), |(i, j)| if j == 0 { xs[i] } else { 0.1 * i as f32 });
    let labels = Array1::from_iter(xs.iter().map(|&x| if x < 0.0 { 0.0 } else { 1.0 }));
    let train = ArrayDataset::new(data.into_dyn(), labels.into_dyn(), 4)
        .unwrap()
        .with_shuffle(7);

    let mut model = Model::new("classifier", sequential![Linear::new(2)]);
    let config = TrainingConfig::new(Initializer::Normal { sigma: 0.1 })
        .with_optimizer(OptimizerConfig::adam(0.1))
        .with_loss(Loss::SoftmaxCrossEntropy)
        .with_epochs(60)
        .with_seed(7);
    let mut trainer = Trainer::new(&mut model, config).unwrap();
    let history = trainer.fit(&train, Some(&train)).unwrap();

    let last = history.last().unwrap();
    assert_eq!(last.train_accuracy, Some(1.0));
    assert_eq!(last.validation_accuracy, Some(1.0));
    assert!(history.best().is_some());
}

#[test]
fn frozen_parameters_do_not_move() {
    let linear = Linear::new(1);
    let weight = ndblocks::Block::parameters(&linear)
        .get("weight")
        .unwrap()
        .clone();
    let mut model = Model::new("frozen", linear);
    let config = TrainingConfig::new(Initializer::Ones)
        .with_loss(Loss::L2)
        .with_epochs(5);
    let mut trainer = Trainer::new(&mut model, config).unwrap();
    trainer.initialize(&[Shape::new(&[16, 2])]).unwrap();
    weight.set_trainable(false);
    trainer.fit(&regression_data(), None).unwrap();
    assert_eq!(weight.array().unwrap().iter().copied().collect::<Vec<_>>(), vec![1.0, 1.0]);
}
