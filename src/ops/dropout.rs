use crate::autograd::Tensor;
use crate::error::{Error, Result};
use ndarray::{Array, IxDyn};
use ndarray_rand::rand_distr::Bernoulli;
use ndarray_rand::RandomExt;
use rand::Rng;

/// Zeroes each element with `probability` and scales survivors by `1 / (1 - p)`.
pub fn dropout<R: Rng + ?Sized>(input: &Tensor, probability: f32, rng: &mut R) -> Result<Tensor> {
    if !(0.0..1.0).contains(&probability) {
        return Err(Error::invalid_argument(format!(
            "dropout probability {probability} outside [0, 1)"
        )));
    }
    if probability == 0.0 {
        return Ok(input.clone());
    }

    let keep = Bernoulli::new(f64::from(1.0 - probability))
        .map_err(|e| Error::invalid_argument(e.to_string()))?;
    let scale = 1.0 / (1.0 - probability);
    let mask = Array::random_using(IxDyn(&input.shape()), keep, rng)
        .mapv(|kept| if kept { scale } else { 0.0 });

    let data = &*input.data_ref() * &mask;
    let x = input.clone();
    Ok(Tensor::from_op(data, vec![input.clone()], move |grad| {
        x.add_grad(grad * &mask)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn survivors_are_scaled() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let x = Tensor::new(ndarray::ArrayD::ones(vec![64]));
        let y = dropout(&x, 0.5, &mut rng).unwrap().to_vec();
        assert!(y.iter().all(|&v| v == 0.0 || v == 2.0));
        assert!(y.iter().any(|&v| v == 0.0));
        assert!(y.iter().any(|&v| v == 2.0));
    }

    #[test]
    fn zero_probability_is_identity() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let x = Tensor::from_vec(&[2], vec![1.0, 2.0]).unwrap();
        assert!(dropout(&x, 0.0, &mut rng).unwrap().same_as(&x));
    }

    #[test]
    fn rejects_certain_drop() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let x = Tensor::zeros(&[2]);
        assert!(dropout(&x, 1.0, &mut rng).is_err());
    }
}
