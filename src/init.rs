use ndarray::{Array, ArrayD, IxDyn};
use ndarray_rand::rand_distr::{Normal, Uniform};
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How fresh parameter values are drawn.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Initializer {
    Zeros,
    Ones,
    Constant { value: f32 },
    /// U(-scale, scale)
    Uniform { scale: f32 },
    /// N(0, sigma)
    Normal { sigma: f32 },
    /// Glorot, for tanh/sigmoid
    #[default]
    XavierUniform,
    /// He, for relu
    KaimingNormal,
}

// weight layout is [out, in, k...]
fn fans(shape: &[usize]) -> (f32, f32) {
    match shape {
        [] => (1.0, 1.0),
        [n] => (*n as f32, *n as f32),
        [out, inp, rest @ ..] => {
            let receptive: usize = rest.iter().product();
            ((inp * receptive) as f32, (out * receptive) as f32)
        }
    }
}

impl Initializer {
    pub fn validate(&self) -> Result<()> {
        match *self {
            Initializer::Uniform { scale } if !(scale.is_finite() && scale >= 0.0) => Err(
                Error::invalid_config(format!("uniform scale must be finite and >= 0, got {scale}")),
            ),
            Initializer::Normal { sigma } if !(sigma.is_finite() && sigma >= 0.0) => Err(
                Error::invalid_config(format!("normal sigma must be finite and >= 0, got {sigma}")),
            ),
            Initializer::Constant { value } if !value.is_finite() => Err(Error::invalid_config(
                format!("constant initializer must be finite, got {value}"),
            )),
            _ => Ok(()),
        }
    }

    /// Draws an array of `shape`.
    pub fn generate<R: Rng + ?Sized>(&self, shape: &[usize], rng: &mut R) -> Result<ArrayD<f32>> {
        self.validate()?;
        let dim = IxDyn(shape);
        let data = match *self {
            Initializer::Zeros => ArrayD::zeros(dim),
            Initializer::Ones => ArrayD::ones(dim),
            Initializer::Constant { value } => ArrayD::from_elem(dim, value),
            Initializer::Uniform { scale } => uniform(dim, scale, rng),
            Initializer::Normal { sigma } => normal(dim, sigma, rng)?,
            Initializer::XavierUniform => {
                let (fan_in, fan_out) = fans(shape);
                let limit = (6.0 / (fan_in + fan_out).max(1.0)).sqrt();
                uniform(dim, limit, rng)
            }
            Initializer::KaimingNormal => {
                let (fan_in, _) = fans(shape);
                normal(dim, (2.0 / fan_in.max(1.0)).sqrt(), rng)?
            }
        };
        Ok(data)
    }
}

fn uniform<R: Rng + ?Sized>(dim: IxDyn, scale: f32, rng: &mut R) -> ArrayD<f32> {
    if scale == 0.0 {
        return ArrayD::zeros(dim);
    }
    Array::random_using(dim, Uniform::new(-scale, scale), rng)
}

fn normal<R: Rng + ?Sized>(dim: IxDyn, sigma: f32, rng: &mut R) -> Result<ArrayD<f32>> {
    let dist = Normal::new(0.0, sigma).map_err(|e| Error::invalid_config(e.to_string()))?;
    Ok(Array::random_using(dim, dist, rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn constant_initializers() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(Initializer::Ones.generate(&[2, 3], &mut rng).unwrap().iter().all(|&v| v == 1.0));
        assert!(Initializer::Zeros.generate(&[4], &mut rng).unwrap().iter().all(|&v| v == 0.0));
        let c = Initializer::Constant { value: 0.5 }.generate(&[2], &mut rng).unwrap();
        assert_eq!(c.as_slice().unwrap(), &[0.5, 0.5]);
    }

    #[test]
    fn xavier_respects_limit() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let w = Initializer::XavierUniform.generate(&[4, 2], &mut rng).unwrap();
        let limit = (6.0f32 / 6.0).sqrt();
        assert!(w.iter().all(|&v| v.abs() <= limit));
    }

    #[test]
    fn conv_fans_include_receptive_field() {
        assert_eq!(fans(&[8, 3, 2, 2]), (12.0, 32.0));
        assert_eq!(fans(&[5]), (5.0, 5.0));
    }

    #[test]
    fn same_seed_same_values() {
        let a = Initializer::KaimingNormal
            .generate(&[3, 3], &mut ChaCha8Rng::seed_from_u64(9))
            .unwrap();
        let b = Initializer::KaimingNormal
            .generate(&[3, 3], &mut ChaCha8Rng::seed_from_u64(9))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_negative_sigma() {
        let err = Initializer::Normal { sigma: -1.0 }.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn json_uses_type_tag() {
        let json = serde_json::to_string(&Initializer::Uniform { scale: 0.1 }).unwrap();
        assert_eq!(json, r#"{"type":"uniform","scale":0.1}"#);
        let back: Initializer = serde_json::from_str(r#"{"type":"ones"}"#).unwrap();
        assert_eq!(back, Initializer::Ones);
    }
}
