//! Element types a parameter can be declared and persisted with.
//!
//! Computation always happens in `f32`. A parameter's declared type decides how
//! its values are quantized when materialized and how many bytes each value
//! takes on disk.

use half::f16;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    #[default]
    Float32,
    Float64,
    Float16,
    Uint8,
    Int32,
    Int8,
    Int64,
}

impl DataType {
    pub const ALL: [DataType; 7] = [
        DataType::Float32,
        DataType::Float64,
        DataType::Float16,
        DataType::Uint8,
        DataType::Int32,
        DataType::Int8,
        DataType::Int64,
    ];

    /// Tag byte written in front of a parameter's values.
    pub const fn tag(self) -> u8 {
        match self {
            DataType::Float32 => 0,
            DataType::Float64 => 1,
            DataType::Float16 => 2,
            DataType::Uint8 => 3,
            DataType::Int32 => 4,
            DataType::Int8 => 5,
            DataType::Int64 => 6,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|dt| dt.tag() == tag)
            .ok_or_else(|| Error::unsupported(format!("unknown data type tag {tag}")))
    }

    /// Bytes per element.
    pub const fn num_bytes(self) -> usize {
        match self {
            DataType::Uint8 | DataType::Int8 => 1,
            DataType::Float16 => 2,
            DataType::Float32 | DataType::Int32 => 4,
            DataType::Float64 | DataType::Int64 => 8,
        }
    }

    pub const fn is_floating(self) -> bool {
        matches!(
            self,
            DataType::Float32 | DataType::Float64 | DataType::Float16
        )
    }

    /// Rounds `value` to the nearest value representable in this type.
    ///
    /// Integer types round to nearest and saturate at their bounds. After
    /// quantization, encoding then decoding a value is exact.
    pub fn quantize(self, value: f32) -> f32 {
        match self {
            DataType::Float32 | DataType::Float64 => value,
            DataType::Float16 => f16::from_f32(value).to_f32(),
            DataType::Uint8 => value.round().clamp(0.0, f32::from(u8::MAX)),
            DataType::Int8 => value.round().clamp(f32::from(i8::MIN), f32::from(i8::MAX)),
            // `as` saturates, so out-of-range values land on the bounds.
            DataType::Int32 => value.round() as i32 as f32,
            DataType::Int64 => value.round() as i64 as f32,
        }
    }

    /// Appends `values` little-endian, each in this type's width.
    pub fn encode<'a>(self, values: impl IntoIterator<Item = &'a f32>, out: &mut Vec<u8>) {
        for &v in values {
            match self {
                DataType::Float32 => out.extend_from_slice(&v.to_le_bytes()),
                DataType::Float64 => out.extend_from_slice(&f64::from(v).to_le_bytes()),
                DataType::Float16 => out.extend_from_slice(&f16::from_f32(v).to_le_bytes()),
                DataType::Uint8 => out.push(self.quantize(v) as u8),
                DataType::Int8 => out.extend_from_slice(&(self.quantize(v) as i8).to_le_bytes()),
                DataType::Int32 => out.extend_from_slice(&(v.round() as i32).to_le_bytes()),
                DataType::Int64 => out.extend_from_slice(&(v.round() as i64).to_le_bytes()),
            }
        }
    }

    /// Decodes little-endian elements of this type into `f32`.
    ///
    /// `bytes.len()` must be a multiple of [`DataType::num_bytes`]. Wide
    /// elements that `f32` cannot hold exactly are a format error.
    pub fn decode(self, bytes: &[u8]) -> Result<Vec<f32>> {
        let width = self.num_bytes();
        if bytes.len() % width != 0 {
            return Err(Error::format(format!(
                "{} bytes is not a whole number of {self:?} elements",
                bytes.len()
            )));
        }
        bytes
            .chunks_exact(width)
            .map(|c| match self {
                DataType::Float32 => Ok(f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
                DataType::Float64 => {
                    let v = f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]);
                    let narrow = v as f32;
                    if f64::from(narrow) == v || v.is_nan() {
                        Ok(narrow)
                    } else {
                        Err(self.inexact(v))
                    }
                }
                DataType::Float16 => Ok(f16::from_le_bytes([c[0], c[1]]).to_f32()),
                DataType::Uint8 => Ok(f32::from(c[0])),
                DataType::Int8 => Ok(f32::from(i8::from_le_bytes([c[0]]))),
                DataType::Int32 => {
                    let v = i32::from_le_bytes([c[0], c[1], c[2], c[3]]);
                    Self::exact_integer(i64::from(v)).ok_or_else(|| self.inexact(v))
                }
                DataType::Int64 => {
                    let v = i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]);
                    Self::exact_integer(v).ok_or_else(|| self.inexact(v))
                }
            })
            .collect()
    }

    // `f32` of `v`, if converting back yields `v` again.
    fn exact_integer(v: i64) -> Option<f32> {
        let narrow = v as f32;
        (narrow as i128 == i128::from(v)).then_some(narrow)
    }

    fn inexact(self, value: impl std::fmt::Display) -> Error {
        Error::format(format!("{self:?} value {value} is not exactly representable"))
    }
}
