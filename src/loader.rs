//! Imports parameter values from `.safetensors` files.

use std::fs::File;
use std::path::Path;

use half::bf16;
use memmap2::MmapOptions;
use ndarray::ArrayD;
use safetensors::{Dtype, SafeTensors};
use tracing::{info, warn};

use crate::dtype::DataType;
use crate::error::{Error, Result};
use crate::pair_list::PairList;
use crate::parameter::Parameter;

/// Fills `parameters` by name from a memory-mapped safetensors file.
///
/// Returns how many parameters were filled. See [`import_safetensors_bytes`].
pub fn import_safetensors(
    parameters: &PairList<String, Parameter>,
    path: impl AsRef<Path>,
) -> Result<usize> {
    let path = path.as_ref();
    let file = File::open(path)?;
    // SAFETY: the map is read-only and dropped before returning.
    let mmap = unsafe { MmapOptions::new().map(&file)? };
    info!(path = %path.display(), "importing safetensors weights");
    import_safetensors_bytes(parameters, &mmap)
}

/// Fills `parameters` by name from an in-memory safetensors buffer.
///
/// Names missing from the buffer are skipped with a warning. Every tensor is
/// converted and checked before any parameter is written, so a shape
/// mismatch or unsupported dtype leaves all parameters as they were.
pub fn import_safetensors_bytes(parameters: &PairList<String, Parameter>, bytes: &[u8]) -> Result<usize> {
    let tensors = SafeTensors::deserialize(bytes).map_err(|e| Error::SafeTensors(e.to_string()))?;

    let mut staged = Vec::new();
    for (name, param) in parameters.iter() {
        let view = match tensors.tensor(name) {
            Ok(view) => view,
            Err(_) => {
                warn!(parameter = %name, "parameter not found in safetensors file");
                continue;
            }
        };
        let (source_type, values) = convert(view.dtype(), view.data(), name)?;
        let array = ArrayD::from_shape_vec(view.shape().to_vec(), values)?;

        let data_type = match param.shape() {
            Some(expected) => {
                if expected != array.shape() {
                    return Err(Error::shape_mismatch(
                        format!("safetensors tensor `{name}`"),
                        &expected,
                        array.shape(),
                    ));
                }
                param.data_type().unwrap_or(source_type)
            }
            None => source_type,
        };
        staged.push((param, data_type, array));
    }

    let count = staged.len();
    for (param, data_type, array) in staged {
        param.set_array(data_type, array)?;
    }
    info!(count, total = parameters.len(), "imported safetensors parameters");
    Ok(count)
}

/// Decodes raw little-endian tensor bytes to `f32`, reporting the closest
/// [`DataType`] for parameters that take on the source type.
///
/// F64 weights are narrowed to `Float32` on purpose; integer tensors must fit
/// `f32` exactly.
fn convert(dtype: Dtype, bytes: &[u8], name: &str) -> Result<(DataType, Vec<f32>)> {
    let data_type = match dtype {
        Dtype::F32 => DataType::Float32,
        Dtype::F64 => {
            let values = bytes
                .chunks_exact(8)
                .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32)
                .collect();
            return Ok((DataType::Float32, values));
        }
        Dtype::F16 => DataType::Float16,
        Dtype::I32 => DataType::Int32,
        Dtype::I64 => DataType::Int64,
        Dtype::I8 => DataType::Int8,
        Dtype::U8 => DataType::Uint8,
        Dtype::BF16 => {
            let values = bytes
                .chunks_exact(2)
                .map(|b| bf16::from_le_bytes([b[0], b[1]]).to_f32())
                .collect();
            return Ok((DataType::Float32, values));
        }
        other => {
            return Err(Error::unsupported(format!(
                "safetensors dtype {other:?} for `{name}`"
            )))
        }
    };
    Ok((data_type, data_type.decode(bytes)?))
}
