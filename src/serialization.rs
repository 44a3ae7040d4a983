//! Binary parameter records.
//!
//! A parameter file is the plain concatenation of one record per parameter,
//! in [`Block::parameters`](crate::block::Block::parameters) order. All
//! integers are little-endian:
//!
//! ```text
//! u32        name length in bytes
//! [u8]       name, UTF-8
//! u32        rank
//! u64 * rank dimensions
//! u8         data type tag (see DataType::tag)
//! [u8]       values, row-major, DataType::num_bytes each
//! ```

use std::io::{self, Read, Write};

use ndarray::{ArrayD, IxDyn};
use tracing::{debug, info};

use crate::dtype::DataType;
use crate::error::{Error, Result};
use crate::pair_list::PairList;
use crate::parameter::Parameter;

/// Longest accepted parameter name.
pub const MAX_NAME_BYTES: usize = 64 * 1024;
/// Highest accepted rank.
pub const MAX_RANK: usize = 32;

/// One decoded parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterRecord {
    pub name: String,
    pub shape: Vec<usize>,
    pub data_type: DataType,
    pub values: Vec<f32>,
}

impl ParameterRecord {
    /// Snapshot of a materialized parameter under `name`.
    pub fn from_parameter(name: &str, parameter: &Parameter) -> Result<Self> {
        let tensor = parameter.tensor()?;
        let data_type = parameter
            .data_type()
            .ok_or_else(|| Error::uninitialized(format!("parameter `{name}`")))?;
        Ok(Self {
            name: name.to_string(),
            shape: tensor.shape(),
            data_type,
            values: tensor.to_vec(),
        })
    }

    pub fn element_count(&self) -> Option<usize> {
        self.shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        let name = self.name.as_bytes();
        if name.len() > MAX_NAME_BYTES {
            return Err(Error::invalid_argument(format!(
                "parameter name of {} bytes exceeds {MAX_NAME_BYTES}",
                name.len()
            )));
        }
        if self.shape.len() > MAX_RANK {
            return Err(Error::invalid_argument(format!(
                "rank {} exceeds {MAX_RANK}",
                self.shape.len()
            )));
        }
        if self.element_count() != Some(self.values.len()) {
            return Err(Error::shape_mismatch(
                format!("record `{}`", self.name),
                &self.shape,
                self.values.len(),
            ));
        }

        out.extend_from_slice(&(name.len() as u32).to_le_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(&(self.shape.len() as u32).to_le_bytes());
        for &d in &self.shape {
            out.extend_from_slice(&(d as u64).to_le_bytes());
        }
        out.push(self.data_type.tag());
        self.data_type.encode(&self.values, out);
        Ok(())
    }

    pub fn write_to(&self, sink: &mut dyn Write) -> Result<()> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        sink.write_all(&buf)?;
        Ok(())
    }

    /// Reads the next record; `Ok(None)` on a clean end of stream.
    pub fn read_from(source: &mut dyn Read) -> Result<Option<Self>> {
        let mut len = [0u8; 4];
        if !read_or_eof(source, &mut len)? {
            return Ok(None);
        }
        let name_len = u32::from_le_bytes(len) as usize;
        if name_len > MAX_NAME_BYTES {
            return Err(Error::format(format!(
                "name length {name_len} exceeds {MAX_NAME_BYTES}"
            )));
        }
        let name = String::from_utf8(read_bytes(source, name_len, "parameter name")?)
            .map_err(|_| Error::format("parameter name is not UTF-8"))?;

        let rank = u32::from_le_bytes(read_array(source, "rank")?) as usize;
        if rank > MAX_RANK {
            return Err(Error::format(format!(
                "rank {rank} of `{name}` exceeds {MAX_RANK}"
            )));
        }
        let mut shape = Vec::with_capacity(rank);
        for _ in 0..rank {
            let d = u64::from_le_bytes(read_array(source, "dimension")?);
            let d = usize::try_from(d)
                .map_err(|_| Error::format(format!("dimension {d} of `{name}` too large")))?;
            shape.push(d);
        }

        let [tag] = read_array::<1>(source, "data type tag")?;
        let data_type = DataType::from_tag(tag)?;

        let byte_len = shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .and_then(|n| n.checked_mul(data_type.num_bytes()))
            .ok_or_else(|| Error::format(format!("element count of `{name}` overflows")))?;
        let values = data_type.decode(&read_bytes(source, byte_len, "parameter values")?)?;

        Ok(Some(Self {
            name,
            shape,
            data_type,
            values,
        }))
    }

    fn into_array(self) -> Result<(DataType, ArrayD<f32>)> {
        let data = ArrayD::from_shape_vec(IxDyn(&self.shape), self.values)?;
        Ok((self.data_type, data))
    }
}

fn eof(what: &str) -> Error {
    Error::format(format!("unexpected end of stream reading {what}"))
}

// false if the stream ended before the first byte
fn read_or_eof(source: &mut dyn Read, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(eof("name length")),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

fn read_array<const N: usize>(source: &mut dyn Read, what: &str) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    source.read_exact(&mut buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => eof(what),
        _ => e.into(),
    })?;
    Ok(buf)
}

// Reads through `take` so a corrupt length cannot force a huge allocation.
fn read_bytes(source: &mut dyn Read, len: usize, what: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    Read::take(&mut *source, len as u64).read_to_end(&mut buf)?;
    if buf.len() < len {
        return Err(eof(what));
    }
    Ok(buf)
}

/// Writes one record per parameter. Fails before writing anything if a
/// parameter is still unresolved.
pub fn save_parameters(parameters: &PairList<String, Parameter>, sink: &mut dyn Write) -> Result<()> {
    let records = parameters
        .iter()
        .map(|(name, p)| ParameterRecord::from_parameter(name, p))
        .collect::<Result<Vec<_>>>()?;
    for record in &records {
        record.write_to(sink)?;
    }
    sink.flush()?;
    debug!(count = records.len(), "saved parameters");
    Ok(())
}

/// Reads one record per parameter and stores them.
///
/// Records must appear in the same order and under the same names as
/// `parameters`. Already materialized parameters must match the stored shape
/// and data type; unresolved ones take them on. All records are read and
/// checked before any parameter is written, so on error nothing changes.
pub fn load_parameters(parameters: &PairList<String, Parameter>, source: &mut dyn Read) -> Result<()> {
    let staged = stage_records(parameters, source)?;
    commit(staged)
}

/// Like [`load_parameters`], but the stream must end right after the last
/// record.
pub fn load_parameters_exact(
    parameters: &PairList<String, Parameter>,
    source: &mut dyn Read,
) -> Result<()> {
    let staged = stage_records(parameters, source)?;
    let mut extra = [0u8; 1];
    if read_or_eof(source, &mut extra)? {
        return Err(Error::format("trailing bytes after the last parameter record"));
    }
    commit(staged)
}

type Staged<'a> = Vec<(&'a Parameter, (DataType, ArrayD<f32>))>;

fn stage_records<'a>(
    parameters: &'a PairList<String, Parameter>,
    source: &mut dyn Read,
) -> Result<Staged<'a>> {
    let mut staged = Vec::with_capacity(parameters.len());
    for (i, (key, param)) in parameters.iter().enumerate() {
        let record = ParameterRecord::read_from(source)?.ok_or_else(|| {
            Error::format(format!(
                "stream ended after {i} of {} parameters",
                parameters.len()
            ))
        })?;
        if &record.name != key {
            return Err(Error::format(format!(
                "expected parameter `{key}` at position {i}, found `{}`",
                record.name
            )));
        }
        param.check_compatible(&record.shape, record.data_type)?;
        staged.push((param, record.into_array()?));
    }
    Ok(staged)
}

fn commit(staged: Staged<'_>) -> Result<()> {
    let count = staged.len();
    for (param, (data_type, data)) in staged {
        param.set_array(data_type, data)?;
    }
    info!(count, "loaded parameters");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::init::Initializer;
    use crate::parameter::ParameterKind;
    use std::io::Cursor;

    fn record() -> ParameterRecord {
        ParameterRecord {
            name: "weight".into(),
            shape: vec![2, 2],
            data_type: DataType::Float32,
            values: vec![1.0, -2.0, 3.5, 4.0],
        }
    }

    #[test]
    fn byte_layout() {
        let mut buf = Vec::new();
        record().encode(&mut buf).unwrap();
        assert_eq!(&buf[..4], &6u32.to_le_bytes());
        assert_eq!(&buf[4..10], b"weight");
        assert_eq!(&buf[10..14], &2u32.to_le_bytes());
        assert_eq!(&buf[14..22], &2u64.to_le_bytes());
        assert_eq!(buf[30], DataType::Float32.tag());
        assert_eq!(buf.len(), 31 + 16);
    }

    #[test]
    fn decode_reads_back() {
        let mut buf = Vec::new();
        record().encode(&mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        assert_eq!(ParameterRecord::read_from(&mut cursor).unwrap(), Some(record()));
        assert_eq!(ParameterRecord::read_from(&mut cursor).unwrap(), None);
    }

    #[test]
    fn truncated_stream_is_format_error() {
        let mut buf = Vec::new();
        record().encode(&mut buf).unwrap();
        for cut in [2, 8, 20, 31, 40] {
            let err = ParameterRecord::read_from(&mut Cursor::new(&buf[..cut])).unwrap_err();
            assert!(matches!(err, Error::SerializationFormat(_)), "cut at {cut}");
        }
    }

    #[test]
    fn unknown_tag_is_unsupported() {
        let mut buf = Vec::new();
        record().encode(&mut buf).unwrap();
        buf[30] = 99;
        let err = ParameterRecord::read_from(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[test]
    fn corrupt_prefixes_are_rejected() {
        let huge_name = (u32::MAX).to_le_bytes();
        assert!(matches!(
            ParameterRecord::read_from(&mut Cursor::new(huge_name.to_vec())),
            Err(Error::SerializationFormat(_))
        ));

        let mut buf = Vec::new();
        record().encode(&mut buf).unwrap();
        buf[10..14].copy_from_slice(&1000u32.to_le_bytes());
        assert!(matches!(
            ParameterRecord::read_from(&mut Cursor::new(buf)),
            Err(Error::SerializationFormat(_))
        ));
    }

    #[test]
    fn encode_rejects_inconsistent_record() {
        let mut bad = record();
        bad.values.pop();
        assert!(bad.encode(&mut Vec::new()).is_err());
    }

    fn params(names: &[&str]) -> PairList<String, Parameter> {
        names
            .iter()
            .map(|n| (n.to_string(), Parameter::new(n, ParameterKind::Weight)))
            .collect()
    }

    #[test]
    fn save_requires_resolved_parameters() {
        let mut sink = Vec::new();
        let err = save_parameters(&params(&["w"]), &mut sink).unwrap_err();
        assert!(matches!(err, Error::Uninitialized(_)));
        assert!(sink.is_empty());
    }

    #[test]
    fn failed_load_leaves_parameters_untouched() {
        let mut ctx = Context::seeded(0);
        let source = params(&["a", "b"]);
        for p in source.values() {
            p.initialize(&mut ctx, &Initializer::Ones, &[2]).unwrap();
        }
        let mut buf = Vec::new();
        save_parameters(&source, &mut buf).unwrap();

        let target = params(&["a", "b"]);
        target.values()[0]
            .initialize(&mut ctx, &Initializer::Zeros, &[2])
            .unwrap();
        target.values()[1]
            .initialize(&mut ctx, &Initializer::Zeros, &[3])
            .unwrap();
        let err = load_parameters(&target, &mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
        assert!(target.values()[0].array().unwrap().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn load_checks_names() {
        let mut ctx = Context::seeded(0);
        let source = params(&["a"]);
        source.values()[0]
            .initialize(&mut ctx, &Initializer::Ones, &[1])
            .unwrap();
        let mut buf = Vec::new();
        save_parameters(&source, &mut buf).unwrap();
        let err = load_parameters(&params(&["b"]), &mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, Error::SerializationFormat(_)));
    }

    #[test]
    fn wide_values_f32_cannot_hold_fail_the_load() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(b"a");
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&1u64.to_le_bytes());
        buf.push(DataType::Int32.tag());
        buf.extend_from_slice(&16_777_217i32.to_le_bytes());

        let target = params(&["a"]);
        let err = load_parameters(&target, &mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, Error::SerializationFormat(_)));
        assert!(!target.values()[0].is_initialized());

        let len = buf.len();
        buf[len - 4..].copy_from_slice(&16_777_216i32.to_le_bytes());
        load_parameters(&target, &mut Cursor::new(&buf)).unwrap();
        let mut resaved = Vec::new();
        save_parameters(&target, &mut resaved).unwrap();
        assert_eq!(resaved, buf);
    }

    #[test]
    fn short_stream_fails() {
        let err = load_parameters(&params(&["a"]), &mut Cursor::new(Vec::<u8>::new())).unwrap_err();
        assert!(matches!(err, Error::SerializationFormat(_)));
    }

    #[test]
    fn load_resolves_fresh_parameters() {
        let mut ctx = Context::seeded(0);
        ctx.set_data_type(DataType::Float16);
        let source = params(&["a"]);
        source.values()[0]
            .initialize(&mut ctx, &Initializer::Uniform { scale: 1.0 }, &[3, 2])
            .unwrap();
        let mut buf = Vec::new();
        save_parameters(&source, &mut buf).unwrap();

        let target = params(&["a"]);
        load_parameters(&target, &mut Cursor::new(&buf)).unwrap();
        let loaded = &target.values()[0];
        assert_eq!(loaded.shape(), Some(vec![3, 2]));
        assert_eq!(loaded.data_type(), Some(DataType::Float16));
        assert_eq!(loaded.array().unwrap(), source.values()[0].array().unwrap());
    }
}
