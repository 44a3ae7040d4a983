//! A named top-level block together with the context it runs in.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use tracing::info;

use crate::block::Block;
use crate::context::Context;
use crate::dtype::DataType;
use crate::error::Result;
use crate::loader;
use crate::pair_list::PairList;
use crate::parameter::Parameter;
use crate::serialization;

/// Owns exactly one block and one [`Context`]; the unit of save and load.
pub struct Model {
    name: String,
    block: Box<dyn Block>,
    ctx: Context,
}

impl Model {
    pub fn new(name: impl Into<String>, block: impl Block + 'static) -> Self {
        Self::with_context(name, block, Context::new())
    }

    pub fn with_context(name: impl Into<String>, block: impl Block + 'static, ctx: Context) -> Self {
        Self {
            name: name.into(),
            block: Box::new(block),
            ctx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn block(&self) -> &dyn Block {
        self.block.as_ref()
    }

    pub fn block_mut(&mut self) -> &mut dyn Block {
        self.block.as_mut()
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    /// Splits the borrow so the block can run against the context.
    pub fn parts_mut(&mut self) -> (&mut dyn Block, &mut Context) {
        (self.block.as_mut(), &mut self.ctx)
    }

    /// Data type used for parameters materialized from now on.
    pub fn set_data_type(&mut self, data_type: DataType) {
        self.ctx.set_data_type(data_type);
    }

    pub fn parameters(&self) -> PairList<String, Parameter> {
        self.block.parameters()
    }

    /// Writes every parameter to `path`, replacing the file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut sink = BufWriter::new(File::create(path)?);
        self.block.save_parameters(&mut sink)?;
        info!(model = %self.name, path = %path.display(), "saved parameters");
        Ok(())
    }

    /// Reads a file written by [`Model::save`]. Bytes left after the last
    /// record make the whole load fail.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut source = BufReader::new(File::open(path)?);
        serialization::load_parameters_exact(&self.block.parameters(), &mut source)?;
        info!(model = %self.name, path = %path.display(), "loaded parameters");
        Ok(())
    }

    /// Fills parameters by name from a `.safetensors` file.
    pub fn import_safetensors(&self, path: impl AsRef<Path>) -> Result<usize> {
        loader::import_safetensors(&self.block.parameters(), path)
    }
}
