//! Interfaces between `qmembed` and its users or other software.

use anyhow;

use crate::comm::ExecutionContext;

pub mod binaries;
pub mod cli;
pub mod input;

/// Trait for handling a parsed input file.
pub trait InputHandle {
    /// Handles the input and runs the requested workflow. Every rank must call this method.
    fn handle(&self, ctx: &dyn ExecutionContext) -> Result<(), anyhow::Error>;
}
