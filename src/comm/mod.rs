//! Execution contexts for running workflows on one or more cooperating processes.
//!
//! Every workflow step is a collective operation: all ranks call it, and all ranks hold identical
//! copies of the collected matrices when it returns. The context handle is passed explicitly into
//! every component needing collective behaviour.

use anyhow::{self, format_err};
use serde::{de::DeserializeOwned, Serialize};

#[cfg(feature = "mpi")]
pub mod mpi;


/// The largest number of bytes sent in a single broadcast call.
const BROADCAST_CHUNK: usize = 256 * 1024 * 1024;

/// Trait for a set of cooperating processes executing the same workflow.
pub trait ExecutionContext {
    /// The rank of the current process.
    fn rank(&self) -> usize;

    /// The number of processes.
    fn size(&self) -> usize;

    /// Broadcasts a length from `root` to all processes.
    fn broadcast_length(&self, root: usize, len: &mut u64) -> Result<(), anyhow::Error>;

    /// Broadcasts a buffer from `root` to all processes. All processes must supply a buffer of
    /// the same length.
    fn broadcast_chunk(&self, root: usize, chunk: &mut [u8]) -> Result<(), anyhow::Error>;

    /// Terminates every process in the group.
    fn abort(&self, code: i32) -> !;

    /// Returns `true` if the current process is the root process that emits report output.
    fn is_root(&self) -> bool {
        self.rank() == 0
    }

    /// Broadcasts a byte buffer of arbitrary length from `root` to all processes.
    ///
    /// The length is sent first so that non-root processes can size their buffers, then the
    /// payload is sent in chunks of at most 256 MiB.
    fn broadcast_bytes(&self, root: usize, bytes: &mut Vec<u8>) -> Result<(), anyhow::Error> {
        let mut len = bytes.len() as u64;
        self.broadcast_length(root, &mut len)?;
        if self.rank() != root {
            bytes.resize(len as usize, 0u8);
        }
        let mut offset = 0usize;
        while offset < bytes.len() {
            let end = (offset + BROADCAST_CHUNK).min(bytes.len());
            self.broadcast_chunk(root, &mut bytes[offset..end])?;
            offset = end;
        }
        Ok(())
    }
}

/// Broadcasts a serialisable value from `root` to all processes. On non-root processes, `value`
/// is overwritten by the root's value.
///
/// # Arguments
///
/// * `ctx` - The execution context.
/// * `root` - The rank holding the authoritative value.
/// * `value` - The value to be broadcast or received.
pub fn broadcast<T>(
    ctx: &dyn ExecutionContext,
    root: usize,
    value: &mut T,
) -> Result<(), anyhow::Error>
where
    T: Serialize + DeserializeOwned,
{
    if ctx.size() == 1 {
        return Ok(());
    }
    let mut bytes = if ctx.rank() == root {
        bincode::serialize(value).map_err(|err| format_err!(err))?
    } else {
        Vec::new()
    };
    ctx.broadcast_bytes(root, &mut bytes)?;
    if ctx.rank() != root {
        *value = bincode::deserialize(&bytes).map_err(|err| format_err!(err))?;
    }
    Ok(())
}

/// Execution context for a single process.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialContext;

impl ExecutionContext for SerialContext {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn broadcast_length(&self, _: usize, _: &mut u64) -> Result<(), anyhow::Error> {
        Ok(())
    }

    fn broadcast_chunk(&self, _: usize, _: &mut [u8]) -> Result<(), anyhow::Error> {
        Ok(())
    }

    fn abort(&self, code: i32) -> ! {
        std::process::exit(code)
    }
}
