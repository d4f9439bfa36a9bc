//! Execution context backed by an MPI communicator.

use anyhow::{self, ensure};
use mpi::topology::{Communicator, SimpleCommunicator};
use mpi::traits::*;

use crate::comm::ExecutionContext;

/// Execution context wrapping an MPI communicator, normally `MPI_COMM_WORLD`.
pub struct MpiContext {
    world: SimpleCommunicator,
}

impl MpiContext {
    /// Wraps a communicator.
    pub fn new(world: SimpleCommunicator) -> Self {
        Self { world }
    }

    fn check_root(&self, root: usize) -> Result<(), anyhow::Error> {
        ensure!(
            root < self.size(),
            "Broadcast root {root} is out of range for {} ranks.",
            self.size()
        );
        Ok(())
    }
}

impl ExecutionContext for MpiContext {
    fn rank(&self) -> usize {
        self.world.rank() as usize
    }

    fn size(&self) -> usize {
        self.world.size() as usize
    }

    fn broadcast_length(&self, root: usize, len: &mut u64) -> Result<(), anyhow::Error> {
        self.check_root(root)?;
        self.world.process_at_rank(root as i32).broadcast_into(len);
        Ok(())
    }

    fn broadcast_chunk(&self, root: usize, chunk: &mut [u8]) -> Result<(), anyhow::Error> {
        self.check_root(root)?;
        self.world.process_at_rank(root as i32).broadcast_into(chunk);
        Ok(())
    }

    fn abort(&self, code: i32) -> ! {
        self.world.abort(code)
    }
}
