//! # qmembed: projection-based QM-in-QM embedding
//!
//! `qmembed` partitions a molecular or periodic system into an active region (layer 1) and an
//! environment (layer 2), and drives an external electronic-structure engine through the
//! sequence of calculations of projection-based embedding:
//! - a low-level calculation of the combined system, localising the densities of both regions,
//! - a low-level and a high-level calculation of the active region in the embedding potential of
//!   the environment, with a projector keeping the active orbitals orthogonal to the environment,
//! - post-processing calculations evaluating every energy term with the high-level density.
//!
//! The active region can optionally be described in a truncated basis containing only the
//! functions of atoms carrying a significant share of its density.
//!
//! ## Engine coupling
//!
//! The engine is abstracted behind [`solver::ElectronicStructureSolver`]. Every Hamiltonian and
//! density matrix the engine constructs is delivered through the callback contract of
//! [`solver::callback`] in dense or packed-triangular storage. The crate ships
//! [`interfaces::binaries::BinariesSolver`], which replays engine outputs recorded as raw binary
//! files.
//!
//! ## Features
//!
//! - `mpi`: runs every calculation collectively on an MPI world communicator. Collected matrices
//!   are broadcast from the authoritative rank so that every rank holds identical copies.
//!
//! ## Examples and usage
//!
//! For most items, their usages are illustrated in test functions. The `qmembed` binary reads a
//! YAML input file:
//!
//! ```text
//! qmembed --config input.yml --output report.out
//! ```

pub mod auxiliary;
pub mod basis;
pub mod comm;
pub mod drivers;
pub mod interfaces;
pub mod io;
pub mod solver;
pub mod subsystem;
