//! Drivers to carry out embedding workflows.

use std::fmt;

use anyhow::{self, ensure};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::basis::basis_info::{build_basis_info, select_active_atoms, BasisInfo};
use crate::subsystem::SubsystemResult;

pub mod projection_embedding;
pub mod standard_dft;


// =================
// Trait definitions
// =================

/// Trait defining behaviours of `qmembed` workflow drivers.
pub trait EmbeddingDriver {
    /// The type of the parameter structure controlling the driver.
    type Params;

    /// The type of the successful outcome when executing the driver.
    type Outcome;

    /// Executes the driver and stores the result internally.
    fn run(&mut self) -> Result<(), anyhow::Error>;

    /// Returns the result of the driver execution.
    fn result(&self) -> Result<&Self::Outcome, anyhow::Error>;
}

// ================
// Enum definitions
// ================

/// Enumerated type for the named layers of the embedding workflows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerName {
    /// The combined system at low level.
    #[serde(rename = "AB_LL")]
    AbLowLevel,

    /// The active fragment at low level.
    #[serde(rename = "A_LL")]
    ALowLevel,

    /// The embedded active fragment at high level.
    #[serde(rename = "A_HL")]
    AHighLevel,

    /// Single-shot high-level evaluation of the embedded active density.
    #[serde(rename = "A_HL_PP")]
    AHighLevelPostProcess,

    /// Single-shot low-level evaluation of the combined system at the embedded active density.
    #[serde(rename = "AB_LL_PP")]
    AbLowLevelPostProcess,
}

impl LayerName {
    /// The label of the layer, also used as the name of its working directory.
    pub fn label(&self) -> &'static str {
        match self {
            Self::AbLowLevel => "AB_LL",
            Self::ALowLevel => "A_LL",
            Self::AHighLevel => "A_HL",
            Self::AHighLevelPostProcess => "A_HL_PP",
            Self::AbLowLevelPostProcess => "AB_LL_PP",
        }
    }
}

impl fmt::Display for LayerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

// =========
// Functions
// =========

/// Computes the electron population $`\operatorname{tr}(\mathbf{S}\mathbf{D})`$ of a subsystem.
///
/// # Arguments
///
/// * `overlap` - The overlap matrix of the combined system.
/// * `density_matrix` - The density matrix of the subsystem in the same basis.
pub fn compute_population(
    overlap: &Array2<f64>,
    density_matrix: &Array2<f64>,
) -> Result<f64, anyhow::Error> {
    ensure!(
        overlap.dim() == density_matrix.dim(),
        "Overlap matrix {:?} and density matrix {:?} have different shapes.",
        overlap.dim(),
        density_matrix.dim()
    );
    Ok(overlap.dot(density_matrix).diag().sum())
}

/// Computes the basis truncation shared by every layer of a workflow.
///
/// The active atoms are those with a significant Mulliken charge in `active_density` against the
/// overlap of the combined system.
///
/// # Arguments
///
/// * `ab_result` - The result of a full-basis calculation on the combined system.
/// * `active_density` - The density matrix of the active fragment in the full basis.
/// * `natoms` - The number of atoms in the combined system.
/// * `threshold` - The Mulliken charge threshold.
pub fn compute_truncation_defaults(
    ab_result: &SubsystemResult,
    active_density: &Array2<f64>,
    natoms: usize,
    threshold: f64,
) -> Result<BasisInfo, anyhow::Error> {
    let active_mask = select_active_atoms(
        ab_result.overlap()?,
        active_density,
        &ab_result.basis_atoms,
        natoms,
        threshold,
    )?;
    build_basis_info(&ab_result.basis_atoms, &active_mask)
}
