//! The YAML input file of `qmembed`.

use std::path::PathBuf;

use anyhow::{self, bail, format_err, Context};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::auxiliary::atom::Atom;
use crate::auxiliary::structure::{AtomicStructure, EmbeddingMask};
use crate::comm::ExecutionContext;
use crate::drivers::projection_embedding::{ProjectionEmbeddingDriver, ProjectionEmbeddingParams};
use crate::drivers::standard_dft::{StandardDftDriver, StandardDftParams};
use crate::drivers::EmbeddingDriver;
use crate::interfaces::binaries::BinariesSolver;
use crate::interfaces::InputHandle;
use crate::solver::CalculatorSettings;


// ==================
// Struct definitions
// ==================

/// Description of the atoms of the combined system.
///
/// Exactly one of `xyz` and `atoms` must be given.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StructureInput {
    /// An `xyz` file containing the atoms.
    #[serde(default)]
    pub xyz: Option<PathBuf>,

    /// The atoms given inline.
    #[serde(default)]
    pub atoms: Option<Vec<Atom>>,

    /// The lattice vectors in Ångström for periodic structures.
    #[serde(default)]
    pub lattice_vectors: Option<Vec<Vector3<f64>>>,
}

impl StructureInput {
    /// Constructs the layered structure.
    ///
    /// # Arguments
    ///
    /// * `mask` - The assignment of the atoms to embedding layers. If `None`, every atom is
    ///   placed in the active layer.
    pub fn to_structure(
        &self,
        mask: Option<&EmbeddingMask>,
    ) -> Result<AtomicStructure, anyhow::Error> {
        let atoms = match (self.xyz.as_ref(), self.atoms.as_ref()) {
            (Some(xyz), None) => {
                return match mask {
                    Some(mask) => {
                        AtomicStructure::from_xyz(xyz, mask, self.lattice_vectors.clone())
                    }
                    None => {
                        // The atom count is only known after parsing.
                        let unmasked = AtomicStructure::from_xyz(
                            xyz,
                            &EmbeddingMask::Count(0),
                            self.lattice_vectors.clone(),
                        )?;
                        AtomicStructure::new(
                            unmasked.atoms(),
                            &EmbeddingMask::Count(unmasked.n_atoms()),
                            self.lattice_vectors.clone(),
                        )
                    }
                }
            }
            (None, Some(atoms)) => atoms,
            (Some(_), Some(_)) => bail!("Only one of `xyz` and `atoms` may be specified."),
            (None, None) => bail!("Either `xyz` or `atoms` must be specified."),
        };
        let default_mask = EmbeddingMask::Count(atoms.len());
        AtomicStructure::new(
            atoms,
            mask.unwrap_or(&default_mask),
            self.lattice_vectors.clone(),
        )
    }
}

/// Description of the electronic-structure solver.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SolverInput {
    /// The directory containing the recorded calculator outputs, one directory per calculation.
    pub binaries_root: PathBuf,
}

/// An enumerated type representing the workflows that can be run from an input file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum WorkflowInput {
    /// Projection-based embedding of the layer-1 atoms in the layer-2 atoms.
    ProjectionEmbedding(ProjectionEmbeddingParams),

    /// A single low-level calculation of the combined system.
    StandardDft(StandardDftParams),
}

impl Default for WorkflowInput {
    fn default() -> Self {
        Self::ProjectionEmbedding(ProjectionEmbeddingParams::default())
    }
}

/// A structure containing `qmembed` input parameters which can be serialised into and
/// deserialised from a YAML input file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Input {
    /// The combined system.
    pub structure: StructureInput,

    /// The assignment of the atoms to embedding layers.
    ///
    /// If not specified, every atom is placed in the active layer.
    #[serde(default)]
    pub embedding_mask: Option<EmbeddingMask>,

    /// The low-level calculator settings.
    #[serde(default)]
    pub low_level: CalculatorSettings,

    /// The high-level calculator settings, required by projection embedding.
    #[serde(default)]
    pub high_level: Option<CalculatorSettings>,

    /// The workflow to run.
    #[serde(default)]
    pub workflow: WorkflowInput,

    /// The solver performing the calculations.
    pub solver: SolverInput,
}

impl InputHandle for Input {
    fn handle(&self, ctx: &dyn ExecutionContext) -> Result<(), anyhow::Error> {
        let structure = self
            .structure
            .to_structure(self.embedding_mask.as_ref())
            .with_context(|| "Unable to construct the structure from the input")?;
        let mut solver = BinariesSolver::new(&self.solver.binaries_root, ctx.rank());
        match &self.workflow {
            WorkflowInput::ProjectionEmbedding(params) => {
                let high_level = self.high_level.as_ref().ok_or_else(|| {
                    format_err!("Projection embedding requires `high_level` settings.")
                })?;
                let mut driver = ProjectionEmbeddingDriver::builder()
                    .parameters(params)
                    .structure(&structure)
                    .low_level(&self.low_level)
                    .high_level(high_level)
                    .solver(&mut solver)
                    .ctx(ctx)
                    .build()
                    .with_context(|| "Unable to construct a projection embedding driver")?;
                driver
                    .run()
                    .with_context(|| "Unable to run the projection embedding driver successfully")
            }
            WorkflowInput::StandardDft(params) => {
                let mut driver = StandardDftDriver::builder()
                    .parameters(params)
                    .structure(&structure)
                    .low_level(&self.low_level)
                    .solver(&mut solver)
                    .ctx(ctx)
                    .build()
                    .with_context(|| "Unable to construct a standard DFT driver")?;
                driver
                    .run()
                    .with_context(|| "Unable to run the standard DFT driver successfully")
            }
        }
    }
}
