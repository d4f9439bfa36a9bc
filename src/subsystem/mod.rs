//! Single solver invocations for one embedding layer.
//!
//! A [`SubsystemRunner`] owns the structure and calculator settings of one layer. Each call to
//! [`SubsystemRunner::run`] is collective: all ranks call it, and when it returns every rank holds
//! the same Hamiltonian and density-matrix snapshots, overlap matrix, and scalar energies.

use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{self, ensure, format_err};
use derive_builder::Builder;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::auxiliary::structure::AtomicStructure;
use crate::basis::basis_info::BasisInfo;
use crate::basis::truncation::{to_full, to_truncated};
use crate::comm::{broadcast, ExecutionContext};
use crate::io::aims::{
    insert_embedding_regions, read_scalar_energies, write_control_in, write_geometry_in,
    GEOMETRY_FILE,
};
use crate::io::format::qmembed_output;
use crate::solver::callback::{MatrixCollector, MatrixStorage};
use crate::solver::{CalculatorSettings, ElectronicStructureSolver, SolverJob};


/// Conversion factor from Hartree to electronvolt.
pub const HARTREE_TO_EV: f64 = 27.211384500;

// =================
// Error definitions
// =================

/// Error in the configuration of a subsystem, detected before any calculation starts.
#[derive(Debug, Clone)]
pub struct SubsystemConfigurationError(pub String);

impl fmt::Display for SubsystemConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Subsystem configuration error: {}.", self.0)
    }
}

impl Error for SubsystemConfigurationError {}

/// Error raised when a requested matrix was never delivered by the solver.
#[derive(Debug, Clone)]
pub struct MissingMatrixError(pub String);

impl fmt::Display for MissingMatrixError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Missing matrix: {}.", self.0)
    }
}

impl Error for MissingMatrixError {}

// ==================
// Struct definitions
// ==================

/// Energies extracted from the calculator log, in eV.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScalarEnergies {
    pub kinetic_energy: f64,
    pub electrostatic_energy: f64,
    pub eigenvalue_sum: f64,
}

/// Total energy of a single-shot calculation with the eigenvalue term evaluated against the
/// injected density instead of the output orbitals.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EigenvalueCorrection {
    /// $`E_h \operatorname{tr}(\mathbf{D}_\mathrm{in} \mathbf{H})`$ in eV.
    pub ev_corr_energy: f64,

    /// The corrected total energy in eV.
    pub ev_corr_total_energy: f64,
}

impl EigenvalueCorrection {
    /// Computes the correction.
    ///
    /// # Arguments
    ///
    /// * `total_energy` - The total energy reported by the solver, in eV.
    /// * `eigenvalue_sum` - The sum of eigenvalues reported by the solver, in eV.
    /// * `density_matrix_in` - The injected density matrix.
    /// * `hamiltonian_total` - The total Hamiltonian in the same basis, in Hartree.
    pub fn compute(
        total_energy: f64,
        eigenvalue_sum: f64,
        density_matrix_in: &Array2<f64>,
        hamiltonian_total: &Array2<f64>,
    ) -> Result<Self, anyhow::Error> {
        ensure!(
            density_matrix_in.dim() == hamiltonian_total.dim(),
            "Input density matrix {:?} and total Hamiltonian {:?} have different shapes.",
            density_matrix_in.dim(),
            hamiltonian_total.dim()
        );
        let ev_corr_energy = HARTREE_TO_EV * density_matrix_in.dot(hamiltonian_total).diag().sum();
        Ok(Self {
            ev_corr_energy,
            ev_corr_total_energy: total_energy - eigenvalue_sum + ev_corr_energy,
        })
    }
}

/// Inputs and options for the next run of a subsystem.
///
/// Input matrices are always given in the full basis of the combined system; they are truncated
/// when the configuration is applied.
#[derive(Clone, Builder, Debug, Default)]
pub struct SubsystemConfig {
    /// The density matrix used to initialise the calculation.
    #[builder(default = "None")]
    pub density_matrix_in: Option<Array2<f64>>,

    /// The matrix added to the Fock matrix at every self-consistency iteration.
    #[builder(default = "None")]
    pub embedding_matrix_in: Option<Array2<f64>>,

    /// The basis truncation shared by all layers of a workflow.
    #[builder(default = "None")]
    pub basis_info: Option<BasisInfo>,

    /// Boolean indicating if the calculation uses the truncated basis.
    #[builder(default = "false")]
    pub truncate: bool,

    /// The layer whose atoms are written as ghost sites.
    #[builder(default = "None")]
    pub ghost_layer: Option<u8>,

    /// Boolean indicating if the calculation stops after the first self-consistency step.
    #[builder(default = "false")]
    pub no_scf: bool,
}

impl SubsystemConfig {
    /// Returns a builder to construct a [`SubsystemConfig`] structure.
    pub fn builder() -> SubsystemConfigBuilder {
        SubsystemConfigBuilder::default()
    }
}

/// Matrices and energies collected on the authoritative rank and broadcast to all ranks.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct CollectedOutput {
    total_energy: f64,
    hamiltonians: MatrixStorage,
    density_matrices: MatrixStorage,
    overlap: Option<Array2<f64>>,
    basis_atoms: Vec<usize>,
    scalars: ScalarEnergies,
}

/// Everything produced by one run of a subsystem.
#[derive(Clone, Debug)]
pub struct SubsystemResult {
    /// The name of the layer.
    pub label: String,

    /// The total energy reported by the solver, in eV.
    pub total_energy: f64,

    /// The energies extracted from the calculator log, in eV.
    pub scalars: ScalarEnergies,

    /// The owning atom of each basis function of the calculation.
    pub basis_atoms: Vec<usize>,

    /// The eigenvalue-corrected energy, if requested.
    pub eigenvalue_correction: Option<EigenvalueCorrection>,

    hamiltonians: MatrixStorage,

    density_matrices: MatrixStorage,

    overlap: Option<Array2<f64>>,

    /// The truncation applied to the calculation, if any.
    truncation: Option<BasisInfo>,
}

impl SubsystemResult {
    /// The number of basis functions of the calculation.
    pub fn n_basis(&self) -> usize {
        self.basis_atoms.len()
    }

    /// All Hamiltonian snapshots in the basis of the calculation.
    pub fn hamiltonians(&self) -> &MatrixStorage {
        &self.hamiltonians
    }

    /// All density-matrix snapshots in the basis of the calculation.
    pub fn density_matrices(&self) -> &MatrixStorage {
        &self.density_matrices
    }

    fn hamiltonian_at(&self, sequence_index: usize, what: &str) -> Result<&Array2<f64>, anyhow::Error> {
        self.hamiltonians.get(sequence_index, 1, 1).ok_or_else(|| {
            MissingMatrixError(format!(
                "`{}` has no {what} Hamiltonian (index {sequence_index} of {} delivered)",
                self.label,
                self.hamiltonians.count()
            ))
            .into()
        })
    }

    fn expanded(&self, mat: &Array2<f64>) -> Result<Array2<f64>, anyhow::Error> {
        match self.truncation.as_ref() {
            Some(bi) => to_full(mat, bi),
            None => Ok(mat.clone()),
        }
    }

    /// The last Hamiltonian delivered, in the basis of the calculation.
    pub fn raw_hamiltonian_total(&self) -> Result<&Array2<f64>, anyhow::Error> {
        self.hamiltonian_at(self.hamiltonians.count(), "total")
    }

    /// The total Hamiltonian, i.e. the last one delivered, in the full basis.
    pub fn hamiltonian_total(&self) -> Result<Array2<f64>, anyhow::Error> {
        self.expanded(self.raw_hamiltonian_total()?)
    }

    /// The kinetic Hamiltonian, i.e. the second-to-last one delivered, in the full basis.
    pub fn hamiltonian_kinetic(&self) -> Result<Array2<f64>, anyhow::Error> {
        let count = self.hamiltonians.count();
        ensure!(
            count >= 2,
            MissingMatrixError(format!(
                "`{}` delivered {count} Hamiltonian(s), but the kinetic part needs at least two",
                self.label
            ))
        );
        self.expanded(self.hamiltonian_at(count - 1, "kinetic")?)
    }

    /// The electrostatic Hamiltonian, i.e. total minus kinetic, in the full basis.
    pub fn hamiltonian_electrostatic(&self) -> Result<Array2<f64>, anyhow::Error> {
        Ok(self.hamiltonian_total()? - self.hamiltonian_kinetic()?)
    }

    /// All density matrices of the first spin channel and k-point in delivery order, in the full
    /// basis.
    pub fn density_matrices_out(&self) -> Result<Vec<Array2<f64>>, anyhow::Error> {
        ensure!(
            self.density_matrices.count() > 0,
            MissingMatrixError(format!("`{}` stored no density matrices", self.label))
        );
        (1..=self.density_matrices.count())
            .map(|i| {
                let dm = self.density_matrices.get(i, 1, 1).ok_or_else(|| {
                    MissingMatrixError(format!(
                        "`{}` has no density matrix with index {i}",
                        self.label
                    ))
                })?;
                self.expanded(dm)
            })
            .collect()
    }

    /// The `i`th density matrix (zero-based) of the first spin channel and k-point, in the full
    /// basis.
    pub fn density_matrix_out(&self, i: usize) -> Result<Array2<f64>, anyhow::Error> {
        let dm = self.density_matrices.get(i + 1, 1, 1).ok_or_else(|| {
            MissingMatrixError(format!(
                "`{}` has no density matrix with index {} ({} delivered)",
                self.label,
                i + 1,
                self.density_matrices.count()
            ))
        })?;
        self.expanded(dm)
    }

    /// The overlap matrix in the basis of the calculation.
    pub fn overlap(&self) -> Result<&Array2<f64>, anyhow::Error> {
        self.overlap.as_ref().ok_or_else(|| {
            MissingMatrixError(format!("`{}` has no overlap matrix", self.label)).into()
        })
    }
}

/// Runner of the calculations of one embedding layer.
#[derive(Clone, Debug)]
pub struct SubsystemRunner {
    /// The name of the layer, also used as its working-directory name.
    label: String,

    /// The full structure of the combined system, reordered by layer.
    structure: AtomicStructure,

    settings: CalculatorSettings,

    /// The directory under which the working directory is created.
    work_root: PathBuf,

    config: SubsystemConfig,

    result: Option<SubsystemResult>,
}

impl SubsystemRunner {
    /// Creates a runner with an empty configuration.
    ///
    /// # Arguments
    ///
    /// * `label` - The name of the layer.
    /// * `structure` - The full structure of the combined system.
    /// * `settings` - The calculator settings of the layer.
    /// * `work_root` - The directory under which the working directory `label` is created.
    pub fn new(
        label: &str,
        structure: &AtomicStructure,
        settings: CalculatorSettings,
        work_root: &Path,
    ) -> Self {
        Self {
            label: label.to_string(),
            structure: structure.clone(),
            settings,
            work_root: work_root.to_path_buf(),
            config: SubsystemConfig::default(),
            result: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn settings(&self) -> &CalculatorSettings {
        &self.settings
    }

    /// The working directory of the layer.
    pub fn work_dir(&self) -> PathBuf {
        self.work_root.join(&self.label)
    }

    /// The configuration of the next run, with input matrices in the basis of the calculation.
    pub fn config(&self) -> &SubsystemConfig {
        &self.config
    }

    /// Applies a configuration for the next run.
    ///
    /// Input matrices must be square and, if basis information is given, sized to the full
    /// basis. When truncating, they are restricted to the truncated basis here.
    ///
    /// # Errors
    ///
    /// Errors with [`SubsystemConfigurationError`] if truncation is requested without basis
    /// information, if the basis information does not describe this structure, or if an input
    /// matrix has the wrong shape.
    pub fn configure(&mut self, config: SubsystemConfig) -> Result<(), anyhow::Error> {
        let SubsystemConfig {
            density_matrix_in,
            embedding_matrix_in,
            basis_info,
            truncate,
            ghost_layer,
            no_scf,
        } = config;
        let config_err = |msg: String| -> anyhow::Error {
            SubsystemConfigurationError(format!("`{}`: {msg}", self.label)).into()
        };
        if truncate && basis_info.is_none() {
            return Err(config_err(
                "basis truncation requested without basis information".to_string(),
            ));
        }
        if let Some(bi) = basis_info.as_ref() {
            if bi.full_natoms() != self.structure.n_atoms() {
                return Err(config_err(format!(
                    "basis information describes {} atoms, but the structure has {}",
                    bi.full_natoms(),
                    self.structure.n_atoms()
                )));
            }
        }
        let prepare = |mat: Option<Array2<f64>>,
                       what: &str|
         -> Result<Option<Array2<f64>>, anyhow::Error> {
            let Some(mat) = mat else {
                return Ok(None);
            };
            let (nrows, ncols) = mat.dim();
            if nrows != ncols {
                return Err(config_err(format!("{what} is not square ({nrows}×{ncols})")));
            }
            match basis_info.as_ref() {
                Some(bi) if nrows != bi.full_nbasis() => Err(config_err(format!(
                    "{what} is {nrows}×{ncols}, but the full basis has {} functions",
                    bi.full_nbasis()
                ))),
                Some(bi) if truncate => Ok(Some(to_truncated(&mat, bi)?)),
                _ => Ok(Some(mat)),
            }
        };
        let density_matrix_in = prepare(density_matrix_in, "input density matrix")?;
        let embedding_matrix_in = prepare(embedding_matrix_in, "input embedding matrix")?;
        if let (Some(dm), Some(emb)) = (density_matrix_in.as_ref(), embedding_matrix_in.as_ref()) {
            if dm.dim() != emb.dim() {
                return Err(config_err(format!(
                    "input density matrix {:?} and embedding matrix {:?} differ in shape",
                    dm.dim(),
                    emb.dim()
                )));
            }
        }
        self.config = SubsystemConfig {
            density_matrix_in,
            embedding_matrix_in,
            basis_info,
            truncate,
            ghost_layer,
            no_scf,
        };
        Ok(())
    }

    /// Runs one calculation of this layer.
    ///
    /// # Arguments
    ///
    /// * `solver` - The electronic-structure solver.
    /// * `ctx` - The execution context. Every rank must call this method.
    /// * `correct_eigenvalues` - Boolean indicating if the eigenvalue-corrected total energy is
    ///   to be computed from the input density matrix.
    ///
    /// # Errors
    ///
    /// Errors if writing the input files fails, if the solver fails, if a matrix delivery fails,
    /// if the calculator log lacks the expected energies, or if the eigenvalue correction is
    /// requested without an input density matrix.
    pub fn run<S: ElectronicStructureSolver + ?Sized>(
        &mut self,
        solver: &mut S,
        ctx: &dyn ExecutionContext,
        correct_eigenvalues: bool,
    ) -> Result<&SubsystemResult, anyhow::Error> {
        if ctx.is_root() {
            qmembed_output!("Calculation {}...", self.label);
        }
        ensure!(
            !correct_eigenvalues || self.config.density_matrix_in.is_some(),
            SubsystemConfigurationError(format!(
                "`{}`: eigenvalue correction requires an input density matrix",
                self.label
            ))
        );
        self.result = None;

        let ghosts_full = self.structure.ghost_mask(self.config.ghost_layer);
        let truncation = if self.config.truncate {
            self.config.basis_info.clone()
        } else {
            None
        };
        let (structure, ghosts) = match truncation.as_ref() {
            Some(bi) => (
                self.structure.select(bi.active_atoms())?,
                bi.active_atoms()
                    .iter()
                    .map(|&atom| ghosts_full[atom])
                    .collect::<Vec<_>>(),
            ),
            None => (self.structure.clone(), ghosts_full),
        };

        let mut settings = self.settings.clone();
        if self.config.no_scf {
            settings.set("sc_iter_limit", 0);
        }

        let work_dir = self.work_dir();
        if ctx.is_root() {
            write_control_in(&work_dir, &settings)?;
            write_geometry_in(&work_dir, &structure, &ghosts)?;
            insert_embedding_regions(&work_dir.join(GEOMETRY_FILE), structure.layers())?;
        }

        let job = SolverJob {
            label: &self.label,
            structure: &structure,
            ghosts: &ghosts,
            settings: &settings,
            work_dir: &work_dir,
            density_matrix_in: self.config.density_matrix_in.as_ref(),
            embedding_matrix_in: self.config.embedding_matrix_in.as_ref(),
        };
        let mut collector = MatrixCollector::new(&self.label);
        let outcome = solver.calculate(&job, &mut collector)?;
        let (hamiltonians, density_matrices) = collector.finish()?;

        let root = solver.authoritative_rank();
        let mut output = if ctx.rank() == root {
            CollectedOutput {
                total_energy: outcome.total_energy,
                hamiltonians,
                density_matrices,
                overlap: outcome.overlap,
                basis_atoms: outcome.basis_atoms,
                scalars: read_scalar_energies(&outcome.log_path)?,
            }
        } else {
            CollectedOutput::default()
        };
        broadcast(ctx, root, &mut output)?;

        let expected_nbasis = truncation.as_ref().map(|bi| bi.trunc_nbasis());
        if let Some(nbasis) = expected_nbasis {
            ensure!(
                output.basis_atoms.len() == nbasis,
                "`{}` ran with {} basis functions, but the truncated basis has {nbasis}.",
                self.label,
                output.basis_atoms.len()
            );
        }
        log::debug!(
            "{}: {} Hamiltonian(s) and {} density matrix(ces) collected.",
            self.label,
            output.hamiltonians.count(),
            output.density_matrices.count()
        );

        let mut result = SubsystemResult {
            label: self.label.clone(),
            total_energy: output.total_energy,
            scalars: output.scalars,
            basis_atoms: output.basis_atoms,
            eigenvalue_correction: None,
            hamiltonians: output.hamiltonians,
            density_matrices: output.density_matrices,
            overlap: output.overlap,
            truncation,
        };

        if correct_eigenvalues {
            let density_matrix_in = self.config.density_matrix_in.as_ref().ok_or_else(|| {
                format_err!("`{}` has no input density matrix.", self.label)
            })?;
            result.eigenvalue_correction = Some(EigenvalueCorrection::compute(
                result.total_energy,
                result.scalars.eigenvalue_sum,
                density_matrix_in,
                result.raw_hamiltonian_total()?,
            )?);
        }

        Ok(&*self.result.insert(result))
    }

    /// The result of the last run.
    pub fn result(&self) -> Result<&SubsystemResult, anyhow::Error> {
        self.result
            .as_ref()
            .ok_or_else(|| format_err!("`{}` has not been run.", self.label))
    }
}
