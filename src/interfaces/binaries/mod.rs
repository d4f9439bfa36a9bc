//! Replay of recorded calculator outputs stored as raw binary files.
//!
//! Each calculation reads a `solver.yml` manifest from `<root>/<label>/`. A layer calculated more
//! than once in a workflow reads its `n`-th manifest from `<root>/<label>.<n>/` instead. Paths in
//! a manifest are relative to the directory containing it.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{self, ensure, Context};
use derive_builder::Builder;
use itertools::Itertools;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::io::numeric::{read_f64_matrix, Endianness, MatrixOrder};
use crate::io::read_qmembed_yaml;
use crate::solver::callback::{
    BlacsDescriptor, LocalGather, MatrixCollector, MatrixDelivery, MatrixDescriptor, MatrixKind,
};
use crate::solver::{ElectronicStructureSolver, SolverJob, SolverOutcome};

#[cfg(test)]
#[path = "binaries_tests.rs"]
mod binaries_tests;

/// The name of the manifest file in each replay directory.
pub const MANIFEST_FILE: &str = "solver.yml";

/// The name of the log file expected by the scalar-energy reader.
const LOG_FILE: &str = "asi.log";

// ==================
// Struct definitions
// ==================

/// Description of one recorded calculation.
#[derive(Clone, Builder, Debug, Serialize, Deserialize)]
pub struct BinariesManifest {
    /// The total energy in eV.
    pub total_energy: f64,

    /// The owning atom of each basis function.
    pub basis_atoms: Vec<usize>,

    /// The byte order of all matrix files.
    #[builder(default)]
    #[serde(default)]
    pub byte_order: Endianness,

    /// The element order of all matrix files.
    #[builder(default)]
    #[serde(default)]
    pub matrix_order: MatrixOrder,

    /// The overlap matrix file.
    pub overlap: PathBuf,

    /// The Hamiltonian files, in the order the calculator constructed them.
    #[builder(default)]
    #[serde(default)]
    pub hamiltonians: Vec<PathBuf>,

    /// The density-matrix files, in the order the calculator constructed them.
    #[builder(default)]
    #[serde(default)]
    pub density_matrices: Vec<PathBuf>,

    /// The calculator log. Defaults to `asi.log` next to the manifest.
    #[builder(default = "None")]
    #[serde(default)]
    pub log: Option<PathBuf>,
}

impl BinariesManifest {
    /// Returns a builder to construct a [`BinariesManifest`] structure.
    pub fn builder() -> BinariesManifestBuilder {
        BinariesManifestBuilder::default()
    }

    fn read_matrix(&self, dir: &Path, file: &Path) -> Result<Array2<f64>, anyhow::Error> {
        let n = self.basis_atoms.len();
        read_f64_matrix(dir.join(file), (n, n), self.byte_order, self.matrix_order)
    }
}

/// Solver replaying recorded calculator outputs.
///
/// Every rank reads the manifests, but only the authoritative rank reads and delivers matrices.
#[derive(Clone, Debug)]
pub struct BinariesSolver {
    /// The directory containing one replay directory per calculation.
    root: PathBuf,

    /// The rank of the current process.
    rank: usize,

    /// The number of calculations performed so far for each layer label.
    calls: HashMap<String, usize>,
}

impl BinariesSolver {
    /// Creates a replay solver.
    ///
    /// # Arguments
    ///
    /// * `root` - The directory containing the replay directories.
    /// * `rank` - The rank of the current process.
    pub fn new<P: AsRef<Path>>(root: P, rank: usize) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            rank,
            calls: HashMap::new(),
        }
    }

    /// Returns the replay directory of the next calculation of `label` and counts the call.
    fn next_dir(&mut self, label: &str) -> PathBuf {
        let count = self.calls.entry(label.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            self.root.join(label)
        } else {
            self.root.join(format!("{label}.{count}"))
        }
    }
}

/// Delivers a dense matrix held entirely by this rank.
fn deliver_dense(collector: &mut MatrixCollector, kind: MatrixKind, mat: &Array2<f64>) {
    let n = mat.nrows();
    let blacs = BlacsDescriptor([1, 0, n as i32, n as i32, n as i32, n as i32, 0, 0, n as i32]);
    let data = mat.t().iter().copied().collect_vec();
    collector.deliver(
        kind,
        MatrixDelivery {
            k_point: 1,
            spin: 1,
            n_basis: n,
            blacs: Some(&blacs),
            data: Some(&data),
            descriptor: MatrixDescriptor::dense(),
        },
        &LocalGather,
    );
}

impl ElectronicStructureSolver for BinariesSolver {
    fn calculate(
        &mut self,
        job: &SolverJob<'_>,
        collector: &mut MatrixCollector,
    ) -> Result<SolverOutcome, anyhow::Error> {
        let dir = self.next_dir(job.label);
        let manifest: BinariesManifest = read_qmembed_yaml(dir.join(MANIFEST_FILE))
            .with_context(|| format!("Unable to read the replay manifest of `{}`", job.label))?;
        let natoms = job.structure.n_atoms();
        ensure!(
            manifest.basis_atoms.iter().all(|&atom| atom < natoms),
            "`{}` was recorded with basis functions on atoms beyond the {natoms} atoms of the structure.",
            job.label
        );
        let n = manifest.basis_atoms.len();
        for (name, mat) in [
            ("density", job.density_matrix_in),
            ("embedding", job.embedding_matrix_in),
        ] {
            if let Some(mat) = mat {
                ensure!(
                    mat.dim() == (n, n),
                    "The input {name} matrix of `{}` has shape {:?}, but {n} basis functions were recorded.",
                    job.label,
                    mat.dim()
                );
            }
        }

        let log_path = job.work_dir.join(LOG_FILE);
        if self.rank != self.authoritative_rank() {
            return Ok(SolverOutcome {
                total_energy: manifest.total_energy,
                basis_atoms: manifest.basis_atoms,
                overlap: None,
                log_path,
            });
        }

        log::debug!("Replaying `{}` from `{}`.", job.label, dir.display());
        let overlap = manifest
            .read_matrix(&dir, &manifest.overlap)
            .with_context(|| format!("Unable to read the overlap matrix of `{}`", job.label))?;
        for file in manifest.hamiltonians.iter() {
            let mat = manifest.read_matrix(&dir, file)?;
            deliver_dense(collector, MatrixKind::Hamiltonian, &mat);
        }
        for file in manifest.density_matrices.iter() {
            let mat = manifest.read_matrix(&dir, file)?;
            deliver_dense(collector, MatrixKind::DensityMatrix, &mat);
        }

        let recorded_log = dir.join(manifest.log.as_deref().unwrap_or(Path::new(LOG_FILE)));
        fs::create_dir_all(job.work_dir)?;
        fs::copy(&recorded_log, &log_path).with_context(|| {
            format!("Unable to copy the recorded log `{}`", recorded_log.display())
        })?;

        Ok(SolverOutcome {
            total_energy: manifest.total_energy,
            basis_atoms: manifest.basis_atoms,
            overlap: Some(overlap),
            log_path,
        })
    }
}
