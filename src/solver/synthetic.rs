//! A deterministic model solver for tests.
//!
//! Every atom carries the same number of basis functions. The overlap couples different atoms
//! through a distance-dependent factor, the kinetic Hamiltonian is diagonal, and the total
//! Hamiltonian adds a potential scaled down on ghost sites plus any injected embedding matrix.
//! All quantities of a truncated calculation are sub-blocks of those of the full calculation.

use std::fs;

use anyhow;
use itertools::Itertools;
use ndarray::Array2;

use crate::solver::callback::{
    BlacsDescriptor, LocalGather, MatrixCollector, MatrixDelivery, MatrixDescriptor, MatrixKind,
    MatrixType, StorageType,
};
use crate::solver::{
    CalculatorSettings, ElectronicStructureSolver, SettingValue, SolverJob, SolverOutcome,
};
use crate::subsystem::HARTREE_TO_EV;

/// A copy of the inputs of one calculation.
#[derive(Clone, Debug)]
pub(crate) struct RecordedJob {
    pub(crate) label: String,
    pub(crate) n_atoms: usize,
    pub(crate) ghosts: Vec<bool>,
    pub(crate) settings: CalculatorSettings,
    pub(crate) density_matrix_in: Option<Array2<f64>>,
    pub(crate) embedding_matrix_in: Option<Array2<f64>>,
}

#[derive(Clone, Debug)]
pub(crate) struct SyntheticSolver {
    pub(crate) orbitals_per_atom: usize,
    pub(crate) hamiltonian_storage: StorageType,
    pub(crate) density_storage: StorageType,
    pub(crate) matrix_type: MatrixType,
    /// Only the total Hamiltonian is delivered.
    pub(crate) skip_kinetic: bool,
    /// Added to every reported total energy, in eV.
    pub(crate) energy_shift: f64,
    /// Density coupling the first orbital of every layer-1 atom to the first orbital of every
    /// other atom in the layer-1 density.
    pub(crate) active_coupling: f64,
    pub(crate) jobs: Vec<RecordedJob>,
}

impl SyntheticSolver {
    pub(crate) fn new(
        orbitals_per_atom: usize,
        hamiltonian_storage: StorageType,
        density_storage: StorageType,
    ) -> Self {
        Self {
            orbitals_per_atom,
            hamiltonian_storage,
            density_storage,
            matrix_type: MatrixType::Hermitian,
            skip_kinetic: false,
            energy_shift: 0.0,
            active_coupling: 0.0,
            jobs: Vec::new(),
        }
    }

    pub(crate) fn job(&self, label: &str) -> Option<&RecordedJob> {
        self.jobs.iter().rev().find(|job| job.label == label)
    }

    fn deliver(
        &self,
        collector: &mut MatrixCollector,
        kind: MatrixKind,
        storage_type: StorageType,
        mat: &Array2<f64>,
    ) {
        let n = mat.nrows();
        let blacs = BlacsDescriptor([1, 0, n as i32, n as i32, n as i32, n as i32, 0, 0, n as i32]);
        let data = match storage_type {
            StorageType::DenseDistributed => mat.t().iter().copied().collect_vec(),
            StorageType::UpperTriangularPacked => (0..n)
                .flat_map(|j| (0..=j).map(move |i| (i, j)))
                .map(|ij| mat[ij])
                .collect_vec(),
            StorageType::LowerTriangularPacked => (0..n)
                .flat_map(|j| (j..n).map(move |i| (i, j)))
                .map(|ij| mat[ij])
                .collect_vec(),
        };
        let descriptor = match storage_type {
            StorageType::DenseDistributed => MatrixDescriptor::dense(),
            packed => MatrixDescriptor {
                matrix_type: self.matrix_type,
                ..MatrixDescriptor::packed(packed)
            },
        };
        collector.deliver(
            kind,
            MatrixDelivery {
                k_point: 1,
                spin: 1,
                n_basis: n,
                blacs: if storage_type == StorageType::DenseDistributed {
                    Some(&blacs)
                } else {
                    None
                },
                data: Some(&data),
                descriptor,
            },
            &LocalGather,
        );
    }
}

fn trace_product(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    a.dot(b).diag().sum()
}

impl ElectronicStructureSolver for SyntheticSolver {
    fn calculate(
        &mut self,
        job: &SolverJob<'_>,
        collector: &mut MatrixCollector,
    ) -> Result<SolverOutcome, anyhow::Error> {
        let norb = self.orbitals_per_atom;
        let atoms = job.structure.atoms();
        let n = atoms.len() * norb;
        let basis_atoms = (0..atoms.len())
            .flat_map(|atom| std::iter::repeat(atom).take(norb))
            .collect_vec();

        let overlap = Array2::from_shape_fn((n, n), |(mu, nu)| {
            let (a, b) = (basis_atoms[mu], basis_atoms[nu]);
            if mu == nu {
                1.0
            } else if a == b {
                0.0
            } else {
                0.1 * (-(atoms[a].coordinates - atoms[b].coordinates).norm()).exp()
            }
        });
        let kinetic = Array2::from_shape_fn((n, n), |(mu, nu)| {
            if mu == nu {
                0.5 + 0.1 * (mu % norb) as f64
            } else {
                0.0
            }
        });
        let potential = Array2::from_shape_fn((n, n), |(mu, nu)| {
            let weight = |atom: usize| if job.ghosts[atom] { 0.5 } else { 1.0 };
            -overlap[(mu, nu)] * weight(basis_atoms[mu]) * weight(basis_atoms[nu])
        });
        let mut total = &kinetic + &potential;
        if let Some(emb) = job.embedding_matrix_in {
            total = total + emb;
        }

        let layers = job.structure.layers();
        let coupling = self.active_coupling;
        let layer_density = |layer: u8| {
            Array2::from_shape_fn((n, n), |(mu, nu)| {
                let (a, b) = (basis_atoms[mu], basis_atoms[nu]);
                if mu % norb != 0 || nu % norb != 0 {
                    0.0
                } else if mu == nu && layers[a] == layer {
                    2.0
                } else if mu != nu && layer == 1 && (layers[a] == 1 || layers[b] == 1) {
                    coupling
                } else {
                    0.0
                }
            })
        };
        let embedding_calc = job.settings.get("qm_embedding_calc");
        let density_matrices = match (embedding_calc, job.density_matrix_in) {
            (Some(SettingValue::Int(1)), _) => vec![layer_density(1), layer_density(2)],
            (Some(SettingValue::Int(3)), Some(dm)) => vec![dm * 0.95],
            (_, Some(dm)) => vec![dm.clone()],
            (_, None) => vec![layer_density(1) + layer_density(2)],
        };

        if !self.skip_kinetic {
            self.deliver(collector, MatrixKind::Hamiltonian, self.hamiltonian_storage, &kinetic);
        }
        self.deliver(collector, MatrixKind::Hamiltonian, self.hamiltonian_storage, &total);
        for dm in density_matrices.iter() {
            self.deliver(collector, MatrixKind::DensityMatrix, self.density_storage, dm);
        }

        let dm_out = &density_matrices[density_matrices.len() - 1];
        let nuclear = -10.0 * job.ghosts.iter().filter(|ghost| !**ghost).count() as f64;
        let eigenvalue_sum = trace_product(dm_out, &total);
        let kinetic_energy = trace_product(dm_out, &kinetic);
        let electrostatic_energy = trace_product(dm_out, &potential);
        let total_energy =
            HARTREE_TO_EV * (0.5 * (eigenvalue_sum + kinetic_energy) + nuclear) + self.energy_shift;

        let log_path = job.work_dir.join("asi.log");
        let line = |label: &str, value: f64| {
            format!("  | {label:<30}: {value:20.10} Ha {:20.10} eV\n", value * HARTREE_TO_EV)
        };
        fs::write(
            &log_path,
            [
                line("Sum of eigenvalues", eigenvalue_sum),
                line("Kinetic energy", kinetic_energy),
                line("Electrostatic energy", electrostatic_energy),
            ]
            .concat(),
        )?;

        self.jobs.push(RecordedJob {
            label: job.label.to_string(),
            n_atoms: atoms.len(),
            ghosts: job.ghosts.to_vec(),
            settings: job.settings.clone(),
            density_matrix_in: job.density_matrix_in.cloned(),
            embedding_matrix_in: job.embedding_matrix_in.cloned(),
        });

        Ok(SolverOutcome {
            total_energy,
            basis_atoms,
            overlap: Some(overlap),
            log_path,
        })
    }
}
