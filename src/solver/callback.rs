//! Contract through which a solver delivers Hamiltonian and density-matrix snapshots.
//!
//! The solver invokes [`MatrixCollector::deliver`] each time it constructs a matrix. Distributed
//! dense data are gathered to a single rank, packed triangular data are expanded to dense
//! symmetric matrices, and the result is stored under an incrementing sequence index.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;

use anyhow::{self, ensure};
use ndarray::{Array2, ShapeBuilder};
use serde::{Deserialize, Serialize};

#[cfg(test)]
#[path = "callback_tests.rs"]
mod callback_tests;

// =================
// Error definitions
// =================

/// Error raised while a solver delivers a matrix. These errors are fatal to the whole
/// workflow.
#[derive(Debug, Clone)]
pub struct MatrixCallbackError(pub String);

impl fmt::Display for MatrixCallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Matrix callback error: {}.", self.0)
    }
}

impl Error for MatrixCallbackError {}

// ================
// Enum definitions
// ================

/// Enumerated type for the storage layouts of delivered matrices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageType {
    /// Full dense matrix, possibly distributed in a block-cyclic layout.
    DenseDistributed,

    /// Lower triangle, packed column by column.
    LowerTriangularPacked,

    /// Upper triangle, packed column by column.
    UpperTriangularPacked,
}

/// Enumerated type for the symmetry of delivered matrices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatrixType {
    /// No symmetry assumed.
    Generic,

    /// Hermitian (real symmetric) matrix.
    Hermitian,
}

/// Enumerated type for the numeric field of delivered matrices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Real,
    Complex,
}

/// Enumerated type for the two callback families.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatrixKind {
    Hamiltonian,
    DensityMatrix,
}

impl fmt::Display for MatrixKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hamiltonian => write!(f, "Hamiltonian"),
            Self::DensityMatrix => write!(f, "density matrix"),
        }
    }
}

// ==================
// Struct definitions
// ==================

/// Description of the layout of a delivered matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixDescriptor {
    pub storage_type: StorageType,
    pub matrix_type: MatrixType,
    pub data_type: DataType,
}

impl MatrixDescriptor {
    /// Descriptor of a real dense matrix.
    pub fn dense() -> Self {
        Self {
            storage_type: StorageType::DenseDistributed,
            matrix_type: MatrixType::Generic,
            data_type: DataType::Real,
        }
    }

    /// Descriptor of a real symmetric matrix packed in one triangle.
    pub fn packed(storage_type: StorageType) -> Self {
        Self {
            storage_type,
            matrix_type: MatrixType::Hermitian,
            data_type: DataType::Real,
        }
    }
}

/// BLACS array descriptor of a block-cyclically distributed matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacsDescriptor(pub [i32; 9]);

impl BlacsDescriptor {
    /// The global number of rows.
    pub fn nrows(&self) -> usize {
        self.0[2] as usize
    }

    /// The global number of columns.
    pub fn ncols(&self) -> usize {
        self.0[3] as usize
    }
}

/// A single matrix delivered by a solver.
#[derive(Clone, Copy, Debug)]
pub struct MatrixDelivery<'a> {
    /// The one-based k-point index.
    pub k_point: usize,

    /// The one-based spin-channel index.
    pub spin: usize,

    /// The number of basis functions of the calculation.
    pub n_basis: usize,

    /// The distribution descriptor, present only for distributed dense data.
    pub blacs: Option<&'a BlacsDescriptor>,

    /// The raw local data, or `None` if this rank holds nothing.
    pub data: Option<&'a [f64]>,

    /// The layout of the data.
    pub descriptor: MatrixDescriptor,
}

/// Key of a stored matrix snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MatrixKey {
    /// One-based index of the delivery within its callback family.
    pub sequence_index: usize,

    /// The one-based spin-channel index.
    pub spin: usize,

    /// The one-based k-point index.
    pub k_point: usize,
}

/// Snapshots of one callback family collected during a single run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MatrixStorage {
    matrices: BTreeMap<MatrixKey, Array2<f64>>,
    count: usize,
}

impl MatrixStorage {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of deliveries received, which is also the last sequence index used.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Stores a matrix under the next sequence index.
    pub fn push(&mut self, spin: usize, k_point: usize, matrix: Array2<f64>) -> MatrixKey {
        self.count += 1;
        let key = MatrixKey {
            sequence_index: self.count,
            spin,
            k_point,
        };
        self.matrices.insert(key, matrix);
        key
    }

    /// Retrieves a snapshot.
    pub fn get(&self, sequence_index: usize, spin: usize, k_point: usize) -> Option<&Array2<f64>> {
        self.matrices.get(&MatrixKey {
            sequence_index,
            spin,
            k_point,
        })
    }

    /// Iterates over the snapshots in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&MatrixKey, &Array2<f64>)> {
        self.matrices.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }
}

/// Trait for the primitive collecting a block-cyclically distributed matrix onto one rank.
pub trait DistributedGather {
    /// Gathers distributed dense data.
    ///
    /// # Arguments
    ///
    /// * `blacs` - The distribution descriptor, if any.
    /// * `data` - The local data held by this rank.
    /// * `shape` - The global shape of the matrix.
    ///
    /// # Returns
    ///
    /// The full matrix on the rank receiving it, and `None` on all other ranks.
    fn gather(
        &self,
        blacs: Option<&BlacsDescriptor>,
        data: &[f64],
        shape: (usize, usize),
    ) -> Result<Option<Array2<f64>>, anyhow::Error>;
}

/// Gather primitive for matrices held entirely by the calling rank in column-major order.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalGather;

impl DistributedGather for LocalGather {
    fn gather(
        &self,
        blacs: Option<&BlacsDescriptor>,
        data: &[f64],
        shape: (usize, usize),
    ) -> Result<Option<Array2<f64>>, anyhow::Error> {
        if let Some(desc) = blacs {
            ensure!(
                (desc.nrows(), desc.ncols()) == shape,
                "Distribution descriptor shape {:?} does not match the expected shape {shape:?}",
                (desc.nrows(), desc.ncols())
            );
        }
        let mat = Array2::from_shape_vec(shape.f(), data.to_vec())?;
        Ok(Some(mat.as_standard_layout().to_owned()))
    }
}

/// Expands a packed triangle of a real symmetric matrix into a dense matrix.
///
/// Packing follows the column-major LAPACK convention: for the upper triangle, element
/// $`(i, j)`$ with $`i \le j`$ is at $`i + j(j+1)/2`$; for the lower triangle, element
/// $`(i, j)`$ with $`i \ge j`$ is at $`i + (2n - j - 1)j/2`$.
///
/// # Arguments
///
/// * `data` - The packed triangle.
/// * `n` - The dimension of the matrix.
/// * `storage_type` - Which triangle is packed.
pub fn packed_to_dense(
    data: &[f64],
    n: usize,
    storage_type: StorageType,
) -> Result<Array2<f64>, MatrixCallbackError> {
    let expected = n * (n + 1) / 2;
    if data.len() != expected {
        return Err(MatrixCallbackError(format!(
            "packed data of length {} cannot describe a {n}×{n} matrix ({expected} expected)",
            data.len()
        )));
    }
    let mut mat = Array2::<f64>::zeros((n, n));
    for j in 0..n {
        let rows = match storage_type {
            StorageType::UpperTriangularPacked => 0..(j + 1),
            StorageType::LowerTriangularPacked => j..n,
            StorageType::DenseDistributed => {
                return Err(MatrixCallbackError(
                    "dense storage cannot be unpacked".to_string(),
                ))
            }
        };
        for i in rows {
            let idx = match storage_type {
                StorageType::UpperTriangularPacked => i + j * (j + 1) / 2,
                _ => i + (2 * n - j - 1) * j / 2,
            };
            mat[(i, j)] = data[idx];
            mat[(j, i)] = data[idx];
        }
    }
    Ok(mat)
}

/// Receiver of matrix deliveries during a single solver run.
///
/// Failures are not propagated into the solver. The first one is recorded, all later deliveries
/// are ignored, and the runner turns the recorded error into a fatal result once the solver
/// returns.
#[derive(Debug)]
pub struct MatrixCollector {
    /// A label identifying the run in error messages.
    label: String,

    hamiltonians: MatrixStorage,

    density_matrices: MatrixStorage,

    error: Option<MatrixCallbackError>,
}

impl MatrixCollector {
    /// Creates a collector with empty storages.
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            hamiltonians: MatrixStorage::new(),
            density_matrices: MatrixStorage::new(),
            error: None,
        }
    }

    /// Receives one matrix from the solver.
    ///
    /// # Arguments
    ///
    /// * `kind` - The callback family of the matrix.
    /// * `delivery` - The matrix and its layout.
    /// * `gather` - The primitive used to collect distributed dense data.
    pub fn deliver(
        &mut self,
        kind: MatrixKind,
        delivery: MatrixDelivery<'_>,
        gather: &dyn DistributedGather,
    ) {
        if self.error.is_some() {
            return;
        }
        match Self::densify(&delivery, gather) {
            Ok(Some(mat)) => {
                let storage = match kind {
                    MatrixKind::Hamiltonian => &mut self.hamiltonians,
                    MatrixKind::DensityMatrix => &mut self.density_matrices,
                };
                let key = storage.push(delivery.spin, delivery.k_point, mat);
                log::debug!("{}: stored {kind} {key:?}.", self.label);
            }
            Ok(None) => {}
            Err(err) => {
                log::error!("{}: {kind} delivery failed: {err}", self.label);
                self.error = Some(MatrixCallbackError(format!(
                    "{} delivery in `{}` failed: {}",
                    kind, self.label, err.0
                )));
            }
        }
    }

    fn densify(
        delivery: &MatrixDelivery<'_>,
        gather: &dyn DistributedGather,
    ) -> Result<Option<Array2<f64>>, MatrixCallbackError> {
        let n = delivery.n_basis;
        if delivery.descriptor.data_type == DataType::Complex {
            return Err(MatrixCallbackError(
                "only real matrices are supported".to_string(),
            ));
        }
        match delivery.descriptor.storage_type {
            StorageType::DenseDistributed => {
                let Some(data) = delivery.data else {
                    return Ok(None);
                };
                gather
                    .gather(delivery.blacs, data, (n, n))
                    .map_err(|err| MatrixCallbackError(err.to_string()))
            }
            storage_type => {
                if delivery.blacs.is_some() {
                    return Err(MatrixCallbackError(
                        "packed storage cannot be distributed".to_string(),
                    ));
                }
                if delivery.descriptor.matrix_type != MatrixType::Hermitian {
                    return Err(MatrixCallbackError(
                        "triangular packed storage is only supported for Hermitian matrices"
                            .to_string(),
                    ));
                }
                delivery
                    .data
                    .map(|data| packed_to_dense(data, n, storage_type))
                    .transpose()
            }
        }
    }

    /// The first recorded delivery failure.
    pub fn error(&self) -> Option<&MatrixCallbackError> {
        self.error.as_ref()
    }

    /// Consumes the collector, returning the Hamiltonian and density-matrix storages, or the
    /// recorded failure.
    pub fn finish(self) -> Result<(MatrixStorage, MatrixStorage), MatrixCallbackError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok((self.hamiltonians, self.density_matrices)),
        }
    }
}
