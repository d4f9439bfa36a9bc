//! Mapping between atoms and atomic-orbital index ranges in full and truncated bases.

use std::fmt;

use anyhow::{self, ensure};
use itertools::Itertools;
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

#[cfg(test)]
#[path = "basis_info_tests.rs"]
mod basis_info_tests;

/// Structure describing how atoms own contiguous blocks of atomic orbitals in the full basis of a
/// combined system, and in the truncated basis spanned by the active atoms only.
///
/// Truncation removes whole atoms, so an atom owns the same number of orbitals in both
/// numberings, and the relative order of the remaining orbitals is preserved.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BasisInfo {
    /// The number of atoms in the full structure.
    full_natoms: usize,

    /// The indices of the active atoms in the full structure, in increasing order.
    active_atoms: Vec<usize>,

    /// The owning atom of each orbital in the full basis.
    full_basis_atoms: Vec<usize>,

    /// The owning atom of each orbital in the truncated basis, given as an index in the full
    /// structure.
    trunc_basis_atoms: Vec<usize>,

    /// Half-open orbital index ranges of every atom in the full basis, indexed by full atom index.
    full_ranges: Vec<(usize, usize)>,

    /// Half-open orbital index ranges of every active atom in the truncated basis, indexed by
    /// position in [`Self::active_atoms`].
    trunc_ranges: Vec<(usize, usize)>,
}

impl BasisInfo {
    /// The number of atoms in the full structure.
    pub fn full_natoms(&self) -> usize {
        self.full_natoms
    }

    /// The number of active atoms.
    pub fn trunc_natoms(&self) -> usize {
        self.active_atoms.len()
    }

    /// The indices of the active atoms in the full structure, in increasing order.
    pub fn active_atoms(&self) -> &[usize] {
        &self.active_atoms
    }

    /// The owning atom of each orbital in the full basis.
    pub fn full_basis_atoms(&self) -> &[usize] {
        &self.full_basis_atoms
    }

    /// The owning atom (full structure index) of each orbital in the truncated basis.
    pub fn trunc_basis_atoms(&self) -> &[usize] {
        &self.trunc_basis_atoms
    }

    /// The number of orbitals in the full basis.
    pub fn full_nbasis(&self) -> usize {
        self.full_basis_atoms.len()
    }

    /// The number of orbitals in the truncated basis.
    pub fn trunc_nbasis(&self) -> usize {
        self.trunc_basis_atoms.len()
    }

    /// The half-open orbital range `[basis_min_idx, basis_max_idx)` of an atom in the full basis.
    ///
    /// # Arguments
    ///
    /// * `atom` - The index of the atom in the full structure.
    pub fn full_range(&self, atom: usize) -> (usize, usize) {
        self.full_ranges[atom]
    }

    /// The half-open orbital range `[basis_min_idx, basis_max_idx)` of an active atom in the
    /// truncated basis.
    ///
    /// # Arguments
    ///
    /// * `position` - The position of the atom in [`Self::active_atoms`].
    pub fn trunc_range(&self, position: usize) -> (usize, usize) {
        self.trunc_ranges[position]
    }

    /// Boolean mask over the full-basis orbitals marking those owned by active atoms.
    pub fn basis_mask(&self) -> Vec<bool> {
        let active = self.active_mask();
        self.full_basis_atoms
            .iter()
            .map(|&atom| active[atom])
            .collect_vec()
    }

    /// Boolean mask over the full structure marking the active atoms.
    pub fn active_mask(&self) -> Vec<bool> {
        let mut mask = vec![false; self.full_natoms];
        self.active_atoms.iter().for_each(|&atom| mask[atom] = true);
        mask
    }
}

impl fmt::Display for BasisInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Number of atoms before truncation: {}",
            self.full_natoms()
        )?;
        writeln!(
            f,
            "Number of atoms after truncation: {}",
            self.trunc_natoms()
        )?;
        writeln!(
            f,
            "Number of basis functions before truncation: {}",
            self.full_nbasis()
        )?;
        writeln!(
            f,
            "Number of basis functions after truncation: {}",
            self.trunc_nbasis()
        )?;
        Ok(())
    }
}

/// Computes contiguous half-open orbital ranges for a sequence of owning atoms, in a single
/// left-to-right scan.
///
/// # Arguments
///
/// * `basis_atoms` - The owning atom of each orbital. Must be non-decreasing.
/// * `atoms` - The atoms whose ranges are required, in increasing order.
fn atom_boundary_indices(basis_atoms: &[usize], atoms: &[usize]) -> Vec<(usize, usize)> {
    atoms
        .iter()
        .scan(0, |acc, &atom| {
            let start_index = *acc;
            *acc += basis_atoms.iter().filter(|&&owner| owner == atom).count();
            Some((start_index, *acc))
        })
        .collect_vec()
}

/// Builds the basis information for a truncation that keeps only the active atoms.
///
/// # Arguments
///
/// * `full_basis_atoms` - The owning atom of each orbital in the full basis of the combined
///   system, as reported by the solver.
/// * `active_mask` - Boolean mask over all atoms of the combined system.
///
/// # Errors
///
/// Errors if the orbitals are not grouped contiguously by atom in increasing atom order, if an
/// owning atom lies outside the mask, or if no atom is active.
pub fn build_basis_info(
    full_basis_atoms: &[usize],
    active_mask: &[bool],
) -> Result<BasisInfo, anyhow::Error> {
    let full_natoms = active_mask.len();
    ensure!(
        full_basis_atoms.windows(2).all(|w| w[0] <= w[1]),
        "Orbitals must occupy contiguous, atom-ordered blocks in the full basis."
    );
    ensure!(
        full_basis_atoms.iter().all(|&atom| atom < full_natoms),
        "An orbital is owned by an atom outside the active-atom mask of length {full_natoms}."
    );
    let active_atoms = active_mask
        .iter()
        .enumerate()
        .filter_map(|(atom, &active)| if active { Some(atom) } else { None })
        .collect_vec();
    ensure!(
        !active_atoms.is_empty(),
        "No atoms have been selected as active for basis truncation."
    );

    let trunc_basis_atoms = full_basis_atoms
        .iter()
        .filter(|&&atom| active_mask[atom])
        .copied()
        .collect_vec();
    let full_ranges = atom_boundary_indices(full_basis_atoms, &(0..full_natoms).collect_vec());
    let trunc_ranges = atom_boundary_indices(&trunc_basis_atoms, &active_atoms);

    Ok(BasisInfo {
        full_natoms,
        active_atoms,
        full_basis_atoms: full_basis_atoms.to_vec(),
        trunc_basis_atoms,
        full_ranges,
        trunc_ranges,
    })
}

/// Selects atoms with significant Mulliken charge for a given density matrix.
///
/// The charge of orbital $`i`$ is $`q_i = (\mathbf{D}\mathbf{S})_{ii}`$; an atom is active if
/// $`\sum_{i \in \text{atom}} |q_i|`$ exceeds `threshold`.
///
/// # Arguments
///
/// * `overlap` - The atomic-orbital overlap matrix of the combined system.
/// * `density_matrix` - The density matrix of the subsystem of interest.
/// * `basis_atoms` - The owning atom of each orbital.
/// * `natoms` - The number of atoms in the combined system.
/// * `threshold` - The Mulliken charge threshold.
///
/// # Returns
///
/// A boolean mask over the atoms.
pub fn select_active_atoms(
    overlap: &Array2<f64>,
    density_matrix: &Array2<f64>,
    basis_atoms: &[usize],
    natoms: usize,
    threshold: f64,
) -> Result<Vec<bool>, anyhow::Error> {
    let nbasis = basis_atoms.len();
    ensure!(
        overlap.dim() == (nbasis, nbasis) && density_matrix.dim() == (nbasis, nbasis),
        "Overlap {:?} and density {:?} matrices must both be {nbasis}×{nbasis}.",
        overlap.dim(),
        density_matrix.dim()
    );
    ensure!(
        basis_atoms.iter().all(|&atom| atom < natoms),
        "An orbital is owned by an atom index beyond {natoms} atoms."
    );
    let basis_charges = (density_matrix * &overlap.t()).sum_axis(Axis(1));
    let mut atomic_charges = vec![0.0; natoms];
    basis_charges
        .iter()
        .zip(basis_atoms.iter())
        .for_each(|(charge, &atom)| atomic_charges[atom] += charge.abs());
    log::debug!("Mulliken atomic charges for truncation: {atomic_charges:?}");
    Ok(atomic_charges
        .into_iter()
        .map(|charge| charge > threshold)
        .collect_vec())
}
