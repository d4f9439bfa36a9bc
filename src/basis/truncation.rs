//! Transformations of matrices between full and truncated atomic-orbital bases.

use anyhow::{self, ensure};
use itertools::Itertools;
use ndarray::{s, Array2, Axis};

use crate::basis::basis_info::BasisInfo;

#[cfg(test)]
#[path = "truncation_tests.rs"]
mod truncation_tests;

/// Restricts a full-basis matrix to the truncated basis by deleting every row and column whose
/// owning atom is inactive. The order of the remaining rows and columns is preserved.
///
/// # Arguments
///
/// * `full_mat` - A square matrix in the full basis.
/// * `basis_info` - The basis information of the truncation.
pub fn to_truncated(
    full_mat: &Array2<f64>,
    basis_info: &BasisInfo,
) -> Result<Array2<f64>, anyhow::Error> {
    let nbasis = basis_info.full_nbasis();
    ensure!(
        full_mat.dim() == (nbasis, nbasis),
        "Expected a {nbasis}×{nbasis} full-basis matrix, but got {:?}.",
        full_mat.dim()
    );
    let kept = basis_info
        .basis_mask()
        .into_iter()
        .enumerate()
        .filter_map(|(i, keep)| if keep { Some(i) } else { None })
        .collect_vec();
    Ok(full_mat.select(Axis(0), &kept).select(Axis(1), &kept))
}

/// Expands a truncated-basis matrix to the full basis.
///
/// Only the blocks coupling two active atoms are populated; every row and column belonging to
/// an inactive atom is zero. The expansion therefore only makes sense for quantities describing
/// the active subsystem.
///
/// # Arguments
///
/// * `trunc_mat` - A square matrix in the truncated basis.
/// * `basis_info` - The basis information of the truncation.
pub fn to_full(
    trunc_mat: &Array2<f64>,
    basis_info: &BasisInfo,
) -> Result<Array2<f64>, anyhow::Error> {
    let trunc_nbasis = basis_info.trunc_nbasis();
    ensure!(
        trunc_mat.dim() == (trunc_nbasis, trunc_nbasis),
        "Expected a {trunc_nbasis}×{trunc_nbasis} truncated-basis matrix, but got {:?}.",
        trunc_mat.dim()
    );
    let full_nbasis = basis_info.full_nbasis();
    let mut full_mat = Array2::<f64>::zeros((full_nbasis, full_nbasis));
    let active_atoms = basis_info.active_atoms();
    for (pos1, &atom1) in active_atoms.iter().enumerate() {
        let (trunc_col_min, trunc_col_max) = basis_info.trunc_range(pos1);
        let (full_col_min, full_col_max) = basis_info.full_range(atom1);
        for (pos2, &atom2) in active_atoms.iter().enumerate() {
            let (trunc_row_min, trunc_row_max) = basis_info.trunc_range(pos2);
            let (full_row_min, full_row_max) = basis_info.full_range(atom2);
            full_mat
                .slice_mut(s![full_row_min..full_row_max, full_col_min..full_col_max])
                .assign(&trunc_mat.slice(s![
                    trunc_row_min..trunc_row_max,
                    trunc_col_min..trunc_col_max
                ]));
        }
    }
    Ok(full_mat)
}
