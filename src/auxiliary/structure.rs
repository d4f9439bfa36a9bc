//! Atomic structures partitioned into embedding layers.

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{self, ensure, format_err, Context};
use itertools::Itertools;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::auxiliary::atom::Atom;

#[cfg(test)]
#[path = "structure_tests.rs"]
mod structure_tests;

/// The layer tag of the active (high-level) region.
pub const ACTIVE_LAYER: u8 = 1;

/// The layer tag of the environment (low-level) region.
pub const ENVIRONMENT_LAYER: u8 = 2;

// ================
// Enum definitions
// ================

/// Enumerated type describing how atoms are assigned to embedding layers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingMask {
    /// The first `n` atoms belong to the active layer and the remaining ones to the environment.
    Count(usize),

    /// One layer tag per atom.
    Explicit(Vec<u8>),
}

impl EmbeddingMask {
    /// Expands the mask into one layer tag per atom.
    ///
    /// # Arguments
    ///
    /// * `natoms` - The number of atoms in the structure.
    ///
    /// # Errors
    ///
    /// Errors if an explicit mask does not have exactly `natoms` entries, or if a counted mask
    /// exceeds `natoms`.
    pub fn to_layers(&self, natoms: usize) -> Result<Vec<u8>, anyhow::Error> {
        match self {
            Self::Count(n) => {
                ensure!(
                    *n <= natoms,
                    "Embedding mask assigns {n} atoms to the active layer, but only {natoms} atoms are present."
                );
                Ok(std::iter::repeat(ACTIVE_LAYER)
                    .take(*n)
                    .chain(std::iter::repeat(ENVIRONMENT_LAYER).take(natoms - n))
                    .collect_vec())
            }
            Self::Explicit(layers) => {
                ensure!(
                    layers.len() == natoms,
                    "Length of embedding mask ({}) does not match number of atoms ({natoms}).",
                    layers.len()
                );
                Ok(layers.clone())
            }
        }
    }
}

// ==================
// Struct definitions
// ==================

/// Structure containing an ordered sequence of atoms, each tagged with an embedding layer.
///
/// Atoms are reordered once, at construction, so that all atoms of a lower layer tag precede
/// those of a higher one. The relative order of atoms within a layer is preserved.
#[derive(Clone, Serialize, Deserialize)]
pub struct AtomicStructure {
    /// The atoms in layer order.
    atoms: Vec<Atom>,

    /// One layer tag per atom, non-decreasing.
    layers: Vec<u8>,

    /// The three lattice vectors in Ångström for periodic structures.
    lattice_vectors: Option<Vec<Vector3<f64>>>,
}

impl AtomicStructure {
    /// Constructs a new layered structure, reordering the atoms by layer tag.
    ///
    /// # Arguments
    ///
    /// * `atoms` - The atoms in input order.
    /// * `mask` - The assignment of the atoms to embedding layers.
    /// * `lattice_vectors` - The lattice vectors for periodic structures.
    pub fn new(
        atoms: &[Atom],
        mask: &EmbeddingMask,
        lattice_vectors: Option<Vec<Vector3<f64>>>,
    ) -> Result<Self, anyhow::Error> {
        let layers = mask.to_layers(atoms.len())?;
        if let Some(lvs) = lattice_vectors.as_ref() {
            ensure!(
                lvs.len() == 3,
                "Expected three lattice vectors, but found {}.",
                lvs.len()
            );
        }
        let order = (0..atoms.len())
            .sorted_by_key(|&i| layers[i])
            .collect_vec();
        let structure = Self {
            atoms: order.iter().map(|&i| atoms[i].clone()).collect_vec(),
            layers: order.iter().map(|&i| layers[i]).collect_vec(),
            lattice_vectors,
        };
        ensure!(
            structure.layers.windows(2).all(|w| w[0] <= w[1]),
            "Layer tags are not non-decreasing after reordering."
        );
        Ok(structure)
    }

    /// Parses an `xyz` file to construct a layered structure.
    ///
    /// # Arguments
    ///
    /// * `filename` - The `xyz` file to be parsed.
    /// * `mask` - The assignment of the atoms to embedding layers.
    /// * `lattice_vectors` - The lattice vectors for periodic structures.
    pub fn from_xyz<P: AsRef<Path>>(
        filename: P,
        mask: &EmbeddingMask,
        lattice_vectors: Option<Vec<Vector3<f64>>>,
    ) -> Result<Self, anyhow::Error> {
        let contents = fs::read_to_string(&filename).with_context(|| {
            format!("Unable to read `{}`", filename.as_ref().display())
        })?;
        let mut lines = contents.lines();
        let natoms = lines
            .next()
            .ok_or_else(|| format_err!("Empty `xyz` file."))?
            .trim()
            .parse::<usize>()
            .map_err(|err| format_err!("Unable to parse the number of atoms: {err}"))?;
        let atoms = lines
            .skip(1)
            .filter(|line| !line.trim().is_empty())
            .map(Atom::from_xyz)
            .collect::<Result<Vec<_>, _>>()?;
        ensure!(
            atoms.len() == natoms,
            "Expected {natoms} atoms, got {} instead.",
            atoms.len()
        );
        Self::new(&atoms, mask, lattice_vectors)
    }

    /// The number of atoms in the structure.
    pub fn n_atoms(&self) -> usize {
        self.atoms.len()
    }

    /// The atoms in layer order.
    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    /// The layer tags, one per atom.
    pub fn layers(&self) -> &[u8] {
        &self.layers
    }

    /// The lattice vectors, if the structure is periodic.
    pub fn lattice_vectors(&self) -> Option<&[Vector3<f64>]> {
        self.lattice_vectors.as_deref()
    }

    /// The distinct layer tags present, in increasing order.
    pub fn distinct_layers(&self) -> Vec<u8> {
        self.layers.iter().copied().dedup().collect_vec()
    }

    /// A boolean mask marking the atoms whose layer tag equals `ghost_layer` as ghosts.
    ///
    /// # Arguments
    ///
    /// * `ghost_layer` - The layer treated as ghost atoms, or `None` for no ghosts.
    pub fn ghost_mask(&self, ghost_layer: Option<u8>) -> Vec<bool> {
        self.layers
            .iter()
            .map(|layer| Some(*layer) == ghost_layer)
            .collect_vec()
    }

    /// Returns a new structure containing only the specified atoms, in the order given, together
    /// with their layer tags.
    ///
    /// # Arguments
    ///
    /// * `indices` - Strictly increasing indices of the atoms to keep.
    pub fn select(&self, indices: &[usize]) -> Result<Self, anyhow::Error> {
        ensure!(
            indices.windows(2).all(|w| w[0] < w[1]),
            "Atom indices for selection must be strictly increasing."
        );
        ensure!(
            indices.iter().all(|&i| i < self.n_atoms()),
            "Atom index out of range for a structure of {} atoms.",
            self.n_atoms()
        );
        Ok(Self {
            atoms: indices.iter().map(|&i| self.atoms[i].clone()).collect_vec(),
            layers: indices.iter().map(|&i| self.layers[i]).collect_vec(),
            lattice_vectors: self.lattice_vectors.clone(),
        })
    }
}

impl fmt::Display for AtomicStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>5} {:>3} {:>14} {:>14} {:>14}", "Layer", "El", "x", "y", "z")?;
        for (atom, layer) in self.atoms.iter().zip(self.layers.iter()) {
            writeln!(f, "{layer:>5} {atom}")?;
        }
        if let Some(lvs) = self.lattice_vectors.as_ref() {
            writeln!(f, "Lattice vectors:")?;
            for lv in lvs.iter() {
                writeln!(f, "      {:+14.8} {:+14.8} {:+14.8}", lv[0], lv[1], lv[2])?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for AtomicStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}
