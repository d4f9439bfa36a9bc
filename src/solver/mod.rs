//! Interface to external electronic-structure solvers.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow;
use indexmap::IndexMap;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::auxiliary::structure::AtomicStructure;
use crate::solver::callback::MatrixCollector;

pub mod callback;

#[cfg(test)]
pub(crate) mod synthetic;

#[cfg(test)]
#[path = "solver_tests.rs"]
mod solver_tests;

// ================
// Enum definitions
// ================

/// Enumerated type for the value of a calculator keyword.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(true) => write!(f, ".true."),
            Self::Bool(false) => write!(f, ".false."),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for SettingValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

// ==================
// Struct definitions
// ==================

/// Ordered keyword/value settings of a calculator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalculatorSettings(IndexMap<String, SettingValue>);

impl CalculatorSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a keyword, replacing any existing value in place.
    pub fn set<V: Into<SettingValue>>(&mut self, keyword: &str, value: V) -> &mut Self {
        self.0.insert(keyword.to_string(), value.into());
        self
    }

    pub fn get(&self, keyword: &str) -> Option<&SettingValue> {
        self.0.get(keyword)
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.0.contains_key(keyword)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SettingValue)> {
        self.0.iter()
    }
}

impl fmt::Display for CalculatorSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (keyword, value) in self.iter() {
            writeln!(f, "{keyword:<24} {value}")?;
        }
        Ok(())
    }
}

/// Everything a solver needs for one calculation.
#[derive(Clone, Debug)]
pub struct SolverJob<'a> {
    /// The name of the layer being calculated.
    pub label: &'a str,

    /// The structure to calculate, already restricted to the active atoms when truncating.
    pub structure: &'a AtomicStructure,

    /// One flag per atom of [`Self::structure`] marking ghost sites.
    pub ghosts: &'a [bool],

    pub settings: &'a CalculatorSettings,

    /// The working directory containing the calculator input files.
    pub work_dir: &'a Path,

    /// The density matrix to start from, in the basis of [`Self::structure`].
    pub density_matrix_in: Option<&'a Array2<f64>>,

    /// The matrix added to the Fock matrix at every iteration, in the basis of
    /// [`Self::structure`].
    pub embedding_matrix_in: Option<&'a Array2<f64>>,
}

/// What a solver reports after a calculation, besides the streamed matrices.
#[derive(Clone, Debug)]
pub struct SolverOutcome {
    /// The total energy in eV.
    pub total_energy: f64,

    /// The owning atom of each basis function.
    pub basis_atoms: Vec<usize>,

    /// The overlap matrix, held on the authoritative rank.
    pub overlap: Option<Array2<f64>>,

    /// The text log of the calculation.
    pub log_path: PathBuf,
}

// =================
// Trait definitions
// =================

/// Trait for external electronic-structure solvers.
///
/// A calculation is collective: every rank calls [`Self::calculate`], and matrices are delivered
/// to the collector on whichever ranks the solver chooses.
pub trait ElectronicStructureSolver {
    /// Performs one calculation, delivering every Hamiltonian and density matrix it constructs to
    /// `collector`.
    fn calculate(
        &mut self,
        job: &SolverJob<'_>,
        collector: &mut MatrixCollector,
    ) -> Result<SolverOutcome, anyhow::Error>;

    /// The rank holding the collected matrices after a calculation.
    fn authoritative_rank(&self) -> usize {
        0
    }
}
