use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{self, format_err};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::auxiliary::structure::AtomicStructure;
use crate::comm::ExecutionContext;
use crate::drivers::{EmbeddingDriver, LayerName};
use crate::io::format::{log_title, nice_bool, qmembed_output, QmembedOutput};
use crate::io::{qmembed_yaml_path, write_qmembed_yaml};
use crate::solver::{CalculatorSettings, ElectronicStructureSolver};
use crate::subsystem::SubsystemRunner;

#[cfg(test)]
#[path = "standard_dft_tests.rs"]
mod standard_dft_tests;

// ==================
// Struct definitions
// ==================

// ----------
// Parameters
// ----------

fn default_work_root() -> PathBuf {
    PathBuf::from(".")
}

/// A structure containing control parameters for a reference calculation without embedding.
#[derive(Clone, Builder, Debug, Serialize, Deserialize)]
pub struct StandardDftParams {
    /// The directory under which the working directory of the calculation is created.
    #[builder(default = "default_work_root()")]
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,

    /// Optional name for saving the result as a YAML file. If `None`, the result will not be
    /// saved.
    #[builder(default = "None")]
    #[serde(default)]
    pub result_save_name: Option<String>,
}

impl StandardDftParams {
    /// Returns a builder to construct a [`StandardDftParams`] structure.
    pub fn builder() -> StandardDftParamsBuilder {
        StandardDftParamsBuilder::default()
    }
}

impl Default for StandardDftParams {
    fn default() -> Self {
        Self {
            work_root: default_work_root(),
            result_save_name: None,
        }
    }
}

impl fmt::Display for StandardDftParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Working directory root: {}", self.work_root.display())?;
        writeln!(
            f,
            "Save standard DFT results to file: {}",
            if let Some(name) = self.result_save_name.as_ref() {
                qmembed_yaml_path(name).display().to_string()
            } else {
                nice_bool(false)
            }
        )?;
        writeln!(f)?;
        Ok(())
    }
}

// ------
// Result
// ------

/// A structure to contain the result of a reference calculation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StandardDftResult {
    /// The control parameters used to obtain this result.
    pub parameters: StandardDftParams,

    /// The total energy of the combined system in eV.
    pub total_energy: f64,

    /// The wall-clock duration of the calculation in seconds.
    pub duration: f64,
}

impl fmt::Display for StandardDftResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total energy (A+B low-level): {:.10} eV", self.total_energy)?;
        writeln!(f, "Time taken: {:.3} s", self.duration)?;
        writeln!(f)?;
        Ok(())
    }
}

// ------
// Driver
// ------

/// A driver for a single calculation on the combined system with the low-level settings.
#[derive(Builder)]
#[builder(pattern = "owned")]
pub struct StandardDftDriver<'a> {
    /// The control parameters.
    parameters: &'a StandardDftParams,

    /// The combined system.
    structure: &'a AtomicStructure,

    /// The low-level calculator settings.
    low_level: &'a CalculatorSettings,

    /// The electronic-structure solver.
    solver: &'a mut dyn ElectronicStructureSolver,

    /// The execution context shared by all ranks.
    ctx: &'a dyn ExecutionContext,

    /// The result of the calculation.
    #[builder(setter(skip), default = "None")]
    result: Option<StandardDftResult>,
}

impl<'a> StandardDftDriver<'a> {
    /// Returns a builder to construct a [`StandardDftDriver`] structure.
    pub fn builder() -> StandardDftDriverBuilder<'a> {
        StandardDftDriverBuilder::default()
    }

    /// Executes the reference calculation.
    fn run_standard_dft(&mut self) -> Result<(), anyhow::Error> {
        let params = self.parameters;
        let ctx = self.ctx;
        if ctx.is_root() {
            log_title("Standard DFT");
            qmembed_output!("");
            params.log_output_display();
            self.structure.log_output_display();
            qmembed_output!("");
        }

        let mut ab_ll = SubsystemRunner::new(
            LayerName::AbLowLevel.label(),
            self.structure,
            self.low_level.clone(),
            &params.work_root,
        );
        let start = Instant::now();
        let total_energy = ab_ll.run(&mut *self.solver, ctx, false)?.total_energy;
        let result = StandardDftResult {
            parameters: params.clone(),
            total_energy,
            duration: start.elapsed().as_secs_f64(),
        };

        if ctx.is_root() {
            qmembed_output!("");
            result.log_output_display();
            if let Some(name) = params.result_save_name.as_ref() {
                let path = write_qmembed_yaml(name, &result)?;
                qmembed_output!("Standard DFT results saved as {}.", path.display());
                qmembed_output!("");
            }
        }
        self.result = Some(result);
        Ok(())
    }
}

impl EmbeddingDriver for StandardDftDriver<'_> {
    type Params = StandardDftParams;

    type Outcome = StandardDftResult;

    fn result(&self) -> Result<&Self::Outcome, anyhow::Error> {
        self.result
            .as_ref()
            .ok_or_else(|| format_err!("No standard DFT results found."))
    }

    fn run(&mut self) -> Result<(), anyhow::Error> {
        self.run_standard_dft()
    }
}
