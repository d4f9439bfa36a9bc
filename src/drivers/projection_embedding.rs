//! Projection-based embedding of a high-level active fragment in a low-level environment.
//!
//! The combined system $`AB`$ is first calculated at the low level, giving localised densities
//! $`\gamma^A`$ and $`\gamma^B`$. The active fragment $`A`$ is then calculated at the high level
//! in the presence of the embedding potential of $`B`$ and of a projector $`\mathbf{P}^B`$ keeping
//! its orbitals orthogonal to those of $`B`$. The total energy is
//!
//! ```math
//! E = E_{A}^{\mathrm{high}}[\gamma^A_{\mathrm{HL}}] - E_{A}^{\mathrm{low}}[\gamma^A_{\mathrm{HL}}]
//!     + E_{AB}^{\mathrm{low}}[\gamma^A_{\mathrm{HL}} + \gamma^B]
//!     + \operatorname{tr}(\mathbf{P}^B \gamma^A_{\mathrm{HL}}).
//! ```
//!
//! See Manby, F. R.; Stella, M.; Goodpaster, J. D.; Miller, T. F. I. *J. Chem. Theory Comput.*
//! **2012**, *8* (8), 2564–2568.

use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{self, ensure, format_err};
use derive_builder::Builder;
use indexmap::IndexMap;
use itertools::Itertools;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::auxiliary::structure::{AtomicStructure, ACTIVE_LAYER, ENVIRONMENT_LAYER};
use crate::basis::basis_info::BasisInfo;
use crate::comm::ExecutionContext;
use crate::drivers::{
    compute_population, compute_truncation_defaults, EmbeddingDriver, LayerName,
};
use crate::io::format::{
    log_macsec_begin, log_macsec_end, log_subtitle, log_title, nice_bool, qmembed_output,
    qmembed_warn, write_subtitle, QmembedOutput,
};
use crate::io::{qmembed_yaml_path, write_qmembed_yaml};
use crate::solver::{CalculatorSettings, ElectronicStructureSolver, SettingValue};
use crate::subsystem::{
    SubsystemConfig, SubsystemConfigurationError, SubsystemResult, SubsystemRunner,
    HARTREE_TO_EV,
};

#[cfg(test)]
#[path = "projection_embedding_tests.rs"]
mod projection_embedding_tests;

// ================
// Enum definitions
// ================

/// Enumerated type for the projector orthogonalising the active orbitals against the
/// environment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectorKind {
    /// $`\mathbf{P}^B = \mu \mathbf{S} \gamma^B \mathbf{S}`$.
    #[default]
    LevelShift,

    /// $`\mathbf{P}^B = -\frac{1}{2}(\mathbf{H}\gamma^B\mathbf{S} + \mathbf{S}\gamma^B\mathbf{H})`$.
    Huzinaga,
}

impl fmt::Display for ProjectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LevelShift => write!(f, "level shift"),
            Self::Huzinaga => write!(f, "Huzinaga"),
        }
    }
}

// ==================
// Struct definitions
// ==================

// ----------
// Parameters
// ----------

fn default_mu_val() -> f64 {
    1.0e6
}

fn default_work_root() -> PathBuf {
    PathBuf::from(".")
}

/// A structure containing control parameters for projection-based embedding.
#[derive(Clone, Builder, Debug, Serialize, Deserialize)]
pub struct ProjectionEmbeddingParams {
    /// The charge of the embedded fragment.
    #[builder(default = "0")]
    #[serde(default)]
    pub frag_charge: i32,

    /// The level-shift prefactor $`\mu`$ in Hartree.
    #[builder(default = "default_mu_val()")]
    #[serde(default = "default_mu_val")]
    pub mu_val: f64,

    /// The Mulliken charge threshold for truncating the basis of the environment. If `None`, no
    /// truncation is performed.
    #[builder(default = "None")]
    #[serde(default)]
    pub truncate_basis_thresh: Option<f64>,

    /// The projector to use.
    #[builder(default)]
    #[serde(default)]
    pub projector: ProjectorKind,

    /// The directory under which the working directory of every layer is created.
    #[builder(default = "default_work_root()")]
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,

    /// Optional name for saving the result as a YAML file. If `None`, the result will not be
    /// saved.
    #[builder(default = "None")]
    #[serde(default)]
    pub result_save_name: Option<String>,
}

impl ProjectionEmbeddingParams {
    /// Returns a builder to construct a [`ProjectionEmbeddingParams`] structure.
    pub fn builder() -> ProjectionEmbeddingParamsBuilder {
        ProjectionEmbeddingParamsBuilder::default()
    }
}

impl Default for ProjectionEmbeddingParams {
    fn default() -> Self {
        Self {
            frag_charge: 0,
            mu_val: default_mu_val(),
            truncate_basis_thresh: None,
            projector: ProjectorKind::default(),
            work_root: default_work_root(),
            result_save_name: None,
        }
    }
}

impl fmt::Display for ProjectionEmbeddingParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Fragment charge: {}", self.frag_charge)?;
        writeln!(f, "Projector: {}", self.projector)?;
        if self.projector == ProjectorKind::LevelShift {
            writeln!(f, "  Level-shift parameter μ: {:.3e} Ha", self.mu_val)?;
        }
        writeln!(
            f,
            "Basis truncation threshold: {}",
            self.truncate_basis_thresh
                .map(|thresh| format!("{thresh:.3e}"))
                .unwrap_or_else(|| nice_bool(false))
        )?;
        writeln!(f, "Working directory root: {}", self.work_root.display())?;
        writeln!(
            f,
            "Save projection-embedding results to file: {}",
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

/// Electron populations of the combined system and of its two fragments.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubsystemPopulations {
    /// $`\operatorname{tr}(\mathbf{S}(\gamma^A + \gamma^B))`$.
    pub combined: f64,

    /// $`\operatorname{tr}(\mathbf{S}\gamma^A)`$.
    pub active: f64,

    /// $`\operatorname{tr}(\mathbf{S}\gamma^B)`$.
    pub environment: f64,
}

impl fmt::Display for SubsystemPopulations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Population of subsystem AB: {:.8}", self.combined)?;
        writeln!(f, "Population of subsystem A: {:.8}", self.active)?;
        writeln!(f, "Population of subsystem B: {:.8}", self.environment)?;
        Ok(())
    }
}

/// The energy terms of the projection-embedding total energy, all in eV.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingEnergies {
    /// The eigenvalue-corrected energy of the combined system at the low level.
    pub ab_low_level: f64,

    /// The eigenvalue-corrected energy of the active fragment at the low level.
    pub a_low_level: f64,

    /// The eigenvalue-corrected energy of the active fragment at the high level.
    pub a_high_level: f64,

    /// $`E_h \operatorname{tr}(\mathbf{P}^B \gamma^A_{\mathrm{HL}})`$.
    pub projector_correction: f64,
}

impl EmbeddingEnergies {
    /// The projection-corrected total energy.
    pub fn total_energy(&self) -> f64 {
        self.a_high_level - self.a_low_level + self.ab_low_level + self.projector_correction
    }

    /// The total energy without the projector correction.
    pub fn uncorrected_total_energy(&self) -> f64 {
        self.total_energy() - self.projector_correction
    }
}

/// A structure to contain projection-embedding results.
#[derive(Clone, Builder, Debug, Serialize, Deserialize)]
pub struct ProjectionEmbeddingResult {
    /// The control parameters used to obtain this set of results.
    pub parameters: ProjectionEmbeddingParams,

    /// The basis truncation applied to the active-fragment layers, if any.
    #[builder(default = "None")]
    pub basis_info: Option<BasisInfo>,

    pub populations: SubsystemPopulations,

    pub energies: EmbeddingEnergies,

    /// The projection-corrected total energy in eV.
    pub total_energy: f64,

    /// The total energy without the projector correction in eV.
    pub total_energy_uncorrected: f64,

    /// The wall-clock duration of every calculation in seconds, in execution order.
    pub durations: IndexMap<String, f64>,

    /// The `total_energy_method` requested in the high-level settings. Its post-SCF correction is
    /// not part of [`Self::total_energy`]: the high-level post-processing layer evaluates the
    /// energy with the `xc` functional instead.
    #[builder(default = "None")]
    #[serde(default)]
    pub unapplied_total_energy_method: Option<SettingValue>,
}

impl ProjectionEmbeddingResult {
    /// Returns a builder to construct a [`ProjectionEmbeddingResult`] structure.
    fn builder() -> ProjectionEmbeddingResultBuilder {
        ProjectionEmbeddingResultBuilder::default()
    }
}

impl fmt::Display for ProjectionEmbeddingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_subtitle(f, "Population information")?;
        writeln!(f)?;
        write!(f, "{}", self.populations)?;
        writeln!(f)?;

        write_subtitle(f, "Intermediate information")?;
        writeln!(f)?;
        writeln!(f, "WARNING: These are not faithful, ground-state KS total energies.")?;
        writeln!(
            f,
            "The low-level references are evaluated with the density components of the"
        )?;
        writeln!(
            f,
            "high-level energy reference for fragment A. Do not use these energies without"
        )?;
        writeln!(f, "understanding their definition.")?;
        writeln!(
            f,
            "Total energy (A+B low-level): {:.10} eV",
            self.energies.ab_low_level
        )?;
        writeln!(
            f,
            "Total energy (A low-level): {:.10} eV",
            self.energies.a_low_level
        )?;
        writeln!(
            f,
            "Total energy (A high-level): {:.10} eV",
            self.energies.a_high_level
        )?;
        writeln!(
            f,
            "Projection operator energy correction tr(P^B γ^A_HL): {:.10} eV",
            self.energies.projector_correction
        )?;
        writeln!(f)?;

        write_subtitle(f, "Final energies")?;
        writeln!(f)?;
        writeln!(
            f,
            "Final total energy (uncorrected): {:.10} eV",
            self.total_energy_uncorrected
        )?;
        writeln!(
            f,
            "Final total energy (projection corrected): {:.10} eV",
            self.total_energy
        )?;
        if let Some(method) = self.unapplied_total_energy_method.as_ref() {
            writeln!(
                f,
                "WARNING: The post-SCF correction of `total_energy_method {method}` is not included."
            )?;
        }
        writeln!(f)?;

        write_subtitle(f, "Timings")?;
        writeln!(f)?;
        for (step, seconds) in self.durations.iter() {
            writeln!(f, "{step:<12} {seconds:>12.3} s")?;
        }
        writeln!(f)?;
        Ok(())
    }
}

// ------
// Layers
// ------

/// The runners of the five named layers of the workflow.
#[derive(Clone, Debug)]
struct Layers {
    ab_ll: SubsystemRunner,
    a_ll: SubsystemRunner,
    a_hl: SubsystemRunner,
    a_hl_pp: SubsystemRunner,
    ab_ll_pp: SubsystemRunner,
}

impl Layers {
    fn new(
        structure: &AtomicStructure,
        low_level: &CalculatorSettings,
        high_level: &CalculatorSettings,
        params: &ProjectionEmbeddingParams,
    ) -> Self {
        let runner = |layer: LayerName| {
            SubsystemRunner::new(
                layer.label(),
                structure,
                layer_settings(layer, low_level, high_level, params.frag_charge),
                &params.work_root,
            )
        };
        Self {
            ab_ll: runner(LayerName::AbLowLevel),
            a_ll: runner(LayerName::ALowLevel),
            a_hl: runner(LayerName::AHighLevel),
            a_hl_pp: runner(LayerName::AHighLevelPostProcess),
            ab_ll_pp: runner(LayerName::AbLowLevelPostProcess),
        }
    }
}

/// Constructs the calculator settings of a layer from the user's low- and high-level settings.
///
/// # Arguments
///
/// * `layer` - The layer.
/// * `low_level` - The low-level settings.
/// * `high_level` - The high-level settings.
/// * `frag_charge` - The charge of the active fragment.
pub fn layer_settings(
    layer: LayerName,
    low_level: &CalculatorSettings,
    high_level: &CalculatorSettings,
    frag_charge: i32,
) -> CalculatorSettings {
    match layer {
        LayerName::AbLowLevel => {
            let mut settings = low_level.clone();
            settings.set("qm_embedding_calc", 1);
            settings
        }
        LayerName::ALowLevel => {
            let mut settings = low_level.clone();
            settings
                .set("qm_embedding_calc", 2)
                .set("charge_mix_param", 0.0)
                .set("charge", frag_charge);
            settings
        }
        LayerName::AHighLevel => {
            let mut settings = high_level.clone();
            settings
                .set("qm_embedding_calc", 3)
                .set("charge", frag_charge);
            settings
        }
        LayerName::AHighLevelPostProcess => {
            let mut settings = high_level.clone();
            settings
                .set("qm_embedding_calc", 2)
                .set("charge_mix_param", 0.0)
                .set("charge", frag_charge);
            if settings.contains("total_energy_method") {
                if let Some(xc) = high_level.get("xc").cloned() {
                    settings.set::<SettingValue>("total_energy_method", xc);
                }
            }
            settings
        }
        LayerName::AbLowLevelPostProcess => {
            let mut settings = low_level.clone();
            settings
                .set("qm_embedding_calc", 2)
                .set("charge_mix_param", 0.0);
            settings
        }
    }
}

// ---------
// Operators
// ---------

/// Constructs the level-shift projector $`\mu \mathbf{S} \gamma^B \mathbf{S}`$.
pub fn level_shift_projector(
    overlap: &Array2<f64>,
    environment_density: &Array2<f64>,
    mu: f64,
) -> Result<Array2<f64>, anyhow::Error> {
    ensure!(
        overlap.dim() == environment_density.dim(),
        "Overlap matrix {:?} and environment density {:?} have different shapes.",
        overlap.dim(),
        environment_density.dim()
    );
    Ok(overlap.dot(environment_density).dot(overlap) * mu)
}

/// Constructs the Huzinaga projector
/// $`-\frac{1}{2}(\mathbf{H}\gamma^B\mathbf{S} + \mathbf{S}\gamma^B\mathbf{H})`$.
pub fn huzinaga_projector(
    overlap: &Array2<f64>,
    environment_density: &Array2<f64>,
    hamiltonian: &Array2<f64>,
) -> Result<Array2<f64>, anyhow::Error> {
    ensure!(
        overlap.dim() == environment_density.dim() && overlap.dim() == hamiltonian.dim(),
        "Overlap {:?}, environment density {:?}, and Hamiltonian {:?} must have the same shape.",
        overlap.dim(),
        environment_density.dim(),
        hamiltonian.dim()
    );
    let fds = hamiltonian.dot(environment_density).dot(overlap);
    let sdf = overlap.dot(environment_density).dot(hamiltonian);
    Ok((fds + sdf) * -0.5)
}

// ------
// Driver
// ------

/// A driver for projection-based embedding.
#[derive(Builder)]
#[builder(pattern = "owned", build_fn(private, name = "build_driver"))]
pub struct ProjectionEmbeddingDriver<'a> {
    /// The control parameters.
    parameters: &'a ProjectionEmbeddingParams,

    /// The combined system with its atoms tagged as active (layer 1) or environment (layer 2).
    structure: &'a AtomicStructure,

    /// The low-level calculator settings.
    low_level: &'a CalculatorSettings,

    /// The high-level calculator settings.
    high_level: &'a CalculatorSettings,

    /// The electronic-structure solver.
    solver: &'a mut dyn ElectronicStructureSolver,

    /// The execution context shared by all ranks.
    ctx: &'a dyn ExecutionContext,

    /// The runners of the five layers, constructed with the driver.
    #[builder(setter(skip), default = "None")]
    layers: Option<Layers>,

    /// The result of the embedding calculation.
    #[builder(setter(skip), default = "None")]
    result: Option<ProjectionEmbeddingResult>,
}

impl<'a> ProjectionEmbeddingDriverBuilder<'a> {
    /// Builds the driver together with the runners of its layers.
    pub fn build(
        self,
    ) -> Result<ProjectionEmbeddingDriver<'a>, ProjectionEmbeddingDriverBuilderError> {
        let mut driver = self.build_driver()?;
        driver.layers = Some(Layers::new(
            driver.structure,
            driver.low_level,
            driver.high_level,
            driver.parameters,
        ));
        Ok(driver)
    }
}

/// Runs one layer, recording its wall-clock duration under `step`.
fn run_timed<'r, S: ElectronicStructureSolver + ?Sized>(
    runner: &'r mut SubsystemRunner,
    solver: &mut S,
    ctx: &dyn ExecutionContext,
    correct_eigenvalues: bool,
    step: &str,
    durations: &mut IndexMap<String, f64>,
) -> Result<&'r SubsystemResult, anyhow::Error> {
    let start = Instant::now();
    let result = runner.run(solver, ctx, correct_eigenvalues)?;
    let seconds = start.elapsed().as_secs_f64();
    log::debug!("{step} took {seconds:.3} s.");
    durations.insert(step.to_string(), seconds);
    Ok(result)
}

/// The eigenvalue-corrected total energy of a layer run.
fn corrected_energy(result: &SubsystemResult) -> Result<f64, anyhow::Error> {
    result
        .eigenvalue_correction
        .map(|corr| corr.ev_corr_total_energy)
        .ok_or_else(|| format_err!("`{}` has no eigenvalue-corrected energy.", result.label))
}

impl<'a> ProjectionEmbeddingDriver<'a> {
    /// Returns a builder to construct a [`ProjectionEmbeddingDriver`] structure.
    pub fn builder() -> ProjectionEmbeddingDriverBuilder<'a> {
        ProjectionEmbeddingDriverBuilder::default()
    }

    /// Checks that the structure has exactly one active and one environment layer.
    fn check_layers(&self) -> Result<(), anyhow::Error> {
        let layers = self.structure.distinct_layers();
        ensure!(
            layers == [ACTIVE_LAYER, ENVIRONMENT_LAYER],
            SubsystemConfigurationError(format!(
                "projection embedding requires exactly the layers {ACTIVE_LAYER} and \
                {ENVIRONMENT_LAYER}, but found {}",
                layers.iter().map(|layer| layer.to_string()).join(", ")
            ))
        );
        Ok(())
    }

    /// Configuration of an active-fragment layer.
    fn fragment_config(
        basis_info: &Option<BasisInfo>,
        density_matrix_in: Array2<f64>,
        embedding_matrix_in: Option<Array2<f64>>,
        no_scf: bool,
    ) -> SubsystemConfig {
        SubsystemConfig {
            density_matrix_in: Some(density_matrix_in),
            embedding_matrix_in,
            basis_info: basis_info.clone(),
            truncate: basis_info.is_some(),
            ghost_layer: Some(ENVIRONMENT_LAYER),
            no_scf,
        }
    }

    /// Executes the embedding workflow.
    fn run_projection_embedding(&mut self) -> Result<(), anyhow::Error> {
        let params = self.parameters;
        let structure = self.structure;
        let ctx = self.ctx;
        let root = ctx.is_root();
        if root {
            log_title("Projection-Based Embedding");
            qmembed_output!("");
            params.log_output_display();
            structure.log_output_display();
            qmembed_output!("");
        }
        self.check_layers()?;

        let unapplied_total_energy_method = self.high_level.get("total_energy_method").cloned();
        if root {
            if let Some(method) = unapplied_total_energy_method.as_ref() {
                qmembed_warn!(
                    "The post-SCF correction of `total_energy_method {method}` is not evaluated. \
                    The high-level energy is evaluated with `xc` only."
                );
            }
        }

        let layers = self
            .layers
            .as_mut()
            .ok_or_else(|| format_err!("The projection-embedding driver has no layers."))?;
        let mut durations = IndexMap::new();
        let solver = &mut *self.solver;
        if root {
            log_macsec_begin("Embedding calculation");
            qmembed_output!("");
        }

        // Combined system, giving the localised densities of both fragments.
        let ab_ll = run_timed(&mut layers.ab_ll, solver, ctx, false, "AB_LL", &mut durations)?;
        let gamma_a = ab_ll.density_matrix_out(0)?;
        let gamma_b = ab_ll.density_matrix_out(1)?;
        let overlap = ab_ll.overlap()?.clone();

        let basis_info = match params.truncate_basis_thresh {
            Some(thresh) => {
                let bi = compute_truncation_defaults(ab_ll, &gamma_a, structure.n_atoms(), thresh)?;
                if root {
                    qmembed_output!("");
                    log_subtitle("Basis truncation");
                    qmembed_output!("");
                    bi.log_output_display();
                    qmembed_output!("");
                    let active_mask = bi.active_mask();
                    let dropped = structure
                        .layers()
                        .iter()
                        .enumerate()
                        .filter(|(atom, layer)| **layer == ACTIVE_LAYER && !active_mask[*atom])
                        .map(|(atom, _)| atom)
                        .collect_vec();
                    if !dropped.is_empty() {
                        qmembed_warn!(
                            "Atoms {dropped:?} of the active layer fall below the truncation threshold and are removed."
                        );
                    }
                }
                Some(bi)
            }
            None => None,
        };

        // Active fragment at the low level, for the embedding potential.
        layers.a_ll.configure(Self::fragment_config(
            &basis_info,
            gamma_a.clone(),
            None,
            false,
        ))?;
        let h_es_a_ll = run_timed(&mut layers.a_ll, solver, ctx, false, "A_LL", &mut durations)?
            .hamiltonian_electrostatic()?;

        let populations = SubsystemPopulations {
            combined: compute_population(&overlap, &(&gamma_a + &gamma_b))?,
            active: compute_population(&overlap, &gamma_a)?,
            environment: compute_population(&overlap, &gamma_b)?,
        };
        if root {
            qmembed_output!("");
            populations.log_output_display();
            qmembed_output!("");
        }

        let projector = match params.projector {
            ProjectorKind::LevelShift => level_shift_projector(&overlap, &gamma_b, params.mu_val)?,
            ProjectorKind::Huzinaga => {
                huzinaga_projector(&overlap, &gamma_b, &ab_ll.hamiltonian_total()?)?
            }
        };
        let embedding = ab_ll.hamiltonian_electrostatic()? - &h_es_a_ll + &projector;

        // Embedded active fragment at the high level.
        layers.a_hl.configure(Self::fragment_config(
            &basis_info,
            gamma_a.clone(),
            Some(embedding),
            false,
        ))?;
        let gamma_a_hl = run_timed(&mut layers.a_hl, solver, ctx, false, "A_HL", &mut durations)?
            .density_matrix_out(0)?;

        // Single-shot evaluations at the embedded high-level density.
        layers.a_hl_pp.configure(Self::fragment_config(
            &basis_info,
            gamma_a_hl.clone(),
            None,
            true,
        ))?;
        let a_high_level = corrected_energy(run_timed(
            &mut layers.a_hl_pp,
            solver,
            ctx,
            true,
            "A_HL_PP",
            &mut durations,
        )?)?;

        layers.a_ll.configure(Self::fragment_config(
            &basis_info,
            gamma_a_hl.clone(),
            None,
            true,
        ))?;
        let a_low_level = corrected_energy(run_timed(
            &mut layers.a_ll,
            solver,
            ctx,
            true,
            "A_LL_PP",
            &mut durations,
        )?)?;

        layers.ab_ll_pp.configure(SubsystemConfig {
            density_matrix_in: Some(&gamma_a_hl + &gamma_b),
            embedding_matrix_in: None,
            basis_info: basis_info.clone(),
            truncate: false,
            ghost_layer: None,
            no_scf: true,
        })?;
        let ab_low_level = corrected_energy(run_timed(
            &mut layers.ab_ll_pp,
            solver,
            ctx,
            true,
            "AB_LL_PP",
            &mut durations,
        )?)?;

        let energies = EmbeddingEnergies {
            ab_low_level,
            a_low_level,
            a_high_level,
            projector_correction: HARTREE_TO_EV * projector.dot(&gamma_a_hl).diag().sum(),
        };
        let result = ProjectionEmbeddingResult::builder()
            .parameters(params.clone())
            .basis_info(basis_info)
            .populations(populations)
            .energies(energies)
            .total_energy(energies.total_energy())
            .total_energy_uncorrected(energies.uncorrected_total_energy())
            .durations(durations)
            .unapplied_total_energy_method(unapplied_total_energy_method)
            .build()
            .map_err(|err| format_err!(err))?;

        if root {
            log_macsec_end("Embedding calculation");
            qmembed_output!("");
            result.log_output_display();
            if let Some(name) = params.result_save_name.as_ref() {
                let path = write_qmembed_yaml(name, &result)?;
                qmembed_output!("Projection-embedding results saved as {}.", path.display());
                qmembed_output!("");
            }
        }
        self.result = Some(result);
        Ok(())
    }
}

impl EmbeddingDriver for ProjectionEmbeddingDriver<'_> {
    type Params = ProjectionEmbeddingParams;

    type Outcome = ProjectionEmbeddingResult;

    fn result(&self) -> Result<&Self::Outcome, anyhow::Error> {
        self.result
            .as_ref()
            .ok_or_else(|| format_err!("No projection-embedding results found."))
    }

    fn run(&mut self) -> Result<(), anyhow::Error> {
        self.run_projection_embedding()
    }
}
