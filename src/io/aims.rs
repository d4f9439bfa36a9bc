//! Text input and output files of the all-electron calculator.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{self, ensure, format_err, Context};
use lazy_static::lazy_static;
use regex::Regex;

use crate::auxiliary::structure::AtomicStructure;
use crate::solver::CalculatorSettings;
use crate::subsystem::ScalarEnergies;

#[cfg(test)]
#[path = "aims_tests.rs"]
mod aims_tests;

/// The name of the control file in a calculation directory.
pub const CONTROL_FILE: &str = "control.in";

/// The name of the geometry file in a calculation directory.
pub const GEOMETRY_FILE: &str = "geometry.in";

/// The name of the log file written by the calculator in a calculation directory.
pub const LOG_FILE: &str = "asi.log";

lazy_static! {
    static ref KINETIC_RE: Regex =
        Regex::new(r"^\s*\|\s*Kinetic energy\s*:\s*\S+\s+Ha\s+(\S+)\s+eV")
            .expect("Regex pattern invalid.");
    static ref ELECTROSTATIC_RE: Regex =
        Regex::new(r"^\s*\|\s*Electrostatic energy\s*:\s*\S+\s+Ha\s+(\S+)\s+eV")
            .expect("Regex pattern invalid.");
    static ref EIGENVALUE_SUM_RE: Regex =
        Regex::new(r"^\s*\|\s*Sum of eigenvalues\s*:\s*\S+\s+Ha\s+(\S+)\s+eV")
            .expect("Regex pattern invalid.");
}

/// Writes the control file of a calculation, one `keyword value` pair per line.
///
/// # Arguments
///
/// * `work_dir` - The calculation directory, created if necessary.
/// * `settings` - The calculator settings.
pub fn write_control_in(work_dir: &Path, settings: &CalculatorSettings) -> Result<(), anyhow::Error> {
    fs::create_dir_all(work_dir)
        .with_context(|| format!("Unable to create `{}`", work_dir.display()))?;
    let path = work_dir.join(CONTROL_FILE);
    fs::write(&path, settings.to_string())
        .with_context(|| format!("Unable to write `{}`", path.display()))
}

/// Writes the geometry file of a calculation. Ghost sites are written as `empty` lines, which
/// carry basis functions but no nucleus or electrons.
///
/// # Arguments
///
/// * `work_dir` - The calculation directory, created if necessary.
/// * `structure` - The structure to write.
/// * `ghosts` - One flag per atom marking ghost sites.
pub fn write_geometry_in(
    work_dir: &Path,
    structure: &AtomicStructure,
    ghosts: &[bool],
) -> Result<(), anyhow::Error> {
    ensure!(
        ghosts.len() == structure.n_atoms(),
        "Ghost mask has {} entries for {} atoms.",
        ghosts.len(),
        structure.n_atoms()
    );
    fs::create_dir_all(work_dir)
        .with_context(|| format!("Unable to create `{}`", work_dir.display()))?;
    let path = work_dir.join(GEOMETRY_FILE);
    let mut f = fs::File::create(&path)
        .with_context(|| format!("Unable to create `{}`", path.display()))?;
    if let Some(lvs) = structure.lattice_vectors() {
        for lv in lvs {
            writeln!(f, "lattice_vector {:20.12} {:20.12} {:20.12}", lv[0], lv[1], lv[2])?;
        }
    }
    for (atom, ghost) in structure.atoms().iter().zip(ghosts.iter()) {
        let keyword = if *ghost { "empty" } else { "atom" };
        writeln!(
            f,
            "{keyword:<5} {:20.12} {:20.12} {:20.12} {}",
            atom.coordinates[0], atom.coordinates[1], atom.coordinates[2], atom.atomic_symbol
        )?;
    }
    Ok(())
}

/// Inserts a `qm_embedding_region <tag>` line immediately after every site line of a geometry
/// file, in file order.
///
/// # Arguments
///
/// * `geometry_path` - The geometry file to modify in place.
/// * `layers` - One layer tag per site, in file order.
///
/// # Errors
///
/// Errors if the number of site lines differs from the number of layer tags.
pub fn insert_embedding_regions(geometry_path: &Path, layers: &[u8]) -> Result<(), anyhow::Error> {
    let contents = fs::read_to_string(geometry_path)
        .with_context(|| format!("Unable to read `{}`", geometry_path.display()))?;
    let mut tags = layers.iter();
    let mut output = String::with_capacity(contents.len() + 24 * layers.len());
    for line in contents.lines() {
        output.push_str(line);
        output.push('\n');
        let is_site = matches!(
            line.split_whitespace().next(),
            Some("atom") | Some("atom_frac") | Some("empty")
        );
        if is_site {
            let tag = tags.next().ok_or_else(|| {
                format_err!(
                    "`{}` has more sites than the {} layer tags given.",
                    geometry_path.display(),
                    layers.len()
                )
            })?;
            output.push_str(&format!("qm_embedding_region {tag}\n"));
        }
    }
    ensure!(
        tags.next().is_none(),
        "`{}` has fewer sites than the {} layer tags given.",
        geometry_path.display(),
        layers.len()
    );
    fs::write(geometry_path, output)
        .with_context(|| format!("Unable to write `{}`", geometry_path.display()))
}

/// Extracts the kinetic energy, electrostatic energy, and sum of eigenvalues (all in eV) from a
/// calculator log. The last occurrence of each quantity is taken.
///
/// # Arguments
///
/// * `log_path` - The log file.
///
/// # Errors
///
/// Errors if the log cannot be read or if any of the three quantities is missing.
pub fn read_scalar_energies(log_path: &Path) -> Result<ScalarEnergies, anyhow::Error> {
    let contents = fs::read_to_string(log_path)
        .with_context(|| format!("Unable to read `{}`", log_path.display()))?;
    let last_value = |re: &Regex, label: &str| -> Result<f64, anyhow::Error> {
        let value = contents
            .lines()
            .filter_map(|line| re.captures(line))
            .last()
            .ok_or_else(|| format_err!("No `{label}` found in `{}`.", log_path.display()))?;
        value[1]
            .parse::<f64>()
            .map_err(|err| format_err!("Unable to parse `{label}` value `{}`: {err}", &value[1]))
    };
    Ok(ScalarEnergies {
        kinetic_energy: last_value(&KINETIC_RE, "Kinetic energy")?,
        electrostatic_energy: last_value(&ELECTROSTATIC_RE, "Electrostatic energy")?,
        eigenvalue_sum: last_value(&EIGENVALUE_SUM_RE, "Sum of eigenvalues")?,
    })
}
