use std::fs;
use std::path::{Path, PathBuf};

use approx::assert_abs_diff_eq;
use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use nalgebra::Point3;
use ndarray::{array, Array2};
use serial_test::serial;

use crate::auxiliary::atom::Atom;
use crate::auxiliary::structure::{AtomicStructure, EmbeddingMask};
use crate::comm::SerialContext;
use crate::interfaces::binaries::{BinariesManifest, BinariesSolver};
use crate::io::numeric::{Endianness, MatrixOrder};
use crate::io::write_qmembed_yaml;
use crate::solver::callback::MatrixCollector;
use crate::solver::{CalculatorSettings, ElectronicStructureSolver, SolverJob};
use crate::subsystem::{SubsystemConfig, SubsystemRunner};

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("qmembed_binaries_tests").join(name);
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_matrix(path: &Path, mat: &Array2<f64>, endianness: Endianness, order: MatrixOrder) {
    let values: Vec<f64> = match order {
        MatrixOrder::RowMajor => mat.iter().copied().collect(),
        MatrixOrder::ColMajor => mat.t().iter().copied().collect(),
    };
    let mut bytes = Vec::new();
    for x in values {
        match endianness {
            Endianness::Little => bytes.write_f64::<LittleEndian>(x).unwrap(),
            Endianness::Big => bytes.write_f64::<BigEndian>(x).unwrap(),
        }
    }
    fs::write(path, bytes).unwrap();
}

fn write_log(path: &Path, kinetic: f64, electrostatic: f64, eigenvalue_sum: f64) {
    let line = |label: &str, value: f64| format!("  | {label:<30}: {:20.10} Ha {value:20.10} eV\n", value / 27.2);
    fs::write(
        path,
        [
            line("Kinetic energy", kinetic),
            line("Electrostatic energy", electrostatic),
            line("Sum of eigenvalues", eigenvalue_sum),
        ]
        .concat(),
    )
    .unwrap();
}

fn h2() -> AtomicStructure {
    let atoms = vec![
        Atom::new("H", Point3::new(0.0, 0.0, 0.0)),
        Atom::new("H", Point3::new(0.74, 0.0, 0.0)),
    ];
    AtomicStructure::new(&atoms, &EmbeddingMask::Count(1), None).unwrap()
}

fn overlap() -> Array2<f64> {
    array![
        [1.0, 0.0, 0.3, 0.1],
        [0.0, 1.0, 0.1, 0.2],
        [0.3, 0.1, 1.0, 0.0],
        [0.1, 0.2, 0.0, 1.0]
    ]
}

fn kinetic() -> Array2<f64> {
    Array2::from_diag(&array![0.5, 1.5, 0.5, 1.5])
}

fn total() -> Array2<f64> {
    kinetic() - overlap()
}

fn density() -> Array2<f64> {
    Array2::from_diag(&array![1.0, 0.0, 1.0, 0.0])
}

/// Records one calculation under `root/dir_name` and returns its manifest.
fn record(
    root: &Path,
    dir_name: &str,
    total_energy: f64,
    endianness: Endianness,
    order: MatrixOrder,
) -> BinariesManifest {
    let dir = root.join(dir_name);
    fs::create_dir_all(&dir).unwrap();
    write_matrix(&dir.join("overlap.bin"), &overlap(), endianness, order);
    write_matrix(&dir.join("h_kin.bin"), &kinetic(), endianness, order);
    write_matrix(&dir.join("h_tot.bin"), &total(), endianness, order);
    write_matrix(&dir.join("dm.bin"), &density(), endianness, order);
    write_log(&dir.join("calc.log"), 12.0, -30.0, -8.0);
    let manifest = BinariesManifest::builder()
        .total_energy(total_energy)
        .basis_atoms(vec![0, 0, 1, 1])
        .byte_order(endianness)
        .matrix_order(order)
        .overlap(PathBuf::from("overlap.bin"))
        .hamiltonians(vec![PathBuf::from("h_kin.bin"), PathBuf::from("h_tot.bin")])
        .density_matrices(vec![PathBuf::from("dm.bin")])
        .log(Some(PathBuf::from("calc.log")))
        .build()
        .unwrap();
    write_qmembed_yaml(dir.join("solver"), &manifest).unwrap();
    manifest
}

fn low_level() -> CalculatorSettings {
    let mut settings = CalculatorSettings::new();
    settings.set("xc", "pbe");
    settings
}

#[test]
#[serial]
fn test_interfaces_binaries_replay_through_runner() {
    let root = scratch_dir("replay/recorded");
    let work = scratch_dir("replay/work");
    record(&root, "AB_LL", -30.5, Endianness::Little, MatrixOrder::ColMajor);
    record(&root, "AB_LL.2", -31.5, Endianness::Big, MatrixOrder::RowMajor);

    let structure = h2();
    let mut solver = BinariesSolver::new(&root, 0);
    let mut runner = SubsystemRunner::new("AB_LL", &structure, low_level(), &work);
    let result = runner.run(&mut solver, &SerialContext, false).unwrap();
    assert_abs_diff_eq!(result.total_energy, -30.5, epsilon = 1e-12);
    assert_eq!(result.basis_atoms, vec![0, 0, 1, 1]);
    assert_abs_diff_eq!(*result.overlap().unwrap(), overlap(), epsilon = 1e-12);
    assert_abs_diff_eq!(result.hamiltonian_kinetic().unwrap(), kinetic(), epsilon = 1e-12);
    assert_abs_diff_eq!(result.hamiltonian_total().unwrap(), total(), epsilon = 1e-12);
    assert_abs_diff_eq!(result.density_matrix_out(0).unwrap(), density(), epsilon = 1e-12);
    assert_abs_diff_eq!(result.scalars.kinetic_energy, 12.0, epsilon = 1e-8);
    assert_abs_diff_eq!(result.scalars.eigenvalue_sum, -8.0, epsilon = 1e-8);
    assert!(work.join("AB_LL").join("asi.log").exists());
    assert!(work.join("AB_LL").join("control.in").exists());

    // A second calculation of the same layer reads the second recording.
    let result = runner.run(&mut solver, &SerialContext, false).unwrap();
    assert_abs_diff_eq!(result.total_energy, -31.5, epsilon = 1e-12);
    assert_abs_diff_eq!(result.hamiltonian_total().unwrap(), total(), epsilon = 1e-12);

    // There is no third recording.
    assert!(runner.run(&mut solver, &SerialContext, false).is_err());
}

#[test]
#[serial]
fn test_interfaces_binaries_input_shape_check() {
    let root = scratch_dir("shape/recorded");
    let work = scratch_dir("shape/work");
    record(&root, "A_LL", -10.0, Endianness::Little, MatrixOrder::ColMajor);

    let structure = h2();
    let mut solver = BinariesSolver::new(&root, 0);
    let mut runner = SubsystemRunner::new("A_LL", &structure, low_level(), &work);
    // Recorded with four basis functions, injected with six.
    let config = SubsystemConfig::builder()
        .density_matrix_in(Some(Array2::eye(6)))
        .build()
        .unwrap();
    runner.configure(config).unwrap();
    assert!(runner.run(&mut solver, &SerialContext, false).is_err());
}

#[test]
#[serial]
fn test_interfaces_binaries_non_authoritative_rank() {
    let root = scratch_dir("rank/recorded");
    let work = scratch_dir("rank/work");
    record(&root, "AB_LL", -30.5, Endianness::Little, MatrixOrder::ColMajor);

    let structure = h2();
    let ghosts = vec![false, false];
    let settings = low_level();
    let job = SolverJob {
        label: "AB_LL",
        structure: &structure,
        ghosts: &ghosts,
        settings: &settings,
        work_dir: &work,
        density_matrix_in: None,
        embedding_matrix_in: None,
    };
    let mut solver = BinariesSolver::new(&root, 1);
    let mut collector = MatrixCollector::new("AB_LL");
    let outcome = solver.calculate(&job, &mut collector).unwrap();
    assert_abs_diff_eq!(outcome.total_energy, -30.5, epsilon = 1e-12);
    assert_eq!(outcome.basis_atoms.len(), 4);
    assert!(outcome.overlap.is_none());
    let (hamiltonians, density_matrices) = collector.finish().unwrap();
    assert!(hamiltonians.is_empty());
    assert!(density_matrices.is_empty());
}

#[test]
#[serial]
fn test_interfaces_binaries_missing_recording() {
    let root = scratch_dir("missing/recorded");
    let work = scratch_dir("missing/work");
    let structure = h2();
    let mut solver = BinariesSolver::new(&root, 0);
    let mut runner = SubsystemRunner::new("A_HL", &structure, low_level(), &work);
    let err = runner.run(&mut solver, &SerialContext, false).unwrap_err();
    assert!(err.to_string().contains("A_HL"));
}
