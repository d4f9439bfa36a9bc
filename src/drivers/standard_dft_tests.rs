use std::fs;
use std::path::PathBuf;

use approx::assert_abs_diff_eq;
use nalgebra::Point3;
use serial_test::serial;

use crate::auxiliary::atom::Atom;
use crate::auxiliary::structure::{AtomicStructure, EmbeddingMask};
use crate::comm::SerialContext;
use crate::drivers::standard_dft::{StandardDftDriver, StandardDftParams, StandardDftResult};
use crate::drivers::EmbeddingDriver;
use crate::io::read_qmembed_yaml;
use crate::solver::callback::StorageType;
use crate::solver::synthetic::SyntheticSolver;
use crate::solver::{CalculatorSettings, SettingValue};

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("qmembed_standard_dft_tests").join(name);
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
#[serial]
fn test_drivers_standard_dft_single_run() {
    let dir = scratch_dir("single");
    let atoms = vec![
        Atom::new("N", Point3::new(0.0, 0.0, 0.0)),
        Atom::new("N", Point3::new(1.1, 0.0, 0.0)),
    ];
    let structure = AtomicStructure::new(&atoms, &EmbeddingMask::Count(2), None).unwrap();
    let mut low_level = CalculatorSettings::new();
    low_level.set("xc", "pbe");
    let save_name = dir.join("n2").to_string_lossy().to_string();
    let params = StandardDftParams::builder()
        .work_root(dir.clone())
        .result_save_name(Some(save_name.clone()))
        .build()
        .unwrap();
    let mut solver = SyntheticSolver::new(2, StorageType::DenseDistributed, StorageType::DenseDistributed);
    let mut driver = StandardDftDriver::builder()
        .parameters(&params)
        .structure(&structure)
        .low_level(&low_level)
        .solver(&mut solver)
        .ctx(&SerialContext)
        .build()
        .unwrap();
    assert!(driver.result().is_err());
    driver.run().unwrap();
    let total_energy = driver.result().unwrap().total_energy;
    assert!(total_energy.is_finite());

    let job = solver.job("AB_LL").unwrap();
    assert_eq!(job.n_atoms, 2);
    assert!(job.ghosts.iter().all(|ghost| !ghost));
    assert_eq!(job.settings.get("xc"), Some(&SettingValue::from("pbe")));
    assert!(!job.settings.contains("qm_embedding_calc"));
    assert!(job.density_matrix_in.is_none());
    assert!(dir.join("AB_LL").join("geometry.in").exists());

    let saved: StandardDftResult = read_qmembed_yaml(format!("{save_name}.yml")).unwrap();
    assert_abs_diff_eq!(saved.total_energy, total_energy, epsilon = 1e-10);
}
