use crate::solver::{CalculatorSettings, SettingValue};

#[test]
fn test_solver_settings_order_and_format() {
    let mut settings = CalculatorSettings::new();
    settings
        .set("xc", "pbe")
        .set("qm_embedding_calc", 1)
        .set("charge_mix_param", 0.0)
        .set("use_ovlp_swap", true);
    settings.set("xc", "pbe0");
    let lines = settings.to_string();
    let keywords = lines
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .collect::<Vec<_>>();
    assert_eq!(
        keywords,
        vec![
            vec!["xc", "pbe0"],
            vec!["qm_embedding_calc", "1"],
            vec!["charge_mix_param", "0.0"],
            vec!["use_ovlp_swap", ".true."],
        ]
    );
    assert!(settings.contains("use_ovlp_swap"));
    assert_eq!(settings.get("qm_embedding_calc"), Some(&SettingValue::Int(1)));
}

#[test]
fn test_solver_settings_from_yaml() {
    let settings: CalculatorSettings =
        serde_yaml::from_str("xc: pbe\ncharge: -1\nsc_accuracy_rho: 1.0e-5\nrelativistic: atomic_zora scalar\nspin: none\n")
            .unwrap();
    assert_eq!(settings.get("charge"), Some(&SettingValue::Int(-1)));
    assert_eq!(settings.get("sc_accuracy_rho"), Some(&SettingValue::Float(1.0e-5)));
    assert_eq!(
        settings.get("relativistic"),
        Some(&SettingValue::Text("atomic_zora scalar".to_string()))
    );
    assert_eq!(
        settings.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
        vec!["xc", "charge", "sc_accuracy_rho", "relativistic", "spin"]
    );
}
