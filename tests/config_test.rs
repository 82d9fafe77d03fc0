//! Loading runner configuration from disk

use gpu_sim_engine::config::{Backend, PowerPreference, SimConfig};
use gpu_sim_engine::sims::life::LifeMode;
use gpu_sim_engine::SimError;
use std::io::Write;

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
grid_width = 128
grid_height = 96
tile_size = [16, 16]
backend = "software"
power_preference = "low_power"
life_mode = "double_buffered"
validate_shaders = false
"#
    )
    .unwrap();

    let config = SimConfig::load(file.path()).unwrap();
    assert_eq!((config.grid_width, config.grid_height), (128, 96));
    assert_eq!(config.backend, Backend::Software);
    assert_eq!(config.power_preference, PowerPreference::LowPower);
    assert_eq!(config.target_tick_rate, None);
    assert!(!config.wgpu_options().validate_shaders);

    let life = config.life_settings();
    assert_eq!(life.tile, [16, 16]);
    assert_eq!(life.mode, LifeMode::DoubleBuffered);
    assert_eq!(config.chain_settings().batch, 64);
}

#[test]
fn test_saved_config_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sim.toml");
    let config = SimConfig {
        grid_width: 10,
        target_tick_rate: Some(60.0),
        life_mode: LifeMode::SingleBuffer,
        ..SimConfig::default()
    };
    std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();
    assert_eq!(SimConfig::load(&path).unwrap(), config);
}

#[test]
fn test_missing_or_invalid_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = SimConfig::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, SimError::Config(_)));
    assert!(err.is_configuration());

    let path = dir.path().join("zero.toml");
    std::fs::write(&path, "grid_width = 0\n").unwrap();
    assert!(matches!(SimConfig::load(&path), Err(SimError::Config(_))));
}
