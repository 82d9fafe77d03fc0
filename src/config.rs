//! Runtime configuration loaded from TOML

use crate::error::{SimError, SimResult};
use crate::gpu::device::wgpu_backend::WgpuOptions;
use crate::sims::chain::ChainSettings;
use crate::sims::fluid::FluidSettings;
use crate::sims::life::{LifeMode, LifeSettings};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which capability provider runs the simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Wgpu,
    Software,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerPreference {
    LowPower,
    #[default]
    HighPerformance,
}

impl From<PowerPreference> for wgpu::PowerPreference {
    fn from(value: PowerPreference) -> Self {
        match value {
            PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
            PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub grid_width: u32,
    pub grid_height: u32,
    /// Workgroup tile for grid passes
    pub tile_size: [u32; 2],
    /// Records per workgroup for record passes
    pub record_batch: u32,
    pub pressure_iterations: u32,
    /// Ticks per second; unthrottled when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_tick_rate: Option<f64>,
    pub validate_shaders: bool,
    pub backend: Backend,
    pub power_preference: PowerPreference,
    pub life_mode: LifeMode,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            grid_width: 64,
            grid_height: 64,
            tile_size: [8, 8],
            record_batch: 64,
            pressure_iterations: 20,
            target_tick_rate: None,
            validate_shaders: true,
            backend: Backend::default(),
            power_preference: PowerPreference::default(),
            life_mode: LifeMode::default(),
        }
    }
}

impl SimConfig {
    pub fn from_toml_str(raw: &str) -> SimResult<Self> {
        let config: SimConfig = toml::from_str(raw)
            .map_err(|e| SimError::Config(format!("failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> SimResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SimError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&raw)?;
        log::info!("[Config] Loaded {}", path.display());
        Ok(config)
    }

    pub fn to_toml_string(&self) -> SimResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| SimError::Config(format!("failed to serialize config: {}", e)))
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.grid_width == 0 || self.grid_height == 0 {
            return Err(SimError::Config(format!(
                "grid must be non-empty, got {}x{}",
                self.grid_width, self.grid_height
            )));
        }
        if self.tile_size.contains(&0) {
            return Err(SimError::Config(format!(
                "tile_size must be non-zero, got {:?}",
                self.tile_size
            )));
        }
        if self.record_batch == 0 {
            return Err(SimError::Config("record_batch must be non-zero".into()));
        }
        if let Some(rate) = self.target_tick_rate {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(SimError::Config(format!(
                    "target_tick_rate must be positive, got {}",
                    rate
                )));
            }
        }
        Ok(())
    }

    pub fn wgpu_options(&self) -> WgpuOptions {
        WgpuOptions {
            power_preference: self.power_preference.into(),
            validate_shaders: self.validate_shaders,
            ..WgpuOptions::default()
        }
    }

    pub fn life_settings(&self) -> LifeSettings {
        LifeSettings::new(self.grid_width, self.grid_height)
            .with_mode(self.life_mode)
            .with_tile(self.tile_size)
    }

    pub fn chain_settings(&self) -> ChainSettings {
        ChainSettings {
            batch: self.record_batch,
            ..ChainSettings::default()
        }
    }

    pub fn fluid_settings(&self) -> FluidSettings {
        let mut settings = FluidSettings::new(self.grid_width, self.grid_height);
        settings.tile = self.tile_size;
        settings.pressure_iterations = self.pressure_iterations;
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = SimConfig::from_toml_str(
            r#"
grid_width = 32
backend = "software"
life_mode = "single_buffer"
target_tick_rate = 30.0
"#,
        )
        .unwrap();
        assert_eq!(config.grid_width, 32);
        assert_eq!(config.grid_height, 64);
        assert_eq!(config.tile_size, [8, 8]);
        assert_eq!(config.backend, Backend::Software);
        assert_eq!(config.life_mode, LifeMode::SingleBuffer);
        assert_eq!(config.target_tick_rate, Some(30.0));
        assert_eq!(config.life_settings().mode, LifeMode::SingleBuffer);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            SimConfig::from_toml_str("tile_size = [0, 8]"),
            Err(SimError::Config(_))
        ));
        assert!(matches!(
            SimConfig::from_toml_str("target_tick_rate = -1.0"),
            Err(SimError::Config(_))
        ));
        assert!(matches!(
            SimConfig::from_toml_str("backend = \"vulkan\""),
            Err(SimError::Config(_))
        ));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = SimConfig {
            power_preference: PowerPreference::LowPower,
            pressure_iterations: 5,
            ..SimConfig::default()
        };
        let text = config.to_toml_string().unwrap();
        assert_eq!(SimConfig::from_toml_str(&text).unwrap(), config);
        assert_eq!(config.fluid_settings().pressure_iterations, 5);
        assert_eq!(
            config.wgpu_options().power_preference,
            wgpu::PowerPreference::LowPower
        );
    }
}
