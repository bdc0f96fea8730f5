use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{InsightError, Result};
use super::recorder::RecorderConfig;
use super::types::{CalibrationConfig, QuadratureMethod, DEFAULT_FRAME_HEADERS};

pub const DEFAULT_CHUNK_SIZE: usize = 256;
pub const DEFAULT_TICK_PERIOD_MS: u64 = 1000;
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Complete runtime configuration of a pipeline.
///
/// Every field has a default, so a TOML file only needs the values it changes:
///
/// ```toml
/// frame_headers = [10, 11]
/// tick_period_ms = 500
///
/// [calibration]
/// useGain = true
/// gain = 12.5
///
/// [recorder]
/// directory = "records"
/// max_size = 300
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub calibration: CalibrationConfig,
    pub frame_headers: Vec<u8>,
    pub voltage_channel: usize,
    pub current_channel: usize,
    pub chunk_size: usize, // Bytes accumulated before a decode request
    pub tick_period_ms: u64,
    pub quadrature: QuadratureMethod,
    pub recorder: RecorderConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            calibration: CalibrationConfig::default(),
            frame_headers: DEFAULT_FRAME_HEADERS.to_vec(),
            voltage_channel: 0,
            current_channel: 1,
            chunk_size: DEFAULT_CHUNK_SIZE,
            tick_period_ms: DEFAULT_TICK_PERIOD_MS,
            quadrature: QuadratureMethod::default(),
            recorder: RecorderConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        log::debug!("Loaded configuration from {}", path.as_ref().display());
        Self::from_toml_str(&contents)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    pub fn channel_count(&self) -> usize {
        self.frame_headers.len()
    }

    pub fn validate(&self) -> Result<()> {
        validate_calibration(&self.calibration)?;

        if self.frame_headers.is_empty() {
            return Err(invalid("at least one frame header is required"));
        }
        let unique: HashSet<u8> = self.frame_headers.iter().copied().collect();
        if unique.len() != self.frame_headers.len() {
            return Err(invalid(format!("duplicate frame headers in {:02X?}", self.frame_headers)));
        }

        for (label, index) in [("voltage", self.voltage_channel), ("current", self.current_channel)] {
            if index >= self.channel_count() {
                return Err(invalid(format!(
                    "{} channel {} out of range for {} channels",
                    label,
                    index,
                    self.channel_count()
                )));
            }
        }

        if self.chunk_size == 0 {
            return Err(invalid("chunk_size must be at least 1"));
        }
        if self.tick_period_ms == 0 {
            return Err(invalid("tick_period_ms must be at least 1"));
        }
        if self.recorder.enabled && self.recorder.max_size == 0 {
            return Err(invalid("recorder max_size must be at least 1"));
        }

        Ok(())
    }
}

pub fn validate_calibration(calibration: &CalibrationConfig) -> Result<()> {
    if calibration.adc_resolution == 0 {
        return Err(invalid("adc_resolution must be greater than 0"));
    }
    if !(calibration.reference_voltage > 0.0) {
        return Err(invalid("reference_voltage must be greater than 0"));
    }
    if !(calibration.sampling_rate_hz > 0.0) {
        return Err(invalid("sampling_rate_hz must be greater than 0"));
    }
    if calibration.use_gain && calibration.gain == 0.0 {
        return Err(invalid("gain must not be 0"));
    }
    if calibration.volts_per_ampere == 0.0 {
        return Err(invalid("volts_per_ampere must not be 0"));
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> InsightError {
    InsightError::InvalidConfig(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.calibration.adc_resolution, 4096);
        assert_eq!(config.calibration.reference_voltage, 5.0);
        assert_eq!(config.tick_period(), Duration::from_millis(1000));
        assert_eq!(config.quadrature, QuadratureMethod::Trapezoidal);
    }

    #[test]
    fn parses_partial_toml_with_option_names() {
        let config = PipelineConfig::from_toml_str(
            r#"
            frame_headers = [10, 11]
            quadrature = "simpson"

            [calibration]
            referenceVoltage = 3.3
            useGain = true
            gain = 12.5
            halfOffset = true
            acVoltageReference = 120.0

            [recorder]
            max_size = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.frame_headers, vec![0x0A, 0x0B]);
        assert_eq!(config.quadrature, QuadratureMethod::Simpson);
        assert_eq!(config.calibration.reference_voltage, 3.3);
        assert!(config.calibration.use_gain);
        assert!(config.calibration.half_offset);
        assert_eq!(config.calibration.ac_reference_voltage, 120.0);
        assert_eq!(config.calibration.adc_resolution, 4096);
        assert_eq!(config.recorder.max_size, 3);
        assert_eq!(config.recorder.name, "recorder");
    }

    #[test]
    fn rejects_inconsistent_settings() {
        let duplicate = PipelineConfig {
            frame_headers: vec![0x0A, 0x0A],
            ..Default::default()
        };
        assert!(matches!(duplicate.validate(), Err(InsightError::InvalidConfig(_))));

        let out_of_range = PipelineConfig {
            frame_headers: vec![0x0A],
            ..Default::default()
        };
        assert!(out_of_range.validate().is_err());

        let mut zero_rate = PipelineConfig::default();
        zero_rate.calibration.sampling_rate_hz = 0.0;
        assert!(zero_rate.validate().is_err());
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            PipelineConfig::from_toml_str("chunk_size = \"big\""),
            Err(InsightError::ConfigParse(_))
        ));
    }
}
