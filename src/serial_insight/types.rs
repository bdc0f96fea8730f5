use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/* Channel tags used by the acquisition firmware, one per logical channel */
pub const DEFAULT_FRAME_HEADERS: [u8; 4] = [0x0A, 0x0B, 0x0C, 0x0D];
pub const FRAME_LENGTH: usize = 3; // [header][payloadLow][payloadHigh]

pub const DEFAULT_REFERENCE_VOLTAGE: f64 = 5.0;
pub const DEFAULT_ADC_RESOLUTION: u32 = 4096; // 12-bit
pub const DEFAULT_AC_REFERENCE_VOLTAGE: f64 = 230.0; // RMS
pub const DEFAULT_SAMPLING_RATE_HZ: f64 = 1000.0;
pub const DEFAULT_VOLTS_PER_AMPERE: f64 = 0.185; // ACS712-05B sensitivity

pub const HAMPEL_HALF_WINDOW: usize = 3;
pub const HAMPEL_N_SIGMAS: f64 = 3.0;

/// Decoded ADC codes of one decode cycle, indexed by channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelSampleSet {
    pub channels: Vec<Vec<u16>>,
}

impl ChannelSampleSet {
    pub fn with_channels(count: usize) -> Self {
        Self {
            channels: vec![Vec::new(); count],
        }
    }

    pub fn channel(&self, index: usize) -> &[u16] {
        self.channels.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn total_samples(&self) -> usize {
        self.channels.iter().map(Vec::len).sum()
    }

    /// Appends every channel of `other` onto the matching channel of `self`.
    pub fn extend(&mut self, other: &ChannelSampleSet) {
        if self.channels.len() < other.channels.len() {
            self.channels.resize(other.channels.len(), Vec::new());
        }
        for (dst, src) in self.channels.iter_mut().zip(other.channels.iter()) {
            dst.extend_from_slice(src);
        }
    }

    /// Scales every code to the ADC input voltage: `code / resolution * reference`.
    pub fn to_voltages(&self, reference_voltage: f64, adc_resolution: u32) -> Vec<Vec<f64>> {
        self.channels
            .iter()
            .map(|codes| {
                codes
                    .iter()
                    .map(|&code| code_to_voltage(code, reference_voltage, adc_resolution))
                    .collect()
            })
            .collect()
    }
}

pub fn code_to_voltage(code: u16, reference_voltage: f64, adc_resolution: u32) -> f64 {
    (code as f64 / adc_resolution as f64) * reference_voltage
}

/// Calibration snapshot read on every measurement tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    #[serde(alias = "referenceVoltage")]
    pub reference_voltage: f64, // ADC reference (V)
    #[serde(alias = "adcResolution")]
    pub adc_resolution: u32, // Number of ADC codes
    #[serde(alias = "offsetVoltage")]
    pub offset_voltage: f64, // Gain mode offset (V)
    pub gain: f64, // Gain mode divisor
    #[serde(alias = "useGain")]
    pub use_gain: bool, // Gain mode instead of AC-reference mode
    #[serde(alias = "acVoltageReference", alias = "acReferenceVoltage")]
    pub ac_reference_voltage: f64, // Nominal AC RMS voltage
    #[serde(alias = "samplingRateHz")]
    pub sampling_rate_hz: f64, // Samples per second on one channel
    #[serde(alias = "useFilter")]
    pub use_filter: bool, // Run the Hampel filter before calibrating
    #[serde(alias = "halfOffset")]
    pub half_offset: bool, // Gain mode offset is reference_voltage / 2
    #[serde(alias = "voltsPerAmpere")]
    pub volts_per_ampere: f64, // Current sensor sensitivity (V/A)
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            reference_voltage: DEFAULT_REFERENCE_VOLTAGE,
            adc_resolution: DEFAULT_ADC_RESOLUTION,
            offset_voltage: 0.0,
            gain: 1.0,
            use_gain: false,
            ac_reference_voltage: DEFAULT_AC_REFERENCE_VOLTAGE,
            sampling_rate_hz: DEFAULT_SAMPLING_RATE_HZ,
            use_filter: false,
            half_offset: false,
            volts_per_ampere: DEFAULT_VOLTS_PER_AMPERE,
        }
    }
}

impl CalibrationConfig {
    /// Seconds between two samples of the same channel.
    pub fn time_step(&self) -> f64 {
        1.0 / self.sampling_rate_hz
    }
}

/// One point of a calibrated series, ready for charting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub time_ms: f64,
    pub value: f64,
}

/// Calibrated physical series of one channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CalibratedSeries {
    pub points: Vec<SeriesPoint>, // Time indexed values
    pub values: Vec<f64>,         // Same values without time, used for power integration
    pub min: f64,
    pub max: f64,
}

impl CalibratedSeries {
    pub fn from_values(values: Vec<f64>, time_step: f64, min: f64, max: f64) -> Self {
        let points = values
            .iter()
            .enumerate()
            .map(|(i, &value)| SeriesPoint {
                time_ms: i as f64 * time_step * 1000.0,
                value,
            })
            .collect();

        Self {
            points,
            values,
            min,
            max,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuadratureMethod {
    #[default]
    Trapezoidal,
    Simpson,
}

impl QuadratureMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuadratureMethod::Trapezoidal => "trapezoidal",
            QuadratureMethod::Simpson => "composite Simpson",
        }
    }
}

impl fmt::Display for QuadratureMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mean active power over one observation window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PowerMeasurement {
    pub watts: f64,
    pub method: QuadratureMethod, // Quadrature that produced `watts`
    pub samples: usize,           // Aligned samples used
}

/// Request sent from the producer to the decode task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodeRequest {
    pub serial_data: Vec<u8>,
    pub reference_voltage: f64,
    pub adc_resolution: u32,
}

/// Reply of the decode task, one per request.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeResponse {
    pub voltages: Vec<Vec<f64>>, // ADC input voltage, indexed by channel
    pub reference_voltage: f64,
    pub adc_resolution: u32,
    pub decoded_at: Instant,
}

impl DecodeResponse {
    pub fn channel(&self, index: usize) -> &[f64] {
        self.voltages.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn samples_per_channel(&self) -> usize {
        self.voltages.iter().map(Vec::len).max().unwrap_or(0)
    }
}

/// Calibrated output of one measurement tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub voltage: CalibratedSeries,
    pub current: CalibratedSeries,
    pub power: PowerMeasurement,
    pub samples_per_second: Option<f64>,
}

/// Value stored by the recorder, either numeric or free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordValue {
    Number(f64),
    Text(String),
}

impl From<f64> for RecordValue {
    fn from(value: f64) -> Self {
        RecordValue::Number(value)
    }
}

impl From<&str> for RecordValue {
    fn from(value: &str) -> Self {
        RecordValue::Text(value.to_string())
    }
}

impl From<String> for RecordValue {
    fn from(value: String) -> Self {
        RecordValue::Text(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEntry {
    pub timestamp: String,
    pub value: RecordValue,
}

/// Outcome of a successful batch flush.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushReport {
    pub artifact: String, // File name of the written batch
    pub path: std::path::PathBuf,
    pub entries: usize,
}

/// Notifications emitted to the presentation side.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Measurement(Measurement),
    Flushed(FlushReport),
    FlushFailed(String),
    Skipped(String),
}
