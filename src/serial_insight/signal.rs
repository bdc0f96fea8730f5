use std::f64::consts::SQRT_2;

use super::error::{InsightError, Result};
use super::hampel::HampelFilter;
use super::types::{CalibratedSeries, CalibrationConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
    Voltage,
    Current,
}

impl SignalType {
    pub fn unit(&self) -> &'static str {
        match self {
            SignalType::Voltage => "V",
            SignalType::Current => "A",
        }
    }
}

/// Converts ADC input voltages into physical voltage and current series.
#[derive(Debug, Clone)]
pub struct Calibrator {
    config: CalibrationConfig,
    filter: HampelFilter,
}

/*
* @brief Minimum and maximum of a signal.
* @param signal Signal buffer
* @return (min, max) or None if the signal is empty
*/
pub fn signal_min_max(signal: &[f64]) -> Option<(f64, f64)> {
    if signal.is_empty() {
        return None;
    }

    Some(
        signal
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), &x| (min.min(x), max.max(x))),
    )
}

/*
* @brief Midpoint between the extremes of a signal.
* @note This is the neutral level of a sine riding on a DC bias.
*/
pub fn signal_center(min: f64, max: f64) -> f64 {
    (max + min) / 2.0
}

/*
* @brief Remove a fixed offset and divide by the gain.
* @param sample ADC input voltage
* @param offset Offset voltage to remove
* @param gain Front end gain
* @return Physical voltage
*/
fn apply_gain(sample: f64, offset: f64, gain: f64) -> f64 {
    (sample - offset) / gain
}

/*
* @brief Map a sample onto [-peak, peak] around the signal neutral level.
* @param sample ADC input voltage
* @param neutral Neutral level of the signal
* @param half_range Distance from neutral to the signal maximum
* @param peak Peak of the nominal AC voltage
* @return Physical voltage; 0 when the signal is flat
*/
fn apply_ac_reference(sample: f64, neutral: f64, half_range: f64, peak: f64) -> f64 {
    if half_range == 0.0 {
        return 0.0;
    }
    (sample - neutral) / half_range * peak
}

fn require_samples(signal: &[f64], signal_type: SignalType) -> Result<(f64, f64)> {
    signal_min_max(signal).ok_or_else(|| {
        InsightError::InvalidInput(format!("empty {:?} sequence, min/max undefined", signal_type))
    })
}

impl Calibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            config,
            filter: HampelFilter::default(),
        }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    fn prepare(&self, raw: &[f64]) -> Vec<f64> {
        if self.config.use_filter {
            self.filter.apply(raw.to_vec())
        } else {
            raw.to_vec()
        }
    }

    /// Calibrates the voltage channel with the gain or AC-reference transfer function.
    pub fn calibrate_voltage(&self, raw: &[f64]) -> Result<CalibratedSeries> {
        let signal = self.prepare(raw);
        let (raw_min, raw_max) = require_samples(&signal, SignalType::Voltage)?;
        let time_step = self.config.time_step();

        if self.config.use_gain {
            let offset = if self.config.half_offset {
                self.config.reference_voltage / 2.0
            } else {
                self.config.offset_voltage
            };
            let gain = self.config.gain;

            let values: Vec<f64> = signal.iter().map(|&s| apply_gain(s, offset, gain)).collect();
            let low = apply_gain(raw_min, offset, gain);
            let high = apply_gain(raw_max, offset, gain);

            Ok(CalibratedSeries::from_values(values, time_step, low.min(high), low.max(high)))
        } else {
            let neutral = signal_center(raw_min, raw_max);
            let half_range = raw_max - neutral;
            let peak = self.config.ac_reference_voltage * SQRT_2;

            let values: Vec<f64> = signal
                .iter()
                .map(|&s| apply_ac_reference(s, neutral, half_range, peak))
                .collect();

            if half_range == 0.0 {
                log::debug!("Flat voltage signal at {:.4} V", neutral);
                return Ok(CalibratedSeries::from_values(values, time_step, 0.0, 0.0));
            }

            Ok(CalibratedSeries::from_values(values, time_step, -peak, peak))
        }
    }

    /// Calibrates the current channel around its own midpoint.
    pub fn calibrate_current(&self, raw: &[f64]) -> Result<CalibratedSeries> {
        let signal = self.prepare(raw);
        let (raw_min, raw_max) = require_samples(&signal, SignalType::Current)?;
        let center = signal_center(raw_min, raw_max);
        let volts_per_ampere = self.config.volts_per_ampere;

        let values: Vec<f64> = signal.iter().map(|&s| (s - center) / volts_per_ampere).collect();
        let low = (raw_min - center) / volts_per_ampere;
        let high = (raw_max - center) / volts_per_ampere;

        Ok(CalibratedSeries::from_values(
            values,
            self.config.time_step(),
            low.min(high),
            low.max(high),
        ))
    }

    pub fn calibrate(&self, raw: &[f64], signal_type: SignalType) -> Result<CalibratedSeries> {
        match signal_type {
            SignalType::Voltage => self.calibrate_voltage(raw),
            SignalType::Current => self.calibrate_current(raw),
        }
    }
}
