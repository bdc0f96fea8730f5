use std::time::Instant;

use super::config::PipelineConfig;
use super::error::{InsightError, Result};
use super::power::PowerEstimator;
use super::print;
use super::recorder::BatchRecorder;
use super::signal::Calibrator;
use super::types::{CalibrationConfig, DecodeResponse, Measurement, PipelineEvent};

/// State owned by the measurement tick: calibration snapshot, power
/// integration and the recorder batch.
#[derive(Debug)]
pub struct MeasurementContext {
    calibrator: Calibrator,
    estimator: PowerEstimator,
    recorder: Option<BatchRecorder>,
    voltage_channel: usize,
    current_channel: usize,
    last_arrival: Option<Instant>,
    previous_arrival: Option<Instant>,
}

impl MeasurementContext {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let recorder = if config.recorder.enabled {
            Some(BatchRecorder::from_config(&config.recorder)?)
        } else {
            None
        };

        Ok(Self {
            calibrator: Calibrator::new(config.calibration.clone()),
            estimator: PowerEstimator::new(config.quadrature),
            recorder,
            voltage_channel: config.voltage_channel,
            current_channel: config.current_channel,
            last_arrival: None,
            previous_arrival: None,
        })
    }

    pub fn calibration(&self) -> &CalibrationConfig {
        self.calibrator.config()
    }

    pub fn set_calibration(&mut self, calibration: CalibrationConfig) {
        self.calibrator = Calibrator::new(calibration);
    }

    pub fn recorder(&self) -> Option<&BatchRecorder> {
        self.recorder.as_ref()
    }

    /// Registers the arrival of a decode result, processed or not.
    pub fn note_arrival(&mut self, at: Instant) {
        self.previous_arrival = self.last_arrival.replace(at);
    }

    fn samples_per_second(&self, samples: usize) -> Option<f64> {
        let elapsed = self.last_arrival?.checked_duration_since(self.previous_arrival?)?;
        if elapsed.is_zero() {
            return None;
        }
        Some(samples as f64 / elapsed.as_secs_f64())
    }

    /// Calibrates both channels of `response` and integrates active power.
    pub fn measure(&self, response: &DecodeResponse) -> Result<Measurement> {
        let raw_voltage = response.channel(self.voltage_channel);
        let raw_current = response.channel(self.current_channel);

        if raw_voltage.is_empty() || raw_current.is_empty() {
            return Err(InsightError::InvalidInput(format!(
                "decode result has {} voltage and {} current samples",
                raw_voltage.len(),
                raw_current.len()
            )));
        }

        let voltage = self.calibrator.calibrate_voltage(raw_voltage)?;
        let current = self.calibrator.calibrate_current(raw_current)?;
        let time_step = self.calibrator.config().time_step();
        let power = self.estimator.estimate(&voltage.values, &current.values, time_step)?;

        Ok(Measurement {
            samples_per_second: self.samples_per_second(response.samples_per_channel()),
            voltage,
            current,
            power,
        })
    }

    /// One measurement tick: measure, report, record.
    ///
    /// Never fails; problems come back as `Skipped` or `FlushFailed` events.
    pub fn process(&mut self, response: &DecodeResponse) -> Vec<PipelineEvent> {
        let mut events = Vec::with_capacity(2);

        let measurement = match self.measure(response) {
            Ok(measurement) => measurement,
            Err(e) => {
                log::warn!("Measurement skipped: {}", e);
                events.push(PipelineEvent::Skipped(e.to_string()));
                return events;
            }
        };

        print::print_measurement(&measurement);

        if let Some(recorder) = self.recorder.as_mut() {
            match recorder.record(measurement.power.watts) {
                Ok(Some(report)) => events.push(PipelineEvent::Flushed(report)),
                Ok(None) => {}
                Err(e) => {
                    log::error!(
                        "Flush of {} records failed, keeping batch: {}",
                        recorder.len(),
                        e
                    );
                    events.push(PipelineEvent::FlushFailed(e.to_string()));
                }
            }
        }

        events.insert(0, PipelineEvent::Measurement(measurement));
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial_insight::recorder::RecorderConfig;
    use std::time::Duration;
    use tempfile::tempdir;

    fn response(voltage: Vec<f64>, current: Vec<f64>) -> DecodeResponse {
        DecodeResponse {
            voltages: vec![voltage, current],
            reference_voltage: 5.0,
            adc_resolution: 4096,
            decoded_at: Instant::now(),
        }
    }

    fn config(directory: &std::path::Path, max_size: usize) -> PipelineConfig {
        let mut config = PipelineConfig {
            frame_headers: vec![0x0A, 0x0B],
            recorder: RecorderConfig {
                directory: directory.to_path_buf(),
                max_size,
                ..Default::default()
            },
            ..Default::default()
        };
        config.calibration.use_gain = true;
        config.calibration.volts_per_ampere = 1.0;
        config
    }

    #[test]
    fn measures_constant_dc_power() {
        let dir = tempdir().unwrap();
        let context = MeasurementContext::new(&config(dir.path(), 10)).unwrap();

        // Gain mode: 3 V; current channel is centered, so a flat current is 0 A
        let measurement = context.measure(&response(vec![3.0; 8], vec![2.5; 8])).unwrap();
        assert_eq!(measurement.voltage.values, vec![3.0; 8]);
        assert!(measurement.current.values.iter().all(|&i| i == 0.0));
        assert_eq!(measurement.power.watts, 0.0);
        assert_eq!(measurement.power.samples, 8);
    }

    #[test]
    fn empty_channel_is_skipped() {
        let dir = tempdir().unwrap();
        let mut context = MeasurementContext::new(&config(dir.path(), 10)).unwrap();

        let events = context.process(&response(vec![1.0, 2.0], vec![]));
        assert!(matches!(events.as_slice(), [PipelineEvent::Skipped(_)]));
        assert_eq!(context.recorder().unwrap().len(), 0);
    }

    #[test]
    fn records_power_and_reports_flush() {
        let dir = tempdir().unwrap();
        let mut context = MeasurementContext::new(&config(dir.path(), 2)).unwrap();
        let sample = response(vec![1.0, 2.0, 3.0], vec![1.0, 2.0, 3.0]);

        let first = context.process(&sample);
        assert_eq!(first.len(), 1);
        assert!(matches!(first[0], PipelineEvent::Measurement(_)));

        let second = context.process(&sample);
        assert!(matches!(second.as_slice(), [PipelineEvent::Measurement(_), PipelineEvent::Flushed(report)] if report.entries == 2));
        assert_eq!(context.recorder().unwrap().len(), 0);
    }

    #[test]
    fn failed_flush_does_not_stop_later_ticks() {
        let dir = tempdir().unwrap();
        let blocked = dir.path().join("records");
        std::fs::write(&blocked, b"not a directory").unwrap();

        let mut context = MeasurementContext::new(&config(&blocked, 2)).unwrap();
        let sample = response(vec![1.0, 2.0, 3.0], vec![1.0, 2.0, 3.0]);

        context.process(&sample);
        let failed = context.process(&sample);
        assert!(matches!(failed.as_slice(), [PipelineEvent::Measurement(_), PipelineEvent::FlushFailed(_)]));
        assert_eq!(context.recorder().unwrap().len(), 2);

        let still_failing = context.process(&sample);
        assert!(matches!(still_failing[0], PipelineEvent::Measurement(_)));
        assert_eq!(context.recorder().unwrap().len(), 3);

        std::fs::remove_file(&blocked).unwrap();
        let recovered = context.process(&sample);
        assert!(matches!(recovered.as_slice(), [PipelineEvent::Measurement(_), PipelineEvent::Flushed(report)] if report.entries == 4));
        assert!(context.recorder().unwrap().is_empty());
    }

    #[test]
    fn sample_rate_from_arrival_spacing() {
        let dir = tempdir().unwrap();
        let mut context = MeasurementContext::new(&config(dir.path(), 10)).unwrap();
        let start = Instant::now();

        context.note_arrival(start);
        let only_one = context.measure(&response(vec![1.0; 4], vec![1.0; 4])).unwrap();
        assert_eq!(only_one.samples_per_second, None);

        context.note_arrival(start + Duration::from_millis(500));
        let measurement = context.measure(&response(vec![1.0; 100], vec![1.0; 100])).unwrap();
        let sps = measurement.samples_per_second.unwrap();
        assert!((sps - 200.0).abs() < 1e-9);
    }

    #[test]
    fn calibration_update_applies_to_next_measurement() {
        let dir = tempdir().unwrap();
        let mut context = MeasurementContext::new(&config(dir.path(), 10)).unwrap();

        let mut calibration = context.calibration().clone();
        calibration.gain = 2.0;
        context.set_calibration(calibration);

        let measurement = context.measure(&response(vec![4.0; 3], vec![1.0; 3])).unwrap();
        assert_eq!(measurement.voltage.values, vec![2.0; 3]);
    }
}
