use std::collections::VecDeque;
use std::f64::consts::PI;
use std::time::Duration;

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::error::{InsightError, Result};
use super::transport::Transport;
use super::types::{CalibrationConfig, FRAME_LENGTH};

const BLOCK_DURATION_MS: u64 = 10; // Samples produced per read burst
const MAX_CHUNK: usize = 64; // Largest simulated transport read
const GARBAGE_BYTE: u8 = 0xFF;

fn offset(deg: f64) -> f64 {
    deg * 2.0 * PI / 360.0
}

/// Shape of the simulated analog front end output, in ADC input volts.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalProfile {
    pub frequency_hz: f64,
    pub voltage_bias: f64,      // DC level of the voltage channel
    pub voltage_amplitude: f64, // Peak swing around the bias
    pub current_bias: f64,
    pub current_amplitude: f64,
    pub current_phase_deg: f64, // Positive: current lags voltage
    pub noise_percent: f64,     // Uniform noise relative to the amplitude
    pub spike_probability: f64, // Chance that a voltage sample is a full-scale spike
    pub garbage_probability: f64, // Chance of an unaligned byte between frames
}

impl Default for SignalProfile {
    fn default() -> Self {
        Self {
            frequency_hz: 50.0,
            voltage_bias: 2.5,
            voltage_amplitude: 2.0,
            current_bias: 2.5,
            current_amplitude: 0.37, // 2 A peak on a 0.185 V/A sensor
            current_phase_deg: 0.0,
            noise_percent: 0.0,
            spike_probability: 0.0,
            garbage_probability: 0.0,
        }
    }
}

impl SignalProfile {
    /// Rejects shapes that cannot be synthesized: non-finite values or
    /// probabilities outside `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        let values = [
            ("frequency_hz", self.frequency_hz),
            ("voltage_bias", self.voltage_bias),
            ("voltage_amplitude", self.voltage_amplitude),
            ("current_bias", self.current_bias),
            ("current_amplitude", self.current_amplitude),
            ("current_phase_deg", self.current_phase_deg),
            ("noise_percent", self.noise_percent),
        ];
        for (name, value) in values {
            if !value.is_finite() {
                return Err(InsightError::InvalidConfig(format!("{} must be finite, got {}", name, value)));
            }
        }

        let probabilities = [
            ("spike_probability", self.spike_probability),
            ("garbage_probability", self.garbage_probability),
        ];
        for (name, p) in probabilities {
            if !(0.0..=1.0).contains(&p) {
                return Err(InsightError::InvalidConfig(format!("{} must be within [0, 1], got {}", name, p)));
            }
        }

        Ok(())
    }
}

/*
* @brief Generate voltage and current samples in ADC input volts.
* @param profile Signal shape
* @param sampling_rate_hz Samples per second on each channel
* @param start First sample index (keeps phase continuous across calls)
* @param count Number of samples per channel
* @return (voltage, current)
*/
pub fn generate_signals(
    profile: &SignalProfile,
    sampling_rate_hz: f64,
    start: u64,
    count: usize,
    rng: &mut impl Rng,
) -> (Vec<f64>, Vec<f64>) {
    let samples = Array1::range(start as f64, (start + count as u64) as f64, 1.0);
    let omega = 2.0 * PI * profile.frequency_hz / sampling_rate_hz;

    let mut noise = |amplitude: f64| -> f64 {
        if profile.noise_percent > 0.0 {
            amplitude * profile.noise_percent * rng.gen_range(-1.0..1.0)
        } else {
            0.0
        }
    };

    let voltage: Vec<f64> = samples
        .iter()
        .map(|&s| profile.voltage_bias + profile.voltage_amplitude * (omega * s).sin() + noise(profile.voltage_amplitude))
        .collect();

    let current: Vec<f64> = samples
        .iter()
        .map(|&s| {
            profile.current_bias
                + profile.current_amplitude * (omega * s - offset(profile.current_phase_deg)).sin()
                + noise(profile.current_amplitude)
        })
        .collect();

    (voltage, current)
}

/// Quantizes an ADC input voltage to a code in `[0, resolution)`.
pub fn voltage_to_code(volts: f64, reference_voltage: f64, adc_resolution: u32) -> u16 {
    let max_code = adc_resolution.saturating_sub(1).min(u16::MAX as u32) as f64;
    (volts / reference_voltage * adc_resolution as f64).round().clamp(0.0, max_code) as u16
}

/// Encodes one `[header][low][high]` frame.
pub fn encode_frame(header: u8, code: u16) -> [u8; FRAME_LENGTH] {
    let [low, high] = code.to_le_bytes();
    [header, low, high]
}

/// Synthetic source speaking the acquisition frame protocol.
///
/// Produces interleaved voltage/current frames in real time and hands them
/// out in randomly sized reads so frames regularly straddle read boundaries.
pub struct SimulatedTransport {
    profile: SignalProfile,
    calibration: CalibrationConfig,
    voltage_header: u8,
    current_header: u8,
    sample_index: u64,
    pending: VecDeque<u8>,
    rng: StdRng,
    open: bool,
    realtime: bool,
}

impl SimulatedTransport {
    pub fn new(
        profile: SignalProfile,
        calibration: CalibrationConfig,
        voltage_header: u8,
        current_header: u8,
    ) -> Result<Self> {
        profile.validate()?;

        Ok(Self {
            profile,
            calibration,
            voltage_header,
            current_header,
            sample_index: 0,
            pending: VecDeque::new(),
            rng: StdRng::from_entropy(),
            open: false,
            realtime: true,
        })
    }

    /// Deterministic output without pacing, for tests.
    pub fn seeded(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self.realtime = false;
        self
    }

    fn samples_per_block(&self) -> usize {
        ((self.calibration.sampling_rate_hz * BLOCK_DURATION_MS as f64 / 1000.0).round() as usize).max(1)
    }

    fn produce_block(&mut self) {
        let count = self.samples_per_block();
        let (voltage, current) = generate_signals(
            &self.profile,
            self.calibration.sampling_rate_hz,
            self.sample_index,
            count,
            &mut self.rng,
        );
        self.sample_index += count as u64;

        let reference = self.calibration.reference_voltage;
        let resolution = self.calibration.adc_resolution;

        for (v, c) in voltage.into_iter().zip(current) {
            let v = if self.rng.gen_bool(self.profile.spike_probability) {
                reference
            } else {
                v
            };

            self.pending
                .extend(encode_frame(self.voltage_header, voltage_to_code(v, reference, resolution)));
            if self.rng.gen_bool(self.profile.garbage_probability) {
                self.pending.push_back(GARBAGE_BYTE);
            }
            self.pending
                .extend(encode_frame(self.current_header, voltage_to_code(c, reference, resolution)));
        }

        if self.realtime {
            spin_sleep::sleep(Duration::from_millis(BLOCK_DURATION_MS));
        }
    }
}

impl Transport for SimulatedTransport {
    fn name(&self) -> String {
        format!("simulated {:.1} Hz", self.profile.frequency_hz)
    }

    fn open(&mut self) -> Result<()> {
        self.open = true;
        log::info!("Simulating signals instead of reading from hardware.");
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.open {
            return Err(InsightError::Transport("simulated transport is closed".to_string()));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pending.is_empty() {
            self.produce_block();
        }

        let limit = buf.len().min(MAX_CHUNK).min(self.pending.len());
        let n = self.rng.gen_range(1..=limit);
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }

        Ok(n)
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        self.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial_insight::decoder::FrameDecoder;
    use crate::serial_insight::types::ChannelSampleSet;

    #[test]
    fn frame_encoding_is_little_endian() {
        assert_eq!(encode_frame(0x0A, 0x0123), [0x0A, 0x23, 0x01]);
        assert_eq!(voltage_to_code(2.5, 5.0, 4096), 2048);
        assert_eq!(voltage_to_code(9.0, 5.0, 4096), 4095);
        assert_eq!(voltage_to_code(-1.0, 5.0, 4096), 0);
    }

    #[test]
    fn generated_signals_follow_profile() {
        let profile = SignalProfile::default();
        let mut rng = StdRng::seed_from_u64(1);
        let (v, c) = generate_signals(&profile, 1000.0, 0, 20, &mut rng);

        assert_eq!(v.len(), 20);
        assert!((v[0] - 2.5).abs() < 1e-12);
        assert!((v[5] - 4.5).abs() < 1e-9); // quarter period at 50 Hz / 1 kHz
        assert!((c[5] - (2.5 + 0.37)).abs() < 1e-9);
    }

    #[test]
    fn unusable_profiles_are_rejected() {
        let nan_spikes = SignalProfile {
            spike_probability: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(
            SimulatedTransport::new(nan_spikes, CalibrationConfig::default(), 0x0A, 0x0B),
            Err(InsightError::InvalidConfig(_))
        ));

        let too_likely = SignalProfile {
            garbage_probability: 1.5,
            ..Default::default()
        };
        assert!(too_likely.validate().is_err());

        let infinite_noise = SignalProfile {
            noise_percent: f64::INFINITY,
            ..Default::default()
        };
        assert!(infinite_noise.validate().is_err());
        assert!(SignalProfile::default().validate().is_ok());
    }

    #[test]
    fn simulated_stream_decodes_back_to_interleaved_channels() {
        let calibration = CalibrationConfig::default();
        let profile = SignalProfile {
            garbage_probability: 0.2,
            ..Default::default()
        };
        let mut transport = SimulatedTransport::new(profile, calibration, 0x0A, 0x0B).unwrap().seeded(7);
        transport.open().unwrap();

        let mut decoder = FrameDecoder::new(&[0x0A, 0x0B]);
        let mut all = ChannelSampleSet::with_channels(2);
        let mut buf = [0u8; 256];
        for _ in 0..200 {
            let n = transport.read(&mut buf).unwrap();
            all.extend(&decoder.decode(&buf[..n]));
        }

        assert!(all.channel(0).len() > 50);
        assert!(all.channel(0).len().abs_diff(all.channel(1).len()) <= 1);
        assert!(all.channel(0).iter().all(|&code| code < 4096));
    }
}
