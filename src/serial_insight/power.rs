use super::error::{InsightError, Result};
use super::types::{PowerMeasurement, QuadratureMethod};

/*
* @brief Number of aligned voltage/current samples usable for integration.
* @return min(len(v), len(i)) if it is at least 2 and the time step is positive
*/
fn aligned_length(signal_v: &[f64], signal_i: &[f64], time_step: f64) -> Result<usize> {
    let length = signal_v.len().min(signal_i.len());

    if length < 2 {
        return Err(InsightError::InvalidInput(format!(
            "active power needs at least 2 aligned samples, got {}",
            length
        )));
    }
    if !(time_step > 0.0) {
        return Err(InsightError::InvalidInput(format!(
            "time step must be positive, got {}",
            time_step
        )));
    }

    Ok(length)
}

/*
* @brief Mean active power using the trapezoidal rule.
* @param signal_v Calibrated voltage samples (V)
* @param signal_i Calibrated current samples (A)
* @param time_step Seconds between samples
* @return Energy over the window divided by its duration (W)
*/
pub fn calculate_real_power_trapezoidal(signal_v: &[f64], signal_i: &[f64], time_step: f64) -> Result<f64> {
    let length = aligned_length(signal_v, signal_i, time_step)?;

    let mut energy: f64 = 0.0;
    for i in 1..length {
        let a = signal_v[i - 1] * signal_i[i - 1];
        let b = signal_v[i] * signal_i[i];
        energy += 0.5 * time_step * (a + b);
    }

    Ok(energy / (time_step * (length - 1) as f64))
}

/*
* @brief Mean active power using composite Simpson's rule.
* @param signal_v Calibrated voltage samples (V)
* @param signal_i Calibrated current samples (A)
* @param time_step Seconds between samples
* @return Energy over the window divided by its duration (W)
* @note An even sample count drops the last sample. Two samples cannot form a
*       Simpson panel and fall back to the trapezoidal rule.
*/
pub fn calculate_real_power_simpson(signal_v: &[f64], signal_i: &[f64], time_step: f64) -> Result<f64> {
    let mut length = aligned_length(signal_v, signal_i, time_step)?;

    if length % 2 == 0 {
        length -= 1;
    }
    if length < 3 {
        return calculate_real_power_trapezoidal(&signal_v[..2], &signal_i[..2], time_step);
    }

    let product = |k: usize| signal_v[k] * signal_i[k];

    let mut sum: f64 = 0.0;
    for i in (0..=length - 3).step_by(2) {
        sum += product(i) + 4.0 * product(i + 1) + product(i + 2);
    }
    let energy = sum * time_step / 3.0;

    Ok(energy / (time_step * (length - 1) as f64))
}

/// Integrates paired voltage/current series into mean active power.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PowerEstimator {
    method: QuadratureMethod,
}

impl PowerEstimator {
    pub fn new(method: QuadratureMethod) -> Self {
        Self { method }
    }

    pub fn method(&self) -> QuadratureMethod {
        self.method
    }

    pub fn estimate(&self, signal_v: &[f64], signal_i: &[f64], time_step: f64) -> Result<PowerMeasurement> {
        let watts = match self.method {
            QuadratureMethod::Trapezoidal => calculate_real_power_trapezoidal(signal_v, signal_i, time_step)?,
            QuadratureMethod::Simpson => calculate_real_power_simpson(signal_v, signal_i, time_step)?,
        };

        Ok(PowerMeasurement {
            watts,
            method: self.method,
            samples: signal_v.len().min(signal_i.len()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const EPS: f64 = 1e-9;

    #[test]
    fn constant_inputs_give_v_times_i() {
        for n in 2..12 {
            let v = vec![230.0; n];
            let i = vec![1.5; n];

            let trap = calculate_real_power_trapezoidal(&v, &i, 0.001).unwrap();
            let simp = calculate_real_power_simpson(&v, &i, 0.001).unwrap();

            assert!((trap - 345.0).abs() < EPS, "trapezoidal n={}", n);
            assert!((simp - 345.0).abs() < EPS, "simpson n={}", n);
        }
    }

    #[test]
    fn uses_only_aligned_prefix() {
        let v = vec![2.0, 2.0, 2.0, 100.0, 100.0];
        let i = vec![3.0, 3.0, 3.0];

        let power = PowerEstimator::default().estimate(&v, &i, 0.01).unwrap();
        assert!((power.watts - 6.0).abs() < EPS);
        assert_eq!(power.samples, 3);
        assert_eq!(power.method, QuadratureMethod::Trapezoidal);
    }

    #[test]
    fn in_phase_sine_gives_half_peak_product() {
        // One full period of in-phase sines: P = Vp * Ip / 2
        let n = 1001;
        let dt = 1.0 / 50.0 / (n - 1) as f64;
        let v: Vec<f64> = (0..n).map(|k| 325.0 * (2.0 * PI * 50.0 * k as f64 * dt).sin()).collect();
        let i: Vec<f64> = (0..n).map(|k| 2.0 * (2.0 * PI * 50.0 * k as f64 * dt).sin()).collect();

        let expected = 325.0 * 2.0 / 2.0;
        let simpson = PowerEstimator::new(QuadratureMethod::Simpson).estimate(&v, &i, dt).unwrap();
        let trapezoid = PowerEstimator::new(QuadratureMethod::Trapezoidal).estimate(&v, &i, dt).unwrap();

        assert!((simpson.watts - expected).abs() < 1e-3);
        assert!((trapezoid.watts - expected).abs() < 1e-3);
        assert_eq!(simpson.method, QuadratureMethod::Simpson);
    }

    #[test]
    fn quadrature_current_gives_no_active_power() {
        let n = 401;
        let dt = 1.0 / 50.0 / (n - 1) as f64;
        let v: Vec<f64> = (0..n).map(|k| (2.0 * PI * 50.0 * k as f64 * dt).sin()).collect();
        let i: Vec<f64> = (0..n).map(|k| (2.0 * PI * 50.0 * k as f64 * dt).cos()).collect();

        let power = calculate_real_power_simpson(&v, &i, dt).unwrap();
        assert!(power.abs() < 1e-9);
    }

    #[test]
    fn too_few_samples_is_invalid_input() {
        assert!(matches!(
            calculate_real_power_trapezoidal(&[1.0], &[1.0, 2.0], 0.001),
            Err(InsightError::InvalidInput(_))
        ));
        assert!(matches!(
            calculate_real_power_simpson(&[], &[], 0.001),
            Err(InsightError::InvalidInput(_))
        ));
        assert!(calculate_real_power_trapezoidal(&[1.0, 1.0], &[1.0, 1.0], 0.0).is_err());
    }
}
