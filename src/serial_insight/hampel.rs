//! Hampel outlier filter: replaces samples that stray too far from the local
//! median, using the median absolute deviation (MAD) as the spread estimate.

use super::error::{InsightError, Result};
use super::types::{HAMPEL_HALF_WINDOW, HAMPEL_N_SIGMAS};

/// Gaussian consistency constant turning MAD into a standard deviation estimate.
const MAD_SCALE: f64 = 1.4826;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HampelFilter {
    half_window: usize, // Window is 2 * half_window + 1 samples
    n_sigmas: f64,
}

impl Default for HampelFilter {
    fn default() -> Self {
        Self {
            half_window: HAMPEL_HALF_WINDOW,
            n_sigmas: HAMPEL_N_SIGMAS,
        }
    }
}

impl HampelFilter {
    pub fn new(half_window: usize, n_sigmas: f64) -> Result<Self> {
        if !(n_sigmas > 0.0) {
            return Err(InsightError::InvalidInput(format!(
                "n_sigmas must be greater than 0, got {}",
                n_sigmas
            )));
        }

        Ok(Self {
            half_window,
            n_sigmas,
        })
    }

    pub fn window_len(&self) -> usize {
        2 * self.half_window + 1
    }

    /// Consumes `data` and returns it with outliers replaced by their window median.
    ///
    /// Samples are corrected left to right in place, so a window that overlaps an
    /// already corrected sample sees the corrected value. The first and last
    /// `half_window` samples are never modified. A sequence shorter than one
    /// window is returned unchanged.
    pub fn apply(&self, mut data: Vec<f64>) -> Vec<f64> {
        let w = self.half_window;
        if self.window_len() > data.len() {
            return data;
        }

        let mut window: Vec<f64> = Vec::with_capacity(self.window_len());
        let mut replaced: usize = 0;

        for i in w..data.len() - w {
            window.clear();
            window.extend_from_slice(&data[i - w..=i + w]);

            let m = median(&mut window);
            let threshold = MAD_SCALE * median_absolute_deviation(&mut window, m) * self.n_sigmas;

            if (data[i] - m).abs() > threshold {
                data[i] = m;
                replaced += 1;
            }
        }

        if replaced > 0 {
            log::debug!("Hampel filter replaced {} of {} samples", replaced, data.len());
        }

        data
    }
}

/*
* @brief Median of a collection, sorting it in place.
* @param values Values to inspect, reordered on return
* @return Middle value for odd lengths, mean of the two central values for even lengths
* @note Returns NaN for an empty collection.
*/
pub fn median(values: &mut [f64]) -> f64 {
    match values.len() {
        0 => f64::NAN,
        1 => values[0],
        len => {
            values.sort_by(f64::total_cmp);
            if len % 2 == 0 {
                (values[len / 2 - 1] + values[len / 2]) * 0.5
            } else {
                values[len / 2]
            }
        }
    }
}

/*
* @brief Median of the absolute deviations from `center`.
* @note Overwrites `values` with the deviations.
*/
fn median_absolute_deviation(values: &mut [f64], center: f64) -> f64 {
    for value in values.iter_mut() {
        *value = (*value - center).abs();
    }
    median(values)
}
