use super::signal::SignalType;
use super::types::{CalibratedSeries, FlushReport, Measurement};

/*
* @brief Print the extremes of a calibrated series.
* @param signal_type Channel kind, selects the unit
* @param series Calibrated series
*/
fn print_series(signal_type: SignalType, series: &CalibratedSeries) {
    let unit = signal_type.unit();
    log::info!("{:?}:", signal_type);
    log::info!("  Samples: {}", series.len());
    log::info!("  Min: {:.3} {}", series.min, unit);
    log::info!("  Max: {:.3} {}", series.max, unit);
}

/*
* @brief Print the power data.
* @param data Measurement of one tick
* @note The quadrature method is part of the report, results differ between methods on short windows.
*/
pub fn print_power(data: &Measurement) {
    log::info!("Power:");
    log::info!("  Active: {:.3} W ({})", data.power.watts, data.power.method);
    if let Some(sps) = data.samples_per_second {
        log::info!("  Rate: {:.1} samples/s\n", sps);
    }
}

/*
* @brief Print everything measured in one tick.
* @param data Measurement of one tick
*/
pub fn print_measurement(data: &Measurement) {
    print_series(SignalType::Voltage, &data.voltage);
    print_series(SignalType::Current, &data.current);
    print_power(data);
}

pub fn print_flush(report: &FlushReport) {
    log::info!("Saved file {} with {} records.", report.artifact, report.entries);
}
