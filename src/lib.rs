//! Serial acquisition of framed ADC samples: decoding, calibration, active
//! power integration and batched recording.

pub mod serial_insight;

pub use serial_insight::*;
