pub mod config;
pub mod decoder;
pub mod error;
pub mod generate_signal;
pub mod hampel;
pub mod pipeline;
pub mod power;
pub mod print;
pub mod processing;
pub mod recorder;
pub mod signal;
pub mod transport;
pub mod types;
mod worker;

pub use config::{PipelineConfig, DEFAULT_BAUD_RATE, DEFAULT_CHUNK_SIZE, DEFAULT_TICK_PERIOD_MS};
pub use decoder::FrameDecoder;
pub use error::{InsightError, Result};
pub use generate_signal::{encode_frame, generate_signals, voltage_to_code, SignalProfile, SimulatedTransport};
pub use hampel::HampelFilter;
pub use pipeline::Pipeline;
pub use power::{calculate_real_power_simpson, calculate_real_power_trapezoidal, PowerEstimator};
pub use processing::MeasurementContext;
pub use recorder::{BatchRecorder, RecorderConfig};
pub use signal::{Calibrator, SignalType};
pub use transport::{ChunkAccumulator, ReplayTransport, Transport};
#[cfg(feature = "serial")]
pub use transport::{list_ports, SerialTransport};
pub use types::*;
pub use worker::DecodeWorker;
