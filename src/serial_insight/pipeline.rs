use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::config::{validate_calibration, PipelineConfig};
use super::error::{InsightError, Result};
use super::processing::MeasurementContext;
use super::transport::{ChunkAccumulator, Transport};
use super::types::{CalibrationConfig, DecodeRequest, DecodeResponse, PipelineEvent};
use super::worker::DecodeWorker;

const READ_BUFFER_SIZE: usize = 1024;
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Threads and channels of one connection.
struct Session {
    transport_name: String,
    reader_stop: Sender<()>,
    reader_calibration: Sender<CalibrationConfig>,
    reader: JoinHandle<Box<dyn Transport>>,
    ticker_stop: Sender<()>,
    ticker_calibration: Sender<CalibrationConfig>,
    ticker: JoinHandle<MeasurementContext>,
    worker: DecodeWorker,
}

/// Acquisition pipeline: transport reader, decode worker and measurement tick.
///
/// Reader thread -> `DecodeRequest` -> decode worker -> `DecodeResponse` ->
/// tick thread -> `PipelineEvent`. Only the most recent decode result is
/// measured on each tick.
pub struct Pipeline {
    config: PipelineConfig,
    events: Sender<PipelineEvent>,
    idle_context: Option<MeasurementContext>,
    session: Option<Session>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<(Self, Receiver<PipelineEvent>)> {
        config.validate()?;
        let context = MeasurementContext::new(&config)?;
        let (events, receiver) = mpsc::channel();

        Ok((
            Self {
                config,
                events,
                idle_context: Some(context),
                session: None,
            },
            receiver,
        ))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Measurement state while disconnected; `None` while a session owns it.
    pub fn context(&self) -> Option<&MeasurementContext> {
        self.idle_context.as_ref()
    }

    /*
    * @brief Open `transport` and start reader, decode worker and tick threads.
    * @param transport Byte source, owned by the reader thread until disconnect
    * @return false when already connected or the transport cannot be opened
    */
    pub fn connect(&mut self, mut transport: Box<dyn Transport>) -> bool {
        if let Some(session) = &self.session {
            log::warn!("Already connected to {}", session.transport_name);
            return false;
        }

        let name = transport.name();
        if let Err(e) = transport.open() {
            log::error!("Failed to open {}: {}", name, e);
            return false;
        }

        match self.start_session(transport, name.clone()) {
            Ok(session) => {
                log::info!("Pipeline connected to {}", name);
                self.session = Some(session);
                true
            }
            Err(e) => {
                log::error!("Failed to start pipeline for {}: {}", name, e);
                false
            }
        }
    }

    fn start_session(&mut self, transport: Box<dyn Transport>, transport_name: String) -> Result<Session> {
        let (response_tx, response_rx) = mpsc::channel::<DecodeResponse>();
        let worker = DecodeWorker::spawn(&self.config.frame_headers, response_tx)?;
        let requests = worker
            .requests()
            .ok_or_else(|| InsightError::Transport("decode worker is not accepting requests".to_string()))?;

        let context = match self.idle_context.take() {
            Some(context) => context,
            None => MeasurementContext::new(&self.config)?,
        };

        let (reader_stop, reader_stop_rx) = mpsc::channel();
        let (reader_calibration, reader_calibration_rx) = mpsc::channel();
        let reader_state = ReaderState {
            accumulator: ChunkAccumulator::new(self.config.chunk_size),
            calibration: self.config.calibration.clone(),
            requests,
        };
        let reader = thread::Builder::new()
            .name("serial-reader".to_string())
            .spawn(move || run_reader(transport, reader_state, reader_stop_rx, reader_calibration_rx))?;

        let (ticker_stop, ticker_stop_rx) = mpsc::channel();
        let (ticker_calibration, ticker_calibration_rx) = mpsc::channel();
        let events = self.events.clone();
        let period = self.config.tick_period();
        let ticker = thread::Builder::new()
            .name("measurement-tick".to_string())
            .spawn(move || run_ticker(context, period, response_rx, events, ticker_stop_rx, ticker_calibration_rx));

        let ticker = match ticker {
            Ok(handle) => handle,
            Err(e) => {
                let _ = reader_stop.send(());
                if let Ok(mut transport) = reader.join() {
                    let _ = transport.close();
                }
                worker.shutdown();
                return Err(e.into());
            }
        };

        Ok(Session {
            transport_name,
            reader_stop,
            reader_calibration,
            reader,
            ticker_stop,
            ticker_calibration,
            ticker,
            worker,
        })
    }

    /*
    * @brief Stop the tick, close the transport and retire the decode worker.
    * @return false when not connected or when any part failed to stop cleanly
    * @note The recorder batch is kept for the next connection.
    */
    pub fn disconnect(&mut self) -> bool {
        let Some(session) = self.session.take() else {
            log::warn!("Disconnect requested while not connected");
            return false;
        };

        let mut clean = true;

        let _ = session.ticker_stop.send(());
        let _ = session.reader_stop.send(());

        // Late decode results are dropped by the worker once the tick is gone
        match session.ticker.join() {
            Ok(context) => self.idle_context = Some(context),
            Err(_) => {
                log::error!("Measurement tick thread panicked, recorder batch lost");
                clean = false;
            }
        }

        match session.reader.join() {
            Ok(mut transport) => {
                if let Err(e) = transport.close() {
                    log::error!("Failed to close {}: {}", session.transport_name, e);
                    clean = false;
                }
            }
            Err(_) => {
                log::error!("Reader thread for {} panicked", session.transport_name);
                clean = false;
            }
        }

        if !session.worker.shutdown() {
            log::error!("Decode worker panicked");
            clean = false;
        }

        log::info!("Pipeline disconnected from {}", session.transport_name);
        clean
    }

    /// Replaces the calibration used for new decode requests and measurements.
    pub fn update_calibration(&mut self, calibration: CalibrationConfig) -> Result<()> {
        validate_calibration(&calibration)?;
        self.config.calibration = calibration.clone();

        if let Some(context) = self.idle_context.as_mut() {
            context.set_calibration(calibration.clone());
        }
        if let Some(session) = &self.session {
            let _ = session.reader_calibration.send(calibration.clone());
            let _ = session.ticker_calibration.send(calibration);
        }

        log::info!("Calibration updated");
        Ok(())
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.session.is_some() {
            self.disconnect();
        }
    }
}

struct ReaderState {
    accumulator: ChunkAccumulator,
    calibration: CalibrationConfig,
    requests: Sender<DecodeRequest>,
}

/*
* @brief Reader loop: poll the transport, accumulate bytes, submit decode requests.
* @return The transport, so the owner can close it
*/
fn run_reader(
    mut transport: Box<dyn Transport>,
    mut state: ReaderState,
    stop: Receiver<()>,
    calibration: Receiver<CalibrationConfig>,
) -> Box<dyn Transport> {
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        match stop.try_recv() {
            Err(TryRecvError::Empty) => {}
            _ => break,
        }
        while let Ok(update) = calibration.try_recv() {
            state.calibration = update;
        }

        let n = match transport.read(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                log::error!("Read from {} failed: {}", transport.name(), e);
                thread::sleep(READ_ERROR_BACKOFF);
                continue;
            }
        };
        if n == 0 {
            continue;
        }

        if let Some(chunk) = state.accumulator.push(&buf[..n]) {
            let request = DecodeRequest {
                serial_data: chunk,
                reference_voltage: state.calibration.reference_voltage,
                adc_resolution: state.calibration.adc_resolution,
            };
            if state.requests.send(request).is_err() {
                match stop.try_recv() {
                    Err(TryRecvError::Empty) => log::error!("Error: Decode worker has dropped"),
                    _ => log::debug!("Chunk discarded during teardown"),
                }
                break;
            }
        }
    }

    log::debug!(
        "Reader for {} stopped with {} bytes buffered",
        transport.name(),
        state.accumulator.buffered()
    );
    transport
}

/*
* @brief Tick loop: every `period`, measure the newest decode result.
* @return The measurement context, recorder batch included
* @note Ticks without a new decode result are skipped.
*/
fn run_ticker(
    mut context: MeasurementContext,
    period: Duration,
    responses: Receiver<DecodeResponse>,
    events: Sender<PipelineEvent>,
    stop: Receiver<()>,
    calibration: Receiver<CalibrationConfig>,
) -> MeasurementContext {
    let mut deadline = Instant::now() + period;

    loop {
        match stop.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => break,
        }
        deadline += period;

        while let Ok(update) = calibration.try_recv() {
            context.set_calibration(update);
        }

        // Last write wins
        let mut latest = None;
        while let Ok(response) = responses.try_recv() {
            context.note_arrival(response.decoded_at);
            latest = Some(response);
        }

        let Some(response) = latest else {
            log::debug!("No new samples since last tick");
            continue;
        };

        for event in context.process(&response) {
            // Nobody listening is not an error
            let _ = events.send(event);
        }
    }

    context
}
