use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use super::decoder::FrameDecoder;
use super::error::Result;
use super::types::{DecodeRequest, DecodeResponse};

/// Handle to the decode thread.
///
/// The thread owns the `FrameDecoder`; the only way in is a `DecodeRequest`
/// and the only way out is one `DecodeResponse` per request.
pub struct DecodeWorker {
    requests: Option<Sender<DecodeRequest>>,
    handle: Option<JoinHandle<()>>,
}

impl DecodeWorker {
    pub fn spawn(headers: &[u8], responses: Sender<DecodeResponse>) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<DecodeRequest>();
        let decoder = FrameDecoder::new(headers);

        let handle = thread::Builder::new()
            .name("decode-worker".to_string())
            .spawn(move || run_decoder(decoder, rx, responses))?;

        Ok(Self {
            requests: Some(tx),
            handle: Some(handle),
        })
    }

    /// Sender to hand to the producer side.
    pub fn requests(&self) -> Option<Sender<DecodeRequest>> {
        self.requests.clone()
    }

    /// Closes the request channel and waits for the thread to drain it.
    ///
    /// Returns once every clone of the request sender is gone.
    pub fn shutdown(mut self) -> bool {
        self.requests.take();
        match self.handle.take() {
            Some(handle) => handle.join().is_ok(),
            None => true,
        }
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        self.requests.take();
    }
}

fn run_decoder(mut decoder: FrameDecoder, requests: Receiver<DecodeRequest>, responses: Sender<DecodeResponse>) {
    log::debug!("Decode worker started for headers {:02X?}", decoder.headers());

    for request in requests {
        let samples = decoder.decode(&request.serial_data);
        log::trace!(
            "Decoded {} samples from {} bytes",
            samples.total_samples(),
            request.serial_data.len()
        );

        let response = DecodeResponse {
            voltages: samples.to_voltages(request.reference_voltage, request.adc_resolution),
            reference_voltage: request.reference_voltage,
            adc_resolution: request.adc_resolution,
            decoded_at: Instant::now(),
        };

        if responses.send(response).is_err() {
            // Measurement side is gone; nothing left to decode for
            log::debug!("Decode result discarded after teardown");
            break;
        }
    }

    log::debug!("Decode worker stopped");
}
