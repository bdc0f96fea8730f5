use std::collections::VecDeque;
use std::time::Duration;

use super::error::{InsightError, Result};

/// Byte source feeding the pipeline.
///
/// `read` returns `Ok(0)` when nothing arrived within the transport's read
/// timeout; the caller polls again.
pub trait Transport: Send {
    fn name(&self) -> String;
    fn open(&mut self) -> Result<()>;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn close(&mut self) -> Result<()>;
}

/// Gathers transport bytes until at least `chunk_size` are buffered.
#[derive(Debug, Clone)]
pub struct ChunkAccumulator {
    buffer: Vec<u8>,
    chunk_size: usize,
}

impl ChunkAccumulator {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(chunk_size * 2),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Appends `bytes`; hands back the whole buffer once it is large enough.
    pub fn push(&mut self, bytes: &[u8]) -> Option<Vec<u8>> {
        self.buffer.extend_from_slice(bytes);
        if self.buffer.len() >= self.chunk_size {
            Some(std::mem::replace(&mut self.buffer, Vec::with_capacity(self.chunk_size * 2)))
        } else {
            None
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// Plays back a fixed sequence of byte chunks, then reports no data.
#[derive(Debug, Clone, Default)]
pub struct ReplayTransport {
    chunks: VecDeque<Vec<u8>>,
    idle: Duration,
    open: bool,
}

impl ReplayTransport {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks: chunks.into(),
            idle: Duration::from_millis(5),
            open: false,
        }
    }

    pub fn from_bytes(data: &[u8], chunk_size: usize) -> Self {
        Self::new(data.chunks(chunk_size.max(1)).map(<[u8]>::to_vec).collect())
    }

    pub fn remaining(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }
}

impl Transport for ReplayTransport {
    fn name(&self) -> String {
        "replay".to_string()
    }

    fn open(&mut self) -> Result<()> {
        self.open = true;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.open {
            return Err(InsightError::Transport("replay transport is closed".to_string()));
        }

        let Some(mut chunk) = self.chunks.pop_front() else {
            std::thread::sleep(self.idle);
            return Ok(0);
        };

        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            chunk.drain(..n);
            self.chunks.push_front(chunk);
        }

        Ok(n)
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        log::debug!("Replay closed with {} bytes unread", self.remaining());
        Ok(())
    }
}

#[cfg(feature = "serial")]
pub use serial::{list_ports, SerialTransport};

#[cfg(feature = "serial")]
mod serial {
    use std::io::{ErrorKind, Read};
    use std::time::Duration;

    use serialport::SerialPort;

    use super::Transport;
    use crate::serial_insight::error::{InsightError, Result};

    const READ_TIMEOUT: Duration = Duration::from_millis(100);

    /// Paths of the serial ports present on this machine.
    pub fn list_ports() -> Result<Vec<String>> {
        let ports = serialport::available_ports()?;
        Ok(ports.into_iter().map(|port| port.port_name).collect())
    }

    pub struct SerialTransport {
        path: String,
        baud_rate: u32,
        port: Option<Box<dyn SerialPort>>,
    }

    impl SerialTransport {
        pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
            Self {
                path: path.into(),
                baud_rate,
                port: None,
            }
        }
    }

    impl Transport for SerialTransport {
        fn name(&self) -> String {
            format!("{} @ {} baud", self.path, self.baud_rate)
        }

        fn open(&mut self) -> Result<()> {
            let port = serialport::new(&self.path, self.baud_rate)
                .timeout(READ_TIMEOUT)
                .open()?;
            self.port = Some(port);
            log::info!("Connected to port {}", self.path);
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            let port = self
                .port
                .as_mut()
                .ok_or_else(|| InsightError::Transport(format!("port {} is not open", self.path)))?;

            match port.read(buf) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == ErrorKind::TimedOut => Ok(0),
                Err(e) => Err(InsightError::Transport(format!("read from {} failed: {}", self.path, e))),
            }
        }

        fn close(&mut self) -> Result<()> {
            match self.port.take() {
                Some(_) => {
                    log::info!("Disconnected from port {}", self.path);
                    Ok(())
                }
                None => Err(InsightError::Transport(format!("port {} is not open", self.path))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_releases_at_threshold() {
        let mut acc = ChunkAccumulator::new(4);
        assert!(acc.push(&[1, 2]).is_none());
        assert_eq!(acc.buffered(), 2);

        let chunk = acc.push(&[3, 4, 5]).unwrap();
        assert_eq!(chunk, vec![1, 2, 3, 4, 5]);
        assert_eq!(acc.buffered(), 0);
    }

    #[test]
    fn replay_splits_chunks_larger_than_buffer() {
        let mut transport = ReplayTransport::new(vec![vec![1, 2, 3, 4, 5]]);
        let mut buf = [0u8; 2];

        assert!(transport.read(&mut buf).is_err());
        transport.open().unwrap();

        assert_eq!(transport.read(&mut buf).unwrap(), 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(transport.remaining(), 3);
        assert_eq!(transport.read(&mut buf).unwrap(), 2);
        assert_eq!(transport.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 5);
        assert_eq!(transport.read(&mut buf).unwrap(), 0);
    }
}
