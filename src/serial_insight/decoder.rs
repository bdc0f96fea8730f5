use super::types::{ChannelSampleSet, FRAME_LENGTH};

/// Reassembles `[header][low][high]` frames from an arbitrarily chunked byte stream.
///
/// The decoder keeps at most the tail of one incomplete frame between calls, so
/// feeding a stream in any partition yields the same codes as feeding it whole.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    headers: Vec<u8>,
    lookup: [Option<usize>; 256], // header byte -> channel index
    pending: Vec<u8>,             // Partial frame carried over to the next chunk
}

impl FrameDecoder {
    pub fn new(headers: &[u8]) -> Self {
        let mut lookup = [None; 256];
        for (index, &header) in headers.iter().enumerate() {
            if lookup[header as usize].is_none() {
                lookup[header as usize] = Some(index);
            }
        }

        Self {
            headers: headers.to_vec(),
            lookup,
            pending: Vec::with_capacity(FRAME_LENGTH),
        }
    }

    pub fn headers(&self) -> &[u8] {
        &self.headers
    }

    pub fn channel_count(&self) -> usize {
        self.headers.len()
    }

    /// Bytes retained from the previous chunk.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }

    fn channel_of(&self, byte: u8) -> Option<usize> {
        self.lookup[byte as usize]
    }

    /// Decodes every complete frame found in `pending + chunk`.
    ///
    /// Bytes that are not headers are skipped. A header too close to the end of
    /// the buffer is kept, with whatever follows it, for the next call.
    pub fn decode(&mut self, chunk: &[u8]) -> ChannelSampleSet {
        let mut samples = ChannelSampleSet::with_channels(self.channel_count());

        let mut buffer = std::mem::take(&mut self.pending);
        buffer.extend_from_slice(chunk);

        let mut skipped: usize = 0;
        let mut i: usize = 0;

        while i < buffer.len() {
            let channel = match self.channel_of(buffer[i]) {
                Some(channel) => channel,
                None => {
                    skipped += 1;
                    i += 1;
                    continue;
                }
            };

            if i + FRAME_LENGTH > buffer.len() {
                // Frame truncated by the end of the chunk
                self.pending.extend_from_slice(&buffer[i..]);
                break;
            }

            let code = u16::from(buffer[i + 1]) | (u16::from(buffer[i + 2]) << 8);
            samples.channels[channel].push(code);
            i += FRAME_LENGTH;
        }

        if skipped > 0 {
            log::trace!("Skipped {} unaligned bytes", skipped);
        }
        debug_assert!(self.pending.len() < FRAME_LENGTH);

        samples
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(&super::types::DEFAULT_FRAME_HEADERS)
    }
}
