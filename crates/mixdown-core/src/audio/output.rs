//! Adapter from 128-frame chunks to host-sized callback buffers
//!
//! Host callbacks ask for whatever frame count the driver negotiated. The
//! [`ChunkReader`] keeps the chunk it is currently draining and pops the
//! next one from the [`AudioBuffer`] only when it runs out. A failed pop
//! (underflow) is replaced by one chunk of silence; the buffer has already
//! counted it.
//!
//! Never blocks and never allocates, so it is safe inside a real-time
//! callback.

use crate::engine::AudioBuffer;
use crate::types::{AudioChunk, CHUNK_SAMPLES};
use std::sync::Arc;

pub struct ChunkReader {
    buffer: Arc<AudioBuffer>,
    current: AudioChunk,
    /// Next frame of `current` to hand out
    cursor: usize,
}

impl ChunkReader {
    pub fn new(buffer: Arc<AudioBuffer>) -> Self {
        Self {
            buffer,
            current: AudioChunk::silence(),
            cursor: CHUNK_SAMPLES,
        }
    }

    fn next_frame(&mut self) -> (f32, f32) {
        if self.cursor == CHUNK_SAMPLES {
            if !self.buffer.pop(&mut self.current) {
                self.current.clear();
            }
            self.cursor = 0;
        }
        let frame = (self.current.left[self.cursor], self.current.right[self.cursor]);
        self.cursor += 1;
        frame
    }

    /// Fill an interleaved buffer of `channels` channels
    ///
    /// Left and right go to the first two channels, any further channels get
    /// silence. A mono device receives only the left channel.
    pub fn fill_interleaved(&mut self, data: &mut [f32], channels: usize) {
        if channels == 0 {
            return;
        }
        for frame in data.chunks_mut(channels) {
            let (left, right) = self.next_frame();
            frame[0] = left;
            if let Some(slot) = frame.get_mut(1) {
                *slot = right;
            }
            for extra in frame.iter_mut().skip(2) {
                *extra = 0.0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(left: f32, right: f32) -> AudioChunk {
        AudioChunk {
            left: [left; CHUNK_SAMPLES],
            right: [right; CHUNK_SAMPLES],
        }
    }

    #[test]
    fn test_small_callbacks_drain_one_chunk_in_pieces() {
        let buffer = Arc::new(AudioBuffer::new(1024));
        buffer.push(&chunk(0.25, -0.25));
        buffer.push(&chunk(0.5, -0.5));
        let mut reader = ChunkReader::new(Arc::clone(&buffer));

        // 100 stereo frames, twice: crosses the first chunk boundary
        let mut data = vec![0.0; 200];
        reader.fill_interleaved(&mut data, 2);
        assert!(data.chunks(2).all(|f| f == [0.25, -0.25]));

        reader.fill_interleaved(&mut data, 2);
        assert!(data[..56].chunks(2).all(|f| f == [0.25, -0.25]));
        assert!(data[56..].chunks(2).all(|f| f == [0.5, -0.5]));
        assert_eq!(buffer.underflow_count(), 0);
    }

    #[test]
    fn test_underflow_plays_silence() {
        let buffer = Arc::new(AudioBuffer::new(1024));
        let mut reader = ChunkReader::new(Arc::clone(&buffer));

        let mut data = vec![1.0; 512];
        reader.fill_interleaved(&mut data, 2);
        assert!(data.iter().all(|&s| s == 0.0));
        assert_eq!(buffer.underflow_count(), 2);
    }

    #[test]
    fn test_extra_channels_are_silent() {
        let buffer = Arc::new(AudioBuffer::new(1024));
        buffer.push(&chunk(0.1, 0.2));
        let mut reader = ChunkReader::new(buffer);

        let mut data = vec![9.0; 16];
        reader.fill_interleaved(&mut data, 4);
        assert!(data.chunks(4).all(|f| f == [0.1, 0.2, 0.0, 0.0]));
    }

    #[test]
    fn test_mono_gets_left_channel() {
        let buffer = Arc::new(AudioBuffer::new(1024));
        buffer.push(&chunk(0.3, 0.7));
        let mut reader = ChunkReader::new(buffer);

        let mut data = vec![0.0; 8];
        reader.fill_interleaved(&mut data, 1);
        assert!(data.iter().all(|&s| s == 0.3));
    }
}
