use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default analysis window length in samples (~93ms at 44.1kHz)
pub const DEFAULT_WINDOW_SIZE: usize = 4096;

struct Window {
    samples: Vec<i16>,
    pending: bool,
    peak: i32,
}

/// Sliding window of the most recent mono samples for one player.
///
/// Written by a capture thread, read by the game tick. Both sides go through
/// the same lock, so a window is never observed half-shifted.
pub struct SampleAnalysisBuffer {
    window: Mutex<Window>,
    len: usize,
}

impl SampleAnalysisBuffer {
    pub fn new(len: usize) -> Self {
        Self {
            window: Mutex::new(Window {
                samples: vec![0; len],
                pending: false,
                peak: 0,
            }),
            len,
        }
    }

    /// Append a chunk of little-endian 16-bit PCM.
    ///
    /// A trailing odd byte is dropped. Chunks longer than the window only
    /// keep their newest `len` samples.
    pub fn ingest(&self, raw: &[u8]) {
        let incoming: Vec<i16> = raw
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        if incoming.is_empty() || self.len == 0 {
            return;
        }

        let newest = &incoming[incoming.len().saturating_sub(self.len)..];
        let chunk_peak = newest.iter().map(|&s| (s as i32).abs()).max().unwrap_or(0);

        let mut window = self.lock();
        let n = newest.len();
        window.samples.copy_within(n.., 0);
        let tail = self.len - n;
        window.samples[tail..].copy_from_slice(newest);
        window.pending = true;
        window.peak = window.peak.max(chunk_peak);
    }

    /// Copy the window into `out` if new samples arrived since the last call.
    ///
    /// Clears the pending flag and the running peak. Returns `false` and
    /// leaves `out` untouched when nothing is pending.
    pub fn take_pending(&self, out: &mut Vec<i16>) -> bool {
        let mut window = self.lock();
        if !window.pending {
            return false;
        }
        out.clear();
        out.extend_from_slice(&window.samples);
        window.pending = false;
        window.peak = 0;
        true
    }

    /// Peak level of the samples ingested since the last analysis (0.0-1.0)
    pub fn peak(&self) -> f32 {
        (self.lock().peak as f32 / i16::MAX as f32).min(1.0)
    }

    pub fn reset(&self) {
        let mut window = self.lock();
        window.samples.iter_mut().for_each(|s| *s = 0);
        window.pending = false;
        window.peak = 0;
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Encode samples as little-endian 16-bit PCM bytes
pub fn to_pcm_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn snapshot(buffer: &SampleAnalysisBuffer) -> Vec<i16> {
        let mut out = Vec::new();
        assert!(buffer.take_pending(&mut out));
        out
    }

    #[test]
    fn slides_left_and_appends_at_tail() {
        let buffer = SampleAnalysisBuffer::new(4);
        buffer.ingest(&to_pcm_bytes(&[1, 2]));
        assert_eq!(snapshot(&buffer), vec![0, 0, 1, 2]);

        buffer.ingest(&to_pcm_bytes(&[3, 4, 5]));
        assert_eq!(snapshot(&buffer), vec![2, 3, 4, 5]);
    }

    #[test]
    fn oversized_chunk_keeps_newest_samples() {
        let buffer = SampleAnalysisBuffer::new(3);
        buffer.ingest(&to_pcm_bytes(&[1, 2, 3, 4, 5, 6]));
        assert_eq!(snapshot(&buffer), vec![4, 5, 6]);
    }

    #[test]
    fn odd_trailing_byte_is_dropped() {
        let buffer = SampleAnalysisBuffer::new(2);
        let mut bytes = to_pcm_bytes(&[-2]);
        bytes.push(0x7f);
        buffer.ingest(&bytes);
        assert_eq!(snapshot(&buffer), vec![0, -2]);

        buffer.ingest(&[0x01]);
        assert!(!buffer.take_pending(&mut Vec::new()));
    }

    #[test]
    fn pending_flag_is_consumed_once() {
        let buffer = SampleAnalysisBuffer::new(2);
        let mut out = vec![9, 9];
        assert!(!buffer.take_pending(&mut out));
        assert_eq!(out, vec![9, 9]);

        buffer.ingest(&to_pcm_bytes(&[7]));
        assert!(buffer.take_pending(&mut out));
        assert!(!buffer.take_pending(&mut out));
        assert_eq!(out, vec![0, 7]);
    }

    #[test]
    fn peak_tracks_loudest_sample_until_taken() {
        let buffer = SampleAnalysisBuffer::new(8);
        buffer.ingest(&to_pcm_bytes(&[100, -16384]));
        buffer.ingest(&to_pcm_bytes(&[50]));
        assert!((buffer.peak() - 16384.0 / 32767.0).abs() < 1e-4);

        let mut out = Vec::new();
        buffer.take_pending(&mut out);
        assert_eq!(buffer.peak(), 0.0);
    }

    #[test]
    fn reset_zeroes_window() {
        let buffer = SampleAnalysisBuffer::new(2);
        buffer.ingest(&to_pcm_bytes(&[5, 6]));
        buffer.reset();
        assert!(!buffer.take_pending(&mut Vec::new()));
        buffer.ingest(&to_pcm_bytes(&[1]));
        assert_eq!(snapshot(&buffer), vec![0, 1]);
    }

    #[test]
    fn zero_length_window_ignores_input() {
        let buffer = SampleAnalysisBuffer::new(0);
        buffer.ingest(&to_pcm_bytes(&[1, 2, 3]));
        let mut out = Vec::new();
        assert!(!buffer.take_pending(&mut out));
    }

    #[test]
    fn concurrent_ingest_never_tears_window() {
        // Every chunk is a run of one value; a torn copy would mix values
        // within what should be a uniform window.
        let buffer = Arc::new(SampleAnalysisBuffer::new(256));
        let producer = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || {
                for v in 1..=500i16 {
                    buffer.ingest(&to_pcm_bytes(&[v; 256]));
                }
            })
        };

        let mut out = Vec::new();
        for _ in 0..500 {
            if buffer.take_pending(&mut out) {
                assert!(out.iter().all(|&s| s == out[0]));
            }
        }
        producer.join().unwrap();
    }
}
