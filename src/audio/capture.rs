use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::buffer::SampleAnalysisBuffer;

/// De-interleave 16-bit PCM frames into one byte stream per channel.
///
/// Incomplete trailing frames are dropped.
pub fn split_channels(data: &[u8], channels: usize) -> Vec<Vec<u8>> {
    if channels == 0 {
        return Vec::new();
    }
    let frame_bytes = channels * 2;
    let frames = data.len() / frame_bytes;
    let mut out = vec![Vec::with_capacity(frames * 2); channels];
    for frame in data.chunks_exact(frame_bytes) {
        for (ch, sample) in frame.chunks_exact(2).enumerate() {
            out[ch].extend_from_slice(sample);
        }
    }
    out
}

/// Routes the channels of one capture device to player buffers.
pub struct CaptureRouter {
    channels: usize,
    routes: Vec<Option<Arc<SampleAnalysisBuffer>>>,
}

impl CaptureRouter {
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            routes: vec![None; channels],
        }
    }

    /// Map device `channel` to a player's buffer. Out-of-range channels are ignored.
    pub fn route(&mut self, channel: usize, buffer: Arc<SampleAnalysisBuffer>) {
        if let Some(slot) = self.routes.get_mut(channel) {
            *slot = Some(buffer);
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Feed one block of interleaved capture data
    pub fn push(&self, data: &[u8]) {
        if self.channels == 1 {
            if let Some(buffer) = &self.routes[0] {
                buffer.ingest(data);
            }
            return;
        }
        for (ch, samples) in split_channels(data, self.channels).iter().enumerate() {
            if let Some(buffer) = &self.routes[ch] {
                buffer.ingest(samples);
            }
        }
    }
}

/// Replay interleaved PCM into `router` at the pace a live device would
/// deliver it, `chunk_frames` frames at a time.
///
/// The thread exits early once `stop` is set.
pub fn spawn_capture(
    router: CaptureRouter,
    pcm: Vec<u8>,
    sample_rate: u32,
    chunk_frames: usize,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let chunk_bytes = chunk_frames.max(1) * router.channels().max(1) * 2;
        let start = Instant::now();
        let mut frames_sent = 0usize;
        for chunk in pcm.chunks(chunk_bytes) {
            if stop.load(Ordering::Relaxed) {
                log::debug!("Capture replay stopped after {} frames", frames_sent);
                return;
            }
            router.push(chunk);
            frames_sent += chunk_frames;
            let due = Duration::from_secs_f64(frames_sent as f64 / sample_rate.max(1) as f64);
            if let Some(wait) = due.checked_sub(start.elapsed()) {
                std::thread::sleep(wait);
            }
        }
        log::debug!("Capture replay finished after {:.1}s", start.elapsed().as_secs_f32());
    })
}
