use super::buffer::SampleAnalysisBuffer;

/// Lowest analyzed tone (C2)
pub const BASE_TONE_FREQ: f64 = 65.4064;
/// 2^(1/12): one halftone step
pub const HALFTONE_BASE: f64 = 1.059_463_094_36;
/// C2 up to A#5
pub const NUM_HALF_TONES: usize = 47;
pub const DEFAULT_VOLUME_THRESHOLD: f32 = 0.2;

/// Result of one analysis pass.
///
/// When `valid` is false the tone fields are left over from an earlier pass
/// and must not be scored or shown as a confident pitch.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ToneEstimate {
    pub absolute_tone: usize,
    pub tone_class: usize,
    pub valid: bool,
    pub max_volume: f32,
}

pub fn frequency_of_tone(tone: usize) -> f64 {
    BASE_TONE_FREQ * HALFTONE_BASE.powi(tone as i32)
}

/// Peak level over the first quarter of the window, normalized to 0.0-1.0
pub fn peak_volume(window: &[i16]) -> f32 {
    let peak = window[..window.len() / 4]
        .iter()
        .map(|&s| (s as i32).abs())
        .max()
        .unwrap_or(0);
    (peak as f32 / i16::MAX as f32).min(1.0)
}

/// Periodicity weight of `window` at the given lag (1.0 = identical periods)
fn weight_at_lag(window: &[i16], lag: usize) -> f32 {
    if lag == 0 || lag >= window.len() {
        return 0.0;
    }
    let overlap = window.len() - lag;
    let accum: f64 = window[..overlap]
        .iter()
        .zip(&window[lag..])
        .map(|(&a, &b)| (a as f64 - b as f64).abs() / 32768.0)
        .sum();
    (1.0 - accum / overlap as f64) as f32
}

pub struct PitchEstimator {
    samples_per_period: Vec<usize>,
    volume_threshold: f32,
    window: Vec<i16>,
    estimate: ToneEstimate,
}

impl PitchEstimator {
    pub fn new(sample_rate: u32, volume_threshold: f32) -> Self {
        let samples_per_period = (0..NUM_HALF_TONES)
            .map(|t| (sample_rate as f64 / frequency_of_tone(t)).round() as usize)
            .collect();
        Self {
            samples_per_period,
            volume_threshold,
            window: Vec::new(),
            estimate: ToneEstimate::default(),
        }
    }

    /// Re-run analysis if `buffer` received samples since the last pass,
    /// otherwise return the cached estimate.
    pub fn analyze(&mut self, buffer: &SampleAnalysisBuffer) -> ToneEstimate {
        if buffer.take_pending(&mut self.window) {
            let window = std::mem::take(&mut self.window);
            self.analyze_window(&window);
            self.window = window;
        }
        self.estimate
    }

    /// Analyze one complete window and update the cached estimate.
    pub fn analyze_window(&mut self, window: &[i16]) -> ToneEstimate {
        let max_volume = peak_volume(window);
        self.estimate.max_volume = max_volume;

        if max_volume < self.volume_threshold {
            self.estimate.valid = false;
            return self.estimate;
        }

        let mut best_tone = 0;
        let mut best_weight = f32::NEG_INFINITY;
        for (tone, &lag) in self.samples_per_period.iter().enumerate() {
            let weight = weight_at_lag(window, lag);
            // strict comparison: lowest tone wins ties
            if weight > best_weight {
                best_weight = weight;
                best_tone = tone;
            }
        }

        self.estimate.absolute_tone = best_tone;
        self.estimate.tone_class = best_tone % 12;
        self.estimate.valid = true;
        self.estimate
    }

    /// Forget the cached estimate at round start
    pub fn reset(&mut self) {
        self.estimate = ToneEstimate::default();
    }
}
