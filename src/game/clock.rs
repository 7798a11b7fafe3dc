/// Watermark value before the first tick of a round
pub const BEAT_SENTINEL: i32 = -100;

pub fn beat_from_time(time: f32, bpm: f32, gap: f32) -> f32 {
    bpm / 60.0 * (time - gap)
}

pub fn time_from_beats(beats: f32, bpm: f32) -> f32 {
    if bpm > 0.0 {
        beats / bpm * 60.0
    } else {
        0.0
    }
}

/// Beat positions derived from one performance time
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BeatTick {
    /// Fractional beat for display
    pub display_beat: f32,
    pub current_beat: i32,
    /// Latency-compensated beat, shifted half a beat back
    pub mid_beat: f32,
    /// Integer beat handed to the scorer
    pub scoring_beat: i32,
}

pub struct BeatClock {
    bpm: f32,
    gap: f32,
    mic_delay: f32,
    last_beat: f32,
}

impl BeatClock {
    /// `mic_delay` is the microphone latency in seconds
    pub fn new(bpm: f32, gap: f32, mic_delay: f32) -> Self {
        Self {
            bpm,
            gap,
            mic_delay,
            last_beat: BEAT_SENTINEL as f32,
        }
    }

    pub fn tick_at(&self, time: f32) -> BeatTick {
        let display_beat = beat_from_time(time, self.bpm, self.gap);
        let mid_beat = -0.5 + beat_from_time(time, self.bpm, self.gap + self.mic_delay);
        BeatTick {
            display_beat,
            current_beat: display_beat.floor() as i32,
            mid_beat,
            scoring_beat: mid_beat.floor() as i32,
        }
    }

    /// Advance to `time`. Returns `None` unless the display beat moved forward.
    pub fn advance(&mut self, time: f32) -> Option<BeatTick> {
        let tick = self.tick_at(time);
        if tick.display_beat <= self.last_beat {
            return None;
        }
        self.last_beat = tick.display_beat;
        Some(tick)
    }

    pub fn reset(&mut self) {
        self.last_beat = BEAT_SENTINEL as f32;
    }
}
