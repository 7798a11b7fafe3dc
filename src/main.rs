mod audio;
mod cli;
mod config;
mod error;
mod game;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use audio::buffer::SampleAnalysisBuffer;
use audio::capture::{spawn_capture, CaptureRouter};
use audio::decode::AudioData;
use audio::pitch::{PitchEstimator, ToneEstimate};
use cli::Cli;
use config::RecordConfig;
use game::clock::BeatClock;
use game::results::RoundResult;
use game::scoring::{GameMode, PlayerSetup, ScoringEngine, MAX_PLAYERS};

/// One recording feeding one or more player buffers
struct Source {
    router: CaptureRouter,
    pcm: Vec<u8>,
    sample_rate: u32,
    frames_sent: usize,
}

impl Source {
    fn new(audio: &AudioData, router: CaptureRouter) -> Self {
        Self {
            router,
            pcm: audio.to_pcm16(),
            sample_rate: audio.sample_rate,
            frames_sent: 0,
        }
    }

    fn frame_bytes(&self) -> usize {
        self.router.channels().max(1) * 2
    }

    fn total_frames(&self) -> usize {
        self.pcm.len() / self.frame_bytes()
    }

    fn duration(&self) -> f32 {
        self.total_frames() as f32 / self.sample_rate.max(1) as f32
    }

    /// Push everything recorded up to `time`, `chunk_frames` at a time
    fn feed_until(&mut self, time: f32, chunk_frames: usize) {
        let target = ((time * self.sample_rate as f32) as usize).min(self.total_frames());
        let frame_bytes = self.frame_bytes();
        while self.frames_sent < target {
            let end = (self.frames_sent + chunk_frames).min(target);
            self.router
                .push(&self.pcm[self.frames_sent * frame_bytes..end * frame_bytes]);
            self.frames_sent = end;
        }
    }
}

/// Return buffers, estimators, the beat clock and every player to their initial state
fn start_round(
    buffers: &[Arc<SampleAnalysisBuffer>],
    estimators: &mut [PitchEstimator],
    clock: &mut BeatClock,
    engine: &mut ScoringEngine,
) {
    for buffer in buffers {
        buffer.reset();
    }
    for estimator in estimators.iter_mut() {
        estimator.reset();
    }
    clock.reset();
    engine.reset();
}

/// Analyze each player's window and score the beats reached by `time`
fn tick(
    time: f32,
    buffers: &[Arc<SampleAnalysisBuffer>],
    estimators: &mut [PitchEstimator],
    clock: &mut BeatClock,
    engine: &mut ScoringEngine,
) {
    let tones: Vec<ToneEstimate> = estimators
        .par_iter_mut()
        .zip(buffers.par_iter())
        .map(|(estimator, buffer)| estimator.analyze(buffer))
        .collect();

    if let Some(beat) = clock.advance(time) {
        log::trace!(
            "t={:.3}s beat {} ({:.2}), mid {:.2}, scoring {}",
            time,
            beat.current_beat,
            beat.display_beat,
            beat.mid_beat,
            beat.scoring_beat
        );
        engine.update(beat.scoring_beat, &tones);
    }
}

/// Input level per player since the last analysis, for the progress line
fn level_meter(buffers: &[Arc<SampleAnalysisBuffer>]) -> String {
    buffers
        .iter()
        .map(|buffer| format!("{:>3.0}%", buffer.peak() * 100.0))
        .collect::<Vec<_>>()
        .join(" ")
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    let mut record = RecordConfig::default();
    if let Some(path) = config::find_config(cli.config.as_deref()) {
        if let Some(cfg) = config::load_config(&path) {
            log::info!("Loaded config from {}", path.display());
            // Merge: config values apply only when CLI is at its default
            if cli.mic_delay == config::default_mic_delay_ms() {
                cli.mic_delay = cfg.record.mic_delay_ms;
            }
            if cli.fps == 60 {
                cli.fps = cfg.game.tick_rate;
            }
            if cli.mode == GameMode::Normal {
                cli.mode = cfg.game.mode;
            }
            if cli.difficulty.is_empty() {
                cli.difficulty = cfg.game.difficulty;
            }
            record = cfg.record;
        } else {
            log::warn!("Failed to load config from {}", path.display());
        }
    }

    if cli.fps == 0 {
        anyhow::bail!("Tick rate must be at least 1 fps");
    }
    if cli.stereo && cli.voices.len() != 1 {
        anyhow::bail!("--stereo expects exactly one recording, got {}", cli.voices.len());
    }
    let mic_delay_ms = config::clamp_mic_delay(cli.mic_delay);

    log::info!("vocalscore - karaoke pitch scoring");
    log::info!("Song: {}", cli.song.display());
    log::info!("Mode: {:?}, mic delay {}ms, {} ticks/s", cli.mode, mic_delay_ms, cli.fps);

    // 1. Load song
    let mut song = game::ultrastar::load_song(&cli.song)?;
    log::info!("Song ends at beat {}", song.end_beat());
    match cli.mode {
        GameMode::Medley => {
            let Some(medley) = song.medley else {
                anyhow::bail!("Song has no medley section and no repeated refrain to use");
            };
            log::info!("Medley: beats {} to {}", medley.start_beat, medley.end_beat);
            song.apply_medley();
        }
        GameMode::ShortSong => match song.short_end {
            Some(beat) => log::info!("Short song ends at beat {}", beat),
            None => log::warn!("Song has no short end; playing to the end"),
        },
        GameMode::Normal => {}
    }
    let song = Arc::new(song);

    // 2. Decode recordings and wire them to player buffers
    log::info!("Decoding recordings...");
    let mut recordings = Vec::with_capacity(cli.voices.len());
    for path in &cli.voices {
        recordings.push(audio::decode::decode_audio(path)?);
    }

    let num_players = if cli.stereo { 2 } else { recordings.len() };
    if num_players > MAX_PLAYERS {
        anyhow::bail!("At most {} players are supported, got {}", MAX_PLAYERS, num_players);
    }

    let buffers: Vec<Arc<SampleAnalysisBuffer>> = (0..num_players)
        .map(|_| Arc::new(SampleAnalysisBuffer::new(record.window_size)))
        .collect();
    let mut estimators = Vec::with_capacity(num_players);
    let mut sources = Vec::with_capacity(recordings.len());

    if cli.stereo {
        let recording = recordings.remove(0);
        if recording.channels < 2 {
            anyhow::bail!("--stereo needs a recording with at least two channels");
        }
        let mut router = CaptureRouter::new(recording.channels);
        for (channel, buffer) in buffers.iter().enumerate() {
            router.route(channel, Arc::clone(buffer));
            estimators.push(PitchEstimator::new(recording.sample_rate, record.volume_threshold));
        }
        sources.push(Source::new(&recording, router));
    } else {
        for (recording, buffer) in recordings.into_iter().zip(&buffers) {
            let recording = recording.into_mono();
            let mut router = CaptureRouter::new(1);
            router.route(0, Arc::clone(buffer));
            estimators.push(PitchEstimator::new(recording.sample_rate, record.volume_threshold));
            sources.push(Source::new(&recording, router));
        }
    }

    let setups: Vec<PlayerSetup> = (0..num_players)
        .map(|i| PlayerSetup {
            voice: i % song.voices.len().max(1),
            difficulty: cli
                .difficulty
                .get(i)
                .or(cli.difficulty.last())
                .copied()
                .unwrap_or_default(),
        })
        .collect();
    for (i, setup) in setups.iter().enumerate() {
        log::info!("Player {}: voice P{}, {:?}", i + 1, setup.voice + 1, setup.difficulty);
    }

    // 3. Tick loop
    let duration = sources.iter().map(Source::duration).fold(0.0f32, f32::max);
    let total_ticks = (duration * cli.fps as f32).ceil() as u64;
    log::info!("Total ticks: {}, Duration: {:.1}s", total_ticks, duration);

    let mut clock = BeatClock::new(song.bpm, song.gap, mic_delay_ms as f32 / 1000.0);
    let mut engine = ScoringEngine::new(Arc::clone(&song), cli.mode, &setups);
    start_round(&buffers, &mut estimators, &mut clock, &mut engine);

    let stop = Arc::new(AtomicBool::new(false));
    let capture_threads: Vec<_> = if cli.realtime {
        sources
            .drain(..)
            .map(|s| {
                spawn_capture(s.router, s.pcm, s.sample_rate, record.chunk_size, Arc::clone(&stop))
            })
            .collect()
    } else {
        Vec::new()
    };

    let pb = ProgressBar::new(total_ticks);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ticks ({eta} remaining) {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("=>-"),
    );

    let started = Instant::now();
    for tick_nr in 0..=total_ticks {
        let time = tick_nr as f32 / cli.fps as f32;
        if cli.realtime {
            let due = Duration::from_secs_f32(time);
            if let Some(wait) = due.checked_sub(started.elapsed()) {
                std::thread::sleep(wait);
            }
        } else {
            for source in &mut sources {
                source.feed_until(time, record.chunk_size);
            }
        }

        pb.set_message(level_meter(&buffers));
        tick(time, &buffers, &mut estimators, &mut clock, &mut engine);
        pb.set_position(tick_nr.min(total_ticks));

        if engine.is_finished() {
            log::info!("All players finished at {:.1}s", time);
            break;
        }
    }
    pb.finish_with_message("Scoring complete");

    stop.store(true, Ordering::Relaxed);
    for handle in capture_threads {
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("Capture thread panicked"))?;
    }

    // 4. Results
    let result = RoundResult::from_engine(&engine);
    println!("{} - {}", result.artist, result.title);
    for player in &result.players {
        println!(
            "  Player {} ({:?}): {:>5} points ({} line bonus, {} golden), {} perfect line(s), {} hit / {} missed beats",
            player.player + 1,
            player.difficulty,
            player.points,
            player.points_line_bonus,
            player.points_golden_notes,
            player.perfect_lines,
            player.hit_beats,
            player.missed_beats,
        );
    }
    if let Some(winner) = result.winner().filter(|_| result.players.len() > 1) {
        println!("  Winner: Player {}", winner + 1);
    }

    if let Some(ref path) = cli.report {
        let json = serde_json::to_string_pretty(&result).context("Failed to serialize round result")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        log::info!("Report written to {}", path.display());
    }

    Ok(())
}
