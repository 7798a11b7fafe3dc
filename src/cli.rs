use clap::Parser;
use std::path::PathBuf;

use crate::game::scoring::{Difficulty, GameMode};

#[derive(Parser, Debug)]
#[command(name = "vocalscore", about = "Score recorded karaoke vocals against an UltraStar song")]
pub struct Cli {
    /// UltraStar song file (.txt)
    pub song: PathBuf,

    /// Vocal recording per player (WAV, MP3, FLAC, OGG)
    #[arg(short, long = "voice", required = true)]
    pub voices: Vec<PathBuf>,

    /// Difficulty per player (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    pub difficulty: Vec<Difficulty>,

    /// Game mode
    #[arg(short, long, value_enum, default_value_t = GameMode::Normal)]
    pub mode: GameMode,

    /// Microphone delay in milliseconds (0-500, 20 ms steps)
    #[arg(long, default_value_t = 300)]
    pub mic_delay: u32,

    /// Scoring ticks per second
    #[arg(long, default_value_t = 60)]
    pub fps: u32,

    /// Use the two channels of a single stereo recording as players 1 and 2
    #[arg(long)]
    pub stereo: bool,

    /// Feed audio from a capture thread at real-time speed
    #[arg(long)]
    pub realtime: bool,

    /// Write the round result as JSON
    #[arg(short, long)]
    pub report: Option<PathBuf>,

    /// Config file (defaults to vocalscore.toml or ~/.config/vocalscore/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}
