use thiserror::Error;

/// Errors raised while reading an UltraStar song file
#[derive(Debug, Error, PartialEq)]
pub enum SongError {
    #[error("Missing #BPM tag")]
    MissingBpm,

    #[error("Invalid BPM value: {0}")]
    InvalidBpm(String),

    /// Note with missing or non-numeric fields
    #[error("Line {line}: invalid note")]
    InvalidNote { line: usize },

    #[error("Line {line}: invalid line break")]
    InvalidLineBreak { line: usize },

    #[error("Line {line}: wrong or missing number after \"P\"")]
    InvalidPlayer { line: usize },

    #[error("Line {line}: unexpected or missing character ({tag})")]
    UnexpectedTag { line: usize, tag: char },

    #[error("Song contains no notes")]
    NoNotes,
}

pub type SongResult<T> = Result<T, SongError>;
