use anyhow::{Context, Result};
use std::path::Path;

use super::clock::beat_from_time;
use super::song::{Line, MedleyRange, Note, NoteType, SongTimeline, Voice};
use crate::error::{SongError, SongResult};

const MAX_VOICES: usize = 2;

#[derive(Default)]
struct Header {
    title: String,
    artist: String,
    bpm: Option<f32>,
    gap: f32,
    medley_start: Option<i32>,
    medley_end: Option<i32>,
    end_short_ms: Option<f32>,
    relative: bool,
}

/// Notes of one voice, grouped by line break
#[derive(Default)]
struct VoiceBuilder {
    lines: Vec<Vec<Note>>,
}

impl VoiceBuilder {
    fn last_note_end(&self) -> Option<i32> {
        self.lines.iter().rev().find_map(|l| l.last().map(Note::end_beat))
    }

    /// Append a note to the open line. Returns false if it overlaps the previous note.
    fn add_note(&mut self, note: Note) -> bool {
        if self.last_note_end().is_some_and(|end| note.start_beat <= end) {
            return false;
        }
        match self.lines.last_mut() {
            Some(line) => line.push(note),
            None => self.lines.push(vec![note]),
        }
        true
    }

    /// Open a new line. Returns false if the current line has no notes yet.
    fn add_line(&mut self) -> bool {
        if self.lines.last().is_some_and(Vec::is_empty) {
            return false;
        }
        self.lines.push(Vec::new());
        true
    }

    fn finish(self, index: usize) -> Voice {
        let before = self.lines.len();
        let lines: Vec<Line> = self
            .lines
            .into_iter()
            .filter(|notes| !notes.is_empty())
            .map(Line::from_notes)
            .collect();
        let removed = before - lines.len();
        if removed > 0 {
            log::warn!("Removed {} empty line(s) from P{}", removed, index + 1);
        }
        let mut voice = Voice { lines };
        voice.update_timings();
        voice
    }
}

fn parse_decimal(value: &str) -> Option<f32> {
    value.trim().replace(',', ".").parse().ok()
}

fn parse_header_tag(header: &mut Header, tag: &str, value: &str) -> SongResult<()> {
    let value = value.trim();
    match tag.trim().to_ascii_uppercase().as_str() {
        "TITLE" => header.title = value.to_string(),
        "ARTIST" => header.artist = value.to_string(),
        "BPM" => {
            let bpm = parse_decimal(value).ok_or_else(|| SongError::InvalidBpm(value.to_string()))?;
            header.bpm = Some(bpm * 4.0);
        }
        "GAP" => match parse_decimal(value) {
            Some(ms) => header.gap = ms / 1000.0,
            None => log::warn!("Ignored invalid #GAP value: {}", value),
        },
        "MEDLEYSTARTBEAT" => header.medley_start = value.parse().ok(),
        "MEDLEYENDBEAT" => header.medley_end = value.parse().ok(),
        "ENDSHORT" => header.end_short_ms = parse_decimal(value),
        "RELATIVE" => header.relative = value.eq_ignore_ascii_case("yes"),
        _ => {}
    }
    Ok(())
}

/// Parse the text of an UltraStar song file
pub fn parse_song(content: &str) -> SongResult<SongTimeline> {
    let content = content.trim_start_matches('\u{feff}');
    let mut header = Header::default();
    let mut lines = content.lines().enumerate().peekable();

    while let Some((_, line)) = lines.next_if(|(_, l)| l.trim().is_empty() || l.starts_with('#')) {
        if let Some((tag, value)) = line.trim_start_matches('#').split_once(':') {
            parse_header_tag(&mut header, tag, value)?;
        }
    }

    let bpm = header.bpm.ok_or(SongError::MissingBpm)?;
    if bpm <= 0.0 {
        return Err(SongError::InvalidBpm(bpm.to_string()));
    }

    let mut voices: Vec<VoiceBuilder> = (0..MAX_VOICES).map(|_| VoiceBuilder::default()).collect();
    let mut players: u32 = 1;
    let mut current_beat = 0;
    let mut last_note_end: Option<i32> = None;

    for (index, line) in lines {
        let line_nr = index + 1;
        let mut chars = line.chars();
        let Some(tag) = chars.next() else {
            continue;
        };
        let rest = chars.as_str();
        let rest = rest.strip_prefix(' ').unwrap_or(rest);

        match tag {
            '#' => continue,
            'E' => break,
            'P' => {
                players = rest
                    .trim_matches(|c| c == ' ' || c == ':')
                    .parse()
                    .ok()
                    .filter(|p| (1..=3).contains(p))
                    .ok_or(SongError::InvalidPlayer { line: line_nr })?;
                current_beat = 0;
                last_note_end = None;
            }
            ':' | '*' | 'F' => {
                let invalid = || SongError::InvalidNote { line: line_nr };
                let mut rest = rest.trim_start();
                let mut numbers = [0i32; 3];
                for (i, slot) in numbers.iter_mut().enumerate() {
                    let (field, tail) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                    *slot = field.parse().map_err(|_| invalid())?;
                    // the text keeps its own leading spaces
                    rest = if i < 2 { tail.trim_start() } else { tail };
                }
                let [beat, length, tone] = numbers;
                let text = rest;
                if text.trim().is_empty() {
                    log::warn!("Line {}: ignored note without text", line_nr);
                    continue;
                }
                if length < 1 {
                    log::warn!("Line {}: ignored note with length < 1", line_nr);
                    continue;
                }

                let note_type = match tag {
                    '*' => NoteType::Golden,
                    'F' => NoteType::Freestyle,
                    _ => NoteType::Normal,
                };
                let beat = if header.relative {
                    beat.checked_add(current_beat).ok_or_else(invalid)?
                } else {
                    beat
                };
                let end = beat.checked_add(length - 1).ok_or_else(invalid)?;

                for (v, voice) in voices.iter_mut().enumerate() {
                    if players & (1 << v) == 0 {
                        continue;
                    }
                    let mut note = Note::new(beat, length, tone, note_type);
                    note.text = text.to_string();
                    if !voice.add_note(note) {
                        log::warn!(
                            "Line {}: ignored note for P{} because it overlaps with another note",
                            line_nr,
                            v + 1
                        );
                    }
                }
                last_note_end = Some(end);
            }
            '-' => {
                let invalid = || SongError::InvalidLineBreak { line: line_nr };
                let mut fields = rest.split_whitespace();
                let mut beat: i32 = fields
                    .next()
                    .and_then(|f| f.parse().ok())
                    .ok_or_else(invalid)?;

                if header.relative {
                    beat = beat.checked_add(current_beat).ok_or_else(invalid)?;
                    match fields.next().and_then(|f| f.parse::<i32>().ok()) {
                        Some(length) => current_beat = current_beat.checked_add(length).ok_or_else(invalid)?,
                        None => {
                            log::warn!("Line {}: missing line break length", line_nr);
                            current_beat = beat;
                        }
                    }
                }

                if let Some(end) = last_note_end.filter(|&end| beat <= end) {
                    log::warn!("Line {}: line break is before previous note end, adjusted", line_nr);
                    let next = end.checked_add(1).ok_or_else(invalid)?;
                    if header.relative {
                        current_beat = next
                            .checked_sub(beat)
                            .and_then(|shift| current_beat.checked_add(shift))
                            .ok_or_else(invalid)?;
                    }
                    beat = next;
                }

                if beat < 1 {
                    log::warn!("Line {}: ignored line break at position < 1", line_nr);
                    continue;
                }
                for (v, voice) in voices.iter_mut().enumerate() {
                    if players & (1 << v) != 0 && !voice.add_line() {
                        log::warn!("Line {}: ignored duplicate line break for P{}", line_nr, v + 1);
                    }
                }
            }
            other => {
                return Err(SongError::UnexpectedTag {
                    line: line_nr,
                    tag: other,
                })
            }
        }
    }

    let mut voices: Vec<Voice> = voices
        .into_iter()
        .enumerate()
        .map(|(i, v)| v.finish(i))
        .collect();
    if voices.len() > 1 && voices[1].lines.is_empty() {
        voices.truncate(1);
    }
    if voices.iter().all(|v| v.lines.is_empty()) {
        return Err(SongError::NoNotes);
    }

    let mut song = SongTimeline::new(bpm, header.gap, voices);
    song.title = header.title;
    song.artist = header.artist;

    if let (Some(start_beat), Some(end_beat)) = (header.medley_start, header.medley_end) {
        if start_beat > end_beat {
            log::warn!("Ignored medley: start beat {} is after end beat {}", start_beat, end_beat);
        } else {
            song.medley = Some(MedleyRange { start_beat, end_beat });
        }
    }
    if let Some(ms) = header.end_short_ms {
        let beat = beat_from_time(ms / 1000.0, bpm, header.gap) as i32;
        if beat > 0 {
            song.short_end = Some(beat);
        }
    }

    if song.medley.is_none() {
        song.medley = song.find_refrain();
        if let Some(range) = song.medley {
            log::info!("Calculated medley from beat {} to {}", range.start_beat, range.end_beat);
        }
    }
    if song.short_end.is_none() {
        song.short_end = song.find_short_end();
    }

    Ok(song)
}

pub fn load_song(path: &Path) -> Result<SongTimeline> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read song file: {}", path.display()))?;
    let song = parse_song(&content).with_context(|| format!("Failed to parse song: {}", path.display()))?;

    log::info!(
        "Loaded song {} - {}: {:.1} BPM, gap {:.2}s, {} voice(s), {} line(s)",
        song.artist,
        song.title,
        song.bpm / 4.0,
        song.gap,
        song.voices.len(),
        song.voices.iter().map(|v| v.lines.len()).sum::<usize>()
    );

    Ok(song)
}
