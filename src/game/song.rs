use serde::Serialize;

use super::clock::time_from_beats;

/// Repeated lines needed before a refrain counts as a medley
const MEDLEY_MIN_SERIES_LENGTH: usize = 3;
/// Longest calculated medley, in seconds
const MEDLEY_MAX_DURATION: f32 = 40.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteType {
    Normal,
    Golden,
    Freestyle,
}

impl NoteType {
    pub fn points_for_beat(self) -> u32 {
        match self {
            NoteType::Normal => 1,
            NoteType::Golden => 2,
            NoteType::Freestyle => 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Note {
    pub start_beat: i32,
    /// Length in beats, at least 1
    pub duration: i32,
    pub tone: i32,
    pub note_type: NoteType,
    pub text: String,
}

impl Note {
    pub fn new(start_beat: i32, duration: i32, tone: i32, note_type: NoteType) -> Self {
        Self {
            start_beat,
            duration: duration.max(1),
            tone,
            note_type,
            text: String::new(),
        }
    }

    /// Last beat covered by the note (inclusive)
    pub fn end_beat(&self) -> i32 {
        self.start_beat + self.duration - 1
    }

    pub fn contains(&self, beat: i32) -> bool {
        beat >= self.start_beat && beat <= self.end_beat()
    }

    pub fn points_for_beat(&self) -> u32 {
        self.note_type.points_for_beat()
    }

    pub fn points(&self) -> u32 {
        self.points_for_beat() * self.duration as u32
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Line {
    pub start_beat: i32,
    pub end_beat: i32,
    pub notes: Vec<Note>,
}

impl Line {
    /// Line spanning exactly its notes
    pub fn from_notes(notes: Vec<Note>) -> Self {
        let start_beat = notes.first().map_or(0, |n| n.start_beat);
        let end_beat = notes.last().map_or(0, |n| n.end_beat());
        Self {
            start_beat,
            end_beat,
            notes,
        }
    }

    pub fn contains(&self, beat: i32) -> bool {
        beat >= self.start_beat && beat <= self.end_beat
    }

    pub fn find_note(&self, beat: i32) -> Option<usize> {
        self.notes.iter().position(|n| n.contains(beat))
    }

    pub fn points(&self) -> u32 {
        self.notes.iter().map(Note::points).sum()
    }

    pub fn first_note_beat(&self) -> Option<i32> {
        self.notes.first().map(|n| n.start_beat)
    }

    pub fn last_note_beat(&self) -> Option<i32> {
        self.notes.last().map(Note::end_beat)
    }

    pub fn lyrics(&self) -> String {
        self.notes.iter().map(|n| n.text.as_str()).collect()
    }
}

/// Run of consecutive lines (`start..=end`) whose lyrics repeat later in the song
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Series {
    pub start: usize,
    pub end: usize,
}

impl Series {
    pub fn length(&self) -> usize {
        self.end - self.start + 1
    }
}

/// `a + (b - a) / 2` without overflowing
fn halfway(a: i32, b: i32) -> i32 {
    (a as i64 + (b as i64 - a as i64) / 2) as i32
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Voice {
    pub lines: Vec<Line>,
}

impl Voice {
    pub fn find_line(&self, beat: i32) -> Option<usize> {
        self.lines.iter().position(|l| l.contains(beat))
    }

    pub fn total_points(&self) -> u32 {
        self.lines.iter().map(Line::points).sum()
    }

    pub fn lines_with_points(&self) -> usize {
        self.lines.iter().filter(|l| l.points() > 0).count()
    }

    /// Every pair of equal lyric lines, extended over the following equal lines.
    /// Lines without points never match.
    pub fn repeated_series(&self) -> Vec<Series> {
        let sentences: Vec<String> = self
            .lines
            .iter()
            .map(|l| if l.points() > 0 { l.lyrics() } else { String::new() })
            .collect();
        let n = sentences.len();
        let mut series = Vec::new();
        for i in 0..n.saturating_sub(1) {
            if sentences[i].is_empty() {
                continue;
            }
            for j in i + 1..n {
                if sentences[i] != sentences[j] {
                    continue;
                }
                let max = if 2 * j - i > n { n - 1 - j } else { j - i - 1 };
                let mut end = i;
                for k in 1..=max {
                    if sentences[i + k].is_empty() || sentences[i + k] != sentences[j + k] {
                        break;
                    }
                    end = i + k;
                }
                series.push(Series { start: i, end });
            }
        }
        series
    }

    /// Recompute line boundaries from the notes they hold.
    ///
    /// The first line reaches back to the song start; following lines start
    /// shortly before their first note depending on the pause after the
    /// previous line.
    pub fn update_timings(&mut self) {
        if self.lines.is_empty() {
            return;
        }
        self.lines[0].start_beat = -10000;

        for i in 1..self.lines.len() {
            let (prev_end, next_start) = match (
                self.lines[i - 1].last_note_beat(),
                self.lines[i].notes.first().map(|n| n.start_beat),
            ) {
                (Some(end), Some(start)) => (end, start),
                _ => continue,
            };

            let start = match next_start - prev_end {
                0 | 1 => next_start,
                2 => next_start - 1,
                3 => next_start - 2,
                _ => prev_end + 2,
            };
            self.lines[i].start_beat = start;
            self.lines[i - 1].end_beat = prev_end;
        }

        let last = self.lines.len() - 1;
        if let Some(end) = self.lines[last].last_note_beat() {
            self.lines[last].end_beat = end;
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MedleyRange {
    pub start_beat: i32,
    pub end_beat: i32,
}

/// Parsed song: tempo, offset and the note timeline of every voice.
#[derive(Clone, Debug, PartialEq)]
pub struct SongTimeline {
    pub title: String,
    pub artist: String,
    /// Beats per minute (already scaled to file beats)
    pub bpm: f32,
    /// Seconds before beat 0
    pub gap: f32,
    pub voices: Vec<Voice>,
    pub medley: Option<MedleyRange>,
    pub short_end: Option<i32>,
}

impl SongTimeline {
    pub fn new(bpm: f32, gap: f32, voices: Vec<Voice>) -> Self {
        Self {
            title: String::new(),
            artist: String::new(),
            bpm,
            gap,
            voices,
            medley: None,
            short_end: None,
        }
    }

    pub fn voice(&self, index: usize) -> Option<&Voice> {
        self.voices.get(index)
    }

    pub fn is_duet(&self) -> bool {
        self.voices.len() > 1
    }

    /// Last beat of the song over all voices
    pub fn end_beat(&self) -> i32 {
        self.voices
            .iter()
            .filter_map(|v| v.lines.last().and_then(Line::last_note_beat))
            .max()
            .unwrap_or(0)
    }

    /// End beat for short song mode: about half of the sung part, moved out
    /// of any repeated section or line it would cut.
    pub fn find_short_end(&self) -> Option<i32> {
        let voice = self.voices.first()?;
        let first = voice.lines.first()?.first_note_beat()?;
        let last = voice.lines.last()?.last_note_beat()?;
        let stop = halfway(first, last);

        for series in voice.repeated_series() {
            let (Some(start), Some(end)) = (
                voice.lines[series.start].first_note_beat(),
                voice.lines[series.end].last_note_beat(),
            ) else {
                continue;
            };
            if start < stop && end > stop {
                if stop < halfway(start, end) && series.start > 0 {
                    return voice.lines[series.start - 1].last_note_beat();
                }
                return Some(end);
            }
        }

        for line in &voice.lines {
            if let (Some(start), Some(end)) = (line.first_note_beat(), line.last_note_beat()) {
                if start < stop && end > stop {
                    return Some(end);
                }
            }
        }

        Some(stop)
    }

    /// Medley range from the longest repeated series of lines, capped in length.
    /// Duets never get a calculated medley.
    pub fn find_refrain(&self) -> Option<MedleyRange> {
        if self.is_duet() {
            return None;
        }
        let voice = self.voices.first()?;
        let series = voice.repeated_series();
        // first of the longest
        let longest = series
            .iter()
            .fold(None, |best: Option<&Series>, s| match best {
                Some(b) if s.length() <= b.length() => Some(b),
                _ => Some(s),
            })?;
        if longest.length() <= MEDLEY_MIN_SERIES_LENGTH {
            return None;
        }

        let start_beat = voice.lines[longest.start].first_note_beat()?;
        let mut end_beat = voice.lines[longest.end].last_note_beat()?;
        let start_time = time_from_beats(start_beat as f32, self.bpm);
        let fits = |beat: i32| start_time + MEDLEY_MAX_DURATION > time_from_beats(beat as f32, self.bpm);

        if !fits(end_beat) {
            end_beat = voice
                .lines
                .iter()
                .take(voice.lines.len().saturating_sub(1))
                .skip(longest.start + 1)
                .filter_map(Line::last_note_beat)
                .filter(|&beat| fits(beat))
                .last()?;
        }
        Some(MedleyRange { start_beat, end_beat })
    }

    /// Turn every note outside the medley range into a freestyle note
    pub fn apply_medley(&mut self) {
        let Some(range) = self.medley else {
            return;
        };
        for note in self
            .voices
            .iter_mut()
            .flat_map(|v| v.lines.iter_mut())
            .flat_map(|l| l.notes.iter_mut())
        {
            if note.start_beat < range.start_beat || note.end_beat() > range.end_beat {
                note.note_type = NoteType::Freestyle;
            }
        }
    }
}
