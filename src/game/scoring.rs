use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::clock::BEAT_SENTINEL;
use super::song::{Line, NoteType, SongTimeline, Voice};
use crate::audio::pitch::ToneEstimate;

pub const MAX_SCORE: f64 = 10000.0;
pub const LINE_BONUS_SCORE: f64 = 1000.0;
pub const MAX_PLAYERS: usize = 6;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Normal,
    Hard,
}

impl Difficulty {
    /// Largest halftone distance still counted as a hit
    pub fn tolerance(self) -> i32 {
        match self {
            Difficulty::Easy => 2,
            Difficulty::Normal => 1,
            Difficulty::Hard => 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    #[default]
    Normal,
    Medley,
    #[value(name = "short")]
    #[serde(rename = "short")]
    ShortSong,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformancePhase {
    Idle,
    Active,
    Finished,
}

/// A span of beats the player sang, hit or missed
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SungNote {
    pub start_beat: i32,
    pub duration: i32,
    pub tone: i32,
    pub hit: bool,
    pub note_type: NoteType,
    /// Index of the song note within the line this span hit
    #[serde(skip)]
    pub hit_note: Option<usize>,
    pub perfect: bool,
}

impl SungNote {
    pub fn end_beat(&self) -> i32 {
        self.start_beat + self.duration - 1
    }

    pub fn points(&self) -> u32 {
        if self.hit {
            self.note_type.points_for_beat() * self.duration as u32
        } else {
            0
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SungLine {
    pub notes: Vec<SungNote>,
    pub bonus_points: f64,
    pub perfect: bool,
}

impl SungLine {
    /// Hit beats weighted like the song's note points
    pub fn points(&self) -> u32 {
        self.notes.iter().map(SungNote::points).sum()
    }

    fn add(&mut self, start_beat: i32, tone: i32, hit_note: Option<usize>, note_type: NoteType) {
        self.notes.push(SungNote {
            start_beat,
            duration: 1,
            tone,
            hit: hit_note.is_some(),
            note_type,
            hit_note,
            perfect: false,
        });
    }

    fn check_perfect(&mut self, line: &Line) {
        if let Some(last) = self.notes.last_mut() {
            last.perfect = match last.hit_note.and_then(|i| line.notes.get(i)) {
                Some(target) => {
                    last.start_beat == target.start_beat
                        && last.end_beat() == target.end_beat()
                        && last.tone == target.tone
                }
                None => false,
            };
        }
        self.perfect = !self.notes.is_empty()
            && self.notes.len() == line.notes.len()
            && self.notes.iter().all(|n| n.perfect);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSetup {
    /// Voice of the song this player sings (duets)
    pub voice: usize,
    pub difficulty: Difficulty,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlayerPerformanceState {
    pub setup: PlayerSetup,
    pub points: f64,
    pub points_line_bonus: f64,
    pub points_golden_notes: f64,
    pub current_line: Option<usize>,
    pub current_note: Option<usize>,
    pub sung_lines: Vec<SungLine>,
    pub last_processed_beat: i32,
    pub phase: PerformancePhase,
    /// Distance in halftones of the last judged tone
    pub note_diff: i32,
}

impl PlayerPerformanceState {
    pub fn new(setup: PlayerSetup) -> Self {
        Self {
            setup,
            points: 0.0,
            points_line_bonus: 0.0,
            points_golden_notes: 0.0,
            current_line: None,
            current_note: None,
            sung_lines: Vec::new(),
            last_processed_beat: BEAT_SENTINEL,
            phase: PerformancePhase::Idle,
            note_diff: 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.phase == PerformancePhase::Finished
    }
}

/// Move `detected` by whole octaves until it is within half an octave of `expected`
pub fn fold_octave(detected: i32, expected: i32) -> i32 {
    let mut tone = detected;
    while tone - expected > 6 {
        tone -= 12;
    }
    while tone - expected < -6 {
        tone += 12;
    }
    tone
}

/// Shape the sung share of a line into the bonus factor
pub fn line_bonus_factor(ratio: f64) -> f64 {
    if ratio < 0.4 {
        0.0
    } else if ratio > 0.9 {
        1.0
    } else {
        let f = (ratio - 0.4) * 2.0;
        f * f
    }
}

pub struct ScoringEngine {
    song: Arc<SongTimeline>,
    mode: GameMode,
    players: Vec<PlayerPerformanceState>,
}

impl ScoringEngine {
    pub fn new(song: Arc<SongTimeline>, mode: GameMode, players: &[PlayerSetup]) -> Self {
        let players = players
            .iter()
            .take(MAX_PLAYERS)
            .map(|&setup| PlayerPerformanceState::new(setup))
            .collect();
        Self {
            song,
            mode,
            players,
        }
    }

    pub fn song(&self) -> &SongTimeline {
        &self.song
    }

    pub fn players(&self) -> &[PlayerPerformanceState] {
        &self.players
    }

    pub fn player(&self, index: usize) -> Option<&PlayerPerformanceState> {
        self.players.get(index)
    }

    pub fn is_finished(&self) -> bool {
        !self.players.is_empty() && self.players.iter().all(PlayerPerformanceState::is_finished)
    }

    pub fn reset(&mut self) {
        for player in &mut self.players {
            *player = PlayerPerformanceState::new(player.setup);
        }
    }

    /// Score all beats up to and including `scoring_beat`.
    ///
    /// `tones[p]` is the newest estimate for player `p`; a missing entry counts
    /// as no valid pitch.
    pub fn update(&mut self, scoring_beat: i32, tones: &[ToneEstimate]) {
        let song = Arc::clone(&self.song);
        for (index, player) in self.players.iter_mut().enumerate() {
            if scoring_beat <= player.last_processed_beat {
                continue;
            }
            let tone = tones.get(index).copied().unwrap_or_default();
            for beat in player.last_processed_beat + 1..=scoring_beat {
                score_beat(&song, self.mode, player, beat, &tone);
            }
            player.last_processed_beat = scoring_beat;
        }
    }
}

fn score_beat(
    song: &SongTimeline,
    mode: GameMode,
    player: &mut PlayerPerformanceState,
    beat: i32,
    tone: &ToneEstimate,
) {
    match player.phase {
        PerformancePhase::Finished => return,
        PerformancePhase::Idle => player.phase = PerformancePhase::Active,
        PerformancePhase::Active => {}
    }

    let mut finished = match mode {
        GameMode::Medley => song.medley.is_some_and(|m| m.end_beat == beat),
        GameMode::ShortSong => song.short_end == Some(beat),
        GameMode::Normal => false,
    };

    if let Some(voice) = song.voice(player.setup.voice) {
        finished |= score_voice_beat(voice, player, beat, tone);
    }

    if finished {
        log::debug!("Player finished at beat {} with {:.0} points", beat, player.points);
        player.phase = PerformancePhase::Finished;
    }
}

/// Judge one beat against the player's voice. Returns true on the song's final beat.
fn score_voice_beat(
    voice: &Voice,
    player: &mut PlayerPerformanceState,
    beat: i32,
    tone: &ToneEstimate,
) -> bool {
    let Some(line_idx) = voice.find_line(beat) else {
        return false;
    };
    if player.current_line != Some(line_idx) {
        player.current_note = None;
    }
    player.current_line = Some(line_idx);
    if player.sung_lines.len() <= line_idx {
        player.sung_lines.resize_with(line_idx + 1, SungLine::default);
    }

    let line = &voice.lines[line_idx];
    let Some(note_idx) = line.find_note(beat) else {
        return false;
    };
    player.current_note = Some(note_idx);
    let note = &line.notes[note_idx];
    let is_last_note = note_idx == line.notes.len() - 1;
    let song_over = line_idx == voice.lines.len() - 1 && is_last_note && note.end_beat() == beat;

    if note.points_for_beat() > 0 && tone.valid {
        let expected = note.tone;
        let raw = tone.tone_class as i32;
        let folded = fold_octave(raw, expected);
        player.note_diff = (expected - folded).abs();
        let sung = &mut player.sung_lines[line_idx];

        if player.note_diff <= player.setup.difficulty.tolerance() {
            let points = (MAX_SCORE - LINE_BONUS_SCORE) * note.points_for_beat() as f64
                / voice.total_points() as f64;
            if note.note_type == NoteType::Golden {
                player.points_golden_notes += points;
            }
            player.points += points;

            let extend = match sung.notes.last() {
                Some(last) => {
                    note.start_beat != beat
                        && last.end_beat() + 1 == beat
                        && last.tone == expected
                        && last.hit
                }
                None => false,
            };
            match sung.notes.last_mut() {
                Some(last) if extend => last.duration += 1,
                _ => sung.add(beat, expected, Some(note_idx), note.note_type),
            }
            sung.check_perfect(line);
        } else {
            let extend = sung
                .notes
                .last()
                .is_some_and(|last| !last.hit && last.tone == raw && last.end_beat() + 1 == beat);
            match sung.notes.last_mut() {
                Some(last) if extend => last.duration += 1,
                _ => sung.add(beat, raw, None, NoteType::Freestyle),
            }
        }
    }

    let lines_with_points = voice.lines_with_points();
    if is_last_note && note.end_beat() == beat && lines_with_points > 0 && line.points() > 0 {
        let sung = &mut player.sung_lines[line_idx];
        let factor = line_bonus_factor(sung.points() as f64 / line.points() as f64);
        let bonus = LINE_BONUS_SCORE * factor / lines_with_points as f64;
        player.points += bonus;
        player.points_line_bonus += bonus;
        sung.bonus_points = bonus;
        log::debug!("Line {} complete: factor {:.2}, bonus {:.1}", line_idx, factor, bonus);
    }

    song_over
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::song::{MedleyRange, Note};

    fn voiced(tone_class: usize) -> ToneEstimate {
        ToneEstimate {
            absolute_tone: tone_class + 12,
            tone_class,
            valid: true,
            max_volume: 0.8,
        }
    }

    fn single_note_song() -> Arc<SongTimeline> {
        let line = Line::from_notes(vec![Note::new(0, 4, 5, NoteType::Normal)]);
        Arc::new(SongTimeline::new(120.0, 0.0, vec![Voice { lines: vec![line] }]))
    }

    fn two_line_song() -> Arc<SongTimeline> {
        let mut voice = Voice {
            lines: vec![
                Line::from_notes(vec![
                    Note::new(0, 2, 0, NoteType::Normal),
                    Note::new(4, 2, 2, NoteType::Golden),
                ]),
                Line::from_notes(vec![Note::new(10, 4, 7, NoteType::Normal)]),
            ],
        };
        voice.update_timings();
        Arc::new(SongTimeline::new(120.0, 0.0, vec![voice]))
    }

    fn engine(song: Arc<SongTimeline>, difficulty: Difficulty) -> ScoringEngine {
        ScoringEngine::new(
            song,
            GameMode::Normal,
            &[PlayerSetup {
                voice: 0,
                difficulty,
            }],
        )
    }

    #[test]
    fn folds_octave_errors() {
        for detected in [11, 12, 13, -1, -13] {
            let folded = fold_octave(detected, 0);
            assert!(folded.abs() <= 6, "{} folded to {}", detected, folded);
        }
        assert_eq!(fold_octave(13, 0), 1);
        assert_eq!(fold_octave(11, 0), -1);
        assert_eq!(fold_octave(-13, 0), -1);
        assert_eq!(fold_octave(11, 5), 11);
    }

    #[test]
    fn shapes_line_bonus() {
        assert_eq!(line_bonus_factor(0.3), 0.0);
        assert_eq!(line_bonus_factor(0.95), 1.0);
        assert!((line_bonus_factor(0.65) - 0.25).abs() < 1e-12);
        let mid = line_bonus_factor(0.65);
        assert!(mid > 0.0 && mid < 1.0);
    }

    #[test]
    fn tolerance_narrows_with_difficulty() {
        assert_eq!(Difficulty::Easy.tolerance(), 2);
        assert_eq!(Difficulty::Normal.tolerance(), 1);
        assert_eq!(Difficulty::Hard.tolerance(), 0);
    }

    #[test]
    fn full_hit_scores_max() {
        let mut engine = engine(single_note_song(), Difficulty::Normal);
        for beat in 0..=3 {
            engine.update(beat, &[voiced(5)]);
        }
        let player = engine.player(0).unwrap();
        assert!((player.points - MAX_SCORE).abs() < 1e-9);
        assert!((player.points_line_bonus - LINE_BONUS_SCORE).abs() < 1e-9);
        assert_eq!(player.points_golden_notes, 0.0);

        let sung = &player.sung_lines[0];
        assert_eq!(sung.notes.len(), 1);
        assert!(sung.notes[0].hit);
        assert_eq!(sung.notes[0].duration, 4);
        assert!(sung.notes[0].perfect);
        assert!(sung.perfect);
        assert!(player.is_finished());
    }

    #[test]
    fn full_miss_scores_nothing() {
        let mut engine = engine(single_note_song(), Difficulty::Normal);
        engine.update(3, &[voiced(11)]);
        let player = engine.player(0).unwrap();
        assert_eq!(player.points, 0.0);
        assert_eq!(player.note_diff, 6);

        let sung = &player.sung_lines[0];
        assert_eq!(sung.notes.len(), 1);
        assert!(!sung.notes[0].hit);
        assert_eq!(sung.notes[0].note_type, NoteType::Freestyle);
        assert_eq!(sung.notes[0].tone, 11);
        assert_eq!(sung.notes[0].duration, 4);
        assert_eq!(sung.bonus_points, 0.0);
    }

    #[test]
    fn silence_scores_nothing() {
        let mut engine = engine(single_note_song(), Difficulty::Easy);
        let silent = ToneEstimate {
            tone_class: 5,
            ..ToneEstimate::default()
        };
        engine.update(3, &[silent]);
        let player = engine.player(0).unwrap();
        assert_eq!(player.points, 0.0);
        assert!(player.sung_lines[0].notes.is_empty());
    }

    #[test]
    fn missing_tone_entry_counts_as_silence() {
        let mut engine = engine(single_note_song(), Difficulty::Easy);
        engine.update(3, &[]);
        assert_eq!(engine.player(0).unwrap().points, 0.0);
    }

    #[test]
    fn repeated_beat_is_not_rescored() {
        let mut engine = engine(single_note_song(), Difficulty::Normal);
        engine.update(1, &[voiced(5)]);
        let before = engine.player(0).unwrap().clone();
        engine.update(1, &[voiced(5)]);
        engine.update(0, &[voiced(5)]);
        assert_eq!(engine.player(0).unwrap(), &before);
        assert!((before.points - 2.0 * 9000.0 / 4.0).abs() < 1e-9);
    }

    #[test]
    fn catch_up_visits_every_beat_once() {
        let mut stepped = engine(two_line_song(), Difficulty::Normal);
        let mut jumped = engine(two_line_song(), Difficulty::Normal);

        for beat in -3..=20 {
            stepped.update(beat, &[voiced(0)]);
            assert_eq!(stepped.player(0).unwrap().last_processed_beat, beat);
        }
        jumped.update(7, &[voiced(0)]);
        jumped.update(20, &[voiced(0)]);

        let a = stepped.player(0).unwrap();
        let b = jumped.player(0).unwrap();
        assert_eq!(a.last_processed_beat, 20);
        assert!((a.points - b.points).abs() < 1e-9);
        assert_eq!(a.sung_lines, b.sung_lines);
    }

    #[test]
    fn tolerance_and_golden_points() {
        // line 0: normal tone 0 (2 beats), golden tone 2 (2 beats); line 1: tone 7 (4 beats)
        let mut engine = engine(two_line_song(), Difficulty::Easy);
        engine.update(1, &[voiced(1)]); // within 2 of tone 0
        engine.update(5, &[voiced(4)]); // within 2 of tone 2
        let player = engine.player(0).unwrap();
        let per_point = 9000.0 / 10.0;
        assert!((player.points_golden_notes - 2.0 * 2.0 * per_point).abs() < 1e-9);

        // line complete: sung points 6 of 6
        let expected = 6.0 * per_point + 0.5 * LINE_BONUS_SCORE;
        assert!((player.points - expected).abs() < 1e-9);
        assert!((player.points_line_bonus - 0.5 * LINE_BONUS_SCORE).abs() < 1e-9);

        let sung = &player.sung_lines[0];
        assert_eq!(sung.notes.len(), 2);
        assert_eq!(sung.notes[0].tone, 0);
        assert_eq!(sung.notes[1].tone, 2);
        assert_eq!(sung.notes[1].note_type, NoteType::Golden);
    }

    #[test]
    fn partial_line_bonus_uses_curve() {
        // Hit 3 of 4 beats on line 1 -> ratio 0.75 -> factor 0.49
        let mut engine = engine(two_line_song(), Difficulty::Hard);
        engine.update(9, &[voiced(3)]);
        engine.update(12, &[voiced(7)]);
        engine.update(13, &[voiced(1)]);
        let player = engine.player(0).unwrap();
        let sung = &player.sung_lines[1];
        assert_eq!(sung.points(), 3);
        assert!((sung.bonus_points - 0.49 * LINE_BONUS_SCORE / 2.0).abs() < 1e-9);
        assert!(!sung.perfect);
        assert_eq!(sung.notes.len(), 2);
        assert!(sung.notes[0].hit && !sung.notes[0].perfect);
        assert!(!sung.notes[1].hit);
    }

    #[test]
    fn new_note_starts_new_sung_span() {
        let line = Line::from_notes(vec![
            Note::new(0, 2, 4, NoteType::Normal),
            Note::new(2, 2, 4, NoteType::Normal),
        ]);
        let song = Arc::new(SongTimeline::new(120.0, 0.0, vec![Voice { lines: vec![line] }]));
        let mut engine = engine(song, Difficulty::Normal);
        engine.update(3, &[voiced(4)]);
        let sung = &engine.player(0).unwrap().sung_lines[0];
        assert_eq!(sung.notes.len(), 2);
        assert!(sung.notes.iter().all(|n| n.perfect));
        assert!(sung.perfect);
    }

    #[test]
    fn tracks_current_line_and_note() {
        let mut engine = engine(two_line_song(), Difficulty::Normal);
        engine.update(4, &[voiced(2)]);
        let player = engine.player(0).unwrap();
        assert_eq!(player.current_line, Some(0));
        assert_eq!(player.current_note, Some(1));
        assert_eq!(player.phase, PerformancePhase::Active);

        engine.update(8, &[voiced(2)]);
        let player = engine.player(0).unwrap();
        assert_eq!(player.current_line, Some(1));
        assert_eq!(player.current_note, None);
        assert_eq!(player.sung_lines.len(), 2);
    }

    #[test]
    fn players_are_independent() {
        let mut engine = ScoringEngine::new(
            single_note_song(),
            GameMode::Normal,
            &[PlayerSetup::default(), PlayerSetup::default()],
        );
        engine.update(3, &[voiced(5), voiced(11)]);
        assert!((engine.player(0).unwrap().points - MAX_SCORE).abs() < 1e-9);
        assert_eq!(engine.player(1).unwrap().points, 0.0);
        assert!(engine.is_finished());
    }

    #[test]
    fn short_song_finishes_at_end_beat() {
        let mut song = (*two_line_song()).clone();
        song.short_end = Some(5);
        let mut engine = ScoringEngine::new(Arc::new(song), GameMode::ShortSong, &[PlayerSetup::default()]);
        engine.update(4, &[voiced(2)]);
        assert!(!engine.is_finished());
        engine.update(6, &[voiced(2)]);
        assert!(engine.is_finished());

        let frozen = engine.player(0).unwrap().points;
        engine.update(13, &[voiced(7)]);
        let player = engine.player(0).unwrap();
        assert_eq!(player.points, frozen);
        assert_eq!(player.last_processed_beat, 13);
    }

    #[test]
    fn medley_end_only_counts_in_medley_mode() {
        let mut song = (*two_line_song()).clone();
        song.medley = Some(MedleyRange {
            start_beat: 0,
            end_beat: 6,
        });
        let song = Arc::new(song);

        let mut normal = ScoringEngine::new(Arc::clone(&song), GameMode::Normal, &[PlayerSetup::default()]);
        normal.update(8, &[]);
        assert!(!normal.is_finished());

        let mut medley = ScoringEngine::new(song, GameMode::Medley, &[PlayerSetup::default()]);
        medley.update(8, &[]);
        assert!(medley.is_finished());
    }

    #[test]
    fn reset_returns_to_idle() {
        let mut engine = engine(single_note_song(), Difficulty::Normal);
        engine.update(3, &[voiced(5)]);
        engine.reset();
        let player = engine.player(0).unwrap();
        assert_eq!(player.phase, PerformancePhase::Idle);
        assert_eq!(player.points, 0.0);
        assert_eq!(player.last_processed_beat, BEAT_SENTINEL);
        assert!(player.sung_lines.is_empty());
    }

    #[test]
    fn empty_song_never_scores() {
        let song = Arc::new(SongTimeline::new(120.0, 0.0, vec![Voice::default()]));
        let mut engine = engine(song, Difficulty::Easy);
        engine.update(50, &[voiced(0)]);
        let player = engine.player(0).unwrap();
        assert_eq!(player.points, 0.0);
        assert_eq!(player.last_processed_beat, 50);
    }

    #[test]
    fn missing_voice_is_ignored() {
        let mut engine = ScoringEngine::new(
            single_note_song(),
            GameMode::Normal,
            &[PlayerSetup {
                voice: 3,
                difficulty: Difficulty::Easy,
            }],
        );
        engine.update(3, &[voiced(5)]);
        assert_eq!(engine.player(0).unwrap().points, 0.0);
    }
}
