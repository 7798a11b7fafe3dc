use serde::Serialize;

use super::scoring::{Difficulty, PlayerPerformanceState, ScoringEngine};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerResult {
    pub player: usize,
    pub voice: usize,
    pub difficulty: Difficulty,
    pub points: f64,
    pub points_line_bonus: f64,
    pub points_golden_notes: f64,
    pub perfect_lines: usize,
    pub hit_beats: i32,
    pub missed_beats: i32,
    pub finished: bool,
}

impl PlayerResult {
    pub fn from_state(player: usize, state: &PlayerPerformanceState) -> Self {
        let sung = state.sung_lines.iter().flat_map(|l| l.notes.iter());
        let (hit_beats, missed_beats) = sung.fold((0, 0), |(hit, miss), note| {
            if note.hit {
                (hit + note.duration, miss)
            } else {
                (hit, miss + note.duration)
            }
        });
        Self {
            player,
            voice: state.setup.voice,
            difficulty: state.setup.difficulty,
            points: state.points.round(),
            points_line_bonus: state.points_line_bonus.round(),
            points_golden_notes: state.points_golden_notes.round(),
            perfect_lines: state.sung_lines.iter().filter(|l| l.perfect).count(),
            hit_beats,
            missed_beats,
            finished: state.is_finished(),
        }
    }
}

/// Snapshot of a round for printing or the JSON report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundResult {
    pub title: String,
    pub artist: String,
    pub players: Vec<PlayerResult>,
}

impl RoundResult {
    pub fn from_engine(engine: &ScoringEngine) -> Self {
        let song = engine.song();
        Self {
            title: song.title.clone(),
            artist: song.artist.clone(),
            players: engine
                .players()
                .iter()
                .enumerate()
                .map(|(i, state)| PlayerResult::from_state(i, state))
                .collect(),
        }
    }

    /// Index of the highest scoring player
    pub fn winner(&self) -> Option<usize> {
        self.players
            .iter()
            .max_by(|a, b| a.points.total_cmp(&b.points))
            .map(|p| p.player)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pitch::ToneEstimate;
    use crate::game::scoring::{GameMode, PlayerSetup};
    use crate::game::song::{Line, Note, NoteType, SongTimeline, Voice};
    use std::sync::Arc;

    fn round(tones: &[ToneEstimate]) -> RoundResult {
        let line = Line::from_notes(vec![Note::new(0, 4, 5, NoteType::Normal)]);
        let mut song = SongTimeline::new(120.0, 0.0, vec![Voice { lines: vec![line] }]);
        song.title = "Song".into();
        let mut engine = ScoringEngine::new(
            Arc::new(song),
            GameMode::Normal,
            &[PlayerSetup::default(), PlayerSetup::default()],
        );
        engine.update(3, tones);
        RoundResult::from_engine(&engine)
    }

    fn tone(tone_class: usize) -> ToneEstimate {
        ToneEstimate {
            absolute_tone: tone_class,
            tone_class,
            valid: true,
            max_volume: 1.0,
        }
    }

    #[test]
    fn summarizes_each_player() {
        let result = round(&[tone(5), tone(11)]);
        assert_eq!(result.title, "Song");
        assert_eq!(result.players.len(), 2);

        let best = &result.players[0];
        assert_eq!(best.points, 10000.0);
        assert_eq!(best.points_line_bonus, 1000.0);
        assert_eq!(best.perfect_lines, 1);
        assert_eq!(best.hit_beats, 4);
        assert!(best.finished);

        let worst = &result.players[1];
        assert_eq!(worst.points, 0.0);
        assert_eq!(worst.missed_beats, 4);
        assert_eq!(result.winner(), Some(0));
    }

    #[test]
    fn serializes_to_json() {
        let result = round(&[tone(5)]);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["players"][0]["difficulty"], "normal");
        assert_eq!(json["players"][0]["points"], 10000.0);
        assert_eq!(json["players"][1]["hit_beats"], 0);
    }
}
