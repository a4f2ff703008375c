use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Emotion, EmotionEvent};

/// How many trailing events the improvement check looks at.
const IMPROVEMENT_SAMPLE: usize = 5;

/// Append-only log of classified emotion events for one session, with
/// rolling trend and improvement statistics over configurable windows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmotionHistory {
    events: Vec<EmotionEvent>,
}

/// Session-level view of the emotional arc, for the end-of-session summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionJourney {
    pub start_emotion: Option<Emotion>,
    pub end_emotion: Option<Emotion>,
    pub predominant_emotion: Option<Emotion>,
    pub emotion_changes: usize,
    pub distribution: BTreeMap<String, usize>,
}

impl EmotionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event. O(1), never rejects a well-formed event.
    pub fn record(&mut self, event: EmotionEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[EmotionEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn last(&self) -> Option<&EmotionEvent> {
        self.events.last()
    }

    /// Majority-vote emotion among events within `[now - window, now]`.
    /// A zero-length window degenerates to the most recent event only. An
    /// empty window falls back to the most recent historical emotion, then
    /// neutral.
    pub fn trend(&self, window_seconds: u64, now: DateTime<Utc>) -> Emotion {
        if window_seconds == 0 {
            return self
                .events
                .last()
                .map(|e| e.emotion)
                .unwrap_or(Emotion::Neutral);
        }

        let cutoff = now - Duration::seconds(window_seconds as i64);
        let in_window = self
            .events
            .iter()
            .filter(|e| e.timestamp >= cutoff && e.timestamp <= now);

        // Counts in first-encounter order so ties break deterministically
        // toward the earlier label instead of flapping.
        let mut counts: Vec<(Emotion, usize)> = Vec::new();
        for event in in_window {
            match counts.iter_mut().find(|(e, _)| *e == event.emotion) {
                Some((_, count)) => *count += 1,
                None => counts.push((event.emotion, 1)),
            }
        }

        let mut winner = None;
        let mut winner_count = 0usize;
        for (emotion, count) in counts {
            if count > winner_count {
                winner = Some(emotion);
                winner_count = count;
            }
        }

        winner
            .or_else(|| self.events.last().map(|e| e.emotion))
            .unwrap_or(Emotion::Neutral)
    }

    /// True when, over the last five events (or fewer), fewer than half fall
    /// in the negative set. Fewer than two events is insufficient evidence
    /// and reads as not improving.
    pub fn is_improving(&self) -> bool {
        let start = self.events.len().saturating_sub(IMPROVEMENT_SAMPLE);
        let sample = &self.events[start..];
        if sample.len() < 2 {
            return false;
        }
        let negative = sample.iter().filter(|e| e.emotion.is_negative()).count();
        negative * 2 < sample.len()
    }

    /// True when defensive/frustrated events increased in the trailing
    /// window compared to the window before it. Used to hold the reaction
    /// phase while defensiveness is still climbing.
    pub fn defensiveness_rising(&self, window_seconds: u64, now: DateTime<Utc>) -> bool {
        let window = Duration::seconds(window_seconds as i64);
        let mid = now - window;
        let earliest = mid - window;

        let mut recent = 0usize;
        let mut previous = 0usize;
        for event in &self.events {
            if !event.emotion.is_defensive() {
                continue;
            }
            if event.timestamp > mid && event.timestamp <= now {
                recent += 1;
            } else if event.timestamp > earliest && event.timestamp <= mid {
                previous += 1;
            }
        }
        recent > previous
    }

    /// Analyze the emotional arc across the whole session.
    pub fn journey(&self) -> EmotionJourney {
        let mut distribution: BTreeMap<String, usize> = BTreeMap::new();
        for event in &self.events {
            *distribution
                .entry(event.emotion.as_str().to_string())
                .or_insert(0) += 1;
        }

        let mut predominant = None;
        let mut predominant_count = 0usize;
        // Encounter order again, for a stable pick under ties.
        for event in &self.events {
            let count = distribution
                .get(event.emotion.as_str())
                .copied()
                .unwrap_or(0);
            if count > predominant_count {
                predominant = Some(event.emotion);
                predominant_count = count;
            }
        }

        let emotion_changes = self
            .events
            .windows(2)
            .filter(|pair| pair[0].emotion != pair[1].emotion)
            .count();

        EmotionJourney {
            start_emotion: self.events.first().map(|e| e.emotion),
            end_emotion: self.events.last().map(|e| e.emotion),
            predominant_emotion: predominant,
            emotion_changes,
            distribution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Phase;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn event(emotion: Emotion, secs: i64) -> EmotionEvent {
        EmotionEvent {
            timestamp: at(secs),
            emotion,
            confidence: 0.8,
            phase: Phase::Reaction,
        }
    }

    fn history(entries: &[(Emotion, i64)]) -> EmotionHistory {
        let mut history = EmotionHistory::new();
        for (emotion, secs) in entries {
            history.record(event(*emotion, *secs));
        }
        history
    }

    #[test]
    fn trend_ignores_events_outside_the_window() {
        let history = history(&[
            (Emotion::Frustrated, 0),
            (Emotion::Frustrated, 10),
            (Emotion::Positive, 40),
        ]);
        // Queried at t=35 with a 30s window: only the first two qualify.
        assert_eq!(history.trend(30, at(35)), Emotion::Frustrated);
    }

    #[test]
    fn trend_falls_back_to_most_recent_then_neutral() {
        let empty = EmotionHistory::new();
        assert_eq!(empty.trend(30, at(100)), Emotion::Neutral);

        let stale = history(&[(Emotion::Sad, 0)]);
        assert_eq!(stale.trend(30, at(1_000)), Emotion::Sad);
    }

    #[test]
    fn zero_window_uses_most_recent_event_only() {
        let history = history(&[
            (Emotion::Defensive, 0),
            (Emotion::Defensive, 5),
            (Emotion::Positive, 10),
        ]);
        assert_eq!(history.trend(0, at(10)), Emotion::Positive);
    }

    #[test]
    fn trend_tie_breaks_toward_first_encountered() {
        let history = history(&[
            (Emotion::Anxious, 1),
            (Emotion::Positive, 2),
            (Emotion::Anxious, 3),
            (Emotion::Positive, 4),
        ]);
        assert_eq!(history.trend(60, at(10)), Emotion::Anxious);
    }

    #[test]
    fn improving_when_fewer_than_half_are_negative() {
        let history = history(&[
            (Emotion::Defensive, 0),
            (Emotion::Defensive, 10),
            (Emotion::Positive, 20),
            (Emotion::Positive, 30),
            (Emotion::Positive, 40),
        ]);
        assert!(history.is_improving());
    }

    #[test]
    fn not_improving_with_majority_negative_or_short_history() {
        let negative = history(&[
            (Emotion::Defensive, 0),
            (Emotion::Frustrated, 10),
            (Emotion::Anxious, 20),
            (Emotion::Positive, 30),
            (Emotion::Sad, 40),
        ]);
        assert!(!negative.is_improving());

        let single = history(&[(Emotion::Positive, 0)]);
        assert!(!single.is_improving());
    }

    #[test]
    fn improvement_looks_at_last_five_only() {
        // Five old defensive reads, then five calm ones.
        let history = history(&[
            (Emotion::Defensive, 0),
            (Emotion::Defensive, 1),
            (Emotion::Defensive, 2),
            (Emotion::Defensive, 3),
            (Emotion::Defensive, 4),
            (Emotion::Neutral, 5),
            (Emotion::Neutral, 6),
            (Emotion::Positive, 7),
            (Emotion::Neutral, 8),
            (Emotion::Positive, 9),
        ]);
        assert!(history.is_improving());
    }

    #[test]
    fn defensiveness_rising_compares_adjacent_windows() {
        let history = history(&[
            (Emotion::Defensive, 10),
            (Emotion::Defensive, 70),
            (Emotion::Frustrated, 80),
        ]);
        // Trailing 60s window (60..120]: two hits; previous (0..60]: one.
        assert!(history.defensiveness_rising(60, at(120)));

        let quiet = EmotionHistory::new();
        assert!(!quiet.defensiveness_rising(60, at(120)));
    }

    #[test]
    fn journey_summarizes_the_arc() {
        let history = history(&[
            (Emotion::Defensive, 0),
            (Emotion::Defensive, 10),
            (Emotion::Neutral, 20),
            (Emotion::Positive, 30),
        ]);
        let journey = history.journey();
        assert_eq!(journey.start_emotion, Some(Emotion::Defensive));
        assert_eq!(journey.end_emotion, Some(Emotion::Positive));
        assert_eq!(journey.predominant_emotion, Some(Emotion::Defensive));
        assert_eq!(journey.emotion_changes, 2);
        assert_eq!(journey.distribution.get("defensive"), Some(&2));
    }
}
