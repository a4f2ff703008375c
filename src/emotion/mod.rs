pub mod classifier;
pub mod history;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::Phase;

pub use classifier::EmotionClassifier;
pub use history::{EmotionHistory, EmotionJourney};

/// Closed taxonomy of emotions detected from voice. Keeping the set fixed
/// keeps phase-transition logic deterministic and the UI's visualization
/// simple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    Neutral,
    Defensive,
    Frustrated,
    Sad,
    Anxious,
    Positive,
}

impl Emotion {
    pub const ALL: [Emotion; 6] = [
        Emotion::Neutral,
        Emotion::Defensive,
        Emotion::Frustrated,
        Emotion::Sad,
        Emotion::Anxious,
        Emotion::Positive,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Defensive => "defensive",
            Emotion::Frustrated => "frustrated",
            Emotion::Sad => "sad",
            Emotion::Anxious => "anxious",
            Emotion::Positive => "positive",
        }
    }

    pub fn from_db(raw: &str) -> Option<Emotion> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "neutral" => Some(Emotion::Neutral),
            "defensive" => Some(Emotion::Defensive),
            "frustrated" => Some(Emotion::Frustrated),
            "sad" => Some(Emotion::Sad),
            "anxious" => Some(Emotion::Anxious),
            "positive" => Some(Emotion::Positive),
            _ => None,
        }
    }

    /// The set that blocks forward progress: defensive, frustrated, sad,
    /// anxious.
    pub fn is_negative(self) -> bool {
        matches!(
            self,
            Emotion::Defensive | Emotion::Frustrated | Emotion::Sad | Emotion::Anxious
        )
    }

    /// Defensiveness proper — resistance to feedback, tracked cumulatively
    /// per session.
    pub fn is_defensive(self) -> bool {
        matches!(self, Emotion::Defensive | Emotion::Frustrated)
    }
}

impl std::fmt::Display for Emotion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Acoustic proxies extracted from one utterance window by the audio
/// pipeline: fundamental frequency, its variance, normalized RMS energy, and
/// speaking tempo relative to baseline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub pitch_hz: f64,
    pub pitch_variance: f64,
    pub energy: f64,
    pub tempo: f64,
}

impl Default for AudioFeatures {
    fn default() -> Self {
        // Baseline speaking values: typical pitch, moderate energy, normal rate.
        Self {
            pitch_hz: 150.0,
            pitch_variance: 25.0,
            energy: 0.5,
            tempo: 1.0,
        }
    }
}

/// Classifier output for one window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmotionReading {
    pub emotion: Emotion,
    pub confidence: f64,
}

/// Immutable record of one classified window, tagged with the phase that was
/// active at detection time. Appended to the session's history, never
/// mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionEvent {
    pub timestamp: DateTime<Utc>,
    pub emotion: Emotion,
    pub confidence: f64,
    pub phase: Phase,
}
