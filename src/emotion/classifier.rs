use crate::config::ClassifierThresholds;

use super::{AudioFeatures, Emotion, EmotionReading};

/// Confidence reported when there is nothing to classify at all.
const EMPTY_WINDOW_CONFIDENCE: f64 = 0.2;
/// Weight added to an emotion's score per matched lexical cue family.
const LEXICAL_WEIGHT: f64 = 0.3;

/// Lexical cue families, matched case-insensitively against the transcribed
/// utterance. Substring matching on purpose: "frustrat" covers frustrated,
/// frustrating, frustration.
const DEFENSIVE_CUES: &[&str] = &[
    "not fair",
    "unfair",
    "that's not true",
    "not true",
    "they don't understand",
    "wrong about me",
    "ridiculous",
    "i don't accept",
];

const FRUSTRATED_CUES: &[&str] = &["frustrat", "annoying", "sick of", "fed up", "stuck"];

const SAD_CUES: &[&str] = &["sad", "hurt", "disappoint", "painful", "upset me"];

const ANXIOUS_CUES: &[&str] = &[
    "worried",
    "anxious",
    "nervous",
    "scared",
    "overwhelm",
    "afraid",
];

const POSITIVE_CUES: &[&str] = &[
    "makes sense",
    "good point",
    "i appreciate",
    "helpful",
    "thank",
    "i can work with",
];

/// Heuristic emotion classifier over acoustic features and lexical content.
///
/// Stateless: each call is a pure function of the window. Scores each of the
/// six emotions additively against the configured thresholds and picks the
/// highest; a weak overall signal degrades to low-confidence neutral rather
/// than failing.
#[derive(Debug, Clone)]
pub struct EmotionClassifier {
    thresholds: ClassifierThresholds,
}

impl EmotionClassifier {
    pub fn new(thresholds: ClassifierThresholds) -> Self {
        Self { thresholds }
    }

    /// Classify one utterance window. Either input may be absent/empty; with
    /// no usable signal at all this returns neutral with confidence well
    /// under the minimum, never an error.
    pub fn classify(&self, features: Option<&AudioFeatures>, text: &str) -> EmotionReading {
        let text = text.trim();
        if features.is_none() && text.is_empty() {
            return EmotionReading {
                emotion: Emotion::Neutral,
                confidence: EMPTY_WINDOW_CONFIDENCE,
            };
        }

        let mut scores = [0.0f64; Emotion::ALL.len()];

        if let Some(features) = features {
            self.score_acoustic(features, &mut scores);
        }
        if !text.is_empty() {
            score_lexical(text, &mut scores);
        }

        // First-encountered label wins ties, so classification is stable
        // under equal scores.
        let mut best = Emotion::Neutral;
        let mut best_score = f64::MIN;
        for (emotion, score) in Emotion::ALL.iter().zip(scores.iter()) {
            if *score > best_score {
                best = *emotion;
                best_score = *score;
            }
        }

        if best_score < self.thresholds.min_confidence {
            return EmotionReading {
                emotion: Emotion::Neutral,
                confidence: self.thresholds.min_confidence,
            };
        }

        EmotionReading {
            emotion: best,
            confidence: best_score.min(1.0),
        }
    }

    fn score_acoustic(&self, features: &AudioFeatures, scores: &mut [f64; 6]) {
        let t = &self.thresholds;
        let pitch_variance = features.pitch_variance;
        let energy = features.energy;
        let tempo = features.tempo;

        // Defensive: agitated pitch, fast speech, raised energy.
        if pitch_variance > t.pitch_variance_high {
            scores[idx(Emotion::Defensive)] += 0.4;
        }
        if tempo > t.tempo_fast {
            scores[idx(Emotion::Defensive)] += 0.3;
        }
        if energy > t.energy_high {
            scores[idx(Emotion::Defensive)] += 0.3;
        }

        // Frustrated: elevated energy, irregular tempo, moderate-high variance.
        if energy > t.energy_high {
            scores[idx(Emotion::Frustrated)] += 0.4;
        }
        if pitch_variance > t.pitch_variance_high * 0.7 {
            scores[idx(Emotion::Frustrated)] += 0.3;
        }
        if tempo > t.tempo_fast * 0.9 || tempo < t.tempo_slow * 1.1 {
            scores[idx(Emotion::Frustrated)] += 0.3;
        }

        // Sad: flat, quiet, slow.
        if energy < t.energy_low {
            scores[idx(Emotion::Sad)] += 0.4;
        }
        if tempo < t.tempo_slow {
            scores[idx(Emotion::Sad)] += 0.3;
        }
        if pitch_variance < t.pitch_variance_low {
            scores[idx(Emotion::Sad)] += 0.3;
        }

        // Anxious: high variance, hurried, somewhat loud.
        if pitch_variance > t.pitch_variance_high {
            scores[idx(Emotion::Anxious)] += 0.4;
        }
        if tempo > t.tempo_fast {
            scores[idx(Emotion::Anxious)] += 0.3;
        }
        if energy > t.energy_high * 0.8 {
            scores[idx(Emotion::Anxious)] += 0.3;
        }

        // Positive: engaged but steady.
        if energy > t.energy_low && energy < t.energy_high {
            scores[idx(Emotion::Positive)] += 0.3;
        }
        if tempo > t.tempo_slow * 1.2 && tempo < t.tempo_fast * 0.9 {
            scores[idx(Emotion::Positive)] += 0.4;
        }
        if pitch_variance > t.pitch_variance_low && pitch_variance < t.pitch_variance_high * 0.8 {
            scores[idx(Emotion::Positive)] += 0.3;
        }

        // Neutral: everything near baseline.
        if energy > t.energy_low * 1.2
            && energy < t.energy_high * 0.8
            && tempo > t.tempo_slow * 1.1
            && tempo < t.tempo_fast * 0.9
            && pitch_variance < t.pitch_variance_high * 0.6
        {
            scores[idx(Emotion::Neutral)] += 0.5;
        }
    }
}

fn score_lexical(text: &str, scores: &mut [f64; 6]) {
    let lowered = text.to_lowercase();
    let families = [
        (Emotion::Defensive, DEFENSIVE_CUES),
        (Emotion::Frustrated, FRUSTRATED_CUES),
        (Emotion::Sad, SAD_CUES),
        (Emotion::Anxious, ANXIOUS_CUES),
        (Emotion::Positive, POSITIVE_CUES),
    ];
    for (emotion, cues) in families {
        if cues.iter().any(|cue| lowered.contains(cue)) {
            scores[idx(emotion)] += LEXICAL_WEIGHT;
        }
    }
}

fn idx(emotion: Emotion) -> usize {
    match emotion {
        Emotion::Neutral => 0,
        Emotion::Defensive => 1,
        Emotion::Frustrated => 2,
        Emotion::Sad => 3,
        Emotion::Anxious => 4,
        Emotion::Positive => 5,
    }
}
