use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Coach,
}

impl Speaker {
    pub fn as_str(self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Coach => "coach",
        }
    }
}

/// One speaker-tagged utterance in the session transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utterance {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Ordered, append-only transcript for one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    entries: Vec<Utterance>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, utterance: Utterance) {
        self.entries.push(utterance);
    }

    pub fn entries(&self) -> &[Utterance] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Slice of the transcript starting at `index` (clamped to the end).
    /// Used for per-phase views: callers remember the length at phase entry.
    pub fn since(&self, index: usize) -> &[Utterance] {
        &self.entries[index.min(self.entries.len())..]
    }

    /// The most recent `count` utterances, oldest first.
    pub fn tail(&self, count: usize) -> &[Utterance] {
        let start = self.entries.len().saturating_sub(count);
        &self.entries[start..]
    }

    /// Render a plain-text context block for the language model.
    pub fn render_context(&self, max_utterances: usize) -> String {
        self.tail(max_utterances)
            .iter()
            .map(|u| format!("{}: {}", u.speaker.as_str(), u.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utterance(speaker: Speaker, text: &str, secs: i64) -> Utterance {
        Utterance {
            speaker,
            text: text.to_string(),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn since_clamps_past_the_end() {
        let mut transcript = Transcript::new();
        transcript.push(utterance(Speaker::User, "hello", 0));
        assert_eq!(transcript.since(0).len(), 1);
        assert!(transcript.since(5).is_empty());
    }

    #[test]
    fn render_context_keeps_most_recent() {
        let mut transcript = Transcript::new();
        transcript.push(utterance(Speaker::User, "first", 0));
        transcript.push(utterance(Speaker::Coach, "second", 1));
        transcript.push(utterance(Speaker::User, "third", 2));

        let context = transcript.render_context(2);
        assert!(!context.contains("first"));
        assert!(context.contains("coach: second"));
        assert!(context.contains("user: third"));
    }
}
