use serde::{Deserialize, Serialize};

use crate::emotion::Emotion;
use crate::phase::Phase;

/// Ignore stored feedback comments shorter than this when scanning for
/// verbatim disclosure; tiny fragments match too easily.
const MIN_QUOTE_LEN: usize = 12;

/// Why a proposed reply was rejected. All recoverable: the orchestrator
/// regenerates or falls back, the user never sees these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Raw feedback content surfaced before the reaction phase produced
    /// enough emotional readiness.
    PrematureContentDisclosure,
    /// The speaker's last emotion was negative and the reply contains no
    /// recognized validation language.
    MissingEmotionalValidation,
    /// Coaching replies stopped referencing concrete action or goal
    /// language after the grace turns.
    InsufficientActionOrientation,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::PrematureContentDisclosure => "premature_content_disclosure",
            RejectReason::MissingEmotionalValidation => "missing_emotional_validation",
            RejectReason::InsufficientActionOrientation => "insufficient_action_orientation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(RejectReason),
}

const VALIDATION_PHRASES: &[&str] = &[
    "makes sense",
    "i hear",
    "i'm hearing",
    "it sounds like",
    "understandable",
    "completely natural",
    "i can understand",
    "it's okay to feel",
    "that's okay",
    "take your time",
    "no rush",
    "sit with that",
];

const ACTION_MARKERS: &[&str] = &[
    "goal",
    "start",
    "stop",
    "continue",
    "plan",
    "step",
    "commit",
    "specific",
    "measure",
    "by when",
    "this week",
    "track",
];

/// Markers that only the content-phase prompt formatting produces. A reply
/// carrying one of these during reaction is echoing feedback detail it
/// should not have.
const DISCLOSURE_PATTERNS: &[&str] = &[
    r"\[(STRENGTH|IMPROVEMENT|NEUTRAL)\]",
    r"mentioned \d+ times",
    r#""[^"]{40,}""#,
];

/// Screens the language model's proposed reply against the rules of the
/// current phase before it reaches the user.
#[derive(Debug, Clone)]
pub struct ResponseValidator {
    /// Lowercased raw feedback comments; quoting any of these during the
    /// reaction phase is a disclosure.
    feedback_quotes: Vec<String>,
    coaching_grace_turns: u32,
}

impl ResponseValidator {
    pub fn new(raw_comments: &[String], coaching_grace_turns: u32) -> Self {
        Self {
            feedback_quotes: raw_comments
                .iter()
                .map(|c| c.trim().to_lowercase())
                .filter(|c| c.len() >= MIN_QUOTE_LEN)
                .collect(),
            coaching_grace_turns,
        }
    }

    /// Check one proposed reply. `coaching_turns` counts accepted coach
    /// replies since the coaching phase began.
    pub fn check(
        &self,
        reply: &str,
        phase: Phase,
        last_emotion: Option<Emotion>,
        coaching_turns: u32,
    ) -> Verdict {
        match phase {
            Phase::Reaction => self.check_reaction(reply, last_emotion),
            Phase::Coaching => self.check_coaching(reply, coaching_turns),
            Phase::Relationship | Phase::Content => Verdict::Accept,
        }
    }

    fn check_reaction(&self, reply: &str, last_emotion: Option<Emotion>) -> Verdict {
        if self.discloses_content(reply) {
            return Verdict::Reject(RejectReason::PrematureContentDisclosure);
        }

        let needs_validation = last_emotion.map(|e| e.is_negative()).unwrap_or(false);
        if needs_validation && !contains_validation_phrase(reply) {
            return Verdict::Reject(RejectReason::MissingEmotionalValidation);
        }

        Verdict::Accept
    }

    fn check_coaching(&self, reply: &str, coaching_turns: u32) -> Verdict {
        if coaching_turns < self.coaching_grace_turns {
            return Verdict::Accept;
        }
        let lowered = reply.to_lowercase();
        if ACTION_MARKERS.iter().any(|m| lowered.contains(m)) {
            return Verdict::Accept;
        }
        Verdict::Reject(RejectReason::InsufficientActionOrientation)
    }

    fn discloses_content(&self, reply: &str) -> bool {
        let lowered = reply.to_lowercase();
        if self
            .feedback_quotes
            .iter()
            .any(|quote| lowered.contains(quote.as_str()))
        {
            return true;
        }

        for pattern in DISCLOSURE_PATTERNS {
            if let Ok(re) = regex_lite::Regex::new(pattern) {
                if re.is_match(reply) {
                    return true;
                }
            }
        }
        false
    }
}

fn contains_validation_phrase(reply: &str) -> bool {
    let lowered = reply.to_lowercase();
    VALIDATION_PHRASES.iter().any(|p| lowered.contains(p))
}
