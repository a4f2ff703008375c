use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PhaseDurations;
use crate::error::CoachError;
use crate::transcript::{Speaker, Utterance};

/// The four phases of the R2C2 feedback framework, in session order.
/// A session never revisits an earlier phase; coaching is terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Relationship,
    Reaction,
    Content,
    Coaching,
}

impl Phase {
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Relationship => Some(Phase::Reaction),
            Phase::Reaction => Some(Phase::Content),
            Phase::Content => Some(Phase::Coaching),
            Phase::Coaching => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Relationship => "relationship",
            Phase::Reaction => "reaction",
            Phase::Content => "content",
            Phase::Coaching => "coaching",
        }
    }

    pub fn from_db(raw: &str) -> Option<Phase> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "relationship" => Some(Phase::Relationship),
            "reaction" => Some(Phase::Reaction),
            "content" => Some(Phase::Content),
            "coaching" => Some(Phase::Coaching),
            _ => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caused a phase transition to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionTrigger {
    /// Minimum dwell time elapsed with no readiness gate on the phase.
    TimeElapsed,
    /// Minimum dwell time elapsed and the phase's readiness gate held.
    EmotionalReadiness,
    /// An explicit external request advanced the phase.
    Manual,
    /// The hard ceiling (twice the minimum dwell) was reached; time always
    /// eventually overrides an emotional block.
    ForcedTimeout,
}

impl TransitionTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            TransitionTrigger::TimeElapsed => "time-elapsed",
            TransitionTrigger::EmotionalReadiness => "emotional-readiness",
            TransitionTrigger::Manual => "manual",
            TransitionTrigger::ForcedTimeout => "forced-timeout",
        }
    }

    pub fn from_db(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "time-elapsed" => Some(TransitionTrigger::TimeElapsed),
            "emotional-readiness" => Some(TransitionTrigger::EmotionalReadiness),
            "manual" => Some(TransitionTrigger::Manual),
            "forced-timeout" => Some(TransitionTrigger::ForcedTimeout),
            _ => None,
        }
    }
}

/// Immutable record of one phase change. Appended to the transition log and
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from_phase: Phase,
    pub to_phase: Phase,
    pub timestamp: DateTime<Utc>,
    pub time_in_previous_phase: f64,
    pub trigger: TransitionTrigger,
}

/// Readiness inputs assembled by the orchestrator for one evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadinessSignals {
    /// `EmotionHistory::is_improving` over the recent events.
    pub emotionally_improving: bool,
    /// Defensive/frustrated events increased in the trailing window compared
    /// to the window before it.
    pub defensiveness_rising: bool,
    /// The content-phase engagement predicate passed.
    pub content_engaged: bool,
}

/// Predicate gating content -> coaching. The surrounding system can plug in
/// stronger NLU; the time ceiling overrides whatever it returns.
pub trait ContentReadiness: Send + Sync {
    fn is_ready(&self, since_phase_entry: &[Utterance]) -> bool;
}

/// Default engagement heuristic: enough user utterances since entering the
/// content phase, or explicit readiness language.
#[derive(Debug, Clone)]
pub struct EngagementHeuristic {
    pub min_utterances: usize,
}

const READINESS_LANGUAGE: &[&str] = &[
    "what should i do",
    "what do i do about",
    "i'm ready",
    "ready to move on",
    "let's move on",
    "makes sense now",
    "i can see what they mean",
    "i see their point",
];

impl ContentReadiness for EngagementHeuristic {
    fn is_ready(&self, since_phase_entry: &[Utterance]) -> bool {
        let user_turns = since_phase_entry
            .iter()
            .filter(|u| u.speaker == Speaker::User)
            .count();
        if user_turns >= self.min_utterances {
            return true;
        }

        since_phase_entry
            .iter()
            .filter(|u| u.speaker == Speaker::User)
            .any(|u| {
                let text = u.text.to_lowercase();
                READINESS_LANGUAGE.iter().any(|phrase| text.contains(phrase))
            })
    }
}

/// Owns the current phase, elapsed-time accounting, and the transition rules
/// combining minimum dwell with readiness signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseMachine {
    current: Phase,
    phase_start: DateTime<Utc>,
    durations: PhaseDurations,
    transitions: Vec<PhaseTransition>,
}

impl PhaseMachine {
    pub fn new(durations: PhaseDurations, started_at: DateTime<Utc>) -> Self {
        Self {
            current: Phase::Relationship,
            phase_start: started_at,
            durations,
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> Phase {
        self.current
    }

    pub fn phase_started_at(&self) -> DateTime<Utc> {
        self.phase_start
    }

    pub fn transitions(&self) -> &[PhaseTransition] {
        &self.transitions
    }

    /// Seconds spent in the current phase as of `now`.
    pub fn time_in_phase(&self, now: DateTime<Utc>) -> f64 {
        (now - self.phase_start).num_milliseconds().max(0) as f64 / 1000.0
    }

    fn min_dwell_s(&self, phase: Phase) -> u64 {
        match phase {
            Phase::Relationship => self.durations.relationship_min_s,
            Phase::Reaction => self.durations.reaction_min_s,
            Phase::Content => self.durations.content_min_s,
            Phase::Coaching => self.durations.coaching_min_s,
        }
    }

    /// Hard ceiling after which the next transition fires regardless of
    /// readiness.
    fn ceiling_s(&self, phase: Phase) -> u64 {
        self.min_dwell_s(phase).saturating_mul(2)
    }

    /// Evaluate the transition rule for the current phase. Fires when the
    /// minimum dwell has elapsed and the phase's readiness condition holds,
    /// or unconditionally once the hard ceiling is reached. Returns the
    /// transition record if one fired.
    pub fn evaluate(
        &mut self,
        now: DateTime<Utc>,
        signals: &ReadinessSignals,
    ) -> Option<PhaseTransition> {
        let next = self.current.next()?;
        let elapsed = self.time_in_phase(now);

        let (ready, trigger) = match self.current {
            // Rapport-building has no measurable emotional gate.
            Phase::Relationship => (true, TransitionTrigger::TimeElapsed),
            Phase::Reaction => (
                signals.emotionally_improving || !signals.defensiveness_rising,
                TransitionTrigger::EmotionalReadiness,
            ),
            Phase::Content => (
                signals.content_engaged,
                TransitionTrigger::EmotionalReadiness,
            ),
            Phase::Coaching => unreachable!("coaching has no next phase"),
        };

        if ready && elapsed >= self.min_dwell_s(self.current) as f64 {
            return Some(self.advance(next, now, elapsed, trigger));
        }

        // The ceiling overrides an emotional block; a phase can stall, but
        // not indefinitely.
        if elapsed >= self.ceiling_s(self.current) as f64 {
            return Some(self.advance(next, now, elapsed, TransitionTrigger::ForcedTimeout));
        }

        None
    }

    /// Explicit transition request (e.g. an operator control). Only the
    /// immediate next phase is legal; anything else is rejected, never
    /// clamped.
    pub fn request_transition(
        &mut self,
        to: Phase,
        now: DateTime<Utc>,
    ) -> Result<PhaseTransition, CoachError> {
        if self.current.next() != Some(to) {
            return Err(CoachError::InvalidTransition {
                from: self.current,
                to,
            });
        }
        let elapsed = self.time_in_phase(now);
        Ok(self.advance(to, now, elapsed, TransitionTrigger::Manual))
    }

    fn advance(
        &mut self,
        to: Phase,
        now: DateTime<Utc>,
        elapsed: f64,
        trigger: TransitionTrigger,
    ) -> PhaseTransition {
        tracing::info!(
            from = self.current.as_str(),
            to = to.as_str(),
            trigger = trigger.as_str(),
            seconds_in_phase = elapsed,
            "phase transition"
        );
        let transition = PhaseTransition {
            from_phase: self.current,
            to_phase: to,
            timestamp: now,
            time_in_previous_phase: elapsed,
            trigger,
        };
        self.transitions.push(transition.clone());
        self.current = to;
        self.phase_start = now;
        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn start_time() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn machine() -> PhaseMachine {
        PhaseMachine::new(PhaseDurations::default(), start_time())
    }

    #[test]
    fn phases_are_ordered() {
        assert!(Phase::Relationship < Phase::Reaction);
        assert!(Phase::Reaction < Phase::Content);
        assert!(Phase::Content < Phase::Coaching);
        assert_eq!(Phase::Coaching.next(), None);
    }

    #[test]
    fn no_transition_before_minimum_dwell() {
        let mut machine = machine();
        let now = start_time() + Duration::seconds(119);
        assert!(machine
            .evaluate(now, &ReadinessSignals::default())
            .is_none());
        assert_eq!(machine.current(), Phase::Relationship);
    }

    #[test]
    fn relationship_advances_on_dwell_alone() {
        let mut machine = machine();
        let now = start_time() + Duration::seconds(125);
        let transition = machine
            .evaluate(now, &ReadinessSignals::default())
            .expect("transition fires")
            .clone();
        assert_eq!(transition.from_phase, Phase::Relationship);
        assert_eq!(transition.to_phase, Phase::Reaction);
        assert_eq!(transition.trigger, TransitionTrigger::TimeElapsed);
        assert!(transition.time_in_previous_phase >= 120.0);
    }

    #[test]
    fn reaction_blocked_while_defensiveness_rises() {
        let mut machine = machine();
        machine
            .request_transition(Phase::Reaction, start_time())
            .expect("manual advance");

        let blocked = ReadinessSignals {
            emotionally_improving: false,
            defensiveness_rising: true,
            content_engaged: false,
        };
        let now = start_time() + Duration::seconds(200);
        assert!(machine.evaluate(now, &blocked).is_none());

        // Improvement unblocks it.
        let improving = ReadinessSignals {
            emotionally_improving: true,
            ..blocked
        };
        let transition = machine
            .evaluate(now, &improving)
            .expect("readiness transition");
        assert_eq!(transition.trigger, TransitionTrigger::EmotionalReadiness);
    }

    #[test]
    fn ceiling_overrides_blocked_readiness() {
        let mut machine = machine();
        machine
            .request_transition(Phase::Reaction, start_time())
            .expect("manual advance");

        let blocked = ReadinessSignals {
            emotionally_improving: false,
            defensiveness_rising: true,
            content_engaged: false,
        };
        // 2x the 180s reaction minimum.
        let now = start_time() + Duration::seconds(360);
        let transition = machine
            .evaluate(now, &blocked)
            .expect("forced transition")
            .clone();
        assert_eq!(transition.to_phase, Phase::Content);
        assert_eq!(transition.trigger, TransitionTrigger::ForcedTimeout);
    }

    #[test]
    fn coaching_is_terminal() {
        let mut machine = machine();
        let mut now = start_time();
        for phase in [Phase::Reaction, Phase::Content, Phase::Coaching] {
            now += Duration::seconds(1);
            machine.request_transition(phase, now).expect("advance");
        }
        now += Duration::seconds(100_000);
        assert!(machine
            .evaluate(now, &ReadinessSignals::default())
            .is_none());
        assert_eq!(machine.current(), Phase::Coaching);
    }

    #[test]
    fn transition_log_is_monotonic() {
        let mut machine = machine();
        let mut now = start_time();
        for _ in 0..3 {
            now += Duration::seconds(100_000);
            machine.evaluate(now, &ReadinessSignals::default());
        }
        let phases: Vec<Phase> = machine
            .transitions()
            .iter()
            .map(|t| t.to_phase)
            .collect();
        let mut sorted = phases.clone();
        sorted.sort();
        assert_eq!(phases, sorted);
        assert_eq!(machine.current(), Phase::Coaching);
    }

    #[test]
    fn backward_request_is_rejected() {
        let mut machine = machine();
        machine
            .request_transition(Phase::Reaction, start_time())
            .expect("advance");
        let err = machine
            .request_transition(Phase::Relationship, start_time())
            .expect_err("backward transition must fail");
        assert!(matches!(err, CoachError::InvalidTransition { .. }));
        assert_eq!(machine.current(), Phase::Reaction);
    }

    #[test]
    fn skipping_a_phase_is_rejected() {
        let mut machine = machine();
        let err = machine
            .request_transition(Phase::Coaching, start_time())
            .expect_err("skip must fail");
        assert!(matches!(
            err,
            CoachError::InvalidTransition {
                from: Phase::Relationship,
                to: Phase::Coaching
            }
        ));
    }

    #[test]
    fn engagement_heuristic_counts_user_turns() {
        let heuristic = EngagementHeuristic { min_utterances: 2 };
        let turns = vec![
            Utterance {
                speaker: Speaker::User,
                text: "I keep hearing about delegation".to_string(),
                timestamp: start_time(),
            },
            Utterance {
                speaker: Speaker::Coach,
                text: "What do you make of that?".to_string(),
                timestamp: start_time(),
            },
        ];
        assert!(!heuristic.is_ready(&turns));

        let mut more = turns.clone();
        more.push(Utterance {
            speaker: Speaker::User,
            text: "Honestly, what should I do about it?".to_string(),
            timestamp: start_time(),
        });
        // Second user turn matches both the count and the readiness language.
        assert!(heuristic.is_ready(&more));
    }
}
