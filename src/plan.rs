use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::transcript::{Speaker, Utterance};

/// A sentence has to carry at least this much text to count as a commitment.
const MIN_GOAL_SENTENCE_LEN: usize = 20;

const START_CUES: &[&str] = &["start", "begin", "initiate"];
const STOP_CUES: &[&str] = &["stop", "quit", "cease", "avoid"];
const CONTINUE_CUES: &[&str] = &["continue", "keep", "maintain"];

const MEASURE_CUES: &[&str] = &[
    "every",
    "each",
    "per week",
    "per day",
    "weekly",
    "daily",
    "once a",
    "twice",
    "within",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalType {
    Start,
    Stop,
    Continue,
}

impl GoalType {
    pub fn as_db_str(self) -> &'static str {
        match self {
            GoalType::Start => "start",
            GoalType::Stop => "stop",
            GoalType::Continue => "continue",
        }
    }

    pub fn from_db(raw: &str) -> Option<GoalType> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "start" => Some(GoalType::Start),
            "stop" => Some(GoalType::Stop),
            "continue" => Some(GoalType::Continue),
            _ => None,
        }
    }
}

/// One development-plan commitment extracted during the coaching phase.
/// After creation only the completion pair may change, and only from
/// incomplete to complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub goal_id: String,
    pub goal_text: String,
    pub goal_type: GoalType,
    pub specific_behavior: String,
    pub measurable_criteria: String,
    pub target_date: Option<NaiveDate>,
    pub action_steps: Vec<String>,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Mark a goal complete. Completion never reverses; marking an already
/// complete goal is a no-op and returns false.
pub fn mark_complete(goal: &mut Goal, at: DateTime<Utc>) -> bool {
    if goal.is_completed {
        return false;
    }
    goal.is_completed = true;
    goal.completed_at = Some(at);
    true
}

/// Lowercased, punctuation-stripped, whitespace-collapsed form used for
/// duplicate detection.
pub fn normalize_goal_text(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extracts structured start/stop/continue goals from the coaching-phase
/// transcript slice. Candidates missing required fields are discarded rather
/// than persisted half-formed, and re-running over the same slice never
/// duplicates goals.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanBuilder;

impl PlanBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Extract validated goal candidates from the slice. Only the user's own
    /// utterances count; the plan has to be theirs, not the coach's.
    pub fn extract(&self, slice: &[Utterance], now: DateTime<Utc>) -> Vec<Goal> {
        let mut goals = Vec::new();
        for utterance in slice.iter().filter(|u| u.speaker == Speaker::User) {
            for sentence in split_sentences(&utterance.text) {
                if let Some(goal) = goal_from_sentence(&sentence, now) {
                    if is_well_formed(&goal) {
                        goals.push(goal);
                    }
                }
            }
        }
        goals
    }

    /// Append candidates to the plan, dropping malformed ones and any whose
    /// normalized text already exists. Returns the goals actually added.
    pub fn merge(&self, plan: &mut Vec<Goal>, candidates: Vec<Goal>) -> Vec<Goal> {
        let mut added = Vec::new();
        for candidate in candidates {
            if !is_well_formed(&candidate) {
                tracing::debug!(
                    goal_text = candidate.goal_text.as_str(),
                    "dropping malformed goal candidate"
                );
                continue;
            }
            let normalized = normalize_goal_text(&candidate.goal_text);
            if plan
                .iter()
                .any(|g| normalize_goal_text(&g.goal_text) == normalized)
            {
                continue;
            }
            plan.push(candidate.clone());
            added.push(candidate);
        }
        added
    }
}

fn is_well_formed(goal: &Goal) -> bool {
    !goal.goal_text.trim().is_empty()
        && !goal.action_steps.is_empty()
        && goal.action_steps.iter().any(|s| !s.trim().is_empty())
}

fn goal_from_sentence(sentence: &str, now: DateTime<Utc>) -> Option<Goal> {
    let trimmed = sentence.trim();
    if trimmed.len() <= MIN_GOAL_SENTENCE_LEN {
        return None;
    }
    let lowered = trimmed.to_lowercase();

    let (goal_type, cue) = detect_goal_type(&lowered)?;

    // The behavior is whatever follows the commitment cue; fall back to the
    // whole sentence when the cue ends it.
    let behavior = match lowered.find(cue) {
        Some(pos) => {
            let after = trimmed[pos + cue.len()..].trim();
            if after.is_empty() {
                trimmed.to_string()
            } else {
                after.to_string()
            }
        }
        None => trimmed.to_string(),
    };

    let measurable = if MEASURE_CUES.iter().any(|m| lowered.contains(m)) {
        behavior.clone()
    } else {
        String::new()
    };

    Some(Goal {
        goal_id: Uuid::new_v4().to_string(),
        goal_text: trimmed.to_string(),
        goal_type,
        specific_behavior: behavior.clone(),
        measurable_criteria: measurable,
        target_date: parse_target_date(&lowered, now),
        action_steps: split_action_steps(&behavior),
        is_completed: false,
        completed_at: None,
    })
}

fn detect_goal_type(lowered: &str) -> Option<(GoalType, &'static str)> {
    for cue in START_CUES {
        if lowered.contains(cue) {
            return Some((GoalType::Start, cue));
        }
    }
    for cue in STOP_CUES {
        if lowered.contains(cue) {
            return Some((GoalType::Stop, cue));
        }
    }
    for cue in CONTINUE_CUES {
        if lowered.contains(cue) {
            return Some((GoalType::Continue, cue));
        }
    }
    None
}

/// "within 2 weeks" style deadlines become a concrete date.
fn parse_target_date(lowered: &str, now: DateTime<Utc>) -> Option<NaiveDate> {
    let re = regex_lite::Regex::new(r"within (\d+) (day|week|month)s?").ok()?;
    let captures = re.captures(lowered)?;
    let count: i64 = captures.get(1)?.as_str().parse().ok()?;
    let days = match captures.get(2)?.as_str() {
        "day" => count,
        "week" => count * 7,
        "month" => count * 30,
        _ => return None,
    };
    Some((now + Duration::days(days)).date_naive())
}

fn split_action_steps(behavior: &str) -> Vec<String> {
    behavior
        .split(|c| c == ';')
        .flat_map(|part| part.split(" and then "))
        .flat_map(|part| part.split(" and "))
        .map(|s| s.trim().trim_end_matches('.').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn split_sentences(text: &str) -> Vec<String> {
    text.split(|c| c == '.' || c == '!' || c == '?')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn user_says(text: &str) -> Vec<Utterance> {
        vec![Utterance {
            speaker: Speaker::User,
            text: text.to_string(),
            timestamp: now(),
        }]
    }

    #[test]
    fn extracts_a_start_goal_with_steps() {
        let slice = user_says(
            "I will start sending a summary email after each meeting and \
             asking one clarifying question before responding.",
        );
        let goals = PlanBuilder::new().extract(&slice, now());
        assert_eq!(goals.len(), 1);
        let goal = &goals[0];
        assert_eq!(goal.goal_type, GoalType::Start);
        assert!(goal.goal_text.contains("summary email"));
        assert_eq!(goal.action_steps.len(), 2);
        assert!(!goal.measurable_criteria.is_empty(), "'each' marks a measure");
        assert!(!goal.is_completed);
    }

    #[test]
    fn detects_stop_and_continue_types() {
        let slice = user_says(
            "I need to stop interrupting people in design reviews. \
             I also want to keep running the weekly one-on-ones.",
        );
        let goals = PlanBuilder::new().extract(&slice, now());
        assert_eq!(goals.len(), 2);
        assert_eq!(goals[0].goal_type, GoalType::Stop);
        assert_eq!(goals[1].goal_type, GoalType::Continue);
    }

    #[test]
    fn coach_utterances_are_ignored() {
        let slice = vec![Utterance {
            speaker: Speaker::Coach,
            text: "You could start delegating one task per week to the team.".to_string(),
            timestamp: now(),
        }];
        assert!(PlanBuilder::new().extract(&slice, now()).is_empty());
    }

    #[test]
    fn short_or_typeless_sentences_are_skipped() {
        let slice = user_says("I'll start now. That feedback was interesting to read through.");
        assert!(PlanBuilder::new().extract(&slice, now()).is_empty());
    }

    #[test]
    fn extraction_is_idempotent_under_merge() {
        let builder = PlanBuilder::new();
        let slice = user_says("I'm going to start blocking two hours for deep work every morning.");

        let mut plan = Vec::new();
        let first = builder.merge(&mut plan, builder.extract(&slice, now()));
        assert_eq!(first.len(), 1);

        let second = builder.merge(&mut plan, builder.extract(&slice, now()));
        assert!(second.is_empty());
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn malformed_goals_are_dropped_silently() {
        let builder = PlanBuilder::new();
        let mut plan = Vec::new();
        let empty_text = Goal {
            goal_id: Uuid::new_v4().to_string(),
            goal_text: "   ".to_string(),
            goal_type: GoalType::Start,
            specific_behavior: "something".to_string(),
            measurable_criteria: String::new(),
            target_date: None,
            action_steps: vec!["a step".to_string()],
            is_completed: false,
            completed_at: None,
        };
        let no_steps = Goal {
            goal_text: "Start doing retros with the team".to_string(),
            action_steps: Vec::new(),
            ..empty_text.clone()
        };
        assert!(builder
            .merge(&mut plan, vec![empty_text, no_steps])
            .is_empty());
        assert!(plan.is_empty());
    }

    #[test]
    fn within_deadlines_become_target_dates() {
        let slice = user_says("I'll start shadowing the support rotation within 2 weeks of today.");
        let goals = PlanBuilder::new().extract(&slice, now());
        assert_eq!(goals.len(), 1);
        let expected = (now() + Duration::days(14)).date_naive();
        assert_eq!(goals[0].target_date, Some(expected));
    }

    #[test]
    fn completion_only_moves_forward() {
        let mut goal = Goal {
            goal_id: Uuid::new_v4().to_string(),
            goal_text: "Start weekly summaries".to_string(),
            goal_type: GoalType::Start,
            specific_behavior: "weekly summaries".to_string(),
            measurable_criteria: "weekly".to_string(),
            target_date: None,
            action_steps: vec!["write the summary".to_string()],
            is_completed: false,
            completed_at: None,
        };
        assert!(mark_complete(&mut goal, now()));
        assert!(goal.is_completed);
        let first_completion = goal.completed_at;

        assert!(!mark_complete(&mut goal, now() + Duration::seconds(60)));
        assert_eq!(goal.completed_at, first_completion);
    }
}
