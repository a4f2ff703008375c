use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{CoachConfig, PhaseDurations};
use crate::emotion::{
    AudioFeatures, Emotion, EmotionClassifier, EmotionEvent, EmotionHistory, EmotionJourney,
    EmotionReading,
};
use crate::database::SessionStore;
use crate::error::CoachError;
use crate::feedback::FeedbackReport;
use crate::llm::LanguageModel;
use crate::phase::{
    ContentReadiness, EngagementHeuristic, Phase, PhaseMachine, PhaseTransition, ReadinessSignals,
};
use crate::plan::{Goal, PlanBuilder};
use crate::prompts::{fallback_line, PromptContext, PromptSelector};
use crate::transcript::{Speaker, Transcript, Utterance};
use crate::validator::{ResponseValidator, Verdict};

/// Keyword families the content phase listens for when tracking which
/// development themes the user is actually engaging with.
const CONTENT_THEME_KEYWORDS: &[&str] = &[
    "communication",
    "leadership",
    "collaboration",
    "feedback",
    "delegation",
    "listening",
    "empathy",
    "decision-making",
    "accountability",
    "follow-through",
    "organization",
    "planning",
];

/// Coaching-phase closing signals. Only honored once the plan has at least
/// one goal.
const COMPLETION_LANGUAGE: &[&str] = &[
    "i'm done",
    "i am done",
    "that's all",
    "that is all",
    "we're done",
    "nothing else",
    "that works for me",
    "sounds good, thanks",
    "thanks, that's helpful",
];

/// How much transcript the model sees per turn.
const CONTEXT_UTTERANCES: usize = 12;

/// Lifecycle of one orchestrated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionLifecycle {
    Idle,
    Active,
    Summarizing,
    Ended,
}

impl SessionLifecycle {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionLifecycle::Idle => "idle",
            SessionLifecycle::Active => "active",
            SessionLifecycle::Summarizing => "summarizing",
            SessionLifecycle::Ended => "ended",
        }
    }
}

/// Tagged egress events. Any consumer model works — poll the channel,
/// forward to a websocket, or fan out over a broadcast.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SessionEvent {
    EmotionDetected {
        emotion: Emotion,
        confidence: f64,
        timestamp: DateTime<Utc>,
        phase: Phase,
    },
    PhaseTransition {
        from_phase: Phase,
        to_phase: Phase,
        timestamp: DateTime<Utc>,
        time_in_previous_phase: f64,
    },
    Dialogue {
        speaker: Speaker,
        text: String,
        timestamp: DateTime<Utc>,
    },
    PlanUpdated {
        goals: Vec<Goal>,
    },
    SessionEnded {
        summary: SessionSummary,
    },
}

/// One utterance arriving from the audio/transport collaborator.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingUtterance {
    pub speaker: Speaker,
    pub text: String,
    #[serde(default)]
    pub audio_features: Option<AudioFeatures>,
    pub timestamp: DateTime<Utc>,
}

/// What one orchestrated turn produced.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub reply: String,
    pub phase: Phase,
    pub emotion: EmotionReading,
    pub transition: Option<PhaseTransition>,
    /// Set when this turn finalized the session.
    pub summary: Option<SessionSummary>,
}

/// Result of a timer-driven re-evaluation with no new utterance.
#[derive(Debug, Clone, Default)]
pub struct TickOutcome {
    pub transition: Option<PhaseTransition>,
    pub summary: Option<SessionSummary>,
}

/// The mutable aggregate for one coaching session. The orchestrator is the
/// sole mutator; everything here serializes for snapshot persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub user_id: String,
    pub lifecycle: SessionLifecycle,
    pub started_at: DateTime<Utc>,
    pub phases: PhaseMachine,
    /// Cumulative across the whole session; never reset on transition.
    pub defensive_reaction_count: u32,
    pub emotions: EmotionHistory,
    /// Read-only during the session.
    pub feedback: FeedbackReport,
    pub transcript: Transcript,
    /// What the user said while in the reaction phase.
    pub reactions: Vec<String>,
    /// Themes the user engaged with during the content phase.
    pub content_themes: Vec<String>,
    /// Empty until the coaching phase produces output.
    pub development_plan: Vec<Goal>,
    /// Transcript length when the current phase was entered.
    pub phase_entry_index: usize,
    /// Accepted coach replies since coaching began.
    pub coaching_turns: u32,
}

impl SessionState {
    pub fn new(
        user_id: String,
        feedback: FeedbackReport,
        durations: PhaseDurations,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            user_id,
            lifecycle: SessionLifecycle::Idle,
            started_at,
            phases: PhaseMachine::new(durations, started_at),
            defensive_reaction_count: 0,
            emotions: EmotionHistory::new(),
            feedback,
            transcript: Transcript::new(),
            reactions: Vec::new(),
            content_themes: Vec::new(),
            development_plan: Vec::new(),
            phase_entry_index: 0,
            coaching_turns: 0,
        }
    }
}

/// Final statistics handed to persistence when a session ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub final_phase: Phase,
    pub phases_completed: Vec<Phase>,
    pub phase_durations: BTreeMap<String, f64>,
    pub emotional_journey: EmotionJourney,
    pub reactions_explored: usize,
    pub content_themes_discussed: Vec<String>,
    pub defensive_reaction_count: u32,
    pub goals: Vec<Goal>,
    pub key_insights: Vec<String>,
}

/// Wires the whole pipeline together per turn: classify, record, evaluate
/// the phase transition, select the prompt, drive the model, validate, emit
/// events, persist. Strictly sequential: one utterance is fully processed
/// before the next is accepted.
pub struct SessionOrchestrator {
    state: SessionState,
    classifier: EmotionClassifier,
    prompts: PromptSelector,
    validator: ResponseValidator,
    plan_builder: PlanBuilder,
    readiness: Box<dyn ContentReadiness>,
    model: Arc<dyn LanguageModel>,
    store: Arc<dyn SessionStore>,
    events: flume::Sender<SessionEvent>,
    emotion_window_s: u64,
    readiness_window_s: u64,
    max_session_s: u64,
    max_reply_attempts: u32,
}

impl SessionOrchestrator {
    /// Start a fresh session and persist its initial record.
    pub fn start(
        config: &CoachConfig,
        user_id: String,
        feedback: FeedbackReport,
        model: Arc<dyn LanguageModel>,
        store: Arc<dyn SessionStore>,
        events: flume::Sender<SessionEvent>,
        now: DateTime<Utc>,
    ) -> Result<Self, CoachError> {
        let state = SessionState::new(user_id, feedback, config.phases, now);
        store.create_session(&state)?;
        tracing::info!(session_id = state.session_id.as_str(), "session created");
        Ok(Self::assemble(config, state, model, store, events))
    }

    /// Resume from a persisted snapshot (reconnection).
    pub fn resume(
        config: &CoachConfig,
        state: SessionState,
        model: Arc<dyn LanguageModel>,
        store: Arc<dyn SessionStore>,
        events: flume::Sender<SessionEvent>,
    ) -> Self {
        tracing::info!(
            session_id = state.session_id.as_str(),
            phase = state.phases.current().as_str(),
            "session resumed"
        );
        Self::assemble(config, state, model, store, events)
    }

    fn assemble(
        config: &CoachConfig,
        state: SessionState,
        model: Arc<dyn LanguageModel>,
        store: Arc<dyn SessionStore>,
        events: flume::Sender<SessionEvent>,
    ) -> Self {
        let validator = ResponseValidator::new(
            &state.feedback.raw_comment_texts(),
            config.coaching_grace_turns,
        );
        Self {
            state,
            classifier: EmotionClassifier::new(config.classifier),
            prompts: PromptSelector::new(),
            validator,
            plan_builder: PlanBuilder::new(),
            readiness: Box::new(EngagementHeuristic {
                min_utterances: config.min_content_utterances,
            }),
            model,
            store,
            events,
            emotion_window_s: config.emotion_window_s,
            readiness_window_s: config.readiness_window_s,
            max_session_s: config.max_session_s,
            max_reply_attempts: config.max_reply_attempts,
        }
    }

    /// Swap in a different content-readiness predicate.
    pub fn with_readiness(mut self, readiness: Box<dyn ContentReadiness>) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn session_id(&self) -> &str {
        &self.state.session_id
    }

    /// Process one user utterance end to end.
    pub async fn handle_utterance(
        &mut self,
        utterance: IncomingUtterance,
    ) -> Result<TurnOutcome, CoachError> {
        match self.state.lifecycle {
            SessionLifecycle::Idle => {
                self.state.lifecycle = SessionLifecycle::Active;
                tracing::info!(
                    session_id = self.state.session_id.as_str(),
                    "session active"
                );
            }
            SessionLifecycle::Active => {}
            SessionLifecycle::Summarizing | SessionLifecycle::Ended => {
                return Err(CoachError::SessionNotActive {
                    session_id: self.state.session_id.clone(),
                });
            }
        }

        let now = utterance.timestamp;

        if self.session_expired(now) {
            let summary = self.finalize(now)?;
            return Ok(TurnOutcome {
                reply: closing_line().to_string(),
                phase: self.state.phases.current(),
                emotion: EmotionReading {
                    emotion: Emotion::Neutral,
                    confidence: 0.0,
                },
                transition: None,
                summary: Some(summary),
            });
        }

        // Classify and record the emotional read for this window.
        let reading = self
            .classifier
            .classify(utterance.audio_features.as_ref(), &utterance.text);
        let event = EmotionEvent {
            timestamp: now,
            emotion: reading.emotion,
            confidence: reading.confidence,
            phase: self.state.phases.current(),
        };
        self.state.emotions.record(event.clone());
        if reading.emotion.is_defensive() {
            self.state.defensive_reaction_count += 1;
        }
        self.emit(SessionEvent::EmotionDetected {
            emotion: event.emotion,
            confidence: event.confidence,
            timestamp: event.timestamp,
            phase: event.phase,
        });
        self.store
            .record_emotion_event(&self.state.session_id, &event)?;

        // Record the utterance and any phase-scoped content.
        self.record_phase_content(&utterance.text);
        self.state.transcript.push(Utterance {
            speaker: utterance.speaker,
            text: utterance.text.clone(),
            timestamp: now,
        });

        let transition = self.evaluate_transition(now)?;

        // Build the prompt and drive the model, regenerating on rejection.
        let reply = self.generate_validated_reply(now, reading.emotion).await?;
        self.state.transcript.push(Utterance {
            speaker: Speaker::Coach,
            text: reply.clone(),
            timestamp: now,
        });
        self.emit(SessionEvent::Dialogue {
            speaker: Speaker::Coach,
            text: reply.clone(),
            timestamp: now,
        });

        let mut summary = None;
        if self.state.phases.current() == Phase::Coaching {
            self.state.coaching_turns += 1;
            self.harvest_goals(now)?;

            if !self.state.development_plan.is_empty()
                && signals_completion(&utterance.text)
            {
                summary = Some(self.finalize(now)?);
            }
        }

        if summary.is_none() {
            self.store.save_session(&self.state)?;
        }

        Ok(TurnOutcome {
            reply,
            phase: self.state.phases.current(),
            emotion: reading,
            transition,
            summary,
        })
    }

    /// Timer-driven re-evaluation when no utterance arrived (a stalled
    /// external dependency must not stall the phase machine).
    pub fn tick(&mut self, now: DateTime<Utc>) -> Result<TickOutcome, CoachError> {
        if self.state.lifecycle != SessionLifecycle::Active {
            return Ok(TickOutcome::default());
        }

        if self.session_expired(now) {
            let summary = self.finalize(now)?;
            return Ok(TickOutcome {
                transition: None,
                summary: Some(summary),
            });
        }

        let transition = self.evaluate_transition(now)?;
        if transition.is_some() {
            self.store.save_session(&self.state)?;
        }
        Ok(TickOutcome {
            transition,
            summary: None,
        })
    }

    /// Explicit disconnect: move straight to summarizing, persist what
    /// exists, and report the final summary.
    pub fn disconnect(&mut self, now: DateTime<Utc>) -> Result<SessionSummary, CoachError> {
        if self.state.lifecycle == SessionLifecycle::Ended {
            return Err(CoachError::SessionNotActive {
                session_id: self.state.session_id.clone(),
            });
        }
        self.finalize(now)
    }

    fn finalize(&mut self, now: DateTime<Utc>) -> Result<SessionSummary, CoachError> {
        self.state.lifecycle = SessionLifecycle::Summarizing;
        let summary = self.build_summary(now);
        self.store.end_session(&self.state.session_id, &summary)?;
        self.state.lifecycle = SessionLifecycle::Ended;
        self.store.save_session(&self.state)?;
        self.emit(SessionEvent::SessionEnded {
            summary: summary.clone(),
        });
        tracing::info!(
            session_id = self.state.session_id.as_str(),
            goals = summary.goals.len(),
            "session ended"
        );
        Ok(summary)
    }

    fn session_expired(&self, now: DateTime<Utc>) -> bool {
        (now - self.state.started_at).num_seconds() >= self.max_session_s as i64
    }

    fn evaluate_transition(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Option<PhaseTransition>, CoachError> {
        let signals = ReadinessSignals {
            emotionally_improving: self.state.emotions.is_improving(),
            defensiveness_rising: self
                .state
                .emotions
                .defensiveness_rising(self.readiness_window_s, now),
            content_engaged: self
                .readiness
                .is_ready(self.state.transcript.since(self.state.phase_entry_index)),
        };

        let transition = self.state.phases.evaluate(now, &signals);
        if let Some(transition) = &transition {
            self.state.phase_entry_index = self.state.transcript.len();
            self.emit(SessionEvent::PhaseTransition {
                from_phase: transition.from_phase,
                to_phase: transition.to_phase,
                timestamp: transition.timestamp,
                time_in_previous_phase: transition.time_in_previous_phase,
            });
            self.store
                .record_phase_transition(&self.state.session_id, transition)?;
        }
        Ok(transition)
    }

    async fn generate_validated_reply(
        &mut self,
        now: DateTime<Utc>,
        last_emotion: Emotion,
    ) -> Result<String, CoachError> {
        let phase = self.state.phases.current();
        let context = PromptContext {
            themes: &self.state.feedback.themes,
            trend: self.state.emotions.trend(self.emotion_window_s, now),
            defensive_reactions: self.state.defensive_reaction_count,
            reactions: &self.state.reactions,
            content_themes: &self.state.content_themes,
        };
        let system_prompt = self.prompts.build(phase, &context);
        let transcript_context = self.state.transcript.render_context(CONTEXT_UTTERANCES);

        for attempt in 0..self.max_reply_attempts {
            let candidate = self
                .model
                .generate(&system_prompt, &transcript_context)
                .await?;
            match self.validator.check(
                &candidate,
                phase,
                Some(last_emotion),
                self.state.coaching_turns,
            ) {
                Verdict::Accept => return Ok(candidate),
                Verdict::Reject(reason) => {
                    tracing::warn!(
                        session_id = self.state.session_id.as_str(),
                        phase = phase.as_str(),
                        reason = reason.as_str(),
                        attempt,
                        "reply rejected, regenerating"
                    );
                }
            }
        }

        // Never leave the user unanswered.
        Ok(fallback_line(phase).to_string())
    }

    fn record_phase_content(&mut self, text: &str) {
        match self.state.phases.current() {
            Phase::Reaction => self.state.reactions.push(text.to_string()),
            Phase::Content => {
                let lowered = text.to_lowercase();
                for keyword in CONTENT_THEME_KEYWORDS {
                    if lowered.contains(keyword)
                        && !self.state.content_themes.iter().any(|t| t == keyword)
                    {
                        self.state.content_themes.push(keyword.to_string());
                    }
                }
            }
            Phase::Relationship | Phase::Coaching => {}
        }
    }

    fn harvest_goals(&mut self, now: DateTime<Utc>) -> Result<(), CoachError> {
        let slice = self.state.transcript.since(self.state.phase_entry_index);
        let candidates = self.plan_builder.extract(slice, now);
        let added = self
            .plan_builder
            .merge(&mut self.state.development_plan, candidates);
        if added.is_empty() {
            return Ok(());
        }

        for goal in &added {
            self.store.append_goal(&self.state.session_id, goal)?;
        }
        self.emit(SessionEvent::PlanUpdated {
            goals: self.state.development_plan.clone(),
        });
        Ok(())
    }

    fn build_summary(&self, now: DateTime<Utc>) -> SessionSummary {
        let state = &self.state;
        let mut phase_durations: BTreeMap<String, f64> = BTreeMap::new();
        for transition in state.phases.transitions() {
            phase_durations.insert(
                transition.from_phase.as_str().to_string(),
                transition.time_in_previous_phase,
            );
        }
        phase_durations.insert(
            state.phases.current().as_str().to_string(),
            state.phases.time_in_phase(now),
        );

        let journey = state.emotions.journey();
        let key_insights = build_key_insights(state, &journey);

        SessionSummary {
            session_id: state.session_id.clone(),
            user_id: state.user_id.clone(),
            started_at: state.started_at,
            ended_at: now,
            duration_seconds: (now - state.started_at).num_milliseconds().max(0) as f64 / 1000.0,
            final_phase: state.phases.current(),
            phases_completed: state
                .phases
                .transitions()
                .iter()
                .map(|t| t.from_phase)
                .collect(),
            phase_durations,
            emotional_journey: journey,
            reactions_explored: state.reactions.len(),
            content_themes_discussed: state.content_themes.clone(),
            defensive_reaction_count: state.defensive_reaction_count,
            goals: state.development_plan.clone(),
            key_insights,
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!(
                session_id = self.state.session_id.as_str(),
                "no event listeners attached"
            );
        }
    }
}

fn build_key_insights(state: &SessionState, journey: &EmotionJourney) -> Vec<String> {
    let mut insights = Vec::new();

    if let (Some(start), Some(end)) = (journey.start_emotion, journey.end_emotion) {
        if start.is_negative() && !end.is_negative() {
            insights.push(
                "Processed initial defensiveness and reached a receptive state".to_string(),
            );
        }
    }

    if state.content_themes.len() >= 3 {
        insights.push(format!(
            "Identified {} key development themes",
            state.content_themes.len()
        ));
    }

    if !state.development_plan.is_empty() {
        insights.push(format!(
            "Created a development plan with {} actionable goal(s)",
            state.development_plan.len()
        ));
    }

    if state.phases.transitions().len() >= 3 {
        insights.push("Completed the full four-phase journey".to_string());
    }

    if insights.is_empty() {
        insights.push("Session ended before completing the framework".to_string());
    }
    insights
}

fn signals_completion(text: &str) -> bool {
    let lowered = text.to_lowercase();
    COMPLETION_LANGUAGE.iter().any(|p| lowered.contains(p))
}

fn closing_line() -> &'static str {
    "We have reached the end of our time together today. Thank you for the \
     openness you brought to this conversation."
}

/// Explicit map from session id to its orchestrator. Sessions are fully
/// independent; nothing is shared across them but read-only configuration.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, SessionOrchestrator>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, orchestrator: SessionOrchestrator) -> String {
        let id = orchestrator.session_id().to_string();
        self.sessions.insert(id.clone(), orchestrator);
        id
    }

    pub fn get_mut(&mut self, session_id: &str) -> Option<&mut SessionOrchestrator> {
        self.sessions.get_mut(session_id)
    }

    pub fn remove(&mut self, session_id: &str) -> Option<SessionOrchestrator> {
        self.sessions.remove(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::CoachDatabase;
    use crate::feedback::parse_feedback_text;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Plays back a fixed list of replies, then repeats a safe line.
    struct ScriptedModel {
        replies: Mutex<VecDeque<String>>,
    }

    impl ScriptedModel {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn generate(&self, _system: &str, _context: &str) -> Result<String, CoachError> {
            Ok(self
                .replies
                .lock()
                .expect("scripted model lock")
                .pop_front()
                .unwrap_or_else(|| {
                    "It sounds like there's a lot here. That makes sense. What's one \
                     specific step you want to plan?"
                        .to_string()
                }))
        }
    }

    struct FailingModel;

    #[async_trait]
    impl LanguageModel for FailingModel {
        async fn generate(&self, _system: &str, _context: &str) -> Result<String, CoachError> {
            Err(CoachError::ModelUnavailable("connection refused".to_string()))
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn utterance(text: &str, secs: i64) -> IncomingUtterance {
        IncomingUtterance {
            speaker: Speaker::User,
            text: text.to_string(),
            audio_features: None,
            timestamp: at(secs),
        }
    }

    fn calm_features() -> Option<AudioFeatures> {
        Some(AudioFeatures {
            pitch_hz: 150.0,
            pitch_variance: 25.0,
            energy: 0.5,
            tempo: 1.0,
        })
    }

    struct Harness {
        orchestrator: SessionOrchestrator,
        events: flume::Receiver<SessionEvent>,
        _dir: TempDir,
        db: Arc<CoachDatabase>,
    }

    fn harness(model: Arc<dyn LanguageModel>) -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(CoachDatabase::new(dir.path().join("session.db")).expect("db"));
        let (tx, rx) = flume::unbounded();
        let config = CoachConfig::default();
        let feedback = parse_feedback_text(
            "Communication could improve in large meetings\n\
             Should delegate more routine work to the team",
        );
        let orchestrator = SessionOrchestrator::start(
            &config,
            "user-1".to_string(),
            feedback,
            model,
            db.clone(),
            tx,
            at(0),
        )
        .expect("start session");
        Harness {
            orchestrator,
            events: rx,
            _dir: dir,
            db,
        }
    }

    fn drain_event_types(rx: &flume::Receiver<SessionEvent>) -> Vec<&'static str> {
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                SessionEvent::EmotionDetected { .. } => "emotion-detected",
                SessionEvent::PhaseTransition { .. } => "phase-transition",
                SessionEvent::Dialogue { .. } => "dialogue",
                SessionEvent::PlanUpdated { .. } => "plan-updated",
                SessionEvent::SessionEnded { .. } => "session-ended",
            });
        }
        kinds
    }

    #[tokio::test]
    async fn full_session_walks_the_four_phases() {
        let mut h = harness(ScriptedModel::new(&[]));

        // Relationship: first utterance activates the session; no transition
        // before the 120s minimum.
        let outcome = h
            .orchestrator
            .handle_utterance(utterance("Hi, thanks for making time for this today.", 0))
            .await
            .expect("turn 1");
        assert_eq!(outcome.phase, Phase::Relationship);
        assert!(outcome.transition.is_none());
        assert!(h.orchestrator.state().development_plan.is_empty());

        // 125 simulated seconds with no negative spike: moves to reaction.
        let outcome = h
            .orchestrator
            .handle_utterance(utterance("I've read through all of it now.", 125))
            .await
            .expect("turn 2");
        assert_eq!(outcome.phase, Phase::Reaction);
        let transition = outcome.transition.expect("relationship -> reaction");
        assert_eq!(transition.from_phase, Phase::Relationship);
        assert!(transition.time_in_previous_phase >= 120.0);

        // Reaction phase: calm, improving reads. After 185s in phase the
        // readiness gate passes and content begins.
        h.orchestrator
            .handle_utterance({
                let mut u = utterance("It stung at first, but that makes sense to me now.", 200);
                u.audio_features = calm_features();
                u
            })
            .await
            .expect("turn 3");
        let outcome = h
            .orchestrator
            .handle_utterance({
                let mut u = utterance("I appreciate the honesty in it, honestly.", 310);
                u.audio_features = calm_features();
                u
            })
            .await
            .expect("turn 4");
        assert_eq!(outcome.phase, Phase::Content);
        assert_eq!(
            outcome.transition.expect("reaction -> content").from_phase,
            Phase::Reaction
        );

        // Plan still empty before coaching.
        assert!(h.orchestrator.state().development_plan.is_empty());

        // Content: engage with specifics until the dwell time and the
        // engagement heuristic are both satisfied.
        for (i, text) in [
            "The communication comments keep coming up in every review.",
            "I think delegation is the real issue behind the workload.",
            "The feedback about listening is harder to accept.",
            "My planning habits probably make this worse.",
        ]
        .iter()
        .enumerate()
        {
            h.orchestrator
                .handle_utterance(utterance(text, 330 + i as i64 * 20))
                .await
                .expect("content turn");
        }
        let outcome = h
            .orchestrator
            .handle_utterance(utterance(
                "So honestly, what should I do about all of this?",
                560,
            ))
            .await
            .expect("content -> coaching turn");
        assert_eq!(outcome.phase, Phase::Coaching);

        // Coaching: a concrete commitment becomes a goal.
        let outcome = h
            .orchestrator
            .handle_utterance(utterance(
                "I'm going to start sending a short summary email after each \
                 design review and asking for questions before closing.",
                600,
            ))
            .await
            .expect("goal turn");
        assert!(outcome.summary.is_none());
        let plan = &h.orchestrator.state().development_plan;
        assert_eq!(plan.len(), 1);
        assert!(plan[0].goal_text.contains("summary email"));

        let goals_in_db = h
            .db
            .session_goals(h.orchestrator.session_id())
            .expect("stored goals");
        assert_eq!(goals_in_db.len(), 1);

        // User signals completion; the session finalizes with a summary.
        let outcome = h
            .orchestrator
            .handle_utterance(utterance("I think that's all, this works for me.", 640))
            .await
            .expect("closing turn");
        let summary = outcome.summary.expect("summary on completion");
        assert_eq!(summary.final_phase, Phase::Coaching);
        assert_eq!(summary.goals.len(), 1);
        assert!(summary
            .key_insights
            .iter()
            .any(|i| i.contains("development plan")));
        assert_eq!(
            h.orchestrator.state().lifecycle,
            SessionLifecycle::Ended
        );

        let kinds = drain_event_types(&h.events);
        assert!(kinds.contains(&"emotion-detected"));
        assert!(kinds.contains(&"phase-transition"));
        assert!(kinds.contains(&"plan-updated"));
        assert_eq!(kinds.last(), Some(&"session-ended"));

        // The transition log is monotonic through all four phases.
        let transitions = h.orchestrator.state().phases.transitions();
        let to_phases: Vec<Phase> = transitions.iter().map(|t| t.to_phase).collect();
        assert_eq!(
            to_phases,
            vec![Phase::Reaction, Phase::Content, Phase::Coaching]
        );
    }

    #[tokio::test]
    async fn rejected_replies_fall_back_to_canned_line() {
        // Both reaction-phase attempts leak feedback detail; the canned
        // validation line goes out instead.
        let mut h = harness(ScriptedModel::new(&[
            "Welcome! I'm glad you made the time for this.",
            "They said: Communication could improve in large meetings.",
            "The report shows [IMPROVEMENT] Communication as the top theme.",
        ]));

        h.orchestrator
            .handle_utterance(utterance("Let's get going, I'm ready.", 0))
            .await
            .expect("activate");
        let outcome = h
            .orchestrator
            .handle_utterance(utterance("This whole thing feels unfair to me.", 130))
            .await
            .expect("reaction turn");
        assert_eq!(outcome.phase, Phase::Reaction);
        assert_eq!(outcome.reply, fallback_line(Phase::Reaction));
    }

    #[tokio::test]
    async fn model_failure_propagates_and_state_survives() {
        let mut h = harness(Arc::new(FailingModel));

        let err = h
            .orchestrator
            .handle_utterance(utterance("Hello, shall we begin?", 0))
            .await
            .expect_err("model is down");
        assert!(matches!(err, CoachError::ModelUnavailable(_)));

        // The turn's inputs are retained for a retry.
        let state = h.orchestrator.state();
        assert_eq!(state.lifecycle, SessionLifecycle::Active);
        assert_eq!(state.transcript.len(), 1);
        assert_eq!(state.emotions.len(), 1);
    }

    #[tokio::test]
    async fn tick_forces_progress_without_utterances() {
        let mut h = harness(ScriptedModel::new(&[]));
        h.orchestrator
            .handle_utterance(utterance("Hello there.", 0))
            .await
            .expect("activate");

        // Nothing new arrives; time alone moves the machine once the ceiling
        // passes.
        let outcome = h.orchestrator.tick(at(250)).expect("tick");
        let transition = outcome.transition.expect("forced by dwell time");
        assert_eq!(transition.to_phase, Phase::Reaction);
        assert!(outcome.summary.is_none());
    }

    #[tokio::test]
    async fn tick_ends_expired_sessions() {
        let mut h = harness(ScriptedModel::new(&[]));
        h.orchestrator
            .handle_utterance(utterance("Hello there.", 0))
            .await
            .expect("activate");

        let outcome = h.orchestrator.tick(at(3700)).expect("tick past ceiling");
        assert!(outcome.summary.is_some());
        assert_eq!(h.orchestrator.state().lifecycle, SessionLifecycle::Ended);
    }

    #[tokio::test]
    async fn disconnect_summarizes_immediately() {
        let mut h = harness(ScriptedModel::new(&[]));
        h.orchestrator
            .handle_utterance(utterance("Hi, let's start.", 0))
            .await
            .expect("activate");

        let summary = h.orchestrator.disconnect(at(60)).expect("disconnect");
        assert_eq!(summary.final_phase, Phase::Relationship);
        assert!(summary.goals.is_empty());
        assert_eq!(h.orchestrator.state().lifecycle, SessionLifecycle::Ended);

        let err = h
            .orchestrator
            .handle_utterance(utterance("One more thing...", 70))
            .await
            .expect_err("session over");
        assert!(matches!(err, CoachError::SessionNotActive { .. }));

        // Summary landed in storage.
        let detail = h
            .db
            .session_detail(h.orchestrator.session_id())
            .expect("detail")
            .expect("session exists");
        assert!(detail.summary.is_some());
        assert!(detail.end_time.is_some());
    }

    #[tokio::test]
    async fn snapshot_resume_preserves_progress() {
        let config = CoachConfig::default();
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(CoachDatabase::new(dir.path().join("resume.db")).expect("db"));
        let (tx, _rx) = flume::unbounded();
        let model = ScriptedModel::new(&[]);

        let session_id = {
            let mut orchestrator = SessionOrchestrator::start(
                &config,
                "user-9".to_string(),
                parse_feedback_text("Needs work on delegation"),
                model.clone(),
                db.clone(),
                tx.clone(),
                at(0),
            )
            .expect("start");
            orchestrator
                .handle_utterance(utterance("Hello, I'm here.", 0))
                .await
                .expect("turn");
            orchestrator
                .handle_utterance(utterance("Still here, settling in.", 125))
                .await
                .expect("turn 2");
            orchestrator.session_id().to_string()
        };

        let loaded = db.load_session(&session_id).expect("load snapshot");
        let resumed = SessionOrchestrator::resume(&config, loaded, model, db, tx);
        assert_eq!(resumed.state().phases.current(), Phase::Reaction);
        assert_eq!(resumed.state().transcript.len(), 4);
        assert_eq!(resumed.state().lifecycle, SessionLifecycle::Active);
    }
}
