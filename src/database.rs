use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

use crate::emotion::{Emotion, EmotionEvent};
use crate::error::CoachError;
use crate::phase::{Phase, PhaseTransition, TransitionTrigger};
use crate::plan::{Goal, GoalType};
use crate::session::{SessionState, SessionSummary};

/// Storage contract the orchestrator persists through. The core never
/// depends on the representation behind it; any record store that can honor
/// these operations will do.
pub trait SessionStore: Send + Sync {
    fn create_session(&self, state: &SessionState) -> Result<(), CoachError>;
    /// Upsert the serialized state snapshot (recovery/reconnection).
    fn save_session(&self, state: &SessionState) -> Result<(), CoachError>;
    fn load_session(&self, session_id: &str) -> Result<SessionState, CoachError>;
    fn append_goal(&self, session_id: &str, goal: &Goal) -> Result<(), CoachError>;
    fn mark_goal_complete(
        &self,
        goal_id: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, CoachError>;
    fn record_emotion_event(
        &self,
        session_id: &str,
        event: &EmotionEvent,
    ) -> Result<(), CoachError>;
    fn record_phase_transition(
        &self,
        session_id: &str,
        transition: &PhaseTransition,
    ) -> Result<(), CoachError>;
    fn end_session(&self, session_id: &str, summary: &SessionSummary) -> Result<(), CoachError>;
}

/// Basic per-session listing row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub session_id: String,
    pub user_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Full stored view of one session, for review endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDetail {
    pub session_id: String,
    pub user_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub summary: Option<serde_json::Value>,
    pub development_plan: Vec<Goal>,
    pub emotion_events: Vec<EmotionEvent>,
    pub phase_transitions: Vec<PhaseTransition>,
}

pub struct CoachDatabase {
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> CoachError {
    CoachError::PersistenceFailure(e.to_string())
}

impl CoachDatabase {
    /// Create or open the database
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, CoachError> {
        let conn = Connection::open(path).map_err(db_err)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.ensure_schema()?;
        Ok(db)
    }

    /// Helper to lock the connection
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, CoachError> {
        self.conn
            .lock()
            .map_err(|e| CoachError::PersistenceFailure(format!("database lock poisoned: {}", e)))
    }

    fn ensure_schema(&self) -> Result<(), CoachError> {
        let conn = self.lock_conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT,
                feedback_data TEXT,
                state_snapshot TEXT,
                session_summary TEXT,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_start_time ON sessions(start_time);

            CREATE TABLE IF NOT EXISTS development_plans (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                goal_text TEXT NOT NULL,
                goal_type TEXT CHECK(goal_type IN ('start', 'stop', 'continue')),
                specific_behavior TEXT,
                measurable_criteria TEXT,
                target_date TEXT,
                action_steps TEXT,
                is_completed INTEGER DEFAULT 0,
                completed_at TEXT,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_development_plans_session_id
                ON development_plans(session_id);
            CREATE INDEX IF NOT EXISTS idx_development_plans_completed
                ON development_plans(is_completed);

            CREATE TABLE IF NOT EXISTS emotion_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                emotion_type TEXT NOT NULL CHECK(emotion_type IN
                    ('neutral', 'defensive', 'frustrated', 'sad', 'anxious', 'positive')),
                confidence REAL CHECK(confidence >= 0.0 AND confidence <= 1.0),
                phase TEXT CHECK(phase IN
                    ('relationship', 'reaction', 'content', 'coaching')),
                created_at TEXT DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_emotion_events_session_timestamp
                ON emotion_events(session_id, timestamp);

            CREATE TABLE IF NOT EXISTS phase_transitions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                from_phase TEXT NOT NULL CHECK(from_phase IN
                    ('relationship', 'reaction', 'content', 'coaching')),
                to_phase TEXT NOT NULL CHECK(to_phase IN
                    ('relationship', 'reaction', 'content', 'coaching')),
                transition_time TEXT NOT NULL,
                trigger_reason TEXT,
                time_in_previous_phase REAL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_phase_transitions_session_id
                ON phase_transitions(session_id);",
        )
        .map_err(db_err)
    }

    /// All sessions for a user, most recent first.
    pub fn user_sessions(&self, user_id: &str) -> Result<Vec<SessionRow>, CoachError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, start_time, end_time
                 FROM sessions WHERE user_id = ?1 ORDER BY start_time DESC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        let mut sessions = Vec::with_capacity(rows.len());
        for (session_id, user_id, start, end) in rows {
            sessions.push(SessionRow {
                session_id,
                user_id,
                start_time: parse_timestamp(&start)?,
                end_time: end.as_deref().map(parse_timestamp).transpose()?,
            });
        }
        Ok(sessions)
    }

    /// Full stored view of one session, or None when unknown.
    pub fn session_detail(&self, session_id: &str) -> Result<Option<SessionDetail>, CoachError> {
        let base = {
            let conn = self.lock_conn()?;
            let mut stmt = conn
                .prepare(
                    "SELECT user_id, start_time, end_time, session_summary
                     FROM sessions WHERE id = ?1",
                )
                .map_err(db_err)?;
            let mut rows = stmt
                .query_map(params![session_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                })
                .map_err(db_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_err)?;
            match rows.pop() {
                Some(row) => row,
                None => return Ok(None),
            }
        };

        let (user_id, start, end, summary_json) = base;
        let summary = summary_json
            .as_deref()
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()
            .map_err(|e| CoachError::CorruptState(format!("session summary: {}", e)))?;

        Ok(Some(SessionDetail {
            session_id: session_id.to_string(),
            user_id,
            start_time: parse_timestamp(&start)?,
            end_time: end.as_deref().map(parse_timestamp).transpose()?,
            summary,
            development_plan: self.session_goals(session_id)?,
            emotion_events: self.session_emotion_events(session_id)?,
            phase_transitions: self.session_phase_transitions(session_id)?,
        }))
    }

    pub fn session_goals(&self, session_id: &str) -> Result<Vec<Goal>, CoachError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, goal_text, goal_type, specific_behavior, measurable_criteria,
                        target_date, action_steps, is_completed, completed_at
                 FROM development_plans WHERE session_id = ?1 ORDER BY created_at",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, bool>(7)?,
                    row.get::<_, Option<String>>(8)?,
                ))
            })
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        let mut goals = Vec::with_capacity(rows.len());
        for (id, text, goal_type, behavior, criteria, target, steps, completed, completed_at) in
            rows
        {
            let goal_type = GoalType::from_db(&goal_type).ok_or_else(|| {
                CoachError::CorruptState(format!("goal type '{}' outside enumeration", goal_type))
            })?;
            let action_steps: Vec<String> = steps
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .map_err(|e| CoachError::CorruptState(format!("goal action steps: {}", e)))?
                .unwrap_or_default();
            goals.push(Goal {
                goal_id: id,
                goal_text: text,
                goal_type,
                specific_behavior: behavior.unwrap_or_default(),
                measurable_criteria: criteria.unwrap_or_default(),
                target_date: target
                    .as_deref()
                    .map(|t| {
                        NaiveDate::parse_from_str(t, "%Y-%m-%d").map_err(|e| {
                            CoachError::CorruptState(format!("goal target date: {}", e))
                        })
                    })
                    .transpose()?,
                action_steps,
                is_completed: completed,
                completed_at: completed_at.as_deref().map(parse_timestamp).transpose()?,
            });
        }
        Ok(goals)
    }

    fn session_emotion_events(&self, session_id: &str) -> Result<Vec<EmotionEvent>, CoachError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT timestamp, emotion_type, confidence, phase
                 FROM emotion_events WHERE session_id = ?1 ORDER BY timestamp",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        let mut events = Vec::with_capacity(rows.len());
        for (timestamp, emotion, confidence, phase) in rows {
            events.push(EmotionEvent {
                timestamp: parse_timestamp(&timestamp)?,
                emotion: Emotion::from_db(&emotion).ok_or_else(|| {
                    CoachError::CorruptState(format!("emotion '{}' outside enumeration", emotion))
                })?,
                confidence,
                phase: parse_phase(&phase)?,
            });
        }
        Ok(events)
    }

    fn session_phase_transitions(
        &self,
        session_id: &str,
    ) -> Result<Vec<PhaseTransition>, CoachError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT from_phase, to_phase, transition_time, trigger_reason,
                        time_in_previous_phase
                 FROM phase_transitions WHERE session_id = ?1 ORDER BY transition_time",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, f64>(4)?,
                ))
            })
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        let mut transitions = Vec::with_capacity(rows.len());
        for (from, to, at, trigger, seconds) in rows {
            transitions.push(PhaseTransition {
                from_phase: parse_phase(&from)?,
                to_phase: parse_phase(&to)?,
                timestamp: parse_timestamp(&at)?,
                time_in_previous_phase: seconds,
                trigger: trigger
                    .as_deref()
                    .and_then(TransitionTrigger::from_db)
                    .unwrap_or(TransitionTrigger::TimeElapsed),
            });
        }
        Ok(transitions)
    }
}

impl SessionStore for CoachDatabase {
    fn create_session(&self, state: &SessionState) -> Result<(), CoachError> {
        let snapshot = serde_json::to_string(state)
            .map_err(|e| CoachError::PersistenceFailure(format!("serialize state: {}", e)))?;
        let feedback = serde_json::to_string(&state.feedback)
            .map_err(|e| CoachError::PersistenceFailure(format!("serialize feedback: {}", e)))?;
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO sessions (id, user_id, start_time, feedback_data, state_snapshot)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                state.session_id,
                state.user_id,
                state.started_at.to_rfc3339(),
                feedback,
                snapshot,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn save_session(&self, state: &SessionState) -> Result<(), CoachError> {
        let snapshot = serde_json::to_string(state)
            .map_err(|e| CoachError::PersistenceFailure(format!("serialize state: {}", e)))?;
        let conn = self.lock_conn()?;
        let updated = conn
            .execute(
                "UPDATE sessions SET state_snapshot = ?1, updated_at = ?2 WHERE id = ?3",
                params![snapshot, Utc::now().to_rfc3339(), state.session_id],
            )
            .map_err(db_err)?;
        if updated == 0 {
            return Err(CoachError::PersistenceFailure(format!(
                "session {} does not exist",
                state.session_id
            )));
        }
        Ok(())
    }

    fn load_session(&self, session_id: &str) -> Result<SessionState, CoachError> {
        let snapshot: Option<Option<String>> = {
            let conn = self.lock_conn()?;
            let mut stmt = conn
                .prepare("SELECT state_snapshot FROM sessions WHERE id = ?1")
                .map_err(db_err)?;
            let mut rows = stmt
                .query_map(params![session_id], |row| {
                    row.get::<_, Option<String>>(0)
                })
                .map_err(db_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_err)?;
            rows.pop()
        };

        let snapshot = snapshot
            .ok_or_else(|| {
                CoachError::PersistenceFailure(format!("session {} does not exist", session_id))
            })?
            .ok_or_else(|| {
                CoachError::CorruptState(format!("session {} has no state snapshot", session_id))
            })?;

        serde_json::from_str(&snapshot)
            .map_err(|e| CoachError::CorruptState(format!("state snapshot: {}", e)))
    }

    fn append_goal(&self, session_id: &str, goal: &Goal) -> Result<(), CoachError> {
        let steps = serde_json::to_string(&goal.action_steps)
            .map_err(|e| CoachError::PersistenceFailure(format!("serialize steps: {}", e)))?;
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO development_plans
             (id, session_id, goal_text, goal_type, specific_behavior,
              measurable_criteria, target_date, action_steps, is_completed, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                goal.goal_id,
                session_id,
                goal.goal_text,
                goal.goal_type.as_db_str(),
                goal.specific_behavior,
                goal.measurable_criteria,
                goal.target_date.map(|d| d.format("%Y-%m-%d").to_string()),
                steps,
                goal.is_completed,
                goal.completed_at.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn mark_goal_complete(
        &self,
        goal_id: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, CoachError> {
        let conn = self.lock_conn()?;
        // Completion only moves forward; already complete rows are untouched.
        let updated = conn
            .execute(
                "UPDATE development_plans
                 SET is_completed = 1, completed_at = ?1
                 WHERE id = ?2 AND is_completed = 0",
                params![completed_at.to_rfc3339(), goal_id],
            )
            .map_err(db_err)?;
        Ok(updated > 0)
    }

    fn record_emotion_event(
        &self,
        session_id: &str,
        event: &EmotionEvent,
    ) -> Result<(), CoachError> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO emotion_events (session_id, timestamp, emotion_type, confidence, phase)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session_id,
                event.timestamp.to_rfc3339(),
                event.emotion.as_str(),
                event.confidence,
                event.phase.as_str(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn record_phase_transition(
        &self,
        session_id: &str,
        transition: &PhaseTransition,
    ) -> Result<(), CoachError> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO phase_transitions
             (session_id, from_phase, to_phase, transition_time, trigger_reason,
              time_in_previous_phase)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session_id,
                transition.from_phase.as_str(),
                transition.to_phase.as_str(),
                transition.timestamp.to_rfc3339(),
                transition.trigger.as_str(),
                transition.time_in_previous_phase,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn end_session(&self, session_id: &str, summary: &SessionSummary) -> Result<(), CoachError> {
        let summary_json = serde_json::to_string(summary)
            .map_err(|e| CoachError::PersistenceFailure(format!("serialize summary: {}", e)))?;
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE sessions SET end_time = ?1, session_summary = ?2, updated_at = ?1
             WHERE id = ?3",
            params![summary.ended_at.to_rfc3339(), summary_json, session_id],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, CoachError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CoachError::CorruptState(format!("timestamp '{}': {}", raw, e)))
}

fn parse_phase(raw: &str) -> Result<Phase, CoachError> {
    Phase::from_db(raw)
        .ok_or_else(|| CoachError::CorruptState(format!("phase '{}' outside enumeration", raw)))
}
