use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::CoachConfig;
use crate::database::{CoachDatabase, SessionStore};
use crate::emotion::AudioFeatures;
use crate::error::CoachError;
use crate::feedback::{self, FeedbackReport};
use crate::llm::LanguageModel;
use crate::session::{
    IncomingUtterance, SessionEvent, SessionOrchestrator, SessionRegistry, SessionSummary,
    TurnOutcome,
};
use crate::transcript::Speaker;

#[derive(Clone)]
pub struct ServerState {
    pub config: CoachConfig,
    pub db: Arc<CoachDatabase>,
    pub registry: Arc<tokio::sync::Mutex<SessionRegistry>>,
    pub model: Arc<dyn LanguageModel>,
    pub events: flume::Sender<SessionEvent>,
    pub ws_events: broadcast::Sender<EventEnvelope>,
}

/// Egress event wrapper fanned out to websocket listeners.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub emitted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SessionEvent,
}

/// Bridge the orchestrators' flume channel onto the broadcast fanout.
pub fn spawn_event_bridge(
    rx: flume::Receiver<SessionEvent>,
    tx: broadcast::Sender<EventEnvelope>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok(event) = rx.recv_async().await {
            let envelope = EventEnvelope {
                emitted_at: Utc::now(),
                event,
            };
            // Send only fails with zero subscribers; that is fine.
            let _ = tx.send(envelope);
        }
    })
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<CoachError> for ApiError {
    fn from(err: CoachError) -> Self {
        let status = match &err {
            CoachError::InvalidTransition { .. } => StatusCode::CONFLICT,
            CoachError::SessionNotActive { .. } => StatusCode::CONFLICT,
            CoachError::ModelUnavailable(_) => StatusCode::BAD_GATEWAY,
            CoachError::PersistenceFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoachError::CorruptState(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    active_sessions: usize,
}

#[derive(Debug, Deserialize)]
struct StartSessionRequest {
    user_id: String,
    /// "text", "csv", or "json"
    #[serde(default = "default_feedback_format")]
    feedback_format: String,
    feedback: String,
}

fn default_feedback_format() -> String {
    "text".to_string()
}

#[derive(Debug, Serialize)]
struct StartSessionResponse {
    session_id: String,
    phase: &'static str,
    themes: usize,
}

#[derive(Debug, Deserialize)]
struct UtteranceRequest {
    text: String,
    #[serde(default)]
    audio_features: Option<AudioFeatures>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ParseFeedbackRequest {
    #[serde(default = "default_feedback_format")]
    format: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct GoalCompleteResponse {
    goal_id: String,
    updated: bool,
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/session/start", post(start_session))
        .route("/api/session/:session_id/utterance", post(session_utterance))
        .route("/api/session/:session_id/end", post(end_session))
        .route("/api/session/:session_id", get(session_detail))
        .route("/api/sessions/:user_id", get(user_sessions))
        .route("/api/goal/:goal_id/complete", put(complete_goal))
        .route("/api/feedback/parse", post(parse_feedback))
        .route("/ws/events", get(ws_events))
        .with_state(state)
}

pub async fn serve(state: ServerState) -> Result<()> {
    let addr = state.config.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Attune listening on {}", addr);
    axum::serve(listener, router(state))
        .await
        .context("server error")
}

async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    let active_sessions = state.registry.lock().await.len();
    Json(HealthResponse {
        status: "ok",
        active_sessions,
    })
}

async fn start_session(
    State(state): State<ServerState>,
    Json(request): Json<StartSessionRequest>,
) -> Result<(StatusCode, Json<StartSessionResponse>), ApiError> {
    let report = parse_report(&request.feedback_format, &request.feedback)?;
    let themes = report.themes.len();

    let orchestrator = SessionOrchestrator::start(
        &state.config,
        request.user_id,
        report,
        state.model.clone(),
        state.db.clone(),
        state.events.clone(),
        Utc::now(),
    )?;
    let phase = orchestrator.state().phases.current().as_str();

    let session_id = state.registry.lock().await.insert(orchestrator);
    Ok((
        StatusCode::CREATED,
        Json(StartSessionResponse {
            session_id,
            phase,
            themes,
        }),
    ))
}

async fn session_utterance(
    State(state): State<ServerState>,
    Path(session_id): Path<String>,
    Json(request): Json<UtteranceRequest>,
) -> Result<Json<TurnOutcome>, ApiError> {
    let mut registry = state.registry.lock().await;
    let orchestrator = registry
        .get_mut(&session_id)
        .ok_or_else(|| ApiError::not_found(format!("no active session {}", session_id)))?;

    let outcome = orchestrator
        .handle_utterance(IncomingUtterance {
            speaker: Speaker::User,
            text: request.text,
            audio_features: request.audio_features,
            timestamp: request.timestamp.unwrap_or_else(Utc::now),
        })
        .await?;

    if outcome.summary.is_some() {
        registry.remove(&session_id);
    }
    Ok(Json(outcome))
}

async fn end_session(
    State(state): State<ServerState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSummary>, ApiError> {
    let mut registry = state.registry.lock().await;
    let orchestrator = registry
        .get_mut(&session_id)
        .ok_or_else(|| ApiError::not_found(format!("no active session {}", session_id)))?;

    let summary = orchestrator.disconnect(Utc::now())?;
    registry.remove(&session_id);
    Ok(Json(summary))
}

async fn session_detail(
    State(state): State<ServerState>,
    Path(session_id): Path<String>,
) -> Result<Json<crate::database::SessionDetail>, ApiError> {
    let detail = state
        .db
        .session_detail(&session_id)?
        .ok_or_else(|| ApiError::not_found(format!("unknown session {}", session_id)))?;
    Ok(Json(detail))
}

async fn user_sessions(
    State(state): State<ServerState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<crate::database::SessionRow>>, ApiError> {
    Ok(Json(state.db.user_sessions(&user_id)?))
}

async fn complete_goal(
    State(state): State<ServerState>,
    Path(goal_id): Path<String>,
) -> Result<Json<GoalCompleteResponse>, ApiError> {
    let updated = state.db.mark_goal_complete(&goal_id, Utc::now())?;
    Ok(Json(GoalCompleteResponse { goal_id, updated }))
}

async fn parse_feedback(
    Json(request): Json<ParseFeedbackRequest>,
) -> Result<Json<FeedbackReport>, ApiError> {
    Ok(Json(parse_report(&request.format, &request.content)?))
}

fn parse_report(format: &str, content: &str) -> Result<FeedbackReport, ApiError> {
    match format.trim().to_ascii_lowercase().as_str() {
        "csv" => Ok(feedback::parse_feedback_csv(content)),
        "json" => feedback::parse_feedback_json(content).map_err(|e| ApiError {
            status: StatusCode::BAD_REQUEST,
            message: format!("invalid feedback JSON: {}", e),
        }),
        _ => Ok(feedback::parse_feedback_text(content)),
    }
}

async fn ws_events(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
) -> impl IntoResponse {
    let rx = state.ws_events.subscribe();
    ws.on_upgrade(move |socket| stream_events(socket, rx))
}

async fn stream_events(socket: WebSocket, mut rx: broadcast::Receiver<EventEnvelope>) {
    let (mut sender, mut receiver) = socket.split();

    // Drain inbound frames so pings and closes are handled.
    let mut reader = tokio::spawn(async move {
        while let Some(message) = receiver.next().await {
            if matches!(message, Err(_) | Ok(Message::Close(_))) {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut reader => break,
            received = rx.recv() => match received {
                Ok(envelope) => {
                    let payload = match serde_json::to_string(&envelope) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::error!("failed to serialize event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(payload)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("event listener lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    reader.abort();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coach_errors_map_to_distinct_statuses() {
        let model_down: ApiError =
            CoachError::ModelUnavailable("down".to_string()).into();
        assert_eq!(model_down.status, StatusCode::BAD_GATEWAY);

        let storage: ApiError =
            CoachError::PersistenceFailure("disk".to_string()).into();
        assert_eq!(storage.status, StatusCode::INTERNAL_SERVER_ERROR);

        let inactive: ApiError = CoachError::SessionNotActive {
            session_id: "s".to_string(),
        }
        .into();
        assert_eq!(inactive.status, StatusCode::CONFLICT);
    }

    #[test]
    fn feedback_format_dispatch() {
        let report = parse_report("text", "Great communication in standups").expect("text");
        assert_eq!(report.comments.len(), 1);

        let report = parse_report(
            "json",
            r#"[{"source": "peer", "comment": "Should delegate more"}]"#,
        )
        .expect("json");
        assert_eq!(report.comments.len(), 1);

        assert!(parse_report("json", "not json").is_err());
    }
}
