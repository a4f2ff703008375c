use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

/// Minimum dwell seconds per phase. The hard ceiling after which a transition
/// fires regardless of readiness is twice the minimum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PhaseDurations {
    #[serde(default = "default_relationship_min_s")]
    pub relationship_min_s: u64,
    #[serde(default = "default_reaction_min_s")]
    pub reaction_min_s: u64,
    #[serde(default = "default_content_min_s")]
    pub content_min_s: u64,
    #[serde(default = "default_coaching_min_s")]
    pub coaching_min_s: u64,
}

fn default_relationship_min_s() -> u64 {
    120
}

fn default_reaction_min_s() -> u64 {
    180
}

fn default_content_min_s() -> u64 {
    240
}

fn default_coaching_min_s() -> u64 {
    300
}

impl Default for PhaseDurations {
    fn default() -> Self {
        Self {
            relationship_min_s: default_relationship_min_s(),
            reaction_min_s: default_reaction_min_s(),
            content_min_s: default_content_min_s(),
            coaching_min_s: default_coaching_min_s(),
        }
    }
}

/// Acoustic thresholds the emotion classifier scores against. These are
/// tunable heuristics, not fixed domain truth — a stronger classifier can be
/// swapped in behind the same `(emotion, confidence)` contract.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClassifierThresholds {
    #[serde(default = "default_pitch_variance_high")]
    pub pitch_variance_high: f64,
    #[serde(default = "default_pitch_variance_low")]
    pub pitch_variance_low: f64,
    #[serde(default = "default_energy_high")]
    pub energy_high: f64,
    #[serde(default = "default_energy_low")]
    pub energy_low: f64,
    #[serde(default = "default_tempo_fast")]
    pub tempo_fast: f64,
    #[serde(default = "default_tempo_slow")]
    pub tempo_slow: f64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

fn default_pitch_variance_high() -> f64 {
    50.0
}

fn default_pitch_variance_low() -> f64 {
    15.0
}

fn default_energy_high() -> f64 {
    0.7
}

fn default_energy_low() -> f64 {
    0.3
}

fn default_tempo_fast() -> f64 {
    1.3
}

fn default_tempo_slow() -> f64 {
    0.7
}

fn default_min_confidence() -> f64 {
    0.3
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            pitch_variance_high: default_pitch_variance_high(),
            pitch_variance_low: default_pitch_variance_low(),
            energy_high: default_energy_high(),
            energy_low: default_energy_low(),
            tempo_fast: default_tempo_fast(),
            tempo_slow: default_tempo_slow(),
            min_confidence: default_min_confidence(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoachConfig {
    // LLM configuration (OpenAI-compatible: Ollama, LM Studio, vLLM, OpenAI, etc.)
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,

    // Server
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    // Session persistence
    #[serde(default = "default_database_path")]
    pub database_path: String,

    // Phase timing
    #[serde(default)]
    pub phases: PhaseDurations,

    /// Window for the rolling emotion-trend majority vote.
    #[serde(default = "default_emotion_window_s")]
    pub emotion_window_s: u64,
    /// Window for the defensiveness-direction check gating reaction -> content.
    #[serde(default = "default_readiness_window_s")]
    pub readiness_window_s: u64,
    /// Hard ceiling on total session length; reaching it ends the session.
    #[serde(default = "default_max_session_s")]
    pub max_session_s: u64,

    // Emotion classifier
    #[serde(default)]
    pub classifier: ClassifierThresholds,

    /// Coaching-phase turns allowed before replies must carry concrete
    /// action/goal language.
    #[serde(default = "default_coaching_grace_turns")]
    pub coaching_grace_turns: u32,
    /// Regeneration attempts after a rejected reply before the canned
    /// fallback line is used.
    #[serde(default = "default_max_reply_attempts")]
    pub max_reply_attempts: u32,
    /// Utterances required in the content phase before the default
    /// content -> coaching readiness check passes.
    #[serde(default = "default_min_content_utterances")]
    pub min_content_utterances: usize,
}

fn default_llm_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_llm_model() -> String {
    "llama3.2".to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:7700".to_string()
}

fn default_database_path() -> String {
    "attune_coach.db".to_string()
}

fn default_emotion_window_s() -> u64 {
    30
}

fn default_readiness_window_s() -> u64 {
    60
}

fn default_max_session_s() -> u64 {
    3600
}

fn default_coaching_grace_turns() -> u32 {
    3
}

fn default_max_reply_attempts() -> u32 {
    2
}

fn default_min_content_utterances() -> usize {
    4
}

impl Default for CoachConfig {
    fn default() -> Self {
        Self {
            llm_api_url: default_llm_url(),
            llm_model: default_llm_model(),
            llm_api_key: None,
            bind_addr: default_bind_addr(),
            database_path: default_database_path(),
            phases: PhaseDurations::default(),
            emotion_window_s: default_emotion_window_s(),
            readiness_window_s: default_readiness_window_s(),
            max_session_s: default_max_session_s(),
            classifier: ClassifierThresholds::default(),
            coaching_grace_turns: default_coaching_grace_turns(),
            max_reply_attempts: default_max_reply_attempts(),
            min_content_utterances: default_min_content_utterances(),
        }
    }
}

impl CoachConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Get the path to the config file (relative to executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("attune_config.toml")
    }

    /// Load config from attune_config.toml next to the executable, falling
    /// back to defaults plus environment variables.
    pub fn load() -> Self {
        let path = Self::config_path();

        if let Ok(contents) = fs::read_to_string(&path) {
            match toml::from_str::<CoachConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config;
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                }
            }
        }

        tracing::warn!("No config file found, using defaults + env vars");
        Self::from_env()
    }

    /// Save config to file (next to executable)
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Load from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var("ATTUNE_LLM_API_URL") {
            config.llm_api_url = url;
        }

        if let Ok(model) = env::var("ATTUNE_LLM_MODEL") {
            config.llm_model = model;
        }

        if let Ok(key) = env::var("ATTUNE_LLM_API_KEY") {
            config.llm_api_key = Some(key);
        }

        if let Ok(addr) = env::var("ATTUNE_BIND_ADDR") {
            config.bind_addr = addr;
        }

        if let Ok(path) = env::var("ATTUNE_DATABASE_PATH") {
            if !path.trim().is_empty() {
                config.database_path = path;
            }
        }

        if let Ok(seconds) = env::var("ATTUNE_MAX_SESSION_SECS") {
            if let Ok(seconds) = seconds.parse() {
                config.max_session_s = seconds;
            }
        }

        if let Ok(seconds) = env::var("ATTUNE_EMOTION_WINDOW_SECS") {
            if let Ok(seconds) = seconds.parse() {
                config.emotion_window_s = seconds;
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_framework_timings() {
        let config = CoachConfig::default();
        assert_eq!(config.phases.relationship_min_s, 120);
        assert_eq!(config.phases.reaction_min_s, 180);
        assert_eq!(config.phases.content_min_s, 240);
        assert_eq!(config.phases.coaching_min_s, 300);
        assert_eq!(config.emotion_window_s, 30);
        assert_eq!(config.max_session_s, 3600);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: CoachConfig =
            toml::from_str("llm_model = \"qwen2.5\"\n[phases]\nreaction_min_s = 60\n")
                .expect("parse partial config");
        assert_eq!(config.llm_model, "qwen2.5");
        assert_eq!(config.phases.reaction_min_s, 60);
        assert_eq!(config.phases.relationship_min_s, 120);
        assert!((config.classifier.energy_high - 0.7).abs() < f64::EPSILON);
    }
}
