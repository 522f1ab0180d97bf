//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Special environment variables (HOST, PORT, GEMINI_API_KEY)
//! 2. Environment variables (APP_SERVER__PORT, APP_BRIDGE__SPEAKING_THRESHOLD, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! Nested keys are separated by a double underscore because many field names
//! contain single underscores themselves.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Sections:
/// - **server**: HTTP/WebSocket listener
/// - **gateway**: per-connection housekeeping (keep-alive, call limit)
/// - **bridge**: turn-taking thresholds, timers and the instructions sent to the AI
/// - **session**: the live-audio AI endpoint
/// - **workflows**: where scripted workflows are loaded from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub bridge: BridgeConfig,
    pub session: SessionConfig,
    pub workflows: WorkflowsConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production, carrier callbacks)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Media stream connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// How often a WebSocket ping is sent while the stream is open
    pub keepalive_interval_secs: u64,

    /// Close the stream if the carrier has been silent (no frames, no pongs) this long
    pub client_timeout_secs: u64,

    /// Maximum number of calls bridged at the same time
    pub max_concurrent_calls: usize,
}

/// Turn-taking and pacing settings for each call bridge.
///
/// ## Energy thresholds:
/// Both thresholds are RMS values on the raw 16-bit sample scale (0 - 32767).
/// `barge_in_energy_threshold` should be at least `speaking_threshold`: an
/// interruption has to be louder than ordinary speech to cut the AI off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub speaking_threshold: f64,
    pub barge_in_energy_threshold: f64,
    pub consecutive_loud_chunks_for_barge_in: u32,

    pub no_input_timeout_ms: u64,
    pub no_response_timeout_ms: u64,
    pub end_of_speech_timeout_ms: u64,

    /// Outbound pacing tick (telephony frame cadence)
    pub pacing_interval_ms: u64,

    /// How many pacing ticks a turn-complete waits for the outgoing queue to drain
    pub drain_timeout_ticks: u32,

    pub prompts: PromptConfig,
}

/// Instructions the bridge sends to the AI. `{prompt}` is replaced by the
/// workflow step text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    pub greeting_template: String,
    pub next_step_template: String,
    pub fallback_greeting: String,
    pub closing_instruction: String,
    pub reengagement_text: String,
    pub no_response_nudge: String,
}

/// Live-audio AI session endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub voice_name: String,
    pub connect_timeout_ms: u64,

    /// Persona instructions; the workflow steps are appended per call
    pub system_prompt: String,
}

/// Workflow catalog settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowsConfig {
    /// TOML catalog file (see `workflow::catalog`)
    pub path: String,

    /// Selector used when the stream does not carry a `groupId`
    pub default_selector: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            gateway: GatewayConfig {
                keepalive_interval_secs: 30,
                client_timeout_secs: 60,
                max_concurrent_calls: 200,
            },
            bridge: BridgeConfig::default(),
            session: SessionConfig {
                endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
                api_key: String::new(),
                model: "models/gemini-2.0-flash-live-001".to_string(),
                voice_name: "Puck".to_string(),
                connect_timeout_ms: 5000,
                system_prompt: "You are a friendly phone assistant calling on behalf of the transport office. \
                    Speak in short, clear sentences. Ask one question at a time and wait for the answer. \
                    Only move to a new question when you are told to."
                    .to_string(),
            },
            workflows: WorkflowsConfig {
                path: "workflows.toml".to_string(),
                default_selector: "default".to_string(),
            },
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            speaking_threshold: 500.0,
            barge_in_energy_threshold: 1500.0,
            consecutive_loud_chunks_for_barge_in: 3,
            no_input_timeout_ms: 10_000,
            no_response_timeout_ms: 7_000,
            end_of_speech_timeout_ms: 1_000,
            pacing_interval_ms: 20,
            drain_timeout_ticks: 5,
            prompts: PromptConfig {
                greeting_template: "Greet the caller warmly and then ask: {prompt}".to_string(),
                next_step_template: "The caller has finished answering. Briefly acknowledge the answer and then ask: {prompt}".to_string(),
                fallback_greeting: "Greet the caller warmly and ask how you can help them today.".to_string(),
                closing_instruction: "All questions are done. Thank the caller for their time and say goodbye.".to_string(),
                reengagement_text: "The caller has not said anything. Politely check whether they are still on the line and repeat your last question.".to_string(),
                no_response_nudge: "Please continue the conversation and respond to the caller now.".to_string(),
            },
        }
    }
}

impl BridgeConfig {
    pub fn no_input_timeout(&self) -> Duration {
        Duration::from_millis(self.no_input_timeout_ms)
    }

    pub fn no_response_timeout(&self) -> Duration {
        Duration::from_millis(self.no_response_timeout_ms)
    }

    pub fn end_of_speech_timeout(&self) -> Duration {
        Duration::from_millis(self.end_of_speech_timeout_ms)
    }

    pub fn pacing_interval(&self) -> Duration {
        Duration::from_millis(self.pacing_interval_ms)
    }

    /// Upper bound on waiting for the outgoing queue after a turn-complete.
    pub fn drain_timeout(&self) -> Duration {
        self.pacing_interval() * self.drain_timeout_ticks.max(1)
    }
}

impl PromptConfig {
    pub fn greeting(&self, prompt: &str) -> String {
        self.greeting_template.replace("{prompt}", prompt)
    }

    pub fn next_step(&self, prompt: &str) -> String {
        self.next_step_template.replace("{prompt}", prompt)
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_BRIDGE__SPEAKING_THRESHOLD=650`: Tune voice activity
    /// - `APP_SESSION__API_KEY=...`: AI session credentials
    /// - `HOST`, `PORT`: Special cases for deployment platforms
    /// - `GEMINI_API_KEY`: Shortcut for the AI session key
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var("GEMINI_API_KEY") {
            settings = settings.set_override("session.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.gateway.keepalive_interval_secs == 0 {
            return Err(anyhow::anyhow!("Keep-alive interval must be greater than 0"));
        }

        if self.gateway.client_timeout_secs <= self.gateway.keepalive_interval_secs {
            return Err(anyhow::anyhow!("Client timeout must be longer than the keep-alive interval"));
        }

        if self.gateway.max_concurrent_calls == 0 {
            return Err(anyhow::anyhow!("Max concurrent calls must be greater than 0"));
        }

        self.bridge.validate()?;

        if self.session.connect_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Session connect timeout must be greater than 0"));
        }

        Ok(())
    }

    /// Update bridge tuning from a JSON string (used for runtime config updates).
    ///
    /// Only the `bridge` section can change at runtime; running calls keep the
    /// settings they started with. For example `{"bridge": {"speaking_threshold": 650}}`.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(bridge) = partial_config.get("bridge") {
            let mut merged = serde_json::to_value(&self.bridge)?;
            merge_json(&mut merged, bridge);
            let updated: BridgeConfig = serde_json::from_value(merged)?;
            updated.validate()?;
            self.bridge = updated;
        }

        self.validate()?;
        Ok(())
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.speaking_threshold <= 0.0 {
            return Err(anyhow::anyhow!("Speaking threshold must be greater than 0"));
        }

        if self.barge_in_energy_threshold < self.speaking_threshold {
            return Err(anyhow::anyhow!("Barge-in threshold cannot be below the speaking threshold"));
        }

        if self.consecutive_loud_chunks_for_barge_in == 0 {
            return Err(anyhow::anyhow!("Barge-in needs at least one loud chunk"));
        }

        if self.no_input_timeout_ms == 0 || self.no_response_timeout_ms == 0 || self.end_of_speech_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Bridge timeouts must be greater than 0"));
        }

        if self.pacing_interval_ms == 0 {
            return Err(anyhow::anyhow!("Pacing interval must be greater than 0"));
        }

        Ok(())
    }
}

/// Recursively overlay `patch` onto `target` (objects merge, everything else replaces).
fn merge_json(target: &mut serde_json::Value, patch: &serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}
