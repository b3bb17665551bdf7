//! Configuration for the workflow engine

use serde::{Deserialize, Serialize};

/// Complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of finished runs kept in registry history
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Step deadline applied when a step carries none
    #[serde(default)]
    pub default_step_timeout_ms: Option<u64>,

    /// Upper bound on step visits in one run, guarding branch loops
    #[serde(default = "default_max_steps_per_run")]
    pub max_steps_per_run: usize,

    /// Escalation triggers and targets
    #[serde(default)]
    pub escalation: EscalationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            default_step_timeout_ms: None,
            max_steps_per_run: default_max_steps_per_run(),
            escalation: EscalationConfig::default(),
        }
    }
}

/// Context keys watched after each step and the targets they escalate to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Charge at or above which a run escalates to review
    #[serde(default = "default_charge_threshold")]
    pub charge_threshold: u8,

    #[serde(default = "default_charge_key")]
    pub charge_key: String,

    #[serde(default = "default_review_target")]
    pub review_target: String,

    #[serde(default = "default_depth_exceeded_key")]
    pub depth_exceeded_key: String,

    #[serde(default = "default_recovery_target")]
    pub recovery_target: String,

    #[serde(default = "default_contradiction_key")]
    pub contradiction_key: String,

    #[serde(default = "default_arbitration_target")]
    pub arbitration_target: String,

    #[serde(default = "default_fusion_key")]
    pub fusion_key: String,

    #[serde(default = "default_fusion_target")]
    pub fusion_target: String,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            charge_threshold: default_charge_threshold(),
            charge_key: default_charge_key(),
            review_target: default_review_target(),
            depth_exceeded_key: default_depth_exceeded_key(),
            recovery_target: default_recovery_target(),
            contradiction_key: default_contradiction_key(),
            arbitration_target: default_arbitration_target(),
            fusion_key: default_fusion_key(),
            fusion_target: default_fusion_target(),
        }
    }
}

// Default value helpers
fn default_history_limit() -> usize {
    100
}

fn default_max_steps_per_run() -> usize {
    1000
}

fn default_charge_threshold() -> u8 {
    71
}

fn default_charge_key() -> String {
    "charge".into()
}

fn default_review_target() -> String {
    "review".into()
}

fn default_depth_exceeded_key() -> String {
    "depth_exceeded".into()
}

fn default_recovery_target() -> String {
    "recovery".into()
}

fn default_contradiction_key() -> String {
    "contradiction".into()
}

fn default_arbitration_target() -> String {
    "arbitration".into()
}

fn default_fusion_key() -> String {
    "fusion_request".into()
}

fn default_fusion_target() -> String {
    "fusion".into()
}

impl EngineConfig {
    /// Load configuration from defaults, an optional file, and
    /// `WORKFLOW_`-prefixed environment variables, in that order.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&EngineConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder
            .add_source(
                config::Environment::with_prefix("WORKFLOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_default_step_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_step_timeout_ms = Some(timeout_ms);
        self
    }
}
