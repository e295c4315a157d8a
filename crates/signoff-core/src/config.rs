use config::{Config, ConfigError, Environment};
use serde::Deserialize;

/// Top-level engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub escalation: EscalationConfig,
    pub notifications: NotificationConfig,
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_env("SIGNOFF")
    }

    /// Load configuration from environment with custom prefix
    pub fn load_from_env(prefix: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(
                Environment::with_prefix(prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("escalation.sweep_interval_seconds", 300)?
            .set_default("escalation.escalation_window_hours", 24)?
            .set_default("escalation.reminder_lead_hours", 4)?
            .set_default("escalation.fallback_role", "country_director")?
            .set_default("notifications.queue_capacity", 1024)?
            .set_default(
                "notifications.enabled_channels",
                vec!["email", "in_app"],
            )?;

        let config = builder.build()?;
        config.try_deserialize()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            escalation: EscalationConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

/// Escalation sweep configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EscalationConfig {
    /// How often the sweeper wakes up
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    /// Due-date window granted to escalation targets
    #[serde(default = "default_escalation_window_hours")]
    pub escalation_window_hours: i64,
    /// How long before the due date a pending reminder goes out
    #[serde(default = "default_reminder_lead_hours")]
    pub reminder_lead_hours: i64,
    /// Role receiving escalations when no manager or department head resolves
    #[serde(default = "default_fallback_role")]
    pub fallback_role: String,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: default_sweep_interval_seconds(),
            escalation_window_hours: default_escalation_window_hours(),
            reminder_lead_hours: default_reminder_lead_hours(),
            fallback_role: default_fallback_role(),
        }
    }
}

fn default_sweep_interval_seconds() -> u64 {
    300
}

fn default_escalation_window_hours() -> i64 {
    24
}

fn default_reminder_lead_hours() -> i64 {
    4
}

fn default_fallback_role() -> String {
    "country_director".to_string()
}

/// Notification dispatch configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// Bounded queue size between the engine and the dispatcher
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Channel names the dispatcher fans out to
    #[serde(default = "default_enabled_channels")]
    pub enabled_channels: Vec<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            enabled_channels: default_enabled_channels(),
        }
    }
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_enabled_channels() -> Vec<String> {
    vec!["email".to_string(), "in_app".to_string()]
}
