//! Engine configuration.

/// Main engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Delivery channel stamped on enqueued notifications.
    pub notification_channel: String,
    /// Default origin channel for recharge reports.
    pub recharge_channel: String,
    /// Whether the cascade spawns a successor obligation on completion.
    pub auto_spawn_successor: bool,
    /// Log level.
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            notification_channel: "whatsapp".to_string(),
            recharge_channel: "whatsapp".to_string(),
            auto_spawn_successor: true,
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(channel) = std::env::var("CASAPAY_NOTIFICATION_CHANNEL") {
            config.notification_channel = channel;
        }

        if let Ok(channel) = std::env::var("CASAPAY_RECHARGE_CHANNEL") {
            config.recharge_channel = channel;
        }

        if let Ok(flag) = std::env::var("CASAPAY_AUTO_SPAWN_SUCCESSOR") {
            if let Ok(flag) = flag.parse() {
                config.auto_spawn_successor = flag;
            }
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.notification_channel.is_empty() {
            return Err("Notification channel cannot be empty".to_string());
        }

        if self.recharge_channel.is_empty() {
            return Err("Recharge channel cannot be empty".to_string());
        }

        Ok(())
    }
}
