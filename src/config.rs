use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::session::SessionSettings;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Audio
    pub default_volume: f32,
    pub max_queue_size: usize,

    // Resolución de fuentes
    pub source_retry_limit: u32,
    pub source_retry_delay_ms: u64,

    // Límites
    pub command_cooldown_secs: u64,

    // Features
    pub auto_leave: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            application_id: std::env::var("APPLICATION_ID")?.parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Audio
            default_volume: std::env::var("DEFAULT_VOLUME")
                .unwrap_or_else(|_| "1.0".to_string())
                .parse()?,
            max_queue_size: std::env::var("MAX_QUEUE_SIZE")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,

            // Resolución de fuentes
            source_retry_limit: std::env::var("SOURCE_RETRY_LIMIT")
                .unwrap_or_else(|_| "3".to_string())
                .parse()?,
            source_retry_delay_ms: std::env::var("SOURCE_RETRY_DELAY_MS")
                .unwrap_or_else(|_| "500".to_string())
                .parse()?,

            // Límites
            command_cooldown_secs: std::env::var("COMMAND_COOLDOWN_SECS")
                .unwrap_or_else(|_| "2".to_string())
                .parse()?,

            // Features
            auto_leave: std::env::var("AUTO_LEAVE")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Volume must be greater than 0.0 and at most 2.0
    /// - Queue size must be greater than 0
    /// - Retry limit must be between 1 and 10
    pub fn validate(&self) -> Result<()> {
        if self.default_volume <= 0.0 || self.default_volume > 2.0 {
            anyhow::bail!(
                "Default volume must be in (0.0, 2.0], got: {}",
                self.default_volume
            );
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.source_retry_limit == 0 || self.source_retry_limit > 10 {
            anyhow::bail!(
                "Source retry limit must be between 1 and 10, got: {}",
                self.source_retry_limit
            );
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The Discord token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Audio: {}% vol, {} max queue\n  \
            Sources: {} attempts, {}ms retry delay\n  \
            Commands: {}s cooldown\n  \
            Features: AutoLeave={}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            (self.default_volume * 100.0) as u32,
            self.max_queue_size,
            self.source_retry_limit,
            self.source_retry_delay_ms,
            self.command_cooldown_secs,
            self.auto_leave
        )
    }

    /// Valores que necesita cada sesión de voz
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            default_volume: self.default_volume,
            retry_limit: self.source_retry_limit,
            retry_delay: Duration::from_millis(self.source_retry_delay_ms),
        }
    }

    pub fn command_cooldown(&self) -> Duration {
        Duration::from_secs(self.command_cooldown_secs)
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            default_volume: 1.0,
            max_queue_size: 1000,

            source_retry_limit: 3,
            source_retry_delay_ms: 500,

            command_cooldown_secs: 2,

            auto_leave: true,
        }
    }
}
