use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TwitchConfig {
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: Option<i64>,
    #[serde(default)]
    pub thread_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub twitch: TwitchConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub check_interval_seconds: u32,
    #[serde(default)]
    pub update_interval_minutes: u32,
    #[serde(default)]
    pub setup_completed: bool,
}

impl Config {
    /// Loads the config file, then layers env overrides for the secrets and
    /// defaults for anything still absent.
    pub fn load(path: &Path) -> Result<Config> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("config file not found: {}", path.display()))?;
        let mut cfg: Config = serde_json::from_str(&data).context("failed to parse config")?;
        cfg.apply_env_overrides();
        cfg.apply_defaults();
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, data)
            .with_context(|| format!("cannot write config to {}", path.display()))?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TWITCH_CLIENT_ID") {
            if !v.is_empty() {
                self.twitch.client_id = v;
            }
        }
        if let Ok(v) = std::env::var("TWITCH_CLIENT_SECRET") {
            if !v.is_empty() {
                self.twitch.client_secret = v;
            }
        }
        if let Ok(v) = std::env::var("TELEGRAM_BOT_TOKEN") {
            if !v.is_empty() {
                self.telegram.bot_token = v;
            }
        }
    }

    pub fn apply_defaults(&mut self) {
        if self.update_interval_minutes == 0 {
            self.update_interval_minutes = 5;
        }
        if self.check_interval_seconds == 0 {
            self.check_interval_seconds = 60;
        }
        if self.language.is_empty() {
            self.language = "ru".to_string();
        }
    }

    /// The monitor assumes a fully configured instance; everything here is
    /// checked before it starts.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.twitch.channel.is_empty(),
            "twitch channel is not configured"
        );
        ensure!(
            !self.twitch.client_id.is_empty() && !self.twitch.client_secret.is_empty(),
            "twitch credentials are not configured"
        );
        ensure!(
            !self.telegram.bot_token.is_empty(),
            "telegram bot token is not configured"
        );
        ensure!(
            self.telegram.chat_id.is_some(),
            "telegram chat is not configured"
        );
        ensure!(
            self.check_interval_seconds > 0 && self.update_interval_minutes > 0,
            "intervals must be positive"
        );
        Ok(())
    }

    /// Poll cycles between periodic message refreshes. Integer division, so
    /// an uneven ratio rounds the cadence down; clamped so a check interval
    /// longer than the update interval refreshes on every poll.
    pub fn checks_per_update(&self) -> u32 {
        ((self.update_interval_minutes * 60) / self.check_interval_seconds).max(1)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn minimal() -> Config {
        let mut cfg = Config::default();
        cfg.twitch.channel = "somechannel".to_string();
        cfg.twitch.client_id = "id".to_string();
        cfg.twitch.client_secret = "secret".to_string();
        cfg.telegram.bot_token = "123:abc".to_string();
        cfg.telegram.chat_id = Some(-100123);
        cfg.apply_defaults();
        cfg
    }

    #[test]
    fn parses_the_config_file_shape() {
        let json = r#"{
            "twitch": {"channel": "somechannel", "client_id": "id", "client_secret": "secret"},
            "telegram": {"bot_token": "123:abc", "chat_id": -100123, "thread_id": 7},
            "language": "en",
            "check_interval_seconds": 30,
            "update_interval_minutes": 10,
            "setup_completed": true
        }"#;
        let cfg: Config = serde_json::from_str(json).expect("valid config");
        assert_eq!(cfg.twitch.channel, "somechannel");
        assert_eq!(cfg.telegram.chat_id, Some(-100123));
        assert_eq!(cfg.telegram.thread_id, Some(7));
        assert_eq!(cfg.check_interval_seconds, 30);
        assert!(cfg.setup_completed);
    }

    #[test]
    fn absent_fields_get_defaults() {
        let mut cfg: Config = serde_json::from_str("{}").expect("empty config parses");
        cfg.apply_defaults();
        assert_eq!(cfg.check_interval_seconds, 60);
        assert_eq!(cfg.update_interval_minutes, 5);
        assert_eq!(cfg.language, "ru");
        assert!(!cfg.setup_completed);
    }

    #[test]
    fn refresh_threshold_rounds_down_and_never_reaches_zero() {
        let mut cfg = minimal();

        // 5 minutes / 60 seconds
        assert_eq!(cfg.checks_per_update(), 5);

        // 300 / 90 = 3.33, cadence rounds down
        cfg.check_interval_seconds = 90;
        assert_eq!(cfg.checks_per_update(), 3);

        // check interval longer than the update interval
        cfg.check_interval_seconds = 600;
        assert_eq!(cfg.checks_per_update(), 1);
    }

    #[test]
    fn validate_rejects_a_missing_chat() {
        let mut cfg = minimal();
        assert!(cfg.validate().is_ok());
        cfg.telegram.chat_id = None;
        assert!(cfg.validate().is_err());
    }
}
