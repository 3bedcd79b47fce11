use crate::error::MuzzikError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const PRIVACY_STATUSES: [&str; 3] = ["public", "unlisted", "private"];
const MAX_RETRY_BASE_DELAY_MS: u64 = 60_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub name: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: "#muzzik".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaylistConfig {
    pub title_prefix: String,
    pub description: String,
    pub privacy: String,
    pub capacity: u64,
    /// Successful inserts allowed per run. The API grants 10k units/day and an
    /// insert costs 50, so 190 leaves room for the list and create calls.
    pub daily_insert_cap: u64,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            title_prefix: "muzzik vol.".to_string(),
            description: "Music shared in #muzzik".to_string(),
            privacy: "unlisted".to_string(),
            capacity: 5000,
            daily_insert_cap: 190,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MuzzikConfig {
    pub channel: ChannelConfig,
    pub playlist: PlaylistConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialMuzzikConfig {
    channel: Option<ChannelConfig>,
    playlist: Option<PlaylistConfig>,
    retry: Option<RetryConfig>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u32(var: &str, fallback: u32) -> u32 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u32>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn invalid(reason: &str) -> anyhow::Error {
    MuzzikError::InvalidConfig(reason.to_string()).into()
}

fn validate(cfg: &MuzzikConfig) -> Result<()> {
    if cfg.channel.name.trim_start_matches('#').trim().is_empty() {
        return Err(invalid("invalid channel name: cannot be empty"));
    }
    if cfg.playlist.title_prefix.trim().is_empty() {
        return Err(invalid("invalid playlist title prefix: cannot be empty"));
    }
    if !PRIVACY_STATUSES.contains(&cfg.playlist.privacy.as_str()) {
        return Err(invalid(
            "invalid playlist privacy: use `public`, `unlisted` or `private`",
        ));
    }
    if cfg.playlist.capacity == 0 {
        return Err(invalid("invalid playlist capacity: must be >= 1"));
    }
    if cfg.retry.max_attempts == 0 {
        return Err(invalid("invalid retry max attempts: must be >= 1"));
    }
    if cfg.retry.base_delay_ms > MAX_RETRY_BASE_DELAY_MS {
        return Err(invalid(&format!(
            "invalid retry base delay: must be <= {MAX_RETRY_BASE_DELAY_MS} ms"
        )));
    }
    Ok(())
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("MUZZIK_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let base = dirs::config_dir()?;
    Some(base.join("muzzik").join("muzzik.toml"))
}

fn merge_toml(base: &mut MuzzikConfig, raw: &str) -> Result<()> {
    let parsed: PartialMuzzikConfig =
        toml::from_str(raw).map_err(|err| MuzzikError::InvalidConfig(err.to_string()))?;
    if let Some(channel) = parsed.channel {
        base.channel = channel;
    }
    if let Some(playlist) = parsed.playlist {
        base.playlist = playlist;
    }
    if let Some(retry) = parsed.retry {
        base.retry = retry;
    }
    Ok(())
}

fn merge_file_config(base: &mut MuzzikConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }
    merge_file(base, &path)
}

fn merge_file(base: &mut MuzzikConfig, path: &Path) -> Result<()> {
    let raw = fs::read_to_string(path)
        .map_err(|err| MuzzikError::InvalidConfig(format!("{}: {err}", path.display())))?;
    merge_toml(base, &raw)
        .with_context(|| format!("failed to parse muzzik config {}", path.display()))
}

pub fn load_config() -> Result<MuzzikConfig> {
    let mut cfg = MuzzikConfig::default();
    merge_file_config(&mut cfg)?;

    cfg.channel.name = env_or_string("MUZZIK_CHANNEL", &cfg.channel.name);
    cfg.playlist.title_prefix =
        env_or_string("MUZZIK_PLAYLIST_TITLE_PREFIX", &cfg.playlist.title_prefix);
    cfg.playlist.privacy = env_or_string("MUZZIK_PLAYLIST_PRIVACY", &cfg.playlist.privacy);
    cfg.playlist.capacity = env_or_u64("MUZZIK_PLAYLIST_CAPACITY", cfg.playlist.capacity);
    cfg.playlist.daily_insert_cap =
        env_or_u64("MUZZIK_DAILY_INSERT_CAP", cfg.playlist.daily_insert_cap);
    cfg.retry.max_attempts = env_or_u32("MUZZIK_RETRY_MAX_ATTEMPTS", cfg.retry.max_attempts);
    cfg.retry.base_delay_ms = env_or_u64("MUZZIK_RETRY_BASE_DELAY_MS", cfg.retry.base_delay_ms);

    validate(&cfg)?;
    Ok(cfg)
}
