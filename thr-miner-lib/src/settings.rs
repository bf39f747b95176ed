use std::{
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use thiserror::Error;

use crate::{
    block::{AddressError, MinerAddress, PLACEHOLDER_ADDRESS},
    miner::MiningSettings,
    target::{Difficulty, MAX_DIFFICULTY},
};

pub const DEFAULT_URL: &str = "https://thrchain.up.railway.app";
pub const DEFAULT_DIFFICULTY: i64 = 5;
pub const DEFAULT_WORKERS: i64 = crate::miner::DEFAULT_WORKERS as i64;
pub const DEFAULT_REQUEST_TIMEOUT: i64 = crate::client::DEFAULT_REQUEST_TIMEOUT.as_secs() as i64;
pub const DEFAULT_STALE_CHECK_INTERVAL: i64 =
    crate::staleness::DEFAULT_STALE_CHECK_INTERVAL.as_secs() as i64;
pub const DEFAULT_REPORT_INTERVAL: i64 = crate::miner::DEFAULT_REPORT_INTERVAL.as_secs() as i64;
pub const DEFAULT_RETRY_BACKOFF: i64 = crate::DEFAULT_RETRY_BACKOFF.as_secs() as i64;
pub const DEFAULT_CYCLE_DELAY: i64 = crate::DEFAULT_CYCLE_DELAY.as_secs() as i64;
pub const FOLDER_DIR: &str = ".thr-miner";
pub const ENV_PREFIX: &str = "THR_MINER";

fn default_config_file_content() -> String {
    format!(
        "mine_to_address = \"{}\"\n\
         server_url = \"{}\"\n\
         difficulty = {}\n\
         workers = {}\n\
         request_timeout = {}\n\
         stale_check_interval = {}\n\
         report_interval = {}\n\
         retry_backoff = {}\n\
         cycle_delay = {}\n",
        PLACEHOLDER_ADDRESS,
        DEFAULT_URL,
        DEFAULT_DIFFICULTY,
        DEFAULT_WORKERS,
        DEFAULT_REQUEST_TIMEOUT,
        DEFAULT_STALE_CHECK_INTERVAL,
        DEFAULT_REPORT_INTERVAL,
        DEFAULT_RETRY_BACKOFF,
        DEFAULT_CYCLE_DELAY,
    )
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error("`{key}` must be {expected}, got {value}")]
    OutOfRange {
        key: &'static str,
        expected: &'static str,
        value: i64,
    },
}

/// Raw settings as layered from defaults, the config file and the environment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConfigSettings {
    pub server_url: String,
    pub mine_to_address: String,
    pub difficulty: i64,
    pub workers: i64,
    pub request_timeout: i64,
    pub stale_check_interval: i64,
    pub report_interval: i64,
    pub retry_backoff: i64,
    pub cycle_delay: i64,
}

/// Validated settings the miner runs with.
#[derive(Debug, Clone)]
pub struct MinerSettings {
    pub server_url: String,
    pub address: MinerAddress,
    pub difficulty: Difficulty,
    pub request_timeout: Duration,
    pub retry_backoff: Duration,
    pub cycle_delay: Duration,
    pub mining: MiningSettings,
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(FOLDER_DIR).join("config.toml"))
}

/// Writes a default config on first run so users have a file to edit.
fn write_default_config(path: &Path) {
    if path.exists() {
        return;
    }
    if let Some(folder) = path.parent() {
        if let Err(err) = std::fs::create_dir_all(folder) {
            log::warn!(
                "Couldn't create default config folder {}: {}",
                folder.to_string_lossy(),
                err
            );
            return;
        }
    }
    match std::fs::File::create(path) {
        Ok(mut file) => {
            if let Err(err) = file.write_all(default_config_file_content().as_bytes()) {
                log::warn!(
                    "Couldn't write default config file {}: {}",
                    path.to_string_lossy(),
                    err
                );
            }
        }
        Err(err) => {
            log::warn!(
                "Couldn't create default config file {}: {}",
                path.to_string_lossy(),
                err
            );
        }
    }
}

impl ConfigSettings {
    /// Loads `~/.thr-miner/config.toml` (created on first run) or `config_path`,
    /// then `THR_MINER_*` environment variables on top.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut s = Self::defaults()?;

        let path = match config_path {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let path = default_config_path();
                if let Some(path) = &path {
                    write_default_config(path);
                }
                path
            }
        };
        if let Some(path) = path {
            let required = config_path.is_some();
            s.merge(File::from(path).required(required))?;
        }
        s.merge(Environment::with_prefix(ENV_PREFIX))?;

        s.try_into()
    }

    fn defaults() -> Result<Config, ConfigError> {
        let mut s = Config::new();
        s.set_default("server_url", DEFAULT_URL)?;
        s.set_default("mine_to_address", PLACEHOLDER_ADDRESS)?;
        s.set_default("difficulty", DEFAULT_DIFFICULTY)?;
        s.set_default("workers", DEFAULT_WORKERS)?;
        s.set_default("request_timeout", DEFAULT_REQUEST_TIMEOUT)?;
        s.set_default("stale_check_interval", DEFAULT_STALE_CHECK_INTERVAL)?;
        s.set_default("report_interval", DEFAULT_REPORT_INTERVAL)?;
        s.set_default("retry_backoff", DEFAULT_RETRY_BACKOFF)?;
        s.set_default("cycle_delay", DEFAULT_CYCLE_DELAY)?;
        Ok(s)
    }

    /// Built-in defaults only, without touching the filesystem or environment.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::defaults()?.try_into()
    }

    pub fn resolve(&self) -> Result<MinerSettings, SettingsError> {
        let address = MinerAddress::new(self.mine_to_address.clone())?;
        let difficulty = in_range(
            "difficulty",
            self.difficulty,
            0..=MAX_DIFFICULTY as i64,
            "between 0 and 64",
        )?;
        let workers = in_range("workers", self.workers, 1..=1024, "between 1 and 1024")?;
        Ok(MinerSettings {
            server_url: self.server_url.clone(),
            address,
            difficulty: Difficulty::new(difficulty as u32),
            request_timeout: seconds("request_timeout", self.request_timeout, 1)?,
            retry_backoff: seconds("retry_backoff", self.retry_backoff, 1)?,
            cycle_delay: seconds("cycle_delay", self.cycle_delay, 0)?,
            mining: MiningSettings {
                workers: workers as usize,
                report_interval: seconds("report_interval", self.report_interval, 1)?,
                stale_check_interval: seconds("stale_check_interval", self.stale_check_interval, 1)?,
            },
        })
    }
}

fn in_range(
    key: &'static str,
    value: i64,
    range: std::ops::RangeInclusive<i64>,
    expected: &'static str,
) -> Result<i64, SettingsError> {
    if !range.contains(&value) {
        return Err(SettingsError::OutOfRange {
            key,
            expected,
            value,
        });
    }
    Ok(value)
}

fn seconds(key: &'static str, value: i64, min: i64) -> Result<Duration, SettingsError> {
    if value < min {
        return Err(SettingsError::OutOfRange {
            key,
            expected: if min == 0 {
                "zero or more seconds"
            } else {
                "at least one second"
            },
            value,
        });
    }
    Ok(Duration::from_secs(value as u64))
}
