use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_IMAGES_DIR: &str = "images";
const DEFAULT_COOLDOWN_SECS: u64 = 5;
const DEFAULT_DELIVERY_INTERVAL_SECS: u64 = 3600;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {name}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub images_dir: PathBuf,
    pub command_cooldown: Duration,
    pub delivery_interval: Duration,
    pub shutdown_grace: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        let images_dir = env::var("IMAGES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_IMAGES_DIR));

        let delivery_interval = secs_var("DELIVERY_INTERVAL_SECS", DEFAULT_DELIVERY_INTERVAL_SECS)?;
        if delivery_interval.is_zero() {
            return Err(ConfigError::Invalid {
                name: "DELIVERY_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            database_url,
            images_dir,
            command_cooldown: secs_var("COMMAND_COOLDOWN_SECS", DEFAULT_COOLDOWN_SECS)?,
            delivery_interval,
            shutdown_grace: secs_var("SHUTDOWN_GRACE_SECS", DEFAULT_SHUTDOWN_GRACE_SECS)?,
        })
    }
}

fn secs_var(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    match env::var(name) {
        Ok(value) => match value.parse::<u64>() {
            Ok(secs) => Ok(Duration::from_secs(secs)),
            Err(_) => Err(ConfigError::Invalid { name, value }),
        },
        Err(_) => Ok(Duration::from_secs(default)),
    }
}
