use chrono::{Duration, FixedOffset};
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use config::builder::DefaultState;
use serde::Deserialize;

use crate::models::members::PlanPrices;

#[derive(Debug, Deserialize)]
pub struct Postgres {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize)]
pub struct Gym {
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Deserialize)]
pub struct Fingerprint {
    pub token_secret: String,
    pub token_ttl_minutes: i64,
    pub device_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub postgres: Postgres,
    pub gym: Gym,
    pub fingerprint: Fingerprint,
    pub plans: PlanPrices,
}

impl Settings {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        Self::build(Self::defaults()?.add_source(File::with_name(path)))
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let plans = PlanPrices::default();

        Config::builder()
            .set_default("postgres.max_connections", 5)?
            .set_default("gym.utc_offset_minutes", 330)?
            .set_default("fingerprint.token_ttl_minutes", 10)?
            .set_default("plans.basic", plans.basic)?
            .set_default("plans.premium", plans.premium)?
            .set_default("plans.couple", plans.couple)?
            .set_default("plans.student", plans.student)
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let config = builder
            .add_source(
                Environment::with_prefix("GYM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.offset()?;
        if self.fingerprint.token_secret.trim().is_empty() {
            return Err(ConfigError::Message(
                "fingerprint.token_secret must not be empty".to_string(),
            ));
        }
        if self.fingerprint.token_ttl_minutes <= 0 {
            return Err(ConfigError::Message(
                "fingerprint.token_ttl_minutes must be positive".to_string(),
            ));
        }
        for (plan, price) in [
            ("basic", self.plans.basic),
            ("premium", self.plans.premium),
            ("couple", self.plans.couple),
            ("student", self.plans.student),
        ] {
            if price <= 0 {
                return Err(ConfigError::Message(format!(
                    "plans.{plan} must be a positive amount, got {price}"
                )));
            }
        }
        Ok(())
    }

    pub fn offset(&self) -> Result<FixedOffset, ConfigError> {
        self.gym
            .utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                ConfigError::Message(format!(
                    "gym.utc_offset_minutes out of range: {}",
                    self.gym.utc_offset_minutes
                ))
            })
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::minutes(self.fingerprint.token_ttl_minutes)
    }
}
