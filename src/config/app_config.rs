//! config/app_config.rs
//! Configuración del proceso leída del entorno (después de `dotenv`).

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono_tz::Tz;

use crate::config::dispatch_config::DispatchConfig;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    /// Base pública para los links de tracking, sin "/" final
    pub backend_url: String,
    pub mail_host: String,
    pub mail_port: u16,
    pub schedule_timezone: Tz,
    pub dispatch: DispatchConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            host: "0.0.0.0".to_string(),
            port: 5022,
            database_path: "data/campaigns.db".to_string(),
            backend_url: "http://localhost:5022".to_string(),
            mail_host: "localhost".to_string(),
            mail_port: 587,
            schedule_timezone: chrono_tz::Asia::Kolkata,
            dispatch: DispatchConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = AppConfig::default();

        let schedule_timezone = match env::var("SCHEDULE_TIMEZONE") {
            Ok(name) => name
                .parse::<Tz>()
                .map_err(|e| anyhow!("SCHEDULE_TIMEZONE inválida '{}': {}", name, e))?,
            Err(_) => defaults.schedule_timezone,
        };

        let dispatch = DispatchConfig::new(
            env_or("DISPATCH_BATCH_SIZE", defaults.dispatch.batch_size())?,
            Duration::from_millis(env_or(
                "DISPATCH_MESSAGE_DELAY_MS",
                defaults.dispatch.per_message_delay().as_millis() as u64,
            )?),
            Duration::from_millis(env_or(
                "DISPATCH_BATCH_DELAY_MS",
                defaults.dispatch.per_batch_delay().as_millis() as u64,
            )?),
        )?;

        Ok(AppConfig {
            host: env::var("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port)?,
            database_path: env::var("DATABASE_PATH").unwrap_or(defaults.database_path),
            backend_url: env::var("BACKEND_URL")
                .unwrap_or(defaults.backend_url)
                .trim_end_matches('/')
                .to_string(),
            mail_host: env::var("MAIL_HOST").unwrap_or(defaults.mail_host),
            mail_port: env_or("MAIL_PORT", defaults.mail_port)?,
            schedule_timezone,
            dispatch,
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Valor inválido para {}: '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}
