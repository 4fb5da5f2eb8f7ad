//! errors.rs
//! Errores de dominio. Lo demás (DB, SMTP, config) viaja como `anyhow::Error`.

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::models::campaign_model::CampaignStatus;

#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("Campaign has no scheduled date")]
    MissingTime,

    #[error("Invalid scheduled date '{0}'")]
    InvalidFormat(String),

    #[error("Scheduled time {0} does not exist in timezone {1}")]
    NonexistentLocalTime(NaiveDateTime, String),

    #[error("Scheduled date must be in the future")]
    NotInFuture,
}

#[derive(Debug, Error)]
pub enum CampaignError {
    /// El argumento describe qué falta, p.ej. "Campaign abc".
    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: CampaignStatus,
        to: CampaignStatus,
    },

    #[error("Cannot modify campaign while it is in progress")]
    InProgress,

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Scheduling(#[from] SchedulingError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
