//! models/campaign_model.rs
//! Campaña, su máquina de estados y el snapshot de progreso.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::CampaignError;

/// Formato con el que se guarda `scheduled_at` (hora de pared, segundos enteros).
pub const WALL_CLOCK_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Completed,
    Failed,
    Cancelled,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Sending => "sending",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
            CampaignStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Failed | CampaignStatus::Cancelled
        )
    }

    /// Transiciones permitidas. `scheduled -> failed` cubre el fallo del hand-off
    /// cuando el paso a `sending` todavía no quedó persistido.
    pub fn can_transition_to(&self, next: CampaignStatus) -> bool {
        use CampaignStatus::*;
        matches!(
            (self, next),
            (Draft, Scheduled)
                | (Scheduled, Scheduled)
                | (Scheduled, Cancelled)
                | (Draft, Sending)
                | (Scheduled, Sending)
                | (Sending, Completed)
                | (Sending, Failed)
                | (Scheduled, Failed)
        )
    }

    pub fn transition(self, next: CampaignStatus) -> Result<CampaignStatus, CampaignError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CampaignError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "scheduled" => Ok(CampaignStatus::Scheduled),
            "sending" => Ok(CampaignStatus::Sending),
            "completed" => Ok(CampaignStatus::Completed),
            "failed" => Ok(CampaignStatus::Failed),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            other => Err(anyhow::anyhow!("Estado de campaña desconocido: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub email: String,
    pub name: String,
    pub id: String,
}

/// Deja un solo destinatario por email (sin distinguir mayúsculas); gana el primero.
pub fn dedupe_recipients(recipients: Vec<Recipient>) -> Vec<Recipient> {
    let mut seen = HashSet::new();
    recipients
        .into_iter()
        .filter(|r| seen.insert(r.email.trim().to_lowercase()))
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignProgress {
    pub success_count: u32,
    pub fail_count: u32,
    pub total_processed: u32,
    pub total_recipients: u32,
}

impl CampaignProgress {
    /// Contadores en cero para una corrida nueva.
    pub fn start(total_recipients: u32) -> Self {
        Self {
            total_recipients,
            ..Self::default()
        }
    }

    /// Como `start`, para el largo de una lista de destinatarios.
    pub fn for_total(total_recipients: usize) -> Result<Self, CampaignError> {
        let total = u32::try_from(total_recipients).map_err(|_| {
            CampaignError::Validation(format!("Too many recipients: {}", total_recipients))
        })?;
        Ok(Self::start(total))
    }

    pub fn record_success(&mut self) {
        self.success_count += 1;
        self.total_processed = self.success_count + self.fail_count;
    }

    pub fn record_failure(&mut self) {
        self.fail_count += 1;
        self.total_processed = self.success_count + self.fail_count;
    }

    /// `success + fail == processed <= total`
    pub fn is_consistent(&self) -> bool {
        self.success_count + self.fail_count == self.total_processed
            && self.total_processed <= self.total_recipients
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub subject: String,
    pub template_id: Option<String>,
    pub sender_id: Option<String>,
    pub status: CampaignStatus,
    pub scheduled_at: Option<NaiveDateTime>,
    pub recipients: Vec<Recipient>,
    pub progress: CampaignProgress,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn new_draft(name: String, subject: String) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            subject,
            template_id: None,
            sender_id: None,
            status: CampaignStatus::Draft,
            scheduled_at: None,
            recipients: Vec::new(),
            progress: CampaignProgress::default(),
            error_message: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Cambios parciales que el motor aplica sobre una campaña existente.
#[derive(Debug, Clone, Default)]
pub struct CampaignPatch {
    pub status: Option<CampaignStatus>,
    pub progress: Option<CampaignProgress>,
    pub error_message: Option<Option<String>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub scheduled_at: Option<Option<NaiveDateTime>>,
}

impl CampaignPatch {
    pub fn status(status: CampaignStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn progress(progress: CampaignProgress) -> Self {
        Self {
            progress: Some(progress),
            ..Self::default()
        }
    }

    pub fn failed(message: String) -> Self {
        Self {
            status: Some(CampaignStatus::Failed),
            error_message: Some(Some(message)),
            ..Self::default()
        }
    }

    pub fn completed(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(CampaignStatus::Completed),
            completed_at: Some(at),
            ..Self::default()
        }
    }

    /// Aplica el patch sobre una copia en memoria (lo usan los stores).
    pub fn apply(&self, campaign: &mut Campaign) {
        if let Some(status) = self.status {
            campaign.status = status;
        }
        if let Some(progress) = self.progress {
            campaign.progress = progress;
        }
        if let Some(error) = &self.error_message {
            campaign.error_message = error.clone();
        }
        if let Some(at) = self.completed_at {
            campaign.completed_at = Some(at);
        }
        if let Some(at) = self.scheduled_at {
            campaign.scheduled_at = at;
        }
        campaign.updated_at = Utc::now();
    }
}

/// Identidad del remitente (registro externo). La contraseña SMTP nunca sale en JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderIdentity {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub id: String,
    pub name: String,
    pub content: String,
}

// ----------------------------------------------------------------
// Requests / responses de la capa HTTP
// ----------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    pub subject: String,
    pub template_id: Option<String>,
    pub sender_id: Option<String>,
    pub scheduled_at: Option<String>,
    pub recipients: Option<Vec<Recipient>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCampaignRequest {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub template_id: Option<String>,
    pub sender_id: Option<String>,
    pub scheduled_at: Option<String>,
    pub recipients: Option<Vec<Recipient>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleCampaignRequest {
    pub scheduled_at: String,
    pub sender_id: Option<String>,
    pub recipients: Option<Vec<Recipient>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendCampaignRequest {
    pub sender_id: Option<String>,
    pub recipients: Option<Vec<Recipient>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendCampaignResponse {
    pub campaign_id: String,
    pub estimated_time: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CampaignStatusResponse {
    pub campaign_id: String,
    pub name: String,
    pub status: CampaignStatus,
    pub progress: CampaignProgress,
    pub scheduled_at: Option<NaiveDateTime>,
    pub sender_id: Option<String>,
    pub template_id: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl From<&Campaign> for CampaignStatusResponse {
    fn from(c: &Campaign) -> Self {
        Self {
            campaign_id: c.id.clone(),
            name: c.name.clone(),
            status: c.status,
            progress: c.progress,
            scheduled_at: c.scheduled_at,
            sender_id: c.sender_id.clone(),
            template_id: c.template_id.clone(),
            completed_at: c.completed_at,
            error_message: c.error_message.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduledJobInfo {
    pub campaign_id: String,
    pub next_run: String,
}
